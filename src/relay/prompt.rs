use crate::api::{InferenceRequest, SamplingOptions};

/// Context text beyond this many characters is cut off.
pub const MAX_CONTEXT_CHARS: usize = 3000;

pub const DEFAULT_TEMPERATURE: f32 = 0.7;
pub const DEFAULT_TOP_P: f32 = 0.9;
pub const DEFAULT_TOP_K: u32 = 40;
pub const DEFAULT_REPEAT_PENALTY: f32 = 1.1;
pub const DEFAULT_MAX_TOKENS: u32 = 5000;

const CONTEXT_START: &str = "---INÍCIO DO ARQUIVO---";
const CONTEXT_END: &str = "---FIM DO ARQUIVO---";
const CONTEXT_INSTRUCTION: &str =
    "Com base no conteúdo do arquivo acima, responda sempre em português brasileiro, de forma clara e objetiva.";
const PLAIN_INSTRUCTION: &str = "Responda sempre em português brasileiro.";

pub fn default_options() -> SamplingOptions {
    SamplingOptions {
        temperature: DEFAULT_TEMPERATURE,
        top_p: DEFAULT_TOP_P,
        top_k: DEFAULT_TOP_K,
        repeat_penalty: DEFAULT_REPEAT_PENALTY,
        max_tokens: DEFAULT_MAX_TOKENS,
    }
}

/// Keeps the first `MAX_CONTEXT_CHARS` characters. Cuts on a char boundary.
pub fn truncate_context(context: &str) -> &str {
    match context.char_indices().nth(MAX_CONTEXT_CHARS) {
        Some((idx, _)) => &context[..idx],
        None => context,
    }
}

pub fn compose_prompt(question: &str, context: Option<&str>) -> String {
    match context.filter(|c| !c.trim().is_empty()) {
        Some(context) => format!(
            "{CONTEXT_START}\n{}\n{CONTEXT_END}\n\n{CONTEXT_INSTRUCTION}\n\nPergunta: {question}",
            truncate_context(context)
        ),
        None => format!("{PLAIN_INSTRUCTION}\n\n{question}"),
    }
}

/// Builds the generate request for one session. The question must already be
/// validated as non-blank by the caller.
pub fn build_request(model: &str, question: &str, context: Option<&str>, streaming: bool) -> InferenceRequest {
    InferenceRequest {
        model: model.to_string(),
        prompt: compose_prompt(question, context),
        streaming,
        options: default_options(),
    }
}
