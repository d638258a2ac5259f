use serde::{Deserialize, Serialize};

/// Sampling parameters sent under `options`. Field names follow the Ollama
/// wire format.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct SamplingOptions {
    pub temperature: f32,
    pub top_p: f32,
    pub top_k: u32,
    pub repeat_penalty: f32,
    #[serde(rename = "num_predict")]
    pub max_tokens: u32,
}

/// Body of `POST /api/generate`. Built once per session by
/// [`crate::relay::prompt::build_request`] and never mutated afterwards.
#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct InferenceRequest {
    pub model: String,
    pub prompt: String,
    #[serde(rename = "stream")]
    pub streaming: bool,
    pub options: SamplingOptions,
}

/// One NDJSON line of a streaming generate response. Fields other than these
/// (timings, context, ...) are ignored.
#[derive(Deserialize, Debug, Clone)]
pub struct GenerateChunk {
    #[serde(default)]
    pub response: Option<String>,
    #[serde(default)]
    pub done: bool,
    #[serde(default)]
    pub error: Option<String>,
}

/// Body of a non-streaming generate response.
#[derive(Deserialize, Debug, Clone)]
pub struct GenerateResponse {
    #[serde(default)]
    pub model: String,
    pub response: String,
    #[serde(default)]
    pub done: bool,
    pub eval_count: Option<i32>,
    pub total_duration: Option<i64>,
}

#[derive(Deserialize, Debug, Clone)]
pub struct ListResponse {
    #[serde(default)]
    pub models: Vec<ModelInfo>,
}

#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct ModelInfo {
    pub name: String,
    #[serde(default)]
    pub modified_at: String,
    #[serde(default)]
    pub size: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_wire_format() {
        let req = InferenceRequest {
            model: "codellama:7b".into(),
            prompt: "Oi".into(),
            streaming: true,
            options: SamplingOptions {
                temperature: 0.5,
                top_p: 0.9,
                top_k: 40,
                repeat_penalty: 1.1,
                max_tokens: 10,
            },
        };
        let value = serde_json::to_value(&req).unwrap();
        assert_eq!(value["stream"], true);
        assert_eq!(value["options"]["num_predict"], 10);
        assert_eq!(value["options"]["top_k"], 40);
        assert!(value.get("streaming").is_none());
    }

    #[test]
    fn test_chunk_ignores_extra_fields() {
        let chunk: GenerateChunk = serde_json::from_str(
            r#"{"model":"x","created_at":"now","response":"Ol","done":false,"eval_count":3}"#,
        )
        .unwrap();
        assert_eq!(chunk.response.as_deref(), Some("Ol"));
        assert!(!chunk.done);
    }
}
