use once_cell::sync::Lazy;
use regex::Regex;

pub const DEFAULT_TITLE: &str = "Nova Conversa";
const MAX_TITLE_CHARS: usize = 50;

static OPENERS: Lazy<Vec<(Regex, &'static str)>> = Lazy::new(|| {
    [
        (r"(?i)^(?:o que é|o que são|oque é|oque são)\s+(.+)", "O que é"),
        (r"(?i)^como\s+(.+)", "Como"),
        (r"(?i)^(?:por que|porque|pq)\s+(.+)", "Por que"),
        (r"(?i)^(?:qual|quais)\s+(.+)", "Qual"),
        (r"(?i)^(?:me explique|explique|explica)\s+(.+)", "Explicar"),
        (r"(?i)^(?:diferença entre|diferenca entre|diff entre)\s+(.+)", "Diferença entre"),
        (r"(?i)^(?:me ajude com|me ajude|ajuda com|ajuda|help)\s+(.+)", "Ajuda com"),
        (r"(?i)^tutorial\s+(.+)", "Tutorial"),
    ]
    .into_iter()
    .filter_map(|(pattern, prefix)| Regex::new(pattern).ok().map(|re| (re, prefix)))
    .collect()
});

static WHITESPACE: Lazy<Option<Regex>> = Lazy::new(|| Regex::new(r"\s+").ok());

/// Short conversation title derived from the first question.
pub fn generate_title(message: &str) -> String {
    let clean = match WHITESPACE.as_ref() {
        Some(re) => re.replace_all(message.trim(), " ").into_owned(),
        None => message.trim().to_string(),
    };

    for (re, prefix) in OPENERS.iter() {
        if let Some(rest) = re.captures(&clean).and_then(|c| c.get(1)) {
            return clip(&format!("{prefix} {}", rest.as_str()));
        }
    }

    if clean.is_empty() {
        DEFAULT_TITLE.to_string()
    } else {
        clip(&clean)
    }
}

fn clip(title: &str) -> String {
    if title.chars().count() > MAX_TITLE_CHARS {
        let head: String = title.chars().take(MAX_TITLE_CHARS - 3).collect();
        format!("{head}...")
    } else {
        title.to_string()
    }
}
