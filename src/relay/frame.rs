use crate::api::GenerateChunk;

/// Classification of one upstream NDJSON line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpstreamFrame {
    TokenFragment(String),
    Completion,
    /// The backend reported an error inside the stream.
    Failure(String),
    Malformed(String),
}

/// Parses one raw line. Total: anything that is not a recognizable generate
/// chunk becomes `Malformed` carrying the raw line.
pub fn parse_frame(line: &str) -> UpstreamFrame {
    let chunk: GenerateChunk = match serde_json::from_str(line) {
        Ok(c) => c,
        Err(_) => return UpstreamFrame::Malformed(line.to_string()),
    };

    if let Some(message) = chunk.error {
        return UpstreamFrame::Failure(message);
    }

    if chunk.done {
        return UpstreamFrame::Completion;
    }

    match chunk.response {
        Some(text) => UpstreamFrame::TokenFragment(text),
        None => UpstreamFrame::Malformed(line.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_fragment() {
        assert_eq!(
            parse_frame(r#"{"response":"Ol","done":false}"#),
            UpstreamFrame::TokenFragment("Ol".into())
        );
    }

    #[test]
    fn test_missing_done_defaults_to_false() {
        assert_eq!(parse_frame(r#"{"response":"á!"}"#), UpstreamFrame::TokenFragment("á!".into()));
    }

    #[test]
    fn test_completion() {
        assert_eq!(parse_frame(r#"{"done":true}"#), UpstreamFrame::Completion);
        assert_eq!(
            parse_frame(r#"{"model":"m","response":"","done":true,"eval_count":12}"#),
            UpstreamFrame::Completion
        );
    }

    #[test]
    fn test_backend_error_line() {
        assert_eq!(
            parse_frame(r#"{"error":"model 'x' not found"}"#),
            UpstreamFrame::Failure("model 'x' not found".into())
        );
    }

    #[test]
    fn test_malformed_inputs() {
        for raw in ["not-json", "{", "[]", "42", r#"{"done":"yes"}"#, r#"{"other":1}"#, r#"{"response":7}"#] {
            assert_eq!(parse_frame(raw), UpstreamFrame::Malformed(raw.to_string()), "{raw}");
        }
    }
}
