//! Request/response translators between the canonical Anthropic Messages
//! shape and each upstream dialect.

pub mod codex;
pub mod gemini;
pub mod openai;

/// Normalize an upstream finish reason to an Anthropic stop reason.
pub fn map_stop_reason(raw: Option<&str>, tool_used: bool) -> String {
    if tool_used {
        return "tool_use".into();
    }
    match raw.map(str::to_lowercase).as_deref() {
        None | Some("") => "end_turn".into(),
        Some("tool_calls") => "tool_use".into(),
        Some("stop") | Some("stop_sequence") | Some("completed") => "end_turn".into(),
        Some("length") => "max_tokens".into(),
        Some(other) => other.into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stop_reason_mapping() {
        assert_eq!(map_stop_reason(Some("stop"), false), "end_turn");
        assert_eq!(map_stop_reason(Some("tool_calls"), false), "tool_use");
        assert_eq!(map_stop_reason(Some("length"), false), "max_tokens");
        assert_eq!(map_stop_reason(None, false), "end_turn");
        assert_eq!(map_stop_reason(Some("stop"), true), "tool_use");
        assert_eq!(map_stop_reason(Some("content_filter"), false), "content_filter");
    }
}
