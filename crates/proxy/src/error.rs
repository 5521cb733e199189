//! Anthropic-shaped error envelopes for upstream failures.

use serde_json::{json, Value};

/// Build the Anthropic error envelope the CLI understands.
pub fn anthropic_error_payload(message: &str, error_type: &str) -> Value {
    json!({
        "type": "error",
        "error": {"type": error_type, "message": message},
    })
}

/// Extract `(type, message)` from an upstream error payload.
///
/// Some providers nest a JSON error document inside the message string;
/// one level of unwrapping is attempted.
pub fn extract_error_details(err: &Value) -> (String, String) {
    let obj = err.get("error").and_then(Value::as_object);
    let mut error_type = obj
        .and_then(|o| o.get("type"))
        .and_then(Value::as_str)
        .unwrap_or("api_error")
        .to_string();
    let mut message = obj
        .and_then(|o| o.get("message"))
        .and_then(Value::as_str)
        .map(str::to_string)
        .or_else(|| err.get("message").and_then(Value::as_str).map(str::to_string))
        .unwrap_or_else(|| err.to_string());

    if message.starts_with('{') {
        if let Ok(nested) = serde_json::from_str::<Value>(&message) {
            if let Some(details) = nested.get("error").and_then(Value::as_object) {
                if let Some(m) = details.get("message").and_then(Value::as_str) {
                    message = m.to_string();
                }
                if let Some(t) = details.get("type").and_then(Value::as_str) {
                    error_type = t.to_string();
                }
            }
        }
    }

    (error_type, message)
}

/// Map a Gemini status string (`RESOURCE_EXHAUSTED`, ...) to an Anthropic
/// error type.
pub fn map_gemini_error_type(code: &str) -> &'static str {
    match code {
        "INVALID_ARGUMENT" | "FAILED_PRECONDITION" | "OUT_OF_RANGE" => "invalid_request_error",
        "UNAUTHENTICATED" => "authentication_error",
        "PERMISSION_DENIED" => "permission_error",
        "NOT_FOUND" => "not_found_error",
        "RESOURCE_EXHAUSTED" => "rate_limit_error",
        _ => "api_error",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn extracts_flat_error() {
        let err = json!({"error": {"type": "overloaded_error", "message": "busy"}});
        let (t, m) = extract_error_details(&err);
        assert_eq!(t, "overloaded_error");
        assert_eq!(m, "busy");
    }

    #[test]
    fn unwraps_nested_json_message() {
        let nested = json!({"error": {"type": "rate_limit_error", "message": "slow down"}});
        let err = json!({"error": {"type": "api_error", "message": nested.to_string()}});
        let (t, m) = extract_error_details(&err);
        assert_eq!(t, "rate_limit_error");
        assert_eq!(m, "slow down");
    }

    #[test]
    fn falls_back_to_message_field() {
        let err = json!({"message": "plain text failure"});
        let (t, m) = extract_error_details(&err);
        assert_eq!(t, "api_error");
        assert_eq!(m, "plain text failure");
    }

    #[test]
    fn gemini_error_mapping() {
        assert_eq!(map_gemini_error_type("RESOURCE_EXHAUSTED"), "rate_limit_error");
        assert_eq!(map_gemini_error_type("UNAUTHENTICATED"), "authentication_error");
        assert_eq!(map_gemini_error_type("SOMETHING_ELSE"), "api_error");
    }
}
