//! Server-Sent-Events plumbing shared by all provider executors.
//!
//! Upstreams speak three flavours of SSE:
//! - `data:`-only lines (OpenAI chat.completions, Gemini with `alt=sse`)
//! - `event:` + `data:` blocks separated by blank lines (Codex)
//! - raw Anthropic framing, forwarded byte-for-byte
//!
//! The buffer-draining helpers here are pure so they can be tested
//! without sockets; executors feed them from `reqwest` byte streams.

use bytes::Bytes;
use serde_json::Value;
use uuid::Uuid;

/// Frame a single Anthropic SSE event (`event:` + `data:` + blank line).
pub fn sse_event(event_type: &str, data: &Value) -> Bytes {
    Bytes::from(format!("event: {event_type}\ndata: {data}\n\n"))
}

/// Baseline Anthropic message payload for `message_start` events.
pub fn new_message_stub(model_id: &str) -> Value {
    serde_json::json!({
        "type": "message",
        "id": format!("msg_{}", Uuid::new_v4().simple()),
        "role": "assistant",
        "model": model_id,
        "content": [],
        "stop_reason": null,
        "stop_sequence": null,
        "usage": {"input_tokens": 0, "output_tokens": 0},
    })
}

/// Drain complete `data:` payloads from a newline-delimited SSE buffer.
///
/// Consumes whole lines; a trailing partial line stays in the buffer for
/// the next chunk. `[DONE]` sentinels and non-data lines are skipped.
pub fn drain_data_lines(buffer: &mut String) -> Vec<String> {
    let mut payloads = Vec::new();
    while let Some(pos) = buffer.find('\n') {
        let line: String = buffer.drain(..=pos).collect();
        let line = line.trim();
        if let Some(data) = line.strip_prefix("data:") {
            let data = data.trim();
            if !data.is_empty() && data != "[DONE]" {
                payloads.push(data.to_string());
            }
        }
    }
    payloads
}

/// Drain complete `event:` + `data:` blocks (blank-line delimited) from
/// an SSE buffer. Returns `(event_name, data_payload)` pairs; blocks
/// missing either part are dropped.
pub fn drain_event_blocks(buffer: &mut String) -> Vec<(String, String)> {
    let mut blocks = Vec::new();
    while let Some(pos) = buffer.find("\n\n") {
        let block: String = buffer.drain(..pos).collect();
        buffer.drain(..2);

        let mut event_name = None;
        let mut data = None;
        for line in block.lines() {
            let line = line.trim();
            if let Some(name) = line.strip_prefix("event:") {
                event_name = Some(name.trim().to_string());
            } else if let Some(payload) = line.strip_prefix("data:") {
                let payload = payload.trim();
                if !payload.is_empty() && payload != "[DONE]" {
                    data = Some(payload.to_string());
                }
            }
        }
        if let (Some(name), Some(payload)) = (event_name, data) {
            blocks.push((name, payload));
        }
    }
    blocks
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sse_event_framing() {
        let b = sse_event("message_stop", &serde_json::json!({"type": "message_stop"}));
        let s = std::str::from_utf8(&b).unwrap();
        assert!(s.starts_with("event: message_stop\ndata: "));
        assert!(s.ends_with("\n\n"));
    }

    #[test]
    fn drain_data_lines_basic() {
        let mut buf = String::from("data: {\"a\":1}\ndata: {\"b\":2}\n");
        assert_eq!(drain_data_lines(&mut buf), vec!["{\"a\":1}", "{\"b\":2}"]);
        assert!(buf.is_empty());
    }

    #[test]
    fn drain_data_lines_keeps_partial() {
        let mut buf = String::from("data: complete\ndata: part");
        assert_eq!(drain_data_lines(&mut buf), vec!["complete"]);
        assert_eq!(buf, "data: part");
    }

    #[test]
    fn drain_data_lines_skips_done_and_noise() {
        let mut buf = String::from("event: ping\ndata: [DONE]\ndata: real\n");
        assert_eq!(drain_data_lines(&mut buf), vec!["real"]);
    }

    #[test]
    fn drain_event_blocks_basic() {
        let mut buf =
            String::from("event: response.created\ndata: {\"type\":\"response.created\"}\n\n");
        let blocks = drain_event_blocks(&mut buf);
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].0, "response.created");
        assert!(buf.is_empty());
    }

    #[test]
    fn drain_event_blocks_partial_stays() {
        let mut buf = String::from("event: a\ndata: {}\n\nevent: b\ndata:");
        let blocks = drain_event_blocks(&mut buf);
        assert_eq!(blocks.len(), 1);
        assert_eq!(buf, "event: b\ndata:");
    }

    #[test]
    fn drain_event_blocks_requires_both_parts() {
        let mut buf = String::from("event: orphan\n\ndata: {\"x\":1}\n\n");
        assert!(drain_event_blocks(&mut buf).is_empty());
    }

    #[test]
    fn message_stub_shape() {
        let stub = new_message_stub("gpt-5");
        assert_eq!(stub["role"], "assistant");
        assert_eq!(stub["model"], "gpt-5");
        assert!(stub["id"].as_str().unwrap().starts_with("msg_"));
    }
}
