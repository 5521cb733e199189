//! Anthropic ⇄ OpenAI chat.completions translation.
//!
//! Used by every OpenAI-compatible provider except the ChatGPT backend
//! (`provider == "openai"`), which speaks the Codex protocol instead.

use std::collections::HashMap;

use serde_json::{json, Map, Value};
use uuid::Uuid;

use crate::context::TranslationContext;
use crate::translators::map_stop_reason;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Request direction
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Drop schema fields that commonly break OpenAI-compatible providers.
/// Currently only `format` (rejected by several backends on string types).
pub fn sanitize_json_schema(schema: &Value) -> Value {
    match schema {
        Value::Object(map) => {
            let mut cleaned = Map::new();
            for (key, value) in map {
                if key == "format" {
                    continue;
                }
                cleaned.insert(key.clone(), sanitize_json_schema(value));
            }
            Value::Object(cleaned)
        }
        Value::Array(items) => Value::Array(items.iter().map(sanitize_json_schema).collect()),
        other => other.clone(),
    }
}

/// Anthropic tool definitions → OpenAI function-call schema.
pub fn tools_to_openai(tools: &[Value]) -> Vec<Value> {
    tools
        .iter()
        .filter_map(|tool| {
            let name = tool.get("name")?.as_str()?;
            let params = tool
                .get("input_schema")
                .cloned()
                .unwrap_or_else(|| json!({"type": "object", "properties": {}}));
            Some(json!({
                "type": "function",
                "function": {
                    "name": name,
                    "description": tool.get("description").and_then(Value::as_str).unwrap_or(""),
                    "parameters": sanitize_json_schema(&params),
                },
            }))
        })
        .collect()
}

/// Anthropic `tool_choice` → OpenAI. `none` maps to `None` and is omitted
/// from the request rather than sent as the string "none".
pub fn tool_choice_to_openai(choice: &Value) -> Option<Value> {
    match choice {
        Value::String(s) if s == "none" => None,
        Value::String(_) | Value::Null => Some(json!("auto")),
        Value::Object(obj) => obj
            .get("name")
            .and_then(Value::as_str)
            .map(|name| json!({"type": "function", "function": {"name": name}}))
            .or(Some(json!("auto"))),
        _ => Some(json!("auto")),
    }
}

/// Anthropic system content (string or text-block array) → one flattened
/// chat.completions system message.
pub fn system_to_openai(system: &Value) -> Option<Value> {
    match system {
        Value::String(s) => Some(json!({"role": "system", "content": s})),
        Value::Array(parts) => {
            let texts: Vec<&str> = parts
                .iter()
                .filter(|p| p.get("type").and_then(Value::as_str) == Some("text"))
                .filter_map(|p| p.get("text").and_then(Value::as_str))
                .collect();
            if texts.is_empty() {
                None
            } else {
                Some(json!({"role": "system", "content": texts.join("\n")}))
            }
        }
        _ => None,
    }
}

fn is_base64_source(block: &Value) -> bool {
    let source = block.get("source");
    source.and_then(|s| s.get("type")).and_then(Value::as_str) == Some("base64")
        && source
            .and_then(|s| s.get("media_type"))
            .and_then(Value::as_str)
            .is_some()
        && source.and_then(|s| s.get("data")).and_then(Value::as_str).is_some()
}

fn tool_result_text(content: Option<&Value>) -> String {
    match content {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Array(items)) => items
            .iter()
            .filter(|i| i.get("type").and_then(Value::as_str) == Some("text"))
            .filter_map(|i| i.get("text").and_then(Value::as_str))
            .collect::<Vec<_>>()
            .join("\n"),
        Some(other) => other.to_string(),
        None => String::new(),
    }
}

/// Anthropic conversation blocks → OpenAI chat messages. Returns the
/// messages plus the tool-id → tool-name map used downstream.
pub fn messages_to_openai(messages: &[Value]) -> (Vec<Value>, HashMap<String, String>) {
    let mut out = Vec::new();
    let mut tool_id_name = HashMap::new();

    for message in messages {
        let role = message.get("role").and_then(Value::as_str).unwrap_or("user");
        let content = message.get("content");

        match role {
            "user" => {
                let mut user_parts: Vec<Value> = Vec::new();
                match content {
                    Some(Value::String(text)) => {
                        user_parts.push(json!({"type": "text", "text": text}));
                    }
                    Some(Value::Array(blocks)) => {
                        for block in blocks {
                            match block.get("type").and_then(Value::as_str) {
                                Some("text") => user_parts.push(json!({
                                    "type": "text",
                                    "text": block.get("text").and_then(Value::as_str).unwrap_or(""),
                                })),
                                Some("image") if is_base64_source(block) => {
                                    let source = &block["source"];
                                    let url = format!(
                                        "data:{};base64,{}",
                                        source["media_type"].as_str().unwrap_or(""),
                                        source["data"].as_str().unwrap_or("")
                                    );
                                    user_parts.push(
                                        json!({"type": "image_url", "image_url": {"url": url}}),
                                    );
                                }
                                Some("tool_result") => {
                                    let tool_use_id = block
                                        .get("tool_use_id")
                                        .and_then(Value::as_str)
                                        .map(str::to_string)
                                        .unwrap_or_else(|| {
                                            format!("tool_{}", &Uuid::new_v4().simple().to_string()[..8])
                                        });
                                    let mut text = tool_result_text(block.get("content"));
                                    if block.get("is_error").and_then(Value::as_bool) == Some(true) {
                                        text = json!({"error": true, "content": text}).to_string();
                                    }
                                    out.push(json!({
                                        "role": "tool",
                                        "tool_call_id": tool_use_id,
                                        "content": text,
                                    }));
                                }
                                _ => {}
                            }
                        }
                    }
                    _ => {}
                }
                if !user_parts.is_empty() {
                    out.push(json!({"role": "user", "content": user_parts}));
                }
            }
            "assistant" => {
                let mut text_acc = String::new();
                let mut tool_calls: Vec<Value> = Vec::new();
                match content {
                    Some(Value::String(text)) => text_acc.push_str(text),
                    Some(Value::Array(blocks)) => {
                        for block in blocks {
                            match block.get("type").and_then(Value::as_str) {
                                Some("text") => text_acc
                                    .push_str(block.get("text").and_then(Value::as_str).unwrap_or("")),
                                Some("tool_use") => {
                                    let name = block
                                        .get("name")
                                        .and_then(Value::as_str)
                                        .unwrap_or("function");
                                    let id = block
                                        .get("id")
                                        .and_then(Value::as_str)
                                        .map(str::to_string)
                                        .unwrap_or_else(|| {
                                            format!("tool_{}", &Uuid::new_v4().simple().to_string()[..8])
                                        });
                                    tool_id_name.insert(id.clone(), name.to_string());
                                    let args = block.get("input").cloned().unwrap_or(json!({}));
                                    tool_calls.push(json!({
                                        "id": id,
                                        "type": "function",
                                        "function": {
                                            "name": name,
                                            "arguments": args.to_string(),
                                        },
                                    }));
                                }
                                _ => {}
                            }
                        }
                    }
                    _ => {}
                }
                let mut payload = json!({"role": "assistant", "content": text_acc});
                if !tool_calls.is_empty() {
                    payload["tool_calls"] = Value::Array(tool_calls);
                }
                out.push(payload);
            }
            _ => {}
        }
    }

    (out, tool_id_name)
}

/// Build a chat.completions payload from an Anthropic request body.
pub fn request_to_openai(body: &Value) -> (Value, HashMap<String, String>) {
    let empty = Vec::new();
    let messages_in = body.get("messages").and_then(Value::as_array).unwrap_or(&empty);
    let (mut messages, tool_id_map) = messages_to_openai(messages_in);
    if let Some(system) = body.get("system").and_then(system_to_openai) {
        messages.insert(0, system);
    }

    let mut request = json!({
        "messages": messages,
        "stream": body.get("stream").and_then(Value::as_bool).unwrap_or(false),
    });

    if let Some(t) = body.get("temperature") {
        request["temperature"] = t.clone();
    }
    if let Some(p) = body.get("top_p") {
        if !p.is_null() {
            request["top_p"] = p.clone();
        }
    }
    if let Some(stops) = body.get("stop_sequences") {
        match stops {
            Value::Array(a) if !a.is_empty() => request["stop"] = stops.clone(),
            Value::String(_) => request["stop"] = json!([stops]),
            _ => {}
        }
    }
    if let Some(max) = body.get("max_tokens").and_then(Value::as_u64) {
        request["max_tokens"] = json!(max);
    }
    if let Some(tools) = body.get("tools").and_then(Value::as_array) {
        if !tools.is_empty() {
            request["tools"] = Value::Array(tools_to_openai(tools));
        }
    }
    if let Some(choice) = body.get("tool_choice") {
        if let Some(mapped) = tool_choice_to_openai(choice) {
            request["tool_choice"] = mapped;
        }
    }
    match body.get("response_format") {
        Some(Value::Object(rf)) if rf.get("type").and_then(Value::as_str) == Some("json_object") => {
            request["response_format"] = json!({"type": "json_object"});
        }
        Some(Value::String(s)) if s == "json" => {
            request["response_format"] = json!({"type": "json_object"});
        }
        _ => {}
    }

    (request, tool_id_map)
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Response direction (non-streaming)
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A chat.completions JSON response → Anthropic message JSON.
pub fn response_to_anthropic(payload: &Value, ctx: &mut TranslationContext) -> Value {
    let choice = payload
        .get("choices")
        .and_then(Value::as_array)
        .and_then(|c| c.first());
    let message = choice.and_then(|c| c.get("message"));

    let mut content: Vec<Value> = Vec::new();
    let mut has_tool_call = false;

    if let Some(text) = message
        .and_then(|m| m.get("content"))
        .and_then(Value::as_str)
    {
        if !text.is_empty() {
            content.push(json!({"type": "text", "text": text}));
        }
    }

    if let Some(tool_calls) = message
        .and_then(|m| m.get("tool_calls"))
        .and_then(Value::as_array)
    {
        for tc in tool_calls {
            has_tool_call = true;
            let external_id = tc.get("id").and_then(Value::as_str).unwrap_or("");
            let function = tc.get("function").cloned().unwrap_or(json!({}));
            let name = function.get("name").and_then(Value::as_str).unwrap_or("function");
            let anthropic_id = ctx.tools.register_tool(external_id, name, None);
            let input: Value = function
                .get("arguments")
                .and_then(Value::as_str)
                .and_then(|raw| serde_json::from_str(raw).ok())
                .unwrap_or(json!({}));
            content.push(json!({
                "type": "tool_use",
                "id": anthropic_id,
                "name": name,
                "input": input,
            }));
        }
    }

    if content.is_empty() {
        content.push(json!({"type": "text", "text": ""}));
    }

    let finish = choice
        .and_then(|c| c.get("finish_reason"))
        .and_then(Value::as_str);
    let stop_reason = map_stop_reason(finish, has_tool_call);

    let usage = payload.get("usage");
    let input_tokens = usage
        .and_then(|u| u.get("prompt_tokens"))
        .and_then(Value::as_u64)
        .unwrap_or(0);
    let output_tokens = usage
        .and_then(|u| u.get("completion_tokens"))
        .and_then(Value::as_u64)
        .unwrap_or(0);

    json!({
        "id": payload.get("id").and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| format!("msg_{}", Uuid::new_v4().simple())),
        "type": "message",
        "role": "assistant",
        "model": payload.get("model").and_then(Value::as_str).unwrap_or(ctx.model()),
        "content": content,
        "stop_reason": stop_reason,
        "stop_sequence": null,
        "usage": {"input_tokens": input_tokens, "output_tokens": output_tokens},
    })
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Response direction (streaming)
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Translate one chat.completions streaming chunk into Anthropic SSE
/// events `(event_name, payload)`.
pub fn chunk_to_anthropic_events(chunk: &Value, ctx: &mut TranslationContext) -> Vec<(String, Value)> {
    let mut events = Vec::new();

    if !ctx.streaming.message_started {
        ctx.streaming.message_started = true;
        let mut stub = crate::sse::new_message_stub(
            chunk.get("model").and_then(Value::as_str).unwrap_or(ctx.model()),
        );
        if let Some(id) = chunk.get("id").and_then(Value::as_str) {
            stub["id"] = json!(id);
        }
        events.push((
            "message_start".into(),
            json!({"type": "message_start", "message": stub}),
        ));
    }

    let choice = match chunk.get("choices").and_then(Value::as_array).and_then(|c| c.first()) {
        Some(c) => c,
        None => {
            // usage-only chunk
            if let Some(usage) = chunk.get("usage") {
                ctx.streaming.input_tokens = usage.get("prompt_tokens").and_then(Value::as_u64);
                ctx.streaming.output_tokens = usage.get("completion_tokens").and_then(Value::as_u64);
            }
            return events;
        }
    };

    if let Some(delta) = choice.get("delta") {
        if let Some(text) = delta.get("content").and_then(Value::as_str) {
            if !text.is_empty() {
                let idx = ctx.streaming.text_index();
                if !ctx.streaming.text_started {
                    ctx.streaming.text_started = true;
                    events.push((
                        "content_block_start".into(),
                        json!({
                            "type": "content_block_start",
                            "index": idx,
                            "content_block": {"type": "text", "text": ""},
                        }),
                    ));
                }
                events.push((
                    "content_block_delta".into(),
                    json!({
                        "type": "content_block_delta",
                        "index": idx,
                        "delta": {"type": "text_delta", "text": text},
                    }),
                ));
            }
        }

        if let Some(tool_calls) = delta.get("tool_calls").and_then(Value::as_array) {
            for tc in tool_calls {
                let upstream_idx = tc.get("index").and_then(Value::as_u64).unwrap_or(0);
                let function = tc.get("function");
                let fragment = function
                    .and_then(|f| f.get("arguments"))
                    .and_then(Value::as_str)
                    .unwrap_or("");

                if !ctx.streaming.tool_states.contains_key(&upstream_idx) {
                    // First sight of this call: needs id + name to open a block.
                    let call_id = tc.get("id").and_then(Value::as_str).unwrap_or("");
                    let name = function
                        .and_then(|f| f.get("name"))
                        .and_then(Value::as_str)
                        .unwrap_or("function");
                    if call_id.is_empty() {
                        continue;
                    }
                    ctx.streaming.has_tool_call = true;
                    let anthropic_id = ctx.tools.register_tool(call_id, name, None);
                    let block_index = ctx.streaming.allocate_index();
                    ctx.streaming.tool_states.insert(
                        upstream_idx,
                        crate::context::ToolState {
                            call_id: anthropic_id.clone(),
                            name: name.to_string(),
                            arguments: String::new(),
                            started: true,
                            block_index,
                        },
                    );
                    events.push((
                        "content_block_start".into(),
                        json!({
                            "type": "content_block_start",
                            "index": block_index,
                            "content_block": {
                                "type": "tool_use",
                                "id": anthropic_id,
                                "name": name,
                                "input": {},
                            },
                        }),
                    ));
                    events.push((
                        "content_block_delta".into(),
                        json!({
                            "type": "content_block_delta",
                            "index": block_index,
                            "delta": {"type": "input_json_delta", "partial_json": ""},
                        }),
                    ));
                }

                if fragment.is_empty() {
                    continue;
                }
                if let Some(state) = ctx.streaming.tool_states.get_mut(&upstream_idx) {
                    // Some providers resend the whole argument string each
                    // chunk instead of a fragment; detect by prefix and emit
                    // only the new suffix.
                    let emit = if fragment.starts_with(&state.arguments)
                        && !state.arguments.is_empty()
                    {
                        fragment[state.arguments.len()..].to_string()
                    } else {
                        fragment.to_string()
                    };
                    if fragment.starts_with(&state.arguments) && !state.arguments.is_empty() {
                        state.arguments = fragment.to_string();
                    } else {
                        state.arguments.push_str(fragment);
                    }
                    if !emit.is_empty() {
                        events.push((
                            "content_block_delta".into(),
                            json!({
                                "type": "content_block_delta",
                                "index": state.block_index,
                                "delta": {"type": "input_json_delta", "partial_json": emit},
                            }),
                        ));
                    }
                }
            }
        }
    }

    if let Some(usage) = chunk.get("usage") {
        if !usage.is_null() {
            ctx.streaming.input_tokens = usage.get("prompt_tokens").and_then(Value::as_u64);
            ctx.streaming.output_tokens = usage.get("completion_tokens").and_then(Value::as_u64);
        }
    }

    if let Some(finish) = choice.get("finish_reason").and_then(Value::as_str) {
        // Close every open block, text first for stable ordering.
        if ctx.streaming.text_started {
            let idx = ctx.streaming.text_index();
            events.push((
                "content_block_stop".into(),
                json!({"type": "content_block_stop", "index": idx}),
            ));
            ctx.streaming.text_started = false;
        }
        let mut blocks: Vec<u64> = ctx
            .streaming
            .tool_states
            .values()
            .map(|s| s.block_index)
            .collect();
        blocks.sort_unstable();
        for index in blocks {
            events.push((
                "content_block_stop".into(),
                json!({"type": "content_block_stop", "index": index}),
            ));
        }

        let stop_reason = map_stop_reason(Some(finish), ctx.streaming.has_tool_call);
        let mut delta = json!({
            "type": "message_delta",
            "delta": {"stop_reason": stop_reason, "stop_sequence": null},
        });
        if ctx.streaming.input_tokens.is_some() || ctx.streaming.output_tokens.is_some() {
            delta["usage"] = json!({
                "input_tokens": ctx.streaming.input_tokens.unwrap_or(0),
                "output_tokens": ctx.streaming.output_tokens.unwrap_or(0),
            });
        }
        events.push(("message_delta".into(), delta));
        events.push(("message_stop".into(), json!({"type": "message_stop"})));
        ctx.streaming.stop_sent = true;
    }

    events
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_strips_format_recursively() {
        let schema = json!({
            "type": "object",
            "properties": {
                "when": {"type": "string", "format": "date-time"},
                "nested": {"type": "object", "properties": {"x": {"format": "uuid", "type": "string"}}},
            },
        });
        let clean = sanitize_json_schema(&schema);
        assert!(clean["properties"]["when"].get("format").is_none());
        assert!(clean["properties"]["nested"]["properties"]["x"].get("format").is_none());
        assert_eq!(clean["properties"]["when"]["type"], "string");
    }

    #[test]
    fn tool_choice_none_is_omitted() {
        assert!(tool_choice_to_openai(&json!("none")).is_none());
        assert_eq!(tool_choice_to_openai(&json!("auto")).unwrap(), json!("auto"));
        assert_eq!(tool_choice_to_openai(&json!("any")).unwrap(), json!("auto"));
        assert_eq!(
            tool_choice_to_openai(&json!({"type": "tool", "name": "search"})).unwrap(),
            json!({"type": "function", "function": {"name": "search"}})
        );
    }

    #[test]
    fn system_array_flattens_with_newlines() {
        let system = json!([
            {"type": "text", "text": "line one"},
            {"type": "text", "text": "line two"},
        ]);
        let msg = system_to_openai(&system).unwrap();
        assert_eq!(msg["content"], "line one\nline two");
        assert_eq!(msg["role"], "system");
    }

    #[test]
    fn image_becomes_data_url() {
        let messages = vec![json!({
            "role": "user",
            "content": [{
                "type": "image",
                "source": {"type": "base64", "media_type": "image/png", "data": "AAAA"},
            }],
        })];
        let (out, _) = messages_to_openai(&messages);
        assert_eq!(
            out[0]["content"][0]["image_url"]["url"],
            "data:image/png;base64,AAAA"
        );
    }

    #[test]
    fn tool_result_becomes_tool_role_message() {
        let messages = vec![json!({
            "role": "user",
            "content": [{
                "type": "tool_result",
                "tool_use_id": "toolu_abc",
                "content": [{"type": "text", "text": "42 files"}],
            }],
        })];
        let (out, _) = messages_to_openai(&messages);
        assert_eq!(out[0]["role"], "tool");
        assert_eq!(out[0]["tool_call_id"], "toolu_abc");
        assert_eq!(out[0]["content"], "42 files");
    }

    #[test]
    fn assistant_tool_use_becomes_tool_calls() {
        let messages = vec![json!({
            "role": "assistant",
            "content": [
                {"type": "text", "text": "let me look"},
                {"type": "tool_use", "id": "toolu_1", "name": "search", "input": {"q": "x"}},
            ],
        })];
        let (out, id_map) = messages_to_openai(&messages);
        assert_eq!(out[0]["tool_calls"][0]["function"]["name"], "search");
        assert_eq!(id_map.get("toolu_1").map(String::as_str), Some("search"));
        let args: Value =
            serde_json::from_str(out[0]["tool_calls"][0]["function"]["arguments"].as_str().unwrap())
                .unwrap();
        assert_eq!(args["q"], "x");
    }

    #[test]
    fn full_request_mapping() {
        let body = json!({
            "system": "be terse",
            "messages": [{"role": "user", "content": "hi"}],
            "max_tokens": 256,
            "temperature": 0.2,
            "stop_sequences": ["END"],
            "tool_choice": "none",
            "stream": true,
        });
        let (req, _) = request_to_openai(&body);
        assert_eq!(req["messages"][0]["role"], "system");
        assert_eq!(req["max_tokens"], 256);
        assert_eq!(req["stop"], json!(["END"]));
        assert_eq!(req["stream"], true);
        assert!(req.get("tool_choice").is_none());
    }

    #[test]
    fn non_stream_response_with_tool_calls() {
        let mut ctx = TranslationContext::new("gpt-4o");
        let payload = json!({
            "id": "chatcmpl-1",
            "model": "gpt-4o",
            "choices": [{
                "message": {
                    "content": "checking",
                    "tool_calls": [{
                        "id": "call_7",
                        "type": "function",
                        "function": {"name": "lookup", "arguments": "{\"k\":1}"},
                    }],
                },
                "finish_reason": "tool_calls",
            }],
            "usage": {"prompt_tokens": 10, "completion_tokens": 5},
        });
        let msg = response_to_anthropic(&payload, &mut ctx);
        assert_eq!(msg["stop_reason"], "tool_use");
        assert_eq!(msg["content"][0]["text"], "checking");
        let tool = &msg["content"][1];
        assert!(tool["id"].as_str().unwrap().starts_with("toolu_"));
        assert_eq!(tool["input"]["k"], 1);
        // Reverse map: the synthesized id resolves back to the upstream id.
        assert_eq!(ctx.tools.external_id(tool["id"].as_str().unwrap()), Some("call_7"));
        assert_eq!(msg["usage"]["input_tokens"], 10);
    }

    #[test]
    fn streaming_text_then_finish() {
        let mut ctx = TranslationContext::new("gpt-4o");
        let events =
            chunk_to_anthropic_events(&json!({"choices": [{"delta": {"content": "hel"}}]}), &mut ctx);
        let names: Vec<&str> = events.iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(names, vec!["message_start", "content_block_start", "content_block_delta"]);

        let events = chunk_to_anthropic_events(
            &json!({"choices": [{"delta": {}, "finish_reason": "stop"}]}),
            &mut ctx,
        );
        let names: Vec<&str> = events.iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(names, vec!["content_block_stop", "message_delta", "message_stop"]);
        assert_eq!(events[1].1["delta"]["stop_reason"], "end_turn");
    }

    #[test]
    fn streaming_tool_call_assembly() {
        let mut ctx = TranslationContext::new("gpt-4o");
        // First chunk carries id + name.
        let events = chunk_to_anthropic_events(
            &json!({"choices": [{"delta": {"tool_calls": [{
                "index": 0, "id": "call_1",
                "function": {"name": "grep", "arguments": ""},
            }]}}]}),
            &mut ctx,
        );
        assert!(events.iter().any(|(n, v)| n == "content_block_start"
            && v["content_block"]["type"] == "tool_use"
            && v["content_block"]["name"] == "grep"));

        // Argument fragments accumulate.
        let events = chunk_to_anthropic_events(
            &json!({"choices": [{"delta": {"tool_calls": [{
                "index": 0, "function": {"arguments": "{\"pat"},
            }]}}]}),
            &mut ctx,
        );
        assert_eq!(events[0].1["delta"]["partial_json"], "{\"pat");

        // Replacement-style chunk (full string resent) emits only the suffix.
        let events = chunk_to_anthropic_events(
            &json!({"choices": [{"delta": {"tool_calls": [{
                "index": 0, "function": {"arguments": "{\"pattern\":\"x\"}"},
            }]}}]}),
            &mut ctx,
        );
        assert_eq!(events[0].1["delta"]["partial_json"], "tern\":\"x\"}");

        // tool_calls finish maps to tool_use.
        let events = chunk_to_anthropic_events(
            &json!({"choices": [{"delta": {}, "finish_reason": "tool_calls"}]}),
            &mut ctx,
        );
        let delta = events.iter().find(|(n, _)| n == "message_delta").unwrap();
        assert_eq!(delta.1["delta"]["stop_reason"], "tool_use");
    }

    #[test]
    fn streaming_length_maps_to_max_tokens() {
        let mut ctx = TranslationContext::new("gpt-4o");
        let events = chunk_to_anthropic_events(
            &json!({"choices": [{"delta": {"content": "x"}, "finish_reason": "length"}],
                    "usage": {"prompt_tokens": 3, "completion_tokens": 9}}),
            &mut ctx,
        );
        let delta = events.iter().find(|(n, _)| n == "message_delta").unwrap();
        assert_eq!(delta.1["delta"]["stop_reason"], "max_tokens");
        assert_eq!(delta.1["usage"]["output_tokens"], 9);
    }
}
