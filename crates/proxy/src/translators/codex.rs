//! Anthropic ⇄ Codex (ChatGPT backend) translation.
//!
//! The Codex responses API has its own event vocabulary and a 64-char
//! tool-name limit. Tool names are shortened deterministically and the
//! short↔original map lives in the request context so both the streaming
//! and non-streaming response paths can restore original names.

use serde_json::{json, Map, Value};
use uuid::Uuid;

use crate::context::{ToolState, TranslationContext};
use crate::instructions::{resolve_system_instruction, IGNORE_SYSTEM_PREFIX};
use crate::translators::openai::sanitize_json_schema;

/// Codex rejects tool names longer than this.
pub const TOOL_NAME_LIMIT: usize = 64;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tool-name shortening
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Single-name shortening rule. `mcp__server__tool` names keep the
/// `mcp__` prefix and the segment after the last `__`; everything else
/// truncates.
fn base_candidate(name: &str) -> String {
    if name.len() <= TOOL_NAME_LIMIT {
        return name.to_string();
    }
    if name.starts_with("mcp__") {
        if let Some(idx) = name.rfind("__") {
            if idx > 0 {
                let cand = format!("mcp__{}", &name[idx + 2..]);
                return cand.chars().take(TOOL_NAME_LIMIT).collect();
            }
        }
    }
    name.chars().take(TOOL_NAME_LIMIT).collect()
}

/// Shorten one tool name without collision awareness.
pub fn shorten_tool_name(name: &str) -> String {
    if name.is_empty() {
        return "function".into();
    }
    base_candidate(name)
}

/// Build a unique short-name map for all declared names in a request.
/// Collisions within the request are disambiguated with `~1`, `~2`, ...
/// suffixes, trimming the base so the result stays within the limit.
pub fn build_short_name_map(names: &[String]) -> Vec<(String, String)> {
    let mut used = std::collections::HashSet::new();
    let mut mapping = Vec::new();

    for original in names {
        let base = base_candidate(original);
        let mut candidate = base.clone();
        let mut i = 1;
        while used.contains(&candidate) {
            let suffix = format!("~{i}");
            let allowed = TOOL_NAME_LIMIT.saturating_sub(suffix.len());
            let prefix: String = base.chars().take(allowed).collect();
            candidate = format!("{prefix}{suffix}");
            i += 1;
        }
        used.insert(candidate.clone());
        mapping.push((original.clone(), candidate));
    }

    mapping
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Request direction
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Normalize a model name to its Codex base form, deriving the reasoning
/// effort from the suffix. Returns `(model, effort)`.
pub fn normalise_model(model: &str) -> (String, String) {
    let lowered = model.to_lowercase();
    let effort_from_suffix = |s: &str| {
        if s.contains("minimal") {
            "minimal"
        } else if s.contains("medium") {
            "medium"
        } else if s.contains("high") {
            "high"
        } else {
            "low"
        }
    };
    if lowered.starts_with("gpt-5-codex") {
        return ("gpt-5-codex".into(), effort_from_suffix(&lowered).into());
    }
    if lowered.starts_with("gpt-5") {
        return ("gpt-5".into(), effort_from_suffix(&lowered).into());
    }
    (model.to_string(), "low".into())
}

fn stringify_tool_output(content: Option<&Value>) -> String {
    match content {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(|block| {
                if let Some(text) = block.get("text").and_then(Value::as_str) {
                    Some(text.to_string())
                } else {
                    block.get("content").map(|c| c.to_string())
                }
            })
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>()
            .join("\n"),
        Some(Value::Null) | None => String::new(),
        Some(other) => other.to_string(),
    }
}

/// Build a Codex responses-API payload from an Anthropic request body.
pub fn request_to_codex(
    body: &Value,
    ctx: &mut TranslationContext,
    provider: &str,
    auth_method: &str,
    explicit_instruction: Option<&str>,
    reasoning_level: Option<&str>,
) -> Value {
    let (model, mut effort) = normalise_model(ctx.model());
    if let Some(level) = reasoning_level {
        let level = level.to_lowercase();
        if matches!(level.as_str(), "minimal" | "low" | "medium" | "high") {
            effort = level;
        }
    }
    ctx.effective_model = Some(model.clone());

    let instructions =
        resolve_system_instruction(provider, auth_method, explicit_instruction, &model);

    let mut request = json!({
        "model": model,
        "instructions": instructions,
        "reasoning": {"effort": effort, "summary": "auto"},
        "parallel_tool_calls": true,
        "include": ["reasoning.encrypted_content"],
        "store": false,
        "stream": body.get("stream").and_then(Value::as_bool).unwrap_or(true),
    });

    let mut input: Vec<Value> = Vec::new();

    // Client system prompt re-enters as the first user message.
    let mut system_items: Vec<Value> = Vec::new();
    match body.get("system") {
        Some(Value::String(text)) if !text.trim().is_empty() => {
            system_items.push(json!({"type": "input_text", "text": text}));
        }
        Some(Value::Array(blocks)) => {
            for block in blocks {
                if block.get("type").and_then(Value::as_str) == Some("text") {
                    if let Some(text) = block.get("text").and_then(Value::as_str) {
                        if !text.is_empty() {
                            system_items.push(json!({"type": "input_text", "text": text}));
                        }
                    }
                }
            }
        }
        _ => {}
    }
    if !system_items.is_empty() {
        input.push(json!({"type": "message", "role": "user", "content": system_items}));
    }

    // Tools: short names recorded in the context regardless of stream mode
    // so the non-streaming assembly path can restore original names too.
    if let Some(tools) = body.get("tools").and_then(Value::as_array) {
        let declared: Vec<String> = tools
            .iter()
            .filter_map(|t| t.get("name").and_then(Value::as_str))
            .map(str::to_string)
            .collect();
        for (original, short) in build_short_name_map(&declared) {
            ctx.tools.record_short_name(&original, &short);
        }

        let codex_tools: Vec<Value> = tools
            .iter()
            .filter_map(|tool| {
                let name = tool.get("name").and_then(Value::as_str).unwrap_or("function");
                let short = ctx.tools.short_name(name).to_string();
                let mut params = tool
                    .get("input_schema")
                    .map(sanitize_json_schema)
                    .unwrap_or_else(|| json!({"type": "object", "properties": {}}));
                if let Some(obj) = params.as_object_mut() {
                    obj.remove("$schema");
                }
                Some(json!({
                    "type": "function",
                    "name": short,
                    "description": tool.get("description").and_then(Value::as_str).unwrap_or(""),
                    "parameters": params,
                    "strict": false,
                }))
            })
            .collect();
        if !codex_tools.is_empty() {
            request["tools"] = Value::Array(codex_tools);
            request["tool_choice"] = json!("auto");
        }
    }

    // Messages → input entries, interleaving preserved (no coalescing).
    if let Some(messages) = body.get("messages").and_then(Value::as_array) {
        for message in messages {
            let role = message.get("role").and_then(Value::as_str).unwrap_or("");
            if role != "user" && role != "assistant" {
                continue;
            }
            let blocks: Vec<Value> = match message.get("content") {
                Some(Value::String(text)) => vec![json!({"type": "text", "text": text})],
                Some(Value::Array(blocks)) => blocks.clone(),
                _ => Vec::new(),
            };

            for block in &blocks {
                match block.get("type").and_then(Value::as_str) {
                    Some("text") => {
                        let part_type = if role == "assistant" { "output_text" } else { "input_text" };
                        input.push(json!({
                            "type": "message",
                            "role": role,
                            "content": [{
                                "type": part_type,
                                "text": block.get("text").and_then(Value::as_str).unwrap_or(""),
                            }],
                        }));
                    }
                    Some("tool_use") if role == "assistant" => {
                        let original = block.get("name").and_then(Value::as_str).unwrap_or("function");
                        let short = ctx.tools.short_name(original).to_string();
                        if ctx.tools.short_to_orig.get(&short).is_none() {
                            ctx.tools.record_short_name(original, &short);
                        }
                        let arguments = block.get("input").cloned().unwrap_or(json!({}));
                        input.push(json!({
                            "type": "function_call",
                            "call_id": block.get("id").and_then(Value::as_str).unwrap_or(""),
                            "name": short,
                            "arguments": arguments.to_string(),
                        }));
                    }
                    Some("tool_result") if role == "user" => {
                        let mut entry = json!({
                            "type": "function_call_output",
                            "call_id": block.get("tool_use_id").and_then(Value::as_str).unwrap_or(""),
                            "output": stringify_tool_output(block.get("content")),
                        });
                        if block.get("is_error").and_then(Value::as_bool) == Some(true) {
                            entry["is_error"] = json!(true);
                        }
                        input.push(entry);
                    }
                    _ => {}
                }
            }
        }
    }

    // The override sentinel leads the input unless it is already first.
    let first_text = input.first().and_then(|entry| {
        entry
            .get("content")
            .and_then(Value::as_array)
            .and_then(|c| c.first())
            .and_then(|p| p.get("text"))
            .and_then(Value::as_str)
    });
    if first_text != Some(IGNORE_SYSTEM_PREFIX) {
        input.insert(
            0,
            json!({
                "type": "message",
                "role": "user",
                "content": [{"type": "input_text", "text": IGNORE_SYSTEM_PREFIX}],
            }),
        );
    }

    request["input"] = Value::Array(input);
    request
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Response direction (streaming)
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Translate one Codex streaming event into Anthropic SSE events
/// `(event_name, payload)`.
pub fn event_to_anthropic(
    event_name: &str,
    data: &Value,
    ctx: &mut TranslationContext,
) -> Vec<(String, Value)> {
    let mut events = Vec::new();
    let output_index = data.get("output_index").and_then(Value::as_u64);

    match event_name {
        "response.created" => {
            let resp = data.get("response").cloned().unwrap_or(json!({}));
            let msg_id = resp
                .get("id")
                .and_then(Value::as_str)
                .map(str::to_string)
                .unwrap_or_else(|| format!("msg_{}", Uuid::new_v4().simple()));
            let model = resp
                .get("model")
                .and_then(Value::as_str)
                .unwrap_or(&ctx.requested_model);
            events.push((
                "message_start".into(),
                json!({
                    "type": "message_start",
                    "message": {
                        "id": msg_id,
                        "type": "message",
                        "role": "assistant",
                        "model": model,
                        "content": [],
                        "stop_reason": null,
                        "stop_sequence": null,
                        "usage": {"input_tokens": 0, "output_tokens": 0},
                    },
                }),
            ));
            ctx.streaming.message_started = true;
        }

        "response.in_progress" | "response.reasoning_summary_text.done" => {}

        "response.content_part.added" => {
            if let Some(idx) = output_index {
                events.push((
                    "content_block_start".into(),
                    json!({
                        "type": "content_block_start",
                        "index": idx,
                        "content_block": {"type": "text", "text": ""},
                    }),
                ));
                ctx.streaming.text_started = true;
                ctx.streaming.text_index = Some(idx);
            }
        }

        "response.output_text.delta" => {
            let text = data.get("delta").and_then(Value::as_str).unwrap_or("");
            if !text.is_empty() {
                let idx = match output_index {
                    Some(idx) => idx,
                    None => ctx.streaming.text_index.unwrap_or(0),
                };
                if !ctx.streaming.text_started {
                    events.push((
                        "content_block_start".into(),
                        json!({
                            "type": "content_block_start",
                            "index": idx,
                            "content_block": {"type": "text", "text": ""},
                        }),
                    ));
                    ctx.streaming.text_started = true;
                    ctx.streaming.text_index = Some(idx);
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

        "response.content_part.done" => {
            if let Some(idx) = output_index {
                events.push((
                    "content_block_stop".into(),
                    json!({"type": "content_block_stop", "index": idx}),
                ));
            }
        }

        "response.reasoning_summary_part.added" => {
            if let Some(idx) = output_index {
                events.push((
                    "content_block_start".into(),
                    json!({
                        "type": "content_block_start",
                        "index": idx,
                        "content_block": {"type": "thinking", "thinking": "", "signature": ""},
                    }),
                ));
            }
        }

        "response.reasoning_summary_text.delta" => {
            if let Some(idx) = output_index {
                let delta = data.get("delta").and_then(Value::as_str).unwrap_or("");
                if !delta.is_empty() {
                    events.push((
                        "content_block_delta".into(),
                        json!({
                            "type": "content_block_delta",
                            "index": idx,
                            "delta": {"type": "thinking_delta", "thinking": delta},
                        }),
                    ));
                }
            }
        }

        "response.reasoning_summary_part.done" => {
            if let Some(idx) = output_index {
                events.push((
                    "content_block_stop".into(),
                    json!({"type": "content_block_stop", "index": idx}),
                ));
            }
        }

        "response.output_item.added" => {
            let item = data.get("item").cloned().unwrap_or(json!({}));
            if item.get("type").and_then(Value::as_str) == Some("function_call") {
                if let Some(idx) = output_index {
                    let call_id = item
                        .get("call_id")
                        .or_else(|| item.get("id"))
                        .and_then(Value::as_str)
                        .map(str::to_string)
                        .unwrap_or_else(|| {
                            format!("call_{}", &Uuid::new_v4().simple().to_string()[..8])
                        });
                    let short_name = item.get("name").and_then(Value::as_str).unwrap_or("function");
                    let original = ctx.tools.original_name(short_name).to_string();
                    ctx.tools.register_tool(&call_id, &original, Some(short_name));

                    events.push((
                        "content_block_start".into(),
                        json!({
                            "type": "content_block_start",
                            "index": idx,
                            "content_block": {
                                "type": "tool_use",
                                "id": call_id,
                                "name": original,
                                "input": {},
                            },
                        }),
                    ));
                    events.push((
                        "content_block_delta".into(),
                        json!({
                            "type": "content_block_delta",
                            "index": idx,
                            "delta": {"type": "input_json_delta", "partial_json": ""},
                        }),
                    ));

                    ctx.streaming.has_tool_call = true;
                    ctx.streaming.tool_states.insert(
                        idx,
                        ToolState {
                            call_id,
                            name: original,
                            arguments: String::new(),
                            started: true,
                            block_index: idx,
                        },
                    );
                }
            }
        }

        // Both spellings occur in the wild.
        "response.function_call.arguments.delta" | "response.function_call_arguments.delta" => {
            if let Some(idx) = output_index {
                let delta = data.get("delta").and_then(Value::as_str).unwrap_or("");
                if let Some(state) = ctx.streaming.tool_states.get_mut(&idx) {
                    if !delta.is_empty() {
                        state.arguments.push_str(delta);
                        events.push((
                            "content_block_delta".into(),
                            json!({
                                "type": "content_block_delta",
                                "index": idx,
                                "delta": {"type": "input_json_delta", "partial_json": delta},
                            }),
                        ));
                    }
                } else {
                    tracing::debug!(index = idx, "arguments delta without output_item.added");
                }
            }
        }

        "response.function_call.completed" => {
            if let Some(call_id) = data.get("call_id").and_then(Value::as_str) {
                let found = ctx
                    .streaming
                    .tool_states
                    .iter()
                    .find(|(_, s)| s.call_id == call_id && s.started)
                    .map(|(idx, _)| *idx);
                if let Some(idx) = found {
                    events.push((
                        "content_block_stop".into(),
                        json!({"type": "content_block_stop", "index": idx}),
                    ));
                }
            }
        }

        "response.output_item.done" => {
            let item = data.get("item").cloned().unwrap_or(json!({}));
            if item.get("type").and_then(Value::as_str) == Some("function_call") {
                if let Some(idx) = output_index {
                    events.push((
                        "content_block_stop".into(),
                        json!({"type": "content_block_stop", "index": idx}),
                    ));
                }
            }
        }

        "response.completed" => {
            let resp = data.get("response").cloned().unwrap_or(json!({}));
            let finish = data
                .get("finish_reason")
                .or_else(|| resp.get("finish_reason"))
                .and_then(Value::as_str);
            let stop_reason = match finish {
                None | Some("") => {
                    if ctx.streaming.has_tool_call {
                        "tool_use".to_string()
                    } else {
                        "end_turn".to_string()
                    }
                }
                Some("tool_calls") => "tool_use".to_string(),
                Some("stop") | Some("completed") => "end_turn".to_string(),
                Some(other) => other.to_string(),
            };

            let usage = resp.get("usage").cloned().unwrap_or(json!({}));
            let input_tokens = usage.get("input_tokens").and_then(Value::as_u64).unwrap_or(0);
            let output_tokens = usage.get("output_tokens").and_then(Value::as_u64).unwrap_or(0);

            let mut delta = json!({"type": "message_delta", "delta": {"stop_reason": stop_reason}});
            if input_tokens > 0 || output_tokens > 0 {
                let mut usage_out = Map::new();
                usage_out.insert("input_tokens".into(), json!(input_tokens));
                usage_out.insert("output_tokens".into(), json!(output_tokens));
                if let Some(cached) = usage
                    .get("input_tokens_details")
                    .and_then(|d| d.get("cached_tokens"))
                    .and_then(Value::as_u64)
                    .filter(|c| *c > 0)
                {
                    usage_out.insert(
                        "input_tokens_details".into(),
                        json!({"cached_tokens": cached}),
                    );
                }
                if let Some(reasoning) = usage
                    .get("output_tokens_details")
                    .and_then(|d| d.get("reasoning_tokens"))
                    .and_then(Value::as_u64)
                    .filter(|r| *r > 0)
                {
                    usage_out.insert(
                        "output_tokens_details".into(),
                        json!({"reasoning_tokens": reasoning}),
                    );
                }
                let total = usage
                    .get("total_tokens")
                    .and_then(Value::as_u64)
                    .unwrap_or(input_tokens + output_tokens);
                if total > 0 {
                    usage_out.insert("total_tokens".into(), json!(total));
                }
                delta["usage"] = Value::Object(usage_out);
            }
            events.push(("message_delta".into(), delta));
            events.push(("message_stop".into(), json!({"type": "message_stop"})));
            ctx.streaming.stop_sent = true;
        }

        _ => {}
    }

    events
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Response direction (non-streaming assembly)
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn join_text_parts(value: Option<&Value>) -> String {
    match value {
        Some(Value::Array(parts)) => parts
            .iter()
            .map(|p| match p.get("text").and_then(Value::as_str) {
                Some(text) => text.to_string(),
                None => match p {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                },
            })
            .collect(),
        Some(Value::String(s)) => s.clone(),
        Some(other) if !other.is_null() => other.to_string(),
        _ => String::new(),
    }
}

/// Reconstruct a full Anthropic message from the terminal
/// `response.completed` event (non-streaming mode).
pub fn message_from_completed(completed: &Value, ctx: &TranslationContext) -> Value {
    let response = completed.get("response").cloned().unwrap_or(json!({}));
    let usage = response.get("usage").cloned().unwrap_or(json!({}));

    let mut content: Vec<Value> = Vec::new();
    let mut has_tool_call = false;

    if let Some(output) = response.get("output").and_then(Value::as_array) {
        for item in output {
            match item.get("type").and_then(Value::as_str) {
                Some("reasoning") => {
                    let mut thinking = join_text_parts(item.get("summary"));
                    if thinking.is_empty() {
                        thinking = join_text_parts(item.get("content"));
                    }
                    if !thinking.is_empty() {
                        content.push(json!({
                            "type": "thinking",
                            "thinking": thinking,
                            "signature": "",
                        }));
                    }
                }
                Some("message") => match item.get("content") {
                    Some(Value::Array(parts)) => {
                        for p in parts {
                            if p.get("type").and_then(Value::as_str) == Some("output_text") {
                                if let Some(text) = p.get("text").and_then(Value::as_str) {
                                    if !text.is_empty() {
                                        content.push(json!({"type": "text", "text": text}));
                                    }
                                }
                            }
                        }
                    }
                    Some(Value::String(text)) if !text.is_empty() => {
                        content.push(json!({"type": "text", "text": text}));
                    }
                    _ => {}
                },
                Some("function_call") => {
                    has_tool_call = true;
                    let short = item.get("name").and_then(Value::as_str).unwrap_or("function");
                    let original = ctx.tools.original_name(short);
                    let call_id = item
                        .get("call_id")
                        .or_else(|| item.get("id"))
                        .and_then(Value::as_str)
                        .map(str::to_string)
                        .unwrap_or_else(|| {
                            format!("call_{}", &Uuid::new_v4().simple().to_string()[..8])
                        });
                    let args = match item.get("arguments") {
                        Some(Value::String(raw)) => serde_json::from_str(raw)
                            .unwrap_or_else(|_| json!({"_raw": raw})),
                        Some(Value::Object(o)) => Value::Object(o.clone()),
                        _ => json!({}),
                    };
                    content.push(json!({
                        "type": "tool_use",
                        "id": call_id,
                        "name": original,
                        "input": args,
                    }));
                }
                _ => {}
            }
        }
    }

    if content.is_empty() {
        content.push(json!({"type": "text", "text": ""}));
    }

    let stop_reason = match response.get("stop_reason").and_then(Value::as_str) {
        Some(reason) if !reason.is_empty() => reason.to_string(),
        _ => {
            if has_tool_call {
                "tool_use".into()
            } else {
                "end_turn".into()
            }
        }
    };

    json!({
        "id": response.get("id").and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| format!("msg_{}", Uuid::new_v4().simple())),
        "type": "message",
        "role": "assistant",
        "model": response.get("model").and_then(Value::as_str).unwrap_or(ctx.model()),
        "content": content,
        "stop_reason": stop_reason,
        "stop_sequence": response.get("stop_sequence").cloned().unwrap_or(Value::Null),
        "usage": {
            "input_tokens": usage.get("input_tokens").and_then(Value::as_u64).unwrap_or(0),
            "output_tokens": usage.get("output_tokens").and_then(Value::as_u64).unwrap_or(0),
        },
    })
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_names_under_limit_unchanged() {
        assert_eq!(shorten_tool_name("search"), "search");
    }

    #[test]
    fn long_names_truncate() {
        let name = "x".repeat(100);
        assert_eq!(shorten_tool_name(&name).len(), TOOL_NAME_LIMIT);
    }

    #[test]
    fn mcp_names_keep_prefix_and_tail() {
        let name = format!("mcp__{}__list_tables", "y".repeat(80));
        let short = shorten_tool_name(&name);
        assert!(short.starts_with("mcp__"));
        assert!(short.ends_with("list_tables"));
        assert!(short.len() <= TOOL_NAME_LIMIT);
    }

    #[test]
    fn collisions_get_tilde_suffixes() {
        let a = format!("mcp__{}__query", "a".repeat(80));
        let b = format!("mcp__{}__query", "b".repeat(80));
        let map = build_short_name_map(&[a.clone(), b.clone()]);
        assert_eq!(map[0].1, "mcp__query");
        assert_eq!(map[1].1, "mcp__query~1");
        assert!(map.iter().all(|(_, s)| s.len() <= TOOL_NAME_LIMIT));
    }

    #[test]
    fn model_normalisation() {
        assert_eq!(normalise_model("gpt-5"), ("gpt-5".into(), "low".into()));
        assert_eq!(normalise_model("gpt-5-high"), ("gpt-5".into(), "high".into()));
        assert_eq!(
            normalise_model("gpt-5-codex-medium"),
            ("gpt-5-codex".into(), "medium".into())
        );
        assert_eq!(
            normalise_model("gpt-5-minimal"),
            ("gpt-5".into(), "minimal".into())
        );
        assert_eq!(normalise_model("o3"), ("o3".into(), "low".into()));
    }

    #[test]
    fn request_leads_with_sentinel_and_system() {
        let mut ctx = TranslationContext::new("gpt-5");
        let body = json!({
            "system": "client system text",
            "messages": [{"role": "user", "content": "hi"}],
            "stream": true,
        });
        let req = request_to_codex(&body, &mut ctx, "openai", "oauth", None, None);
        assert_eq!(req["model"], "gpt-5");
        assert_eq!(req["reasoning"]["effort"], "low");
        assert_eq!(req["store"], false);
        let input = req["input"].as_array().unwrap();
        assert_eq!(input[0]["content"][0]["text"], IGNORE_SYSTEM_PREFIX);
        assert_eq!(input[1]["content"][0]["text"], "client system text");
        assert_eq!(input[2]["content"][0]["type"], "input_text");
    }

    #[test]
    fn request_records_short_names_for_both_paths() {
        let mut ctx = TranslationContext::new("gpt-5");
        let long_name = "search_files_in_the_repository_with_a_very_long_descriptive_suffix_attached";
        let body = json!({
            "messages": [{"role": "user", "content": "go"}],
            "tools": [{"name": long_name, "description": "d", "input_schema": {"type": "object", "$schema": "x"}}],
            "stream": false,
        });
        let req = request_to_codex(&body, &mut ctx, "openai", "oauth", None, Some("low"));
        let tool = &req["tools"][0];
        let short = tool["name"].as_str().unwrap();
        assert!(short.len() <= TOOL_NAME_LIMIT);
        assert!(tool["parameters"].get("$schema").is_none());
        assert_eq!(tool["strict"], false);
        // Map populated even though stream == false.
        assert_eq!(ctx.tools.original_name(short), long_name);
        assert_eq!(req["tool_choice"], "auto");
    }

    #[test]
    fn tool_round_trip_in_history() {
        let mut ctx = TranslationContext::new("gpt-5");
        let body = json!({
            "messages": [
                {"role": "assistant", "content": [
                    {"type": "tool_use", "id": "call_abc", "name": "grep", "input": {"q": "x"}},
                ]},
                {"role": "user", "content": [
                    {"type": "tool_result", "tool_use_id": "call_abc",
                     "content": [{"type": "text", "text": "found"}]},
                ]},
            ],
        });
        let req = request_to_codex(&body, &mut ctx, "openai", "oauth", None, None);
        let input = req["input"].as_array().unwrap();
        let call = input.iter().find(|e| e["type"] == "function_call").unwrap();
        assert_eq!(call["call_id"], "call_abc");
        assert_eq!(call["arguments"], "{\"q\":\"x\"}");
        let output = input
            .iter()
            .find(|e| e["type"] == "function_call_output")
            .unwrap();
        assert_eq!(output["call_id"], "call_abc");
        assert_eq!(output["output"], "found");
    }

    #[test]
    fn streaming_text_lifecycle() {
        let mut ctx = TranslationContext::new("gpt-5");
        let events = event_to_anthropic(
            "response.created",
            &json!({"response": {"id": "resp_1", "model": "gpt-5"}}),
            &mut ctx,
        );
        assert_eq!(events[0].0, "message_start");
        assert_eq!(events[0].1["message"]["id"], "resp_1");

        let events = event_to_anthropic(
            "response.content_part.added",
            &json!({"output_index": 0}),
            &mut ctx,
        );
        assert_eq!(events[0].0, "content_block_start");

        let events = event_to_anthropic(
            "response.output_text.delta",
            &json!({"output_index": 0, "delta": "hello"}),
            &mut ctx,
        );
        assert_eq!(events[0].1["delta"]["text"], "hello");

        let events = event_to_anthropic(
            "response.content_part.done",
            &json!({"output_index": 0}),
            &mut ctx,
        );
        assert_eq!(events[0].0, "content_block_stop");

        let events = event_to_anthropic(
            "response.completed",
            &json!({"response": {"usage": {"input_tokens": 7, "output_tokens": 3}}}),
            &mut ctx,
        );
        assert_eq!(events[0].0, "message_delta");
        assert_eq!(events[0].1["delta"]["stop_reason"], "end_turn");
        assert_eq!(events[0].1["usage"]["total_tokens"], 10);
        assert_eq!(events[1].0, "message_stop");
    }

    #[test]
    fn streaming_tool_call_restores_original_name() {
        let mut ctx = TranslationContext::new("gpt-5");
        ctx.tools.record_short_name("mcp__server__very_long_tool", "mcp__very_long_tool");

        let events = event_to_anthropic(
            "response.output_item.added",
            &json!({
                "output_index": 1,
                "item": {"type": "function_call", "call_id": "call_9", "name": "mcp__very_long_tool"},
            }),
            &mut ctx,
        );
        assert_eq!(events[0].1["content_block"]["name"], "mcp__server__very_long_tool");
        assert_eq!(events[1].1["delta"]["partial_json"], "");

        let events = event_to_anthropic(
            "response.function_call_arguments.delta",
            &json!({"output_index": 1, "delta": "{\"a\":1}"}),
            &mut ctx,
        );
        assert_eq!(events[0].1["delta"]["partial_json"], "{\"a\":1}");

        // Completed with no finish_reason infers tool_use.
        let events = event_to_anthropic("response.completed", &json!({"response": {}}), &mut ctx);
        assert_eq!(events[0].1["delta"]["stop_reason"], "tool_use");
    }

    #[test]
    fn completed_assembly_builds_full_message() {
        let mut ctx = TranslationContext::new("gpt-5");
        ctx.tools.record_short_name("original_tool_name", "short");
        let completed = json!({
            "response": {
                "id": "resp_2",
                "model": "gpt-5",
                "usage": {"input_tokens": 4, "output_tokens": 8},
                "output": [
                    {"type": "reasoning", "summary": [{"type": "summary_text", "text": "thinking..."}]},
                    {"type": "message", "content": [{"type": "output_text", "text": "done"}]},
                    {"type": "function_call", "call_id": "call_1", "name": "short",
                     "arguments": "{\"x\":2}"},
                ],
            },
        });
        let msg = message_from_completed(&completed, &ctx);
        assert_eq!(msg["content"][0]["type"], "thinking");
        assert_eq!(msg["content"][0]["thinking"], "thinking...");
        assert_eq!(msg["content"][1]["text"], "done");
        assert_eq!(msg["content"][2]["name"], "original_tool_name");
        assert_eq!(msg["content"][2]["input"]["x"], 2);
        assert_eq!(msg["stop_reason"], "tool_use");
        assert_eq!(msg["usage"]["output_tokens"], 8);
    }

    #[test]
    fn completed_assembly_empty_output() {
        let ctx = TranslationContext::new("gpt-5");
        let msg = message_from_completed(&json!({"response": {}}), &ctx);
        assert_eq!(msg["content"][0]["text"], "");
        assert_eq!(msg["stop_reason"], "end_turn");
    }
}
