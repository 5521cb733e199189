//! Anthropic ⇄ Gemini translation, shared by the native API and the
//! Cloud Code Assist (`v1internal`) surface.
//!
//! The Cloud Code Assist variant wraps the same body in
//! `{request, model, project}` and unwraps `{response: ...}` on the way
//! back; everything else is identical.

use serde_json::{json, Map, Value};

use crate::context::{generate_tool_id, StreamingState};

/// Reasoning-level → thinking budget (tokens) for Gemini.
pub fn thinking_budget(level: &str) -> Option<i64> {
    match level.to_lowercase().as_str() {
        "low" => Some(1024),
        "medium" => Some(4096),
        "high" => Some(16384),
        _ => None,
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Schema sanitization
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

const REMOVED_FIELDS: &[&str] = &[
    "additionalProperties",
    "$schema",
    "allOf",
    "anyOf",
    "oneOf",
    "exclusiveMinimum",
    "exclusiveMaximum",
    "patternProperties",
    "dependencies",
];

/// Strip JSON-Schema constructs the Gemini function-declaration parser
/// rejects, and collapse type arrays to a single type (string preferred,
/// then number/integer, then whatever comes first).
pub fn sanitize_schema(schema: &Value) -> Value {
    match schema {
        Value::Object(map) => {
            let mut cleaned = Map::new();
            for (key, value) in map {
                if REMOVED_FIELDS.contains(&key.as_str()) {
                    continue;
                }
                if key == "type" {
                    if let Value::Array(types) = value {
                        let names: Vec<&str> = types.iter().filter_map(Value::as_str).collect();
                        let preferred = names
                            .iter()
                            .find(|t| **t == "string")
                            .or_else(|| names.iter().find(|t| **t == "number" || **t == "integer"))
                            .or_else(|| names.first());
                        if let Some(t) = preferred {
                            cleaned.insert("type".into(), json!(t));
                            continue;
                        }
                    }
                }
                cleaned.insert(key.clone(), sanitize_schema(value));
            }
            Value::Object(cleaned)
        }
        Value::Array(items) => Value::Array(items.iter().map(sanitize_schema).collect()),
        other => other.clone(),
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Request direction
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn tool_result_value(content: Option<&Value>) -> Value {
    match content {
        Some(Value::String(s)) => json!({"result": s}),
        Some(Value::Array(items)) => {
            let texts: Vec<&str> = items
                .iter()
                .filter(|i| i.get("type").and_then(Value::as_str) == Some("text"))
                .filter_map(|i| i.get("text").and_then(Value::as_str))
                .collect();
            if texts.is_empty() {
                json!({})
            } else {
                json!({"result": texts.join("\n")})
            }
        }
        _ => json!({}),
    }
}

/// Build a Gemini `generateContent` body from an Anthropic request.
pub fn request_to_gemini(
    body: &Value,
    system_instruction: Option<&str>,
    reasoning_level: Option<&str>,
) -> Value {
    let mut generation_config = json!({
        "thinkingConfig": {"include_thoughts": true, "thinkingBudget": -1},
    });

    if let Some(budget) = reasoning_level.and_then(thinking_budget) {
        generation_config["thinkingConfig"]["thinkingBudget"] = json!(budget);
    }

    if let Some(max) = body.get("max_tokens").and_then(Value::as_u64) {
        generation_config["maxOutputTokens"] = json!(max);
    }
    if let Some(t) = body.get("temperature") {
        if !t.is_null() {
            generation_config["temperature"] = t.clone();
        }
    }
    if let Some(p) = body.get("top_p") {
        if !p.is_null() {
            generation_config["topP"] = p.clone();
        }
    }
    if let Some(stops) = body.get("stop_sequences").and_then(Value::as_array) {
        if !stops.is_empty() {
            generation_config["stopSequences"] = json!(stops);
        }
    }

    // Explicit thinking config overrides the reasoning-level default.
    if let Some(thinking) = body.get("thinking").and_then(Value::as_object) {
        match thinking.get("type").and_then(Value::as_str) {
            Some("enabled") => {
                generation_config["thinkingConfig"]["include_thoughts"] = json!(true);
                if let Some(budget) = thinking.get("budget_tokens").and_then(Value::as_i64) {
                    generation_config["thinkingConfig"]["thinkingBudget"] = json!(budget);
                }
            }
            Some("disabled") => {
                generation_config["thinkingConfig"]["include_thoughts"] = json!(false);
                generation_config["thinkingConfig"]["thinkingBudget"] = json!(0);
            }
            _ => {}
        }
    }

    let mut gemini = json!({
        "contents": [],
        "generationConfig": generation_config,
    });

    // System: explicit instruction first, then top-level `system`.
    let mut system_parts: Vec<Value> = Vec::new();
    if let Some(text) = system_instruction {
        if !text.is_empty() {
            system_parts.push(json!({"text": text}));
        }
    }
    match body.get("system") {
        Some(Value::String(text)) => system_parts.push(json!({"text": text})),
        Some(Value::Array(blocks)) => {
            for block in blocks {
                match block {
                    Value::String(s) => system_parts.push(json!({"text": s})),
                    b if b.get("type").and_then(Value::as_str) == Some("text") => {
                        system_parts.push(json!({
                            "text": b.get("text").and_then(Value::as_str).unwrap_or(""),
                        }));
                    }
                    _ => {}
                }
            }
        }
        _ => {}
    }
    if !system_parts.is_empty() {
        gemini["systemInstruction"] = json!({"role": "user", "parts": system_parts});
    }

    // Messages → contents. functionResponse needs the function *name*,
    // so tool_use ids are remembered across the pass.
    let mut tool_id_to_name: std::collections::HashMap<String, String> = Default::default();
    let mut contents: Vec<Value> = Vec::new();

    if let Some(messages) = body.get("messages").and_then(Value::as_array) {
        for msg in messages {
            let role = match msg.get("role").and_then(Value::as_str) {
                Some("assistant") => "model",
                Some("system") => continue,
                Some(r) => r,
                None => "user",
            };
            let mut parts: Vec<Value> = Vec::new();

            match msg.get("content") {
                Some(Value::String(text)) => parts.push(json!({"text": text})),
                Some(Value::Array(blocks)) => {
                    for block in blocks {
                        match block.get("type").and_then(Value::as_str) {
                            Some("text") => parts.push(json!({
                                "text": block.get("text").and_then(Value::as_str).unwrap_or(""),
                            })),
                            Some("tool_use") => {
                                let name =
                                    block.get("name").and_then(Value::as_str).unwrap_or("");
                                if let Some(id) = block.get("id").and_then(Value::as_str) {
                                    if !name.is_empty() {
                                        tool_id_to_name.insert(id.to_string(), name.to_string());
                                    }
                                }
                                parts.push(json!({
                                    "functionCall": {
                                        "name": name,
                                        "args": block.get("input").cloned().unwrap_or(json!({})),
                                    },
                                }));
                            }
                            Some("tool_result") => {
                                let tool_use_id = block
                                    .get("tool_use_id")
                                    .and_then(Value::as_str)
                                    .unwrap_or("");
                                let name = tool_id_to_name
                                    .get(tool_use_id)
                                    .map(String::as_str)
                                    .unwrap_or(tool_use_id);
                                parts.push(json!({
                                    "functionResponse": {
                                        "name": name,
                                        "response": tool_result_value(block.get("content")),
                                    },
                                }));
                            }
                            Some("image") => {
                                let source = block.get("source");
                                let media_type = block
                                    .get("media_type")
                                    .or_else(|| source.and_then(|s| s.get("media_type")))
                                    .and_then(Value::as_str);
                                let data = block
                                    .get("data")
                                    .or_else(|| source.and_then(|s| s.get("data")))
                                    .and_then(Value::as_str);
                                if let (Some(mt), Some(d)) = (media_type, data) {
                                    parts.push(json!({
                                        "inlineData": {"mimeType": mt, "data": d},
                                    }));
                                }
                            }
                            _ => {}
                        }
                    }
                }
                _ => {}
            }

            if !parts.is_empty() {
                contents.push(json!({"role": role, "parts": parts}));
            }
        }
    }
    gemini["contents"] = Value::Array(contents);

    // Tools: one envelope holding every declaration.
    if let Some(tools) = body.get("tools").and_then(Value::as_array) {
        let declarations: Vec<Value> = tools
            .iter()
            .map(|tool| {
                // Some callers nest an OpenAI-style `function` object.
                let (name, desc, schema) = match tool.get("function") {
                    Some(f) => (
                        f.get("name").and_then(Value::as_str).unwrap_or(""),
                        f.get("description").and_then(Value::as_str).unwrap_or(""),
                        f.get("parameters").cloned().unwrap_or(json!({})),
                    ),
                    None => (
                        tool.get("name").and_then(Value::as_str).unwrap_or(""),
                        tool.get("description").and_then(Value::as_str).unwrap_or(""),
                        tool.get("input_schema").cloned().unwrap_or(json!({})),
                    ),
                };
                json!({
                    "name": name,
                    "description": desc,
                    "parameters": sanitize_schema(&schema),
                })
            })
            .collect();
        if !declarations.is_empty() {
            gemini["tools"] = json!([{"functionDeclarations": declarations}]);
        }
    }

    // Tool choice → functionCallingConfig.
    if let Some(choice) = body.get("tool_choice").and_then(Value::as_object) {
        match choice.get("type").and_then(Value::as_str) {
            Some("any") => {
                gemini["toolConfig"] = json!({"functionCallingConfig": {"mode": "ANY"}});
            }
            Some("tool") => {
                if let Some(name) = choice.get("name").and_then(Value::as_str) {
                    gemini["toolConfig"] = json!({
                        "functionCallingConfig": {
                            "mode": "ANY",
                            "allowedFunctionNames": [name],
                        },
                    });
                }
            }
            Some("none") => {
                gemini["toolConfig"] = json!({"functionCallingConfig": {"mode": "NONE"}});
            }
            _ => {}
        }
    }

    gemini
}

/// Wrap a Gemini body in the Cloud Code Assist envelope.
pub fn wrap_for_cloud_code(gemini_body: Value, model: &str, project_id: Option<&str>) -> Value {
    let mut wrapped = json!({"request": gemini_body, "model": model});
    if let Some(project) = project_id {
        wrapped["project"] = json!(project);
    }
    wrapped
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Response direction
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn map_finish_reason(reason: &str) -> &'static str {
    match reason {
        "STOP" => "end_turn",
        "MAX_TOKENS" => "max_tokens",
        "SAFETY" | "RECITATION" | "LANGUAGE" | "OTHER" => "stop_sequence",
        _ => "end_turn",
    }
}

fn usage_from_metadata(metadata: &Value) -> Value {
    let mut usage = json!({
        "input_tokens": metadata.get("promptTokenCount").and_then(Value::as_u64).unwrap_or(0),
        "output_tokens": metadata.get("candidatesTokenCount").and_then(Value::as_u64).unwrap_or(0),
    });
    if let Some(thinking) = metadata.get("thoughtsTokenCount").and_then(Value::as_u64) {
        usage["thinking_tokens"] = json!(thinking);
    }
    if let Some(cached) = metadata.get("cachedContentTokenCount").and_then(Value::as_u64) {
        usage["cache_read_input_tokens"] = json!(cached);
    }
    usage
}

/// Unwrap a Cloud Code Assist response envelope, when present.
pub fn unwrap_cloud_code(value: &Value) -> &Value {
    value.get("response").unwrap_or(value)
}

/// Convert a non-streaming Gemini response to an Anthropic message.
pub fn response_to_anthropic(gemini: &Value) -> Value {
    let mut message = json!({
        "id": format!("msg_{}", &uuid::Uuid::new_v4().simple().to_string()[..24]),
        "type": "message",
        "role": "assistant",
        "model": gemini.get("modelVersion").and_then(Value::as_str).unwrap_or(""),
        "content": [],
        "stop_reason": null,
        "stop_sequence": null,
        "usage": {"input_tokens": 0, "output_tokens": 0},
    });

    let mut content: Vec<Value> = Vec::new();
    if let Some(candidate) = gemini
        .get("candidates")
        .and_then(Value::as_array)
        .and_then(|c| c.first())
    {
        if let Some(reason) = candidate.get("finishReason").and_then(Value::as_str) {
            message["stop_reason"] = json!(map_finish_reason(reason));
        }
        if let Some(parts) = candidate
            .get("content")
            .and_then(|c| c.get("parts"))
            .and_then(Value::as_array)
        {
            for part in parts {
                let is_thought = part.get("thought").and_then(Value::as_bool).unwrap_or(false);
                if let Some(text) = part.get("text").and_then(Value::as_str) {
                    if is_thought {
                        content.push(json!({
                            "type": "thinking",
                            "thinking": text,
                            "signature": "",
                        }));
                    } else {
                        content.push(json!({"type": "text", "text": text}));
                    }
                } else if let Some(call) = part.get("functionCall") {
                    content.push(json!({
                        "type": "tool_use",
                        "id": generate_tool_id(),
                        "name": call.get("name").and_then(Value::as_str).unwrap_or(""),
                        "input": call.get("args").cloned().unwrap_or(json!({})),
                    }));
                }
            }
        }
    }
    message["content"] = Value::Array(content);

    if let Some(metadata) = gemini.get("usageMetadata") {
        message["usage"] = usage_from_metadata(metadata);
    }

    message
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Streaming translation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Tracks the currently open block type across Gemini stream events.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum GeminiBlock {
    #[default]
    None,
    Text,
    Thinking,
    ToolUse,
}

/// Streaming conversion state for one Gemini response.
#[derive(Debug, Default)]
pub struct GeminiStream {
    pub state: StreamingState,
    pub current: GeminiBlock,
    pub current_index: u64,
}

impl GeminiStream {
    fn close_current(&mut self, events: &mut Vec<(String, Value)>) {
        if self.current != GeminiBlock::None {
            events.push((
                "content_block_stop".into(),
                json!({"type": "content_block_stop", "index": self.current_index}),
            ));
            self.current = GeminiBlock::None;
            self.current_index += 1;
        }
    }

    fn ensure_block(&mut self, kind: GeminiBlock, events: &mut Vec<(String, Value)>) -> u64 {
        if self.current == kind {
            return self.current_index;
        }
        self.close_current(events);
        let block = match kind {
            GeminiBlock::Text => json!({"type": "text", "text": ""}),
            GeminiBlock::Thinking => json!({"type": "thinking", "thinking": "", "signature": ""}),
            GeminiBlock::ToolUse => unreachable!("tool blocks open explicitly"),
            GeminiBlock::None => unreachable!(),
        };
        events.push((
            "content_block_start".into(),
            json!({
                "type": "content_block_start",
                "index": self.current_index,
                "content_block": block,
            }),
        ));
        self.current = kind;
        self.current_index
    }
}

/// Translate one Gemini streaming payload (already JSON-decoded, already
/// unwrapped from the Cloud Code envelope) into Anthropic SSE events.
pub fn stream_chunk_to_anthropic(data: &Value, stream: &mut GeminiStream) -> Vec<(String, Value)> {
    let mut events = Vec::new();

    if !stream.state.message_started {
        stream.state.message_started = true;
        events.push((
            "message_start".into(),
            json!({
                "type": "message_start",
                "message": {
                    "id": format!("msg_{}", &uuid::Uuid::new_v4().simple().to_string()[..24]),
                    "type": "message",
                    "role": "assistant",
                    "model": data.get("modelVersion").and_then(Value::as_str).unwrap_or(""),
                    "content": [],
                    "stop_reason": null,
                    "stop_sequence": null,
                    "usage": {"input_tokens": 0, "output_tokens": 0},
                },
            }),
        ));
    }

    let candidate = match data
        .get("candidates")
        .and_then(Value::as_array)
        .and_then(|c| c.first())
    {
        Some(c) => c,
        None => return events,
    };

    if let Some(parts) = candidate
        .get("content")
        .and_then(|c| c.get("parts"))
        .and_then(Value::as_array)
    {
        for part in parts {
            let is_thought = part.get("thought").and_then(Value::as_bool).unwrap_or(false);
            if let Some(text) = part.get("text").and_then(Value::as_str) {
                if text.is_empty() {
                    continue;
                }
                if is_thought {
                    let idx = stream.ensure_block(GeminiBlock::Thinking, &mut events);
                    events.push((
                        "content_block_delta".into(),
                        json!({
                            "type": "content_block_delta",
                            "index": idx,
                            "delta": {"type": "thinking_delta", "thinking": text},
                        }),
                    ));
                } else {
                    let idx = stream.ensure_block(GeminiBlock::Text, &mut events);
                    events.push((
                        "content_block_delta".into(),
                        json!({
                            "type": "content_block_delta",
                            "index": idx,
                            "delta": {"type": "text_delta", "text": text},
                        }),
                    ));
                }
            } else if let Some(call) = part.get("functionCall") {
                stream.close_current(&mut events);
                let idx = stream.current_index;
                events.push((
                    "content_block_start".into(),
                    json!({
                        "type": "content_block_start",
                        "index": idx,
                        "content_block": {
                            "type": "tool_use",
                            "id": generate_tool_id(),
                            "name": call.get("name").and_then(Value::as_str).unwrap_or(""),
                            "input": {},
                        },
                    }),
                ));
                if let Some(args) = call.get("args") {
                    events.push((
                        "content_block_delta".into(),
                        json!({
                            "type": "content_block_delta",
                            "index": idx,
                            "delta": {"type": "input_json_delta", "partial_json": args.to_string()},
                        }),
                    ));
                }
                stream.current = GeminiBlock::ToolUse;
                stream.state.has_tool_call = true;
            }
        }
    }

    if let Some(reason) = candidate.get("finishReason").and_then(Value::as_str) {
        stream.close_current(&mut events);

        let mut usage = json!({
            "output_tokens": data
                .get("usageMetadata")
                .and_then(|m| m.get("candidatesTokenCount"))
                .and_then(Value::as_u64)
                .unwrap_or(0),
        });
        if let Some(metadata) = data.get("usageMetadata") {
            if let Some(thinking) = metadata.get("thoughtsTokenCount").and_then(Value::as_u64) {
                usage["thinking_tokens"] = json!(thinking);
            }
            if let Some(cached) = metadata.get("cachedContentTokenCount").and_then(Value::as_u64) {
                usage["cache_read_input_tokens"] = json!(cached);
            }
        }

        events.push((
            "message_delta".into(),
            json!({
                "type": "message_delta",
                "delta": {"stop_reason": map_finish_reason(reason)},
                "usage": usage,
            }),
        ));
        events.push(("message_stop".into(), json!({"type": "message_stop"})));
        stream.state.stop_sent = true;
    }

    events
}

/// Token-count response shape shared by both Gemini surfaces.
pub fn token_count_response(total_tokens: u64) -> Value {
    json!({
        "totalTokens": total_tokens,
        "promptTokensDetails": [{"modality": "TEXT", "tokenCount": total_tokens}],
    })
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_removes_forbidden_fields() {
        let schema = json!({
            "$schema": "http://json-schema.org/draft-07/schema#",
            "type": "object",
            "additionalProperties": false,
            "allOf": [{"required": ["a"]}],
            "properties": {
                "a": {"type": ["string", "null"], "exclusiveMinimum": 0},
                "b": {"type": "object", "patternProperties": {}, "dependencies": {},
                      "properties": {"c": {"anyOf": [{"type": "string"}], "oneOf": []}}},
            },
        });
        let clean = sanitize_schema(&schema);
        assert!(clean.get("$schema").is_none());
        assert!(clean.get("additionalProperties").is_none());
        assert!(clean.get("allOf").is_none());
        assert_eq!(clean["properties"]["a"]["type"], "string");
        assert!(clean["properties"]["a"].get("exclusiveMinimum").is_none());
        assert!(clean["properties"]["b"].get("patternProperties").is_none());
        assert!(clean["properties"]["b"]["properties"]["c"].get("anyOf").is_none());
    }

    #[test]
    fn type_array_prefers_number_over_null() {
        let schema = json!({"type": ["null", "integer"]});
        assert_eq!(sanitize_schema(&schema)["type"], "integer");
    }

    #[test]
    fn request_uses_single_declaration_envelope() {
        let body = json!({
            "messages": [{"role": "user", "content": "go"}],
            "tools": [
                {"name": "a", "description": "", "input_schema": {"type": "object"}},
                {"name": "b", "description": "", "input_schema": {"type": "object"}},
            ],
        });
        let gemini = request_to_gemini(&body, None, None);
        let tools = gemini["tools"].as_array().unwrap();
        assert_eq!(tools.len(), 1);
        assert_eq!(tools[0]["functionDeclarations"].as_array().unwrap().len(), 2);
    }

    #[test]
    fn system_instruction_is_user_role_content() {
        let body = json!({
            "system": [{"type": "text", "text": "be brief"}],
            "messages": [],
        });
        let gemini = request_to_gemini(&body, Some("route instruction"), None);
        assert_eq!(gemini["systemInstruction"]["role"], "user");
        let parts = gemini["systemInstruction"]["parts"].as_array().unwrap();
        assert_eq!(parts[0]["text"], "route instruction");
        assert_eq!(parts[1]["text"], "be brief");
    }

    #[test]
    fn tool_result_resolves_function_name() {
        let body = json!({
            "messages": [
                {"role": "assistant", "content": [
                    {"type": "tool_use", "id": "toolu_9", "name": "read_file", "input": {"p": "/x"}},
                ]},
                {"role": "user", "content": [
                    {"type": "tool_result", "tool_use_id": "toolu_9",
                     "content": [{"type": "text", "text": "contents"}]},
                ]},
            ],
        });
        let gemini = request_to_gemini(&body, None, None);
        let contents = gemini["contents"].as_array().unwrap();
        assert_eq!(contents[0]["role"], "model");
        assert_eq!(contents[0]["parts"][0]["functionCall"]["name"], "read_file");
        assert_eq!(contents[1]["parts"][0]["functionResponse"]["name"], "read_file");
        assert_eq!(
            contents[1]["parts"][0]["functionResponse"]["response"]["result"],
            "contents"
        );
    }

    #[test]
    fn reasoning_level_sets_budget() {
        let body = json!({"messages": []});
        let gemini = request_to_gemini(&body, None, Some("medium"));
        assert_eq!(gemini["generationConfig"]["thinkingConfig"]["thinkingBudget"], 4096);
        let gemini = request_to_gemini(&body, None, None);
        assert_eq!(gemini["generationConfig"]["thinkingConfig"]["thinkingBudget"], -1);
    }

    #[test]
    fn explicit_thinking_overrides() {
        let body = json!({
            "messages": [],
            "thinking": {"type": "disabled"},
        });
        let gemini = request_to_gemini(&body, None, Some("high"));
        assert_eq!(gemini["generationConfig"]["thinkingConfig"]["thinkingBudget"], 0);
        assert_eq!(gemini["generationConfig"]["thinkingConfig"]["include_thoughts"], false);
    }

    #[test]
    fn tool_choice_mapping() {
        let body = json!({"messages": [], "tool_choice": {"type": "tool", "name": "grep"}});
        let gemini = request_to_gemini(&body, None, None);
        assert_eq!(gemini["toolConfig"]["functionCallingConfig"]["mode"], "ANY");
        assert_eq!(
            gemini["toolConfig"]["functionCallingConfig"]["allowedFunctionNames"][0],
            "grep"
        );
    }

    #[test]
    fn cloud_code_wrapping() {
        let wrapped = wrap_for_cloud_code(json!({"contents": []}), "gemini-2.5-pro", Some("p1"));
        assert_eq!(wrapped["model"], "gemini-2.5-pro");
        assert_eq!(wrapped["project"], "p1");
        assert!(wrapped["request"]["contents"].is_array());

        let resp = json!({"response": {"candidates": []}});
        assert!(unwrap_cloud_code(&resp)["candidates"].is_array());
        let bare = json!({"candidates": []});
        assert!(unwrap_cloud_code(&bare)["candidates"].is_array());
    }

    #[test]
    fn non_stream_response_translation() {
        let gemini = json!({
            "modelVersion": "gemini-2.5-pro",
            "candidates": [{
                "finishReason": "STOP",
                "content": {"parts": [
                    {"thought": true, "text": "pondering"},
                    {"text": "answer"},
                    {"functionCall": {"name": "calc", "args": {"n": 1}}},
                ]},
            }],
            "usageMetadata": {
                "promptTokenCount": 12,
                "candidatesTokenCount": 3,
                "thoughtsTokenCount": 5,
                "cachedContentTokenCount": 2,
            },
        });
        let msg = response_to_anthropic(&gemini);
        assert_eq!(msg["stop_reason"], "end_turn");
        assert_eq!(msg["content"][0]["type"], "thinking");
        assert_eq!(msg["content"][1]["text"], "answer");
        assert_eq!(msg["content"][2]["name"], "calc");
        assert!(msg["content"][2]["id"].as_str().unwrap().starts_with("toolu_"));
        assert_eq!(msg["usage"]["thinking_tokens"], 5);
        assert_eq!(msg["usage"]["cache_read_input_tokens"], 2);
    }

    #[test]
    fn stream_transitions_force_block_boundaries() {
        let mut stream = GeminiStream::default();
        let events = stream_chunk_to_anthropic(
            &json!({"candidates": [{"content": {"parts": [
                {"thought": true, "text": "hmm"},
            ]}}]}),
            &mut stream,
        );
        let names: Vec<&str> = events.iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(names, vec!["message_start", "content_block_start", "content_block_delta"]);
        assert_eq!(events[1].1["content_block"]["type"], "thinking");

        // Switching to regular text closes the thinking block at index 0
        // and opens text at index 1.
        let events = stream_chunk_to_anthropic(
            &json!({"candidates": [{"content": {"parts": [{"text": "hello"}]}}]}),
            &mut stream,
        );
        assert_eq!(events[0].0, "content_block_stop");
        assert_eq!(events[0].1["index"], 0);
        assert_eq!(events[1].0, "content_block_start");
        assert_eq!(events[1].1["index"], 1);
        assert_eq!(events[1].1["content_block"]["type"], "text");
    }

    #[test]
    fn stream_finish_carries_usage_extensions() {
        let mut stream = GeminiStream::default();
        let events = stream_chunk_to_anthropic(
            &json!({
                "candidates": [{
                    "content": {"parts": [{"text": "done"}]},
                    "finishReason": "MAX_TOKENS",
                }],
                "usageMetadata": {"candidatesTokenCount": 9, "thoughtsTokenCount": 4},
            }),
            &mut stream,
        );
        let delta = events.iter().find(|(n, _)| n == "message_delta").unwrap();
        assert_eq!(delta.1["delta"]["stop_reason"], "max_tokens");
        assert_eq!(delta.1["usage"]["output_tokens"], 9);
        assert_eq!(delta.1["usage"]["thinking_tokens"], 4);
        assert!(events.iter().any(|(n, _)| n == "message_stop"));
        assert!(stream.state.stop_sent);
    }

    #[test]
    fn safety_maps_to_stop_sequence() {
        assert_eq!(map_finish_reason("SAFETY"), "stop_sequence");
        assert_eq!(map_finish_reason("RECITATION"), "stop_sequence");
    }

    #[test]
    fn token_count_shape() {
        let v = token_count_response(42);
        assert_eq!(v["totalTokens"], 42);
        assert_eq!(v["promptTokensDetails"][0]["tokenCount"], 42);
    }
}
