//! Per-request translation context: tool identifier mapping and
//! streaming block state.
//!
//! Upstream tool-call ids never reach the client raw. Each one is mapped
//! to a fresh Anthropic-shaped `toolu_` id, and the reverse mapping turns
//! the client's next `tool_result` back into the id the upstream expects.

use std::collections::HashMap;

use rand::distributions::Alphanumeric;
use rand::Rng;
use serde_json::Value;

/// Generate an Anthropic-format tool id: `toolu_` + 24 alphanumerics.
pub fn generate_tool_id() -> String {
    let suffix: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(24)
        .map(char::from)
        .collect();
    format!("toolu_{suffix}")
}

/// One registered tool-call mapping.
#[derive(Debug, Clone)]
pub struct ToolMapping {
    pub external_id: String,
    pub anthropic_id: String,
    pub name: String,
    pub short_name: Option<String>,
}

/// Tool id/name mappings for a single request.
#[derive(Debug, Default)]
pub struct ToolContext {
    mappings: HashMap<String, ToolMapping>,
    reverse_ids: HashMap<String, String>,
    name_to_id: HashMap<String, String>,
    /// Codex short-name maps, populated during request translation.
    pub orig_to_short: HashMap<String, String>,
    pub short_to_orig: HashMap<String, String>,
}

impl ToolContext {
    pub fn register_tool(
        &mut self,
        external_id: &str,
        name: &str,
        short_name: Option<&str>,
    ) -> String {
        if let Some(existing) = self.mappings.get(external_id) {
            return existing.anthropic_id.clone();
        }
        let anthropic_id = generate_tool_id();
        self.mappings.insert(
            external_id.to_string(),
            ToolMapping {
                external_id: external_id.to_string(),
                anthropic_id: anthropic_id.clone(),
                name: name.to_string(),
                short_name: short_name.map(str::to_string),
            },
        );
        self.reverse_ids
            .insert(anthropic_id.clone(), external_id.to_string());
        self.name_to_id
            .insert(name.to_string(), external_id.to_string());
        anthropic_id
    }

    /// Anthropic id for an external id, minting a mapping when unseen.
    pub fn anthropic_id(&mut self, external_id: &str) -> String {
        match self.mappings.get(external_id) {
            Some(m) => m.anthropic_id.clone(),
            None => self.register_tool(external_id, "function", None),
        }
    }

    /// External id for an Anthropic id, when one was registered.
    pub fn external_id(&self, anthropic_id: &str) -> Option<&str> {
        self.reverse_ids.get(anthropic_id).map(String::as_str)
    }

    /// Tool name by either id form.
    pub fn tool_name(&self, tool_id: &str) -> &str {
        if let Some(m) = self.mappings.get(tool_id) {
            return &m.name;
        }
        if let Some(ext) = self.reverse_ids.get(tool_id) {
            if let Some(m) = self.mappings.get(ext) {
                return &m.name;
            }
        }
        "function"
    }

    /// Record a short↔original name pair (Codex 64-char rule).
    pub fn record_short_name(&mut self, original: &str, short: &str) {
        self.orig_to_short
            .insert(original.to_string(), short.to_string());
        self.short_to_orig
            .insert(short.to_string(), original.to_string());
    }

    pub fn original_name<'a>(&'a self, short: &'a str) -> &'a str {
        self.short_to_orig.get(short).map(String::as_str).unwrap_or(short)
    }

    pub fn short_name<'a>(&'a self, original: &'a str) -> &'a str {
        self.orig_to_short
            .get(original)
            .map(String::as_str)
            .unwrap_or(original)
    }
}

/// Accumulator state for one tool call being streamed.
#[derive(Debug, Clone)]
pub struct ToolState {
    pub call_id: String,
    pub name: String,
    pub arguments: String,
    pub started: bool,
    /// Anthropic content-block index this call streams under. Equals the
    /// map key for upstreams whose own index is the block index (Codex);
    /// differs for upstreams with independent numbering (OpenAI).
    pub block_index: u64,
}

/// State for assembling an Anthropic event stream.
#[derive(Debug, Default)]
pub struct StreamingState {
    next_index: u64,
    pub text_index: Option<u64>,
    pub text_started: bool,
    pub message_started: bool,
    /// Per-block-index tool accumulation.
    pub tool_states: HashMap<u64, ToolState>,
    pub has_tool_call: bool,
    pub input_tokens: Option<u64>,
    pub output_tokens: Option<u64>,
    pub finish_reason: Option<String>,
    pub stop_sent: bool,
}

impl StreamingState {
    pub fn allocate_index(&mut self) -> u64 {
        let idx = self.next_index;
        self.next_index += 1;
        idx
    }

    pub fn text_index(&mut self) -> u64 {
        match self.text_index {
            Some(idx) => idx,
            None => {
                let idx = self.allocate_index();
                self.text_index = Some(idx);
                idx
            }
        }
    }

    pub fn reset(&mut self) {
        *self = StreamingState::default();
    }
}

/// Everything a translator needs across one request/response cycle.
#[derive(Debug, Default)]
pub struct TranslationContext {
    pub requested_model: String,
    pub effective_model: Option<String>,
    pub tools: ToolContext,
    pub streaming: StreamingState,
}

impl TranslationContext {
    pub fn new(model: &str) -> Self {
        Self {
            requested_model: model.to_string(),
            ..Default::default()
        }
    }

    pub fn model(&self) -> &str {
        self.effective_model.as_deref().unwrap_or(&self.requested_model)
    }
}

/// Canonicalize a tool input for cache keying: object keys sorted.
pub fn canonical_input(input: &Value) -> String {
    fn canon(v: &Value, out: &mut String) {
        match v {
            Value::Object(map) => {
                let mut keys: Vec<_> = map.keys().collect();
                keys.sort();
                out.push('{');
                for (i, k) in keys.iter().enumerate() {
                    if i > 0 {
                        out.push(',');
                    }
                    out.push_str(&format!("{k:?}:"));
                    canon(&map[*k], out);
                }
                out.push('}');
            }
            Value::Array(items) => {
                out.push('[');
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        out.push(',');
                    }
                    canon(item, out);
                }
                out.push(']');
            }
            other => out.push_str(&other.to_string()),
        }
    }
    let mut out = String::new();
    canon(input, &mut out);
    out
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn tool_id_format() {
        let id = generate_tool_id();
        assert!(id.starts_with("toolu_"));
        assert_eq!(id.len(), "toolu_".len() + 24);
        assert!(id["toolu_".len()..].chars().all(|c| c.is_ascii_alphanumeric()));
    }

    #[test]
    fn register_is_idempotent_per_external_id() {
        let mut ctx = ToolContext::default();
        let a = ctx.register_tool("call_1", "search", None);
        let b = ctx.register_tool("call_1", "search", None);
        assert_eq!(a, b);
    }

    #[test]
    fn round_trip_external_to_anthropic_and_back() {
        let mut ctx = ToolContext::default();
        let anthropic = ctx.anthropic_id("call_9");
        assert_eq!(ctx.external_id(&anthropic), Some("call_9"));
        assert_eq!(ctx.tool_name("call_9"), "function");
    }

    #[test]
    fn short_name_round_trip() {
        let mut ctx = ToolContext::default();
        ctx.record_short_name("very_long_original_name", "short~1");
        assert_eq!(ctx.original_name("short~1"), "very_long_original_name");
        assert_eq!(ctx.short_name("very_long_original_name"), "short~1");
        assert_eq!(ctx.original_name("unmapped"), "unmapped");
    }

    #[test]
    fn streaming_indices_are_sequential() {
        let mut s = StreamingState::default();
        assert_eq!(s.allocate_index(), 0);
        assert_eq!(s.allocate_index(), 1);
        assert_eq!(s.text_index(), 2);
        assert_eq!(s.text_index(), 2);
    }

    #[test]
    fn canonical_input_is_key_order_independent() {
        let a = json!({"b": 1, "a": {"y": 2, "x": [1, 2]}});
        let b = json!({"a": {"x": [1, 2], "y": 2}, "b": 1});
        assert_eq!(canonical_input(&a), canonical_input(&b));
        let c = json!({"b": 1, "a": {"y": 3, "x": [1, 2]}});
        assert_ne!(canonical_input(&a), canonical_input(&c));
    }
}
