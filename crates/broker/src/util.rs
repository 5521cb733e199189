//! Small shared helpers for the broker.

use std::path::PathBuf;

use rand::distributions::Alphanumeric;
use rand::Rng;
use serde_json::Value;

/// 8-char lowercase hex id, used for connection ids and the unique part
/// of permission request ids.
pub fn generate_short_id() -> String {
    let mut rng = rand::thread_rng();
    (0..8)
        .map(|_| {
            let n: u8 = rng.gen_range(0..16);
            char::from_digit(n as u32, 16).unwrap()
        })
        .collect()
}

/// Random alphanumeric suffix for session ids.
pub fn generate_session_suffix() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(8)
        .map(|c| (c as char).to_ascii_lowercase())
        .collect()
}

/// Cache key for a permission decision: tool name plus the input with
/// object keys canonically ordered, so semantically equal inputs hit.
pub fn canonical_cache_key(tool_name: &str, input: &Value) -> String {
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
    let mut out = format!("{tool_name}:");
    canon(input, &mut out);
    out
}

/// Expand a leading `~` to the user's home directory.
pub fn expand_tilde(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    } else if path == "~" {
        if let Some(home) = dirs::home_dir() {
            return home;
        }
    }
    PathBuf::from(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn short_id_is_8_hex() {
        let id = generate_short_id();
        assert_eq!(id.len(), 8);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn cache_key_ignores_key_order() {
        let a = canonical_cache_key("Bash", &json!({"b": 2, "a": 1}));
        let b = canonical_cache_key("Bash", &json!({"a": 1, "b": 2}));
        assert_eq!(a, b);
        let c = canonical_cache_key("Read", &json!({"a": 1, "b": 2}));
        assert_ne!(a, c);
    }

    #[test]
    fn tilde_expansion() {
        let expanded = expand_tilde("~/projects");
        assert!(!expanded.to_string_lossy().starts_with('~'));
        assert_eq!(expand_tilde("/abs/path"), PathBuf::from("/abs/path"));
    }
}
