//! Request-metadata normalisation.
//!
//! Upstreams that accept a `metadata.user_id` get a process-stable
//! synthesized identifier, so analytics on their side don't see a fresh
//! user per request. Caller-supplied `user_id` strings are preserved;
//! all other metadata keys are dropped (nested metadata payloads are
//! rejected by some providers).

use std::sync::OnceLock;

use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use uuid::Uuid;

static USER_ID: OnceLock<String> = OnceLock::new();

fn stable_user_id() -> &'static str {
    USER_ID.get_or_init(|| {
        let account = Uuid::new_v4().simple().to_string();
        let session = Uuid::new_v4().simple().to_string();
        let digest = Sha256::digest(format!("{account}{session}").as_bytes());
        format!("user_{digest:x}_account_{account}_session_{session}")
    })
}

/// Return a normalised metadata mapping for an inbound request body.
pub fn ensure_metadata(body: &Value) -> Value {
    let supplied = body
        .get("metadata")
        .and_then(|m| m.get("user_id"))
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty());

    match supplied {
        Some(user_id) => json!({"user_id": user_id}),
        None => json!({"user_id": stable_user_id()}),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn preserves_caller_user_id() {
        let body = serde_json::json!({"metadata": {"user_id": "u-42", "other": 1}});
        let meta = ensure_metadata(&body);
        assert_eq!(meta["user_id"], "u-42");
        assert!(meta.get("other").is_none());
    }

    #[test]
    fn synthesizes_stable_user_id() {
        let a = ensure_metadata(&serde_json::json!({}));
        let b = ensure_metadata(&serde_json::json!({"metadata": {"user_id": "  "}}));
        assert_eq!(a["user_id"], b["user_id"]);
        assert!(a["user_id"].as_str().unwrap().starts_with("user_"));
    }
}
