//! Permission decisions.
//!
//! The wire shape matches what the LLM-CLI control protocol expects in a
//! `control_response`: `{behavior: "allow", updatedInput}` or
//! `{behavior: "deny", message, interrupt}`.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Outcome of a tool-permission arbitration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "behavior", rename_all = "lowercase")]
pub enum Decision {
    Allow {
        /// Input the tool should run with. Always populated; the manager
        /// substitutes the originally submitted input when the client
        /// omits it.
        #[serde(rename = "updatedInput")]
        updated_input: Value,
    },
    Deny {
        message: String,
        #[serde(default)]
        interrupt: bool,
    },
}

impl Decision {
    pub fn allow(updated_input: Value) -> Self {
        Decision::Allow { updated_input }
    }

    pub fn deny(message: impl Into<String>) -> Self {
        Decision::Deny {
            message: message.into(),
            interrupt: true,
        }
    }

    pub fn is_allow(&self) -> bool {
        matches!(self, Decision::Allow { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn allow_wire_shape() {
        let d = Decision::allow(json!({"cmd": "ls"}));
        let v = serde_json::to_value(&d).unwrap();
        assert_eq!(v["behavior"], "allow");
        assert_eq!(v["updatedInput"]["cmd"], "ls");
    }

    #[test]
    fn deny_wire_shape() {
        let d = Decision::deny("nope");
        let v = serde_json::to_value(&d).unwrap();
        assert_eq!(v["behavior"], "deny");
        assert_eq!(v["message"], "nope");
        assert_eq!(v["interrupt"], true);
    }

    #[test]
    fn deny_interrupt_defaults_false_on_parse() {
        let d: Decision =
            serde_json::from_str(r#"{"behavior":"deny","message":"m"}"#).unwrap();
        assert_eq!(
            d,
            Decision::Deny {
                message: "m".into(),
                interrupt: false
            }
        );
    }
}
