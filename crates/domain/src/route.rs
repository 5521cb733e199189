//! Upstream route configuration and global credentials.
//!
//! A route token is the opaque string a subprocess carries in its
//! `Authorization` header; the proxy resolves it to a [`RouteConfig`]
//! describing the real upstream.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// How the upstream expects the credential to be presented.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum AuthMethod {
    #[default]
    ApiKey,
    Oauth,
}

/// Provider configuration attached to a single route token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouteConfig {
    pub provider: String,
    pub base_url: String,
    pub api_key: String,
    pub model: String,
    #[serde(default)]
    pub auth_method: AuthMethod,
    #[serde(default)]
    pub extra_headers: HashMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub azure_deployment: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub azure_api_version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_instruction: Option<String>,
}

impl Default for RouteConfig {
    fn default() -> Self {
        Self {
            provider: "openai".into(),
            base_url: "https://api.openai.com/v1".into(),
            api_key: String::new(),
            model: "gpt-4o".into(),
            auth_method: AuthMethod::ApiKey,
            extra_headers: HashMap::new(),
            azure_deployment: None,
            azure_api_version: None,
            system_instruction: None,
        }
    }
}

impl RouteConfig {
    /// Reasoning level carried out-of-band in `extra_headers`; consumed by
    /// executors as a body parameter, never forwarded as a header.
    pub fn reasoning_level(&self) -> Option<&str> {
        self.extra_headers.get("reasoning").map(String::as_str)
    }

    /// Extra headers with the out-of-band keys (`reasoning`, `project_id`)
    /// removed, ready to merge into an upstream request.
    pub fn forwardable_headers(&self) -> HashMap<String, String> {
        let mut headers = self.extra_headers.clone();
        headers.remove("reasoning");
        headers.remove("project_id");
        headers
    }
}

/// Client-supplied credentials, held globally by the broker and copied
/// into a route entry whenever a session registers or re-syncs.
#[derive(Debug, Clone)]
pub struct Credentials {
    /// Unique id for this credential set, minted on every update.
    pub credential_id: String,
    pub provider: String,
    pub model: String,
    pub base_url: String,
    pub api_key: String,
    pub auth_method: AuthMethod,
    pub extra_headers: HashMap<String, String>,
    pub azure_deployment: Option<String>,
    pub azure_api_version: Option<String>,
}

impl Credentials {
    /// Copy into the route-registry representation.
    pub fn to_route_config(&self) -> RouteConfig {
        RouteConfig {
            provider: self.provider.clone(),
            base_url: self.base_url.clone(),
            api_key: self.api_key.clone(),
            model: self.model.clone(),
            auth_method: self.auth_method,
            extra_headers: self.extra_headers.clone(),
            azure_deployment: self.azure_deployment.clone(),
            azure_api_version: self.azure_api_version.clone(),
            system_instruction: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auth_method_wire_format() {
        assert_eq!(
            serde_json::to_string(&AuthMethod::ApiKey).unwrap(),
            r#""api_key""#
        );
        assert_eq!(
            serde_json::to_string(&AuthMethod::Oauth).unwrap(),
            r#""oauth""#
        );
    }

    #[test]
    fn reasoning_level_is_out_of_band() {
        let mut cfg = RouteConfig::default();
        cfg.extra_headers.insert("reasoning".into(), "high".into());
        cfg.extra_headers.insert("x-custom".into(), "1".into());
        assert_eq!(cfg.reasoning_level(), Some("high"));
        let fwd = cfg.forwardable_headers();
        assert!(!fwd.contains_key("reasoning"));
        assert_eq!(fwd.get("x-custom").map(String::as_str), Some("1"));
    }
}
