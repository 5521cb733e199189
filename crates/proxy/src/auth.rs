//! Upstream authentication: the provider × auth-method header matrix.

use tether_domain::route::{AuthMethod, RouteConfig};

/// Headers and optional query parameter to authenticate an upstream call.
#[derive(Debug, Default, Clone)]
pub struct UpstreamAuth {
    pub headers: Vec<(&'static str, String)>,
    pub query: Option<(&'static str, String)>,
}

/// Resolve the auth carriage for a route.
///
/// | provider                  | auth_method | carries                            |
/// |---------------------------|-------------|------------------------------------|
/// | anthropic                 | api_key     | `x-api-key`                        |
/// | anthropic                 | oauth       | `Authorization: Bearer`            |
/// | azure                     | any         | `api-key`                          |
/// | google/gemini             | api_key     | `x-goog-api-key`                   |
/// | google                    | oauth       | `Authorization: Bearer`            |
/// | openai-compatible family  | any         | `Authorization: Bearer`            |
/// | unknown                   | oauth       | `Authorization: Bearer`            |
/// | unknown                   | api_key     | both Bearer and `x-api-key`        |
pub fn resolve_auth(cfg: &RouteConfig) -> UpstreamAuth {
    let token = cfg.api_key.clone();
    if token.is_empty() {
        return UpstreamAuth::default();
    }
    let provider = cfg.provider.to_lowercase();
    let oauth = cfg.auth_method == AuthMethod::Oauth;

    let bearer = |token: String| UpstreamAuth {
        headers: vec![("authorization", format!("Bearer {token}"))],
        query: None,
    };

    match provider.as_str() {
        "anthropic" => {
            if oauth {
                bearer(token)
            } else {
                UpstreamAuth {
                    headers: vec![("x-api-key", token)],
                    query: None,
                }
            }
        }
        "azure" => UpstreamAuth {
            headers: vec![("api-key", token)],
            query: None,
        },
        "google" | "gemini" => {
            if oauth {
                bearer(token)
            } else {
                UpstreamAuth {
                    headers: vec![("x-goog-api-key", token)],
                    query: None,
                }
            }
        }
        "openai" | "openrouter" | "ollama" | "togetherai" | "groq" | "cerebras" | "xai" => {
            bearer(token)
        }
        _ => {
            if oauth {
                bearer(token)
            } else {
                // Unknown provider: send both for compatibility.
                UpstreamAuth {
                    headers: vec![
                        ("authorization", format!("Bearer {token}")),
                        ("x-api-key", token),
                    ],
                    query: None,
                }
            }
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg(provider: &str, method: AuthMethod) -> RouteConfig {
        RouteConfig {
            provider: provider.into(),
            api_key: "tok".into(),
            auth_method: method,
            ..Default::default()
        }
    }

    fn header<'a>(auth: &'a UpstreamAuth, name: &str) -> Option<&'a str> {
        auth.headers
            .iter()
            .find(|(n, _)| *n == name)
            .map(|(_, v)| v.as_str())
    }

    #[test]
    fn anthropic_api_key_uses_x_api_key() {
        let auth = resolve_auth(&cfg("anthropic", AuthMethod::ApiKey));
        assert_eq!(header(&auth, "x-api-key"), Some("tok"));
        assert!(header(&auth, "authorization").is_none());
    }

    #[test]
    fn anthropic_oauth_uses_bearer() {
        let auth = resolve_auth(&cfg("anthropic", AuthMethod::Oauth));
        assert_eq!(header(&auth, "authorization"), Some("Bearer tok"));
    }

    #[test]
    fn azure_always_api_key_header() {
        for method in [AuthMethod::ApiKey, AuthMethod::Oauth] {
            let auth = resolve_auth(&cfg("azure", method));
            assert_eq!(header(&auth, "api-key"), Some("tok"));
        }
    }

    #[test]
    fn google_api_key_uses_goog_header() {
        let auth = resolve_auth(&cfg("google", AuthMethod::ApiKey));
        assert_eq!(header(&auth, "x-goog-api-key"), Some("tok"));
        let auth = resolve_auth(&cfg("gemini", AuthMethod::ApiKey));
        assert_eq!(header(&auth, "x-goog-api-key"), Some("tok"));
    }

    #[test]
    fn google_oauth_uses_bearer() {
        let auth = resolve_auth(&cfg("google", AuthMethod::Oauth));
        assert_eq!(header(&auth, "authorization"), Some("Bearer tok"));
    }

    #[test]
    fn openai_family_bearer() {
        for provider in ["openai", "openrouter", "ollama", "togetherai", "groq", "cerebras", "xai"] {
            let auth = resolve_auth(&cfg(provider, AuthMethod::ApiKey));
            assert_eq!(header(&auth, "authorization"), Some("Bearer tok"), "{provider}");
        }
    }

    #[test]
    fn unknown_api_key_sends_both() {
        let auth = resolve_auth(&cfg("mysterio", AuthMethod::ApiKey));
        assert_eq!(header(&auth, "authorization"), Some("Bearer tok"));
        assert_eq!(header(&auth, "x-api-key"), Some("tok"));
    }

    #[test]
    fn empty_key_sends_nothing() {
        let mut c = cfg("openai", AuthMethod::ApiKey);
        c.api_key = String::new();
        assert!(resolve_auth(&c).headers.is_empty());
    }
}
