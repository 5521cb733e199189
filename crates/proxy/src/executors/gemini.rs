//! Gemini native executor (`generativelanguage.googleapis.com`).

use axum::http::StatusCode;
use axum::response::Response;
use bytes::Bytes;
use serde_json::{json, Value};
use tether_domain::route::{AuthMethod, RouteConfig};

use crate::auth::resolve_auth;
use crate::error::{anthropic_error_payload, map_gemini_error_type};
use crate::executors::{error_response, json_response, read_error_json, sse_response, wants_stream};
use crate::sse::{drain_data_lines, sse_event};
use crate::translators::gemini::{
    request_to_gemini, response_to_anthropic, stream_chunk_to_anthropic, GeminiStream,
};

const GEMINI_ENDPOINT: &str = "https://generativelanguage.googleapis.com";
const API_VERSION: &str = "v1beta";

/// Requested model when it looks like a Gemini model, else the config's,
/// else a flash default.
fn effective_model(requested: &str, cfg: &RouteConfig) -> String {
    let model = if requested.is_empty() { &cfg.model } else { requested };
    if model.starts_with("gemini") {
        model.to_string()
    } else {
        "gemini-2.5-flash".to_string()
    }
}

fn build_url(cfg: &RouteConfig, model: &str, stream: bool, alt: Option<&str>) -> String {
    let action = if stream && alt.is_none() {
        "streamGenerateContent"
    } else {
        "generateContent"
    };
    let mut url = format!("{GEMINI_ENDPOINT}/{API_VERSION}/models/{model}:{action}");

    let mut push_param = |url: &mut String, param: String| {
        let connector = if url.contains('?') { '&' } else { '?' };
        url.push(connector);
        url.push_str(&param);
    };

    if cfg.auth_method != AuthMethod::Oauth && !cfg.api_key.is_empty() {
        push_param(&mut url, format!("key={}", cfg.api_key));
    }
    match alt {
        None if action == "streamGenerateContent" => push_param(&mut url, "alt=sse".into()),
        Some(custom) if !custom.is_empty() => push_param(&mut url, format!("$alt={custom}")),
        _ => {}
    }
    url
}

/// Extract `(type, message)` from a Gemini error body, mapping its status
/// codes onto Anthropic error types.
pub(crate) fn gemini_error_details(error_body: &Value) -> (String, String) {
    let mut message = "Unknown error".to_string();
    let mut code = String::new();
    if let Some(info) = error_body.get("error") {
        if let Some(obj) = info.as_object() {
            if let Some(m) = obj.get("message").and_then(Value::as_str) {
                message = m.to_string();
            }
            if let Some(c) = obj.get("status").and_then(Value::as_str) {
                code = c.to_string();
            } else if let Some(c) = obj.get("code").and_then(Value::as_str) {
                code = c.to_string();
            }
        } else {
            message = info.to_string();
        }
    } else if let Some(m) = error_body.get("message").and_then(Value::as_str) {
        message = m.to_string();
    }
    (map_gemini_error_type(&code).to_string(), message)
}

pub async fn execute(
    client: &reqwest::Client,
    cfg: RouteConfig,
    body: Value,
    requested_model: String,
    alt: Option<String>,
) -> Response {
    let stream = wants_stream(&body);
    let model = effective_model(&requested_model, &cfg);

    let gemini_body = request_to_gemini(
        &body,
        cfg.system_instruction.as_deref(),
        cfg.reasoning_level(),
    );

    let url = build_url(&cfg, &model, stream, alt.as_deref());
    let mut request = client.post(&url).header("content-type", "application/json");
    if cfg.auth_method == AuthMethod::Oauth {
        for (name, value) in resolve_auth(&cfg).headers {
            request = request.header(name, value);
        }
    }
    for (name, value) in cfg.forwardable_headers() {
        request = request.header(name, value);
    }

    tracing::debug!(model = %model, stream, "gemini upstream request");

    let upstream = match request.json(&gemini_body).send().await {
        Ok(resp) => resp,
        Err(e) => {
            return error_response(
                StatusCode::BAD_GATEWAY,
                &format!("Failed to connect to Gemini API: {e}"),
                "api_error",
                stream,
            )
        }
    };

    let status = upstream.status();
    if !status.is_success() {
        let error_body = read_error_json(upstream).await;
        let (error_type, message) = gemini_error_details(&error_body);
        return error_response(
            StatusCode::from_u16(status.as_u16()).unwrap_or(StatusCode::BAD_GATEWAY),
            &message,
            &error_type,
            stream,
        );
    }

    if stream || alt.is_some() {
        return stream_response(upstream);
    }

    match upstream.json::<Value>().await {
        Ok(gemini) => json_response(StatusCode::OK, &response_to_anthropic(&gemini)),
        Err(e) => error_response(
            StatusCode::BAD_GATEWAY,
            &format!("Failed to process response: {e}"),
            "api_error",
            false,
        ),
    }
}

pub(crate) fn stream_response(upstream: reqwest::Response) -> Response {
    stream_response_inner(upstream, false)
}

/// Shared Gemini SSE translation; `unwrap_envelope` handles the Cloud
/// Code Assist `{response: ...}` wrapper.
pub(crate) fn stream_response_inner(upstream: reqwest::Response, unwrap_envelope: bool) -> Response {
    let translated = async_stream::stream! {
        let mut upstream = upstream;
        let mut buffer = String::new();
        let mut state = GeminiStream::default();

        loop {
            let chunk = match upstream.chunk().await {
                Ok(Some(c)) => c,
                Ok(None) => break,
                Err(e) => {
                    tracing::debug!(error = %e, "gemini upstream stream error");
                    yield Ok::<Bytes, std::io::Error>(sse_event(
                        "error",
                        &anthropic_error_payload(&e.to_string(), "api_error"),
                    ));
                    break;
                }
            };
            buffer.push_str(&String::from_utf8_lossy(&chunk));

            for payload in drain_data_lines(&mut buffer) {
                let data: Value = match serde_json::from_str(&payload) {
                    Ok(v) => v,
                    Err(_) => continue,
                };
                let data = if unwrap_envelope {
                    crate::translators::gemini::unwrap_cloud_code(&data).clone()
                } else {
                    data
                };
                for (name, event) in stream_chunk_to_anthropic(&data, &mut state) {
                    yield Ok(sse_event(&name, &event));
                }
            }
        }

        if !state.state.stop_sent {
            yield Ok(sse_event("message_stop", &json!({"type": "message_stop"})));
        }
    };
    sse_response(StatusCode::OK, translated)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg(method: AuthMethod) -> RouteConfig {
        RouteConfig {
            provider: "google".into(),
            api_key: "gk".into(),
            auth_method: method,
            ..Default::default()
        }
    }

    #[test]
    fn model_defaults_to_flash_for_non_gemini_names() {
        assert_eq!(
            effective_model("claude-3-5-sonnet", &cfg(AuthMethod::ApiKey)),
            "gemini-2.5-flash"
        );
        assert_eq!(
            effective_model("gemini-2.5-pro", &cfg(AuthMethod::ApiKey)),
            "gemini-2.5-pro"
        );
    }

    #[test]
    fn api_key_auth_rides_the_query_string() {
        let url = build_url(&cfg(AuthMethod::ApiKey), "gemini-2.5-pro", false, None);
        assert_eq!(
            url,
            "https://generativelanguage.googleapis.com/v1beta/models/gemini-2.5-pro:generateContent?key=gk"
        );
    }

    #[test]
    fn streaming_url_adds_alt_sse() {
        let url = build_url(&cfg(AuthMethod::ApiKey), "gemini-2.5-pro", true, None);
        assert!(url.contains(":streamGenerateContent"));
        assert!(url.ends_with("&alt=sse"));
    }

    #[test]
    fn oauth_url_has_no_key_param() {
        let url = build_url(&cfg(AuthMethod::Oauth), "gemini-2.5-pro", true, None);
        assert!(!url.contains("key="));
        assert!(url.ends_with("?alt=sse"));
    }

    #[test]
    fn error_details_use_status_mapping() {
        let body = serde_json::json!({
            "error": {"message": "quota", "status": "RESOURCE_EXHAUSTED"},
        });
        let (t, m) = gemini_error_details(&body);
        assert_eq!(t, "rate_limit_error");
        assert_eq!(m, "quota");
    }
}
