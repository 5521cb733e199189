//! Gemini CLI executor: Google's OAuth-mediated Cloud Code Assist
//! surface, with preview-first model fallback on quota exhaustion.

use axum::http::StatusCode;
use axum::response::Response;
use serde_json::Value;
use tether_domain::route::RouteConfig;

use crate::auth::resolve_auth;
use crate::executors::gemini::{gemini_error_details, stream_response_inner};
use crate::executors::{error_response, json_response, read_error_json, wants_stream};
use crate::translators::gemini::{
    request_to_gemini, response_to_anthropic, token_count_response, unwrap_cloud_code,
    wrap_for_cloud_code,
};

const CODEASSIST_ENDPOINT: &str = "https://cloudcode-pa.googleapis.com";
const API_VERSION: &str = "v1internal";

/// Preview-first fallback order per base model. Only 429s advance the
/// cursor; any other failure short-circuits.
fn model_fallback_order(base_model: &str) -> Vec<&str> {
    match base_model {
        "gemini-2.5-pro" => vec![
            "gemini-2.5-pro-preview-05-06",
            "gemini-2.5-pro-preview-06-05",
            "gemini-2.5-pro",
        ],
        "gemini-2.5-flash" => vec![
            "gemini-2.5-flash-preview-04-17",
            "gemini-2.5-flash-preview-05-20",
            "gemini-2.5-flash",
        ],
        "gemini-2.5-flash-lite" => vec![
            "gemini-2.5-flash-lite-preview-06-17",
            "gemini-2.5-flash-lite",
        ],
        other => vec![other],
    }
}

fn effective_model<'a>(requested: &'a str, cfg: &'a RouteConfig) -> &'a str {
    let model = if requested.is_empty() { &cfg.model } else { requested };
    if model.starts_with("gemini") {
        model
    } else {
        "gemini-2.5-flash"
    }
}

fn build_url(action: &str, stream: bool, alt: Option<&str>) -> String {
    let mut url = format!("{CODEASSIST_ENDPOINT}/{API_VERSION}:{action}");
    match alt {
        None if stream && action == "streamGenerateContent" => url.push_str("?alt=sse"),
        Some(custom) if !custom.is_empty() => url.push_str(&format!("?$alt={custom}")),
        _ => {}
    }
    url
}

fn base_request(
    client: &reqwest::Client,
    cfg: &RouteConfig,
    url: &str,
    stream: bool,
) -> reqwest::RequestBuilder {
    let mut request = client
        .post(url)
        .header("content-type", "application/json")
        .header("user-agent", "google-api-nodejs-client/9.15.1")
        .header("x-goog-api-client", "gl-node/22.17.0")
        .header(
            "client-metadata",
            "ideType=IDE_UNSPECIFIED,platform=PLATFORM_UNSPECIFIED,pluginType=GEMINI",
        )
        .header(
            "accept",
            if stream { "text/event-stream" } else { "application/json" },
        );
    for (name, value) in resolve_auth(cfg).headers {
        request = request.header(name, value);
    }
    for (name, value) in cfg.forwardable_headers() {
        request = request.header(name, value);
    }
    request
}

pub async fn execute(
    client: &reqwest::Client,
    cfg: RouteConfig,
    body: Value,
    requested_model: String,
    alt: Option<String>,
) -> Response {
    let stream = wants_stream(&body);

    let project_id = match cfg.extra_headers.get("project_id") {
        Some(p) if !p.is_empty() => p.clone(),
        _ => {
            return error_response(
                StatusCode::BAD_REQUEST,
                "Missing project_id for Cloud Code Assist",
                "invalid_request_error",
                stream,
            )
        }
    };

    let model = effective_model(&requested_model, &cfg).to_string();
    let gemini_body = request_to_gemini(
        &body,
        cfg.system_instruction.as_deref(),
        cfg.reasoning_level(),
    );
    let base_body = wrap_for_cloud_code(gemini_body, &model, Some(&project_id));

    let action = if stream && alt.is_none() {
        "streamGenerateContent"
    } else {
        "generateContent"
    };
    let url = build_url(action, stream, alt.as_deref());

    let mut last_status = StatusCode::TOO_MANY_REQUESTS;
    let mut last_error = ("api_error".to_string(), "Unknown error".to_string());

    for attempt_model in model_fallback_order(&model) {
        let mut attempt_body = base_body.clone();
        attempt_body["model"] = Value::String(attempt_model.to_string());

        tracing::debug!(model = attempt_model, action, "cloud code assist request");

        let upstream = match base_request(client, &cfg, &url, stream)
            .json(&attempt_body)
            .send()
            .await
        {
            Ok(resp) => resp,
            Err(e) => {
                // Connection failures are not retried across models.
                return error_response(
                    StatusCode::BAD_GATEWAY,
                    &format!("Failed to connect to Gemini CLI API: {e}"),
                    "api_error",
                    stream,
                );
            }
        };

        let status = upstream.status();
        if !status.is_success() {
            let error_body = read_error_json(upstream).await;
            let (error_type, message) = gemini_error_details(&error_body);
            last_status = StatusCode::from_u16(status.as_u16()).unwrap_or(StatusCode::BAD_GATEWAY);
            last_error = (error_type, message);

            if status.as_u16() == 429 {
                tracing::info!(model = attempt_model, "rate limited, trying next model");
                continue;
            }
            return error_response(last_status, &last_error.1, &last_error.0, stream || alt.is_some());
        }

        if stream || alt.is_some() {
            return stream_response_inner(upstream, true);
        }
        return match upstream.json::<Value>().await {
            Ok(wrapped) => {
                json_response(StatusCode::OK, &response_to_anthropic(unwrap_cloud_code(&wrapped)))
            }
            Err(e) => error_response(
                StatusCode::BAD_GATEWAY,
                &format!("Failed to process response: {e}"),
                "api_error",
                false,
            ),
        };
    }

    tracing::warn!(model = %model, "all fallback models exhausted");
    error_response(last_status, &last_error.1, &last_error.0, stream || alt.is_some())
}

/// Count tokens via the Cloud Code Assist surface. The body drops the
/// `project`/`model` wrapper fields and the tools/generation config.
pub async fn count_tokens(
    client: &reqwest::Client,
    cfg: RouteConfig,
    body: Value,
    requested_model: String,
) -> Response {
    let project_id = match cfg.extra_headers.get("project_id") {
        Some(p) if !p.is_empty() => p.clone(),
        _ => {
            return error_response(
                StatusCode::BAD_REQUEST,
                "Missing project_id for Cloud Code Assist",
                "invalid_request_error",
                false,
            )
        }
    };

    let model = effective_model(&requested_model, &cfg).to_string();
    let mut gemini_body = request_to_gemini(
        &body,
        cfg.system_instruction.as_deref(),
        cfg.reasoning_level(),
    );
    if let Some(obj) = gemini_body.as_object_mut() {
        obj.remove("tools");
        obj.remove("generationConfig");
    }
    let wrapped = wrap_for_cloud_code(gemini_body, &model, Some(&project_id));
    let url = build_url("countTokens", false, None);

    let mut last_status = StatusCode::TOO_MANY_REQUESTS;
    let mut last_error = ("api_error".to_string(), "Unknown error".to_string());

    for attempt_model in model_fallback_order(&model) {
        let mut attempt_body = wrapped.clone();
        if let Some(obj) = attempt_body.as_object_mut() {
            obj.remove("project");
            obj.remove("model");
        }

        tracing::debug!(model = attempt_model, "cloud code assist countTokens");

        let upstream = match base_request(client, &cfg, &url, false)
            .json(&attempt_body)
            .send()
            .await
        {
            Ok(resp) => resp,
            Err(e) => {
                return error_response(
                    StatusCode::BAD_GATEWAY,
                    &format!("Failed to connect to Gemini CLI API: {e}"),
                    "api_error",
                    false,
                )
            }
        };

        let status = upstream.status();
        if !status.is_success() {
            let error_body = read_error_json(upstream).await;
            let (error_type, message) = gemini_error_details(&error_body);
            last_status = StatusCode::from_u16(status.as_u16()).unwrap_or(StatusCode::BAD_GATEWAY);
            last_error = (error_type, message);
            if status.as_u16() == 429 {
                continue;
            }
            return error_response(last_status, &last_error.1, &last_error.0, false);
        }

        let total = upstream
            .json::<Value>()
            .await
            .ok()
            .and_then(|v| v.get("totalTokens").and_then(Value::as_u64))
            .unwrap_or(0);
        return json_response(StatusCode::OK, &token_count_response(total));
    }

    error_response(last_status, &last_error.1, &last_error.0, false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fallback_order_is_preview_first() {
        assert_eq!(
            model_fallback_order("gemini-2.5-pro"),
            vec![
                "gemini-2.5-pro-preview-05-06",
                "gemini-2.5-pro-preview-06-05",
                "gemini-2.5-pro",
            ]
        );
        assert_eq!(model_fallback_order("gemini-1.5-flash"), vec!["gemini-1.5-flash"]);
    }

    #[test]
    fn url_shape() {
        assert_eq!(
            build_url("streamGenerateContent", true, None),
            "https://cloudcode-pa.googleapis.com/v1internal:streamGenerateContent?alt=sse"
        );
        assert_eq!(
            build_url("countTokens", false, None),
            "https://cloudcode-pa.googleapis.com/v1internal:countTokens"
        );
    }
}
