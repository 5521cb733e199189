//! Global credential management.
//!
//! The client is the source of truth for upstream credentials. Updates
//! are held globally, copied into each session's route entry, and —
//! thanks to the registry's two-slot staging — only take effect at the
//! next turn boundary of each session.

use tether_domain::mask_secret;
use tether_domain::route::{AuthMethod, Credentials};
use tether_protocol::{ClaudeConfig, ClientFrame, ServerFrame};

use crate::handlers::{send_direct, send_error};
use crate::state::AppState;

/// Build a [`Credentials`] value from the wire config. The api key is
/// mandatory; everything else has workable defaults.
pub fn credentials_from_config(config: &ClaudeConfig) -> Result<Credentials, String> {
    let api_key = config
        .api_key
        .clone()
        .filter(|k| !k.is_empty())
        .ok_or_else(|| "API key required in claudeConfig".to_string())?;

    let auth_method = match config.auth_method.as_deref() {
        Some("oauth") => AuthMethod::Oauth,
        _ => AuthMethod::ApiKey,
    };

    let credentials = Credentials {
        credential_id: format!("global_{}", chrono::Utc::now().timestamp()),
        provider: config.provider.clone().unwrap_or_else(|| "anthropic".into()),
        model: config
            .model
            .clone()
            .unwrap_or_else(|| "claude-3-5-sonnet-latest".into()),
        base_url: config
            .base_url
            .clone()
            .unwrap_or_else(|| "https://api.anthropic.com".into()),
        api_key,
        auth_method,
        extra_headers: config.extra_headers.clone().unwrap_or_default(),
        azure_deployment: config.azure_deployment.clone(),
        azure_api_version: config.azure_api_version.clone(),
    };

    tracing::info!(
        provider = %credentials.provider,
        model = %credentials.model,
        base_url = %credentials.base_url,
        auth = ?credentials.auth_method,
        key = %mask_secret(&credentials.api_key),
        "credentials received"
    );
    Ok(credentials)
}

pub async fn handle_update_credentials(state: &AppState, connection_id: &str, frame: ClientFrame) {
    let ClientFrame::UpdateCredentials {
        tab_id,
        claude_config,
        ..
    } = frame
    else {
        return;
    };

    let Some(config) = claude_config else {
        send_error(
            state,
            connection_id,
            "claudeConfig required in update_credentials",
            tab_id.as_deref(),
            None,
        )
        .await;
        return;
    };

    let credentials = match credentials_from_config(&config) {
        Ok(creds) => creds,
        Err(message) => {
            send_error(state, connection_id, &message, tab_id.as_deref(), None).await;
            return;
        }
    };

    state.sessions.set_credentials(credentials.clone());
    state.sessions.queue_credential_updates(&credentials);

    let seq = tab_id.as_deref().map(|tab| state.sessions.acks.next_seq(tab));
    let frame = ServerFrame::CredentialsUpdated {
        status: "success".into(),
        tab_id,
        seq,
    };
    send_direct(state, connection_id, &frame).await;
    tracing::info!("global credentials updated");
}

/// Ask the client for credentials when the broker holds none.
pub async fn request_credentials(state: &AppState, connection_id: &str) {
    let frame = ServerFrame::RequestCredentials {
        reason: "Broker requires credentials to process messages".into(),
    };
    send_direct(state, connection_id, &frame).await;
    tracing::info!("requested credentials from client");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_requires_api_key() {
        let config = ClaudeConfig::default();
        assert!(credentials_from_config(&config).is_err());
    }

    #[test]
    fn config_defaults_fill_in() {
        let config = ClaudeConfig {
            api_key: Some("k".into()),
            ..Default::default()
        };
        let creds = credentials_from_config(&config).unwrap();
        assert_eq!(creds.provider, "anthropic");
        assert_eq!(creds.base_url, "https://api.anthropic.com");
        assert_eq!(creds.auth_method, AuthMethod::ApiKey);
    }

    #[test]
    fn oauth_auth_method_parses() {
        let config = ClaudeConfig {
            api_key: Some("tok".into()),
            auth_method: Some("oauth".into()),
            provider: Some("openai".into()),
            model: Some("gpt-5".into()),
            ..Default::default()
        };
        let creds = credentials_from_config(&config).unwrap();
        assert_eq!(creds.auth_method, AuthMethod::Oauth);
        assert_eq!(creds.provider, "openai");
    }
}
