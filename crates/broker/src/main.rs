use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use tether_broker::ack::AckEngine;
use tether_broker::buffer::MessageBuffer;
use tether_broker::claude::ClaudeInterface;
use tether_broker::connections::ConnectionManager;
use tether_broker::handlers::permissions::send_permission_request;
use tether_broker::permissions::{ArbitrationMode, PermissionManager};
use tether_broker::sessions::SessionManager;
use tether_broker::state::AppState;
use tether_broker::ws;
use tether_domain::config::{BrokerConfig, ConfigSeverity};
use tether_proxy::{ProxyState, RouteRegistry};

#[derive(Parser)]
#[command(name = "tetherd", about = "Mobile-to-LLM relay and protocol gateway")]
struct Cli {
    /// Path to a TOML config file. Environment variables override it.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Print version and exit.
    #[arg(long)]
    version: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    if cli.version {
        println!("tetherd {}", env!("CARGO_PKG_VERSION"));
        return Ok(());
    }

    init_tracing();

    let config = Arc::new(BrokerConfig::load(cli.config.as_deref())?);
    let issues = config.validate();
    for issue in &issues {
        match issue.severity {
            ConfigSeverity::Warning => tracing::warn!("config: {issue}"),
            ConfigSeverity::Error => tracing::error!("config: {issue}"),
        }
    }
    if issues.iter().any(|i| i.severity == ConfigSeverity::Error) {
        anyhow::bail!("config validation failed");
    }

    tracing::info!("tether broker starting");

    // ── Shared components, leaves first ──────────────────────────────
    let registry = Arc::new(RouteRegistry::new());
    let connections = Arc::new(ConnectionManager::new(
        config.max_connections_per_session,
        config.connection_timeout_secs,
    ));
    let buffer = Arc::new(MessageBuffer::new(
        config.buffer_max_messages,
        Duration::from_secs(config.buffer_retention_secs),
        config.buffer_keep_floor,
    ));
    let acks = Arc::new(AckEngine::new());
    let permissions = Arc::new(PermissionManager::new(ArbitrationMode::Prompt));
    let claude = Arc::new(ClaudeInterface::new(Arc::clone(&permissions)));
    let sessions = Arc::new(SessionManager::new(
        &config,
        Arc::clone(&connections),
        Arc::clone(&buffer),
        Arc::clone(&acks),
        Arc::clone(&registry),
        Arc::clone(&claude),
    ));
    let state = AppState::new(Arc::clone(&config), Arc::clone(&sessions), Arc::clone(&permissions));

    // Permission prompts route back to the client through the session
    // fanout; the notifier must not block the arbitration path.
    {
        let notify_state = state.clone();
        permissions.set_notifier(Some(Arc::new(move |tool_name, tool_input, request_id| {
            let state = notify_state.clone();
            tokio::spawn(async move {
                send_permission_request(&state, tool_name, tool_input, request_id).await;
            });
        })));
    }

    // ── Translation proxy (loopback) ─────────────────────────────────
    let proxy_state = ProxyState::new(
        Arc::clone(&registry),
        Duration::from_secs(config.request_timeout_secs),
    )?;
    {
        let host = config.proxy_host.clone();
        let port = config.proxy_port;
        tokio::spawn(async move {
            if let Err(e) = tether_proxy::start_proxy(proxy_state, &host, port).await {
                tracing::error!(error = %e, "translation proxy exited");
            }
        });
    }

    // ── Background sweeps ────────────────────────────────────────────
    {
        let buffer = Arc::clone(&buffer);
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(Duration::from_secs(60));
            loop {
                tick.tick().await;
                buffer.sweep();
            }
        });
    }
    {
        let sessions = Arc::clone(&sessions);
        let interval = config.cleanup_interval_secs.max(1);
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(Duration::from_secs(interval));
            loop {
                tick.tick().await;
                for (connection_id, affected) in sessions.connections.prune_dead() {
                    tracing::info!(connection_id = %connection_id, "pruned dead connection");
                    for session_id in affected {
                        if sessions
                            .connections
                            .session_connection_ids(&session_id)
                            .is_empty()
                        {
                            sessions.update(&session_id, |s| {
                                if s.state == tether_domain::session::SessionState::Active {
                                    s.state = tether_domain::session::SessionState::Inactive;
                                }
                            });
                        }
                    }
                }
                sessions.sweep_idle().await;
            }
        });
    }

    // ── Control-channel server ───────────────────────────────────────
    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(addr = %addr, proxy = %config.proxy_base_url(), "control channel listening");
    axum::serve(listener, ws::router(state)).await?;
    Ok(())
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,tether_broker=debug")),
        )
        .init();
}
