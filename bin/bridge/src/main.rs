//! Bridge composition root.
//!
//! Wires configuration, logging, the source and sink clients, the
//! orchestrator, and the read-only admin HTTP surface together, then runs
//! until a shutdown signal arrives.
//!
//! ## Environment Variables
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | `BRIDGE_CONFIG` | — | Path to a TOML config file (else the usual search paths) |
//! | `BRIDGE_SOURCE_TOKENS` | — | Comma-separated source auth tokens |
//! | `BRIDGE_SINK_BOT_TOKEN` | — | Sink bot token |
//! | `BRIDGE_SINK_CHAT_ID` | — | Sink supergroup chat id (non-zero) |
//! | `BRIDGE_KV_URL` | — | Optional KV store URL; falls back to a local file |
//! | `BRIDGE_ADMIN_HTTP_PORT` | `8080` | Admin HTTP surface port |
//! | `LOG_FORMAT` | text | `json` for machine-readable logs |

use anyhow::Context;
use bridge_admin::{admin_router, AdminState};
use bridge_common::logging::init_logging;
use bridge_config::BridgeConfig;
use bridge_orchestrator::{Orchestrator, OrchestratorConfig};
use bridge_ratelimit::{RateLimiter, RateLimiterConfig};
use bridge_sink::api::HttpTelegramApi;
use bridge_sink::persistence::FileStore;
#[cfg(feature = "kv")]
use bridge_sink::persistence::kv::RedisStore;
use bridge_sink::{PersistenceStore, SinkClient, SinkConfig, TelegramApi};
use bridge_source::{SourceClient, SourceConfig};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::signal;
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_logging("bridge");

    let config = BridgeConfig::load().context("failed to load bridge configuration")?;
    info!(
        source_tokens = config.source_tokens.len(),
        use_topics = config.use_topics,
        "configuration loaded"
    );

    let source_limiter = Arc::new(RateLimiter::new(
        "discord",
        RateLimiterConfig {
            requests_per_second: Some(config.discord_rate_limit_per_second),
            requests_per_minute: None,
        },
    ));
    let sink_limiter = Arc::new(RateLimiter::new(
        "telegram",
        RateLimiterConfig {
            requests_per_second: None,
            requests_per_minute: Some(config.telegram_rate_limit_per_minute),
        },
    ));

    let source = Arc::new(
        SourceClient::init(
            &config.source_tokens,
            SourceConfig {
                max_servers: config.max_servers,
                max_channels_per_server: config.max_channels_per_server,
                max_history_messages: config.max_history_messages,
                websocket_reconnect_delay_seconds: config.websocket_reconnect_delay_seconds,
            },
            source_limiter.clone(),
        )
        .await
        .context("source client initialization failed")?,
    );
    info!(sessions = source.valid_session_count(), "source sessions established");

    source
        .discover()
        .await
        .context("initial guild/channel discovery failed")?;

    let api: Arc<dyn TelegramApi> =
        Arc::new(HttpTelegramApi::new(&config.sink_bot_token).context("failed to build sink API client")?);

    let store: Arc<dyn PersistenceStore> = match &config.kv_url {
        #[cfg(feature = "kv")]
        Some(url) => Arc::new(
            RedisStore::connect(url, config.cache_ttl_seconds, config.message_ttl_seconds)
                .await
                .context("failed to connect to KV store")?,
        ),
        #[cfg(not(feature = "kv"))]
        Some(_) => anyhow::bail!("BRIDGE_KV_URL set but this binary was built without the `kv` feature"),
        None => Arc::new(FileStore::new(
            PathBuf::from(&config.data_dir).join("telegram_data.json"),
        )),
    };

    let sink = Arc::new(
        SinkClient::init(
            api,
            store,
            sink_limiter.clone(),
            SinkConfig {
                chat_id: config.sink_chat_id,
                use_topics: config.use_topics,
                show_timestamps: config.show_timestamps,
                show_server_in_message: config.show_server_in_message,
            },
        )
        .await
        .context("sink client initialization failed")?,
    );

    let orchestrator = Arc::new(Orchestrator::new(
        source.clone(),
        sink.clone(),
        source_limiter.clone(),
        sink_limiter.clone(),
        OrchestratorConfig {
            message_batch_size: config.message_batch_size as usize,
            max_history_messages: config.max_history_messages,
            cleanup_interval_minutes: config.cleanup_interval_minutes,
            health_check_interval_seconds: config.health_check_interval_seconds,
        },
    ));

    orchestrator
        .start()
        .await
        .context("orchestrator failed to start")?;
    info!("orchestrator started, pipeline is running");

    let metrics_handle =
        bridge_admin::init_metrics_recorder().map_err(|e| anyhow::anyhow!(e))?;
    let admin_state = AdminState {
        orchestrator: orchestrator.clone(),
        metrics_handle,
    };
    let admin_addr = format!("0.0.0.0:{}", config.admin_http_port);
    let admin_listener = TcpListener::bind(&admin_addr)
        .await
        .context("failed to bind admin HTTP surface")?;
    info!(addr = %admin_addr, "admin HTTP surface listening");
    let admin_task = tokio::spawn(async move {
        axum::serve(admin_listener, admin_router(admin_state))
            .await
            .expect("admin HTTP server crashed");
    });

    shutdown_signal().await;
    info!("shutdown signal received, stopping pipeline");

    orchestrator.stop().await;
    admin_task.abort();

    info!("bridge shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
