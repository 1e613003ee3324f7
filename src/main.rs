//! Stream Cache - status server and composition root
//!
//! Wires the cache, dispatcher, and stream client together and serves the
//! status API.

use std::net::SocketAddr;

use anyhow::Context;
use serde_json::Value;
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use stream_cache::api::{create_router, AppState};
use stream_cache::stream::events;
use stream_cache::{spawn_cleanup_task, Config, Dispatcher, StreamClient};

/// Stream event types and the upstream resource each one makes stale.
const STALE_ON_EVENT: &[(&str, &str)] = &[("order_update", "orders")];

/// Main entry point.
///
/// # Startup Sequence
/// 1. Initialize tracing subscriber for logging
/// 2. Load and validate configuration from environment variables
/// 3. Create the cache, the memoized upstream client, and the expiry sweep
/// 4. Start the stream client when `STREAM_URL` is set; its events
///    invalidate upstream responses they make stale
/// 5. Serve the status API until SIGINT/SIGTERM, then stop the stream
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Defaults to "info" level, can be overridden with RUST_LOG env var
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "stream_cache=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting stream cache");

    let config = Config::from_env().context("invalid configuration")?;
    config.validate().context("invalid configuration")?;
    info!(
        stream_url = config.stream_url.as_deref().unwrap_or("<none>"),
        upstream_url = config.upstream_url.as_deref().unwrap_or("<none>"),
        default_ttl_secs = config.default_ttl.as_secs(),
        cache_max_entries = config.cache_max_entries,
        port = config.server_port,
        "Configuration loaded"
    );

    let dispatcher = Dispatcher::new();
    let stream = StreamClient::from_config(&config, dispatcher.clone());
    let state = AppState::from_config(&config, stream.clone());

    // Stream events invalidate cached REST responses they make stale
    match state.upstream.clone() {
        Some(upstream) => {
            info!(upstream = upstream.base_url(), "Upstream REST reads are memoized");
            for (event_type, resource) in STALE_ON_EVENT {
                upstream.invalidate_on(&dispatcher, event_type, resource);
            }
        }
        None => info!("UPSTREAM_URL not set, upstream reads disabled"),
    }
    dispatcher.subscribe(events::GAVE_UP, |payload: &Value| {
        warn!(payload = %payload, "stream reconnection abandoned");
        Ok(())
    });

    let cleanup_handle = spawn_cleanup_task(state.cache.clone(), config.cleanup_interval);
    info!("Background expiry sweep started");

    match &stream {
        Some(client) => client.start(),
        None => info!("STREAM_URL not set, stream client disabled"),
    }

    let app = create_router(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.server_port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!("Server listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(cleanup_handle, stream))
        .await
        .context("server error")?;

    info!("Server shutdown complete");
    Ok(())
}

/// Waits for Ctrl+C or SIGTERM, then stops background work.
async fn shutdown_signal(cleanup_handle: tokio::task::JoinHandle<()>, stream: Option<StreamClient>) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating shutdown...");
        }
        _ = terminate => {
            info!("Received SIGTERM, initiating shutdown...");
        }
    }

    if let Some(stream) = stream {
        stream.stop();
    }
    cleanup_handle.abort();
    warn!("Background tasks stopped");
}
