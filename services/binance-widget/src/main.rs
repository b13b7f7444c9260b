//! Binance widget service
//!
//! Local HTTP service that:
//! 1. Restores the encrypted Binance credential pair
//! 2. Runs the OAuth PKCE flow on behalf of the front end
//! 3. Serves ticker, balance, deposit and convert data through one
//!    request multiplexer

mod api;
mod config;
mod metrics;

use anyhow::{Context, Result};
use axum::Router;
use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::get;
use binance_auth::{
    AesGcmCodec, FilePreferences, MemoryPreferences, PreferenceStore, SecretCodec,
};
use binance_client::BinanceService;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::TcpListener;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use transport::ReqwestTransport;

use metrics_exporter_prometheus::PrometheusHandle;

use crate::config::{Config, StorageConfig};

/// How long in-flight requests may drain after a shutdown signal.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Shared state for the health and metrics handlers
#[derive(Clone)]
struct AppState {
    service: Arc<BinanceService>,
    prometheus: PrometheusHandle,
    started_at: Instant,
}

/// Build the full router: health, metrics and the widget API.
///
/// A concurrency limit layer bounds simultaneous requests to `max_connections`.
fn build_router(state: AppState, max_connections: usize) -> Router {
    let api = api::build_api_router(Arc::clone(&state.service));
    Router::new()
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .with_state(state)
        .merge(api)
        .layer(tower::limit::ConcurrencyLimitLayer::new(max_connections))
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing with JSON output and LOG_LEVEL / RUST_LOG support
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_env("LOG_LEVEL")
                .or_else(|_| EnvFilter::try_from_default_env())
                .unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    info!("starting binance-widget");

    // Install Prometheus metrics recorder before any metrics are emitted
    let prometheus_handle = metrics::install_recorder()?;

    // CLI: simple --config flag parsing
    let args: Vec<String> = std::env::args().collect();
    let cli_config_path = args
        .iter()
        .position(|a| a == "--config")
        .and_then(|i| args.get(i + 1))
        .map(|s| s.as_str());

    let config_path = Config::resolve_path(cli_config_path);
    info!(path = %config_path.display(), "loading configuration");

    let config = Config::load(&config_path)
        .with_context(|| format!("failed to load config from {}", config_path.display()))?;

    info!(
        listen_addr = %config.server.listen_addr,
        oauth_host = %config.binance.oauth_host,
        api_host = %config.binance.api_host,
        client_id_set = !config.binance.client_id.is_empty(),
        "configuration loaded"
    );
    if config.binance.client_id.is_empty() {
        warn!("no OAuth client id configured, authorization will be rejected by Binance");
    }

    let hosts = config.host_config().context("invalid Binance hosts")?;
    let transport = ReqwestTransport::new().context("failed to build HTTP client")?;
    let (codec, prefs) = open_storage(&config.storage).await;

    let service = Arc::new(BinanceService::new(hosts, Arc::new(transport), codec, prefs).await);

    let app_state = AppState {
        service: Arc::clone(&service),
        prometheus: prometheus_handle,
        started_at: Instant::now(),
    };
    let app = build_router(app_state, config.server.max_connections);

    let listen_addr = config.server.listen_addr;
    let listener = TcpListener::bind(listen_addr)
        .await
        .with_context(|| format!("failed to bind to {listen_addr}"))?;
    info!(addr = %listen_addr, "accepting requests");

    // The drain timeout starts when the shutdown signal fires, not when the
    // server starts: notify the server to drain, then race it against the timer.
    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();

    let server_handle = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async {
                let _ = shutdown_rx.await;
            })
            .await
    });

    shutdown_signal().await;
    let _ = shutdown_tx.send(());

    match tokio::time::timeout(DRAIN_TIMEOUT, server_handle).await {
        Ok(Ok(Ok(()))) => {
            info!("all in-flight requests drained");
        }
        Ok(Ok(Err(e))) => {
            error!(error = %e, "server error during shutdown");
        }
        Ok(Err(e)) => {
            error!(error = %e, "server task panicked");
        }
        Err(_) => {
            warn!(
                remaining_upstream = service.multiplexer().in_flight(),
                drain_timeout_secs = DRAIN_TIMEOUT.as_secs(),
                "drain timeout exceeded, forcing shutdown"
            );
        }
    }

    info!("shutdown complete");
    Ok(())
}

/// Open the key file and the preference file.
///
/// Neither failure aborts startup. An unusable key falls back to an
/// in-process key and unusable preferences to memory, so the session works
/// but does not survive a restart.
async fn open_storage(
    storage: &StorageConfig,
) -> (Arc<dyn SecretCodec>, Arc<dyn PreferenceStore>) {
    let codec: Arc<dyn SecretCodec> = match AesGcmCodec::from_key_file(&storage.key_file).await {
        Ok(codec) => Arc::new(codec),
        Err(e) => {
            error!(
                path = %storage.key_file.display(),
                error = %e,
                "failed to load credential key, tokens will not persist across restarts"
            );
            Arc::new(AesGcmCodec::ephemeral())
        }
    };

    let prefs: Arc<dyn PreferenceStore> =
        match FilePreferences::open(storage.prefs_path.clone()).await {
            Ok(prefs) => Arc::new(prefs),
            Err(e) => {
                error!(
                    path = %storage.prefs_path.display(),
                    error = %e,
                    "failed to open preferences, keeping credentials in memory"
                );
                Arc::new(MemoryPreferences::new())
            }
        };

    (codec, prefs)
}

/// Health endpoint: status, sign-in state, outbound requests in flight, uptime.
async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    let body = serde_json::json!({
        "status": "healthy",
        "authenticated": state.service.credentials().is_authenticated().await,
        "upstream_in_flight": state.service.multiplexer().in_flight(),
        "uptime_seconds": state.started_at.elapsed().as_secs(),
    });

    (
        axum::http::StatusCode::OK,
        [(axum::http::header::CONTENT_TYPE, "application/json")],
        body.to_string(),
    )
}

/// Prometheus metrics endpoint in text exposition format.
async fn metrics_handler(State(state): State<AppState>) -> impl IntoResponse {
    (
        axum::http::StatusCode::OK,
        [(
            axum::http::header::CONTENT_TYPE,
            "text/plain; version=0.0.4; charset=utf-8",
        )],
        state.prometheus.render(),
    )
}

/// Wait for SIGTERM or SIGINT for graceful shutdown.
///
/// A signal handler that cannot be installed never fires; the other one
/// still does.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received SIGINT, shutting down"),
        _ = terminate => info!("received SIGTERM, shutting down"),
    }
}
