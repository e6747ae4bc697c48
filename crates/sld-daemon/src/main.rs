//! sld-daemon entry point.
//!
//! Loads config, picks the order store, resumes Pending orders, starts price
//! ingestion and serves the HTTP API. Handlers live in `routes.rs`; shared
//! state types live in `state.rs`.

use std::{net::SocketAddr, sync::Arc, time::Duration};

use anyhow::Context;
use axum::http::{HeaderValue, Method};
use sld_config::{load_app_config, AppConfig};
use sld_daemon::{routes, state};
use sld_db::{InMemoryOrderRepository, OrderRepository, PgOrderRepository};
use sld_execution::{PaperExecutionGateway, RetryPolicy};
use sld_md::{GatewayConfig, PriceStreamGateway};
use sld_runtime::OrderService;
use tokio::sync::mpsc;
use tower_http::{
    cors::CorsLayer,
    trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer},
};
use tracing::{info, warn, Level};

/// Comma-separated list of YAML layers, lowest precedence first.
const ENV_CONFIG_PATHS: &str = "SLD_CONFIG";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Silent if the file does not exist; production injects env vars directly.
    let _ = dotenvy::from_filename(".env.local");

    init_tracing();

    let paths = config_paths_from_env();
    let path_refs: Vec<&str> = paths.iter().map(|s| s.as_str()).collect();
    let (cfg, loaded) = load_app_config(&path_refs).context("config load failed")?;
    info!(config_hash = %loaded.config_hash, layers = paths.len(), "config loaded");

    let repo = open_repository(&cfg).await?;
    let gateway = Arc::new(PaperExecutionGateway::new(Duration::from_millis(
        cfg.execution.paper_latency_ms,
    )));
    let service = OrderService::new(repo, gateway, RetryPolicy::from_config(&cfg.execution));

    let report = service.recover().await.context("recovery failed")?;
    info!(
        resumed = report.resumed,
        already_running = report.already_running,
        failed = report.failed,
        "pending orders recovered"
    );

    let mut ingestion = Vec::new();
    match cfg.price_stream.require_url() {
        Ok(url) => {
            let (tx, rx) = mpsc::channel(cfg.price_stream.queue_capacity);
            ingestion.push(service.dispatcher().start(rx));
            ingestion.push(
                PriceStreamGateway::new(GatewayConfig::from_settings(url, &cfg.price_stream))
                    .start(tx),
            );
        }
        Err(e) => warn!(error = %e, "price ingestion disabled"),
    }

    let shared = Arc::new(state::AppState::new(service.clone()));
    let heartbeat = state::spawn_heartbeat(shared.bus.clone(), Duration::from_secs(1));
    let relay = state::spawn_update_relay(service.subscribe(), shared.bus.clone());

    let app = routes::build_router(Arc::clone(&shared))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
        .layer(cors_localhost_only());

    let addr: SocketAddr = cfg.daemon.addr.parse().context("daemon.addr")?;
    info!("sld-daemon listening on http://{}", addr);

    axum::serve(tokio::net::TcpListener::bind(addr).await?, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server crashed")?;

    for task in ingestion {
        task.abort();
    }
    heartbeat.abort();
    relay.abort();
    info!("sld-daemon stopped");
    Ok(())
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .init();
}

fn config_paths_from_env() -> Vec<String> {
    std::env::var(ENV_CONFIG_PATHS)
        .map(|raw| {
            raw.split(',')
                .map(str::trim)
                .filter(|p| !p.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

/// Postgres when `database.url` is set, otherwise the in-memory store.
async fn open_repository(cfg: &AppConfig) -> anyhow::Result<Arc<dyn OrderRepository>> {
    match cfg.database.url.as_deref() {
        Some(url) => {
            let pool = sld_db::connect(url, cfg.database.max_connections).await?;
            sld_db::migrate(&pool).await?;
            info!("order store: postgres");
            Ok(Arc::new(PgOrderRepository::new(pool)))
        }
        None => {
            warn!("database.url not set; orders will not survive a restart");
            Ok(Arc::new(InMemoryOrderRepository::new()))
        }
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "ctrl_c handler failed; shutting down");
    }
    info!("shutdown requested");
}

/// CORS: allow only localhost origins.
fn cors_localhost_only() -> CorsLayer {
    let allowed_origins = [
        "http://localhost",
        "http://127.0.0.1",
        "http://localhost:3000",
        "http://127.0.0.1:3000",
        "http://localhost:5173",
        "http://127.0.0.1:5173",
    ];

    let origins: Vec<HeaderValue> = allowed_origins
        .iter()
        .filter_map(|o| HeaderValue::from_str(o).ok())
        .collect();

    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers(tower_http::cors::Any)
}
