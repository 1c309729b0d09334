//! Sentinel Camserver
//!
//! Main entry point for the stream supervision service.

use sentinel_camserver::{
    alert_dedup::AlertDeduplicator,
    detection_log::MySqlDetectionSink,
    detector::HttpDetector,
    frame_cache::LiveFrameCache,
    frame_source::FfmpegOpener,
    orchestrator::{Orchestrator, WorkerDeps},
    state::{AppConfig, AppState},
    stream_store::MySqlStreamStore,
    stream_worker::WorkerPolicy,
    web_api,
};
use chrono::Utc;
use sqlx::mysql::MySqlPoolOptions;
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "sentinel_camserver=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting Sentinel Camserver v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let config = AppConfig::default();
    tracing::info!(
        database_url = %config.database_url,
        detector_url = %config.detector_url,
        reconcile_interval_secs = config.reconcile_interval_secs,
        "Configuration loaded"
    );

    // Create database pool
    let pool = MySqlPoolOptions::new()
        .max_connections(10)
        .acquire_timeout(Duration::from_secs(10))
        .connect(&config.database_url)
        .await?;

    tracing::info!("Database connected");

    // Initialize components
    let store = Arc::new(MySqlStreamStore::new(pool.clone()));
    let sink = Arc::new(MySqlDetectionSink::new(pool.clone()));
    let cache = Arc::new(LiveFrameCache::new());
    let dedup = Arc::new(AlertDeduplicator::new(sink.clone()));

    let detector = Arc::new(HttpDetector::new(config.detector_url.clone()));
    match detector.health_check().await {
        Ok(true) => tracing::info!("Detection server reachable"),
        Ok(false) => tracing::warn!("Detection server responded unhealthy"),
        Err(e) => tracing::warn!(error = %e, "Detection server unreachable at startup"),
    }

    let deps = WorkerDeps {
        store: store.clone(),
        sink,
        detector,
        cache: cache.clone(),
        dedup: dedup.clone(),
        opener: Arc::new(FfmpegOpener),
        policy: WorkerPolicy::default(),
    };
    let orchestrator = Arc::new(Orchestrator::with_tick(
        deps,
        Duration::from_secs(config.reconcile_interval_secs),
    ));

    let state = AppState {
        store,
        cache,
        orchestrator: orchestrator.clone(),
    };

    // Create router
    let app = web_api::create_router(state)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http());

    // Start dedup cache pruning task
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(60));
        loop {
            interval.tick().await;
            dedup.prune(Utc::now()).await;
        }
    });

    // Start orchestrator
    orchestrator.start().await;
    tracing::info!("Orchestrator started");

    // Start server
    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Listening on {}", addr);

    axum::serve(listener, app).await?;

    Ok(())
}
