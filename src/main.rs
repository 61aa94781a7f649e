use axum::{routing::get, routing::post, Router};
use std::sync::Arc;
use tower_http::compression::CompressionLayer;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use detect_worker::{
    app_state::AppState,
    backlog::BacklogMetricReporter,
    config::AppConfig,
    db, routes,
    services::{
        fleet::HttpFleetControlPlane, metric_sink::PrometheusSink, queue::JobQueue,
        results::PgResultStore,
    },
    shutdown::install_shutdown_handler,
};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize structured logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .init();

    let config = AppConfig::from_env().expect("Failed to load configuration from environment");

    tracing::info!("Initializing detect-worker control server");

    let prometheus_handle = Arc::new(
        routes::metrics::install_recorder().expect("Failed to install Prometheus metrics recorder"),
    );

    tracing::info!("Connecting to PostgreSQL database");
    let db_pool = db::init_pool(&config.database_url, 10)
        .await
        .expect("Failed to connect to database");

    tracing::info!("Running database migrations");
    db::run_migrations(&db_pool)
        .await
        .expect("Failed to run database migrations");

    tracing::info!("Connecting to Redis job queue");
    let queue = Arc::new(
        JobQueue::new(
            &config.redis_url,
            &config.queue_name,
            config.visibility_timeout(),
            config.poll_interval(),
        )
        .expect("Failed to initialize job queue"),
    );

    let fleet = HttpFleetControlPlane::new(&config.fleet_api_url, config.fleet_timeout())
        .expect("Failed to initialize fleet control-plane client");

    let reporter = Arc::new(BacklogMetricReporter::new(
        queue.clone(),
        Arc::new(fleet),
        Arc::new(PrometheusSink::new()),
        &config.fleet_id,
        &config.metric_namespace,
        &config.metric_name,
    ));

    let results = Arc::new(PgResultStore::new(db_pool));
    let state = AppState::new(results, queue, reporter.clone());

    let shutdown = install_shutdown_handler();

    // Periodic backlog reporting; a misconfigured fleet takes the server down
    let reporter_task = {
        let shutdown = shutdown.clone();
        let interval = config.report_interval();
        tokio::spawn(async move {
            let result = reporter.run_periodic(interval, shutdown.clone()).await;
            if result.is_err() {
                shutdown.cancel();
            }
            result
        })
    };

    let app = Router::new()
        .route("/health", get(routes::health::health_check))
        .route("/api/v1/jobs", post(routes::jobs::submit_job))
        .route(
            "/api/v1/predictions/{prediction_id}",
            get(routes::jobs::get_prediction),
        )
        .route(
            "/api/v1/backlog/report",
            post(routes::backlog::report_backlog),
        )
        .with_state(state)
        // Prometheus metrics endpoint (separate state)
        .route(
            "/metrics",
            get(routes::metrics::prometheus_metrics).with_state(prometheus_handle),
        )
        .layer(TraceLayer::new_for_http())
        .layer(CompressionLayer::new())
        .layer(CorsLayer::permissive());

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .expect("Failed to bind to address");

    tracing::info!("Server listening on {}", config.bind_addr);

    let server_shutdown = shutdown.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move { server_shutdown.cancelled().await })
        .await?;

    shutdown.cancel();
    reporter_task.await??;

    tracing::info!("Control server stopped");
    Ok(())
}
