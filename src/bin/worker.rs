use detect_worker::{
    config::AppConfig,
    db, routes,
    services::{
        inference::DetectorProcess, labels::ClassNames, notifier::HttpNotifier, queue::JobQueue,
        results::PgResultStore, storage::S3BlobStore,
    },
    shutdown::install_shutdown_handler,
    worker::{consumer::QueueConsumer, processor::JobProcessor},
};
use std::process::ExitCode;
use std::sync::Arc;
use tokio::task::JoinSet;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> ExitCode {
    // Initialize structured logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .init();

    tracing::info!("Starting detection worker");

    let config = AppConfig::from_env().expect("Failed to load configuration");

    if let Some(addr) = &config.worker_metrics_addr {
        let addr = addr.parse().expect("Invalid WORKER_METRICS_ADDR");
        routes::metrics::install_listener(addr).expect("Failed to start metrics listener");
    }

    let classes = ClassNames::load(&config.data_config).expect("Failed to load class names");
    tracing::info!(
        classes = classes.len(),
        data = %config.data_config.display(),
        "Class table loaded"
    );

    tracing::info!("Connecting to PostgreSQL");
    let db_pool = db::init_pool(&config.database_url, config.worker_concurrency as u32 + 1)
        .await
        .expect("Failed to connect to database");

    tracing::info!("Initializing services");
    let blobs = S3BlobStore::new(
        &config.bucket_name,
        &config.s3_region,
        config.s3_endpoint.as_deref(),
        config.aws_access_key_id.as_deref(),
        config.aws_secret_access_key.as_deref(),
    )
    .expect("Failed to initialize S3 client");

    let notifier = HttpNotifier::new(
        &config.downstream_url,
        config.notify_timeout(),
        config.notify_accept_invalid_certs,
    )
    .expect("Failed to initialize downstream notifier");

    let engine = DetectorProcess::new(
        &config.detector_program,
        &config.detector_script,
        &config.model_weights,
        &config.data_config,
    );

    let queue = Arc::new(
        JobQueue::new(
            &config.redis_url,
            &config.queue_name,
            config.visibility_timeout(),
            config.poll_interval(),
        )
        .expect("Failed to initialize job queue"),
    );

    let processor = Arc::new(JobProcessor::new(
        Arc::new(blobs),
        Arc::new(PgResultStore::new(db_pool)),
        Arc::new(notifier),
        Arc::new(engine),
        Arc::new(classes),
        &config.work_dir,
    ));

    let shutdown = install_shutdown_handler();

    tracing::info!(
        loops = config.worker_concurrency,
        "Worker ready, starting job processing loop"
    );

    let mut loops = JoinSet::new();
    for _ in 0..config.worker_concurrency.max(1) {
        let consumer = QueueConsumer::new(
            queue.clone(),
            processor.clone(),
            config.receive_wait(),
            config.poll_interval(),
        );
        let shutdown = shutdown.clone();
        loops.spawn(async move { consumer.run(shutdown).await });
    }

    let mut exit = ExitCode::SUCCESS;
    while let Some(joined) = loops.join_next().await {
        let failed = match joined {
            Ok(Ok(())) => false,
            Ok(Err(e)) => {
                tracing::error!(error = %e, "Consumer stopped on fatal error");
                true
            }
            Err(e) => {
                tracing::error!(error = %e, "Consumer task panicked");
                true
            }
        };
        if failed {
            exit = ExitCode::FAILURE;
            shutdown.cancel();
        }
    }

    tracing::info!("Worker stopped");
    exit
}
