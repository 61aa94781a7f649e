use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::error::{Classify, ErrorClass};
use crate::models::backlog::BacklogSample;
use crate::services::{
    fleet::{FleetControlPlane, FleetError},
    metric_sink::{MetricDatum, MetricSink, SinkError},
    queue::{JobSource, QueueError},
};

#[derive(Debug, thiserror::Error)]
pub enum ReporterError {
    #[error("Fleet {0} not found")]
    FleetNotFound(String),

    #[error("Failed to read queue depth: {0}")]
    Queue(#[from] QueueError),

    #[error("Failed to describe fleet: {0}")]
    Fleet(#[from] FleetError),

    #[error("Failed to emit metric: {0}")]
    Sink(#[from] SinkError),
}

impl Classify for ReporterError {
    fn class(&self) -> ErrorClass {
        match self {
            ReporterError::FleetNotFound(_) => ErrorClass::Configuration,
            ReporterError::Queue(e) => e.class(),
            ReporterError::Fleet(e) => e.class(),
            ReporterError::Sink(e) => e.class(),
        }
    }
}

/// Samples queue depth and fleet capacity and emits backlog per instance.
///
/// Stateless between calls; safe to invoke from any number of triggers.
pub struct BacklogMetricReporter {
    queue: Arc<dyn JobSource>,
    fleet: Arc<dyn FleetControlPlane>,
    sink: Arc<dyn MetricSink>,
    fleet_id: String,
    namespace: String,
    metric_name: String,
}

impl BacklogMetricReporter {
    pub fn new(
        queue: Arc<dyn JobSource>,
        fleet: Arc<dyn FleetControlPlane>,
        sink: Arc<dyn MetricSink>,
        fleet_id: impl Into<String>,
        namespace: impl Into<String>,
        metric_name: impl Into<String>,
    ) -> Self {
        Self {
            queue,
            fleet,
            sink,
            fleet_id: fleet_id.into(),
            namespace: namespace.into(),
            metric_name: metric_name.into(),
        }
    }

    pub fn fleet_id(&self) -> &str {
        &self.fleet_id
    }

    pub async fn report_once(&self) -> Result<BacklogSample, ReporterError> {
        let queue_depth = self.queue.approximate_depth().await?;
        let desired_capacity = self
            .fleet
            .desired_capacity(&self.fleet_id)
            .await?
            .ok_or_else(|| ReporterError::FleetNotFound(self.fleet_id.clone()))?;

        let sample =
            BacklogSample::compute(&self.fleet_id, queue_depth, desired_capacity, Utc::now());

        self.sink
            .emit(&MetricDatum {
                namespace: self.namespace.clone(),
                name: self.metric_name.clone(),
                fleet_id: self.fleet_id.clone(),
                unit: metrics::Unit::Count,
                value: sample.backlog_per_instance,
                timestamp: sample.timestamp,
            })
            .await?;

        metrics::gauge!(
            format!("{}_queue_depth", self.namespace),
            "fleet_id" => self.fleet_id.clone()
        )
        .set(sample.queue_depth as f64);
        metrics::gauge!(
            format!("{}_fleet_size", self.namespace),
            "fleet_id" => self.fleet_id.clone()
        )
        .set(sample.fleet_size as f64);

        tracing::info!(
            fleet_id = %self.fleet_id,
            queue_depth = sample.queue_depth,
            fleet_size = sample.fleet_size,
            backlog_per_instance = sample.backlog_per_instance,
            "Backlog metric emitted"
        );
        Ok(sample)
    }

    /// Report every `interval` until cancelled. Returns early on a configuration error.
    pub async fn run_periodic(
        &self,
        interval: Duration,
        shutdown: CancellationToken,
    ) -> Result<(), ReporterError> {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => return Ok(()),
                _ = ticker.tick() => {}
            }

            match self.report_once().await {
                Ok(_) => {}
                Err(e) if e.is_fatal() => {
                    tracing::error!(
                        fleet_id = %self.fleet_id,
                        error = %e,
                        "Backlog reporter misconfigured"
                    );
                    return Err(e);
                }
                Err(e) => {
                    tracing::warn!(
                        fleet_id = %self.fleet_id,
                        error = %e,
                        "Backlog report failed, will retry next tick"
                    );
                }
            }
        }
    }
}
