use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::{Classify, ErrorClass};

/// A single scaling-metric observation.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricDatum {
    pub namespace: String,
    pub name: String,
    pub fleet_id: String,
    pub unit: metrics::Unit,
    pub value: f64,
    pub timestamp: DateTime<Utc>,
}

/// Destination for scaling metrics.
#[async_trait]
pub trait MetricSink: Send + Sync {
    async fn emit(&self, datum: &MetricDatum) -> Result<(), SinkError>;
}

/// Publishes metrics as Prometheus gauges through the global `metrics` recorder.
#[derive(Debug, Default, Clone)]
pub struct PrometheusSink;

impl PrometheusSink {
    pub fn new() -> Self {
        Self
    }
}

/// `detect-worker` + `BacklogPerInstance` -> `detect_worker_backlogperinstance`
pub fn gauge_name(namespace: &str, name: &str) -> String {
    let sanitize = |s: &str| -> String {
        s.chars()
            .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_lowercase() } else { '_' })
            .collect()
    };
    format!("{}_{}", sanitize(namespace), sanitize(name))
}

#[async_trait]
impl MetricSink for PrometheusSink {
    async fn emit(&self, datum: &MetricDatum) -> Result<(), SinkError> {
        if !datum.value.is_finite() {
            return Err(SinkError::NonFinite(datum.value));
        }

        let name = gauge_name(&datum.namespace, &datum.name);
        metrics::describe_gauge!(name.clone(), datum.unit, "Autoscaling signal");
        metrics::gauge!(name, "fleet_id" => datum.fleet_id.clone()).set(datum.value);
        metrics::gauge!(
            gauge_name(&datum.namespace, "last_sample_timestamp_seconds"),
            "fleet_id" => datum.fleet_id.clone()
        )
        .set(datum.timestamp.timestamp() as f64);
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    #[error("Refusing to emit non-finite metric value {0}")]
    NonFinite(f64),
}

impl Classify for SinkError {
    fn class(&self) -> ErrorClass {
        ErrorClass::Data
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gauge_name_sanitized() {
        assert_eq!(
            gauge_name("detect-worker", "BacklogPerInstance"),
            "detect_worker_backlogperinstance"
        );
        assert_eq!(
            gauge_name("detect_worker", "backlog_per_instance"),
            "detect_worker_backlog_per_instance"
        );
    }

    #[tokio::test]
    async fn test_non_finite_rejected() {
        let datum = MetricDatum {
            namespace: "ns".to_string(),
            name: "m".to_string(),
            fleet_id: "f".to_string(),
            unit: metrics::Unit::Count,
            value: f64::NAN,
            timestamp: Utc::now(),
        };
        assert!(PrometheusSink::new().emit(&datum).await.is_err());
    }
}
