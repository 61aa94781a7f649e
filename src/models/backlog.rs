use chrono::{DateTime, Utc};
use serde::Serialize;

/// Point-in-time scaling signal. Computed, emitted and dropped.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BacklogSample {
    pub timestamp: DateTime<Utc>,
    pub fleet_id: String,
    pub queue_depth: u64,
    /// Desired capacity, clamped to at least one.
    pub fleet_size: u64,
    pub backlog_per_instance: f64,
}

impl BacklogSample {
    pub fn compute(
        fleet_id: impl Into<String>,
        queue_depth: u64,
        desired_capacity: u64,
        timestamp: DateTime<Utc>,
    ) -> Self {
        // A cold fleet still counts as one worker's worth of capacity.
        let fleet_size = desired_capacity.max(1);
        Self {
            timestamp,
            fleet_id: fleet_id.into(),
            queue_depth,
            fleet_size,
            backlog_per_instance: queue_depth as f64 / fleet_size as f64,
        }
    }
}
