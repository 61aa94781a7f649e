use std::sync::Arc;

use crate::backlog::BacklogMetricReporter;
use crate::services::{queue::JobQueue, results::PgResultStore};

/// Shared state of the control server's route handlers.
#[derive(Clone)]
pub struct AppState {
    pub results: Arc<PgResultStore>,
    pub queue: Arc<JobQueue>,
    pub reporter: Arc<BacklogMetricReporter>,
}

impl AppState {
    pub fn new(
        results: Arc<PgResultStore>,
        queue: Arc<JobQueue>,
        reporter: Arc<BacklogMetricReporter>,
    ) -> Self {
        Self {
            results,
            queue,
            reporter,
        }
    }
}
