pub mod backlog;
pub mod health;
pub mod jobs;
pub mod metrics;
