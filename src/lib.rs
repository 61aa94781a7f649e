//! Queue-driven object detection worker
//!
//! Pulls image jobs from a Redis-backed queue, runs an external detector on
//! each image, stores the annotated image and a structured prediction record,
//! and notifies a downstream service. A separate reporter turns queue backlog
//! and fleet size into an autoscaling metric.

pub mod app_state;
pub mod backlog;
pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod routes;
pub mod services;
pub mod shutdown;
pub mod worker;
