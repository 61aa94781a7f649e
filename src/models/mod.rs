pub mod api;
pub mod backlog;
pub mod job;
pub mod prediction;
