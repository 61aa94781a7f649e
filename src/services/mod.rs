pub mod fleet;
pub mod inference;
pub mod labels;
pub mod metric_sink;
pub mod notifier;
pub mod queue;
pub mod results;
pub mod storage;
