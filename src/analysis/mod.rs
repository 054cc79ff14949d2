pub mod activity;
pub mod insights;
pub mod pipeline;
pub mod run_log;

#[cfg(test)]
pub(crate) mod fakes;

pub use insights::InsightCollector;
pub use pipeline::{Orchestrator, RunHandle, RunState, Stage};
pub use run_log::{LogEntry, RunLog};
