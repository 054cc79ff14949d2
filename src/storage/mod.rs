pub mod sqlite;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::Result;
use crate::models::{AnalysisReport, RepositoryReference};

pub use sqlite::SqliteRecordStore;

/// Usage recorded for one identity since a cutoff.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UsageWindow {
    pub count: u32,
    pub oldest: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
pub struct AnalysisRecord {
    pub user_id: String,
    pub owner: String,
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub report: AnalysisReport,
}

/// Persistence seam for completed runs. Writes are fire-and-forget from the
/// orchestrator's point of view.
#[async_trait]
pub trait RecordStore: Send + Sync {
    async fn save_record(
        &self,
        user_id: &str,
        repo: &RepositoryReference,
        report: &AnalysisReport,
    ) -> Result<()>;

    async fn count_since(&self, user_id: &str, since: DateTime<Utc>) -> Result<UsageWindow>;

    async fn latest_record(&self, repo: &RepositoryReference) -> Result<Option<AnalysisRecord>>;
}
