use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};

use crate::error::{Error, Result};
use crate::models::{AnalysisReport, RepositoryReference};
use crate::storage::{AnalysisRecord, RecordStore, UsageWindow};

pub struct SqliteRecordStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteRecordStore {
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::init(Connection::open(path)?)
    }

    pub fn in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS analysis_records (
                id INTEGER PRIMARY KEY,
                user_id TEXT NOT NULL,
                owner TEXT NOT NULL,
                name TEXT NOT NULL,
                created_at TEXT NOT NULL,
                report_json TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_records_user_created ON analysis_records(user_id, created_at);
            CREATE INDEX IF NOT EXISTS idx_records_repo ON analysis_records(owner, name);
            "#,
        )?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Runs `job` against the connection on the blocking pool.
    async fn with_conn<T, F>(&self, job: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let guard = conn.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            job(&guard)
        })
        .await
        .map_err(|e| Error::UpstreamApi {
            status: 500,
            message: format!("Record store task failed: {}", e),
        })?
    }
}

fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

#[async_trait]
impl RecordStore for SqliteRecordStore {
    async fn save_record(
        &self,
        user_id: &str,
        repo: &RepositoryReference,
        report: &AnalysisReport,
    ) -> Result<()> {
        let report_json = serde_json::to_string(report)?;
        let user_id = user_id.to_string();
        let owner = repo.owner().to_string();
        let name = repo.name().to_string();
        let created_at = Utc::now().to_rfc3339();

        self.with_conn(move |conn| {
            conn.execute(
                r#"
                INSERT INTO analysis_records (user_id, owner, name, created_at, report_json)
                VALUES (?1, ?2, ?3, ?4, ?5)
                "#,
                params![user_id, owner, name, created_at, report_json],
            )?;
            Ok(())
        })
        .await
    }

    async fn count_since(&self, user_id: &str, since: DateTime<Utc>) -> Result<UsageWindow> {
        let user_id = user_id.to_string();
        let since = since.to_rfc3339();

        self.with_conn(move |conn| {
            let (count, oldest): (u32, Option<String>) = conn.query_row(
                r#"
                SELECT COUNT(*), MIN(created_at)
                FROM analysis_records
                WHERE user_id = ?1 AND created_at >= ?2
                "#,
                params![user_id, since],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )?;
            Ok(UsageWindow {
                count,
                oldest: oldest.as_deref().and_then(parse_timestamp),
            })
        })
        .await
    }

    async fn latest_record(&self, repo: &RepositoryReference) -> Result<Option<AnalysisRecord>> {
        let owner = repo.owner().to_string();
        let name = repo.name().to_string();

        self.with_conn(move |conn| {
            let row = conn
                .query_row(
                    r#"
                    SELECT user_id, owner, name, created_at, report_json
                    FROM analysis_records
                    WHERE owner = ?1 AND name = ?2
                    ORDER BY created_at DESC, id DESC
                    LIMIT 1
                    "#,
                    params![owner, name],
                    |row| {
                        Ok((
                            row.get::<_, String>(0)?,
                            row.get::<_, String>(1)?,
                            row.get::<_, String>(2)?,
                            row.get::<_, String>(3)?,
                            row.get::<_, String>(4)?,
                        ))
                    },
                )
                .optional()?;

            let Some((user_id, owner, name, created_at, report_json)) = row else {
                return Ok(None);
            };
            Ok(Some(AnalysisRecord {
                user_id,
                owner,
                name,
                created_at: parse_timestamp(&created_at).unwrap_or_else(Utc::now),
                report: serde_json::from_str(&report_json)?,
            }))
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use super::*;
    use crate::github::parse_reference;
    use crate::llm::gateway::tests::sample_report;

    #[tokio::test]
    async fn test_count_since_tracks_only_matching_user() {
        let store = SqliteRecordStore::in_memory().unwrap();
        let repo = parse_reference("github.com/acme/widgets").unwrap();
        let report = sample_report();

        store.save_record("alice", &repo, &report).await.unwrap();
        store.save_record("alice", &repo, &report).await.unwrap();
        store.save_record("bob", &repo, &report).await.unwrap();

        let window = store
            .count_since("alice", Utc::now() - Duration::hours(24))
            .await
            .unwrap();
        assert_eq!(window.count, 2);
        assert!(window.oldest.is_some());

        let future = store
            .count_since("alice", Utc::now() + Duration::hours(1))
            .await
            .unwrap();
        assert_eq!(future.count, 0);
        assert!(future.oldest.is_none());
    }

    #[tokio::test]
    async fn test_latest_record_round_trips_report() {
        let dir = tempfile::tempdir().unwrap();
        let store = SqliteRecordStore::new(dir.path().join("records.db")).unwrap();
        let repo = parse_reference("https://github.com/acme/widgets").unwrap();
        let other = parse_reference("https://github.com/acme/gadgets").unwrap();

        assert!(store.latest_record(&repo).await.unwrap().is_none());
        store.save_record("alice", &repo, &sample_report()).await.unwrap();

        let record = store.latest_record(&repo).await.unwrap().unwrap();
        assert_eq!(record.owner, "acme");
        assert_eq!(record.report.summary, sample_report().summary);
        assert!(store.latest_record(&other).await.unwrap().is_none());
    }
}
