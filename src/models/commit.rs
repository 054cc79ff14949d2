use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommitSummary {
    pub sha: String,
    pub commit: CommitDetails,
    pub author: Option<CommitAuthorInfo>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommitDetails {
    pub message: String,
    pub author: CommitAuthor,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommitAuthor {
    pub name: String,
    #[serde(default)]
    pub email: String,
    pub date: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommitAuthorInfo {
    pub login: String,
}

/// Commit detail as returned by the single-commit endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Commit {
    pub sha: String,
    pub commit: CommitDetails,
    pub author: Option<CommitAuthorInfo>,
    pub files: Option<Vec<FileChange>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileChange {
    pub filename: String,
    pub status: String,
    #[serde(default)]
    pub additions: u32,
    #[serde(default)]
    pub deletions: u32,
}

/// Flattened commit used by the enrichment stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecentCommit {
    pub sha: String,
    pub author: String,
    pub message: String,
    pub committed_at: DateTime<Utc>,
    pub files: Vec<String>,
}

impl From<Commit> for RecentCommit {
    fn from(commit: Commit) -> Self {
        let author = commit
            .author
            .map(|a| a.login)
            .unwrap_or_else(|| commit.commit.author.name.clone());
        Self {
            sha: commit.sha,
            author,
            message: commit
                .commit
                .message
                .lines()
                .next()
                .unwrap_or("")
                .to_string(),
            committed_at: commit.commit.author.date,
            files: commit
                .files
                .unwrap_or_default()
                .into_iter()
                .map(|f| f.filename)
                .collect(),
        }
    }
}
