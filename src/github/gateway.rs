use std::collections::HashMap;

use async_trait::async_trait;

use crate::error::Result;
use crate::github::reference::parse_reference;
use crate::models::{
    Contributor, Issue, PullRequest, RecentCommit, RepositoryMetadata, RepositoryReference,
    TreeListing, WeeklyActivity,
};

/// Read-only view of the source-hosting provider.
#[async_trait]
pub trait SourceGateway: Send + Sync {
    /// Pure; never touches the network.
    fn resolve(&self, input: &str) -> Result<RepositoryReference> {
        parse_reference(input)
    }

    async fn fetch_metadata(&self, repo: &RepositoryReference) -> Result<RepositoryMetadata>;

    /// Recursive listing of `branch`. `limit` caps the number of entries.
    async fn fetch_tree(
        &self,
        repo: &RepositoryReference,
        branch: &str,
        limit: Option<usize>,
    ) -> Result<TreeListing>;

    async fn fetch_readme(&self, repo: &RepositoryReference) -> Result<String>;

    async fn fetch_file_content(&self, repo: &RepositoryReference, path: &str) -> Result<String>;

    async fn fetch_issues(&self, repo: &RepositoryReference, limit: u32) -> Result<Vec<Issue>>;

    async fn fetch_pull_requests(
        &self,
        repo: &RepositoryReference,
        limit: u32,
    ) -> Result<Vec<PullRequest>>;

    async fn fetch_contributors(
        &self,
        repo: &RepositoryReference,
        limit: u32,
    ) -> Result<Vec<Contributor>>;

    async fn fetch_commit_activity(&self, repo: &RepositoryReference)
        -> Result<Vec<WeeklyActivity>>;

    async fn fetch_languages(&self, repo: &RepositoryReference) -> Result<HashMap<String, u64>>;

    /// Most recent commits, each with its changed-file list.
    async fn fetch_recent_commits(
        &self,
        repo: &RepositoryReference,
        limit: u32,
    ) -> Result<Vec<RecentCommit>>;
}
