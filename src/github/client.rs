use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use base64::Engine;
use futures::future::join_all;
use reqwest::{header, Client, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::cache::ResultCache;
use crate::error::{Error, Result};
use crate::github::gateway::SourceGateway;
use crate::github::paginator::Paginator;
use crate::models::{
    CommitSummary, Commit, Contributor, Issue, PullRequest, RawTreeEntry, RecentCommit,
    RepositoryMetadata, RepositoryReference, TreeListing, WeeklyActivity,
};

const PLACEHOLDER_TOKENS: &[&str] = &["", "your_token_here", "changeme", "ghp_xxx"];

pub struct GitHubClient {
    client: Client,
    base_url: String,
    cache: Arc<ResultCache<Value>>,
}

#[derive(Deserialize)]
struct TreeResponse {
    tree: Vec<RawTreeEntry>,
    #[serde(default)]
    truncated: bool,
}

#[derive(Deserialize)]
struct ContentResponse {
    #[serde(default)]
    content: String,
    #[serde(default)]
    encoding: Option<String>,
    #[serde(default)]
    size: u64,
}

impl GitHubClient {
    /// Sends a bearer token only when a real one is configured.
    pub fn new(token: Option<&str>, cache: Arc<ResultCache<Value>>) -> Result<Self> {
        let mut headers = header::HeaderMap::new();
        match token.map(str::trim) {
            Some(token) if !PLACEHOLDER_TOKENS.contains(&token) => {
                headers.insert(
                    header::AUTHORIZATION,
                    header::HeaderValue::from_str(&format!("Bearer {}", token))?,
                );
            }
            _ => tracing::info!("No GitHub token configured, using anonymous access"),
        }
        headers.insert(
            header::ACCEPT,
            header::HeaderValue::from_static("application/vnd.github+json"),
        );
        headers.insert(
            "X-GitHub-Api-Version",
            header::HeaderValue::from_static("2022-11-28"),
        );
        headers.insert(
            header::USER_AGENT,
            header::HeaderValue::from_static("repolens/0.1"),
        );

        let client = Client::builder()
            .default_headers(headers)
            .timeout(std::time::Duration::from_secs(30))
            .build()?;

        Ok(Self {
            client,
            base_url: "https://api.github.com".to_string(),
            cache,
        })
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    fn repo_url(&self, repo: &RepositoryReference) -> String {
        format!("{}/repos/{}/{}", self.base_url, repo.owner(), repo.name())
    }

    async fn get_json<T: DeserializeOwned>(&self, url: &str) -> Result<T> {
        tracing::debug!("GET {}", url);
        let response = self.client.get(url).send().await?;
        let response = ensure_success(response).await?;
        Ok(response.json().await?)
    }

    async fn cached<T, F, Fut>(&self, key: String, fetch: F) -> Result<T>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        if let Some(hit) = self.cache.get(&key) {
            match serde_json::from_value(hit) {
                Ok(value) => {
                    tracing::debug!("Cache hit: {}", key);
                    return Ok(value);
                }
                Err(e) => {
                    tracing::warn!("Discarding unreadable cache entry {}: {}", key, e);
                    self.cache.delete(&key);
                }
            }
        }

        let value = fetch().await?;
        self.cache.set(key, serde_json::to_value(&value)?);
        Ok(value)
    }

    async fn fetch_content(&self, url: &str) -> Result<String> {
        let raw: Value = self.get_json(url).await?;
        if raw.is_array() {
            return Err(Error::Validation(format!(
                "{} is a directory, not a file",
                url
            )));
        }
        let content: ContentResponse = serde_json::from_value(raw)?;
        match content.encoding.as_deref() {
            Some("base64") => decode_content(&content.content),
            Some("none") | None if content.content.is_empty() && content.size > 0 => {
                Err(Error::upstream(format!(
                    "File is too large to fetch inline ({} bytes)",
                    content.size
                )))
            }
            _ => Ok(content.content),
        }
    }
}

#[async_trait]
impl SourceGateway for GitHubClient {
    async fn fetch_metadata(&self, repo: &RepositoryReference) -> Result<RepositoryMetadata> {
        let url = self.repo_url(repo);
        tracing::info!("Fetching repository metadata: {}", repo);
        self.cached(format!("meta:{}", repo), || self.get_json(&url))
            .await
    }

    async fn fetch_tree(
        &self,
        repo: &RepositoryReference,
        branch: &str,
        limit: Option<usize>,
    ) -> Result<TreeListing> {
        let url = format!("{}/git/trees/{}?recursive=1", self.repo_url(repo), branch);
        let key = format!("tree:{}@{}:{:?}", repo, branch, limit);
        self.cached(key, || async {
            let response: TreeResponse = self.get_json(&url).await?;
            let listing = TreeListing {
                entries: response.tree,
                truncated: response.truncated,
            }
            .capped(limit);
            tracing::info!(
                "Fetched {} tree entries for {} (truncated: {})",
                listing.entries.len(),
                repo,
                listing.truncated
            );
            Ok(listing)
        })
        .await
    }

    async fn fetch_readme(&self, repo: &RepositoryReference) -> Result<String> {
        let url = format!("{}/readme", self.repo_url(repo));
        self.cached(format!("readme:{}", repo), || self.fetch_content(&url))
            .await
    }

    async fn fetch_file_content(&self, repo: &RepositoryReference, path: &str) -> Result<String> {
        let encoded = path.trim_matches('/').replace(' ', "%20");
        let url = format!("{}/contents/{}", self.repo_url(repo), encoded);
        self.cached(format!("file:{}:{}", repo, path), || self.fetch_content(&url))
            .await
    }

    async fn fetch_issues(&self, repo: &RepositoryReference, limit: u32) -> Result<Vec<Issue>> {
        let url = format!("{}/issues?state=open", self.repo_url(repo));
        self.cached(format!("issues:{}:{}", repo, limit), || async {
            Paginator::new(&self.client)
                .fetch_filtered(&url, limit, |issue: &Issue| !issue.is_pull_request())
                .await
        })
        .await
    }

    async fn fetch_pull_requests(
        &self,
        repo: &RepositoryReference,
        limit: u32,
    ) -> Result<Vec<PullRequest>> {
        let url = format!("{}/pulls?state=all&sort=updated", self.repo_url(repo));
        self.cached(format!("pulls:{}:{}", repo, limit), || {
            Paginator::new(&self.client).fetch_limited(&url, limit)
        })
        .await
    }

    async fn fetch_contributors(
        &self,
        repo: &RepositoryReference,
        limit: u32,
    ) -> Result<Vec<Contributor>> {
        let url = format!("{}/contributors", self.repo_url(repo));
        self.cached(format!("contributors:{}:{}", repo, limit), || {
            Paginator::new(&self.client).fetch_limited(&url, limit)
        })
        .await
    }

    async fn fetch_commit_activity(
        &self,
        repo: &RepositoryReference,
    ) -> Result<Vec<WeeklyActivity>> {
        let key = format!("activity:{}", repo);
        if let Some(hit) = self.cache.get(&key) {
            return Ok(serde_json::from_value(hit)?);
        }

        let url = format!("{}/stats/commit_activity", self.repo_url(repo));
        let response = self.client.get(&url).send().await?;
        if response.status() == StatusCode::ACCEPTED {
            // Statistics are still being computed upstream; not cached.
            tracing::debug!("Commit activity for {} not ready yet", repo);
            return Ok(Vec::new());
        }
        let response = ensure_success(response).await?;
        let weeks: Vec<WeeklyActivity> = response.json().await?;
        self.cache.set(key, serde_json::to_value(&weeks)?);
        Ok(weeks)
    }

    async fn fetch_languages(&self, repo: &RepositoryReference) -> Result<HashMap<String, u64>> {
        let url = format!("{}/languages", self.repo_url(repo));
        self.cached(format!("languages:{}", repo), || self.get_json(&url))
            .await
    }

    async fn fetch_recent_commits(
        &self,
        repo: &RepositoryReference,
        limit: u32,
    ) -> Result<Vec<RecentCommit>> {
        let list_url = format!("{}/commits", self.repo_url(repo));
        self.cached(format!("commits:{}:{}", repo, limit), || async {
            let summaries: Vec<CommitSummary> = Paginator::new(&self.client)
                .fetch_limited(&list_url, limit)
                .await?;

            let details = join_all(summaries.iter().map(|summary| {
                let url = format!("{}/commits/{}", self.repo_url(repo), summary.sha);
                async move { self.get_json::<Commit>(&url).await }
            }))
            .await;

            let mut commits = Vec::with_capacity(details.len());
            for (summary, detail) in summaries.iter().zip(details) {
                match detail {
                    Ok(commit) => commits.push(RecentCommit::from(commit)),
                    Err(e) => tracing::warn!(
                        "Skipping commit {}: {}",
                        &summary.sha[..7.min(summary.sha.len())],
                        e
                    ),
                }
            }
            Ok(commits)
        })
        .await
    }
}

/// Maps a non-success reply to a provider error with actionable guidance.
pub(crate) async fn ensure_success(response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let context = response.url().path().to_string();
    let quota_exhausted = response
        .headers()
        .get("x-ratelimit-remaining")
        .and_then(|v| v.to_str().ok())
        .map(|v| v.trim() == "0")
        .unwrap_or(false);
    let body = response.text().await.unwrap_or_default();
    Err(provider_failure(status.as_u16(), &body, quota_exhausted, &context))
}

pub(crate) fn provider_failure(
    status: u16,
    body: &str,
    quota_exhausted: bool,
    context: &str,
) -> Error {
    let upstream = serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| v.get("message").and_then(Value::as_str).map(str::to_string))
        .unwrap_or_else(|| body.trim().to_string());

    let message = match status {
        404 => format!(
            "Not found: {} ({}). Check that the reference is owner/name; private repositories require GITHUB_TOKEN.",
            context, upstream
        ),
        403 | 429 if quota_exhausted => format!(
            "GitHub API quota exhausted while requesting {}. Set GITHUB_TOKEN to raise the limit.",
            context
        ),
        403 | 429 => format!(
            "Access denied for {} ({}). Supplying GITHUB_TOKEN may grant access.",
            context, upstream
        ),
        _ => format!("GitHub request for {} failed: {}", context, upstream),
    };

    Error::SourceProvider { status, message }
}

pub(crate) fn decode_content(encoded: &str) -> Result<String> {
    let compact: String = encoded.chars().filter(|c| !c.is_whitespace()).collect();
    let bytes = base64::engine::general_purpose::STANDARD
        .decode(compact)
        .map_err(|e| Error::upstream(format!("Undecodable file content: {}", e)))?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}
