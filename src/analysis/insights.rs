use std::sync::Arc;

use futures::future::join_all;

use crate::analysis::activity::{health_metrics, parse_manifest, MANIFESTS};
use crate::error::Result;
use crate::github::SourceGateway;
use crate::llm::AnalysisGateway;
use crate::models::{Dependency, InsightBundle, Narrative, RepositoryReference};

pub const ISSUE_SAMPLE: u32 = 30;
pub const PULL_SAMPLE: u32 = 30;
pub const CONTRIBUTOR_SAMPLE: u32 = 30;

/// Builds the insight bundle for one repository. Raw provider data is
/// required; each narrative section is optional and fails independently.
pub struct InsightCollector {
    source: Arc<dyn SourceGateway>,
    analysis: Arc<AnalysisGateway>,
}

impl InsightCollector {
    pub fn new(source: Arc<dyn SourceGateway>, analysis: Arc<AnalysisGateway>) -> Self {
        Self { source, analysis }
    }

    pub async fn collect(&self, repo: &RepositoryReference) -> Result<InsightBundle> {
        tracing::info!("Collecting insights for {}", repo);

        let (metadata, issues, pull_requests, contributors, weeks, languages) = tokio::join!(
            self.source.fetch_metadata(repo),
            self.source.fetch_issues(repo, ISSUE_SAMPLE),
            self.source.fetch_pull_requests(repo, PULL_SAMPLE),
            self.source.fetch_contributors(repo, CONTRIBUTOR_SAMPLE),
            self.source.fetch_commit_activity(repo),
            self.source.fetch_languages(repo),
        );
        let issues = issues?;
        let pull_requests = pull_requests?;
        let contributors = contributors?;
        // Statistics may still be computing upstream; treat as no history.
        let weeks = weeks.unwrap_or_else(|e| {
            tracing::warn!("Commit activity unavailable for {}: {}", repo, e);
            Vec::new()
        });
        let languages = languages.unwrap_or_default();

        let open_pulls = pull_requests.iter().filter(|p| p.state == "open").count() as u32;
        // The provider's open count covers issues and pull requests together;
        // the samples above are capped.
        let open_issues = match metadata {
            Ok(metadata) => metadata.open_issues_count.saturating_sub(open_pulls),
            Err(e) => {
                tracing::warn!("Metadata unavailable for {}, using sampled backlog: {}", repo, e);
                issues.len() as u32
            }
        };
        let health = health_metrics(&weeks, &contributors, open_issues, open_pulls);
        let dependencies = self.dependencies(repo).await;

        let (issue_summary, pr_summary, team_summary) = tokio::join!(
            self.analysis.issue_summary(repo, &issues),
            self.analysis.pr_summary(repo, &pull_requests),
            self.analysis.team_summary(repo, &contributors, &health),
        );

        Ok(InsightBundle {
            issue_summary: optional_section("issue summary", issue_summary),
            pr_summary: optional_section("pull request summary", pr_summary),
            team_summary: optional_section("team summary", team_summary),
            issues,
            pull_requests,
            contributors,
            dependencies,
            languages,
            health,
        })
    }

    /// Every supported manifest at the repository root; missing ones are
    /// skipped.
    async fn dependencies(&self, repo: &RepositoryReference) -> Vec<Dependency> {
        let fetches = MANIFESTS.iter().map(|(path, ecosystem)| async move {
            match self.source.fetch_file_content(repo, path).await {
                Ok(content) => parse_manifest(*ecosystem, &content),
                Err(e) => {
                    tracing::debug!("No {} in {}: {}", path, repo, e);
                    Vec::new()
                }
            }
        });
        join_all(fetches).await.into_iter().flatten().collect()
    }
}

fn optional_section(name: &str, result: Result<Narrative>) -> Option<Narrative> {
    match result {
        Ok(narrative) => Some(narrative),
        Err(e) => {
            tracing::warn!("Skipping {}: {}", name, e);
            None
        }
    }
}
