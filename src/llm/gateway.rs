use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::budget::RequestBudget;
use crate::cache::ResultCache;
use crate::error::{Error, Result};
use crate::llm::parser::parse_shaped;
use crate::llm::prompts::{self, RepoContext, SYSTEM_PROMPT};
use crate::llm::provider::{GenerationRequest, LLMProvider};
use crate::models::{
    ActivityInsight, AnalysisReport, AreaActivity, ChatTurn, CodeHealthMetrics, Contributor,
    FileActivity, FileExplanation, Issue, JobStatus, Narrative, OnboardingGuide,
    OwnershipInsight, PullRequest, RecentCommit, RemediationPlan, RepositoryReference,
    RepositorySnapshot, SecurityAudit, SpeechClip, TestingSetup, VideoAsset,
};

/// Inference operations. Each one owns a budget key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Analysis,
    Remediation,
    Onboarding,
    IssueSummary,
    PrSummary,
    TeamSummary,
    Ownership,
    Activity,
    Testing,
    Explain,
    Chat,
    Speech,
    Audit,
    Video,
}

impl Operation {
    pub fn budget_key(&self) -> &'static str {
        match self {
            Operation::Analysis => "analysis",
            Operation::Remediation | Operation::Audit => "audit",
            Operation::Onboarding => "onboarding",
            Operation::IssueSummary | Operation::PrSummary | Operation::TeamSummary => "insights",
            Operation::Ownership => "ownership",
            Operation::Activity => "activity",
            Operation::Testing => "testing",
            Operation::Explain => "explain",
            Operation::Chat => "chat",
            Operation::Speech => "speech",
            Operation::Video => "video",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Operation::Analysis => "repository analysis",
            Operation::Remediation => "remediation plan",
            Operation::Onboarding => "onboarding guide",
            Operation::IssueSummary => "issue summary",
            Operation::PrSummary => "pull request summary",
            Operation::TeamSummary => "team summary",
            Operation::Ownership => "ownership narrative",
            Operation::Activity => "activity narrative",
            Operation::Testing => "testing setup detection",
            Operation::Explain => "file explanation",
            Operation::Chat => "chat reply",
            Operation::Speech => "speech synthesis",
            Operation::Audit => "security audit",
            Operation::Video => "video synthesis",
        }
    }
}

#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Wall-clock ceiling for a single inference call.
    pub call_timeout: Duration,
    /// Thinking budget sent with deep-reasoning operations.
    pub reasoning_budget: u32,
    pub poll_interval: Duration,
    pub max_polls: u32,
    pub voice: String,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            call_timeout: Duration::from_secs(120),
            reasoning_budget: 8_192,
            poll_interval: Duration::from_secs(10),
            max_polls: 60,
            voice: "Kore".to_string(),
        }
    }
}

/// Races `future` against `limit`, reporting expiry as a timeout.
pub async fn with_timeout<T, F>(limit: Duration, future: F, operation: &str) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match tokio::time::timeout(limit, future).await {
        Ok(result) => result,
        Err(_) => Err(Error::Timeout {
            operation: operation.to_string(),
            after_ms: limit.as_millis() as u64,
        }),
    }
}

pub struct AnalysisGateway {
    provider: Arc<dyn LLMProvider>,
    budget: Arc<RequestBudget>,
    cache: Arc<ResultCache<Value>>,
    config: GatewayConfig,
}

impl AnalysisGateway {
    pub fn new(
        provider: Arc<dyn LLMProvider>,
        budget: Arc<RequestBudget>,
        cache: Arc<ResultCache<Value>>,
        config: GatewayConfig,
    ) -> Self {
        Self {
            provider,
            budget,
            cache,
            config,
        }
    }

    pub fn budget(&self) -> &RequestBudget {
        &self.budget
    }

    /// Budget, timeout and shape enforcement shared by every structured call.
    async fn structured<T>(
        &self,
        operation: Operation,
        request: GenerationRequest,
        cache_key: Option<String>,
    ) -> Result<T>
    where
        T: Serialize + DeserializeOwned,
    {
        if let Some(key) = &cache_key {
            if let Some(hit) = self.cache.get(key) {
                if let Ok(value) = serde_json::from_value(hit) {
                    tracing::debug!("Cache hit for {}: {}", operation.label(), key);
                    return Ok(value);
                }
            }
        }

        self.budget.check(operation.budget_key())?;
        let text = with_timeout(
            self.config.call_timeout,
            self.provider.generate(request),
            operation.label(),
        )
        .await?;
        let value: T = parse_shaped(&text, operation.label())?;

        if let Some(key) = cache_key {
            self.cache.set(key, serde_json::to_value(&value)?);
        }
        Ok(value)
    }

    fn shaped_request(&self, prompt: String, schema: Value) -> GenerationRequest {
        GenerationRequest::new(prompt)
            .system(SYSTEM_PROMPT)
            .schema(schema)
    }

    fn snapshot_key(kind: &str, snapshot: &RepositorySnapshot) -> String {
        format!(
            "{}:{}:{}:{}",
            kind,
            snapshot.reference,
            snapshot.metadata.updated_at.timestamp(),
            snapshot.truncated
        )
    }

    /// Key for results derived from free-form input, so an edited backlog or
    /// file misses even when its size is unchanged.
    fn content_key(kind: &str, repo: &RepositoryReference, content: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(content.as_bytes());
        let digest = format!("{:x}", hasher.finalize());
        format!("{}:{}:{}", kind, repo, &digest[..16])
    }

    pub async fn analyze_repository(&self, snapshot: &RepositorySnapshot) -> Result<AnalysisReport> {
        let ctx = RepoContext::from_snapshot(snapshot);
        let request = self.shaped_request(prompts::analysis_prompt(&ctx), prompts::analysis_schema());
        let report: AnalysisReport = self
            .structured(
                Operation::Analysis,
                request,
                Some(Self::snapshot_key("analysis", snapshot)),
            )
            .await?;
        Ok(report.sanitize())
    }

    pub async fn onboarding_guide(
        &self,
        snapshot: &RepositorySnapshot,
        report: &AnalysisReport,
    ) -> Result<OnboardingGuide> {
        let ctx = RepoContext::from_snapshot(snapshot);
        let request = self.shaped_request(
            prompts::onboarding_prompt(&ctx, report),
            prompts::onboarding_schema(),
        );
        let guide: OnboardingGuide = self
            .structured(
                Operation::Onboarding,
                request,
                Some(Self::snapshot_key("onboarding", snapshot)),
            )
            .await?;
        Ok(guide.without_enrichments().tidy())
    }

    pub async fn issue_summary(
        &self,
        repo: &RepositoryReference,
        issues: &[Issue],
    ) -> Result<Narrative> {
        let request = self.shaped_request(
            prompts::issue_summary_prompt(&repo.full_name(), issues),
            prompts::narrative_schema(),
        );
        let key = Self::content_key("issues", repo, &request.prompt);
        self.structured(Operation::IssueSummary, request, Some(key))
            .await
            .map(Narrative::tidy)
    }

    pub async fn pr_summary(
        &self,
        repo: &RepositoryReference,
        pulls: &[PullRequest],
    ) -> Result<Narrative> {
        let request = self.shaped_request(
            prompts::pr_summary_prompt(&repo.full_name(), pulls),
            prompts::narrative_schema(),
        );
        let key = Self::content_key("pulls", repo, &request.prompt);
        self.structured(Operation::PrSummary, request, Some(key))
            .await
            .map(Narrative::tidy)
    }

    pub async fn team_summary(
        &self,
        repo: &RepositoryReference,
        contributors: &[Contributor],
        health: &CodeHealthMetrics,
    ) -> Result<Narrative> {
        let request = self.shaped_request(
            prompts::team_summary_prompt(&repo.full_name(), contributors, health),
            prompts::narrative_schema(),
        );
        let key = Self::content_key("team", repo, &request.prompt);
        self.structured(Operation::TeamSummary, request, Some(key))
            .await
            .map(Narrative::tidy)
    }

    pub async fn ownership_narrative(
        &self,
        repo: &RepositoryReference,
        areas: &[AreaActivity],
    ) -> Result<OwnershipInsight> {
        let request = self.shaped_request(
            prompts::ownership_prompt(&repo.full_name(), areas),
            prompts::ownership_schema(),
        );
        self.structured(Operation::Ownership, request, None).await
    }

    pub async fn activity_narrative(
        &self,
        repo: &RepositoryReference,
        heatmap: &[FileActivity],
        commits: &[RecentCommit],
    ) -> Result<ActivityInsight> {
        let request = self.shaped_request(
            prompts::activity_prompt(&repo.full_name(), heatmap, commits),
            prompts::activity_schema(),
        );
        let mut insight: ActivityInsight =
            self.structured(Operation::Activity, request, None).await?;
        insight.heatmap = heatmap.to_vec();
        Ok(insight)
    }

    pub async fn detect_testing_setup(
        &self,
        snapshot: &RepositorySnapshot,
        commits: &[RecentCommit],
    ) -> Result<TestingSetup> {
        let ctx = RepoContext::from_snapshot(snapshot);
        let request = self.shaped_request(
            prompts::testing_prompt(&ctx, commits),
            prompts::testing_schema(),
        );
        self.structured(Operation::Testing, request, None).await
    }

    pub async fn explain_file(
        &self,
        repo: &RepositoryReference,
        path: &str,
        content: &str,
    ) -> Result<FileExplanation> {
        let request = self.shaped_request(
            prompts::explain_prompt(&repo.full_name(), path, content),
            prompts::explain_schema(),
        );
        let key = Self::content_key("explain", repo, &format!("{}\n{}", path, content));
        self.structured(Operation::Explain, request, Some(key))
            .await
    }

    /// Free-text reply grounded in the report; no shape contract.
    pub async fn chat(
        &self,
        repo: &RepositoryReference,
        report: &AnalysisReport,
        history: &[ChatTurn],
        question: &str,
    ) -> Result<String> {
        if question.trim().is_empty() {
            return Err(Error::Validation("Question is empty".to_string()));
        }
        self.budget.check(Operation::Chat.budget_key())?;

        let request = GenerationRequest::new(question)
            .system(prompts::chat_system(&repo.full_name(), report))
            .history(history.to_vec());
        let reply = with_timeout(
            self.config.call_timeout,
            self.provider.generate(request),
            Operation::Chat.label(),
        )
        .await?;

        let reply = reply.trim().to_string();
        if reply.is_empty() {
            return Err(Error::upstream("Empty chat reply"));
        }
        Ok(reply)
    }

    pub async fn narrate(&self, text: &str) -> Result<SpeechClip> {
        self.budget.check(Operation::Speech.budget_key())?;
        let clip = with_timeout(
            self.config.call_timeout,
            self.provider.synthesize_speech(text, &self.config.voice),
            Operation::Speech.label(),
        )
        .await?;
        if clip.decode()?.is_empty() {
            return Err(Error::upstream("Speech reply contained no audio"));
        }
        Ok(clip)
    }

    pub async fn security_audit(&self, snapshot: &RepositorySnapshot) -> Result<SecurityAudit> {
        let ctx = RepoContext::from_snapshot(snapshot);
        let request = self
            .shaped_request(prompts::audit_prompt(&ctx), prompts::audit_schema())
            .thinking(self.config.reasoning_budget);
        self.structured(Operation::Audit, request, None).await
    }

    pub async fn remediation_plan(
        &self,
        repo: &RepositoryReference,
        audit: &SecurityAudit,
    ) -> Result<RemediationPlan> {
        let request = self
            .shaped_request(
                prompts::remediation_prompt(&repo.full_name(), audit),
                prompts::remediation_schema(),
            )
            .thinking(self.config.reasoning_budget);
        self.structured(Operation::Remediation, request, None)
            .await
    }

    /// Submits a video job and polls it at a fixed interval. Gives up with a
    /// timeout after `max_polls` pending answers.
    pub async fn synthesize_video(&self, prompt: &str) -> Result<VideoAsset> {
        self.budget.check(Operation::Video.budget_key())?;
        let handle = with_timeout(
            self.config.call_timeout,
            self.provider.submit_video(prompt),
            "video submission",
        )
        .await?;

        for attempt in 1..=self.config.max_polls {
            tokio::time::sleep(self.config.poll_interval).await;
            let status = with_timeout(
                self.config.call_timeout,
                self.provider.poll_video(&handle),
                "video status poll",
            )
            .await?;

            match status {
                JobStatus::Pending => {
                    tracing::debug!("Video job {} pending (poll {})", handle, attempt)
                }
                JobStatus::Succeeded(asset) => return Ok(asset),
                JobStatus::Failed(reason) => {
                    return Err(Error::upstream(format!("Video job failed: {}", reason)))
                }
            }
        }

        Err(Error::Timeout {
            operation: Operation::Video.label().to_string(),
            after_ms: (self.config.poll_interval * self.config.max_polls).as_millis() as u64,
        })
    }
}
