use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{Duration as ChronoDuration, Utc};
use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::analysis::activity::{heatmap, ownership_areas};
use crate::analysis::insights::{InsightCollector, CONTRIBUTOR_SAMPLE};
use crate::analysis::run_log::RunLog;
use crate::config::PipelineConfig;
use crate::error::{Error, Result};
use crate::github::{build_tree, SourceGateway};
use crate::llm::prompts;
use crate::llm::AnalysisGateway;
use crate::models::{
    AnalysisReport, ChatTurn, EntryType, Enrichment, FileExplanation, InsightBundle,
    OnboardingGuide, RecentCommit, RemediationPlan, RepositoryReference, RepositorySnapshot,
    SecurityAudit, SpeechClip, VideoAsset,
};
use crate::storage::{AnalysisRecord, RecordStore};

const MAX_OWNERSHIP_AREAS: usize = 12;
const HEATMAP_SIZE: usize = 15;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum Stage {
    #[default]
    Idle,
    FetchingMetadata,
    FetchingStructure,
    FetchingReadme,
    RunningCoreAnalysis,
    CoreReady,
    BackgroundEnriching,
    Complete,
    Failed,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Idle => "idle",
            Stage::FetchingMetadata => "fetching metadata",
            Stage::FetchingStructure => "fetching structure",
            Stage::FetchingReadme => "fetching readme",
            Stage::RunningCoreAnalysis => "running core analysis",
            Stage::CoreReady => "core ready",
            Stage::BackgroundEnriching => "background enriching",
            Stage::Complete => "complete",
            Stage::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Snapshot of the current run, published on every transition.
#[derive(Debug, Clone, Default)]
pub struct RunState {
    pub run_id: u64,
    pub reference: Option<RepositoryReference>,
    pub stage: Stage,
    pub snapshot: Option<Arc<RepositorySnapshot>>,
    pub report: Option<Arc<AnalysisReport>>,
    pub guide: Option<Arc<OnboardingGuide>>,
    pub error: Option<Error>,
}

impl RunState {
    pub fn is_terminal(&self) -> bool {
        matches!(self.stage, Stage::Complete | Stage::Failed)
    }
}

/// Returned once the core report is available.
pub struct RunHandle {
    pub run_id: u64,
    pub report: Arc<AnalysisReport>,
    /// Background enrichment still in flight (fast mode only).
    pub background: Option<JoinHandle<()>>,
}

impl RunHandle {
    pub async fn wait(self) {
        if let Some(background) = self.background {
            if let Err(e) = background.await {
                tracing::warn!("Background enrichment for run {} aborted: {}", self.run_id, e);
            }
        }
    }
}

type CommitPrefetch = JoinHandle<Result<Vec<RecentCommit>>>;

pub struct Orchestrator {
    source: Arc<dyn SourceGateway>,
    analysis: Arc<AnalysisGateway>,
    store: Option<Arc<dyn RecordStore>>,
    config: PipelineConfig,
    state: watch::Sender<RunState>,
    generation: AtomicU64,
    log: Arc<RunLog>,
}

impl Orchestrator {
    pub fn new(
        source: Arc<dyn SourceGateway>,
        analysis: Arc<AnalysisGateway>,
        store: Option<Arc<dyn RecordStore>>,
        config: PipelineConfig,
    ) -> Self {
        let (state, _) = watch::channel(RunState::default());
        Self {
            source,
            analysis,
            store,
            config,
            state,
            generation: AtomicU64::new(0),
            log: Arc::new(RunLog::default()),
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<RunState> {
        self.state.subscribe()
    }

    pub fn state(&self) -> RunState {
        self.state.borrow().clone()
    }

    pub fn log(&self) -> &RunLog {
        &self.log
    }

    pub fn is_current(&self, run_id: u64) -> bool {
        self.state.borrow().run_id == run_id
    }

    /// Starts a new run, superseding any run in progress. Returns at
    /// `CoreReady`; in fast mode enrichment continues on the returned handle.
    pub async fn submit(self: &Arc<Self>, input: &str) -> Result<RunHandle> {
        let repo = self.source.resolve(input)?;
        self.enforce_daily_limit().await?;

        let run_id = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let started = self.state.send_if_modified(|state| {
            if state.run_id > run_id {
                return false;
            }
            *state = RunState {
                run_id,
                reference: Some(repo.clone()),
                stage: Stage::FetchingMetadata,
                ..RunState::default()
            };
            true
        });
        if started {
            self.log
                .record(run_id, Stage::FetchingMetadata, format!("Analyzing {}", repo));
        }

        let (snapshot, report, commits) = match self.run_core(run_id, &repo).await {
            Ok(parts) => parts,
            Err(e) => {
                self.fail(run_id, &e);
                return Err(e);
            }
        };

        let published = self.update(run_id, |state| {
            state.stage = Stage::CoreReady;
            state.snapshot = Some(Arc::clone(&snapshot));
            state.report = Some(Arc::clone(&report));
        });
        if !published {
            tracing::info!("Run {} superseded; discarding its results", run_id);
            return Ok(RunHandle {
                run_id,
                report,
                background: None,
            });
        }
        self.log
            .record(run_id, Stage::CoreReady, "Core analysis ready");

        let background = if self.config.fast_mode {
            let this = Arc::clone(self);
            let report = Arc::clone(&report);
            Some(tokio::spawn(async move {
                this.enrich(run_id, repo, snapshot, report, commits).await
            }))
        } else {
            self.enrich(run_id, repo, snapshot, Arc::clone(&report), commits)
                .await;
            None
        };

        Ok(RunHandle {
            run_id,
            report,
            background,
        })
    }

    async fn run_core(
        &self,
        run_id: u64,
        repo: &RepositoryReference,
    ) -> Result<(Arc<RepositorySnapshot>, Arc<AnalysisReport>, CommitPrefetch)> {
        let readme_task = {
            let source = Arc::clone(&self.source);
            let repo = repo.clone();
            tokio::spawn(async move { source.fetch_readme(&repo).await })
        };
        let commits_task: CommitPrefetch = {
            let source = Arc::clone(&self.source);
            let repo = repo.clone();
            let sample = self.config.commit_sample;
            tokio::spawn(async move { source.fetch_recent_commits(&repo, sample).await })
        };
        {
            // Warms the structural cache for a later insights request.
            let source = Arc::clone(&self.source);
            let repo = repo.clone();
            tokio::spawn(async move {
                if let Err(e) = source.fetch_contributors(&repo, CONTRIBUTOR_SAMPLE).await {
                    tracing::debug!("Contributor prefetch for {} failed: {}", repo, e);
                }
            });
        }

        let metadata = self.source.fetch_metadata(repo).await?;

        self.advance(
            run_id,
            Stage::FetchingStructure,
            format!("Fetching tree of {}", metadata.default_branch),
        );
        let limit = self
            .config
            .fast_mode
            .then_some(self.config.max_tree_entries);
        let listing = self
            .source
            .fetch_tree(repo, &metadata.default_branch, limit)
            .await?;
        let tree = build_tree(&listing.entries);
        let paths = listing
            .entries
            .iter()
            .filter(|e| e.entry_type == EntryType::Blob)
            .map(|e| e.path.clone())
            .collect();

        self.advance(run_id, Stage::FetchingReadme, "Waiting for README");
        let readme = match readme_task.await {
            Ok(Ok(text)) => Some(text),
            Ok(Err(e)) => {
                self.log.record_failure(
                    run_id,
                    Stage::FetchingReadme,
                    format!("README unavailable, continuing without it: {}", e),
                );
                None
            }
            Err(e) => {
                self.log.record_failure(
                    run_id,
                    Stage::FetchingReadme,
                    format!("README fetch aborted: {}", e),
                );
                None
            }
        };

        let snapshot = Arc::new(RepositorySnapshot {
            reference: repo.clone(),
            metadata,
            tree,
            paths,
            truncated: listing.truncated,
            readme,
        });

        self.advance(run_id, Stage::RunningCoreAnalysis, "Running core analysis");
        let report = self.analysis.analyze_repository(&snapshot).await?;

        Ok((snapshot, Arc::new(report), commits_task))
    }

    async fn enrich(
        &self,
        run_id: u64,
        repo: RepositoryReference,
        snapshot: Arc<RepositorySnapshot>,
        report: Arc<AnalysisReport>,
        commits: CommitPrefetch,
    ) {
        if !self.advance(run_id, Stage::BackgroundEnriching, "Building onboarding guide") {
            return;
        }

        match self.analysis.onboarding_guide(&snapshot, &report).await {
            Ok(guide) => {
                let guide = Arc::new(guide);
                if self.update(run_id, |state| state.guide = Some(guide)) {
                    self.enrich_guide(run_id, &repo, &snapshot, commits).await;
                }
            }
            Err(e) => self.log.record_failure(
                run_id,
                Stage::BackgroundEnriching,
                format!("Onboarding guide failed: {}", e),
            ),
        }

        if self.advance(run_id, Stage::Complete, "Run complete") {
            self.persist(&repo, report);
        }
    }

    async fn enrich_guide(
        &self,
        run_id: u64,
        repo: &RepositoryReference,
        snapshot: &RepositorySnapshot,
        commits: CommitPrefetch,
    ) {
        let commits = match commits.await {
            Ok(Ok(commits)) if !commits.is_empty() => commits,
            Ok(Ok(_)) => {
                self.log.record(
                    run_id,
                    Stage::BackgroundEnriching,
                    "No recent commits; skipping guide enrichments",
                );
                return;
            }
            Ok(Err(e)) => {
                self.log.record_failure(
                    run_id,
                    Stage::BackgroundEnriching,
                    format!("Recent commits unavailable: {}", e),
                );
                return;
            }
            Err(e) => {
                self.log.record_failure(
                    run_id,
                    Stage::BackgroundEnriching,
                    format!("Recent commit fetch aborted: {}", e),
                );
                return;
            }
        };

        let areas = ownership_areas(&commits, MAX_OWNERSHIP_AREAS);
        let hot_files = heatmap(&commits, HEATMAP_SIZE);

        let ownership = async {
            let result = self
                .analysis
                .ownership_narrative(repo, &areas)
                .await
                .map(Enrichment::Ownership);
            self.merge(run_id, "ownership", result);
        };
        let activity = async {
            let result = self
                .analysis
                .activity_narrative(repo, &hot_files, &commits)
                .await
                .map(Enrichment::Activity);
            self.merge(run_id, "activity", result);
        };
        let testing = async {
            let result = self
                .analysis
                .detect_testing_setup(snapshot, &commits)
                .await
                .map(Enrichment::Testing);
            self.merge(run_id, "testing", result);
        };
        tokio::join!(ownership, activity, testing);
    }

    /// `step` names the enrichment only when it failed to arrive.
    fn merge(&self, run_id: u64, step: &str, result: Result<Enrichment>) {
        match result {
            Ok(enrichment) => {
                let name = enrichment.name();
                let merged = self.update(run_id, |state| {
                    if let Some(guide) = state.guide.as_mut() {
                        Arc::make_mut(guide).merge(enrichment);
                    }
                });
                if merged {
                    self.log.record(
                        run_id,
                        Stage::BackgroundEnriching,
                        format!("Merged {} enrichment", name),
                    );
                }
            }
            Err(e) => self.log.record_failure(
                run_id,
                Stage::BackgroundEnriching,
                format!("Skipped {} enrichment: {}", step, e),
            ),
        }
    }

    /// Applies `apply` only while `run_id` is still the current run.
    fn update<F>(&self, run_id: u64, apply: F) -> bool
    where
        F: FnOnce(&mut RunState),
    {
        self.state.send_if_modified(|state| {
            if state.run_id != run_id {
                return false;
            }
            apply(state);
            true
        })
    }

    fn advance(&self, run_id: u64, stage: Stage, message: impl Into<String>) -> bool {
        let applied = self.update(run_id, |state| state.stage = stage);
        if applied {
            self.log.record(run_id, stage, message);
        }
        applied
    }

    fn fail(&self, run_id: u64, error: &Error) {
        let mut failed_at = Stage::Idle;
        let applied = self.update(run_id, |state| {
            failed_at = state.stage;
            let reference = state.reference.take();
            *state = RunState {
                run_id,
                reference,
                stage: Stage::Failed,
                error: Some(error.clone()),
                ..RunState::default()
            };
        });
        if applied {
            self.log.record_failure(
                run_id,
                failed_at,
                format!("{} [{}]", error, error.kind()),
            );
        }
    }

    fn persist(&self, repo: &RepositoryReference, report: Arc<AnalysisReport>) {
        let (Some(store), Some(user_id)) = (self.store.clone(), self.config.user_id.clone()) else {
            return;
        };
        let repo = repo.clone();
        tokio::spawn(async move {
            match store.save_record(&user_id, &repo, &report).await {
                Ok(()) => tracing::debug!("Recorded analysis of {} for {}", repo, user_id),
                Err(e) => tracing::warn!("Failed to record analysis of {}: {}", repo, e),
            }
        });
    }

    async fn enforce_daily_limit(&self) -> Result<()> {
        let limit = self.config.daily_usage_limit;
        if limit == 0 {
            return Ok(());
        }
        let (Some(store), Some(user_id)) = (&self.store, &self.config.user_id) else {
            tracing::debug!("Daily limit set without a record store and user id; not enforced");
            return Ok(());
        };

        let now = Utc::now();
        let usage = match store.count_since(user_id, now - ChronoDuration::hours(24)).await {
            Ok(usage) => usage,
            Err(e) => {
                tracing::warn!("Usage count unavailable, daily limit not enforced: {}", e);
                return Ok(());
            }
        };
        if usage.count < limit {
            return Ok(());
        }

        let retry_after_ms = usage
            .oldest
            .map(|oldest| (oldest + ChronoDuration::hours(24) - now).num_milliseconds().max(0) as u64)
            .unwrap_or(0);
        Err(Error::RateLimitExceeded {
            key: "daily".to_string(),
            retry_after_ms,
        })
    }

    fn current(&self) -> Result<(Arc<RepositorySnapshot>, Arc<AnalysisReport>)> {
        let state = self.state.borrow();
        match (&state.snapshot, &state.report) {
            (Some(snapshot), Some(report)) => Ok((Arc::clone(snapshot), Arc::clone(report))),
            _ => Err(Error::Validation(
                "No analysis available; submit a repository first".to_string(),
            )),
        }
    }

    pub async fn insights(&self, input: &str) -> Result<InsightBundle> {
        let repo = self.source.resolve(input)?;
        InsightCollector::new(Arc::clone(&self.source), Arc::clone(&self.analysis))
            .collect(&repo)
            .await
    }

    /// Most recent stored analysis of `input`, from any user.
    pub async fn previous_analysis(&self, input: &str) -> Result<Option<AnalysisRecord>> {
        let repo = self.source.resolve(input)?;
        match &self.store {
            Some(store) => store.latest_record(&repo).await,
            None => Ok(None),
        }
    }

    pub async fn explain_file(&self, input: &str, path: &str) -> Result<FileExplanation> {
        let repo = self.source.resolve(input)?;
        let content = self.source.fetch_file_content(&repo, path).await?;
        self.analysis.explain_file(&repo, path, &content).await
    }

    /// Answers `question` grounded in the current run's report.
    pub async fn chat(&self, history: &[ChatTurn], question: &str) -> Result<String> {
        let (snapshot, report) = self.current()?;
        self.analysis
            .chat(&snapshot.reference, &report, history, question)
            .await
    }

    pub async fn security_audit(&self) -> Result<SecurityAudit> {
        let (snapshot, _) = self.current()?;
        self.analysis.security_audit(&snapshot).await
    }

    pub async fn remediation_plan(&self, audit: &SecurityAudit) -> Result<RemediationPlan> {
        let (snapshot, _) = self.current()?;
        self.analysis
            .remediation_plan(&snapshot.reference, audit)
            .await
    }

    pub async fn narrate_summary(&self) -> Result<SpeechClip> {
        let (snapshot, report) = self.current()?;
        let script = prompts::narration_script(&snapshot.reference.full_name(), &report);
        self.analysis.narrate(&script).await
    }

    pub async fn synthesize_video(&self) -> Result<VideoAsset> {
        let (snapshot, report) = self.current()?;
        let prompt = prompts::video_prompt(&snapshot.reference.full_name(), &report);
        self.analysis.synthesize_video(&prompt).await
    }
}
