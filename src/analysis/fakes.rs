//! In-memory gateways for orchestrator and collector tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use serde_json::json;

use crate::error::{Error, Result};
use crate::github::SourceGateway;
use crate::llm::{GenerationRequest, LLMProvider};
use crate::models::{
    Contributor, Issue, JobStatus, PullRequest, RawTreeEntry, RecentCommit, RepositoryMetadata,
    RepositoryReference, SpeechClip, TreeListing, WeeklyActivity,
};

#[derive(Default)]
pub(crate) struct FakeSource {
    pub calls: AtomicUsize,
    pub fail_readme: bool,
    pub fail_metadata: bool,
    pub no_commits: bool,
    /// Repositories with this name answer metadata requests slowly.
    pub slow_name: Option<String>,
    /// Every limit passed to `fetch_tree`, in call order.
    pub tree_limits: Mutex<Vec<Option<usize>>>,
}

impl FakeSource {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn hit(&self) {
        self.calls.fetch_add(1, Ordering::SeqCst);
    }
}

fn not_found(what: &str) -> Error {
    Error::SourceProvider {
        status: 404,
        message: format!("{} not found", what),
    }
}

#[async_trait]
impl SourceGateway for FakeSource {
    async fn fetch_metadata(&self, repo: &RepositoryReference) -> Result<RepositoryMetadata> {
        self.hit();
        if self.slow_name.as_deref() == Some(repo.name()) {
            tokio::time::sleep(Duration::from_millis(150)).await;
        }
        if self.fail_metadata {
            return Err(not_found("Repository"));
        }
        Ok(serde_json::from_value(json!({
            "full_name": repo.full_name(),
            "description": "Widgets as a service",
            "default_branch": "main",
            "stargazers_count": 12,
            "open_issues_count": 120,
            "language": "Rust",
            "license": null,
            "html_url": format!("https://github.com/{}", repo),
            "updated_at": "2024-05-01T00:00:00Z"
        }))?)
    }

    async fn fetch_tree(
        &self,
        _repo: &RepositoryReference,
        _branch: &str,
        limit: Option<usize>,
    ) -> Result<TreeListing> {
        self.hit();
        self.tree_limits.lock().unwrap().push(limit);
        let entries = vec![
            RawTreeEntry::blob("README.md", 40),
            RawTreeEntry::tree("src"),
            RawTreeEntry::blob("src/main.rs", 200),
            RawTreeEntry::blob("src/lib.rs", 400),
            RawTreeEntry::tree("tests"),
            RawTreeEntry::blob("tests/api.rs", 120),
        ];
        Ok(TreeListing {
            entries,
            truncated: false,
        }
        .capped(limit))
    }

    async fn fetch_readme(&self, _repo: &RepositoryReference) -> Result<String> {
        self.hit();
        if self.fail_readme {
            return Err(not_found("README"));
        }
        Ok("# Widgets\nRun `cargo run`.".to_string())
    }

    async fn fetch_file_content(&self, _repo: &RepositoryReference, path: &str) -> Result<String> {
        self.hit();
        match path {
            "Cargo.toml" => Ok("[dependencies]\ntokio = \"1\"\n".to_string()),
            "src/lib.rs" => Ok("pub fn widget() {}".to_string()),
            _ => Err(not_found(path)),
        }
    }

    async fn fetch_issues(&self, _repo: &RepositoryReference, _limit: u32) -> Result<Vec<Issue>> {
        self.hit();
        Ok(serde_json::from_value(json!([{
            "number": 7,
            "title": "Crash on empty input",
            "state": "open",
            "user": { "login": "ana" },
            "created_at": "2024-04-01T00:00:00Z"
        }]))?)
    }

    async fn fetch_pull_requests(
        &self,
        _repo: &RepositoryReference,
        _limit: u32,
    ) -> Result<Vec<PullRequest>> {
        self.hit();
        Ok(serde_json::from_value(json!([
            { "number": 8, "title": "Fix crash", "state": "open", "user": null,
              "created_at": "2024-04-02T00:00:00Z", "merged_at": null },
            { "number": 5, "title": "Docs", "state": "closed", "user": null,
              "created_at": "2024-03-02T00:00:00Z", "merged_at": "2024-03-03T00:00:00Z" }
        ]))?)
    }

    async fn fetch_contributors(
        &self,
        _repo: &RepositoryReference,
        _limit: u32,
    ) -> Result<Vec<Contributor>> {
        self.hit();
        Ok(vec![
            Contributor { login: "ana".to_string(), contributions: 70, avatar_url: None },
            Contributor { login: "ben".to_string(), contributions: 30, avatar_url: None },
        ])
    }

    async fn fetch_commit_activity(
        &self,
        _repo: &RepositoryReference,
    ) -> Result<Vec<WeeklyActivity>> {
        self.hit();
        Ok((0..10)
            .map(|week| WeeklyActivity { week, total: 3, days: Vec::new() })
            .collect())
    }

    async fn fetch_languages(&self, _repo: &RepositoryReference) -> Result<HashMap<String, u64>> {
        self.hit();
        Ok(HashMap::from([("Rust".to_string(), 4_000)]))
    }

    async fn fetch_recent_commits(
        &self,
        _repo: &RepositoryReference,
        _limit: u32,
    ) -> Result<Vec<RecentCommit>> {
        self.hit();
        if self.no_commits {
            return Ok(Vec::new());
        }
        Ok(vec![
            RecentCommit {
                sha: "a1".to_string(),
                author: "ana".to_string(),
                message: "Add widget cache".to_string(),
                committed_at: Utc.with_ymd_and_hms(2024, 4, 30, 9, 0, 0).unwrap(),
                files: vec!["src/lib.rs".to_string(), "tests/api.rs".to_string()],
            },
            RecentCommit {
                sha: "b2".to_string(),
                author: "ben".to_string(),
                message: "Update docs".to_string(),
                committed_at: Utc.with_ymd_and_hms(2024, 4, 29, 9, 0, 0).unwrap(),
                files: vec!["README.md".to_string()],
            },
        ])
    }
}

/// Answers by the shape each request asks for.
#[derive(Default)]
pub(crate) struct FakeLlm {
    pub calls: AtomicUsize,
    pub fail_analysis: bool,
    pub fail_ownership: bool,
    pub fail_narratives: bool,
}

impl FakeLlm {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

fn requires(request: &GenerationRequest, field: &str) -> bool {
    request
        .schema
        .as_ref()
        .and_then(|s| s["required"].as_array())
        .is_some_and(|fields| fields.iter().any(|f| f == field))
}

#[async_trait]
impl LLMProvider for FakeLlm {
    async fn generate(&self, request: GenerationRequest) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        let reply = if requires(&request, "scorecard") {
            if self.fail_analysis {
                return Err(Error::upstream("model overloaded"));
            }
            json!({
                "summary": "A widget service.",
                "tech_stack": ["Rust"],
                "scorecard": { "maintenance": 80, "documentation": 70, "innovation": 60, "security": 90 },
                "roadmap": [{ "title": "Add CI", "description": "Run tests on push", "priority": "high" }],
                "architecture": {
                    "nodes": [{ "id": "cli", "label": "CLI" }, { "id": "core", "label": "Core" }],
                    "edges": [{ "source": "cli", "target": "core" }, { "source": "core", "target": "ghost" }]
                },
                "deployment": [],
                "tour": [{ "file": "src/lib.rs", "title": "Core", "explanation": "Start here" }]
            })
        } else if requires(&request, "quick_start") {
            json!({
                "quick_start": "  cargo run  ",
                "critical_files": [{ "path": "src/lib.rs", "reason": "core logic" }],
                "recommended_path": ["README.md", "src/lib.rs"],
                "common_tasks": [],
                "setup_instructions": "Install Rust"
            })
        } else if requires(&request, "areas") {
            if self.fail_ownership {
                return Err(Error::upstream("ownership unavailable"));
            }
            json!({ "summary": "ana owns src", "areas": [{ "area": "src", "owners": ["ana"] }] })
        } else if requires(&request, "focus_areas") {
            json!({ "summary": "Caching work", "focus_areas": ["src"] })
        } else if requires(&request, "test_directories") {
            json!({ "framework": "cargo test", "test_command": "cargo test",
                    "test_directories": ["tests"], "notes": "" })
        } else if requires(&request, "highlights") {
            if self.fail_narratives {
                return Err(Error::upstream("narratives unavailable"));
            }
            json!({ "summary": "Quiet backlog", "highlights": [] })
        } else if requires(&request, "vulnerabilities") {
            json!({ "overall_risk": "low", "vulnerabilities": [], "recommendations": ["Pin deps"] })
        } else {
            return Ok("Start with src/lib.rs.".to_string());
        };
        Ok(reply.to_string())
    }

    async fn synthesize_speech(&self, _text: &str, _voice: &str) -> Result<SpeechClip> {
        Ok(SpeechClip {
            mime_type: "audio/wav".to_string(),
            data_base64: "UklGRg==".to_string(),
        })
    }

    async fn submit_video(&self, _prompt: &str) -> Result<String> {
        Err(Error::upstream("video disabled"))
    }

    async fn poll_video(&self, _handle: &str) -> Result<JobStatus> {
        Ok(JobStatus::Pending)
    }

    fn name(&self) -> &str {
        "fake"
    }
}
