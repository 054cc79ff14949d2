use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Actor {
    pub login: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Label {
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Issue {
    pub number: u64,
    pub title: String,
    pub state: String,
    pub user: Option<Actor>,
    #[serde(default)]
    pub comments: u32,
    #[serde(default)]
    pub labels: Vec<Label>,
    pub created_at: DateTime<Utc>,
    /// Present when the issues endpoint hands back a pull request.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pull_request: Option<serde_json::Value>,
}

impl Issue {
    pub fn is_pull_request(&self) -> bool {
        self.pull_request.is_some()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PullRequest {
    pub number: u64,
    pub title: String,
    pub state: String,
    pub user: Option<Actor>,
    #[serde(default)]
    pub draft: bool,
    pub created_at: DateTime<Utc>,
    pub merged_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Contributor {
    pub login: String,
    pub contributions: u32,
    #[serde(default)]
    pub avatar_url: Option<String>,
}

/// One week of the provider's commit-activity statistics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WeeklyActivity {
    pub week: i64,
    pub total: u32,
    #[serde(default)]
    pub days: Vec<u32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Ecosystem {
    Npm,
    Cargo,
    Pip,
    Go,
}

impl std::fmt::Display for Ecosystem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Ecosystem::Npm => write!(f, "npm"),
            Ecosystem::Cargo => write!(f, "cargo"),
            Ecosystem::Pip => write!(f, "pip"),
            Ecosystem::Go => write!(f, "go"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dependency {
    pub name: String,
    pub version: Option<String>,
    pub ecosystem: Ecosystem,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CodeHealthMetrics {
    pub commits_last_year: u32,
    pub active_weeks: u32,
    pub open_issues: u32,
    pub open_pull_requests: u32,
    pub bus_factor: u32,
    pub score: u8,
}

/// Model-written summary of one insight section.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Narrative {
    pub summary: String,
    #[serde(default)]
    pub highlights: Vec<String>,
}

impl Narrative {
    pub fn tidy(self) -> Self {
        Self {
            summary: self.summary.trim().to_string(),
            highlights: self
                .highlights
                .into_iter()
                .map(|h| h.trim().to_string())
                .filter(|h| !h.is_empty())
                .collect(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct InsightBundle {
    pub issues: Vec<Issue>,
    pub pull_requests: Vec<PullRequest>,
    pub contributors: Vec<Contributor>,
    pub dependencies: Vec<Dependency>,
    pub languages: HashMap<String, u64>,
    pub health: CodeHealthMetrics,
    pub issue_summary: Option<Narrative>,
    pub pr_summary: Option<Narrative>,
    pub team_summary: Option<Narrative>,
}
