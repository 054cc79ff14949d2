use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OnboardingGuide {
    pub quick_start: String,
    pub critical_files: Vec<CriticalFile>,
    pub recommended_path: Vec<String>,
    pub common_tasks: Vec<CommonTask>,
    pub setup_instructions: String,

    // Background enrichments; merged one at a time, never required.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ownership: Option<OwnershipInsight>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub activity: Option<ActivityInsight>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub testing: Option<TestingSetup>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CriticalFile {
    pub path: String,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CommonTask {
    pub task: String,
    pub steps: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OwnershipInsight {
    pub summary: String,
    pub areas: Vec<AreaOwnership>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AreaOwnership {
    pub area: String,
    pub owners: Vec<String>,
    #[serde(default)]
    pub note: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AuthorShare {
    pub author: String,
    pub commits: u32,
}

/// Who touched a top-level area in the sampled commits, busiest first.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AreaActivity {
    pub area: String,
    pub authors: Vec<AuthorShare>,
}

/// Change counts for one path over the sampled commit window.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FileActivity {
    pub path: String,
    pub changes: u32,
    pub last_changed: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ActivityInsight {
    pub summary: String,
    pub focus_areas: Vec<String>,
    /// Computed locally from recent commits, not by the model.
    #[serde(default)]
    pub heatmap: Vec<FileActivity>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TestingSetup {
    pub framework: Option<String>,
    pub test_command: Option<String>,
    pub test_directories: Vec<String>,
    pub notes: String,
}

/// A single additive update to an existing guide.
#[derive(Debug, Clone)]
pub enum Enrichment {
    Ownership(OwnershipInsight),
    Activity(ActivityInsight),
    Testing(TestingSetup),
}

impl Enrichment {
    pub fn name(&self) -> &'static str {
        match self {
            Enrichment::Ownership(_) => "ownership",
            Enrichment::Activity(_) => "activity",
            Enrichment::Testing(_) => "testing",
        }
    }
}

impl OnboardingGuide {
    /// Writes exactly one enrichment field; base fields are never touched.
    pub fn merge(&mut self, enrichment: Enrichment) {
        match enrichment {
            Enrichment::Ownership(ownership) => self.ownership = Some(ownership),
            Enrichment::Activity(activity) => self.activity = Some(activity),
            Enrichment::Testing(testing) => self.testing = Some(testing),
        }
    }

    pub(crate) fn without_enrichments(mut self) -> Self {
        self.ownership = None;
        self.activity = None;
        self.testing = None;
        self
    }

    /// Strips stray whitespace the model leaves around free text.
    pub fn tidy(mut self) -> Self {
        self.quick_start = self.quick_start.trim().to_string();
        self.setup_instructions = self.setup_instructions.trim().to_string();
        self
    }

    pub fn is_enriched(&self) -> bool {
        self.ownership.is_some() || self.activity.is_some() || self.testing.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_guide() -> OnboardingGuide {
        OnboardingGuide {
            quick_start: "cargo run".to_string(),
            critical_files: vec![CriticalFile {
                path: "src/main.rs".to_string(),
                reason: "entry point".to_string(),
            }],
            recommended_path: vec!["README.md".to_string(), "src/lib.rs".to_string()],
            common_tasks: Vec::new(),
            setup_instructions: "Install Rust".to_string(),
            ownership: None,
            activity: None,
            testing: None,
        }
    }

    #[test]
    fn test_merge_is_additive() {
        let mut guide = base_guide();
        guide.merge(Enrichment::Testing(TestingSetup {
            framework: Some("cargo test".to_string()),
            test_command: Some("cargo test".to_string()),
            test_directories: vec!["tests".to_string()],
            notes: String::new(),
        }));

        let base = base_guide();
        assert_eq!(guide.quick_start, base.quick_start);
        assert_eq!(guide.critical_files, base.critical_files);
        assert_eq!(guide.recommended_path, base.recommended_path);
        assert!(guide.testing.is_some());
        assert!(guide.ownership.is_none());
        assert!(guide.is_enriched());
    }

    #[test]
    fn test_enrichments_absent_from_json_when_unset() {
        let json = serde_json::to_value(base_guide()).unwrap();
        assert!(json.get("ownership").is_none());
        assert!(json.get("quick_start").is_some());
    }
}
