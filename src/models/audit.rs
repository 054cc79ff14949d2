use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Severity::Low => write!(f, "low"),
            Severity::Medium => write!(f, "medium"),
            Severity::High => write!(f, "high"),
            Severity::Critical => write!(f, "critical"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Vulnerability {
    pub title: String,
    pub severity: Severity,
    pub location: String,
    pub description: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SecurityAudit {
    pub overall_risk: Severity,
    pub vulnerabilities: Vec<Vulnerability>,
    pub recommendations: Vec<String>,
}

impl SecurityAudit {
    pub fn worst(&self) -> Option<&Vulnerability> {
        self.vulnerabilities.iter().max_by_key(|v| v.severity)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RemediationStep {
    pub vulnerability: String,
    pub fix: String,
    #[serde(default)]
    pub patch: Option<String>,
    pub effort: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RemediationPlan {
    pub summary: String,
    pub steps: Vec<RemediationStep>,
}
