use std::collections::HashSet;

use serde::{Deserialize, Serialize};

/// Primary result of a run, available from `CoreReady` onwards.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AnalysisReport {
    pub summary: String,
    pub tech_stack: Vec<String>,
    pub scorecard: Scorecard,
    pub roadmap: Vec<RoadmapItem>,
    pub architecture: ArchitectureGraph,
    pub deployment: Vec<DeploymentSuggestion>,
    pub tour: Vec<TourStep>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Scorecard {
    pub maintenance: u8,
    pub documentation: u8,
    pub innovation: u8,
    pub security: u8,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RoadmapItem {
    pub title: String,
    pub description: String,
    pub priority: Priority,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    High,
    Medium,
    Low,
}

impl std::fmt::Display for Priority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Priority::High => write!(f, "high"),
            Priority::Medium => write!(f, "medium"),
            Priority::Low => write!(f, "low"),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ArchitectureGraph {
    pub nodes: Vec<ArchitectureNode>,
    pub edges: Vec<ArchitectureEdge>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ArchitectureNode {
    pub id: String,
    pub label: String,
    #[serde(default)]
    pub kind: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ArchitectureEdge {
    pub source: String,
    pub target: String,
    #[serde(default)]
    pub label: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DeploymentSuggestion {
    pub platform: String,
    pub reason: String,
    #[serde(default)]
    pub config_hint: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TourStep {
    pub file: String,
    pub title: String,
    pub explanation: String,
}

impl ArchitectureGraph {
    /// Drops edges whose endpoints are not in the node set. Returns how many
    /// were removed.
    pub fn prune_dangling_edges(&mut self) -> usize {
        let ids: HashSet<&str> = self.nodes.iter().map(|n| n.id.as_str()).collect();
        let before = self.edges.len();
        self.edges
            .retain(|e| ids.contains(e.source.as_str()) && ids.contains(e.target.as_str()));
        before - self.edges.len()
    }
}

impl AnalysisReport {
    /// Enforces the report invariants before anything downstream sees it.
    pub fn sanitize(mut self) -> Self {
        let dropped = self.architecture.prune_dangling_edges();
        if dropped > 0 {
            tracing::debug!("Dropped {} architecture edge(s) with unknown endpoints", dropped);
        }
        self.summary = self.summary.trim().to_string();
        self.scorecard.clamp();
        self
    }
}

impl Scorecard {
    fn clamp(&mut self) {
        for score in [
            &mut self.maintenance,
            &mut self.documentation,
            &mut self.innovation,
            &mut self.security,
        ] {
            *score = (*score).min(100);
        }
    }

    pub fn overall(&self) -> u8 {
        let total = self.maintenance as u32
            + self.documentation as u32
            + self.innovation as u32
            + self.security as u32;
        (total / 4) as u8
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(id: &str) -> ArchitectureNode {
        ArchitectureNode {
            id: id.to_string(),
            label: id.to_uppercase(),
            kind: None,
        }
    }

    fn edge(source: &str, target: &str) -> ArchitectureEdge {
        ArchitectureEdge {
            source: source.to_string(),
            target: target.to_string(),
            label: None,
        }
    }

    #[test]
    fn test_dangling_edges_are_dropped() {
        let report = AnalysisReport {
            summary: "  A widget factory.  ".to_string(),
            tech_stack: vec!["Rust".to_string()],
            scorecard: Scorecard {
                maintenance: 80,
                documentation: 140,
                innovation: 60,
                security: 70,
            },
            roadmap: Vec::new(),
            architecture: ArchitectureGraph {
                nodes: vec![node("api"), node("db")],
                edges: vec![edge("api", "db"), edge("api", "cache"), edge("ghost", "db")],
            },
            deployment: Vec::new(),
            tour: Vec::new(),
        }
        .sanitize();

        assert_eq!(report.architecture.edges, vec![edge("api", "db")]);
        assert_eq!(report.summary, "A widget factory.");
        assert_eq!(report.scorecard.documentation, 100);
    }

    #[test]
    fn test_overall_score_is_mean() {
        let card = Scorecard {
            maintenance: 100,
            documentation: 50,
            innovation: 50,
            security: 0,
        };
        assert_eq!(card.overall(), 50);
    }
}
