use serde_json::{json, Value};

use crate::github::render_tree;
use crate::models::{
    AnalysisReport, AreaActivity, CodeHealthMetrics, Contributor, FileActivity, Issue,
    PullRequest, RecentCommit, RepositorySnapshot, SecurityAudit,
};

pub const SYSTEM_PROMPT: &str = r#"You are a principal engineer reviewing an unfamiliar code repository.
You only state what the provided metadata, file tree, README and file contents support.
When asked for JSON, respond with a single JSON object matching the requested schema and nothing else."#;

const MAX_TREE_LINES: usize = 300;
const MAX_README_CHARS: usize = 6_000;
const MAX_FILE_CHARS: usize = 12_000;

/// Repository facts shared by every repository-level prompt.
#[derive(Debug, Clone, Default)]
pub struct RepoContext {
    pub full_name: String,
    pub description: Option<String>,
    pub primary_language: Option<String>,
    pub topics: Vec<String>,
    pub tree: String,
    pub readme: String,
    pub truncated: bool,
}

impl RepoContext {
    pub fn from_snapshot(snapshot: &RepositorySnapshot) -> Self {
        Self {
            full_name: snapshot.metadata.full_name.clone(),
            description: snapshot.metadata.description.clone(),
            primary_language: snapshot.metadata.language.clone(),
            topics: snapshot.metadata.topics.clone(),
            tree: render_tree(&snapshot.tree, MAX_TREE_LINES),
            readme: truncate_chars(snapshot.readme_text(), MAX_README_CHARS),
            truncated: snapshot.truncated,
        }
    }

    pub fn to_prompt(&self) -> String {
        let mut prompt = format!("Repository: {}\n", self.full_name);
        if let Some(desc) = &self.description {
            if !desc.is_empty() {
                prompt.push_str(&format!("Description: {}\n", desc));
            }
        }
        if let Some(lang) = &self.primary_language {
            prompt.push_str(&format!("Primary language: {}\n", lang));
        }
        if !self.topics.is_empty() {
            prompt.push_str(&format!("Topics: {}\n", self.topics.join(", ")));
        }

        prompt.push_str("\n## File tree");
        if self.truncated {
            prompt.push_str(" (partial)");
        }
        prompt.push_str("\n```\n");
        prompt.push_str(&self.tree);
        prompt.push_str("\n```\n");

        if self.readme.is_empty() {
            prompt.push_str("\n(No README available)\n");
        } else {
            prompt.push_str("\n## README\n");
            prompt.push_str(&self.readme);
            prompt.push('\n');
        }
        prompt
    }
}

/// Cuts `text` to at most `max` characters on a char boundary.
pub fn truncate_chars(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((idx, _)) => format!("{}\n...[truncated]", &text[..idx]),
        None => text.to_string(),
    }
}

fn string() -> Value {
    json!({ "type": "STRING" })
}

fn string_list() -> Value {
    json!({ "type": "ARRAY", "items": { "type": "STRING" } })
}

fn object(properties: Value, required: &[&str]) -> Value {
    json!({ "type": "OBJECT", "properties": properties, "required": required })
}

fn list_of(item: Value) -> Value {
    json!({ "type": "ARRAY", "items": item })
}

pub fn analysis_prompt(ctx: &RepoContext) -> String {
    format!(
        "{}\nProduce a full technical assessment: a concise summary, the detected technologies, \
a scorecard (maintenance, documentation, innovation, security; integers 0-100), a prioritized \
improvement roadmap, an architecture graph whose edges only reference declared node ids, \
deployment suggestions, and a guided tour of 4-8 files in reading order.",
        ctx.to_prompt()
    )
}

pub fn analysis_schema() -> Value {
    let score = json!({ "type": "INTEGER" });
    object(
        json!({
            "summary": string(),
            "tech_stack": string_list(),
            "scorecard": object(
                json!({
                    "maintenance": score,
                    "documentation": score,
                    "innovation": score,
                    "security": score,
                }),
                &["maintenance", "documentation", "innovation", "security"],
            ),
            "roadmap": list_of(object(
                json!({
                    "title": string(),
                    "description": string(),
                    "priority": { "type": "STRING", "enum": ["high", "medium", "low"] },
                }),
                &["title", "description", "priority"],
            )),
            "architecture": object(
                json!({
                    "nodes": list_of(object(
                        json!({ "id": string(), "label": string(), "kind": string() }),
                        &["id", "label"],
                    )),
                    "edges": list_of(object(
                        json!({ "source": string(), "target": string(), "label": string() }),
                        &["source", "target"],
                    )),
                }),
                &["nodes", "edges"],
            ),
            "deployment": list_of(object(
                json!({ "platform": string(), "reason": string(), "config_hint": string() }),
                &["platform", "reason"],
            )),
            "tour": list_of(object(
                json!({ "file": string(), "title": string(), "explanation": string() }),
                &["file", "title", "explanation"],
            )),
        }),
        &[
            "summary",
            "tech_stack",
            "scorecard",
            "roadmap",
            "architecture",
            "deployment",
            "tour",
        ],
    )
}

pub fn onboarding_prompt(ctx: &RepoContext, report: &AnalysisReport) -> String {
    format!(
        "{}\nKnown technologies: {}\nSummary: {}\n\nWrite an onboarding guide for a new contributor: \
a quick-start paragraph, the critical files with why they matter, a recommended reading path, \
common tasks with concrete steps, and setup instructions.",
        ctx.to_prompt(),
        report.tech_stack.join(", "),
        report.summary
    )
}

pub fn onboarding_schema() -> Value {
    object(
        json!({
            "quick_start": string(),
            "critical_files": list_of(object(
                json!({ "path": string(), "reason": string() }),
                &["path", "reason"],
            )),
            "recommended_path": string_list(),
            "common_tasks": list_of(object(
                json!({ "task": string(), "steps": string_list() }),
                &["task", "steps"],
            )),
            "setup_instructions": string(),
        }),
        &[
            "quick_start",
            "critical_files",
            "recommended_path",
            "common_tasks",
            "setup_instructions",
        ],
    )
}

pub fn narrative_schema() -> Value {
    object(
        json!({ "summary": string(), "highlights": string_list() }),
        &["summary", "highlights"],
    )
}

pub fn issue_summary_prompt(full_name: &str, issues: &[Issue]) -> String {
    let mut prompt = format!(
        "Summarize the open issue backlog of {} ({} issues sampled). Call out recurring themes, \
bugs versus feature requests, and anything that looks urgent.\n\n",
        full_name,
        issues.len()
    );
    for issue in issues {
        let labels: Vec<&str> = issue.labels.iter().map(|l| l.name.as_str()).collect();
        prompt.push_str(&format!(
            "- #{} {} [{}] ({} comments)\n",
            issue.number,
            issue.title,
            labels.join(", "),
            issue.comments
        ));
    }
    prompt
}

pub fn pr_summary_prompt(full_name: &str, pulls: &[PullRequest]) -> String {
    let mut prompt = format!(
        "Summarize recent pull request activity in {} ({} sampled): what is being worked on, \
how quickly changes merge, and any stalled work.\n\n",
        full_name,
        pulls.len()
    );
    for pr in pulls {
        let status = match (&pr.merged_at, pr.state.as_str(), pr.draft) {
            (Some(_), _, _) => "merged",
            (None, _, true) => "draft",
            (None, "open", _) => "open",
            _ => "closed",
        };
        prompt.push_str(&format!(
            "- #{} {} ({}, opened {})\n",
            pr.number,
            pr.title,
            status,
            pr.created_at.format("%Y-%m-%d")
        ));
    }
    prompt
}

pub fn team_summary_prompt(
    full_name: &str,
    contributors: &[Contributor],
    health: &CodeHealthMetrics,
) -> String {
    let mut prompt = format!(
        "Describe the team behind {}: how concentrated contributions are, the bus factor ({}), \
and whether the project looks actively maintained ({} commits in the last year across {} active weeks).\n\n",
        full_name, health.bus_factor, health.commits_last_year, health.active_weeks
    );
    for c in contributors {
        prompt.push_str(&format!("- {}: {} contributions\n", c.login, c.contributions));
    }
    prompt
}

pub fn ownership_prompt(full_name: &str, areas: &[AreaActivity]) -> String {
    let mut prompt = format!(
        "Based on recent commit authorship in {}, explain who owns which parts of the codebase \
and who a newcomer should ask about each area.\n\n",
        full_name
    );
    for area in areas {
        let authors: Vec<String> = area
            .authors
            .iter()
            .map(|a| format!("{} ({})", a.author, a.commits))
            .collect();
        prompt.push_str(&format!("- {}: {}\n", area.area, authors.join(", ")));
    }
    prompt
}

pub fn ownership_schema() -> Value {
    object(
        json!({
            "summary": string(),
            "areas": list_of(object(
                json!({ "area": string(), "owners": string_list(), "note": string() }),
                &["area", "owners"],
            )),
        }),
        &["summary", "areas"],
    )
}

pub fn activity_prompt(
    full_name: &str,
    heatmap: &[FileActivity],
    commits: &[RecentCommit],
) -> String {
    let mut prompt = format!(
        "Describe where development effort in {} is currently focused.\n\n## Most changed files\n",
        full_name
    );
    for file in heatmap {
        prompt.push_str(&format!(
            "- {} ({} changes, last {})\n",
            file.path,
            file.changes,
            file.last_changed.format("%Y-%m-%d")
        ));
    }
    prompt.push_str("\n## Recent commit messages\n");
    for commit in commits {
        prompt.push_str(&format!("- {} ({})\n", commit.message, commit.author));
    }
    prompt
}

pub fn activity_schema() -> Value {
    object(
        json!({ "summary": string(), "focus_areas": string_list() }),
        &["summary", "focus_areas"],
    )
}

pub fn testing_prompt(ctx: &RepoContext, commits: &[RecentCommit]) -> String {
    let touched: Vec<&str> = commits
        .iter()
        .flat_map(|c| c.files.iter().map(String::as_str))
        .filter(|f| f.contains("test") || f.contains("spec"))
        .take(40)
        .collect();
    format!(
        "{}\nRecently changed test-related files:\n{}\n\nIdentify the testing framework, the command \
that runs the tests, the directories holding tests, and any notes about coverage or fixtures. \
Use null when something cannot be determined.",
        ctx.to_prompt(),
        if touched.is_empty() {
            "(none)".to_string()
        } else {
            touched.join("\n")
        }
    )
}

pub fn testing_schema() -> Value {
    object(
        json!({
            "framework": { "type": "STRING", "nullable": true },
            "test_command": { "type": "STRING", "nullable": true },
            "test_directories": string_list(),
            "notes": string(),
        }),
        &["test_directories", "notes"],
    )
}

pub fn explain_prompt(full_name: &str, path: &str, content: &str) -> String {
    format!(
        "Explain the file `{}` from {} to a new contributor: its purpose, the key points a reader \
must understand, and related files worth opening next.\n\n```\n{}\n```",
        path,
        full_name,
        truncate_chars(content, MAX_FILE_CHARS)
    )
}

pub fn explain_schema() -> Value {
    object(
        json!({
            "path": string(),
            "purpose": string(),
            "key_points": string_list(),
            "related_files": string_list(),
        }),
        &["path", "purpose", "key_points"],
    )
}

pub fn chat_system(full_name: &str, report: &AnalysisReport) -> String {
    format!(
        "{}\n\nYou are answering questions about {}. What you know:\nSummary: {}\nTechnologies: {}\n\
Answer conversationally in plain text.",
        SYSTEM_PROMPT,
        full_name,
        report.summary,
        report.tech_stack.join(", ")
    )
}

pub fn audit_prompt(ctx: &RepoContext) -> String {
    format!(
        "{}\nPerform a security review. Reason about dependency risks, secrets handling, input \
validation, authentication and configuration visible from the structure and README. Report each \
finding with a severity (low, medium, high, critical), where it lives, and an overall risk.",
        ctx.to_prompt()
    )
}

pub fn audit_schema() -> Value {
    let severity = json!({ "type": "STRING", "enum": ["low", "medium", "high", "critical"] });
    object(
        json!({
            "overall_risk": severity,
            "vulnerabilities": list_of(object(
                json!({
                    "title": string(),
                    "severity": severity,
                    "location": string(),
                    "description": string(),
                }),
                &["title", "severity", "location", "description"],
            )),
            "recommendations": string_list(),
        }),
        &["overall_risk", "vulnerabilities", "recommendations"],
    )
}

pub fn remediation_prompt(full_name: &str, audit: &SecurityAudit) -> String {
    let mut prompt = format!(
        "Write a remediation plan for {}. For every finding give the fix, an optional patch \
snippet, and an effort estimate.\n\n",
        full_name
    );
    for v in &audit.vulnerabilities {
        prompt.push_str(&format!(
            "- [{}] {} at {}: {}\n",
            v.severity, v.title, v.location, v.description
        ));
    }
    prompt
}

pub fn remediation_schema() -> Value {
    object(
        json!({
            "summary": string(),
            "steps": list_of(object(
                json!({
                    "vulnerability": string(),
                    "fix": string(),
                    "patch": string(),
                    "effort": string(),
                }),
                &["vulnerability", "fix", "effort"],
            )),
        }),
        &["summary", "steps"],
    )
}

pub fn narration_script(full_name: &str, report: &AnalysisReport) -> String {
    format!(
        "Here is a quick briefing on {}. {} It is built with {}. Overall health scores {} out of 100.",
        full_name,
        report.summary,
        report.tech_stack.join(", "),
        report.scorecard.overall()
    )
}

pub fn video_prompt(full_name: &str, report: &AnalysisReport) -> String {
    let components: Vec<&str> = report
        .architecture
        .nodes
        .iter()
        .map(|n| n.label.as_str())
        .take(8)
        .collect();
    format!(
        "A clean animated explainer of the software project {}: {} Show the components {} \
connecting to each other as glowing blocks, ending on the project name.",
        full_name,
        report.summary,
        components.join(", ")
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_chars_respects_boundaries() {
        assert_eq!(truncate_chars("héllo", 10), "héllo");
        assert_eq!(truncate_chars("héllo", 2), "hé\n...[truncated]");
    }

    #[test]
    fn test_context_notes_missing_readme_and_partial_tree() {
        let ctx = RepoContext {
            full_name: "acme/widgets".to_string(),
            tree: "src/".to_string(),
            truncated: true,
            ..Default::default()
        };
        let prompt = ctx.to_prompt();
        assert!(prompt.contains("acme/widgets"));
        assert!(prompt.contains("(partial)"));
        assert!(prompt.contains("No README"));
    }

    #[test]
    fn test_schemas_declare_required_fields() {
        let schema = analysis_schema();
        let required = schema["required"].as_array().unwrap();
        assert_eq!(required.len(), 7);
        assert_eq!(onboarding_schema()["type"], "OBJECT");
    }
}
