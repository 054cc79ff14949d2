use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, ValueEnum};
use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;
use tracing_subscriber::EnvFilter;

use repolens::models::{
    AnalysisReport, FileExplanation, InsightBundle, OnboardingGuide, RemediationPlan,
    SecurityAudit,
};
use repolens::storage::AnalysisRecord;
use repolens::{
    AnalysisGateway, Config, GeminiProvider, GitHubClient, Orchestrator, PipelineConfig,
    RecordStore, RequestBudget, ResultCache, SqliteRecordStore,
};

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Format {
    Text,
    Markdown,
    Json,
}

#[derive(Parser, Debug)]
#[command(name = "repolens")]
#[command(version = "0.1.0")]
#[command(about = "Intelligence reports for GitHub repositories")]
struct Args {
    /// Repository URL, `github.com/owner/name` or `git@github.com:owner/name.git`
    reference: String,

    /// Output format
    #[arg(short, long, value_enum, default_value = "text")]
    format: Format,

    /// Output file (defaults to stdout)
    #[arg(short, long)]
    output: Option<String>,

    /// Fetch the full tree and wait for enrichment before returning
    #[arg(long)]
    no_fast: bool,

    /// Also collect issue, pull request and team insights
    #[arg(long)]
    insights: bool,

    /// Explain a single file from the repository
    #[arg(long, value_name = "PATH")]
    explain: Option<String>,

    /// Ask a question about the repository after analysis
    #[arg(long, value_name = "QUESTION")]
    ask: Option<String>,

    /// Run a security audit and remediation plan
    #[arg(long)]
    audit: bool,

    /// Write a spoken summary of the report to this file
    #[arg(long, value_name = "FILE")]
    narrate: Option<String>,

    /// Print the most recent stored analysis instead of running a new one
    #[arg(long)]
    history: bool,
}

#[derive(Serialize)]
struct Output {
    reference: String,
    report: AnalysisReport,
    #[serde(skip_serializing_if = "Option::is_none")]
    guide: Option<OnboardingGuide>,
    #[serde(skip_serializing_if = "Option::is_none")]
    insights: Option<InsightBundle>,
    #[serde(skip_serializing_if = "Option::is_none")]
    explanation: Option<FileExplanation>,
    #[serde(skip_serializing_if = "Option::is_none")]
    answer: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    audit: Option<SecurityAudit>,
    #[serde(skip_serializing_if = "Option::is_none")]
    remediation: Option<RemediationPlan>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("repolens=info".parse()?)
                .add_directive("reqwest=warn".parse()?),
        )
        .init();

    dotenvy::dotenv().ok();
    let args = Args::parse();
    let config = Config::from_env()?;

    let github = GitHubClient::new(
        config.github_token.as_deref(),
        Arc::new(ResultCache::new(config.source_cache_ttl)),
    )?;
    let provider = GeminiProvider::new(config.gemini_api_key.clone(), config.gemini_model.clone())?;
    let analysis = Arc::new(AnalysisGateway::new(
        Arc::new(provider),
        Arc::new(RequestBudget::new(config.budget_capacity, config.budget_window)),
        Arc::new(ResultCache::new(config.analysis_cache_ttl)),
        config.gateway_config(),
    ));

    let store: Option<Arc<dyn RecordStore>> = match SqliteRecordStore::new(&config.database_path) {
        Ok(store) => Some(Arc::new(store)),
        Err(e) => {
            tracing::warn!("Record store unavailable at {}: {}", config.database_path, e);
            None
        }
    };

    let mut pipeline_config = PipelineConfig::from(&config);
    if args.no_fast {
        pipeline_config.fast_mode = false;
    }
    let orchestrator = Arc::new(Orchestrator::new(
        Arc::new(github),
        analysis,
        store,
        pipeline_config,
    ));

    if args.history {
        match orchestrator.previous_analysis(&args.reference).await? {
            Some(record) => {
                let output = Output::stored(record);
                println!("{}", render(&output, args.format)?);
            }
            None => println!("No stored analysis for {}", args.reference),
        }
        return Ok(());
    }

    let spinner = ProgressBar::new_spinner();
    spinner.set_style(ProgressStyle::default_spinner().template("{spinner:.green} {msg}")?);
    spinner.enable_steady_tick(Duration::from_millis(120));
    let ticker = {
        let spinner = spinner.clone();
        let mut progress = orchestrator.subscribe();
        tokio::spawn(async move {
            while progress.changed().await.is_ok() {
                let stage = progress.borrow_and_update().stage;
                spinner.set_message(stage.to_string());
            }
        })
    };

    let handle = match orchestrator.submit(&args.reference).await {
        Ok(handle) => handle,
        Err(e) => {
            spinner.finish_and_clear();
            ticker.abort();
            return Err(e.into());
        }
    };
    let report = handle.report.as_ref().clone();
    handle.wait().await;

    let state = orchestrator.state();
    let reference = state
        .reference
        .as_ref()
        .map(|r| r.full_name())
        .unwrap_or_else(|| args.reference.clone());
    let mut output = Output {
        reference,
        report,
        guide: state.guide.as_deref().cloned(),
        insights: None,
        explanation: None,
        answer: None,
        audit: None,
        remediation: None,
    };

    if args.insights {
        spinner.set_message("collecting insights");
        output.insights = Some(orchestrator.insights(&args.reference).await?);
    }
    if let Some(ref path) = args.explain {
        spinner.set_message(format!("explaining {}", path));
        output.explanation = Some(orchestrator.explain_file(&args.reference, path).await?);
    }
    if let Some(ref question) = args.ask {
        spinner.set_message("answering");
        output.answer = Some(orchestrator.chat(&[], question).await?);
    }
    if args.audit {
        spinner.set_message("auditing");
        let audit = orchestrator.security_audit().await?;
        if !audit.vulnerabilities.is_empty() {
            output.remediation = Some(orchestrator.remediation_plan(&audit).await?);
        }
        output.audit = Some(audit);
    }
    if let Some(ref path) = args.narrate {
        spinner.set_message("narrating");
        let clip = orchestrator.narrate_summary().await?;
        std::fs::write(path, clip.decode()?)?;
        tracing::info!("Narration ({}) written to: {}", clip.mime_type, path);
    }

    ticker.abort();
    spinner.finish_and_clear();
    for entry in orchestrator.log().failures() {
        tracing::debug!("Run {} [{}]: {}", entry.run_id, entry.stage, entry.message);
    }

    let rendered = render(&output, args.format)?;

    if let Some(ref path) = args.output {
        std::fs::write(path, &rendered)?;
        tracing::info!("Output written to: {}", path);
    } else {
        println!("{}", rendered);
    }

    Ok(())
}

impl Output {
    fn stored(record: AnalysisRecord) -> Self {
        tracing::info!(
            "Showing analysis stored {} by {}",
            record.created_at.to_rfc3339(),
            record.user_id
        );
        Self {
            reference: format!("{}/{}", record.owner, record.name),
            report: record.report,
            guide: None,
            insights: None,
            explanation: None,
            answer: None,
            audit: None,
            remediation: None,
        }
    }
}

fn render(output: &Output, format: Format) -> anyhow::Result<String> {
    Ok(match format {
        Format::Json => serde_json::to_string_pretty(output)?,
        Format::Markdown => format_markdown(output),
        Format::Text => format_text(output),
    })
}

fn format_text(output: &Output) -> String {
    let report = &output.report;
    let mut out = String::new();

    out.push_str(&format!("\n=== {} ===\n\n", output.reference));
    out.push_str(&format!("{}\n\n", report.summary));
    out.push_str(&format!("Tech stack: {}\n\n", report.tech_stack.join(", ")));

    let card = &report.scorecard;
    out.push_str(&format!("Scorecard (overall {}/100):\n", card.overall()));
    out.push_str(&format!("  Maintenance:   {}\n", card.maintenance));
    out.push_str(&format!("  Documentation: {}\n", card.documentation));
    out.push_str(&format!("  Innovation:    {}\n", card.innovation));
    out.push_str(&format!("  Security:      {}\n", card.security));

    if !report.roadmap.is_empty() {
        out.push_str("\nRoadmap:\n");
        for item in &report.roadmap {
            out.push_str(&format!("  [{}] {}: {}\n", item.priority, item.title, item.description));
        }
    }

    if !report.architecture.edges.is_empty() {
        out.push_str("\nArchitecture:\n");
        for edge in &report.architecture.edges {
            match edge.label {
                Some(ref label) => out.push_str(&format!("  {} -> {} ({})\n", edge.source, edge.target, label)),
                None => out.push_str(&format!("  {} -> {}\n", edge.source, edge.target)),
            }
        }
    }

    if !report.tour.is_empty() {
        out.push_str("\nCode tour:\n");
        for (i, step) in report.tour.iter().enumerate() {
            out.push_str(&format!("  {}. {} ({})\n     {}\n", i + 1, step.title, step.file, step.explanation));
        }
    }

    if let Some(ref guide) = output.guide {
        out.push_str("\nGetting started:\n");
        out.push_str(&format!("  {}\n", guide.quick_start));
        for file in &guide.critical_files {
            out.push_str(&format!("  * {}: {}\n", file.path, file.reason));
        }
        if let Some(ref ownership) = guide.ownership {
            out.push_str(&format!("\nOwnership: {}\n", ownership.summary));
        }
        if let Some(ref activity) = guide.activity {
            out.push_str(&format!("\nRecent activity: {}\n", activity.summary));
            for file in activity.heatmap.iter().take(5) {
                out.push_str(&format!("  {} ({} changes)\n", file.path, file.changes));
            }
        }
        if let Some(ref testing) = guide.testing {
            if let Some(ref command) = testing.test_command {
                out.push_str(&format!("\nRun tests with: {}\n", command));
            }
        }
    }

    if let Some(ref insights) = output.insights {
        let health = &insights.health;
        out.push_str(&format!(
            "\nHealth: {}/100 ({} commits in the last year, bus factor {})\n",
            health.score, health.commits_last_year, health.bus_factor
        ));
        for (label, narrative) in [
            ("Issues", &insights.issue_summary),
            ("Pull requests", &insights.pr_summary),
            ("Team", &insights.team_summary),
        ] {
            if let Some(narrative) = narrative {
                out.push_str(&format!("  {}: {}\n", label, narrative.summary));
            }
        }
    }

    if let Some(ref explanation) = output.explanation {
        out.push_str(&format!("\n{}: {}\n", explanation.path, explanation.purpose));
        for point in &explanation.key_points {
            out.push_str(&format!("  - {}\n", point));
        }
    }

    if let Some(ref answer) = output.answer {
        out.push_str(&format!("\nAnswer:\n{}\n", answer));
    }

    if let Some(ref audit) = output.audit {
        out.push_str(&format!("\nSecurity risk: {}\n", audit.overall_risk));
        for vuln in &audit.vulnerabilities {
            out.push_str(&format!("  [{}] {} ({})\n", vuln.severity, vuln.title, vuln.location));
        }
        if let Some(ref plan) = output.remediation {
            out.push_str(&format!("Remediation: {}\n", plan.summary));
        }
    }

    out
}

fn format_markdown(output: &Output) -> String {
    let report = &output.report;
    let mut out = String::new();

    out.push_str(&format!("# {}\n\n", output.reference));
    out.push_str(&format!("> {}\n\n", report.summary));

    out.push_str("## Scorecard\n\n");
    out.push_str("| Area | Score |\n|------|-------|\n");
    let card = &report.scorecard;
    for (area, score) in [
        ("Maintenance", card.maintenance),
        ("Documentation", card.documentation),
        ("Innovation", card.innovation),
        ("Security", card.security),
    ] {
        out.push_str(&format!("| {} | {} |\n", area, score));
    }
    out.push_str(&format!("| **Overall** | **{}** |\n", card.overall()));

    out.push_str(&format!("\n**Tech stack:** {}\n", report.tech_stack.join(", ")));

    if !report.roadmap.is_empty() {
        out.push_str("\n## Roadmap\n\n");
        for item in &report.roadmap {
            out.push_str(&format!("- **{}** ({}): {}\n", item.title, item.priority, item.description));
        }
    }

    if !report.architecture.nodes.is_empty() {
        out.push_str("\n## Architecture\n\n```mermaid\ngraph LR\n");
        for node in &report.architecture.nodes {
            out.push_str(&format!("  {}[\"{}\"]\n", node.id, node.label));
        }
        for edge in &report.architecture.edges {
            out.push_str(&format!("  {} --> {}\n", edge.source, edge.target));
        }
        out.push_str("```\n");
    }

    if !report.deployment.is_empty() {
        out.push_str("\n## Deployment\n\n");
        for suggestion in &report.deployment {
            out.push_str(&format!("- **{}**: {}\n", suggestion.platform, suggestion.reason));
        }
    }

    if let Some(ref guide) = output.guide {
        out.push_str("\n## Onboarding\n\n");
        out.push_str(&format!("{}\n\n", guide.quick_start));
        out.push_str("| File | Why |\n|------|-----|\n");
        for file in &guide.critical_files {
            out.push_str(&format!("| `{}` | {} |\n", file.path, file.reason));
        }
        if !guide.common_tasks.is_empty() {
            out.push_str("\n### Common tasks\n\n");
            for task in &guide.common_tasks {
                out.push_str(&format!("**{}**\n\n", task.task));
                for (i, step) in task.steps.iter().enumerate() {
                    out.push_str(&format!("{}. {}\n", i + 1, step));
                }
                out.push('\n');
            }
        }
        out.push_str(&format!("\n### Setup\n\n{}\n", guide.setup_instructions));
        if let Some(ref ownership) = guide.ownership {
            out.push_str(&format!("\n### Ownership\n\n{}\n", ownership.summary));
        }
        if let Some(ref activity) = guide.activity {
            out.push_str(&format!("\n### Recent activity\n\n{}\n", activity.summary));
        }
    }

    if let Some(ref insights) = output.insights {
        out.push_str(&format!(
            "\n## Health\n\nScore **{}/100**, bus factor {}, {} open issues, {} open pull requests.\n",
            insights.health.score,
            insights.health.bus_factor,
            insights.health.open_issues,
            insights.health.open_pull_requests
        ));
    }

    if let Some(ref audit) = output.audit {
        out.push_str(&format!("\n## Security ({})\n\n", audit.overall_risk));
        for vuln in &audit.vulnerabilities {
            out.push_str(&format!("- **{}** `{}`: {}\n", vuln.severity, vuln.location, vuln.title));
        }
    }

    out
}
