//! Local statistics derived from sampled commits and provider data. Nothing
//! here calls the network; results feed the narrative prompts.

use std::collections::HashMap;

use crate::models::{
    AreaActivity, AuthorShare, CodeHealthMetrics, Contributor, Dependency, Ecosystem,
    FileActivity, RecentCommit, WeeklyActivity,
};

/// Files that name the package manifest of a supported ecosystem.
pub const MANIFESTS: &[(&str, Ecosystem)] = &[
    ("package.json", Ecosystem::Npm),
    ("Cargo.toml", Ecosystem::Cargo),
    ("requirements.txt", Ecosystem::Pip),
    ("go.mod", Ecosystem::Go),
];

const ROOT_AREA: &str = "(root)";

fn area_of(path: &str) -> &str {
    match path.split_once('/') {
        Some((top, _)) => top,
        None => ROOT_AREA,
    }
}

/// Groups commit authors by top-level directory, busiest areas and authors
/// first. Each commit counts once per area it touched.
pub fn ownership_areas(commits: &[RecentCommit], max_areas: usize) -> Vec<AreaActivity> {
    let mut by_area: HashMap<&str, HashMap<&str, u32>> = HashMap::new();

    for commit in commits {
        let mut areas: Vec<&str> = commit.files.iter().map(|f| area_of(f)).collect();
        areas.sort_unstable();
        areas.dedup();
        for area in areas {
            *by_area
                .entry(area)
                .or_default()
                .entry(commit.author.as_str())
                .or_insert(0) += 1;
        }
    }

    let mut areas: Vec<AreaActivity> = by_area
        .into_iter()
        .map(|(area, authors)| {
            let mut authors: Vec<AuthorShare> = authors
                .into_iter()
                .map(|(author, commits)| AuthorShare {
                    author: author.to_string(),
                    commits,
                })
                .collect();
            authors.sort_by(|a, b| b.commits.cmp(&a.commits).then(a.author.cmp(&b.author)));
            AreaActivity {
                area: area.to_string(),
                authors,
            }
        })
        .collect();

    let total = |a: &AreaActivity| a.authors.iter().map(|s| s.commits).sum::<u32>();
    areas.sort_by(|a, b| total(b).cmp(&total(a)).then(a.area.cmp(&b.area)));
    areas.truncate(max_areas);
    areas
}

/// Most frequently changed files, most recent change first on ties.
pub fn heatmap(commits: &[RecentCommit], top: usize) -> Vec<FileActivity> {
    let mut files: HashMap<&str, FileActivity> = HashMap::new();

    for commit in commits {
        for path in &commit.files {
            let entry = files.entry(path.as_str()).or_insert_with(|| FileActivity {
                path: path.clone(),
                changes: 0,
                last_changed: commit.committed_at,
            });
            entry.changes += 1;
            if commit.committed_at > entry.last_changed {
                entry.last_changed = commit.committed_at;
            }
        }
    }

    let mut ranked: Vec<FileActivity> = files.into_values().collect();
    ranked.sort_by(|a, b| {
        b.changes
            .cmp(&a.changes)
            .then(b.last_changed.cmp(&a.last_changed))
            .then(a.path.cmp(&b.path))
    });
    ranked.truncate(top);
    ranked
}

/// Smallest number of contributors that together account for at least half
/// of all contributions.
pub fn bus_factor(contributors: &[Contributor]) -> u32 {
    let mut counts: Vec<u64> = contributors.iter().map(|c| c.contributions as u64).collect();
    let total: u64 = counts.iter().sum();
    if total == 0 {
        return 0;
    }
    counts.sort_unstable_by(|a, b| b.cmp(a));

    let mut covered = 0;
    for (i, count) in counts.iter().enumerate() {
        covered += count;
        if covered * 2 >= total {
            return i as u32 + 1;
        }
    }
    counts.len() as u32
}

pub fn health_metrics(
    weeks: &[WeeklyActivity],
    contributors: &[Contributor],
    open_issues: u32,
    open_pull_requests: u32,
) -> CodeHealthMetrics {
    let recent: Vec<&WeeklyActivity> = weeks.iter().rev().take(52).collect();
    let commits_last_year = recent.iter().map(|w| w.total).sum();
    let active_weeks = recent.iter().filter(|w| w.total > 0).count() as u32;
    let bus_factor = bus_factor(contributors);

    let mut metrics = CodeHealthMetrics {
        commits_last_year,
        active_weeks,
        open_issues,
        open_pull_requests,
        bus_factor,
        score: 0,
    };
    metrics.score = health_score(&metrics);
    metrics
}

/// 50 points for weekly activity, 30 for bus factor (capped at 5), 20 for a
/// backlog that stays under 50 open items.
fn health_score(m: &CodeHealthMetrics) -> u8 {
    let activity = m.active_weeks.min(52) as f64 / 52.0 * 50.0;
    let spread = m.bus_factor.min(5) as f64 / 5.0 * 30.0;
    let backlog_size = (m.open_issues + m.open_pull_requests) as f64;
    let backlog = if backlog_size <= 50.0 {
        20.0
    } else {
        20.0 * 50.0 / backlog_size
    };
    (activity + spread + backlog).round().clamp(0.0, 100.0) as u8
}

pub fn parse_manifest(ecosystem: Ecosystem, content: &str) -> Vec<Dependency> {
    let dep = |name: &str, version: Option<&str>| Dependency {
        name: name.to_string(),
        version: version
            .map(|v| v.trim().trim_matches('"').to_string())
            .filter(|v| !v.is_empty()),
        ecosystem,
    };

    match ecosystem {
        Ecosystem::Npm => {
            let Ok(manifest) = serde_json::from_str::<serde_json::Value>(content) else {
                return Vec::new();
            };
            ["dependencies", "devDependencies"]
                .iter()
                .filter_map(|section| manifest.get(section).and_then(|s| s.as_object()))
                .flat_map(|section| section.iter())
                .map(|(name, version)| dep(name, version.as_str()))
                .collect()
        }
        Ecosystem::Cargo => parse_cargo(content)
            .into_iter()
            .map(|(name, version)| dep(&name, version.as_deref()))
            .collect(),
        Ecosystem::Pip => content
            .lines()
            .map(|line| line.split('#').next().unwrap_or("").trim())
            .filter(|line| !line.is_empty() && !line.starts_with('-'))
            .map(|line| {
                let split = line
                    .find(|c: char| matches!(c, '=' | '<' | '>' | '~' | '!' | ';' | '['))
                    .unwrap_or(line.len());
                let (name, rest) = line.split_at(split);
                let version = rest
                    .trim_start_matches(|c: char| matches!(c, '=' | '<' | '>' | '~' | '!'))
                    .split(';')
                    .next();
                let version = if rest.starts_with('[') { None } else { version };
                dep(name.trim(), version)
            })
            .collect(),
        Ecosystem::Go => {
            let mut in_block = false;
            let mut deps = Vec::new();
            for line in content.lines().map(str::trim) {
                if line.starts_with("require (") {
                    in_block = true;
                    continue;
                }
                if in_block && line == ")" {
                    in_block = false;
                    continue;
                }
                let requirement = if in_block {
                    Some(line)
                } else {
                    line.strip_prefix("require ")
                };
                if let Some(requirement) = requirement {
                    let mut parts = requirement.split_whitespace();
                    if let Some(name) = parts.next().filter(|n| !n.starts_with("//")) {
                        deps.push(dep(name, parts.next()));
                    }
                }
            }
            deps
        }
    }
}

const CARGO_SECTIONS: &[&str] = &["dependencies", "dev-dependencies", "build-dependencies"];

/// Collects every dependency table of a Cargo manifest: the top-level
/// sections, `[workspace.dependencies]` and `[target.<cfg>.*]`. A malformed
/// manifest yields nothing.
fn parse_cargo(content: &str) -> Vec<(String, Option<String>)> {
    let Ok(manifest) = toml::from_str::<toml::Table>(content) else {
        return Vec::new();
    };

    let mut tables: Vec<&toml::Table> = CARGO_SECTIONS
        .iter()
        .filter_map(|section| manifest.get(*section).and_then(toml::Value::as_table))
        .collect();
    if let Some(workspace) = manifest.get("workspace").and_then(toml::Value::as_table) {
        tables.extend(workspace.get("dependencies").and_then(toml::Value::as_table));
    }
    if let Some(targets) = manifest.get("target").and_then(toml::Value::as_table) {
        for target in targets.values().filter_map(toml::Value::as_table) {
            tables.extend(
                CARGO_SECTIONS
                    .iter()
                    .filter_map(|section| target.get(*section).and_then(toml::Value::as_table)),
            );
        }
    }

    tables
        .into_iter()
        .flat_map(|table| table.iter())
        .map(|(name, value)| {
            let version = match value {
                toml::Value::String(version) => Some(version.clone()),
                toml::Value::Table(detail) => detail
                    .get("version")
                    .and_then(toml::Value::as_str)
                    .map(str::to_string),
                _ => None,
            };
            (name.clone(), version)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};

    use super::*;

    fn commit(author: &str, day: u32, files: &[&str]) -> RecentCommit {
        RecentCommit {
            sha: format!("{}-{}", author, day),
            author: author.to_string(),
            message: "change".to_string(),
            committed_at: Utc.with_ymd_and_hms(2024, 5, day, 12, 0, 0).unwrap(),
            files: files.iter().map(|f| f.to_string()).collect(),
        }
    }

    fn contributor(login: &str, contributions: u32) -> Contributor {
        Contributor {
            login: login.to_string(),
            contributions,
            avatar_url: None,
        }
    }

    #[test]
    fn test_ownership_groups_by_top_level_area() {
        let commits = vec![
            commit("ana", 1, &["src/a.rs", "src/b.rs"]),
            commit("ana", 2, &["src/a.rs"]),
            commit("ben", 3, &["docs/guide.md", "README.md"]),
        ];
        let areas = ownership_areas(&commits, 10);
        assert_eq!(areas[0].area, "src");
        assert_eq!(areas[0].authors[0].author, "ana");
        // Two files in src within one commit count once.
        assert_eq!(areas[0].authors[0].commits, 2);
        assert!(areas.iter().any(|a| a.area == "(root)"));
        assert_eq!(ownership_areas(&commits, 1).len(), 1);
    }

    #[test]
    fn test_heatmap_ranks_by_change_count() {
        let commits = vec![
            commit("ana", 1, &["src/a.rs"]),
            commit("ben", 4, &["src/a.rs", "src/b.rs"]),
            commit("ana", 2, &["src/c.rs"]),
        ];
        let map = heatmap(&commits, 2);
        assert_eq!(map.len(), 2);
        assert_eq!(map[0].path, "src/a.rs");
        assert_eq!(map[0].changes, 2);
        assert_eq!(map[0].last_changed, Utc.with_ymd_and_hms(2024, 5, 4, 12, 0, 0).unwrap());
        assert_eq!(map[1].path, "src/b.rs");
    }

    #[test]
    fn test_bus_factor() {
        assert_eq!(bus_factor(&[]), 0);
        assert_eq!(bus_factor(&[contributor("a", 90), contributor("b", 10)]), 1);
        assert_eq!(
            bus_factor(&[
                contributor("a", 30),
                contributor("b", 30),
                contributor("c", 20),
                contributor("d", 20),
            ]),
            2
        );
    }

    #[test]
    fn test_health_uses_last_52_weeks() {
        let mut weeks: Vec<WeeklyActivity> = (0..60)
            .map(|i| WeeklyActivity {
                week: i,
                total: 1,
                days: Vec::new(),
            })
            .collect();
        weeks[59].total = 0;
        let metrics = health_metrics(&weeks, &[contributor("a", 1)], 3, 2);
        assert_eq!(metrics.commits_last_year, 51);
        assert_eq!(metrics.active_weeks, 51);
        assert_eq!(metrics.bus_factor, 1);
        assert!(metrics.score > 50 && metrics.score <= 100);

        let idle = health_metrics(&[], &[], 500, 0);
        assert_eq!(idle.score, 2);
    }

    #[test]
    fn test_parse_package_json() {
        let deps = parse_manifest(
            Ecosystem::Npm,
            r#"{"dependencies": {"react": "^18.2.0"}, "devDependencies": {"vitest": "1.0.0"}}"#,
        );
        assert_eq!(deps.len(), 2);
        assert!(deps.iter().any(|d| d.name == "react" && d.version.as_deref() == Some("^18.2.0")));
        assert!(parse_manifest(Ecosystem::Npm, "not json").is_empty());
    }

    #[test]
    fn test_parse_cargo_manifest() {
        let deps = parse_manifest(
            Ecosystem::Cargo,
            r#"
[package]
name = "demo"
version = "0.1.0"

[dependencies]
serde = { version = "1.0", features = ["derive"] }
anyhow = "1"
local = { path = "../local" }

[dev-dependencies]
tempfile = "3"
"#,
        );
        let names: Vec<&str> = deps.iter().map(|d| d.name.as_str()).collect();
        assert_eq!(names, vec!["serde", "anyhow", "local", "tempfile"]);
        assert_eq!(deps[0].version.as_deref(), Some("1.0"));
        assert_eq!(deps[2].version, None);
    }

    #[test]
    fn test_parse_cargo_comments_and_dotted_tables() {
        let deps = parse_manifest(Ecosystem::Cargo, "[dependencies]\nanyhow = \"1\" # pinned\n");
        assert_eq!(deps.len(), 1);
        assert_eq!(deps[0].version.as_deref(), Some("1"));

        let deps = parse_manifest(Ecosystem::Cargo, "[dependencies.serde]\nversion = \"1.0\"\n");
        assert_eq!(deps.len(), 1);
        assert_eq!(deps[0].name, "serde");
        assert_eq!(deps[0].version.as_deref(), Some("1.0"));
    }

    #[test]
    fn test_parse_cargo_workspace_and_target_tables() {
        let deps = parse_manifest(
            Ecosystem::Cargo,
            r#"
[workspace.dependencies]
tokio = { version = "1.35", features = ["full"] }

[target.'cfg(unix)'.dependencies]
libc = "0.2"

[build-dependencies]
cc = "1"
"#,
        );
        let mut names: Vec<&str> = deps.iter().map(|d| d.name.as_str()).collect();
        names.sort();
        assert_eq!(names, vec!["cc", "libc", "tokio"]);
        assert!(deps.iter().any(|d| d.name == "tokio" && d.version.as_deref() == Some("1.35")));
        assert!(parse_manifest(Ecosystem::Cargo, "[dependencies\nbroken").is_empty());
    }

    #[test]
    fn test_parse_requirements_and_go_mod() {
        let pip = parse_manifest(
            Ecosystem::Pip,
            "# comment\nrequests==2.31.0\nflask>=2.0 ; python_version > '3.8'\n-r base.txt\nnumpy\n",
        );
        assert_eq!(pip.len(), 3);
        assert_eq!(pip[0].version.as_deref(), Some("2.31.0"));
        assert_eq!(pip[1].name, "flask");
        assert_eq!(pip[1].version.as_deref(), Some("2.0"));
        assert_eq!(pip[2].version, None);

        let go = parse_manifest(
            Ecosystem::Go,
            "module example.com/x\n\nrequire github.com/pkg/errors v0.9.1\n\nrequire (\n\tgolang.org/x/sync v0.5.0\n)\n",
        );
        assert_eq!(go.len(), 2);
        assert_eq!(go[1].name, "golang.org/x/sync");
        assert_eq!(go[1].version.as_deref(), Some("v0.5.0"));
    }
}
