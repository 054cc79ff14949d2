use std::str::FromStr;

use crate::error::{Error, Result};
use crate::models::RepositoryReference;

const HOSTS: &[&str] = &["github.com", "www.github.com"];
const SSH_PREFIX: &str = "git@github.com:";

/// Parses a repository URL or SSH clone string into a reference.
///
/// Accepted forms: `https://github.com/{owner}/{name}` (optionally with
/// `http://`, `www.`, no scheme, a `.git` suffix, or trailing path such as
/// `/tree/main`) and `git@github.com:{owner}/{name}.git`.
pub fn parse_reference(input: &str) -> Result<RepositoryReference> {
    let input = input.trim();
    if input.is_empty() {
        return Err(Error::Validation("Repository reference is empty".to_string()));
    }

    let path = if let Some(rest) = input.strip_prefix(SSH_PREFIX) {
        rest
    } else {
        let without_scheme = input
            .strip_prefix("https://")
            .or_else(|| input.strip_prefix("http://"))
            .unwrap_or(input);
        let (host, rest) = without_scheme.split_once('/').ok_or_else(|| invalid(input))?;
        if !HOSTS.contains(&host.to_lowercase().as_str()) {
            return Err(Error::Validation(format!(
                "'{}' is not a GitHub repository URL",
                input
            )));
        }
        rest
    };

    let path = path.split(['?', '#']).next().unwrap_or("");
    let mut segments = path.split('/').filter(|s| !s.is_empty());
    let owner = segments.next().ok_or_else(|| invalid(input))?;
    let name = segments.next().ok_or_else(|| invalid(input))?;
    let name = name.strip_suffix(".git").unwrap_or(name);

    if !is_valid_segment(owner) || !is_valid_segment(name) {
        return Err(invalid(input));
    }

    Ok(RepositoryReference::new_unchecked(owner, name))
}

fn is_valid_segment(segment: &str) -> bool {
    !segment.is_empty()
        && segment != "."
        && segment != ".."
        && segment
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
}

fn invalid(input: &str) -> Error {
    Error::Validation(format!(
        "'{}' is not a repository reference; expected https://github.com/owner/name or git@github.com:owner/name.git",
        input
    ))
}

impl FromStr for RepositoryReference {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        parse_reference(s)
    }
}
