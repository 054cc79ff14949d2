use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A validated `(owner, name)` pair. Construct through
/// [`crate::github::parse_reference`] or `str::parse`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RepositoryReference {
    owner: String,
    name: String,
}

impl RepositoryReference {
    pub(crate) fn new_unchecked(owner: &str, name: &str) -> Self {
        Self {
            owner: owner.to_string(),
            name: name.to_string(),
        }
    }

    pub fn owner(&self) -> &str {
        &self.owner
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn full_name(&self) -> String {
        format!("{}/{}", self.owner, self.name)
    }
}

impl std::fmt::Display for RepositoryReference {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.owner, self.name)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepositoryMetadata {
    pub full_name: String,
    pub description: Option<String>,
    pub default_branch: String,
    #[serde(default)]
    pub stargazers_count: u32,
    #[serde(default)]
    pub forks_count: u32,
    #[serde(default)]
    pub open_issues_count: u32,
    pub language: Option<String>,
    #[serde(default)]
    pub topics: Vec<String>,
    pub license: Option<LicenseInfo>,
    pub html_url: String,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LicenseInfo {
    pub spdx_id: Option<String>,
    pub name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryType {
    Blob,
    Tree,
    /// Submodule pointer.
    Commit,
}

/// One row of the provider's flat recursive tree listing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawTreeEntry {
    pub path: String,
    #[serde(rename = "type")]
    pub entry_type: EntryType,
    #[serde(default)]
    pub sha: String,
    pub size: Option<u64>,
}

impl RawTreeEntry {
    pub fn blob(path: &str, size: u64) -> Self {
        Self {
            path: path.to_string(),
            entry_type: EntryType::Blob,
            sha: String::new(),
            size: Some(size),
        }
    }

    pub fn tree(path: &str) -> Self {
        Self {
            path: path.to_string(),
            entry_type: EntryType::Tree,
            sha: String::new(),
            size: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NodeKind {
    File,
    Directory,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileNode {
    pub name: String,
    pub path: String,
    pub kind: NodeKind,
    pub size: Option<u64>,
    pub children: Vec<FileNode>,
}

impl FileNode {
    /// Depth-first search by full path.
    pub fn find(&self, path: &str) -> Option<&FileNode> {
        if self.path == path {
            return Some(self);
        }
        self.children.iter().find_map(|child| child.find(path))
    }
}

/// Tree listing as fetched, before reconstruction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TreeListing {
    pub entries: Vec<RawTreeEntry>,
    /// Set when the provider or the fast-mode cap cut the listing short.
    pub truncated: bool,
}

impl TreeListing {
    /// Applies the fast-mode entry cap. `None` keeps the listing whole.
    pub fn capped(mut self, limit: Option<usize>) -> Self {
        if let Some(limit) = limit {
            if self.entries.len() > limit {
                self.entries.truncate(limit);
                self.truncated = true;
            }
        }
        self
    }
}

/// Everything the core analysis needs; lives for one run only.
#[derive(Debug, Clone, Serialize)]
pub struct RepositorySnapshot {
    pub reference: RepositoryReference,
    pub metadata: RepositoryMetadata,
    pub tree: Vec<FileNode>,
    pub paths: Vec<String>,
    pub truncated: bool,
    pub readme: Option<String>,
}

impl RepositorySnapshot {
    pub fn readme_text(&self) -> &str {
        self.readme.as_deref().unwrap_or("")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn listing(count: usize, truncated: bool) -> TreeListing {
        TreeListing {
            entries: (0..count)
                .map(|i| RawTreeEntry::blob(&format!("f{}.rs", i), 1))
                .collect(),
            truncated,
        }
    }

    #[test]
    fn test_cap_truncates_and_flags() {
        let capped = listing(5, false).capped(Some(3));
        assert_eq!(capped.entries.len(), 3);
        assert!(capped.truncated);
    }

    #[test]
    fn test_cap_leaves_short_or_uncapped_listings() {
        let short = listing(2, false).capped(Some(3));
        assert_eq!(short.entries.len(), 2);
        assert!(!short.truncated);

        let whole = listing(5, false).capped(None);
        assert_eq!(whole.entries.len(), 5);
        assert!(!whole.truncated);

        // Provider-side truncation survives.
        assert!(listing(1, true).capped(None).truncated);
    }
}
