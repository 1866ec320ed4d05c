pub mod cache;
pub mod error;
pub mod frontmatter;
pub mod index;
pub mod inhouse;
pub mod store;

pub use cache::{CacheConfig, RuleCache};
pub use error::{RuleError, RuleResult};
pub use index::RuleIndex;
pub use inhouse::InhouseRules;
pub use store::RuleStore;

use serde::{Deserialize, Serialize};
use std::path::{Component, Path, PathBuf};

/// File extension of rule documents.
pub const RULE_EXTENSION: &str = "mdc";

/// File name of a category's main rule.
pub const MAIN_RULE: &str = "index.mdc";

// --- Types ---

/// Frontmatter metadata of a rule document.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, schemars::JsonSchema)]
pub struct RuleMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default = "default_version")]
    pub version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_updated: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub applies_to: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dependencies: Option<Vec<String>>,
}

impl Default for RuleMetadata {
    fn default() -> Self {
        Self {
            description: None,
            version: default_version(),
            owner: None,
            last_updated: None,
            applies_to: None,
            dependencies: None,
        }
    }
}

fn default_version() -> String {
    "1.0.0".to_string()
}

/// Which tree a rule was read from.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RuleSource {
    Client,
    Core,
}

/// A rule read from disk, frontmatter split from the body.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RuleDocument {
    pub name: String,
    /// Path relative to the tree the rule was found in
    pub path: String,
    pub content: String,
    pub metadata: RuleMetadata,
    pub source: RuleSource,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    Dir,
    File,
}

/// One item of a directory listing.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RuleEntry {
    pub name: String,
    pub path: String,
    #[serde(rename = "type")]
    pub kind: EntryKind,
    /// Hex SHA-256 of the file content (files only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sha: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SearchHit {
    pub path: String,
    pub name: String,
    pub score: usize,
    pub snippet: String,
    pub source: RuleSource,
}

/// Payload of the `rules://{rule_id}/profile` resource.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RuleProfile {
    pub name: String,
    pub content: String,
    pub status: String,
    pub session_id: Option<String>,
}

impl RuleProfile {
    pub fn active(rule_id: u32, content: String, session_id: Option<String>) -> Self {
        Self {
            name: format!("Rule:{}", rule_id),
            content,
            status: "active".to_string(),
            session_id,
        }
    }
}

// --- Paths ---

/// Resolve the default rules root (~/.arclio-rules/).
pub fn default_rules_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".arclio-rules")
}

/// Normalise a caller-supplied relative path, rejecting anything that could
/// leave its root. Leading and trailing slashes are ignored; an empty result
/// is only accepted when `allow_empty` is set (for "list the root").
pub fn sanitize_relative(path: &str, allow_empty: bool) -> RuleResult<PathBuf> {
    let trimmed = path.trim_matches('/');
    if trimmed.is_empty() {
        return if allow_empty {
            Ok(PathBuf::new())
        } else {
            Err(RuleError::InvalidPath(path.to_string()))
        };
    }
    if trimmed.split('/').any(|seg| seg.is_empty() || seg == "." || seg == "..") {
        return Err(RuleError::InvalidPath(path.to_string()));
    }
    let candidate = Path::new(trimmed);
    if !candidate
        .components()
        .all(|c| matches!(c, Component::Normal(_)))
    {
        return Err(RuleError::InvalidPath(path.to_string()));
    }
    Ok(candidate.to_path_buf())
}

/// Validate a single path segment such as a client, company or category name.
pub fn sanitize_segment(name: &str) -> RuleResult<&str> {
    if name.is_empty()
        || name == "."
        || name == ".."
        || name.contains(['/', '\\', '&', '='])
    {
        return Err(RuleError::InvalidPath(name.to_string()));
    }
    Ok(name)
}

/// Render a relative path with forward slashes regardless of platform.
pub fn display_relative(path: &Path) -> String {
    path.components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}
