//! Filesystem-backed rule storage.
//!
//! Layout under the rules root:
//!
//! ```text
//! <root>/core/...                  shared rules, fallback for every client
//! <root>/clients/<client_id>/...   per-client rules
//! ```
//!
//! The catalog view treats each client directory as a company whose
//! immediate sub-directories are categories holding `.mdc` rules.

use sha2::{Digest, Sha256};
use std::collections::HashSet;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::{
    display_relative, frontmatter, sanitize_relative, sanitize_segment, EntryKind, RuleDocument,
    RuleEntry, RuleError, RuleResult, RuleSource, SearchHit, MAIN_RULE, RULE_EXTENSION,
};

pub const MAX_SEARCH_LIMIT: usize = 100;
pub const DEFAULT_SEARCH_LIMIT: usize = 10;

#[derive(Debug, Clone)]
pub struct RuleStore {
    root: PathBuf,
}

impl RuleStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        tracing::info!("Rule store rooted at {}", root.display());
        Self { root }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn core_dir(&self) -> PathBuf {
        self.root.join("core")
    }

    fn clients_dir(&self) -> PathBuf {
        self.root.join("clients")
    }

    pub fn client_dir(&self, client_id: &str) -> RuleResult<PathBuf> {
        Ok(self.clients_dir().join(sanitize_segment(client_id)?))
    }

    // --- Client rules ---

    /// Read a rule from the client tree, falling back to the core tree.
    pub fn get_rule_content(&self, client_id: &str, rule_path: &str) -> RuleResult<RuleDocument> {
        let rel = sanitize_relative(rule_path, false)?;
        let client_file = self.client_dir(client_id)?.join(&rel);
        if client_file.is_file() {
            return read_document(&client_file, &rel, RuleSource::Client);
        }
        let core_file = self.core_dir().join(&rel);
        if core_file.is_file() {
            tracing::debug!("Rule '{}' served from core for client '{}'", rule_path, client_id);
            return read_document(&core_file, &rel, RuleSource::Core);
        }
        Err(RuleError::NotFound(format!(
            "rule '{}' for client '{}'",
            display_relative(&rel),
            client_id
        )))
    }

    /// Write a rule into the client tree. Returns the normalised relative path.
    ///
    /// Uses atomic write (temp file + rename) so concurrent readers never see
    /// a truncated rule.
    pub fn save_rule_content(
        &self,
        client_id: &str,
        rule_path: &str,
        content: &str,
        commit_message: Option<&str>,
    ) -> RuleResult<String> {
        if content.trim().is_empty() {
            return Err(RuleError::EmptyContent);
        }
        let rel = sanitize_relative(rule_path, false)?;
        let path = self.client_dir(client_id)?.join(&rel);
        let parent = path
            .parent()
            .ok_or_else(|| RuleError::InvalidPath(rule_path.to_string()))?;
        fs::create_dir_all(parent)?;

        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .ok_or_else(|| RuleError::InvalidPath(rule_path.to_string()))?;
        let mut tmp = tempfile::Builder::new()
            .prefix(&format!(".{}.", file_name))
            .suffix(".tmp")
            .tempfile_in(parent)?;
        tmp.write_all(content.as_bytes())?;
        tmp.persist(&path).map_err(|e| RuleError::Io(e.error))?;

        let shown = display_relative(&rel);
        let message = commit_message
            .filter(|m| !m.trim().is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| format!("Update {}", shown));
        tracing::info!(client = client_id, path = %shown, "Saved rule: {}", message);
        Ok(shown)
    }

    /// List sub-directories and `.mdc` files of one client directory.
    pub fn list_rules(&self, client_id: &str, directory: &str) -> RuleResult<Vec<RuleEntry>> {
        let rel = sanitize_relative(directory, true)?;
        let dir = self.client_dir(client_id)?.join(&rel);
        if !dir.is_dir() {
            return Err(RuleError::NotFound(format!(
                "directory '{}' for client '{}'",
                display_relative(&rel),
                client_id
            )));
        }

        let mut entries = Vec::new();
        for entry in fs::read_dir(&dir)? {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().to_string();
            if name.starts_with('.') {
                continue;
            }
            let path = display_relative(&rel.join(&name));
            let file_type = entry.file_type()?;
            if file_type.is_dir() {
                entries.push(RuleEntry {
                    name,
                    path,
                    kind: EntryKind::Dir,
                    sha: None,
                });
            } else if is_rule_file(&entry.path()) {
                let bytes = fs::read(entry.path())?;
                entries.push(RuleEntry {
                    name,
                    path,
                    kind: EntryKind::File,
                    sha: Some(content_sha(&bytes)),
                });
            }
        }
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(entries)
    }

    // --- Catalog ---

    /// List all company (client) names, sorted.
    pub fn list_companies(&self) -> RuleResult<Vec<String>> {
        list_subdirs(&self.clients_dir())
    }

    pub fn list_categories(&self, company: &str) -> RuleResult<Vec<String>> {
        let dir = self.client_dir(company)?;
        if !dir.is_dir() {
            return Err(RuleError::NotFound(format!("company '{}'", company)));
        }
        list_subdirs(&dir)
    }

    /// List rule names (without extension) in a company category, sorted.
    pub fn list_category_rules(&self, company: &str, category: &str) -> RuleResult<Vec<String>> {
        let dir = self.client_dir(company)?.join(sanitize_segment(category)?);
        if !dir.is_dir() {
            return Err(RuleError::NotFound(format!(
                "category '{}' for company '{}'",
                category, company
            )));
        }
        let mut names: Vec<String> = fs::read_dir(&dir)?
            .filter_map(|entry| {
                let entry = entry.ok()?;
                let name = entry.file_name().to_string_lossy().to_string();
                if name.starts_with('.') {
                    return None;
                }
                name.strip_suffix(&format!(".{}", RULE_EXTENSION))
                    .map(|n| n.to_string())
            })
            .collect();
        names.sort();
        Ok(names)
    }

    /// Read a catalog rule. `is_main_rule` selects the category's `index.mdc`
    /// and ignores `rule`.
    pub fn get_rule(
        &self,
        company: &str,
        category: &str,
        rule: &str,
        is_main_rule: bool,
    ) -> RuleResult<RuleDocument> {
        let category = sanitize_segment(category)?;
        let file_name = if is_main_rule {
            MAIN_RULE.to_string()
        } else {
            format!("{}.{}", sanitize_segment(rule)?, RULE_EXTENSION)
        };
        let rel = Path::new(category).join(&file_name);
        let path = self.client_dir(company)?.join(&rel);
        if !path.is_file() {
            return Err(RuleError::NotFound(format!(
                "rule '{}' for company '{}'",
                display_relative(&rel),
                company
            )));
        }
        read_document(&path, &rel, RuleSource::Client)
    }

    // --- Search ---

    /// Case-insensitive text search over the client's rules and the core
    /// rules. Client files shadow core files with the same relative path.
    pub fn search(&self, client_id: &str, query: &str, limit: usize) -> RuleResult<Vec<SearchHit>> {
        let needle = query.trim().to_lowercase();
        if needle.is_empty() {
            return Err(RuleError::InvalidQuery("query is required".to_string()));
        }
        if limit == 0 || limit > MAX_SEARCH_LIMIT {
            return Err(RuleError::InvalidQuery(format!(
                "limit must be between 1 and {}",
                MAX_SEARCH_LIMIT
            )));
        }

        let mut seen: HashSet<String> = HashSet::new();
        let mut hits = Vec::new();
        let trees = [
            (self.client_dir(client_id)?, RuleSource::Client),
            (self.core_dir(), RuleSource::Core),
        ];
        for (root, source) in trees {
            if !root.is_dir() {
                continue;
            }
            for entry in ignore::WalkBuilder::new(&root).build() {
                let entry = match entry {
                    Ok(e) => e,
                    Err(e) => {
                        tracing::warn!("Skipping unreadable entry during search: {}", e);
                        continue;
                    }
                };
                let path = entry.path();
                if !path.is_file() || !is_rule_file(path) {
                    continue;
                }
                let rel = match path.strip_prefix(&root) {
                    Ok(r) => display_relative(r),
                    Err(_) => continue,
                };
                if !seen.insert(rel.clone()) {
                    continue;
                }
                let text = match fs::read_to_string(path) {
                    Ok(t) => t,
                    Err(e) => {
                        tracing::warn!("Skipping unreadable rule {} during search: {}", rel, e);
                        continue;
                    }
                };
                if let Some(hit) = score(&text, &needle, rel, source) {
                    hits.push(hit);
                }
            }
        }

        hits.sort_by(|a, b| b.score.cmp(&a.score).then_with(|| a.path.cmp(&b.path)));
        hits.truncate(limit);
        Ok(hits)
    }
}

fn score(text: &str, needle: &str, path: String, source: RuleSource) -> Option<SearchHit> {
    let lowered = text.to_lowercase();
    let count = lowered.matches(needle).count();
    if count == 0 {
        return None;
    }
    let snippet = text
        .lines()
        .find(|line| line.to_lowercase().contains(needle))
        .unwrap_or_default()
        .trim()
        .to_string();
    let name = path.rsplit('/').next().unwrap_or(&path).to_string();
    Some(SearchHit {
        path,
        name,
        score: count,
        snippet,
        source,
    })
}

fn read_document(path: &Path, rel: &Path, source: RuleSource) -> RuleResult<RuleDocument> {
    let raw = fs::read_to_string(path)?;
    let (metadata, content) = frontmatter::split(&raw);
    let name = rel
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_default();
    Ok(RuleDocument {
        name,
        path: display_relative(rel),
        content,
        metadata,
        source,
    })
}

fn list_subdirs(dir: &Path) -> RuleResult<Vec<String>> {
    if !dir.exists() {
        return Ok(vec![]);
    }
    let mut names: Vec<String> = fs::read_dir(dir)?
        .filter_map(|entry| {
            let entry = entry.ok()?;
            if !entry.file_type().ok()?.is_dir() {
                return None;
            }
            let name = entry.file_name().to_string_lossy().to_string();
            (!name.starts_with('.')).then_some(name)
        })
        .collect();
    names.sort();
    Ok(names)
}

fn is_rule_file(path: &Path) -> bool {
    path.extension().and_then(|e| e.to_str()) == Some(RULE_EXTENSION)
}

/// Hex SHA-256 of a file's bytes.
pub fn content_sha(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write(root: &Path, rel: &str, text: &str) {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, text).unwrap();
    }

    fn fixture() -> (TempDir, RuleStore) {
        let dir = TempDir::new().unwrap();
        let root = dir.path();
        write(root, "core/style.mdc", "Core style: prefer small functions.");
        write(root, "core/shared/logging.mdc", "Log with structured fields.");
        write(
            root,
            "clients/acme/style.mdc",
            "---\nowner: acme\n---\nAcme style: tabs.",
        );
        write(root, "clients/acme/backend/index.mdc", "Backend main rule.");
        write(root, "clients/acme/backend/errors.mdc", "Errors must be logged. Log twice? No, log once.");
        write(root, "clients/acme/backend/notes.txt", "not a rule");
        write(root, "clients/globex/frontend/a11y.mdc", "Label every input.");
        let store = RuleStore::new(root);
        (dir, store)
    }

    #[test]
    fn client_rule_shadows_core() {
        let (_dir, store) = fixture();
        let doc = store.get_rule_content("acme", "style.mdc").unwrap();
        assert_eq!(doc.source, RuleSource::Client);
        assert_eq!(doc.content, "Acme style: tabs.");
        assert_eq!(doc.metadata.owner.as_deref(), Some("acme"));
        assert_eq!(doc.name, "style");
    }

    #[test]
    fn falls_back_to_core() {
        let (_dir, store) = fixture();
        let doc = store.get_rule_content("globex", "shared/logging.mdc").unwrap();
        assert_eq!(doc.source, RuleSource::Core);
        assert_eq!(doc.path, "shared/logging.mdc");
    }

    #[test]
    fn missing_rule_is_not_found() {
        let (_dir, store) = fixture();
        assert!(matches!(
            store.get_rule_content("acme", "nope.mdc"),
            Err(RuleError::NotFound(_))
        ));
    }

    #[test]
    fn traversal_is_rejected() {
        let (_dir, store) = fixture();
        assert!(matches!(
            store.get_rule_content("acme", "../globex/frontend/a11y.mdc"),
            Err(RuleError::InvalidPath(_))
        ));
        assert!(matches!(
            store.get_rule_content("..", "style.mdc"),
            Err(RuleError::InvalidPath(_))
        ));
    }

    #[test]
    fn save_then_read_back() {
        let (_dir, store) = fixture();
        let saved = store
            .save_rule_content("initech", "/ops/deploy.mdc", "Deploy on Fridays never.", None)
            .unwrap();
        assert_eq!(saved, "ops/deploy.mdc");
        let doc = store.get_rule_content("initech", "ops/deploy.mdc").unwrap();
        assert_eq!(doc.content, "Deploy on Fridays never.");
        let dir = store.client_dir("initech").unwrap().join("ops");
        let leftovers: Vec<_> = fs::read_dir(dir)
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[test]
    fn save_rejects_empty_content() {
        let (_dir, store) = fixture();
        assert!(matches!(
            store.save_rule_content("acme", "x.mdc", "  \n", Some("msg")),
            Err(RuleError::EmptyContent)
        ));
    }

    #[test]
    fn list_rules_returns_dirs_and_rule_files() {
        let (_dir, store) = fixture();
        let root = store.list_rules("acme", "").unwrap();
        let names: Vec<_> = root.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["backend", "style.mdc"]);
        assert_eq!(root[0].kind, EntryKind::Dir);
        assert!(root[0].sha.is_none());

        let backend = store.list_rules("acme", "backend").unwrap();
        let paths: Vec<_> = backend.iter().map(|e| e.path.as_str()).collect();
        assert_eq!(paths, vec!["backend/errors.mdc", "backend/index.mdc"]);
        assert_eq!(
            backend[1].sha.as_deref(),
            Some(content_sha(b"Backend main rule.").as_str())
        );
    }

    #[test]
    fn list_missing_directory_is_not_found() {
        let (_dir, store) = fixture();
        assert!(matches!(
            store.list_rules("acme", "frontend"),
            Err(RuleError::NotFound(_))
        ));
    }

    #[test]
    fn catalog_listing() {
        let (_dir, store) = fixture();
        assert_eq!(store.list_companies().unwrap(), vec!["acme", "globex"]);
        assert_eq!(store.list_categories("acme").unwrap(), vec!["backend"]);
        assert_eq!(
            store.list_category_rules("acme", "backend").unwrap(),
            vec!["errors", "index"]
        );
        assert!(store.list_categories("umbrella").is_err());
    }

    #[test]
    fn catalog_main_rule() {
        let (_dir, store) = fixture();
        let main = store.get_rule("acme", "backend", "ignored", true).unwrap();
        assert_eq!(main.content, "Backend main rule.");
        assert_eq!(main.path, "backend/index.mdc");
        let errors = store.get_rule("acme", "backend", "errors", false).unwrap();
        assert_eq!(errors.name, "errors");
    }

    #[test]
    fn empty_root_has_no_companies() {
        let dir = TempDir::new().unwrap();
        let store = RuleStore::new(dir.path().join("missing"));
        assert!(store.list_companies().unwrap().is_empty());
    }

    #[test]
    fn search_ranks_by_occurrences() {
        let (_dir, store) = fixture();
        let hits = store.search("acme", "LOG", 10).unwrap();
        let paths: Vec<_> = hits.iter().map(|h| h.path.as_str()).collect();
        assert_eq!(paths, vec!["backend/errors.mdc", "shared/logging.mdc"]);
        assert_eq!(hits[0].score, 3);
        assert_eq!(hits[1].source, RuleSource::Core);
        assert_eq!(hits[1].snippet, "Log with structured fields.");
    }

    #[test]
    fn search_client_shadows_core_path() {
        let (_dir, store) = fixture();
        let hits = store.search("acme", "style", 10).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].source, RuleSource::Client);
    }

    #[test]
    fn search_validates_input() {
        let (_dir, store) = fixture();
        assert!(matches!(store.search("acme", "  ", 10), Err(RuleError::InvalidQuery(_))));
        assert!(store.search("acme", "log", 0).is_err());
        assert!(store.search("acme", "log", 101).is_err());
        assert_eq!(store.search("acme", "log", 1).unwrap().len(), 1);
    }

    #[test]
    fn search_skips_unreadable_rule_files() {
        let (dir, store) = fixture();
        fs::write(dir.path().join("core/binary.mdc"), [0xff, 0xfe, b'l', b'o', b'g']).unwrap();
        let hits = store.search("acme", "log", 10).unwrap();
        let paths: Vec<_> = hits.iter().map(|h| h.path.as_str()).collect();
        assert_eq!(paths, vec!["backend/errors.mdc", "shared/logging.mdc"]);
    }

    #[test]
    fn concurrent_saves_to_one_rule_all_succeed() {
        let (_dir, store) = fixture();
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let store = store.clone();
                std::thread::spawn(move || {
                    store.save_rule_content("acme", "backend/race.mdc", &format!("version {}", i), None)
                })
            })
            .collect();
        for handle in handles {
            assert!(handle.join().unwrap().is_ok());
        }
        let doc = store.get_rule_content("acme", "backend/race.mdc").unwrap();
        assert!(doc.content.starts_with("version "));
        let leftovers = fs::read_dir(store.client_dir("acme").unwrap().join("backend"))
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
            .count();
        assert_eq!(leftovers, 0);
    }
}
