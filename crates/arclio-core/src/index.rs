//! Cached read access to the rule store.

use std::path::Path;

use crate::{
    cache::{CacheConfig, RuleCache},
    sanitize_relative, RuleDocument, RuleEntry, RuleResult, RuleStore, SearchHit, MAIN_RULE,
    RULE_EXTENSION,
};

/// Catalog lookups served from a [`RuleCache`] in front of a [`RuleStore`].
///
/// Client rule reads (`get_rule_content`, `list_rules`) and searches always
/// hit the filesystem; only the catalog view is cached.
pub struct RuleIndex {
    store: RuleStore,
    cache: RuleCache,
}

impl RuleIndex {
    pub fn new(store: RuleStore, config: CacheConfig) -> Self {
        Self {
            store,
            cache: RuleCache::new(config),
        }
    }

    pub fn store(&self) -> &RuleStore {
        &self.store
    }

    pub fn cache(&self) -> &RuleCache {
        &self.cache
    }

    pub fn list_companies(&self) -> RuleResult<Vec<String>> {
        self.cache
            .get_or_fetch("list_companies", &[], || self.store.list_companies())
    }

    pub fn list_categories(&self, company: &str) -> RuleResult<Vec<String>> {
        self.cache
            .get_or_fetch("list_categories", &[("company", company)], || {
                self.store.list_categories(company)
            })
    }

    pub fn list_category_rules(&self, company: &str, category: &str) -> RuleResult<Vec<String>> {
        self.cache.get_or_fetch(
            "list_category_rules",
            &[("company", company), ("category", category)],
            || self.store.list_category_rules(company, category),
        )
    }

    pub fn get_rule(
        &self,
        company: &str,
        category: &str,
        rule: &str,
        is_main_rule: bool,
    ) -> RuleResult<RuleDocument> {
        // The rule name is irrelevant for main rules; normalise it so every
        // main-rule read shares one entry.
        let rule_key = if is_main_rule { main_rule_stem() } else { rule };
        self.cache.get_or_fetch(
            "get_rule",
            &[
                ("company", company),
                ("category", category),
                ("rule", rule_key),
                ("is_main_rule", bool_str(is_main_rule)),
            ],
            || self.store.get_rule(company, category, rule, is_main_rule),
        )
    }

    pub fn get_rule_content(&self, client_id: &str, rule_path: &str) -> RuleResult<RuleDocument> {
        self.store.get_rule_content(client_id, rule_path)
    }

    pub fn list_rules(&self, client_id: &str, directory: &str) -> RuleResult<Vec<RuleEntry>> {
        self.store.list_rules(client_id, directory)
    }

    pub fn search(&self, client_id: &str, query: &str, limit: usize) -> RuleResult<Vec<SearchHit>> {
        self.store.search(client_id, query, limit)
    }

    /// Write through to the store, then drop every cached catalog entry the
    /// write could have changed.
    pub fn save_rule(
        &self,
        client_id: &str,
        rule_path: &str,
        content: &str,
        commit_message: Option<&str>,
    ) -> RuleResult<String> {
        let saved = self
            .store
            .save_rule_content(client_id, rule_path, content, commit_message)?;
        self.invalidate_for(client_id, &saved)?;
        Ok(saved)
    }

    fn invalidate_for(&self, company: &str, saved: &str) -> RuleResult<()> {
        self.cache.invalidate("list_companies", &[]);
        self.cache.invalidate("list_categories", &[("company", company)]);

        let rel = sanitize_relative(saved, false)?;
        let mut parts = rel.components();
        let (Some(category), Some(file), None) = (parts.next(), parts.next(), parts.next()) else {
            return Ok(());
        };
        let category = category.as_os_str().to_string_lossy().to_string();
        let file = Path::new(file.as_os_str());
        if file.extension().and_then(|e| e.to_str()) != Some(RULE_EXTENSION) {
            return Ok(());
        }
        let stem = file
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_default();

        self.cache.invalidate(
            "list_category_rules",
            &[("company", company), ("category", category.as_str())],
        );
        let is_main = stem == main_rule_stem();
        self.cache.invalidate(
            "get_rule",
            &[
                ("company", company),
                ("category", category.as_str()),
                ("rule", stem.as_str()),
                ("is_main_rule", bool_str(is_main)),
            ],
        );
        if is_main {
            // A rule literally named "index" can also be read as a non-main rule.
            self.cache.invalidate(
                "get_rule",
                &[
                    ("company", company),
                    ("category", category.as_str()),
                    ("rule", stem.as_str()),
                    ("is_main_rule", bool_str(false)),
                ],
            );
        }
        Ok(())
    }
}

fn main_rule_stem() -> &'static str {
    MAIN_RULE
        .strip_suffix(&format!(".{}", RULE_EXTENSION))
        .unwrap_or(MAIN_RULE)
}

fn bool_str(b: bool) -> &'static str {
    if b {
        "true"
    } else {
        "false"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::time::Duration;
    use tempfile::TempDir;

    fn index() -> (TempDir, RuleIndex) {
        let dir = TempDir::new().unwrap();
        let cat = dir.path().join("clients/acme/backend");
        fs::create_dir_all(&cat).unwrap();
        fs::write(cat.join("errors.mdc"), "v1").unwrap();
        fs::write(cat.join("index.mdc"), "main v1").unwrap();
        let index = RuleIndex::new(
            RuleStore::new(dir.path()),
            CacheConfig {
                max_entries: 100,
                ttl: Duration::from_secs(60),
            },
        );
        (dir, index)
    }

    #[test]
    fn catalog_reads_are_cached() {
        let (dir, index) = index();
        assert_eq!(index.get_rule("acme", "backend", "errors", false).unwrap().content, "v1");
        fs::write(dir.path().join("clients/acme/backend/errors.mdc"), "changed on disk").unwrap();
        assert_eq!(index.get_rule("acme", "backend", "errors", false).unwrap().content, "v1");
    }

    #[test]
    fn save_invalidates_affected_entries() {
        let (_dir, index) = index();
        assert_eq!(index.list_companies().unwrap(), vec!["acme"]);
        assert_eq!(index.list_category_rules("acme", "backend").unwrap(), vec!["errors", "index"]);
        index.get_rule("acme", "backend", "errors", false).unwrap();

        index.save_rule("acme", "backend/errors.mdc", "v2", None).unwrap();
        index.save_rule("acme", "backend/retries.mdc", "retry", None).unwrap();
        index.save_rule("globex", "frontend/a11y.mdc", "labels", None).unwrap();

        assert_eq!(index.get_rule("acme", "backend", "errors", false).unwrap().content, "v2");
        assert_eq!(
            index.list_category_rules("acme", "backend").unwrap(),
            vec!["errors", "index", "retries"]
        );
        assert_eq!(index.list_companies().unwrap(), vec!["acme", "globex"]);
    }

    #[test]
    fn main_rule_shares_one_entry() {
        let (_dir, index) = index();
        assert_eq!(index.get_rule("acme", "backend", "whatever", true).unwrap().content, "main v1");
        index.save_rule("acme", "backend/index.mdc", "main v2", None).unwrap();
        assert_eq!(index.get_rule("acme", "backend", "other", true).unwrap().content, "main v2");
    }

    #[test]
    fn fetch_errors_propagate() {
        let (_dir, index) = index();
        assert!(index.get_rule("acme", "backend", "missing", false).is_err());
        assert!(index.cache().is_empty());
    }

    #[test]
    fn crafted_names_do_not_hit_another_company() {
        let (dir, index) = index();
        let globex = dir.path().join("clients/globex/backend");
        fs::create_dir_all(&globex).unwrap();
        fs::write(globex.join("secret.mdc"), "globex only").unwrap();

        assert_eq!(index.list_category_rules("globex", "backend").unwrap(), vec!["secret"]);
        assert!(index.list_category_rules("backend&company=globex", "x").is_err());
        assert!(index.list_category_rules("acme", "backend&company=globex").is_err());
        assert_eq!(
            index.list_category_rules("acme", "backend").unwrap(),
            vec!["errors", "index"]
        );
    }
}
