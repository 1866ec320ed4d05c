use std::fs;
use std::path::{Path, PathBuf};

use crate::{RuleError, RuleResult};

/// Numbered in-house rules stored as `rule_{id}.md` in one directory.
#[derive(Debug, Clone)]
pub struct InhouseRules {
    dir: PathBuf,
}

impl InhouseRules {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, rule_id: u32) -> PathBuf {
        self.dir.join(format!("rule_{}.md", rule_id))
    }

    pub fn read(&self, rule_id: u32) -> RuleResult<String> {
        let path = self.path_for(rule_id);
        fs::read_to_string(&path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => {
                RuleError::NotFound(format!("in-house rule {}", rule_id))
            }
            _ => RuleError::Io(e),
        })
    }
}
