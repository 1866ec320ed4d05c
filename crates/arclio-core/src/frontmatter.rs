//! Splitting of YAML frontmatter from rule bodies.
//!
//! A rule file may start with a block delimited by `---` lines:
//!
//! ```text
//! ---
//! description: Error handling conventions
//! owner: platform
//! applies_to: ["rust"]
//! ---
//! Always propagate errors with `?`.
//! ```

use crate::RuleMetadata;

/// Split raw file text into metadata and body. Files without frontmatter, or
/// with frontmatter that does not parse, get default metadata; in the latter
/// case the whole text is kept as the body so nothing is silently dropped.
pub fn split(raw: &str) -> (RuleMetadata, String) {
    let Some((yaml, body)) = extract_block(raw) else {
        return (RuleMetadata::default(), raw.to_string());
    };
    if yaml.trim().is_empty() {
        return (RuleMetadata::default(), body.to_string());
    }
    match serde_yaml::from_str::<RuleMetadata>(yaml) {
        Ok(meta) => (meta, body.to_string()),
        Err(e) => {
            tracing::warn!("Ignoring malformed rule frontmatter: {}", e);
            (RuleMetadata::default(), raw.to_string())
        }
    }
}

/// Return (frontmatter, body) when `raw` opens with a `---` delimited block.
fn extract_block(raw: &str) -> Option<(&str, &str)> {
    let rest = raw
        .strip_prefix("---\n")
        .or_else(|| raw.strip_prefix("---\r\n"))?;
    let mut offset = 0;
    for line in rest.split_inclusive('\n') {
        if line.trim_end() == "---" {
            let yaml = &rest[..offset];
            let body = &rest[offset + line.len()..];
            return Some((yaml, body));
        }
        offset += line.len();
    }
    None
}
