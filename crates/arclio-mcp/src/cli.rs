//! Command-line arguments shared by both entry points.
//!
//! Every option is also read from the environment, so sourcing an env file
//! before launch configures the process.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use arclio_core::{CacheConfig, InhouseRules, RuleIndex, RuleStore};
use clap::Args;

use crate::telemetry::LogFormat;

/// Where rules live and how they are cached.
#[derive(Debug, Clone, Args)]
pub struct StoreArgs {
    /// Root of the rule trees (`core/` and `clients/<id>/`). Defaults to ~/.arclio-rules
    #[arg(long, env = "RULES_DIR")]
    pub rules_dir: Option<PathBuf>,

    /// Directory holding numbered in-house rules (`rule_{id}.md`)
    #[arg(long, env = "INHOUSE_RULES_DIR", default_value = "inhouse_rules")]
    pub inhouse_rules_dir: PathBuf,

    /// Maximum number of cached catalog entries
    #[arg(long, env = "CACHE_MAX_SIZE", default_value_t = 1000)]
    pub cache_max_size: usize,

    /// Seconds a cached catalog entry stays valid
    #[arg(long, env = "CACHE_TTL_SECONDS", default_value_t = 300)]
    pub cache_ttl_seconds: u64,

    /// Log output format
    #[arg(long, env = "LOG_FORMAT", value_enum, default_value_t = LogFormat::Text)]
    pub log_format: LogFormat,
}

impl StoreArgs {
    pub fn cache_config(&self) -> CacheConfig {
        CacheConfig {
            max_entries: self.cache_max_size,
            ttl: Duration::from_secs(self.cache_ttl_seconds),
        }
    }

    pub fn rules_root(&self) -> PathBuf {
        self.rules_dir
            .clone()
            .unwrap_or_else(arclio_core::default_rules_dir)
    }

    pub fn build_index(&self) -> Arc<RuleIndex> {
        Arc::new(RuleIndex::new(
            RuleStore::new(self.rules_root()),
            self.cache_config(),
        ))
    }

    pub fn build_inhouse(&self) -> Arc<InhouseRules> {
        Arc::new(InhouseRules::new(&self.inhouse_rules_dir))
    }
}

/// Network options of the session-mode server.
#[derive(Debug, Clone, Args)]
pub struct HttpArgs {
    /// Host name or address to bind
    #[arg(long, env = "HOST", default_value = "127.0.0.1")]
    pub host: String,

    /// Port to listen on
    #[arg(short, long, env = "PORT", default_value_t = 8008)]
    pub port: u16,

    /// Mount path of the MCP endpoint
    #[arg(long, env = "MCP_PATH", default_value = "/mcp")]
    pub mcp_path: String,

    /// Single origin allowed by CORS. No origin is allowed when unset
    #[arg(long, env = "ALLOWED_ORIGIN")]
    pub allowed_origin: Option<String>,

    /// Seconds an MCP session may stay idle before its state is dropped
    #[arg(
        long,
        env = "SESSION_IDLE_SECONDS",
        default_value_t = 3600,
        value_parser = clap::value_parser!(u64).range(1..)
    )]
    pub session_idle_seconds: u64,
}

impl HttpArgs {
    /// Resolve the bind target. Host names are looked up, so `localhost`
    /// works as well as literal addresses.
    pub async fn bind(&self) -> anyhow::Result<tokio::net::TcpListener> {
        let host = self.host.trim();
        if host.is_empty() {
            bail!("HOST must not be empty");
        }
        tokio::net::TcpListener::bind((host, self.port))
            .await
            .with_context(|| format!("failed to bind {}:{}", host, self.port))
    }

    /// The MCP mount path, checked so it can be nested under the router.
    pub fn mcp_path(&self) -> anyhow::Result<&str> {
        validate_mcp_path(&self.mcp_path)
    }

    pub fn session_idle(&self) -> Duration {
        Duration::from_secs(self.session_idle_seconds)
    }
}

/// Check a mount path: absolute, not the root, free of route syntax and
/// outside the REST API prefix.
pub fn validate_mcp_path(path: &str) -> anyhow::Result<&str> {
    if !path.starts_with('/') {
        bail!("MCP_PATH must start with '/', got '{}'", path);
    }
    if path == "/" {
        bail!("MCP_PATH must not be the root path");
    }
    if path.ends_with('/') {
        bail!("MCP_PATH '{}' must not end with '/'", path);
    }
    if path.contains("//") || path.contains(['{', '}', '*']) {
        bail!("MCP_PATH '{}' is not a plain path", path);
    }
    if path == "/api" || path.starts_with("/api/") {
        bail!("MCP_PATH '{}' collides with the REST API", path);
    }
    Ok(path)
}
