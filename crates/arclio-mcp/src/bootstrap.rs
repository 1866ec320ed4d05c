//! Process start-up for the two operating modes.
//!
//! The mode is chosen by the executable: `arclio-mcp` runs
//! [`ServeMode::Session`], `arclio-mcp-stdio` runs [`ServeMode::Stateless`].
//! There is no runtime switch between them.

use std::sync::Arc;

use rmcp::ServiceExt;

use crate::cli::{HttpArgs, StoreArgs};
use crate::http;
use crate::server::RulesServer;
use crate::session::{self, SessionStore};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServeMode {
    /// Streamable HTTP with per-session state
    Session,
    /// Stdin/stdout with no retained state
    Stateless,
}

impl ServeMode {
    pub fn keeps_sessions(self) -> bool {
        matches!(self, ServeMode::Session)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ServeMode::Session => "session",
            ServeMode::Stateless => "stateless",
        }
    }
}

/// Build the MCP handler for `mode`. Only session mode gets a session store.
pub fn build_server(mode: ServeMode, store: &StoreArgs) -> RulesServer {
    let sessions = mode.keeps_sessions().then(|| Arc::new(SessionStore::new()));
    RulesServer::new(store.build_index(), store.build_inhouse(), sessions)
}

/// Serve MCP over streamable HTTP alongside the REST API until Ctrl-C.
pub async fn serve_session(store: StoreArgs, http_args: HttpArgs) -> anyhow::Result<()> {
    let server = build_server(ServeMode::Session, &store);
    server.log_inventory();

    let sessions = server.sessions().cloned();
    let app = http::app(server, &http_args)?;
    let listener = http_args.bind().await?;
    let sweeper = sessions
        .map(|sessions| tokio::spawn(session::sweep_idle(sessions, http_args.session_idle())));
    tracing::info!(
        mode = ServeMode::Session.as_str(),
        "Starting server on {} (MCP at {})",
        listener.local_addr()?,
        http_args.mcp_path
    );
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    if let Some(sweeper) = sweeper {
        sweeper.abort();
    }
    tracing::info!("Server stopped");
    Ok(())
}

/// Serve MCP over stdin/stdout until the peer disconnects.
pub async fn serve_stateless(store: StoreArgs) -> anyhow::Result<()> {
    let server = build_server(ServeMode::Stateless, &store);
    server.log_inventory();
    tracing::info!(mode = ServeMode::Stateless.as_str(), "Serving MCP over stdio");

    let service = server
        .serve(rmcp::transport::io::stdio())
        .await
        .inspect_err(|e| tracing::error!("MCP server error: {}", e))?;
    service.waiting().await?;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::telemetry::LogFormat;

    fn store_args(dir: &std::path::Path) -> StoreArgs {
        StoreArgs {
            rules_dir: Some(dir.join("rules")),
            inhouse_rules_dir: dir.join("inhouse"),
            cache_max_size: 10,
            cache_ttl_seconds: 60,
            log_format: LogFormat::Text,
        }
    }

    #[test]
    fn modes_are_distinct() {
        assert_ne!(ServeMode::Session, ServeMode::Stateless);
        assert!(ServeMode::Session.keeps_sessions());
        assert!(!ServeMode::Stateless.keeps_sessions());
    }

    #[test]
    fn only_session_mode_builds_a_session_store() {
        let dir = tempfile::tempdir().unwrap();
        let args = store_args(dir.path());
        assert!(build_server(ServeMode::Session, &args).keeps_sessions());
        assert!(!build_server(ServeMode::Stateless, &args).keeps_sessions());
    }
}
