//! Session-mode entry point: MCP over streamable HTTP plus the REST API.

use arclio_mcp::cli::{HttpArgs, StoreArgs};
use arclio_mcp::{bootstrap, telemetry};
use clap::Parser;

#[derive(Parser)]
#[command(name = "arclio-mcp")]
#[command(about = "Arclio rules MCP server (streamable HTTP, session mode)")]
#[command(version)]
struct Cli {
    #[command(flatten)]
    store: StoreArgs,

    #[command(flatten)]
    http: HttpArgs,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    telemetry::init(cli.store.log_format);
    bootstrap::serve_session(cli.store, cli.http).await
}
