//! Stateless entry point: MCP over stdin/stdout.

use arclio_mcp::cli::StoreArgs;
use arclio_mcp::{bootstrap, telemetry};
use clap::Parser;

#[derive(Parser)]
#[command(name = "arclio-mcp-stdio")]
#[command(about = "Arclio rules MCP server (stdio, stateless mode)")]
#[command(version)]
struct Cli {
    #[command(flatten)]
    store: StoreArgs,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    telemetry::init(cli.store.log_format);
    bootstrap::serve_stateless(cli.store).await
}
