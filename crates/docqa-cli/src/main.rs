//! docqa CLI - ingest documents and ask questions about them
#![cfg_attr(
    test,
    allow(
        dead_code,
        clippy::expect_used,
        clippy::unwrap_used,
        clippy::missing_panics_doc,
        reason = "Allow for tests"
    )
)]

use anyhow::Result;
use clap::Parser as _;
use cli::{Cli, Commands};
use docqa_core::DocqaConfig;
use handlers::App;

mod cli;
mod handlers;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Load or create configuration from ~/.docqa/config.toml
    let config = DocqaConfig::load_or_create()?;
    handlers::init_tracing(&config, cli.verbose)?;
    let app = App::build(&config)?;

    match cli.command {
        Commands::Ingest { path, title } => {
            handlers::handle_ingest(&app, &path, title.as_deref()).await?;
        }
        Commands::List => handlers::handle_list(&app).await?,
        Commands::Delete { id } => handlers::handle_delete(&app, &id).await?,
        Commands::Search { query, top_k } => {
            handlers::handle_search(&app, &query, top_k).await?;
        }
        Commands::Ask {
            question,
            request_id,
        } => {
            handlers::handle_ask(&app, &question, request_id).await?;
        }
        Commands::Stats => handlers::handle_stats(&app).await?,
    }

    Ok(())
}
