//! chunkflow CLI — incremental article ingestion into a vector store.
//!
//! Fetches articles, splits them into content-addressed chunks, embeds only
//! what changed, and reconciles the result into a JSON document store.

mod commands;

use clap::Parser;
use color_eyre::eyre::Result;

use commands::Cli;

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    let cli = Cli::parse();
    commands::init_tracing(&cli);
    commands::run(cli).await
}
