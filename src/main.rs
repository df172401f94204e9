mod cli;
mod comment;
mod error;
mod gitlab;
mod meetings;
mod message;
mod server;
mod watcher;

use anyhow::Result;
use clap::Parser;
use cli::Cli;
use log::info;

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();

    let cli = Cli::parse();
    info!("Starting pipedash - pipeline status dashboard");
    cli.execute().await?;

    Ok(())
}
