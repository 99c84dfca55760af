mod cli;
mod commands;
mod config;
mod error;
#[cfg(test)]
mod tests;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use crate::cli::{Cli, Commands};
use crate::commands::cache::run_cache;
use crate::commands::flush::run_flush;
use crate::commands::log::run_log;
use crate::commands::meals::run_meals;
use crate::commands::queue::run_queue;
use crate::commands::share::run_share;
use crate::commands::status::run_status;
use crate::config::Context;
use crate::error::CliError;

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        eprintln!("Error: {error}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), CliError> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("sehat=info")),
        )
        .init();

    let cli = Cli::parse();
    let ctx = Context::resolve(cli.db_path, cli.config, cli.offline)?;

    match cli.command {
        Commands::Log { food } => run_log(&food, &ctx).await,
        Commands::Share { date } => run_share(date, &ctx).await,
        Commands::Meals { json } => run_meals(json, &ctx).await,
        Commands::Status { json } => run_status(json, &ctx).await,
        Commands::Queue { status, json } => run_queue(status, json, &ctx).await,
        Commands::Flush => run_flush(&ctx).await,
        Commands::Cache { command } => run_cache(command, &ctx).await,
    }
}
