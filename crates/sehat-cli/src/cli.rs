use std::path::PathBuf;

use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use sehat_core::ActionStatus;

#[derive(Parser)]
#[command(name = "sehat")]
#[command(about = "SehatLink - offline-first health companion", long_about = None)]
#[command(version)]
pub struct Cli {
    /// Path to the local database
    #[arg(long, global = true)]
    pub db_path: Option<PathBuf>,

    /// Path to the settings file
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Keep everything local; do not contact the sync service
    #[arg(long, global = true)]
    pub offline: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Log a meal in the nutrition log
    #[command(alias = "add")]
    Log {
        /// What was eaten
        #[arg(trailing_var_arg = true, required = true)]
        food: Vec<String>,
    },
    /// Share the nutrition log with your community health worker
    Share {
        /// Day of the share (defaults to today)
        #[arg(long)]
        date: Option<NaiveDate>,
    },
    /// Show the nutrition log
    Meals {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show connectivity, queue and cache state
    Status {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// List queued actions
    Queue {
        /// Only show actions with this status
        #[arg(long, value_parser = parse_status)]
        status: Option<ActionStatus>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Retry failed actions and sync now
    Flush,
    /// Manage the offline asset cache
    Cache {
        #[command(subcommand)]
        command: CacheCommands,
    },
}

#[derive(Subcommand)]
pub enum CacheCommands {
    /// Precache the configured pages and wait for the install to settle
    Install,
    /// Show cache versions and entry counts
    Status {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

pub fn parse_status(value: &str) -> Result<ActionStatus, String> {
    value.trim().replace('-', "_").parse::<ActionStatus>().map_err(|_| {
        format!("unknown status '{value}' (expected pending, in-flight, synced or failed)")
    })
}
