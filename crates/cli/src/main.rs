//! Keepsake CLI - keepsake command

use anyhow::Result;
use clap::{ArgAction, Parser, Subcommand};
use keepsake_archive::UnpackMode;
use keepsake_core::Edition;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

mod cmd;
mod util;

use cmd::{FilterArgs, TargetArgs};

/// Keepsake - incremental, encrypted backups of directory trees
#[derive(Parser)]
#[command(name = "keepsake")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Job file holding one or more JSON job records
    #[arg(short, long, global = true, default_value = "backup.json")]
    job: PathBuf,

    /// Log more (-v info, -vv debug, -vvv trace); RUST_LOG overrides
    #[arg(short, long, global = true, action = ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Archive what changed in every job since its last edition
    Backup {
        #[command(flatten)]
        filters: FilterArgs,

        /// Forget editions newer than this one (e.g. 2024-01-31T12-00-00Z) first
        #[arg(long, value_name = "EDITION")]
        remove_after: Option<Edition>,
    },
    /// Restore every archive of every job, oldest edition first
    Restore {
        #[command(flatten)]
        filters: FilterArgs,

        #[command(flatten)]
        target: TargetArgs,
    },
    /// Decrypt every archive and list its entries without writing anything
    Test {
        #[command(flatten)]
        filters: FilterArgs,

        #[command(flatten)]
        target: TargetArgs,
    },
    /// List the editions recorded for every job
    Editions,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match cli.command {
        Commands::Backup {
            filters,
            remove_after,
        } => cmd::backup::run(&cli.job, &filters, remove_after),
        Commands::Restore { filters, target } => {
            cmd::unpack::run(&cli.job, &filters, &target, UnpackMode::Restore)
        }
        Commands::Test { filters, target } => {
            cmd::unpack::run(&cli.job, &filters, &target, UnpackMode::Test)
        }
        Commands::Editions => cmd::editions::run(&cli.job),
    }
}

fn init_tracing(verbose: u8) {
    let default = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}
