//! Command-line interface definitions for the `caravan` binary.
//!
//! This module centralises the clap parser structures so both the main
//! binary and the build script can reuse them when generating the manual
//! page.

use camino::Utf8PathBuf;
use clap::Parser;

/// Top-level CLI for the `caravan` binary.
#[derive(Debug, Parser)]
#[command(
    name = "caravan",
    about = "Coordinate data migrations into a new cluster",
    arg_required_else_help = true
)]
pub(crate) enum Cli {
    /// Start migrating the configured data structures.
    #[command(name = "start", about = "Start migrating the configured data structures")]
    Start(StartCommand),
    /// Estimate how long the migration would take and how much data it
    /// would move.
    #[command(
        name = "estimate",
        about = "Estimate the duration and size of the migration"
    )]
    Estimate(EstimateCommand),
    /// Cancel the migration in progress.
    #[command(name = "cancel", about = "Cancel the migration in progress")]
    Cancel(CancelCommand),
    /// Follow the migration in progress and print its item table.
    #[command(name = "status", about = "Show the status of the migration in progress")]
    Status(StatusCommand),
}

/// Arguments for the `caravan start` subcommand.
#[derive(Debug, Parser)]
pub(crate) struct StartCommand {
    /// Directory holding the migration configuration to submit.
    #[arg(value_name = "CONFIG_DIR")]
    pub(crate) config_dir: Utf8PathBuf,
    /// Write the migration report into this directory instead of the
    /// configured one.
    #[arg(short = 'o', long, value_name = "DIR")]
    pub(crate) output_dir: Option<Utf8PathBuf>,
    /// Proceed without asking for confirmation.
    #[arg(long)]
    pub(crate) yes: bool,
}

/// Arguments for the `caravan estimate` subcommand.
#[derive(Debug, Parser)]
pub(crate) struct EstimateCommand {
    /// Directory holding the migration configuration to submit.
    #[arg(value_name = "CONFIG_DIR")]
    pub(crate) config_dir: Utf8PathBuf,
}

/// Arguments for the `caravan cancel` subcommand.
#[derive(Debug, Parser)]
pub(crate) struct CancelCommand {}

/// Arguments for the `caravan status` subcommand.
#[derive(Debug, Parser)]
pub(crate) struct StatusCommand {
    /// Write the migration report into this directory instead of the
    /// configured one.
    #[arg(short = 'o', long, value_name = "DIR")]
    pub(crate) output_dir: Option<Utf8PathBuf>,
}
