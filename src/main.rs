//! Binary entry point for the caravan CLI.

use std::io::{self, IsTerminal, Write};
use std::process;
use std::sync::Arc;

use clap::Parser;
use dialoguer::Confirm;
use thiserror::Error;
use tracing_subscriber::EnvFilter;

use caravan::{
    CancelFlow, ConfigError, CoordinatorConfig, EstimateFlow, GridChannel, GridError,
    MigrationError, QueryFlow, Reporter, StartFlow, StartRequest,
};

mod cli;

use cli::{Cli, EstimateCommand, StartCommand, StatusCommand};

#[derive(Debug, Error)]
enum CliError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("coordination gateway error: {0}")]
    Gateway(#[from] GridError),
    #[error(transparent)]
    Migration(#[from] MigrationError<GridError>),
    #[error("confirmation prompt failed: {0}")]
    Prompt(String),
    #[error("configuration directory not found: {0}")]
    MissingConfigDir(camino::Utf8PathBuf),
}

fn require_config_dir(path: &camino::Utf8Path) -> Result<(), CliError> {
    if path.is_dir() {
        Ok(())
    } else {
        Err(CliError::MissingConfigDir(path.to_path_buf()))
    }
}

/// Reporter writing pipeline output to stdout; transient status texts go
/// to the diagnostic log instead of the terminal.
struct ConsoleReporter;

impl Reporter for ConsoleReporter {
    fn line(&self, text: &str) {
        writeln!(io::stdout(), "{text}").ok();
    }

    fn status(&self, text: &str) {
        tracing::debug!(target: "status", "{text}");
    }

    fn progress(&self, _fraction: f32) {}
}

#[tokio::main]
async fn main() {
    init_tracing();
    let cli = Cli::parse();
    let exit_code = match dispatch(cli).await {
        Ok(code) => code,
        Err(err) => {
            report_error(&err);
            1
        }
    };

    process::exit(exit_code);
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

async fn dispatch(cli: Cli) -> Result<i32, CliError> {
    let config = CoordinatorConfig::load_without_cli_args()?;
    config.validate()?;
    let channel = GridChannel::new(&config.endpoint, config.api_token.clone())?;
    let reporter: Arc<dyn Reporter> = Arc::new(ConsoleReporter);

    match cli {
        Cli::Start(args) => start(&config, &channel, &reporter, args).await,
        Cli::Estimate(args) => estimate(&channel, &reporter, args).await,
        Cli::Cancel(_) => cancel(&channel, &reporter).await,
        Cli::Status(args) => status(&config, &channel, &reporter, args).await,
    }
}

async fn start(
    config: &CoordinatorConfig,
    channel: &GridChannel,
    reporter: &Arc<dyn Reporter>,
    args: StartCommand,
) -> Result<i32, CliError> {
    require_config_dir(&args.config_dir)?;
    writeln!(
        io::stdout(),
        "caravan data migration client v{}",
        env!("CARGO_PKG_VERSION")
    )
    .ok();
    if !args.yes && !confirm_start()? {
        writeln!(io::stdout(), "migration aborted").ok();
        return Ok(1);
    }
    let request = StartRequest {
        config_dir: args.config_dir,
        output_dir: args
            .output_dir
            .unwrap_or_else(|| config.report_output_dir()),
    };
    let flow = StartFlow::new();
    let outcome = tokio::select! {
        outcome = flow.run(channel, reporter, request) => outcome,
        _ = tokio::signal::ctrl_c() => {
            writeln!(
                io::stdout(),
                "interrupted: the migration keeps running on the cluster; \
                 run 'caravan cancel' to stop it"
            )
            .ok();
            return Ok(130);
        }
    };
    finish(outcome.map(|_| ()))
}

async fn estimate(
    channel: &GridChannel,
    reporter: &Arc<dyn Reporter>,
    args: EstimateCommand,
) -> Result<i32, CliError> {
    require_config_dir(&args.config_dir)?;
    let outcome = EstimateFlow::new()
        .run(channel, reporter, args.config_dir)
        .await;
    finish(outcome.map(|_| ()))
}

async fn cancel(channel: &GridChannel, reporter: &Arc<dyn Reporter>) -> Result<i32, CliError> {
    let outcome = CancelFlow::new().run(channel, reporter).await;
    finish(outcome.map(|_| ()))
}

async fn status(
    config: &CoordinatorConfig,
    channel: &GridChannel,
    reporter: &Arc<dyn Reporter>,
    args: StatusCommand,
) -> Result<i32, CliError> {
    let output_dir = args
        .output_dir
        .unwrap_or_else(|| config.report_output_dir());
    let outcome = QueryFlow::new()
        .run(channel, reporter, output_dir.as_path())
        .await;
    finish(outcome)
}

/// Maps a flow outcome to an exit code. Cancellation is an expected
/// termination path, not a failure.
fn finish(outcome: Result<(), MigrationError<GridError>>) -> Result<i32, CliError> {
    match outcome {
        Ok(()) => Ok(0),
        Err(err) if err.is_cancellation() => {
            writeln!(io::stdout(), "{err}").ok();
            Ok(0)
        }
        Err(err) => Err(err.into()),
    }
}

fn confirm_start() -> Result<bool, CliError> {
    if !io::stdin().is_terminal() {
        return Err(CliError::Prompt(String::from(
            "no terminal to confirm on; pass --yes to proceed",
        )));
    }
    Confirm::new()
        .with_prompt("Proceed with the migration?")
        .default(false)
        .interact()
        .map_err(|err| CliError::Prompt(err.to_string()))
}

fn report_error(err: &CliError) {
    write_error(io::stderr(), err);
}

fn write_error(mut target: impl Write, err: &CliError) {
    writeln!(target, "{err}").ok();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_error_renders_the_cause_chain_head() {
        let mut buf = Vec::new();
        let err = CliError::Prompt(String::from("tty gone"));
        write_error(&mut buf, &err);
        let rendered = String::from_utf8(buf).expect("utf8");
        assert!(rendered.contains("confirmation prompt failed: tty gone"));
    }

    #[test]
    fn absent_config_directory_is_rejected() {
        let dir = tempfile::TempDir::new().expect("tempdir");
        let root =
            camino::Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).expect("utf8 tempdir");
        require_config_dir(&root).expect("existing directory passes");
        let err = require_config_dir(&root.join("missing")).expect_err("missing directory");
        assert!(matches!(err, CliError::MissingConfigDir(_)));
    }

    #[test]
    fn cancellation_maps_to_a_clean_exit() {
        let outcome: Result<(), MigrationError<GridError>> = Err(MigrationError::Cancelled);
        let code = finish(outcome).expect("cancellation is not a failure");
        assert_eq!(code, 0);
    }

    #[test]
    fn other_errors_keep_their_failure_framing() {
        let outcome: Result<(), MigrationError<GridError>> = Err(MigrationError::Timeout);
        assert!(finish(outcome).is_err());
    }
}
