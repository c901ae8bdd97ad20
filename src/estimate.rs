//! Estimate flow: a dry run that asks the cluster how long the migration
//! would take and how much data it would move.

use std::sync::Arc;
use std::time::{Duration, Instant};

use camino::Utf8PathBuf;

use crate::bundle::ConfigBundle;
use crate::channel::{Channel, ESTIMATE_QUEUE};
use crate::error::MigrationError;
use crate::protocol::{MigrationRequest, RequestKind, Status, format_errors};
use crate::stage::{Reporter, Stage, StageFailure, StageStatus, execute};
use crate::store::fetch_document;

/// Outcome of an estimate run, already formatted for display.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct EstimateSummary {
    /// Estimated duration, such as `5.0 sec`.
    pub duration: String,
    /// Estimated payload size, such as `1.00 MBs`.
    pub size: String,
}

/// Orchestrates one estimate run.
#[derive(Clone, Debug, Default)]
pub struct EstimateFlow {
    poll_interval: Option<Duration>,
    wait_timeout: Option<Duration>,
    migration_id: Option<String>,
}

const POLL_INTERVAL: Duration = Duration::from_secs(1);
const WAIT_TIMEOUT: Duration = Duration::from_secs(30);
/// How long estimation usually takes; drives the countdown hint.
const EXPECTED_DURATION: Duration = Duration::from_secs(16);

struct EstimateState<'a, C> {
    channel: &'a C,
    migration_id: String,
    config_dir: Utf8PathBuf,
    poll_interval: Duration,
    wait_timeout: Duration,
    duration_text: Option<String>,
    size_text: Option<String>,
}

impl EstimateFlow {
    /// Creates a flow with the default cadence.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Overrides the status polling interval. Test hook.
    #[must_use]
    pub const fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = Some(interval);
        self
    }

    /// Overrides how long to wait for the estimate results. Test hook.
    #[must_use]
    pub const fn with_wait_timeout(mut self, timeout: Duration) -> Self {
        self.wait_timeout = Some(timeout);
        self
    }

    /// Uses a fixed migration id instead of generating one. Test hook.
    #[must_use]
    pub fn with_migration_id(mut self, migration_id: impl Into<String>) -> Self {
        self.migration_id = Some(migration_id.into());
        self
    }

    /// Runs the estimation and reports its results.
    ///
    /// # Errors
    ///
    /// Returns [`MigrationError::NoRows`] when the cluster produced no
    /// estimate, [`MigrationError::Estimate`] when the results do not
    /// parse, and [`MigrationError::Stage`] when a stage fails.
    pub async fn run<C>(
        &self,
        channel: &C,
        reporter: &Arc<dyn Reporter>,
        config_dir: Utf8PathBuf,
    ) -> Result<EstimateSummary, MigrationError<C::Error>>
    where
        C: Channel + Sync,
    {
        let migration_id = self
            .migration_id
            .clone()
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        let mut state = EstimateState {
            channel,
            migration_id: migration_id.clone(),
            config_dir,
            poll_interval: self.poll_interval.unwrap_or(POLL_INTERVAL),
            wait_timeout: self.wait_timeout.unwrap_or(WAIT_TIMEOUT),
            duration_text: None,
            size_text: None,
        };
        let stages: Vec<Stage<'_, EstimateState<'_, C>, MigrationError<C::Error>>> = vec![
            Stage::new(
                "Starting the estimation",
                "Started the estimation",
                "Could not start the estimation",
                |state, status| Box::pin(submit(state, status)),
            ),
            Stage::new(
                "Estimating the migration",
                "Estimated the migration",
                "Could not estimate the migration",
                |state, status| Box::pin(await_results(state, status)),
            ),
        ];
        execute(&mut state, reporter, stages).await?;

        let (Some(duration_ms), Some(size_bytes)) = (state.duration_text, state.size_text) else {
            return Err(MigrationError::NoRows(migration_id));
        };
        let summary = EstimateSummary {
            duration: format_duration(parse_estimate(&duration_ms)?),
            size: format_size(parse_estimate(&size_bytes)?),
        };
        reporter.line(&format!("Estimated Time: {}", summary.duration));
        reporter.line(&format!("Estimated Size: {}", summary.size));
        Ok(summary)
    }
}

async fn submit<C>(
    state: &mut EstimateState<'_, C>,
    _status: &StageStatus,
) -> Result<(), StageFailure<MigrationError<C::Error>>>
where
    C: Channel + Sync,
{
    let bundle = ConfigBundle::from_dir(&state.config_dir)
        .map_err(|err| StageFailure::Fatal(MigrationError::from(err)))?;
    let request = MigrationRequest {
        migration_id: state.migration_id.clone(),
        kind: RequestKind::Estimate,
        bundle,
    };
    let payload = request
        .encode()
        .map_err(|err| StageFailure::Fatal(MigrationError::from(err)))?;
    state
        .channel
        .enqueue(ESTIMATE_QUEUE, payload)
        .await
        .map_err(|err| StageFailure::Fatal(MigrationError::Channel(err)))
}

async fn await_results<C>(
    state: &mut EstimateState<'_, C>,
    status: &StageStatus,
) -> Result<(), StageFailure<MigrationError<C::Error>>>
where
    C: Channel + Sync,
{
    let started = Instant::now();
    let mut over_expectation = false;
    loop {
        if started.elapsed() >= state.wait_timeout {
            return Err(StageFailure::Fatal(MigrationError::Timeout));
        }
        match EXPECTED_DURATION.checked_sub(started.elapsed()) {
            Some(remaining) => status.set_remaining(remaining),
            None if !over_expectation => {
                over_expectation = true;
                status.set_text("Estimation took longer than expected.");
            }
            None => {}
        }

        let document = fetch_document(state.channel, &state.migration_id)
            .await
            .map_err(StageFailure::Fatal)?;
        if document.status == Status::Failed {
            return Err(StageFailure::Fatal(MigrationError::Failed(format_errors(
                &document.errors,
            ))));
        }
        if document.estimated_time.is_some() || document.estimated_size.is_some() {
            state.duration_text = document.estimated_time;
            state.size_text = document.estimated_size;
            return Ok(());
        }
        // A completed document without results will never grow them; the
        // caller turns the absence into the no-rows error.
        if document.status == Status::Completed {
            return Ok(());
        }
        tokio::time::sleep(state.poll_interval).await;
    }
}

fn parse_estimate<E>(raw: &str) -> Result<f64, MigrationError<E>>
where
    E: std::error::Error + 'static,
{
    raw.trim()
        .parse::<f64>()
        .map_err(|err| MigrationError::Estimate(format!("{raw:?}: {err}")))
}

/// Renders a millisecond count as seconds with one decimal.
fn format_duration(milliseconds: f64) -> String {
    format!("{:.1} sec", milliseconds / 1000.0)
}

/// Renders a byte count as mebibytes with two decimals.
fn format_size(bytes: f64) -> String {
    format!("{:.2} MBs", bytes / (1024.0 * 1024.0))
}
