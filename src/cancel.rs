//! Cancel flow: find the migration in progress, ask the cluster to stop
//! it, and wait for the acknowledgement.
//!
//! Nothing is ever enqueued when no migration is running; the discovery
//! stage fails first and the pipeline never reaches the cancel stage.

use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::channel::{CANCEL_QUEUE, Channel};
use crate::error::MigrationError;
use crate::protocol::{CancelRequest, Status};
use crate::stage::{Reporter, Stage, StageFailure, StageStatus, execute};
use crate::store::{fetch_status, in_progress_markers};

/// Orchestrates the cancellation of the migration in progress.
#[derive(Clone, Debug, Default)]
pub struct CancelFlow {
    poll_interval: Option<Duration>,
    wait_timeout: Option<Duration>,
}

const POLL_INTERVAL: Duration = Duration::from_secs(1);
const WAIT_TIMEOUT: Duration = Duration::from_secs(30);

struct CancelState<'a, C> {
    channel: &'a C,
    migration_id: Option<String>,
    poll_interval: Duration,
    wait_timeout: Duration,
}

impl CancelFlow {
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

    /// Overrides how long to wait for the acknowledgement. Test hook.
    #[must_use]
    pub const fn with_wait_timeout(mut self, timeout: Duration) -> Self {
        self.wait_timeout = Some(timeout);
        self
    }

    /// Cancels the migration in progress and returns its id.
    ///
    /// # Errors
    ///
    /// Returns [`MigrationError::NoMigrationInProgress`] (wrapped in
    /// [`MigrationError::Stage`]) when nothing is running, and
    /// [`MigrationError::Timeout`] when the cluster does not acknowledge
    /// in time.
    pub async fn run<C>(
        &self,
        channel: &C,
        reporter: &Arc<dyn Reporter>,
    ) -> Result<String, MigrationError<C::Error>>
    where
        C: Channel + Sync,
    {
        let mut state = CancelState {
            channel,
            migration_id: None,
            poll_interval: self.poll_interval.unwrap_or(POLL_INTERVAL),
            wait_timeout: self.wait_timeout.unwrap_or(WAIT_TIMEOUT),
        };
        let stages: Vec<Stage<'_, CancelState<'_, C>, MigrationError<C::Error>>> = vec![
            Stage::new(
                "Finding the migration in progress",
                "Found the migration in progress",
                "Could not find the migration in progress",
                |state, status| Box::pin(discover(state, status)),
            ),
            Stage::new(
                "Canceling the migration",
                "Canceled the migration",
                "Could not cancel the migration",
                |state, status| Box::pin(cancel(state, status)),
            ),
        ];
        execute(&mut state, reporter, stages).await?;
        state
            .migration_id
            .ok_or(MigrationError::NoMigrationInProgress)
    }
}

async fn discover<C>(
    state: &mut CancelState<'_, C>,
    _status: &StageStatus,
) -> Result<(), StageFailure<MigrationError<C::Error>>>
where
    C: Channel + Sync,
{
    let markers = in_progress_markers(state.channel)
        .await
        .map_err(StageFailure::Fatal)?;
    let Some(marker) = markers.into_iter().next() else {
        return Err(StageFailure::Fatal(MigrationError::NoMigrationInProgress));
    };
    state.migration_id = Some(marker.migration_id);
    Ok(())
}

async fn cancel<C>(
    state: &mut CancelState<'_, C>,
    _status: &StageStatus,
) -> Result<(), StageFailure<MigrationError<C::Error>>>
where
    C: Channel + Sync,
{
    let Some(migration_id) = state.migration_id.clone() else {
        return Err(StageFailure::Fatal(MigrationError::NoMigrationInProgress));
    };
    let payload = CancelRequest {
        id: migration_id.clone(),
    }
    .encode()
    .map_err(|err| StageFailure::Fatal(MigrationError::from(err)))?;
    state
        .channel
        .enqueue(CANCEL_QUEUE, payload)
        .await
        .map_err(|err| StageFailure::Fatal(MigrationError::Channel(err)))?;

    // Canceling is enough of an acknowledgement; the workers finish the
    // teardown on their own schedule.
    let started = Instant::now();
    loop {
        let status = fetch_status(state.channel, &migration_id)
            .await
            .map_err(StageFailure::Fatal)?;
        if matches!(status, Status::Canceling | Status::Canceled) {
            return Ok(());
        }
        if started.elapsed() >= state.wait_timeout {
            return Err(StageFailure::Fatal(MigrationError::Timeout));
        }
        tokio::time::sleep(state.poll_interval).await;
    }
}
