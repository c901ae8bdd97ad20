//! Per-item progress tracking for a running migration.
//!
//! Builds one pipeline stage per data structure in the status document and
//! polls the document until every item reaches a terminal status. Item
//! failures are reported and skipped so the remaining items keep being
//! tracked; an overall terminal status resolves the whole run.

use std::sync::Arc;
use std::time::Duration;

use camino::{Utf8Path, Utf8PathBuf};

use crate::channel::Channel;
use crate::error::MigrationError;
use crate::protocol::{CodecError, Status, StatusDocument, format_errors};
use crate::report::collect_outputs;
use crate::stage::{Reporter, Stage, StageFailure, StageStatus, execute};
use crate::store::fetch_document;

/// Drives per-item stages against the status store until the migration
/// reaches a terminal state.
#[derive(Clone, Copy, Debug)]
pub struct ProgressTracker {
    poll_interval: Duration,
    wait_timeout: Duration,
}

impl Default for ProgressTracker {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(1),
            wait_timeout: Duration::from_secs(30),
        }
    }
}

struct TrackerState<'a, C> {
    channel: &'a C,
    reporter: Arc<dyn Reporter>,
    migration_id: String,
    output_dir: Utf8PathBuf,
    poll_interval: Duration,
    finalized: bool,
}

impl ProgressTracker {
    /// Creates a tracker with the default cadence.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Overrides the document polling interval. Test hook.
    #[must_use]
    pub const fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Overrides how long to wait for the status document to appear.
    /// Test hook.
    #[must_use]
    pub const fn with_wait_timeout(mut self, timeout: Duration) -> Self {
        self.wait_timeout = timeout;
        self
    }

    /// Tracks `migration_id` to completion and returns its final status
    /// document.
    ///
    /// The migration report and member logs are collected exactly once,
    /// on whichever path first observes a terminal status.
    ///
    /// # Errors
    ///
    /// Returns [`MigrationError::Timeout`] when no status
    /// document appears within the wait window,
    /// [`MigrationError::NoDataStructures`] when the document lists
    /// nothing to migrate, [`MigrationError::Cancelled`] when the
    /// migration was cancelled, and [`MigrationError::Stage`] when the
    /// migration failed.
    pub async fn run<C>(
        &self,
        channel: &C,
        reporter: &Arc<dyn Reporter>,
        migration_id: &str,
        output_dir: &Utf8Path,
    ) -> Result<StatusDocument, MigrationError<C::Error>>
    where
        C: Channel + Sync,
    {
        let document = self.await_document(channel, migration_id).await?;
        if document.migrations.is_empty() {
            return Err(MigrationError::NoDataStructures);
        }

        let mut stages: Vec<Stage<'_, TrackerState<'_, C>, MigrationError<C::Error>>> =
            Vec::with_capacity(document.migrations.len());
        for (index, item) in document.migrations.iter().enumerate() {
            stages.push(Stage::new(
                format!("Migrating {}: {}", item.kind, item.name),
                format!("Migrated {}: {}", item.kind, item.name),
                format!("Failed migrating {}: {}", item.kind, item.name),
                move |state, status| Box::pin(track_item(state, status, index)),
            ));
        }

        let mut state = TrackerState {
            channel,
            reporter: Arc::clone(reporter),
            migration_id: migration_id.to_owned(),
            output_dir: output_dir.to_path_buf(),
            poll_interval: self.poll_interval,
            finalized: false,
        };
        execute(&mut state, reporter, stages).await?;

        let document = fetch_document(channel, migration_id).await?;
        finalize(&mut state, &document).await?;
        Ok(document)
    }

    async fn await_document<C>(
        &self,
        channel: &C,
        migration_id: &str,
    ) -> Result<StatusDocument, MigrationError<C::Error>>
    where
        C: Channel + Sync,
    {
        let wait = async {
            loop {
                let document = fetch_document(channel, migration_id).await?;
                if document.status != Status::None {
                    return Ok(document);
                }
                tokio::time::sleep(self.poll_interval).await;
            }
        };
        match tokio::time::timeout(self.wait_timeout, wait).await {
            Ok(result) => result,
            Err(_) => Err(MigrationError::Timeout),
        }
    }
}

async fn track_item<C>(
    state: &mut TrackerState<'_, C>,
    status: &StageStatus,
    index: usize,
) -> Result<(), StageFailure<MigrationError<C::Error>>>
where
    C: Channel + Sync,
{
    loop {
        let document = fetch_document(state.channel, &state.migration_id)
            .await
            .map_err(StageFailure::Fatal)?;

        // The overall verdict outranks any single item.
        match document.status {
            Status::Canceled => {
                finalize(state, &document).await.map_err(StageFailure::Fatal)?;
                return Err(StageFailure::Cancelled);
            }
            Status::Failed => {
                finalize(state, &document).await.map_err(StageFailure::Fatal)?;
                return Err(StageFailure::Fatal(MigrationError::Failed(format_errors(
                    &document.errors,
                ))));
            }
            _ => {}
        }

        let Some(item) = document.migrations.get(index) else {
            return Err(StageFailure::Fatal(MigrationError::Codec(
                CodecError::InvalidStatusValue(format!(
                    "status document no longer lists migration item {index}"
                )),
            )));
        };
        status.set_progress(item.completion_percentage);
        match item.status {
            Status::Completed => return Ok(()),
            Status::Failed => {
                return Err(StageFailure::Item(MigrationError::Failed(
                    item.error.clone(),
                )));
            }
            Status::Canceled => {
                finalize(state, &document).await.map_err(StageFailure::Fatal)?;
                return Err(StageFailure::Cancelled);
            }
            _ => {}
        }

        // The items lag the overall verdict at worst; do not wait on one
        // the workers will never touch again.
        if document.status == Status::Completed {
            return Ok(());
        }
        tokio::time::sleep(state.poll_interval).await;
    }
}

async fn finalize<C>(
    state: &mut TrackerState<'_, C>,
    document: &StatusDocument,
) -> Result<(), MigrationError<C::Error>>
where
    C: Channel + Sync,
{
    if state.finalized {
        return Ok(());
    }
    state.finalized = true;
    collect_outputs(
        state.channel,
        &state.reporter,
        &state.migration_id,
        &state.output_dir,
        document,
    )
    .await
}
