//! Status flow: find the migration in progress, follow it to a terminal
//! state, and render the per-item summary table.

use std::sync::Arc;

use camino::Utf8Path;
use comfy_table::{Table, presets::NOTHING};

use crate::channel::{Channel, Subscription, update_topic_name};
use crate::error::MigrationError;
use crate::protocol::MigrationItem;
use crate::stage::Reporter;
use crate::store::in_progress_markers;
use crate::tracker::ProgressTracker;

/// Orchestrates one status query.
#[derive(Clone, Copy, Debug, Default)]
pub struct QueryFlow {
    tracker: ProgressTracker,
}

impl QueryFlow {
    /// Creates a flow with the default tracking cadence.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Overrides the tracker driving the query. Test hook.
    #[must_use]
    pub const fn with_tracker(mut self, tracker: ProgressTracker) -> Self {
        self.tracker = tracker;
        self
    }

    /// Follows the migration in progress and prints its item table.
    ///
    /// # Errors
    ///
    /// Returns [`MigrationError::NoMigrationFound`] when nothing is
    /// running, [`MigrationError::NoRows`] when the final document lists
    /// no items, and whatever the tracker surfaces otherwise.
    pub async fn run<C>(
        &self,
        channel: &C,
        reporter: &Arc<dyn Reporter>,
        output_dir: &Utf8Path,
    ) -> Result<(), MigrationError<C::Error>>
    where
        C: Channel + Sync,
    {
        let markers = in_progress_markers(channel).await?;
        let Some(marker) = markers.into_iter().next() else {
            return Err(MigrationError::NoMigrationFound);
        };
        let subscription = channel
            .subscribe(&update_topic_name(&marker.migration_id))
            .await
            .map_err(MigrationError::Channel)?;
        let forwarder = spawn_forwarder(subscription, Arc::clone(reporter));

        let outcome = self
            .tracker
            .run(channel, reporter, &marker.migration_id, output_dir)
            .await;
        // Aborting drops the subscription, which unsubscribes.
        forwarder.abort();

        let document = outcome?;
        if document.migrations.is_empty() {
            return Err(MigrationError::NoRows(marker.migration_id));
        }
        reporter.line(&render_items(&document.migrations).to_string());
        Ok(())
    }
}

/// Prints non-terminal update message lines while the tracker follows the
/// document.
fn spawn_forwarder(
    mut subscription: Subscription,
    reporter: Arc<dyn Reporter>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(update) = subscription.recv().await {
            if !update.status.is_terminal() && !update.message.is_empty() {
                reporter.line(&update.message);
            }
        }
    })
}

fn render_items(items: &[MigrationItem]) -> Table {
    let mut table = Table::new();
    table.load_preset(NOTHING);
    table.set_header(vec![
        "Name",
        "Type",
        "Status",
        "Start Time",
        "Entries Migrated",
        "Total Entries",
        "Completed %",
    ]);
    for item in items {
        table.add_row(vec![
            item.name.clone(),
            item.kind.clone(),
            item.status.to_string(),
            item.start_timestamp.clone().unwrap_or_default(),
            item.entries_migrated.to_string(),
            item.total_entries.to_string(),
            format!("{:.1}", item.completion_percentage * 100.0),
        ]);
    }
    table
}
