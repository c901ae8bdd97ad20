//! Start flow: connect to the cluster, submit the migration request, and
//! observe updates until the migration resolves.
//!
//! The flow subscribes to the per-migration update topic *before*
//! enqueueing the request so no early update can be missed. Heartbeats
//! are not authoritative: a terminal heartbeat only triggers a re-read of
//! the status document, which decides the outcome.

use std::sync::Arc;
use std::time::Duration;

use camino::Utf8PathBuf;

use crate::bundle::ConfigBundle;
use crate::channel::{Channel, START_QUEUE, Subscription, update_topic_name};
use crate::error::MigrationError;
use crate::protocol::{MigrationRequest, RequestKind, Status, UpdateMessage, format_errors};
use crate::report::collect_outputs;
use crate::stage::{Reporter, Stage, StageFailure, StageStatus, execute};
use crate::store::fetch_document;

/// Inputs to one start run.
#[derive(Clone, Debug)]
pub struct StartRequest {
    /// Directory holding the migration configuration to bundle.
    pub config_dir: Utf8PathBuf,
    /// Directory the migration report is written into.
    pub output_dir: Utf8PathBuf,
}

/// Orchestrates one migration from submission to terminal status.
#[derive(Clone, Debug, Default)]
pub struct StartFlow {
    first_update_timeout: Option<Duration>,
    migration_id: Option<String>,
}

const FIRST_UPDATE_TIMEOUT: Duration = Duration::from_secs(30);

struct StartState<'a, C> {
    channel: &'a C,
    reporter: Arc<dyn Reporter>,
    migration_id: String,
    config_dir: Utf8PathBuf,
    output_dir: Utf8PathBuf,
    first_update_timeout: Duration,
    subscription: Option<Subscription>,
    done: bool,
    finalized: bool,
}

impl StartFlow {
    /// Creates a flow with the default first-acknowledgement window.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Overrides how long to wait for the cluster's first update after
    /// submitting. Test hook.
    #[must_use]
    pub const fn with_first_update_timeout(mut self, timeout: Duration) -> Self {
        self.first_update_timeout = Some(timeout);
        self
    }

    /// Uses a fixed migration id instead of generating one. Test hook.
    #[must_use]
    pub fn with_migration_id(mut self, migration_id: impl Into<String>) -> Self {
        self.migration_id = Some(migration_id.into());
        self
    }

    /// Runs the migration and returns its id on success.
    ///
    /// # Errors
    ///
    /// Returns [`MigrationError::Stage`] when a stage fails,
    /// [`MigrationError::Cancelled`] when the migration is cancelled, and
    /// the underlying bundle, codec, or channel error otherwise.
    pub async fn run<C>(
        &self,
        channel: &C,
        reporter: &Arc<dyn Reporter>,
        request: StartRequest,
    ) -> Result<String, MigrationError<C::Error>>
    where
        C: Channel + Sync,
    {
        let migration_id = self
            .migration_id
            .clone()
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        let mut state = StartState {
            channel,
            reporter: Arc::clone(reporter),
            migration_id: migration_id.clone(),
            config_dir: request.config_dir,
            output_dir: request.output_dir,
            first_update_timeout: self.first_update_timeout.unwrap_or(FIRST_UPDATE_TIMEOUT),
            subscription: None,
            done: false,
            finalized: false,
        };
        let stages: Vec<Stage<'_, StartState<'_, C>, MigrationError<C::Error>>> = vec![
            Stage::new(
                "Connecting to the migration cluster",
                "Connected to the migration cluster",
                "Could not connect to the migration cluster",
                |state, status| Box::pin(connect(state, status)),
            ),
            Stage::new(
                "Starting the migration",
                "Started the migration",
                "Could not start the migration",
                |state, status| Box::pin(submit(state, status)),
            ),
            Stage::new(
                "Migrating the cluster",
                "Migrated the cluster",
                "Could not migrate the cluster",
                |state, status| Box::pin(observe(state, status)),
            ),
        ];
        execute(&mut state, reporter, stages).await?;
        Ok(migration_id)
    }
}

async fn connect<C>(
    state: &mut StartState<'_, C>,
    _status: &StageStatus,
) -> Result<(), StageFailure<MigrationError<C::Error>>>
where
    C: Channel + Sync,
{
    let topic = update_topic_name(&state.migration_id);
    let subscription = state
        .channel
        .subscribe(&topic)
        .await
        .map_err(|err| StageFailure::Fatal(MigrationError::Channel(err)))?;
    state.subscription = Some(subscription);
    Ok(())
}

async fn submit<C>(
    state: &mut StartState<'_, C>,
    status: &StageStatus,
) -> Result<(), StageFailure<MigrationError<C::Error>>>
where
    C: Channel + Sync,
{
    let bundle = ConfigBundle::from_dir(&state.config_dir)
        .map_err(|err| StageFailure::Fatal(MigrationError::from(err)))?;
    let request = MigrationRequest {
        migration_id: state.migration_id.clone(),
        kind: RequestKind::Start,
        bundle,
    };
    let payload = request
        .encode()
        .map_err(|err| StageFailure::Fatal(MigrationError::from(err)))?;
    state
        .channel
        .enqueue(START_QUEUE, payload)
        .await
        .map_err(|err| StageFailure::Fatal(MigrationError::Channel(err)))?;

    // The cluster acknowledges by publishing the first update.
    let update = match tokio::time::timeout(state.first_update_timeout, next_update(state)).await {
        Ok(update) => update?,
        Err(_) => return Err(StageFailure::Fatal(MigrationError::Timeout)),
    };
    if handle_update(state, &update, status).await? {
        state.done = true;
    }
    Ok(())
}

async fn observe<C>(
    state: &mut StartState<'_, C>,
    status: &StageStatus,
) -> Result<(), StageFailure<MigrationError<C::Error>>>
where
    C: Channel + Sync,
{
    if state.done {
        return Ok(());
    }
    loop {
        let update = next_update(state).await?;
        if handle_update(state, &update, status).await? {
            return Ok(());
        }
    }
}

async fn next_update<C>(
    state: &mut StartState<'_, C>,
) -> Result<UpdateMessage, StageFailure<MigrationError<C::Error>>>
where
    C: Channel + Sync,
{
    let Some(subscription) = state.subscription.as_mut() else {
        return Err(StageFailure::Fatal(MigrationError::UpdateStreamClosed));
    };
    subscription
        .recv()
        .await
        .ok_or_else(|| StageFailure::Fatal(MigrationError::UpdateStreamClosed))
}

/// Applies one heartbeat; returns true once the migration has resolved
/// successfully.
async fn handle_update<C>(
    state: &mut StartState<'_, C>,
    update: &UpdateMessage,
    status: &StageStatus,
) -> Result<bool, StageFailure<MigrationError<C::Error>>>
where
    C: Channel + Sync,
{
    status.set_progress(update.completion_percentage);
    if !update.message.is_empty() {
        state.reporter.line(&update.message);
    }
    if !update.status.is_terminal() {
        return Ok(false);
    }

    // A terminal heartbeat is only a hint; the document decides.
    let document = fetch_document(state.channel, &state.migration_id)
        .await
        .map_err(StageFailure::Fatal)?;
    if !document.status.is_terminal() {
        return Ok(false);
    }
    if !state.finalized {
        state.finalized = true;
        collect_outputs(
            state.channel,
            &state.reporter,
            &state.migration_id,
            &state.output_dir,
            &document,
        )
        .await
        .map_err(StageFailure::Fatal)?;
    }
    match document.status {
        Status::Completed => Ok(true),
        Status::Canceled => Err(StageFailure::Cancelled),
        Status::Failed => Err(StageFailure::Fatal(MigrationError::Failed(format_errors(
            &document.errors,
        )))),
        _ => Ok(false),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::StatusDocument;
    use crate::test_support::{RecordingReporter, ScriptedChannel};
    use tempfile::TempDir;

    fn reporters() -> (Arc<RecordingReporter>, Arc<dyn Reporter>) {
        let recording = Arc::new(RecordingReporter::default());
        let dynamic: Arc<dyn Reporter> = Arc::clone(&recording) as Arc<dyn Reporter>;
        (recording, dynamic)
    }

    fn dirs() -> (TempDir, StartRequest) {
        let dir = TempDir::new().expect("tempdir");
        let root = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).expect("utf8 tempdir");
        let request = StartRequest {
            config_dir: root.join("config"),
            output_dir: root.clone(),
        };
        std::fs::create_dir_all(request.config_dir.as_std_path()).expect("mkdir");
        (dir, request)
    }

    fn update(status: Status, message: &str) -> UpdateMessage {
        UpdateMessage {
            status,
            completion_percentage: 0.0,
            message: message.to_owned(),
        }
    }

    #[tokio::test]
    async fn happy_path_runs_all_three_stages() {
        let channel = ScriptedChannel::new();
        let (recording, reporter) = reporters();
        let (_dir, request) = dirs();
        let output_dir = request.output_dir.clone();
        channel.push_update(update(Status::InProgress, "migration started"));
        channel.push_update(update(Status::Completed, ""));
        channel.push_document(
            "m1",
            &StatusDocument {
                status: Status::Completed,
                report: String::from("copied everything"),
                ..StatusDocument::default()
            },
        );

        let id = StartFlow::new()
            .with_migration_id("m1")
            .run(&channel, &reporter, request)
            .await
            .expect("migration succeeds");
        assert_eq!(id, "m1");
        assert_eq!(channel.subscribed_topics(), vec!["__migration_updates_m1"]);
        let (queue, payload) = channel.enqueued().into_iter().next().expect("one request");
        assert_eq!(queue, START_QUEUE);
        assert!(payload.contains(r#""migrationId":"m1""#), "{payload}");
        let report_line = format!(
            "migration report saved to file: {}",
            output_dir.join("migration_report_m1.txt")
        );
        assert_eq!(
            recording.lines(),
            vec![
                "OK [1/3] Connected to the migration cluster.",
                "migration started",
                "OK [2/3] Started the migration.",
                "copied everything",
                report_line.as_str(),
                "OK [3/3] Migrated the cluster.",
            ]
        );
    }

    #[tokio::test]
    async fn terminal_first_update_skips_the_observe_loop() {
        let channel = ScriptedChannel::new();
        let (recording, reporter) = reporters();
        let (_dir, request) = dirs();
        channel.push_update(update(Status::Completed, "done already"));
        channel.push_document(
            "m1",
            &StatusDocument {
                status: Status::Completed,
                ..StatusDocument::default()
            },
        );

        StartFlow::new()
            .with_migration_id("m1")
            .run(&channel, &reporter, request)
            .await
            .expect("migration succeeds");
        let lines = recording.lines();
        assert!(lines.contains(&String::from("OK [3/3] Migrated the cluster.")));
        assert!(lines.contains(&String::from("done already")));
    }

    #[tokio::test]
    async fn failed_document_surfaces_the_joined_errors() {
        let channel = ScriptedChannel::new();
        let (_recording, reporter) = reporters();
        let (_dir, request) = dirs();
        channel.push_update(update(Status::Failed, ""));
        channel.push_document(
            "m1",
            &StatusDocument {
                status: Status::Failed,
                errors: vec![String::from("wrong credentials")],
                ..StatusDocument::default()
            },
        );

        let err = StartFlow::new()
            .with_migration_id("m1")
            .run(&channel, &reporter, request)
            .await
            .expect_err("failure surfaces");
        match err {
            MigrationError::Stage { label, source } => {
                assert_eq!(label, "Could not start the migration");
                assert_eq!(source.to_string(), "migration failed:\n* wrong credentials");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn cancelled_document_resolves_cleanly_and_unsubscribes() {
        let channel = ScriptedChannel::new();
        let (_recording, reporter) = reporters();
        let (_dir, request) = dirs();
        channel.push_update(update(Status::Canceled, ""));
        channel.push_document(
            "m1",
            &StatusDocument {
                status: Status::Canceled,
                ..StatusDocument::default()
            },
        );

        let err = StartFlow::new()
            .with_migration_id("m1")
            .run(&channel, &reporter, request)
            .await
            .expect_err("cancellation surfaces");
        assert!(err.is_cancellation());
        assert_eq!(channel.unsubscribe_count(), 1);
    }

    #[tokio::test]
    async fn closed_update_stream_is_a_fatal_start_failure() {
        let channel = ScriptedChannel::new();
        let (_recording, reporter) = reporters();
        let (_dir, request) = dirs();

        let err = StartFlow::new()
            .with_migration_id("m1")
            .run(&channel, &reporter, request)
            .await
            .expect_err("no updates ever arrive");
        match err {
            MigrationError::Stage { label, source } => {
                assert_eq!(label, "Could not start the migration");
                assert!(matches!(*source, MigrationError::UpdateStreamClosed));
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
