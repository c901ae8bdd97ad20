//! BDD step definitions for the migration coordination flows.

use std::time::Duration;

use caravan::channel::{CANCEL_QUEUE, START_QUEUE};
use caravan::protocol::{Status, StatusDocument, UpdateMessage};
use caravan::{CancelFlow, StartFlow, StartRequest};
use rstest_bdd_macros::{given, then, when};
use tokio::runtime::Runtime;

use super::test_helpers::{MigrationContext, MigrationOutcome};

const MIGRATION_ID: &str = "m1";

#[derive(Debug, thiserror::Error)]
pub enum StepError {
    #[error("assertion failed: {0}")]
    Assertion(String),
}

fn document(status: Status) -> StatusDocument {
    StatusDocument {
        status,
        ..StatusDocument::default()
    }
}

#[given("a migration cluster that completes the migration")]
fn completing_cluster(migration_context: MigrationContext) -> MigrationContext {
    migration_context.channel.push_update(UpdateMessage {
        status: Status::InProgress,
        completion_percentage: 0.5,
        message: String::from("migration started"),
    });
    migration_context.channel.push_update(UpdateMessage {
        status: Status::Completed,
        completion_percentage: 1.0,
        message: String::new(),
    });
    migration_context.channel.push_document(
        MIGRATION_ID,
        &StatusDocument {
            status: Status::Completed,
            report: String::from("copied everything"),
            ..StatusDocument::default()
        },
    );
    migration_context
}

#[given("a migration cluster that fails the migration with \"{message}\"")]
fn failing_cluster(migration_context: MigrationContext, message: String) -> MigrationContext {
    migration_context.channel.push_update(UpdateMessage {
        status: Status::Failed,
        ..UpdateMessage::default()
    });
    migration_context.channel.push_document(
        MIGRATION_ID,
        &StatusDocument {
            status: Status::Failed,
            errors: vec![message],
            ..StatusDocument::default()
        },
    );
    migration_context
}

#[given("a migration cluster with no migration in progress")]
fn idle_cluster(migration_context: MigrationContext) -> MigrationContext {
    migration_context
}

#[given("a migration cluster with migration \"{id}\" in progress")]
fn in_progress_cluster(migration_context: MigrationContext, id: String) -> MigrationContext {
    migration_context.channel.push_marker(&id);
    migration_context
        .channel
        .push_document(&id, &document(Status::InProgress));
    migration_context
}

#[given("the cluster acknowledges cancellation of \"{id}\"")]
fn cancellation_acknowledged(migration_context: MigrationContext, id: String) -> MigrationContext {
    migration_context
        .channel
        .push_document(&id, &document(Status::Canceling));
    migration_context
}

#[when("I start a migration")]
fn start_migration(
    mut migration_context: MigrationContext,
) -> Result<MigrationContext, StepError> {
    let runtime = Runtime::new().map_err(|err| StepError::Assertion(err.to_string()))?;
    let reporter = migration_context.reporter();
    let channel = migration_context.channel.clone();
    let request = StartRequest {
        config_dir: migration_context.config_dir.clone(),
        output_dir: migration_context.output_dir.clone(),
    };

    let result = runtime.block_on(async move {
        StartFlow::new()
            .with_migration_id(MIGRATION_ID)
            .with_first_update_timeout(Duration::from_millis(500))
            .run(&channel, &reporter, request)
            .await
    });

    migration_context.outcome = Some(match result {
        Ok(id) => MigrationOutcome::Success(id),
        Err(err) => MigrationOutcome::Failure(err.to_string()),
    });
    Ok(migration_context)
}

#[when("I cancel the migration")]
fn cancel_migration(
    mut migration_context: MigrationContext,
) -> Result<MigrationContext, StepError> {
    let runtime = Runtime::new().map_err(|err| StepError::Assertion(err.to_string()))?;
    let reporter = migration_context.reporter();
    let channel = migration_context.channel.clone();

    let result = runtime.block_on(async move {
        CancelFlow::new()
            .with_poll_interval(Duration::from_millis(5))
            .with_wait_timeout(Duration::from_millis(500))
            .run(&channel, &reporter)
            .await
    });

    migration_context.outcome = Some(match result {
        Ok(id) => MigrationOutcome::Success(id),
        Err(err) => MigrationOutcome::Failure(err.to_string()),
    });
    Ok(migration_context)
}

#[then("the run succeeds")]
fn run_succeeds(migration_context: &MigrationContext) -> Result<(), StepError> {
    match &migration_context.outcome {
        Some(MigrationOutcome::Success(_)) => Ok(()),
        Some(MigrationOutcome::Failure(message)) => Err(StepError::Assertion(format!(
            "run failed unexpectedly: {message}"
        ))),
        None => Err(StepError::Assertion(String::from("missing outcome"))),
    }
}

#[then("the run fails mentioning \"{text}\"")]
fn run_fails_mentioning(
    migration_context: &MigrationContext,
    text: String,
) -> Result<(), StepError> {
    match &migration_context.outcome {
        Some(MigrationOutcome::Failure(message)) if message.contains(&text) => Ok(()),
        other => Err(StepError::Assertion(format!(
            "unexpected outcome: {other:?}"
        ))),
    }
}

#[then("the start request is enqueued")]
fn start_request_enqueued(migration_context: &MigrationContext) -> Result<(), StepError> {
    let enqueued = migration_context.channel.enqueued();
    match enqueued.first() {
        Some((queue, payload))
            if queue == START_QUEUE && payload.contains(r#""migrationId":"m1""#) =>
        {
            Ok(())
        }
        _ => Err(StepError::Assertion(format!(
            "missing start request, got: {enqueued:?}"
        ))),
    }
}

#[then("the migration report is saved")]
fn report_saved(migration_context: &MigrationContext) -> Result<(), StepError> {
    let path = migration_context
        .output_dir
        .join(format!("migration_report_{MIGRATION_ID}.txt"));
    if path.as_std_path().is_file() {
        Ok(())
    } else {
        Err(StepError::Assertion(format!("missing report file: {path}")))
    }
}

#[then("no cancel request is enqueued")]
fn nothing_enqueued(migration_context: &MigrationContext) -> Result<(), StepError> {
    let enqueued = migration_context.channel.enqueued();
    if enqueued.is_empty() {
        Ok(())
    } else {
        Err(StepError::Assertion(format!(
            "unexpected requests: {enqueued:?}"
        )))
    }
}

#[then("the cancel request for \"{id}\" is enqueued")]
fn cancel_request_enqueued(
    migration_context: &MigrationContext,
    id: String,
) -> Result<(), StepError> {
    let expected = (CANCEL_QUEUE.to_owned(), format!(r#"{{"id":"{id}"}}"#));
    let enqueued = migration_context.channel.enqueued();
    if enqueued.contains(&expected) {
        Ok(())
    } else {
        Err(StepError::Assertion(format!(
            "missing cancel request, got: {enqueued:?}"
        )))
    }
}
