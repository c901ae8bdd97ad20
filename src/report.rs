//! Terminal-state collection: the migration report file and the cluster
//! members' debug logs.

use std::fs;
use std::sync::Arc;

use camino::{Utf8Path, Utf8PathBuf};

use crate::channel::{Channel, debug_log_list_name};
use crate::error::MigrationError;
use crate::protocol::{StatusDocument, WireValue};
use crate::stage::Reporter;

/// File name the report is written under for a given migration.
#[must_use]
pub fn report_file_name(migration_id: &str) -> String {
    format!("migration_report_{migration_id}.txt")
}

/// Writes the document's report verbatim into `output_dir`.
///
/// Returns the written path, or `None` when the report is empty (nothing
/// is written in that case).
///
/// # Errors
///
/// Returns [`MigrationError::Report`] when the file cannot be written.
pub fn write_report<E>(
    document: &StatusDocument,
    migration_id: &str,
    output_dir: &Utf8Path,
) -> Result<Option<Utf8PathBuf>, MigrationError<E>>
where
    E: std::error::Error + 'static,
{
    if document.report.is_empty() {
        return Ok(None);
    }
    let path = output_dir.join(report_file_name(migration_id));
    fs::write(&path, document.report.as_bytes()).map_err(MigrationError::Report)?;
    Ok(Some(path))
}

/// Copies every member's debug-log list into the diagnostic log, each
/// line prefixed with `[migrationId_memberId]`.
///
/// # Errors
///
/// Returns [`MigrationError::Channel`] when a member list cannot be read.
pub async fn save_member_logs<C>(
    channel: &C,
    migration_id: &str,
) -> Result<(), MigrationError<C::Error>>
where
    C: Channel,
{
    let members = channel.member_ids().await.map_err(MigrationError::Channel)?;
    for member in members {
        let lines = channel
            .read_list(&debug_log_list_name(&member))
            .await
            .map_err(MigrationError::Channel)?;
        for line in lines {
            let text = match line {
                WireValue::Text(text) => text,
                WireValue::Json(serde_json::Value::String(text)) => text,
                WireValue::Json(other) => other.to_string(),
                WireValue::Missing => continue,
            };
            tracing::info!(target: "migration", "[{migration_id}_{member}] {text}");
        }
    }
    Ok(())
}

/// Copies the document's own log lines into the diagnostic log.
pub fn log_document_lines(document: &StatusDocument) {
    for line in &document.logs {
        tracing::info!(target: "migration", "{line}");
    }
}

/// Collects every terminal-state output in one pass: prints the report,
/// writes it to disk, copies the member debug logs, and mirrors the
/// document's log lines.
///
/// Callers guard this so it runs at most once per migration.
///
/// # Errors
///
/// As for [`write_report`] and [`save_member_logs`].
pub async fn collect_outputs<C>(
    channel: &C,
    reporter: &Arc<dyn Reporter>,
    migration_id: &str,
    output_dir: &Utf8Path,
    document: &StatusDocument,
) -> Result<(), MigrationError<C::Error>>
where
    C: Channel + Sync,
{
    if !document.report.is_empty() {
        reporter.line(&document.report);
    }
    if let Some(path) = write_report(document, migration_id, output_dir)? {
        reporter.line(&format!("migration report saved to file: {path}"));
    }
    save_member_logs(channel, migration_id).await?;
    log_document_lines(document);
    Ok(())
}
