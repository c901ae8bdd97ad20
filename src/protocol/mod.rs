//! Wire types shared with the migration workers and their JSON codec.
//!
//! The status document is the authoritative record of one migration; update
//! messages are lightweight heartbeats that only signal "re-read the
//! document now". Decoding consumes a tagged [`WireValue`] so that the
//! accepted store representations are recognised explicitly and anything
//! else fails closed.

use std::fmt;

use serde::de::Deserializer;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::bundle::ConfigBundle;

/// Overall or per-item migration status.
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub enum Status {
    /// The status document has not been created yet.
    #[default]
    #[serde(rename = "", alias = "NONE")]
    None,
    /// The worker is actively migrating.
    #[serde(rename = "IN_PROGRESS")]
    InProgress,
    /// A cancel request was issued and the worker has not yet acknowledged.
    #[serde(rename = "CANCELING")]
    Canceling,
    /// The worker acknowledged cancellation. Terminal.
    #[serde(rename = "CANCELED")]
    Canceled,
    /// The migration finished successfully. Terminal.
    #[serde(rename = "COMPLETED")]
    Completed,
    /// The migration failed. Terminal.
    #[serde(rename = "FAILED")]
    Failed,
}

impl Status {
    /// Returns true for statuses after which no further progress is
    /// expected. A terminal status never reverts.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Canceled)
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Self::None => "NONE",
            Self::InProgress => "IN_PROGRESS",
            Self::Canceling => "CANCELING",
            Self::Canceled => "CANCELED",
            Self::Completed => "COMPLETED",
            Self::Failed => "FAILED",
        };
        f.write_str(text)
    }
}

/// Per-item record inside [`StatusDocument::migrations`].
///
/// The list order is fixed at first observation and used as the stable
/// index for per-item stage mapping.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MigrationItem {
    /// Data structure name.
    pub name: String,
    /// Data structure type (for example `IMap`).
    #[serde(rename = "type")]
    pub kind: String,
    /// Item status.
    pub status: Status,
    /// Worker-reported start timestamp, verbatim.
    pub start_timestamp: Option<String>,
    /// Entries copied so far.
    pub entries_migrated: u64,
    /// Total entries to copy.
    pub total_entries: u64,
    /// Completion fraction reported by the worker.
    pub completion_percentage: f32,
    /// Worker-reported failure cause, populated when `status` is FAILED.
    pub error: String,
}

/// The shared record describing one migration, keyed by migration id in
/// the status store. Created and mutated by the remote workers; this
/// client only reads it.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StatusDocument {
    /// Overall status.
    pub status: Status,
    /// Diagnostic lines appended by the worker side.
    pub logs: Vec<String>,
    /// Failure causes, populated when `status` is FAILED.
    pub errors: Vec<String>,
    /// Human-readable final summary, populated near the terminal state.
    pub report: String,
    /// Overall completion fraction.
    pub completion_percentage: f32,
    /// Per-item records in worker order.
    pub migrations: Vec<MigrationItem>,
    /// Estimated duration in milliseconds, present after an estimate run.
    #[serde(deserialize_with = "stringly", skip_serializing_if = "Option::is_none")]
    pub estimated_time: Option<String>,
    /// Estimated payload size in bytes, present after an estimate run.
    #[serde(deserialize_with = "stringly", skip_serializing_if = "Option::is_none")]
    pub estimated_size: Option<String>,
}

/// Accepts a JSON string or number and normalises it to its text form.
///
/// Workers have written both `"5000"` and `5000` for the estimate fields.
fn stringly<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    match value {
        None | Some(serde_json::Value::Null) => Ok(None),
        Some(serde_json::Value::String(text)) => Ok(Some(text)),
        Some(serde_json::Value::Number(number)) => Ok(Some(number.to_string())),
        Some(other) => Err(serde::de::Error::custom(format!(
            "expected string or number, got {other}"
        ))),
    }
}

/// Heartbeat published on the per-migration update topic.
///
/// Not authoritative: a terminal status here only triggers a re-read of
/// the status document.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
#[serde(rename_all = "camelCase", default)]
pub struct UpdateMessage {
    /// Status claimed by the worker at publish time.
    pub status: Status,
    /// Overall completion fraction at publish time.
    pub completion_percentage: f32,
    /// Human-readable line to surface immediately.
    pub message: String,
}

/// Which request queue a [`MigrationRequest`] targets.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum RequestKind {
    /// A real migration.
    Start,
    /// A dry-run estimate.
    Estimate,
}

/// Request submitted to the migration cluster to start or estimate a
/// migration. Immutable once built; never mutated after submission.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MigrationRequest {
    /// Fresh opaque identifier for this run.
    pub migration_id: String,
    /// Start or estimate.
    #[serde(skip)]
    pub kind: RequestKind,
    /// Snapshot of the operator's configuration directory.
    #[serde(flatten)]
    pub bundle: ConfigBundle,
}

/// Single-use cancel request; fire-and-forget.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct CancelRequest {
    /// Identifier of the migration to cancel.
    pub id: String,
}

/// Marker kept in the in-progress list while a migration runs.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InProgressMarker {
    /// Identifier of the running migration.
    pub migration_id: String,
}

/// Value read from the shared store, tagged by representation.
///
/// The store hands back either a plain string or a JSON value; anything
/// else is rejected at decode time rather than interpreted.
#[derive(Clone, Debug, PartialEq)]
pub enum WireValue {
    /// No entry exists under the requested key.
    Missing,
    /// The entry is a plain string holding JSON text.
    Text(String),
    /// The entry is a structured JSON value.
    Json(serde_json::Value),
}

/// Decode-time schema violations.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum CodecError {
    /// The payload is not syntactically valid JSON.
    #[error("malformed status document: {0}")]
    MalformedDocument(String),
    /// The payload parses but does not match the expected shape.
    #[error("invalid status value: {0}")]
    InvalidStatusValue(String),
    /// A request payload could not be serialised.
    #[error("encoding request payload: {0}")]
    Encode(String),
}

impl MigrationRequest {
    /// Serialises the request to its queue payload.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::Encode`] when serialisation fails.
    pub fn encode(&self) -> Result<String, CodecError> {
        serde_json::to_string(self).map_err(|err| CodecError::Encode(err.to_string()))
    }
}

impl CancelRequest {
    /// Serialises the request to its queue payload.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::Encode`] when serialisation fails.
    pub fn encode(&self) -> Result<String, CodecError> {
        serde_json::to_string(self).map_err(|err| CodecError::Encode(err.to_string()))
    }
}

/// Decodes a status document from a store value.
///
/// A missing entry maps to the zero-value document with status `NONE`,
/// not an error: the document simply has not been created yet.
///
/// # Errors
///
/// Returns [`CodecError::MalformedDocument`] for JSON syntax errors and
/// [`CodecError::InvalidStatusValue`] for well-formed JSON of the wrong
/// shape, including representations the store should never produce.
pub fn decode_document(value: &WireValue) -> Result<StatusDocument, CodecError> {
    match value {
        WireValue::Missing => Ok(StatusDocument::default()),
        WireValue::Text(raw) => parse_json(raw),
        // Some engines double-encode map values as JSON strings.
        WireValue::Json(serde_json::Value::String(raw)) => parse_json(raw),
        WireValue::Json(object @ serde_json::Value::Object(_)) => {
            serde_json::from_value(object.clone())
                .map_err(|err| CodecError::InvalidStatusValue(err.to_string()))
        }
        WireValue::Json(other) => Err(CodecError::InvalidStatusValue(format!(
            "unsupported document representation: {other}"
        ))),
    }
}

/// Decodes an in-progress marker from a store value.
///
/// # Errors
///
/// Returns [`CodecError::InvalidStatusValue`] when the value is missing or
/// does not carry a migration id.
pub fn decode_marker(value: &WireValue) -> Result<InProgressMarker, CodecError> {
    match value {
        WireValue::Missing => Err(CodecError::InvalidStatusValue(String::from(
            "empty in-progress marker",
        ))),
        WireValue::Text(raw) => parse_json(raw),
        WireValue::Json(json) => serde_json::from_value(json.clone())
            .map_err(|err| CodecError::InvalidStatusValue(err.to_string())),
    }
}

/// Decodes an update message from its topic payload.
///
/// # Errors
///
/// Returns [`CodecError::MalformedDocument`] or
/// [`CodecError::InvalidStatusValue`] as for [`decode_document`].
pub fn decode_update(value: &serde_json::Value) -> Result<UpdateMessage, CodecError> {
    match value {
        serde_json::Value::String(raw) => parse_json(raw),
        other => serde_json::from_value(other.clone())
            .map_err(|err| CodecError::InvalidStatusValue(err.to_string())),
    }
}

fn parse_json<T>(raw: &str) -> Result<T, CodecError>
where
    T: serde::de::DeserializeOwned,
{
    serde_json::from_str(raw).map_err(|err| match err.classify() {
        serde_json::error::Category::Data => CodecError::InvalidStatusValue(err.to_string()),
        _ => CodecError::MalformedDocument(err.to_string()),
    })
}

/// Joins the document's error list into a single operator-facing block.
#[must_use]
pub fn format_errors(errors: &[String]) -> String {
    if errors.is_empty() {
        return String::new();
    }
    format!("* {}", errors.join("\n* "))
}
