//! Error taxonomy shared by the migration flows.

use std::error::Error;
use std::fmt;

use crate::bundle::BundleError;
use crate::protocol::CodecError;

/// Errors surfaced while coordinating a migration.
///
/// Generic over the coordination channel's error type, the same way the
/// channel trait leaves that type to its implementation. `Display` and
/// `Error` are written by hand: the `Stage` variant nests the enum inside
/// itself, and the derived impls would need `MigrationError<E>: Error` as
/// a bound on their own conclusion.
#[derive(Debug)]
pub enum MigrationError<E>
where
    E: Error + 'static,
{
    /// A bounded wait on the cluster expired.
    ///
    /// The guidance is part of the message on purpose: this timeout
    /// almost always means the client is pointed at the wrong cluster.
    Timeout,
    /// The operator or the protocol cancelled the migration. A clean,
    /// expected termination path, never a failure.
    Cancelled,
    /// The workers reported failure; carries the joined error list.
    Failed(String),
    /// Cancellation was requested but no migration is running.
    NoMigrationInProgress,
    /// A status query found no migration to report on.
    NoMigrationFound,
    /// The status document lists nothing to migrate.
    NoDataStructures,
    /// The estimate completed but its results are absent.
    NoRows(String),
    /// An estimate result could not be interpreted as a number.
    Estimate(String),
    /// The update topic listener went away before a terminal status.
    UpdateStreamClosed,
    /// A coordination payload failed to decode or encode.
    Codec(CodecError),
    /// The configuration bundle could not be read.
    Bundle(BundleError),
    /// The migration report could not be written.
    Report(std::io::Error),
    /// The underlying channel failed.
    Channel(E),
    /// A pipeline stage failed; the stage's failure label is attached.
    Stage {
        /// Failure label of the stage that stopped the pipeline.
        label: String,
        /// Underlying cause.
        source: Box<MigrationError<E>>,
    },
}

impl<E> fmt::Display for MigrationError<E>
where
    E: Error + 'static,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Timeout => f.write_str(
                "migration could not be completed: reached timeout while reading status: \
                 please ensure that you are using a migration-capable cluster and that \
                 your configuration points to that cluster",
            ),
            Self::Cancelled => f.write_str("the migration was cancelled"),
            Self::Failed(errors) => write!(f, "migration failed:\n{errors}"),
            Self::NoMigrationInProgress => {
                f.write_str("there are no migrations in progress on the migration cluster")
            }
            Self::NoMigrationFound => f.write_str("no migration found on the migration cluster"),
            Self::NoDataStructures => f.write_str("no data structures found to migrate"),
            Self::NoRows(migration_id) => {
                write!(f, "no rows found for migration {migration_id}")
            }
            Self::Estimate(detail) => write!(f, "parsing estimation results: {detail}"),
            Self::UpdateStreamClosed => {
                f.write_str("update stream closed before a terminal status was observed")
            }
            Self::Codec(err) => write!(f, "{err}"),
            Self::Bundle(err) => write!(f, "reading configuration bundle: {err}"),
            Self::Report(err) => write!(f, "writing migration report: {err}"),
            Self::Channel(err) => write!(f, "coordination channel: {err}"),
            Self::Stage { label, source } => write!(f, "{label}: {source}"),
        }
    }
}

impl<E> Error for MigrationError<E>
where
    E: Error + 'static,
{
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Codec(err) => err.source(),
            Self::Bundle(err) => Some(err),
            Self::Report(err) => Some(err),
            Self::Channel(err) => Some(err),
            Self::Stage { source, .. } => Some(source.as_ref()),
            _ => None,
        }
    }
}

impl<E> From<CodecError> for MigrationError<E>
where
    E: Error + 'static,
{
    fn from(err: CodecError) -> Self {
        Self::Codec(err)
    }
}

impl<E> From<BundleError> for MigrationError<E>
where
    E: Error + 'static,
{
    fn from(err: BundleError) -> Self {
        Self::Bundle(err)
    }
}

impl<E> MigrationError<E>
where
    E: Error + 'static,
{
    /// True for the clean cancellation outcome, which callers must not
    /// present with failure framing.
    #[must_use]
    pub const fn is_cancellation(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

impl<E> From<crate::stage::PipelineError<MigrationError<E>>> for MigrationError<E>
where
    E: Error + 'static,
{
    fn from(err: crate::stage::PipelineError<MigrationError<E>>) -> Self {
        match err {
            crate::stage::PipelineError::Stage { label, source } => Self::Stage {
                label,
                source: Box::new(source),
            },
            crate::stage::PipelineError::Cancelled => Self::Cancelled,
        }
    }
}
