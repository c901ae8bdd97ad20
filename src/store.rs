//! Typed reads over the coordination channel.
//!
//! Thin glue combining the channel primitives with the protocol codec.
//! Every helper re-reads the store on each call; nothing here caches,
//! because store reads may race concurrent worker writes.

use crate::channel::{Channel, IN_PROGRESS_LIST, STATUS_STORE};
use crate::error::MigrationError;
use crate::protocol::{InProgressMarker, Status, StatusDocument, decode_document, decode_marker};

/// Reads and decodes the status document for one migration.
///
/// An absent entry decodes to the zero-value document with status
/// `NONE`.
///
/// # Errors
///
/// Returns [`MigrationError::Channel`] on transport failure and
/// [`MigrationError::Codec`] when the stored value does not decode.
pub async fn fetch_document<C>(
    channel: &C,
    migration_id: &str,
) -> Result<StatusDocument, MigrationError<C::Error>>
where
    C: Channel,
{
    let value = channel
        .read_entry(STATUS_STORE, migration_id)
        .await
        .map_err(MigrationError::Channel)?;
    Ok(decode_document(&value)?)
}

/// Reads just the overall status for one migration.
///
/// # Errors
///
/// As for [`fetch_document`].
pub async fn fetch_status<C>(
    channel: &C,
    migration_id: &str,
) -> Result<Status, MigrationError<C::Error>>
where
    C: Channel,
{
    Ok(fetch_document(channel, migration_id).await?.status)
}

/// Reads the in-progress marker list.
///
/// # Errors
///
/// As for [`fetch_document`].
pub async fn in_progress_markers<C>(
    channel: &C,
) -> Result<Vec<InProgressMarker>, MigrationError<C::Error>>
where
    C: Channel,
{
    let values = channel
        .read_list(IN_PROGRESS_LIST)
        .await
        .map_err(MigrationError::Channel)?;
    values
        .iter()
        .map(|value| decode_marker(value).map_err(MigrationError::from))
        .collect()
}
