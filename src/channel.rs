//! Coordination channel abstraction over the migration cluster.
//!
//! The core needs exactly three primitives from the distributed engine:
//! request queues, a shared status store, and a per-migration update
//! topic (plus two auxiliary reads: the in-progress marker list and the
//! per-member debug-log lists). Implementations live outside the core;
//! see [`crate::grid`] for the REST-backed one.

use std::future::Future;
use std::pin::Pin;

use tokio::sync::mpsc;

use crate::protocol::{UpdateMessage, WireValue};

/// Queue consumed by workers to start a migration.
pub const START_QUEUE: &str = "__migration_start_queue";
/// Queue consumed by workers to estimate a migration.
pub const ESTIMATE_QUEUE: &str = "__migration_estimate_queue";
/// Queue consumed by workers to cancel a migration.
pub const CANCEL_QUEUE: &str = "__migration_cancel_queue";
/// Shared store of status documents, keyed by migration id.
pub const STATUS_STORE: &str = "__migration_status";
/// List of in-progress markers; at most one entry while a migration runs.
pub const IN_PROGRESS_LIST: &str = "__migrations_in_progress";

const UPDATE_TOPIC_PREFIX: &str = "__migration_updates_";
const DEBUG_LOG_LIST_PREFIX: &str = "__migration_debug_logs_";

/// Name of the update topic for one migration.
#[must_use]
pub fn update_topic_name(migration_id: &str) -> String {
    format!("{UPDATE_TOPIC_PREFIX}{migration_id}")
}

/// Name of one cluster member's debug-log list.
#[must_use]
pub fn debug_log_list_name(member_id: &str) -> String {
    format!("{DEBUG_LOG_LIST_PREFIX}{member_id}")
}

/// Future returned by channel operations.
pub type ChannelFuture<'a, T, E> = Pin<Box<dyn Future<Output = Result<T, E>> + Send + 'a>>;

/// Minimal interface the coordination core requires from the cluster.
///
/// Guarantees assumed of implementations: enqueue is at-least-once;
/// store reads observe the latest committed write but may race a
/// concurrent one, so callers re-read rather than trusting a cached
/// copy; subscription delivery is best-effort, so terminal checks always
/// fall back to reading the document directly.
pub trait Channel {
    /// Implementation-specific error type.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Appends a JSON payload to the named work queue.
    fn enqueue<'a>(&'a self, queue: &'a str, payload: String)
    -> ChannelFuture<'a, (), Self::Error>;

    /// Reads one entry from a shared store; [`WireValue::Missing`] when
    /// the key is absent.
    fn read_entry<'a>(
        &'a self,
        store: &'a str,
        key: &'a str,
    ) -> ChannelFuture<'a, WireValue, Self::Error>;

    /// Reads all items of a shared list; empty when the list is absent.
    fn read_list<'a>(&'a self, list: &'a str) -> ChannelFuture<'a, Vec<WireValue>, Self::Error>;

    /// Lists the cluster member ids, in the cluster's stable order.
    fn member_ids(&self) -> ChannelFuture<'_, Vec<String>, Self::Error>;

    /// Subscribes to an update topic.
    ///
    /// The returned [`Subscription`] unsubscribes when dropped, so every
    /// exit path of the consumer releases it.
    fn subscribe<'a>(&'a self, topic: &'a str) -> ChannelFuture<'a, Subscription, Self::Error>;
}

/// Bounded capacity of a subscription's handoff channel. At most one
/// in-flight message is ever meaningful.
pub const SUBSCRIPTION_CAPACITY: usize = 1;

/// Live subscription to an update topic.
///
/// Messages arrive through a single-slot rendezvous channel fed by the
/// implementation's listener; dropping the subscription runs the
/// unsubscribe action exactly once.
pub struct Subscription {
    receiver: mpsc::Receiver<UpdateMessage>,
    _guard: UnsubscribeGuard,
}

impl Subscription {
    /// Wraps a receiver and the action releasing the listener.
    #[must_use]
    pub fn new<F>(receiver: mpsc::Receiver<UpdateMessage>, unsubscribe: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        Self {
            receiver,
            _guard: UnsubscribeGuard(Some(Box::new(unsubscribe))),
        }
    }

    /// Waits for the next update message; `None` once the topic listener
    /// has gone away.
    pub async fn recv(&mut self) -> Option<UpdateMessage> {
        self.receiver.recv().await
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription").finish_non_exhaustive()
    }
}

struct UnsubscribeGuard(Option<Box<dyn FnOnce() + Send>>);

impl Drop for UnsubscribeGuard {
    fn drop(&mut self) {
        if let Some(unsubscribe) = self.0.take() {
            unsubscribe();
        }
    }
}
