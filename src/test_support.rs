//! Test doubles shared by unit and integration tests.
//!
//! [`ScriptedChannel`] is an in-memory [`Channel`] whose store contents,
//! update stream, and member list are scripted up front by the test;
//! [`RecordingReporter`] captures pipeline output for assertion.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use thiserror::Error;
use tokio::sync::mpsc;

use crate::channel::{
    Channel, ChannelFuture, IN_PROGRESS_LIST, STATUS_STORE, SUBSCRIPTION_CAPACITY, Subscription,
};
use crate::protocol::{InProgressMarker, StatusDocument, UpdateMessage, WireValue};
use crate::stage::Reporter;

/// Failure produced by a scripted channel operation.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
#[error("scripted channel failure: {message}")]
pub struct ScriptedError {
    /// Scripted failure message.
    pub message: String,
}

#[derive(Default)]
struct ScriptedState {
    entries: HashMap<String, VecDeque<WireValue>>,
    lists: HashMap<String, Vec<WireValue>>,
    members: Vec<String>,
    enqueued: Vec<(String, String)>,
    updates: Vec<UpdateMessage>,
    subscribed_topics: Vec<String>,
    fail_next_read: Option<String>,
}

/// In-memory coordination channel driven entirely by pre-scripted data.
///
/// Store entries are queues: each read pops the next scripted value until
/// one remains, which then repeats, so a test can model a document that
/// changes across polls. Subscriptions drain the scripted update list and
/// then close.
#[derive(Clone, Default)]
pub struct ScriptedChannel {
    state: Arc<Mutex<ScriptedState>>,
    unsubscribes: Arc<AtomicUsize>,
}

impl ScriptedChannel {
    /// Creates an empty scripted channel.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Scripts the next status document returned for `migration_id`.
    ///
    /// # Panics
    ///
    /// Panics when the document cannot be serialised.
    pub fn push_document(&self, migration_id: &str, document: &StatusDocument) {
        let raw = serde_json::to_string(document).expect("serialise scripted document");
        self.push_entry(STATUS_STORE, migration_id, WireValue::Text(raw));
    }

    /// Scripts the next raw value returned for one store key.
    ///
    /// # Panics
    ///
    /// Panics when the internal lock is poisoned.
    pub fn push_entry(&self, store: &str, key: &str, value: WireValue) {
        let mut state = self.lock();
        state
            .entries
            .entry(entry_key(store, key))
            .or_default()
            .push_back(value);
    }

    /// Replaces the contents of one shared list.
    ///
    /// # Panics
    ///
    /// Panics when the internal lock is poisoned.
    pub fn set_list(&self, list: &str, values: Vec<WireValue>) {
        self.lock().lists.insert(list.to_owned(), values);
    }

    /// Appends an in-progress marker for `migration_id`.
    ///
    /// # Panics
    ///
    /// Panics when the marker cannot be serialised.
    pub fn push_marker(&self, migration_id: &str) {
        let marker = InProgressMarker {
            migration_id: migration_id.to_owned(),
        };
        let raw = serde_json::to_string(&marker).expect("serialise scripted marker");
        self.lock()
            .lists
            .entry(IN_PROGRESS_LIST.to_owned())
            .or_default()
            .push(WireValue::Text(raw));
    }

    /// Replaces the cluster member list.
    ///
    /// # Panics
    ///
    /// Panics when the internal lock is poisoned.
    pub fn set_members(&self, members: Vec<String>) {
        self.lock().members = members;
    }

    /// Scripts one update message; delivered in order on the next
    /// subscription.
    ///
    /// # Panics
    ///
    /// Panics when the internal lock is poisoned.
    pub fn push_update(&self, update: UpdateMessage) {
        self.lock().updates.push(update);
    }

    /// Makes the next store read fail with the given message.
    ///
    /// # Panics
    ///
    /// Panics when the internal lock is poisoned.
    pub fn fail_next_read(&self, message: &str) {
        self.lock().fail_next_read = Some(message.to_owned());
    }

    /// Returns every `(queue, payload)` pair enqueued so far.
    ///
    /// # Panics
    ///
    /// Panics when the internal lock is poisoned.
    #[must_use]
    pub fn enqueued(&self) -> Vec<(String, String)> {
        self.lock().enqueued.clone()
    }

    /// Returns the topics subscribed to so far.
    ///
    /// # Panics
    ///
    /// Panics when the internal lock is poisoned.
    #[must_use]
    pub fn subscribed_topics(&self) -> Vec<String> {
        self.lock().subscribed_topics.clone()
    }

    /// Returns how many subscriptions have been released.
    #[must_use]
    pub fn unsubscribe_count(&self) -> usize {
        self.unsubscribes.load(Ordering::SeqCst)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ScriptedState> {
        self.state.lock().expect("scripted channel state poisoned")
    }
}

fn entry_key(store: &str, key: &str) -> String {
    format!("{store}/{key}")
}

impl Channel for ScriptedChannel {
    type Error = ScriptedError;

    fn enqueue<'a>(
        &'a self,
        queue: &'a str,
        payload: String,
    ) -> ChannelFuture<'a, (), Self::Error> {
        self.lock().enqueued.push((queue.to_owned(), payload));
        Box::pin(async { Ok(()) })
    }

    fn read_entry<'a>(
        &'a self,
        store: &'a str,
        key: &'a str,
    ) -> ChannelFuture<'a, WireValue, Self::Error> {
        let result = {
            let mut state = self.lock();
            if let Some(message) = state.fail_next_read.take() {
                Err(ScriptedError { message })
            } else {
                let value = state
                    .entries
                    .get_mut(&entry_key(store, key))
                    .map_or(WireValue::Missing, |queue| match queue.len() {
                        0 => WireValue::Missing,
                        1 => queue.front().cloned().unwrap_or(WireValue::Missing),
                        _ => queue.pop_front().unwrap_or(WireValue::Missing),
                    });
                Ok(value)
            }
        };
        Box::pin(async { result })
    }

    fn read_list<'a>(&'a self, list: &'a str) -> ChannelFuture<'a, Vec<WireValue>, Self::Error> {
        let result = {
            let mut state = self.lock();
            if let Some(message) = state.fail_next_read.take() {
                Err(ScriptedError { message })
            } else {
                Ok(state.lists.get(list).cloned().unwrap_or_default())
            }
        };
        Box::pin(async { result })
    }

    fn member_ids(&self) -> ChannelFuture<'_, Vec<String>, Self::Error> {
        let members = self.lock().members.clone();
        Box::pin(async { Ok(members) })
    }

    fn subscribe<'a>(&'a self, topic: &'a str) -> ChannelFuture<'a, Subscription, Self::Error> {
        let updates = {
            let mut state = self.lock();
            state.subscribed_topics.push(topic.to_owned());
            std::mem::take(&mut state.updates)
        };
        let capacity = updates.len().max(SUBSCRIPTION_CAPACITY);
        let (sender, receiver) = mpsc::channel(capacity);
        for update in updates {
            sender.try_send(update).expect("scripted update fits");
        }
        let unsubscribes = Arc::clone(&self.unsubscribes);
        let subscription = Subscription::new(receiver, move || {
            unsubscribes.fetch_add(1, Ordering::SeqCst);
        });
        Box::pin(async { Ok(subscription) })
    }
}

/// [`Reporter`] that records everything it is given.
#[derive(Debug, Default)]
pub struct RecordingReporter {
    lines: Mutex<Vec<String>>,
    statuses: Mutex<Vec<String>>,
    progress: Mutex<Vec<f32>>,
}

impl RecordingReporter {
    /// Returns the output lines emitted so far.
    ///
    /// # Panics
    ///
    /// Panics when a writer panicked while holding the lock.
    #[must_use]
    pub fn lines(&self) -> Vec<String> {
        self.lines.lock().expect("reporter lines poisoned").clone()
    }

    /// Returns the transient status texts set so far.
    ///
    /// # Panics
    ///
    /// Panics when a writer panicked while holding the lock.
    #[must_use]
    pub fn statuses(&self) -> Vec<String> {
        self.statuses
            .lock()
            .expect("reporter statuses poisoned")
            .clone()
    }

    /// Returns the progress fractions set so far.
    ///
    /// # Panics
    ///
    /// Panics when a writer panicked while holding the lock.
    #[must_use]
    pub fn progress_values(&self) -> Vec<f32> {
        self.progress
            .lock()
            .expect("reporter progress poisoned")
            .clone()
    }
}

impl Reporter for RecordingReporter {
    fn line(&self, text: &str) {
        if let Ok(mut lines) = self.lines.lock() {
            lines.push(text.to_owned());
        }
    }

    fn status(&self, text: &str) {
        if let Ok(mut statuses) = self.statuses.lock() {
            statuses.push(text.to_owned());
        }
    }

    fn progress(&self, fraction: f32) {
        if let Ok(mut progress) = self.progress.lock() {
            progress.push(fraction);
        }
    }
}
