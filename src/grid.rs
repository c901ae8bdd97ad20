//! REST-backed implementation of the coordination [`Channel`].
//!
//! Talks to the migration cluster's coordination gateway: queues, shared
//! stores, and lists map onto plain resources, and topics are consumed
//! through a cursor-based long poll driven by a background task.

use reqwest::StatusCode;
use reqwest::header::CONTENT_TYPE;
use serde::Deserialize;
use thiserror::Error;
use tokio::sync::mpsc;

use crate::channel::{Channel, ChannelFuture, SUBSCRIPTION_CAPACITY, Subscription};
use crate::protocol::{UpdateMessage, WireValue, decode_update};

/// Errors raised by the REST gateway.
#[derive(Debug, Error)]
pub enum GridError {
    /// The request never produced a response.
    #[error("requesting {url}: {source}")]
    Transport {
        /// Requested URL.
        url: String,
        /// Underlying client error.
        #[source]
        source: reqwest::Error,
    },
    /// The gateway answered with an unexpected status code.
    #[error("unexpected response from {url}: {status}")]
    UnexpectedStatus {
        /// Requested URL.
        url: String,
        /// Status code received.
        status: StatusCode,
    },
    /// The response body could not be read as JSON.
    #[error("decoding response from {url}: {source}")]
    Decode {
        /// Requested URL.
        url: String,
        /// Underlying client error.
        #[source]
        source: reqwest::Error,
    },
    /// The response decoded but does not have the expected shape.
    #[error("malformed response from {url}: {detail}")]
    Malformed {
        /// Requested URL.
        url: String,
        /// What was wrong with the body.
        detail: String,
    },
}

/// How long one topic long-poll is allowed to hang, in seconds.
const TOPIC_POLL_WAIT_SECS: u64 = 30;
/// Pause before retrying a failed topic poll.
const TOPIC_RETRY_DELAY: std::time::Duration = std::time::Duration::from_secs(1);

/// Coordination channel backed by the cluster's REST gateway.
#[derive(Clone, Debug)]
pub struct GridChannel {
    base: String,
    api_token: Option<String>,
    client: reqwest::Client,
}

impl GridChannel {
    /// Creates a channel talking to `endpoint`.
    ///
    /// # Errors
    ///
    /// Returns [`GridError::Transport`] when the HTTP client cannot be
    /// built.
    pub fn new(endpoint: &str, api_token: Option<String>) -> Result<Self, GridError> {
        let client = reqwest::Client::builder()
            .build()
            .map_err(|source| GridError::Transport {
                url: endpoint.to_owned(),
                source,
            })?;
        Ok(Self {
            base: endpoint.trim_end_matches('/').to_owned(),
            api_token,
            client,
        })
    }

    fn queue_url(&self, queue: &str) -> String {
        format!("{}/v1/queues/{queue}/items", self.base)
    }

    fn entry_url(&self, store: &str, key: &str) -> String {
        format!("{}/v1/stores/{store}/entries/{key}", self.base)
    }

    fn list_url(&self, list: &str) -> String {
        format!("{}/v1/lists/{list}/items", self.base)
    }

    fn members_url(&self) -> String {
        format!("{}/v1/cluster/members", self.base)
    }

    fn topic_url(&self, topic: &str) -> String {
        format!("{}/v1/topics/{topic}/messages", self.base)
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    /// GET a resource; `Ok(None)` for 404.
    async fn get_json(&self, url: String) -> Result<Option<serde_json::Value>, GridError> {
        let response = self
            .authorize(self.client.get(&url))
            .send()
            .await
            .map_err(|source| GridError::Transport {
                url: url.clone(),
                source,
            })?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(GridError::UnexpectedStatus {
                url,
                status: response.status(),
            });
        }
        let value = response
            .json()
            .await
            .map_err(|source| GridError::Decode { url, source })?;
        Ok(Some(value))
    }
}

fn to_wire(value: serde_json::Value) -> WireValue {
    match value {
        serde_json::Value::String(text) => WireValue::Text(text),
        other => WireValue::Json(other),
    }
}

impl Channel for GridChannel {
    type Error = GridError;

    fn enqueue<'a>(
        &'a self,
        queue: &'a str,
        payload: String,
    ) -> ChannelFuture<'a, (), Self::Error> {
        Box::pin(async move {
            let url = self.queue_url(queue);
            let response = self
                .authorize(self.client.post(&url))
                .header(CONTENT_TYPE, "application/json")
                .body(payload)
                .send()
                .await
                .map_err(|source| GridError::Transport {
                    url: url.clone(),
                    source,
                })?;
            if !response.status().is_success() {
                return Err(GridError::UnexpectedStatus {
                    url,
                    status: response.status(),
                });
            }
            Ok(())
        })
    }

    fn read_entry<'a>(
        &'a self,
        store: &'a str,
        key: &'a str,
    ) -> ChannelFuture<'a, WireValue, Self::Error> {
        Box::pin(async move {
            let value = self.get_json(self.entry_url(store, key)).await?;
            Ok(value.map_or(WireValue::Missing, to_wire))
        })
    }

    fn read_list<'a>(&'a self, list: &'a str) -> ChannelFuture<'a, Vec<WireValue>, Self::Error> {
        Box::pin(async move {
            let url = self.list_url(list);
            let Some(value) = self.get_json(url.clone()).await? else {
                return Ok(Vec::new());
            };
            let serde_json::Value::Array(items) = value else {
                return Err(GridError::Malformed {
                    url,
                    detail: String::from("expected a JSON array"),
                });
            };
            Ok(items.into_iter().map(to_wire).collect())
        })
    }

    fn member_ids(&self) -> ChannelFuture<'_, Vec<String>, Self::Error> {
        Box::pin(async move {
            let url = self.members_url();
            // An absent members resource only degrades log collection.
            let Some(value) = self.get_json(url.clone()).await? else {
                return Ok(Vec::new());
            };
            let serde_json::Value::Array(items) = value else {
                return Err(GridError::Malformed {
                    url,
                    detail: String::from("expected a JSON array"),
                });
            };
            items
                .into_iter()
                .map(|item| match item {
                    serde_json::Value::String(id) => Ok(id),
                    other => Err(GridError::Malformed {
                        url: url.clone(),
                        detail: format!("expected a member id string, got {other}"),
                    }),
                })
                .collect()
        })
    }

    fn subscribe<'a>(&'a self, topic: &'a str) -> ChannelFuture<'a, Subscription, Self::Error> {
        Box::pin(async move {
            let (sender, receiver) = mpsc::channel(SUBSCRIPTION_CAPACITY);
            let poller = TopicPoller {
                client: self.client.clone(),
                url: self.topic_url(topic),
                api_token: self.api_token.clone(),
            };
            let handle = tokio::spawn(poller.run(sender));
            Ok(Subscription::new(receiver, move || handle.abort()))
        })
    }
}

#[derive(Deserialize)]
struct MessageBatch {
    cursor: u64,
    #[serde(default)]
    messages: Vec<serde_json::Value>,
}

struct TopicPoller {
    client: reqwest::Client,
    url: String,
    api_token: Option<String>,
}

impl TopicPoller {
    async fn run(self, sender: mpsc::Sender<UpdateMessage>) {
        let mut cursor = 0_u64;
        loop {
            match self.poll(cursor).await {
                Ok(batch) => {
                    cursor = batch.cursor;
                    for value in batch.messages {
                        match decode_update(&value) {
                            Ok(update) => {
                                // The consumer going away ends the poller.
                                if sender.send(update).await.is_err() {
                                    return;
                                }
                            }
                            Err(err) => {
                                tracing::warn!(
                                    url = %self.url,
                                    error = %err,
                                    "discarding undecodable update message"
                                );
                            }
                        }
                    }
                }
                Err(err) => {
                    tracing::warn!(url = %self.url, error = %err, "update poll failed, retrying");
                    tokio::time::sleep(TOPIC_RETRY_DELAY).await;
                }
            }
        }
    }

    async fn poll(&self, cursor: u64) -> Result<MessageBatch, GridError> {
        let mut request = self
            .client
            .get(&self.url)
            .query(&[("cursor", cursor), ("wait", TOPIC_POLL_WAIT_SECS)]);
        if let Some(token) = &self.api_token {
            request = request.bearer_auth(token);
        }
        let response = request
            .send()
            .await
            .map_err(|source| GridError::Transport {
                url: self.url.clone(),
                source,
            })?;
        if !response.status().is_success() {
            return Err(GridError::UnexpectedStatus {
                url: self.url.clone(),
                status: response.status(),
            });
        }
        response
            .json()
            .await
            .map_err(|source| GridError::Decode {
                url: self.url.clone(),
                source,
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn channel() -> GridChannel {
        GridChannel::new("https://grid.example.com/", None).expect("client builds")
    }

    #[test]
    fn urls_drop_the_trailing_slash_and_nest_resources() {
        let channel = channel();
        assert_eq!(
            channel.queue_url("__migration_start_queue"),
            "https://grid.example.com/v1/queues/__migration_start_queue/items"
        );
        assert_eq!(
            channel.entry_url("__migration_status", "m1"),
            "https://grid.example.com/v1/stores/__migration_status/entries/m1"
        );
        assert_eq!(
            channel.list_url("__migrations_in_progress"),
            "https://grid.example.com/v1/lists/__migrations_in_progress/items"
        );
        assert_eq!(
            channel.members_url(),
            "https://grid.example.com/v1/cluster/members"
        );
        assert_eq!(
            channel.topic_url("__migration_updates_m1"),
            "https://grid.example.com/v1/topics/__migration_updates_m1/messages"
        );
    }

    #[test]
    fn wire_values_keep_strings_and_structures_apart() {
        assert_eq!(
            to_wire(serde_json::json!("text")),
            WireValue::Text(String::from("text"))
        );
        assert_eq!(
            to_wire(serde_json::json!({"a": 1})),
            WireValue::Json(serde_json::json!({"a": 1}))
        );
    }

    #[test]
    fn message_batches_tolerate_an_absent_message_list() {
        let batch: MessageBatch =
            serde_json::from_value(serde_json::json!({"cursor": 7})).expect("batch decodes");
        assert_eq!(batch.cursor, 7);
        assert!(batch.messages.is_empty());
    }
}
