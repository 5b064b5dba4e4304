//! Push topics built on long polling.
//!
//! Subscribing to `(topic, id)` starts one poll loop that calls the `topic`
//! method with `[id]` and fans every non-null answer out to the callbacks
//! registered for that pair. The loop stops at its next check once the last
//! callback is unsubscribed.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::{Arc, PoisonError};
use std::time::Duration;

use hprose_common::{HproseError, List, Result, Value};
use tracing::{debug, warn};

use crate::client::Client;
use crate::context::{Callback, InvokeSettings};

/// Receives each message published on a topic.
pub type TopicCallback = Arc<dyn Fn(&Value) -> Result<()> + Send + Sync>;

/// Pause after a failed poll before the next one.
const ERROR_BACKOFF: Duration = Duration::from_secs(1);

struct Subscription {
    callbacks: Vec<TopicCallback>,
    /// Identifies the poll loop serving this subscription
    generation: u64,
}

#[derive(Default)]
pub(crate) struct Topics {
    entries: HashMap<String, HashMap<String, Subscription>>,
    next_generation: u64,
}

impl Topics {
    /// Adds a callback; returns the generation of a new loop to start, if
    /// this is the first callback for the pair.
    fn add(&mut self, topic: &str, id: &str, callback: TopicCallback) -> Option<u64> {
        let subscriptions = self.entries.entry(topic.to_string()).or_default();
        match subscriptions.entry(id.to_string()) {
            Entry::Occupied(mut entry) => {
                entry.get_mut().callbacks.push(callback);
                None
            }
            Entry::Vacant(entry) => {
                self.next_generation += 1;
                entry.insert(Subscription {
                    callbacks: vec![callback],
                    generation: self.next_generation,
                });
                Some(self.next_generation)
            }
        }
    }

    /// Callbacks of the subscription, if it is still served by `generation`.
    fn callbacks(&self, topic: &str, id: &str, generation: u64) -> Option<Vec<TopicCallback>> {
        self.entries
            .get(topic)?
            .get(id)
            .filter(|sub| sub.generation == generation)
            .map(|sub| sub.callbacks.clone())
    }

    fn remove(&mut self, topic: &str, id: Option<&str>, callback: Option<&TopicCallback>) {
        let Some(subscriptions) = self.entries.get_mut(topic) else {
            return;
        };
        subscriptions.retain(|sub_id, sub| {
            if id.is_some_and(|id| id != sub_id.as_str()) {
                return true;
            }
            match callback {
                Some(callback) => sub.callbacks.retain(|cb| !Arc::ptr_eq(cb, callback)),
                None => sub.callbacks.clear(),
            }
            !sub.callbacks.is_empty()
        });
        if subscriptions.is_empty() {
            self.entries.remove(topic);
        }
    }

    pub(crate) fn clear(&mut self) {
        self.entries.clear();
    }
}

impl Client {
    fn topics(&self) -> std::sync::MutexGuard<'_, Topics> {
        self.inner
            .topics
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Registers `callback` for messages on `topic` and returns the id
    /// subscribed under.
    ///
    /// Without an explicit `id` the client's own [`id`](Client::id) is used.
    /// `timeout` bounds each poll; a poll that times out is simply repeated.
    pub async fn subscribe(
        &self,
        topic: &str,
        id: Option<String>,
        callback: TopicCallback,
        timeout: Option<Duration>,
    ) -> Result<String> {
        let id = match id {
            Some(id) => id,
            None => self.id().await?,
        };
        let generation = self.topics().add(topic, &id, callback);
        if let Some(generation) = generation {
            debug!(topic, id = %id, "Starting topic poll");
            let client = self.clone();
            let (topic, poll_id) = (topic.to_string(), id.clone());
            tokio::spawn(async move {
                client.poll_topic(topic, poll_id, generation, timeout).await;
            });
        }
        Ok(id)
    }

    async fn poll_topic(&self, topic: String, id: String, generation: u64, timeout: Option<Duration>) {
        let mut settings = InvokeSettings::new()
            .idempotent(true)
            .failswitch(true)
            // Failures are logged here, not reported to the client-wide handler.
            .on_error(Callback::error(|_, _| {}));
        if let Some(timeout) = timeout {
            settings = settings.timeout(timeout);
        }

        while self.topics().callbacks(&topic, &id, generation).is_some() {
            let args = List::new(vec![Value::from(id.as_str())]);
            match self.invoke(&topic, args, settings.clone()).await {
                Ok(Value::Null) => {}
                Ok(message) => {
                    let callbacks = self
                        .topics()
                        .callbacks(&topic, &id, generation)
                        .unwrap_or_default();
                    for callback in callbacks {
                        if let Err(e) = callback(&message) {
                            warn!(topic = %topic, id = %id, error = %e, "Topic callback failed");
                        }
                    }
                }
                Err(HproseError::Timeout(_)) => {}
                Err(e) => {
                    warn!(topic = %topic, id = %id, error = %e, "Topic poll failed");
                    tokio::time::sleep(ERROR_BACKOFF).await;
                }
            }
        }
        debug!(topic = %topic, id = %id, "Topic poll stopped");
    }

    /// Removes `callback`, or every callback when `None`, from `topic` under
    /// `id`, or under every id when `None`.
    pub fn unsubscribe(&self, topic: &str, id: Option<&str>, callback: Option<&TopicCallback>) {
        self.topics().remove(topic, id, callback);
    }

    pub fn is_subscribed(&self, topic: &str) -> bool {
        self.topics().entries.contains_key(topic)
    }

    /// Topics with at least one callback.
    pub fn subscribed_list(&self) -> Vec<String> {
        let mut topics: Vec<String> = self.topics().entries.keys().cloned().collect();
        topics.sort();
        topics
    }
}
