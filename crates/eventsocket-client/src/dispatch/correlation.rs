use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use tokio::sync::{mpsc, oneshot};

use eventsocket_core::error::{EventSocketError, Result};

use crate::dispatch::Received;

#[derive(Debug, Clone)]
struct TopicEntry {
    subscription: u64,
    tx: mpsc::Sender<Received>,
}

/// Topic entries taken over by a registration. Dropping this commits the
/// takeover; [`CorrelationTable::rollback_subscription`] undoes it.
#[derive(Debug, Default)]
pub struct Displaced(Vec<(String, TopicEntry)>);

impl Displaced {
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

#[derive(Debug, Default)]
struct Tables {
    pending: HashMap<String, oneshot::Sender<Received>>,
    topics: HashMap<String, TopicEntry>,
}

/// Correlation table:
/// - `request_id -> reply slot` (single use, removed on delivery)
/// - `topic -> subscriber channel` (one channel may sit under many topics)
///
/// Every operation holds the single lock only for the map access; channel
/// sends happen after the lock is released.
#[derive(Debug)]
pub struct CorrelationTable {
    inner: Mutex<Tables>,
    next_subscription: AtomicU64,
    capacity: usize,
}

impl CorrelationTable {
    /// `capacity` sizes each subscriber channel.
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(Tables::default()),
            next_subscription: AtomicU64::new(1),
            capacity: capacity.max(1),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Tables> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Create the reply slot for `id`. Ids are caller-generated and unique;
    /// a collision is reported instead of overwriting the outstanding slot.
    pub fn register_request(&self, id: &str) -> Result<oneshot::Receiver<Received>> {
        let mut t = self.lock();
        if t.pending.contains_key(id) {
            return Err(EventSocketError::Internal(format!(
                "duplicate request id: {id}"
            )));
        }
        let (tx, rx) = oneshot::channel();
        t.pending.insert(id.to_string(), tx);
        Ok(rx)
    }

    /// One channel shared by all `topics`. Last write wins per topic.
    ///
    /// Returns the subscription number, the receive end, and the entries it
    /// took over. Those keep their senders alive until `Displaced` is dropped.
    pub fn register_subscription<S: AsRef<str>>(
        &self,
        topics: &[S],
    ) -> (u64, mpsc::Receiver<Received>, Displaced) {
        let (tx, rx) = mpsc::channel(self.capacity);
        let subscription = self.next_subscription.fetch_add(1, Ordering::Relaxed);
        let mut displaced = Displaced::default();

        let mut t = self.lock();
        for topic in topics {
            let topic = topic.as_ref().to_string();
            let prev = t.topics.insert(
                topic.clone(),
                TopicEntry {
                    subscription,
                    tx: tx.clone(),
                },
            );
            if let Some(prev) = prev {
                if prev.subscription == subscription {
                    continue;
                }
                tracing::debug!(
                    %topic,
                    superseded = prev.subscription,
                    subscription,
                    "topic subscription replaced"
                );
                displaced.0.push((topic, prev));
            }
        }
        (subscription, rx, displaced)
    }

    /// Undo a registration: drop the topics `subscription` still owns and
    /// reinstate what it displaced. A topic claimed by a later registration,
    /// or an entry whose receiver is gone, is left alone.
    pub fn rollback_subscription(&self, subscription: u64, displaced: Displaced) {
        let mut t = self.lock();
        t.topics.retain(|_, e| e.subscription != subscription);
        for (topic, entry) in displaced.0 {
            if entry.tx.is_closed() {
                continue;
            }
            t.topics.entry(topic).or_insert(entry);
        }
    }

    /// Take the reply slot for `id`, if still outstanding.
    pub fn resolve_and_consume_request(&self, id: &str) -> Option<oneshot::Sender<Received>> {
        self.lock().pending.remove(id)
    }

    /// Subscriber channel for `topic`, left in place.
    pub fn resolve_subscription(&self, topic: &str) -> Option<mpsc::Sender<Received>> {
        self.lock().topics.get(topic).map(|e| e.tx.clone())
    }

    /// Drop an outstanding request nobody waits for anymore.
    pub fn cancel_request(&self, id: &str) -> bool {
        self.lock().pending.remove(id).is_some()
    }

    /// Remove topic keys. Returns how many were registered.
    pub fn unsubscribe<S: AsRef<str>>(&self, topics: &[S]) -> usize {
        let mut t = self.lock();
        topics
            .iter()
            .filter(|topic| t.topics.remove(topic.as_ref()).is_some())
            .count()
    }

    /// Remove the topics still owned by `subscription`.
    pub fn unsubscribe_all(&self, subscription: u64) -> Vec<String> {
        let mut t = self.lock();
        let owned: Vec<String> = t
            .topics
            .iter()
            .filter(|(_, e)| e.subscription == subscription)
            .map(|(k, _)| k.clone())
            .collect();
        for k in &owned {
            t.topics.remove(k);
        }
        owned
    }

    /// Drop every reply slot; waiters observe end of channel.
    pub fn clear_requests(&self) -> usize {
        let mut t = self.lock();
        let n = t.pending.len();
        t.pending.clear();
        n
    }

    pub fn pending_requests(&self) -> usize {
        self.lock().pending.len()
    }

    pub fn subscribed_topics(&self) -> Vec<String> {
        let mut topics: Vec<String> = self.lock().topics.keys().cloned().collect();
        topics.sort();
        topics
    }
}
