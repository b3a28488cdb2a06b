//! Transport layer.
//!
//! A [`Connector`] registers the client and dials one [`Connection`], split
//! into a write half shared by facade callers and a read half owned
//! exclusively by the dispatch loop. The codec decodes frames once before
//! they reach the dispatcher.

pub mod codec;
pub mod memory;
pub mod registration;
pub mod ws;

use std::future::Future;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use eventsocket_core::error::{EventSocketError, Result};
use eventsocket_core::protocol::Envelope;

pub use memory::{MemoryConnector, MemoryPeer};
pub use ws::WsConnector;

/// A decoded inbound envelope plus its frame size.
#[derive(Debug, Clone)]
pub struct Inbound {
    pub envelope: Envelope,
    pub bytes_len: usize,
}

/// Write half of a connection.
#[async_trait]
pub trait EnvelopeSink: Send {
    async fn send(&mut self, env: &Envelope) -> Result<()>;
    /// Close the connection. Closing twice is not an error.
    async fn close(&mut self) -> Result<()>;
}

/// Read half of a connection.
#[async_trait]
pub trait EnvelopeSource: Send {
    /// Next inbound envelope.
    ///
    /// `Err(ConnectionClosed)` is terminal; any other error concerns a single
    /// frame and the caller may keep reading.
    async fn receive(&mut self) -> Result<Inbound>;
}

/// One live connection.
pub struct Connection {
    pub sink: Box<dyn EnvelopeSink>,
    pub source: Box<dyn EnvelopeSource>,
}

/// Registration + dial.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Obtain a client id from the server.
    async fn register(&self) -> Result<String>;
    /// Open a socket for an already registered client id.
    async fn dial(&self, client_id: &str, limits: Arc<ReadLimits>) -> Result<Connection>;
}

/// Read-side limits, adjustable while connected and kept across reconnects.
///
/// Zero encodes "unset" for both fields.
#[derive(Debug, Default)]
pub struct ReadLimits {
    max_message_size: AtomicUsize,
    read_deadline_ms: AtomicU64,
}

impl ReadLimits {
    pub fn new(max_message_size: Option<usize>, read_deadline: Option<Duration>) -> Self {
        let limits = Self::default();
        limits.set_max_message_size(max_message_size);
        limits.set_read_deadline(read_deadline);
        limits
    }

    pub fn max_message_size(&self) -> Option<usize> {
        match self.max_message_size.load(Ordering::Relaxed) {
            0 => None,
            n => Some(n),
        }
    }

    pub fn set_max_message_size(&self, limit: Option<usize>) {
        self.max_message_size
            .store(limit.unwrap_or(0), Ordering::Relaxed);
    }

    pub fn read_deadline(&self) -> Option<Duration> {
        match self.read_deadline_ms.load(Ordering::Relaxed) {
            0 => None,
            ms => Some(Duration::from_millis(ms)),
        }
    }

    pub fn set_read_deadline(&self, deadline: Option<Duration>) {
        let ms = deadline
            .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX).max(1))
            .unwrap_or(0);
        self.read_deadline_ms.store(ms, Ordering::Relaxed);
    }

    /// Reject frames over the size limit.
    pub fn check_len(&self, len: usize) -> Result<()> {
        match self.max_message_size() {
            Some(limit) if len > limit => Err(EventSocketError::PayloadTooLarge { len, limit }),
            _ => Ok(()),
        }
    }

    /// Run one read under the current deadline.
    pub async fn read_within<F, T>(&self, fut: F) -> Result<T>
    where
        F: Future<Output = T> + Send,
    {
        match self.read_deadline() {
            Some(d) => tokio::time::timeout(d, fut)
                .await
                .map_err(|_| EventSocketError::ReadTimeout),
            None => Ok(fut.await),
        }
    }
}
