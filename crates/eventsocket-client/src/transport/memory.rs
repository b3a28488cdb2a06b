//! In-process transport.
//!
//! Every dial hands a [`MemoryPeer`] (the server end) to the owner of the
//! connector, which can push frames to the client, read what the client
//! wrote, and close the connection. Frames go through the same codec and
//! read limits as the WebSocket transport.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;

use eventsocket_core::error::{EventSocketError, Result};
use eventsocket_core::protocol::{decode_envelope, encode_envelope, Envelope};

use crate::transport::codec;
use crate::transport::{Connection, Connector, EnvelopeSink, EnvelopeSource, Inbound, ReadLimits};

const CHANNEL_CAPACITY: usize = 64;

#[derive(Debug)]
enum MemoryFrame {
    Text(String),
    Close,
}

/// Connector producing in-process connections.
pub struct MemoryConnector {
    client_id: String,
    peers: mpsc::UnboundedSender<MemoryPeer>,
    refuse: AtomicBool,
}

impl MemoryConnector {
    /// Returns the connector and the stream of server ends, one per dial.
    pub fn new(client_id: impl Into<String>) -> (Self, mpsc::UnboundedReceiver<MemoryPeer>) {
        let (peers, rx) = mpsc::unbounded_channel();
        (
            Self {
                client_id: client_id.into(),
                peers,
                refuse: AtomicBool::new(false),
            },
            rx,
        )
    }

    /// Make subsequent dials fail with a dial error.
    pub fn refuse_dials(&self, refuse: bool) {
        self.refuse.store(refuse, Ordering::Relaxed);
    }
}

#[async_trait]
impl Connector for MemoryConnector {
    async fn register(&self) -> Result<String> {
        Ok(self.client_id.clone())
    }

    async fn dial(&self, client_id: &str, limits: Arc<ReadLimits>) -> Result<Connection> {
        if self.refuse.load(Ordering::Relaxed) {
            return Err(EventSocketError::Dial(format!(
                "memory dial refused for {client_id}"
            )));
        }

        let (to_client, client_rx) = mpsc::channel(CHANNEL_CAPACITY);
        let (client_tx, from_client) = mpsc::channel(CHANNEL_CAPACITY);

        self.peers
            .send(MemoryPeer {
                client_id: client_id.to_string(),
                to_client,
                from_client,
            })
            .map_err(|_| EventSocketError::Dial("memory peer receiver dropped".into()))?;

        Ok(Connection {
            sink: Box::new(MemorySink { tx: Some(client_tx) }),
            source: Box::new(MemorySource {
                rx: client_rx,
                limits,
                closed: false,
            }),
        })
    }
}

/// Server end of an in-process connection.
pub struct MemoryPeer {
    client_id: String,
    to_client: mpsc::Sender<MemoryFrame>,
    from_client: mpsc::Receiver<String>,
}

impl MemoryPeer {
    /// Id the client dialed with.
    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    /// Deliver an envelope to the client.
    pub async fn push(&self, env: &Envelope) -> Result<()> {
        self.push_raw(encode_envelope(env)?).await
    }

    /// Deliver a raw text frame (may be malformed on purpose).
    pub async fn push_raw(&self, text: impl Into<String>) -> Result<()> {
        self.to_client
            .send(MemoryFrame::Text(text.into()))
            .await
            .map_err(|_| EventSocketError::ConnectionClosed)
    }

    /// Send a close frame.
    pub async fn close(&self) {
        let _ = self.to_client.send(MemoryFrame::Close).await;
    }

    /// Next envelope the client wrote; `None` once the client side closed.
    pub async fn next_sent(&mut self) -> Option<Envelope> {
        let text = self.from_client.recv().await?;
        decode_envelope(text.as_bytes()).ok()
    }
}

struct MemorySink {
    tx: Option<mpsc::Sender<String>>,
}

#[async_trait]
impl EnvelopeSink for MemorySink {
    async fn send(&mut self, env: &Envelope) -> Result<()> {
        let tx = self.tx.as_ref().ok_or(EventSocketError::NotConnected)?;
        let text = encode_envelope(env)?;
        tx.send(text)
            .await
            .map_err(|_| EventSocketError::Send("memory peer gone".into()))
    }

    async fn close(&mut self) -> Result<()> {
        self.tx = None;
        Ok(())
    }
}

struct MemorySource {
    rx: mpsc::Receiver<MemoryFrame>,
    limits: Arc<ReadLimits>,
    closed: bool,
}

#[async_trait]
impl EnvelopeSource for MemorySource {
    async fn receive(&mut self) -> Result<Inbound> {
        if self.closed {
            return Err(EventSocketError::ConnectionClosed);
        }
        match self.limits.read_within(self.rx.recv()).await? {
            Some(MemoryFrame::Text(text)) => codec::decode_bytes(text.as_bytes(), &self.limits),
            Some(MemoryFrame::Close) | None => {
                self.closed = true;
                Err(EventSocketError::ConnectionClosed)
            }
        }
    }
}
