use std::sync::Arc;

use tokio::sync::{mpsc, watch};

use eventsocket_core::error::EventSocketError;
use eventsocket_core::protocol::{Envelope, MessageType, Payload};

use crate::dispatch::CorrelationTable;
use crate::transport::{EnvelopeSource, Inbound};

/// Unit placed on every delivery channel. Receive errors never ride here;
/// they go to the separate error channel (`Inbox::errors`).
#[derive(Debug, Clone)]
pub struct Received {
    pub envelope: Envelope,
    /// Size of the frame it was decoded from.
    pub bytes_len: usize,
}

impl Received {
    pub fn new(envelope: Envelope, bytes_len: usize) -> Self {
        Self {
            envelope,
            bytes_len,
        }
    }

    pub fn message_type(&self) -> MessageType {
        self.envelope.message_type
    }

    pub fn event(&self) -> Option<&str> {
        self.envelope.event.as_deref()
    }

    pub fn request_id(&self) -> Option<&str> {
        self.envelope.request_id.as_deref()
    }

    pub fn payload(&self) -> &Payload {
        &self.envelope.payload
    }
}

impl From<Inbound> for Received {
    fn from(inb: Inbound) -> Self {
        Self::new(inb.envelope, inb.bytes_len)
    }
}

/// Well-known destinations not keyed by the correlation table.
#[derive(Clone)]
pub struct Routes {
    pub broadcasts: mpsc::Sender<Received>,
    pub requests: mpsc::Sender<Received>,
    pub errors: mpsc::Sender<EventSocketError>,
}

/// Outcome of routing one envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Broadcast,
    Topic,
    Request,
    Reply,
    /// Standard event for a topic nobody subscribed to.
    NoSubscriber,
    /// Reply whose request id is unknown or already answered.
    UnknownRequest,
    /// The receive end was dropped.
    ConsumerGone,
    /// Subscribe/Unsubscribe echoed by the server.
    Ignored,
}

/// Read-side link state published by the dispatch loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Connected,
    Closed,
}

/// Routes inbound envelopes to the broadcast, request, topic and reply sinks.
pub struct Dispatcher {
    table: Arc<CorrelationTable>,
    routes: Routes,
}

impl Dispatcher {
    pub fn new(table: Arc<CorrelationTable>, routes: Routes) -> Self {
        Self { table, routes }
    }

    /// Route one envelope. Sends block until the consumer makes room.
    pub async fn route(&self, received: Received) -> Delivery {
        match received.message_type() {
            MessageType::Broadcast => {
                deliver(&self.routes.broadcasts, received, Delivery::Broadcast).await
            }
            MessageType::Request => {
                deliver(&self.routes.requests, received, Delivery::Request).await
            }
            MessageType::Standard => {
                let topic = received.event().unwrap_or_default();
                match self.table.resolve_subscription(topic) {
                    Some(tx) => deliver(&tx, received, Delivery::Topic).await,
                    None => {
                        tracing::debug!(%topic, "no subscriber; event dropped");
                        Delivery::NoSubscriber
                    }
                }
            }
            MessageType::Reply => {
                let rid = received.request_id().unwrap_or_default().to_string();
                match self.table.resolve_and_consume_request(&rid) {
                    // the slot is gone from the table; dropping the sender ends it
                    Some(slot) => match slot.send(received) {
                        Ok(()) => Delivery::Reply,
                        Err(_) => {
                            tracing::debug!(request_id = %rid, "requester gone; reply dropped");
                            Delivery::ConsumerGone
                        }
                    },
                    None => {
                        tracing::debug!(request_id = %rid, "unknown request id; reply dropped");
                        Delivery::UnknownRequest
                    }
                }
            }
            MessageType::Subscribe | MessageType::Unsubscribe => {
                tracing::debug!(kind = received.message_type().as_str(), "control envelope ignored");
                Delivery::Ignored
            }
        }
    }

    /// Read until the connection closes.
    ///
    /// Per-frame errors go to the error channel and the loop continues. On
    /// close the state flips to `Closed` before the terminal error is sent.
    pub async fn run(self, mut source: Box<dyn EnvelopeSource>, state: Arc<watch::Sender<LinkState>>) {
        loop {
            match source.receive().await {
                Ok(inbound) => {
                    let delivery = self.route(inbound.into()).await;
                    tracing::trace!(?delivery, "routed");
                }
                Err(e) if e.is_fatal() => {
                    tracing::info!("connection closed; dispatch loop ending");
                    state.send_replace(LinkState::Closed);
                    let _ = self.routes.errors.send(e).await;
                    return;
                }
                Err(e) => {
                    tracing::warn!(code = e.code().as_str(), error = %e, "inbound frame rejected");
                    if self.routes.errors.send(e).await.is_err() {
                        tracing::debug!("error consumer gone");
                    }
                }
            }
        }
    }
}

async fn deliver(tx: &mpsc::Sender<Received>, received: Received, ok: Delivery) -> Delivery {
    match tx.send(received).await {
        Ok(()) => ok,
        Err(_) => {
            tracing::debug!(?ok, "consumer gone; delivery dropped");
            Delivery::ConsumerGone
        }
    }
}
