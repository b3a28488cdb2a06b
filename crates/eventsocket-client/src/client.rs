//! Client facade.
//!
//! Owns the connection and the correlation table for the life of the
//! client. Outbound operations build envelopes and write them through the
//! shared sink; inbound traffic arrives on the [`Inbox`] channels, on
//! [`Subscription`]s, and on [`PendingReply`] handles.
//!
//! Delivery sends block the dispatch loop until a consumer makes room, so
//! every receive end handed out here must be drained promptly.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::Instrument;
use uuid::Uuid;

use eventsocket_core::error::{EventSocketError, Result};
use eventsocket_core::protocol::{Envelope, Payload};

use crate::config::ClientConfig;
use crate::dispatch::{CorrelationTable, Dispatcher, LinkState, Received, Routes};
use crate::transport::{Connector, EnvelopeSink, ReadLimits, WsConnector};

fn generate_id() -> String {
    Uuid::new_v4().to_string()
}

/// Receive ends of the well-known channels.
pub struct Inbox {
    pub broadcasts: mpsc::Receiver<Received>,
    /// Requests addressed to this client by other peers.
    pub requests: mpsc::Receiver<Received>,
    /// Per-frame receive errors, then `ConnectionClosed` when a loop ends.
    pub errors: mpsc::Receiver<EventSocketError>,
}

#[derive(Clone)]
pub struct Client {
    inner: Arc<ClientInner>,
}

struct ClientInner {
    id: String,
    connector: Arc<dyn Connector>,
    table: Arc<CorrelationTable>,
    routes: Routes,
    limits: Arc<ReadLimits>,
    writer: Mutex<Option<Box<dyn EnvelopeSink>>>,
    reader: Mutex<Option<JoinHandle<()>>>,
    /// Serializes connect/reconnect/close.
    lifecycle: Mutex<()>,
    state: Arc<watch::Sender<LinkState>>,
}

impl Client {
    /// Register with the server, dial the socket, start the dispatch loop.
    pub async fn connect(cfg: ClientConfig) -> Result<(Self, Inbox)> {
        let connector = Arc::new(WsConnector::new(cfg.clone())?);
        Self::with_connector(connector, cfg).await
    }

    /// Same as [`Client::connect`] over any connector.
    pub async fn with_connector(
        connector: Arc<dyn Connector>,
        cfg: ClientConfig,
    ) -> Result<(Self, Inbox)> {
        cfg.validate()?;
        let id = connector.register().await?;

        let cap = cfg.delivery.channel_capacity;
        let (broadcasts_tx, broadcasts) = mpsc::channel(cap);
        let (requests_tx, requests) = mpsc::channel(cap);
        let (errors_tx, errors) = mpsc::channel(cap);

        let (state, _) = watch::channel(LinkState::Closed);

        let client = Self {
            inner: Arc::new(ClientInner {
                id,
                connector,
                table: Arc::new(CorrelationTable::new(cap)),
                routes: Routes {
                    broadcasts: broadcasts_tx,
                    requests: requests_tx,
                    errors: errors_tx,
                },
                limits: Arc::new(ReadLimits::new(
                    cfg.transport.max_message_size,
                    cfg.transport.read_timeout(),
                )),
                writer: Mutex::new(None),
                reader: Mutex::new(None),
                lifecycle: Mutex::new(()),
                state: Arc::new(state),
            }),
        };

        {
            let _guard = client.inner.lifecycle.lock().await;
            client.dial().await?;
        }

        Ok((
            client,
            Inbox {
                broadcasts,
                requests,
                errors,
            },
        ))
    }

    /// Server-assigned client id.
    pub fn id(&self) -> &str {
        &self.inner.id
    }

    pub fn state(&self) -> LinkState {
        *self.inner.state.borrow()
    }

    /// Resolves once the current dispatch loop has stopped.
    pub async fn closed(&self) {
        let mut rx = self.inner.state.subscribe();
        let _ = rx.wait_for(|s| *s == LinkState::Closed).await;
    }

    async fn dial(&self) -> Result<()> {
        let inner = &self.inner;
        let conn = inner
            .connector
            .dial(&inner.id, Arc::clone(&inner.limits))
            .await?;

        *inner.writer.lock().await = Some(conn.sink);

        let dispatcher = Dispatcher::new(Arc::clone(&inner.table), inner.routes.clone());
        let span = tracing::info_span!("eventsocket", client_id = %inner.id);

        inner.state.send_replace(LinkState::Connected);
        let handle = tokio::spawn(
            dispatcher
                .run(conn.source, Arc::clone(&inner.state))
                .instrument(span),
        );
        *inner.reader.lock().await = Some(handle);

        tracing::info!(client_id = %inner.id, "dispatch loop started");
        Ok(())
    }

    async fn teardown(&self) {
        let inner = &self.inner;
        if let Some(mut sink) = inner.writer.lock().await.take() {
            if let Err(e) = sink.close().await {
                tracing::debug!(error = %e, "socket close failed");
            }
        }
        if let Some(reader) = inner.reader.lock().await.take() {
            reader.abort();
        }
        inner.state.send_replace(LinkState::Closed);
    }

    /// Close the current connection (if any) and dial again with the same id.
    ///
    /// Registered subscriptions and outstanding requests are kept; nothing
    /// guarantees the server will satisfy them on the new connection.
    pub async fn reconnect(&self) -> Result<()> {
        let _guard = self.inner.lifecycle.lock().await;
        self.teardown().await;
        tracing::info!(client_id = %self.inner.id, "reconnecting");
        self.dial().await
    }

    /// Close the connection and stop the dispatch loop. Outstanding requests
    /// are dropped so their waiters observe end of channel.
    pub async fn close(&self) {
        let _guard = self.inner.lifecycle.lock().await;
        self.teardown().await;
        let dropped = self.inner.table.clear_requests();
        tracing::info!(client_id = %self.inner.id, dropped, "client closed");
    }

    /// Inbound frame size limit. Takes effect on the next frame; over
    /// WebSocket the socket keeps the limit it was dialed with as a ceiling
    /// until the next reconnect.
    pub fn set_max_message_size(&self, limit: Option<usize>) {
        self.inner.limits.set_max_message_size(limit);
    }

    pub fn set_read_deadline(&self, deadline: Option<Duration>) {
        self.inner.limits.set_read_deadline(deadline);
    }

    async fn write(&self, env: &Envelope) -> Result<()> {
        let mut writer = self.inner.writer.lock().await;
        let sink = writer.as_mut().ok_or(EventSocketError::NotConnected)?;
        sink.send(env).await
    }

    pub async fn broadcast(&self, payload: Payload) -> Result<()> {
        self.write(&Envelope::broadcast(payload)).await
    }

    /// Publish an event on `topic`.
    pub async fn emit(&self, topic: &str, payload: Payload) -> Result<()> {
        self.write(&Envelope::standard(topic, payload)).await
    }

    /// Listen on `topics` through one channel.
    ///
    /// The table entry exists before the Subscribe envelope is written. A
    /// topic already registered by another subscription is taken over by
    /// this one; if the write fails the table is put back as it was.
    pub async fn subscribe<S: AsRef<str>>(&self, topics: &[S]) -> Result<Subscription> {
        let env = Envelope::subscribe(topics)?;
        let (id, rx, displaced) = self.inner.table.register_subscription(topics);

        if let Err(e) = self.write(&env).await {
            self.inner.table.rollback_subscription(id, displaced);
            return Err(e);
        }
        drop(displaced);

        Ok(Subscription {
            id,
            topics: env.topics(),
            rx,
            table: Arc::clone(&self.inner.table),
        })
    }

    /// Stop local delivery for `topics` and tell the server.
    pub async fn unsubscribe<S: AsRef<str>>(&self, topics: &[S]) -> Result<()> {
        let env = Envelope::unsubscribe(topics)?;
        let removed = self.inner.table.unsubscribe(topics);
        tracing::debug!(removed, "topics unsubscribed");
        self.write(&env).await
    }

    /// Send a request to `target_client_id` and return the reply handle.
    ///
    /// The reply slot is registered before the write so a fast reply cannot
    /// race it; a failed write drops the handle, which removes the slot.
    pub async fn request(&self, target_client_id: &str, payload: Payload) -> Result<PendingReply> {
        let request_id = generate_id();
        let rx = self.inner.table.register_request(&request_id)?;
        let pending = PendingReply {
            request_id,
            rx: Some(rx),
            table: Arc::clone(&self.inner.table),
        };

        let env = Envelope::request(pending.request_id.as_str(), target_client_id, payload);
        self.write(&env).await?;
        Ok(pending)
    }

    /// Answer a request received on [`Inbox::requests`].
    pub async fn reply(
        &self,
        request_id: &str,
        target_client_id: &str,
        payload: Payload,
    ) -> Result<()> {
        self.write(&Envelope::reply(request_id, target_client_id, payload))
            .await
    }

    /// Forget an outstanding request. Returns whether it was still pending.
    pub fn cancel_request(&self, request_id: &str) -> bool {
        self.inner.table.cancel_request(request_id)
    }

    pub fn pending_requests(&self) -> usize {
        self.inner.table.pending_requests()
    }

    pub fn subscribed_topics(&self) -> Vec<String> {
        self.inner.table.subscribed_topics()
    }
}

/// Receive end of a subscription. Dropping it releases the topics it still
/// owns locally (no Unsubscribe is sent).
#[derive(Debug)]
pub struct Subscription {
    id: u64,
    topics: Vec<String>,
    rx: mpsc::Receiver<Received>,
    table: Arc<CorrelationTable>,
}

impl Subscription {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Topics requested at subscribe time.
    pub fn topics(&self) -> &[String] {
        &self.topics
    }

    /// Next event; `None` once no topic routes here anymore.
    pub async fn recv(&mut self) -> Option<Received> {
        self.rx.recv().await
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.table.unsubscribe_all(self.id);
    }
}

/// Single-use reply handle. Dropping it before the reply arrives cancels the
/// request locally.
#[derive(Debug)]
pub struct PendingReply {
    request_id: String,
    rx: Option<oneshot::Receiver<Received>>,
    table: Arc<CorrelationTable>,
}

impl PendingReply {
    pub fn request_id(&self) -> &str {
        &self.request_id
    }

    /// The reply, once. Later calls, or a closed client, yield `None`.
    pub async fn recv(&mut self) -> Option<Received> {
        let rx = self.rx.as_mut()?;
        let out = rx.await.ok();
        self.rx = None;
        out
    }
}

impl Drop for PendingReply {
    fn drop(&mut self) {
        if self.rx.is_some() {
            self.table.cancel_request(&self.request_id);
        }
    }
}
