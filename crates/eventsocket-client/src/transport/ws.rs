//! WebSocket transport (tokio-tungstenite).
//!
//! Responsibilities:
//! - Register over HTTP, then dial `/v1/clients/<id>/ws`
//! - Apply the write buffer size, message size limit and handshake timeout
//! - Split the socket: sink for facade writes, stream for the dispatch loop
//! - Map socket errors onto the per-frame / terminal error taxonomy

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::error::CapacityError;
use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::{connect_async_with_config, MaybeTlsStream, WebSocketStream};

use eventsocket_core::error::{EventSocketError, Result};
use eventsocket_core::protocol::Envelope;

use crate::config::ClientConfig;
use crate::transport::codec::{self, Decoded};
use crate::transport::{registration, Connection, Connector, EnvelopeSink, EnvelopeSource, Inbound, ReadLimits};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Registers over HTTP and dials the event socket.
pub struct WsConnector {
    cfg: ClientConfig,
    http: reqwest::Client,
}

impl WsConnector {
    pub fn new(cfg: ClientConfig) -> Result<Self> {
        cfg.validate()?;
        let http = reqwest::Client::builder()
            .timeout(cfg.transport.handshake_timeout())
            .build()
            .map_err(|e| EventSocketError::Internal(format!("http client build failed: {e}")))?;
        Ok(Self { cfg, http })
    }

    /// Socket settings for one dial. The message size limit in force at dial
    /// time is also enforced by tungstenite, which checks it once the frame
    /// has been read in full.
    fn ws_config(&self, max_message_size: Option<usize>) -> WebSocketConfig {
        let mut ws_cfg = WebSocketConfig::default();
        ws_cfg.write_buffer_size = self.cfg.transport.write_buffer_size;
        if max_message_size.is_some() {
            ws_cfg.max_message_size = max_message_size;
        }
        ws_cfg
    }
}

#[async_trait]
impl Connector for WsConnector {
    async fn register(&self) -> Result<String> {
        registration::register(&self.http, &self.cfg.registration_url()).await
    }

    async fn dial(&self, client_id: &str, limits: Arc<ReadLimits>) -> Result<Connection> {
        let url = self.cfg.socket_url(client_id);
        let handshake = self.cfg.transport.handshake_timeout();

        let (socket, _resp) = timeout(
            handshake,
            connect_async_with_config(
                url.as_str(),
                Some(self.ws_config(limits.max_message_size())),
                false,
            ),
        )
        .await
        .map_err(|_| EventSocketError::Dial(format!("handshake with {url} timed out")))?
        .map_err(|e| EventSocketError::Dial(format!("dial {url} failed: {e}")))?;

        tracing::info!(%url, "socket connected");

        let (sink, stream) = socket.split();
        Ok(Connection {
            sink: Box::new(WsSink {
                sink,
                write_timeout: self.cfg.transport.write_timeout(),
                closed: false,
            }),
            source: Box::new(WsSource {
                stream,
                limits,
                broken: false,
            }),
        })
    }
}

struct WsSink {
    sink: SplitSink<WsStream, Message>,
    write_timeout: Option<Duration>,
    closed: bool,
}

#[async_trait]
impl EnvelopeSink for WsSink {
    async fn send(&mut self, env: &Envelope) -> Result<()> {
        if self.closed {
            return Err(EventSocketError::NotConnected);
        }
        let msg = codec::encode(env)?;
        let res = match self.write_timeout {
            Some(d) => timeout(d, self.sink.send(msg))
                .await
                .map_err(|_| EventSocketError::Send("write deadline elapsed".into()))?,
            None => self.sink.send(msg).await,
        };
        res.map_err(|e| EventSocketError::Send(e.to_string()))
    }

    async fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        match self.sink.close().await {
            Ok(()) | Err(WsError::ConnectionClosed) | Err(WsError::AlreadyClosed) => Ok(()),
            Err(e) => Err(EventSocketError::Send(format!("close failed: {e}"))),
        }
    }
}

struct WsSource {
    stream: SplitStream<WsStream>,
    limits: Arc<ReadLimits>,
    /// Set once the socket can no longer yield frames.
    broken: bool,
}

/// Map a socket read error. The flag tells whether the socket can still
/// yield frames afterwards.
fn classify_read_error(e: WsError) -> (EventSocketError, bool) {
    match e {
        WsError::ConnectionClosed | WsError::AlreadyClosed => {
            (EventSocketError::ConnectionClosed, false)
        }
        // the offending frame was consumed in full
        WsError::Capacity(CapacityError::MessageTooLong { size, max_size }) => (
            EventSocketError::PayloadTooLarge {
                len: size,
                limit: max_size,
            },
            true,
        ),
        WsError::Utf8 => (
            EventSocketError::Decode("text frame is not valid utf-8".into()),
            true,
        ),
        // reported once; the next receive observes the closed socket
        other => (EventSocketError::Receive(other.to_string()), false),
    }
}

impl WsSource {
    fn read_error(&mut self, e: WsError) -> EventSocketError {
        let (err, usable) = classify_read_error(e);
        if !usable {
            self.broken = true;
        }
        err
    }
}

#[async_trait]
impl EnvelopeSource for WsSource {
    async fn receive(&mut self) -> Result<Inbound> {
        loop {
            if self.broken {
                return Err(EventSocketError::ConnectionClosed);
            }

            let next = self.limits.read_within(self.stream.next()).await?;
            let msg = match next {
                Some(Ok(msg)) => msg,
                Some(Err(e)) => return Err(self.read_error(e)),
                None => {
                    self.broken = true;
                    return Err(EventSocketError::ConnectionClosed);
                }
            };

            match codec::decode(msg, &self.limits)? {
                Decoded::Envelope(inbound) => return Ok(inbound),
                Decoded::Control => continue,
                Decoded::Close => {
                    self.broken = true;
                    return Err(EventSocketError::ConnectionClosed);
                }
            }
        }
    }
}
