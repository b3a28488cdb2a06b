use std::time::Duration;

use serde::Deserialize;
use eventsocket_core::error::{EventSocketError, Result};

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ClientConfig {
    pub version: u32,

    /// `host:port` of the event socket server, without scheme.
    pub server: String,

    #[serde(default)]
    pub transport: TransportSection,

    #[serde(default)]
    pub delivery: DeliverySection,
}

impl ClientConfig {
    /// Config with defaults for everything but the server address.
    pub fn new(server: impl Into<String>) -> Self {
        Self {
            version: 1,
            server: server.into(),
            transport: TransportSection::default(),
            delivery: DeliverySection::default(),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.version != 1 {
            return Err(EventSocketError::Config(format!(
                "unsupported config version: {}",
                self.version
            )));
        }
        if self.server.trim().is_empty() {
            return Err(EventSocketError::Config("server must not be empty".into()));
        }
        if self.server.contains("://") || self.server.contains('/') {
            return Err(EventSocketError::Config(
                "server must be host:port without scheme or path".into(),
            ));
        }

        self.transport.validate()?;
        self.delivery.validate()?;

        Ok(())
    }

    /// Registration endpoint (`POST`, empty body).
    pub fn registration_url(&self) -> String {
        format!("http://{}/v1/clients", self.server)
    }

    /// Socket endpoint for a registered client id.
    pub fn socket_url(&self, client_id: &str) -> String {
        format!("ws://{}/v1/clients/{}/ws", self.server, client_id)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TransportSection {
    #[serde(default = "default_handshake_timeout_ms")]
    pub handshake_timeout_ms: u64,

    /// Outbound socket buffer. Reads go through tungstenite's fixed 4 KiB
    /// chunk.
    #[serde(default = "default_buffer_size")]
    pub write_buffer_size: usize,

    /// Inbound frame size limit in bytes (unlimited when absent).
    #[serde(default)]
    pub max_message_size: Option<usize>,

    /// Per-receive read deadline (none when absent).
    #[serde(default)]
    pub read_timeout_ms: Option<u64>,

    /// Per-send write deadline (none when absent).
    #[serde(default)]
    pub write_timeout_ms: Option<u64>,
}

impl Default for TransportSection {
    fn default() -> Self {
        Self {
            handshake_timeout_ms: default_handshake_timeout_ms(),
            write_buffer_size: default_buffer_size(),
            max_message_size: None,
            read_timeout_ms: None,
            write_timeout_ms: None,
        }
    }
}

impl TransportSection {
    pub fn validate(&self) -> Result<()> {
        if !(100..=120000).contains(&self.handshake_timeout_ms) {
            return Err(EventSocketError::Config(
                "transport.handshake_timeout_ms must be between 100 and 120000".into(),
            ));
        }
        if self.write_buffer_size == 0 {
            return Err(EventSocketError::Config(
                "transport.write_buffer_size must be greater than 0".into(),
            ));
        }
        if self.max_message_size == Some(0) {
            return Err(EventSocketError::Config(
                "transport.max_message_size must be greater than 0".into(),
            ));
        }
        if self.read_timeout_ms == Some(0) || self.write_timeout_ms == Some(0) {
            return Err(EventSocketError::Config(
                "transport timeouts must be greater than 0".into(),
            ));
        }
        Ok(())
    }

    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.handshake_timeout_ms)
    }

    pub fn read_timeout(&self) -> Option<Duration> {
        self.read_timeout_ms.map(Duration::from_millis)
    }

    pub fn write_timeout(&self) -> Option<Duration> {
        self.write_timeout_ms.map(Duration::from_millis)
    }
}

fn default_handshake_timeout_ms() -> u64 {
    5000
}
fn default_buffer_size() -> usize {
    4096
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DeliverySection {
    /// Capacity of every delivery channel (broadcast, request, error, topic).
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
}

impl Default for DeliverySection {
    fn default() -> Self {
        Self {
            channel_capacity: default_channel_capacity(),
        }
    }
}

impl DeliverySection {
    pub fn validate(&self) -> Result<()> {
        if !(1..=65536).contains(&self.channel_capacity) {
            return Err(EventSocketError::Config(
                "delivery.channel_capacity must be between 1 and 65536".into(),
            ));
        }
        Ok(())
    }
}

fn default_channel_capacity() -> usize {
    64
}
