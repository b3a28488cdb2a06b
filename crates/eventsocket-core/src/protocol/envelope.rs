//! Event socket envelope (JSON).
//!
//! One envelope is one WebSocket message. Field names follow the server's
//! PascalCase wire format; the type tag travels as an integer.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

use crate::error::{EventSocketError, Result};

/// Open-ended attribute bag carried by every envelope (insertion ordered).
pub type Payload = Map<String, Value>;

/// Payload key listing the topics of a Subscribe/Unsubscribe envelope.
pub const EVENTS_KEY: &str = "Events";

/// Envelope type tag (`MessageType` on the wire, 1..=6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum MessageType {
    Broadcast = 1,
    Standard = 2,
    Request = 3,
    Reply = 4,
    Subscribe = 5,
    Unsubscribe = 6,
}

impl MessageType {
    pub fn as_str(self) -> &'static str {
        match self {
            MessageType::Broadcast => "broadcast",
            MessageType::Standard => "standard",
            MessageType::Request => "request",
            MessageType::Reply => "reply",
            MessageType::Subscribe => "subscribe",
            MessageType::Unsubscribe => "unsubscribe",
        }
    }

    /// Types that must carry a `RequestId`.
    pub fn is_correlated(self) -> bool {
        matches!(self, MessageType::Request | MessageType::Reply)
    }

    /// Types that must carry an `Event`.
    pub fn is_topical(self) -> bool {
        matches!(
            self,
            MessageType::Standard | MessageType::Subscribe | MessageType::Unsubscribe
        )
    }
}

impl TryFrom<u8> for MessageType {
    type Error = EventSocketError;

    fn try_from(v: u8) -> Result<Self> {
        match v {
            1 => Ok(MessageType::Broadcast),
            2 => Ok(MessageType::Standard),
            3 => Ok(MessageType::Request),
            4 => Ok(MessageType::Reply),
            5 => Ok(MessageType::Subscribe),
            6 => Ok(MessageType::Unsubscribe),
            other => Err(EventSocketError::Decode(format!(
                "unknown message type: {other}"
            ))),
        }
    }
}

impl From<MessageType> for u8 {
    fn from(t: MessageType) -> u8 {
        t as u8
    }
}

/// One message unit on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Envelope {
    pub message_type: MessageType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    /// Peer the reply is addressed to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_client_id: Option<String>,
    /// Peer the request is addressed to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_client_id: Option<String>,
    #[serde(default, deserialize_with = "nullable_payload")]
    pub payload: Payload,
}

fn nullable_payload<'de, D>(d: D) -> std::result::Result<Payload, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<Payload>::deserialize(d)?.unwrap_or_default())
}

fn present(field: &Option<String>) -> bool {
    field.as_deref().is_some_and(|s| !s.is_empty())
}

impl Envelope {
    fn bare(message_type: MessageType, payload: Payload) -> Self {
        Self {
            message_type,
            event: None,
            request_id: None,
            reply_client_id: None,
            request_client_id: None,
            payload,
        }
    }

    /// Fire-and-forget message to every connected peer.
    pub fn broadcast(payload: Payload) -> Self {
        Self::bare(MessageType::Broadcast, payload)
    }

    /// Topic-addressed event.
    pub fn standard(event: impl Into<String>, payload: Payload) -> Self {
        Self {
            event: Some(event.into()),
            ..Self::bare(MessageType::Standard, payload)
        }
    }

    /// Request addressed to `target_client_id`, correlated by `request_id`.
    pub fn request(
        request_id: impl Into<String>,
        target_client_id: impl Into<String>,
        payload: Payload,
    ) -> Self {
        Self {
            request_id: Some(request_id.into()),
            request_client_id: Some(target_client_id.into()),
            ..Self::bare(MessageType::Request, payload)
        }
    }

    /// Reply to `request_id`, addressed to `target_client_id`.
    pub fn reply(
        request_id: impl Into<String>,
        target_client_id: impl Into<String>,
        payload: Payload,
    ) -> Self {
        Self {
            request_id: Some(request_id.into()),
            reply_client_id: Some(target_client_id.into()),
            ..Self::bare(MessageType::Reply, payload)
        }
    }

    /// Subscribe to `topics`. The first topic goes in `Event`, the full list
    /// under the `Events` payload key.
    pub fn subscribe<S: AsRef<str>>(topics: &[S]) -> Result<Self> {
        Self::topic_list(MessageType::Subscribe, topics)
    }

    /// Unsubscribe from `topics` (same layout as [`Envelope::subscribe`]).
    pub fn unsubscribe<S: AsRef<str>>(topics: &[S]) -> Result<Self> {
        Self::topic_list(MessageType::Unsubscribe, topics)
    }

    fn topic_list<S: AsRef<str>>(message_type: MessageType, topics: &[S]) -> Result<Self> {
        let first = topics
            .first()
            .map(|t| t.as_ref().to_string())
            .ok_or_else(|| {
                EventSocketError::InvalidEnvelope(format!(
                    "{} requires at least one topic",
                    message_type.as_str()
                ))
            })?;

        let mut payload = Payload::new();
        payload.insert(
            EVENTS_KEY.to_string(),
            Value::Array(
                topics
                    .iter()
                    .map(|t| Value::String(t.as_ref().to_string()))
                    .collect(),
            ),
        );

        let env = Self {
            event: Some(first),
            ..Self::bare(message_type, payload)
        };
        env.validate()?;
        Ok(env)
    }

    /// Topics named by a Subscribe/Unsubscribe envelope.
    pub fn topics(&self) -> Vec<String> {
        let listed: Vec<String> = self
            .payload
            .get(EVENTS_KEY)
            .and_then(Value::as_array)
            .map(|arr| {
                arr.iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();

        if listed.is_empty() {
            self.event.iter().cloned().collect()
        } else {
            listed
        }
    }

    /// Check the per-type field invariants.
    ///
    /// - `RequestId` is present iff the type is Request or Reply.
    /// - `Event` is present iff the type is Standard, Subscribe or Unsubscribe.
    /// - Subscribe/Unsubscribe topics must be non-empty strings.
    pub fn validate(&self) -> Result<()> {
        let t = self.message_type;

        if t.is_correlated() != present(&self.request_id) {
            return Err(EventSocketError::InvalidEnvelope(if t.is_correlated() {
                format!("{} requires RequestId", t.as_str())
            } else {
                format!("{} must not carry RequestId", t.as_str())
            }));
        }

        if t.is_topical() != present(&self.event) {
            return Err(EventSocketError::InvalidEnvelope(if t.is_topical() {
                format!("{} requires Event", t.as_str())
            } else {
                format!("{} must not carry Event", t.as_str())
            }));
        }

        if matches!(t, MessageType::Subscribe | MessageType::Unsubscribe)
            && self.topics().iter().any(String::is_empty)
        {
            return Err(EventSocketError::InvalidEnvelope(format!(
                "{} topics must not be empty",
                t.as_str()
            )));
        }

        Ok(())
    }
}

/// Decode one frame into a validated envelope.
pub fn decode_envelope(bytes: &[u8]) -> Result<Envelope> {
    let env: Envelope = serde_json::from_slice(bytes)
        .map_err(|e| EventSocketError::Decode(format!("invalid envelope json: {e}")))?;
    env.validate()?;
    Ok(env)
}

/// Validate and encode an envelope as a JSON text frame.
pub fn encode_envelope(env: &Envelope) -> Result<String> {
    env.validate()?;
    serde_json::to_string(env)
        .map_err(|e| EventSocketError::Internal(format!("envelope encode failed: {e}")))
}
