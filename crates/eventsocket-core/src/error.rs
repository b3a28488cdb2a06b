//! Shared error type across eventsocket crates.

use thiserror::Error;

/// Stable error codes (safe to match on from host applications).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    /// Registration call failed or returned an unusable body.
    RegistrationFailed,
    /// Socket dial failed.
    DialFailed,
    /// Transport read failed without closing the connection.
    ReceiveFailed,
    /// Inbound frame is not a decodable envelope.
    DecodeFailed,
    /// Envelope violates the field invariants of its type.
    InvalidEnvelope,
    /// Frame exceeds the configured inbound size limit.
    PayloadTooLarge,
    /// Read deadline elapsed before a frame arrived.
    ReadTimeout,
    /// Connection closed by peer or locally.
    ConnectionClosed,
    /// Outbound write failed.
    SendFailed,
    /// No live connection.
    NotConnected,
    /// Invalid configuration.
    InvalidConfig,
    /// Internal error.
    Internal,
}

impl ErrorCode {
    /// String representation used in logs and host-facing reports.
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorCode::RegistrationFailed => "REGISTRATION_FAILED",
            ErrorCode::DialFailed => "DIAL_FAILED",
            ErrorCode::ReceiveFailed => "RECEIVE_FAILED",
            ErrorCode::DecodeFailed => "DECODE_FAILED",
            ErrorCode::InvalidEnvelope => "INVALID_ENVELOPE",
            ErrorCode::PayloadTooLarge => "PAYLOAD_TOO_LARGE",
            ErrorCode::ReadTimeout => "READ_TIMEOUT",
            ErrorCode::ConnectionClosed => "CONNECTION_CLOSED",
            ErrorCode::SendFailed => "SEND_FAILED",
            ErrorCode::NotConnected => "NOT_CONNECTED",
            ErrorCode::InvalidConfig => "INVALID_CONFIG",
            ErrorCode::Internal => "INTERNAL",
        }
    }
}

/// Shared result type.
pub type Result<T> = std::result::Result<T, EventSocketError>;

/// Unified error type used by core and client.
#[derive(Debug, Error)]
pub enum EventSocketError {
    #[error("registration failed: {0}")]
    Registration(String),
    #[error("dial failed: {0}")]
    Dial(String),
    #[error("receive failed: {0}")]
    Receive(String),
    #[error("decode failed: {0}")]
    Decode(String),
    #[error("invalid envelope: {0}")]
    InvalidEnvelope(String),
    #[error("payload too large: {len} bytes exceeds limit of {limit}")]
    PayloadTooLarge { len: usize, limit: usize },
    #[error("read deadline elapsed")]
    ReadTimeout,
    #[error("connection closed")]
    ConnectionClosed,
    #[error("send failed: {0}")]
    Send(String),
    #[error("not connected")]
    NotConnected,
    #[error("invalid config: {0}")]
    Config(String),
    #[error("internal: {0}")]
    Internal(String),
}

impl EventSocketError {
    /// Map to a stable code.
    pub fn code(&self) -> ErrorCode {
        match self {
            EventSocketError::Registration(_) => ErrorCode::RegistrationFailed,
            EventSocketError::Dial(_) => ErrorCode::DialFailed,
            EventSocketError::Receive(_) => ErrorCode::ReceiveFailed,
            EventSocketError::Decode(_) => ErrorCode::DecodeFailed,
            EventSocketError::InvalidEnvelope(_) => ErrorCode::InvalidEnvelope,
            EventSocketError::PayloadTooLarge { .. } => ErrorCode::PayloadTooLarge,
            EventSocketError::ReadTimeout => ErrorCode::ReadTimeout,
            EventSocketError::ConnectionClosed => ErrorCode::ConnectionClosed,
            EventSocketError::Send(_) => ErrorCode::SendFailed,
            EventSocketError::NotConnected => ErrorCode::NotConnected,
            EventSocketError::Config(_) => ErrorCode::InvalidConfig,
            EventSocketError::Internal(_) => ErrorCode::Internal,
        }
    }

    /// Whether this error ends the read side of a connection.
    ///
    /// Everything else observed by the reader is local to one frame.
    pub fn is_fatal(&self) -> bool {
        matches!(self, EventSocketError::ConnectionClosed)
    }
}
