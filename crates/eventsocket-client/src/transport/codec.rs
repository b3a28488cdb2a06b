//! Decode-once codec between WebSocket messages and envelopes.
//!
//! - Text and Binary frames => validated `Envelope`
//! - Ping/Pong/raw frames are absorbed (the socket answers pings itself)
//! - Close is surfaced so the reader can end the connection

use tokio_tungstenite::tungstenite::Message;

use eventsocket_core::error::Result;
use eventsocket_core::protocol::{decode_envelope, encode_envelope, Envelope};

use super::{Inbound, ReadLimits};

#[derive(Debug)]
pub enum Decoded {
    Envelope(Inbound),
    Control,
    Close,
}

pub fn decode(msg: Message, limits: &ReadLimits) -> Result<Decoded> {
    match msg {
        Message::Text(s) => decode_bytes(s.as_bytes(), limits).map(Decoded::Envelope),
        Message::Binary(b) => decode_bytes(&b, limits).map(Decoded::Envelope),
        Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => Ok(Decoded::Control),
        Message::Close(_) => Ok(Decoded::Close),
    }
}

/// Size check first, then parse.
pub fn decode_bytes(bytes: &[u8], limits: &ReadLimits) -> Result<Inbound> {
    let bytes_len = bytes.len();
    limits.check_len(bytes_len)?;
    let envelope = decode_envelope(bytes)?;
    Ok(Inbound {
        envelope,
        bytes_len,
    })
}

pub fn encode(env: &Envelope) -> Result<Message> {
    Ok(Message::Text(encode_envelope(env)?))
}
