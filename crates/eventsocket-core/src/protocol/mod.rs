//! Wire protocol: the JSON envelope and its type tag.
//!
//! Decoding is panic-free: malformed input is reported as `EventSocketError`
//! instead of panicking, so the reader survives hostile or buggy peers.

pub mod envelope;

pub use envelope::{decode_envelope, encode_envelope, Envelope, MessageType, Payload};
