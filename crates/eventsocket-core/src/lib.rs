//! eventsocket core: wire envelope model, codec, and the shared error type.
//!
//! This crate defines the message contract spoken over the event socket and
//! the error surface shared by the client and host applications. It carries
//! no transport or runtime dependencies so it can be reused by servers, test
//! harnesses, and alternative transports.
//!
//! # Defensive guarantees
//! Panics, `unwrap`, and `expect` are compile-denied here
//! (`#![deny(clippy::panic, clippy::unwrap_used, clippy::expect_used)]`).
//! Malformed frames surface as `EventSocketError` so a single bad message can
//! never take down the reader.

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

pub mod error;
pub mod protocol;

/// Shared result type.
pub use error::{ErrorCode, EventSocketError, Result};
pub use protocol::{Envelope, MessageType, Payload};
