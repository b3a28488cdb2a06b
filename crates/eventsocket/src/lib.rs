//! Top-level facade crate for eventsocket.
//!
//! Re-exports the envelope model and the client so users can depend on a single crate.

pub mod core {
    pub use eventsocket_core::*;
}

pub mod client {
    pub use eventsocket_client::*;
}

pub use eventsocket_client::{Client, ClientConfig, Inbox, PendingReply, Received, Subscription};
pub use eventsocket_core::{Envelope, EventSocketError, MessageType, Payload, Result};
