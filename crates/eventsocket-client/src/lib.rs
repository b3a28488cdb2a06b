//! eventsocket client library entry.
//!
//! This crate wires the transport, correlation table, dispatch loop, and the
//! client facade into one multiplexed connection carrying broadcasts, topic
//! events, request/reply exchanges, and errors.

pub mod client;
pub mod config;
pub mod dispatch;
pub mod transport;

pub use client::{Client, Inbox, PendingReply, Subscription};
pub use config::ClientConfig;
pub use dispatch::{Delivery, LinkState, Received};
