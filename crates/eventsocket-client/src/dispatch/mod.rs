//! Dispatch: correlation table and the single reader loop.
//!
//! Re-exports the table, the dispatcher, and the delivery unit so the client
//! facade and downstream consumers can depend on this module directly.

pub mod correlation;
pub mod dispatcher;

pub use correlation::{CorrelationTable, Displaced};
pub use dispatcher::{Delivery, Dispatcher, LinkState, Received, Routes};
