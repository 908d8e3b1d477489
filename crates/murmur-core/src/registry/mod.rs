//! Connection Registry for real-time frame routing.
//!
//! This module provides a thread-safe registry that binds each identity to
//! its single live connection, enabling frames to be pushed to any connected
//! user by identity.
//!
//! ## Architecture
//!
//! Each connection registers the sending half of its bounded outbound queue
//! when it authenticates. A dedicated writer task per connection drains the
//! queue, so frames for one connection are written one at a time and never
//! interleave.
//!
//! ```text
//! handler (alice) <-> ConnectionRegistry <-> handler (bob)
//!        |                   |                     |
//!        v                   v                     v
//!  mpsc::Sender      DashMap<Identity,        mpsc::Sender
//!                     ConnectionEntry>
//! ```

mod connection_registry;

pub use connection_registry::{
    ConnectionEntry, ConnectionId, ConnectionRegistry, Delivery, UnreachableReason,
    DEFAULT_OUTBOUND_CAPACITY,
};
