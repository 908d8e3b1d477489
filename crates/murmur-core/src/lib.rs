//! # murmur-core
//!
//! Real-time transport core for Murmur chat.
//!
//! This crate holds everything between a live client connection and the
//! storage layer, designed to be embedded in `murmur-server` and, for the
//! call coordinator, in clients.
//!
//! ## Architecture
//!
//! - **Connection Registry**: identity to live connection map with
//!   non-blocking, per-connection serialized sends
//! - **Fan-out Router**: authorizes, persists and pushes chat messages to
//!   direct recipients and group members
//! - **Hub**: dispatches each client frame to the router, typing tracker or
//!   signaling relay
//! - **Call Signaling Coordinator**: per-side call state machine driving
//!   offer/answer/ICE exchange with a ringing timeout and single teardown
//! - **Presence Glue**: ties bind/unbind to online/offline updates
//!
//! Storage and authorization are consumed through the [`store::ChatStore`]
//! trait.

pub mod call;
pub mod hub;
pub mod messages;
pub mod metrics;
pub mod presence;
pub mod protocol;
pub mod registry;
pub mod store;
pub mod timer;
pub mod typing;

mod error;
mod types;

pub use error::{CallError, ChatError, HubError, ProtocolError, StoreError};
pub use hub::Hub;
pub use presence::PresenceGlue;
pub use protocol::{ClientFrame, ServerFrame};
pub use registry::{ConnectionId, ConnectionRegistry, Delivery};
pub use types::*;
