//! Chat messages and their fan-out.
//!
//! This module provides:
//! - Message domain types (`Message`, `DeliveryFlags`, `NewMessage`)
//! - `MessageRouter`, which authorizes, persists and pushes chat events to
//!   every reachable target through the connection registry
//!
//! # Delivery semantics
//!
//! Persistence always happens once a message is authorized. Live delivery is
//! best effort: a target without a live connection is skipped and sees the
//! message on its next history fetch. There is no retry and no queue.

mod router;
mod types;

pub use router::{DeliveryReport, MessageRouter};
pub use types::{DeliveryFlags, Message, NewMessage, MAX_CONTENT_LENGTH};
