//! Storage and authorization collaborator boundary.
//!
//! Persistence of users, messages, groups and friendships lives outside the
//! transport core. The core only consumes the operations below; the host
//! application provides an implementation. `MemoryStore` is an in-process
//! implementation for development and tests.

mod memory;

pub use memory::MemoryStore;

use async_trait::async_trait;

use crate::error::StoreError;
use crate::messages::{Message, NewMessage};
use crate::types::{GroupId, Identity, Presence, Target};

/// Operations the transport core needs from the storage layer.
#[async_trait]
pub trait ChatStore: Send + Sync + 'static {
    /// Whether `sender` may message `target` (accepted friendship for a
    /// direct message, membership for a group message).
    async fn is_authorized_to_message(
        &self,
        sender: &Identity,
        target: &Target,
    ) -> Result<bool, StoreError>;

    /// Persist a message and return the stored record (id, timestamp, flags).
    async fn persist_message(&self, message: NewMessage) -> Result<Message, StoreError>;

    /// Full membership of a group.
    async fn resolve_group_members(&self, group: &GroupId) -> Result<Vec<Identity>, StoreError>;

    /// Record a presence transition for an identity.
    async fn set_presence(&self, identity: &Identity, presence: Presence) -> Result<(), StoreError>;

    /// Human readable name used in `new_message` and `incoming-call` frames.
    async fn display_name(&self, identity: &Identity) -> Result<Option<String>, StoreError>;

    /// Mark a message as delivered live to at least one recipient.
    async fn mark_delivered(&self, message_id: &str) -> Result<(), StoreError>;

    /// Mark a message as read by `reader`.
    ///
    /// Returns the updated message, or `None` if it does not exist.
    async fn mark_read(
        &self,
        message_id: &str,
        reader: &Identity,
    ) -> Result<Option<Message>, StoreError>;
}
