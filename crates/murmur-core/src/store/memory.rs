//! In-memory `ChatStore`.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

use super::ChatStore;
use crate::error::StoreError;
use crate::messages::{DeliveryFlags, Message, NewMessage};
use crate::types::{GroupId, Identity, Presence, Target};

#[derive(Debug, Default)]
struct State {
    /// Accepted friendships, stored with the smaller identity first
    friendships: HashSet<(Identity, Identity)>,
    groups: HashMap<GroupId, Vec<Identity>>,
    display_names: HashMap<Identity, String>,
    messages: Vec<Message>,
    presence: HashMap<Identity, Presence>,
    presence_log: Vec<(Identity, Presence)>,
}

fn friendship_key(a: &Identity, b: &Identity) -> (Identity, Identity) {
    if a <= b {
        (a.clone(), b.clone())
    } else {
        (b.clone(), a.clone())
    }
}

/// Process-local store keeping everything in memory.
///
/// Nothing survives a restart; intended for development and tests.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: RwLock<State>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an accepted friendship between two users.
    pub async fn add_friendship(&self, a: &Identity, b: &Identity) {
        self.state.write().await.friendships.insert(friendship_key(a, b));
    }

    /// Create or replace a group with the given members.
    pub async fn add_group(&self, group: GroupId, members: Vec<Identity>) {
        self.state.write().await.groups.insert(group, members);
    }

    pub async fn set_display_name(&self, identity: &Identity, name: impl Into<String>) {
        self.state
            .write()
            .await
            .display_names
            .insert(identity.clone(), name.into());
    }

    /// Persisted history visible to `viewer` for a conversation target.
    ///
    /// For a direct target this is the conversation between `viewer` and the
    /// other user, in both directions.
    pub async fn history(&self, viewer: &Identity, target: &Target) -> Vec<Message> {
        let state = self.state.read().await;
        state
            .messages
            .iter()
            .filter(|m| match (target, &m.target) {
                (Target::Group(wanted), Target::Group(group)) => wanted == group,
                (Target::Direct(other), Target::Direct(recipient)) => {
                    (&m.sender_id == viewer && recipient == other)
                        || (&m.sender_id == other && recipient == viewer)
                }
                _ => false,
            })
            .cloned()
            .collect()
    }

    pub async fn message(&self, message_id: &str) -> Option<Message> {
        let state = self.state.read().await;
        state.messages.iter().find(|m| m.id == message_id).cloned()
    }

    /// Last recorded presence for an identity.
    pub async fn presence_of(&self, identity: &Identity) -> Option<Presence> {
        self.state.read().await.presence.get(identity).copied()
    }

    /// Every presence transition recorded, in order.
    pub async fn presence_log(&self) -> Vec<(Identity, Presence)> {
        self.state.read().await.presence_log.clone()
    }
}

#[async_trait]
impl ChatStore for MemoryStore {
    async fn is_authorized_to_message(
        &self,
        sender: &Identity,
        target: &Target,
    ) -> Result<bool, StoreError> {
        let state = self.state.read().await;
        let authorized = match target {
            Target::Direct(recipient) => state
                .friendships
                .contains(&friendship_key(sender, recipient)),
            Target::Group(group) => state
                .groups
                .get(group)
                .map(|members| members.contains(sender))
                .unwrap_or(false),
        };
        Ok(authorized)
    }

    async fn persist_message(&self, message: NewMessage) -> Result<Message, StoreError> {
        let stored = Message {
            id: Uuid::now_v7().to_string(),
            sender_id: message.sender_id,
            target: message.target,
            content: message.content,
            created_at: Utc::now(),
            flags: DeliveryFlags {
                sent: true,
                ..DeliveryFlags::default()
            },
        };
        debug!(message_id = %stored.id, "Persisted message");
        self.state.write().await.messages.push(stored.clone());
        Ok(stored)
    }

    async fn resolve_group_members(&self, group: &GroupId) -> Result<Vec<Identity>, StoreError> {
        self.state
            .read()
            .await
            .groups
            .get(group)
            .cloned()
            .ok_or_else(|| StoreError::not_found(format!("group {}", group)))
    }

    async fn set_presence(&self, identity: &Identity, presence: Presence) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        state.presence.insert(identity.clone(), presence);
        state.presence_log.push((identity.clone(), presence));
        Ok(())
    }

    async fn display_name(&self, identity: &Identity) -> Result<Option<String>, StoreError> {
        Ok(self.state.read().await.display_names.get(identity).cloned())
    }

    async fn mark_delivered(&self, message_id: &str) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        let message = state
            .messages
            .iter_mut()
            .find(|m| m.id == message_id)
            .ok_or_else(|| StoreError::not_found(format!("message {}", message_id)))?;
        message.flags.delivered = true;
        Ok(())
    }

    async fn mark_read(
        &self,
        message_id: &str,
        reader: &Identity,
    ) -> Result<Option<Message>, StoreError> {
        let mut state = self.state.write().await;
        let Some(message) = state.messages.iter_mut().find(|m| m.id == message_id) else {
            return Ok(None);
        };
        if &message.sender_id != reader {
            message.flags.delivered = true;
            message.flags.read = true;
        }
        Ok(Some(message.clone()))
    }
}
