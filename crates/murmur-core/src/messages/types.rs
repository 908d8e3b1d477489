//! Message domain types.
//!
//! - `Message`: a persisted chat message
//! - `DeliveryFlags`: sent/delivered/read receipts
//! - `NewMessage`: submission accepted by the fan-out router

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ChatError;
use crate::types::{Identity, Target};

/// Maximum content length for messages (4000 characters)
pub const MAX_CONTENT_LENGTH: usize = 4000;

/// Delivery receipts for a message.
///
/// Flags only ever move from false to true.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DeliveryFlags {
    /// Accepted and persisted by the server
    pub sent: bool,
    /// Pushed live to at least one recipient connection
    pub delivered: bool,
    /// Acknowledged by a recipient
    pub read: bool,
}

/// A persisted chat message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    /// Unique message identifier (UUID v7, time-sortable)
    pub id: String,
    pub sender_id: Identity,
    /// Recipient or group the message was addressed to
    pub target: Target,
    pub content: String,
    pub created_at: DateTime<Utc>,
    pub flags: DeliveryFlags,
}

/// A message submitted for fan-out, before persistence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewMessage {
    pub sender_id: Identity,
    pub target: Target,
    pub content: String,
}

impl NewMessage {
    pub fn new(sender_id: Identity, target: Target, content: impl Into<String>) -> Self {
        Self {
            sender_id,
            target,
            content: content.into(),
        }
    }

    /// Validate content before any side effect happens.
    pub fn validate(&self) -> Result<(), ChatError> {
        if self.content.trim().is_empty() {
            return Err(ChatError::InvalidContent("content is empty".to_string()));
        }
        let len = self.content.chars().count();
        if len > MAX_CONTENT_LENGTH {
            return Err(ChatError::InvalidContent(format!(
                "content too long: max {} characters, got {}",
                MAX_CONTENT_LENGTH, len
            )));
        }
        Ok(())
    }
}
