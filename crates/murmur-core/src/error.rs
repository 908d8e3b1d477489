//! Error types for the transport core.

use thiserror::Error;

use crate::types::{Identity, Target};

/// Errors raised while encoding or decoding wire frames.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// JSON did not match any known frame
    #[error("Malformed frame: {0}")]
    Malformed(#[from] serde_json::Error),

    /// Frame parsed but its fields are inconsistent
    #[error("Invalid frame: {0}")]
    InvalidFrame(String),

    /// A frame other than `auth` arrived before the connection was bound
    #[error("Connection is not authenticated")]
    NotAuthenticated,
}

impl ProtocolError {
    /// Short machine-readable code for the `error` frame.
    pub fn code(&self) -> &'static str {
        match self {
            ProtocolError::Malformed(_) => "malformed-frame",
            ProtocolError::InvalidFrame(_) => "invalid-frame",
            ProtocolError::NotAuthenticated => "not-authenticated",
        }
    }
}

/// Errors reported by the storage/authorization collaborator.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Referenced record does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// Backend failure (connection, query, ...)
    #[error("Storage backend error: {0}")]
    Backend(String),
}

impl StoreError {
    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }

    pub fn backend(msg: impl Into<String>) -> Self {
        Self::Backend(msg.into())
    }
}

/// Errors surfaced by the message fan-out router.
#[derive(Debug, Error)]
pub enum ChatError {
    /// Sender is not a friend of the recipient, or not a member of the group
    #[error("{sender} is not authorized to message {target}")]
    Unauthorized { sender: Identity, target: Target },

    /// Message content failed validation
    #[error("Invalid message content: {0}")]
    InvalidContent(String),

    /// Persistence or membership lookup failed
    #[error("Storage error: {0}")]
    Storage(#[from] StoreError),
}

impl ChatError {
    /// Short machine-readable code for the `error` frame.
    pub fn code(&self) -> &'static str {
        match self {
            ChatError::Unauthorized { .. } => "unauthorized",
            ChatError::InvalidContent(_) => "invalid-content",
            ChatError::Storage(_) => "storage-error",
        }
    }
}

/// Anything that makes the hub answer a frame with an `error` frame.
#[derive(Debug, Error)]
pub enum HubError {
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error(transparent)]
    Chat(#[from] ChatError),
}

impl HubError {
    pub fn code(&self) -> &'static str {
        match self {
            HubError::Protocol(e) => e.code(),
            HubError::Chat(e) => e.code(),
        }
    }
}

/// Errors surfaced by the call signaling coordinator.
#[derive(Debug, Error)]
pub enum CallError {
    /// Camera/microphone denied or unavailable
    #[error("Media acquisition failed: {0}")]
    MediaAcquisition(String),

    /// A call is already in progress on this side
    #[error("A call is already active")]
    Busy,

    /// Operation does not apply in the current call state
    #[error("Invalid call state for {operation}: {state}")]
    InvalidState {
        operation: &'static str,
        state: String,
    },

    /// The signaling channel to the server rejected a frame
    #[error("Signaling error: {0}")]
    Signaling(String),

    /// The underlying peer connection failed an operation
    #[error("Peer connection error: {0}")]
    PeerConnection(String),
}

impl CallError {
    pub fn media(msg: impl Into<String>) -> Self {
        Self::MediaAcquisition(msg.into())
    }

    pub fn signaling(msg: impl Into<String>) -> Self {
        Self::Signaling(msg.into())
    }

    pub fn peer(msg: impl Into<String>) -> Self {
        Self::PeerConnection(msg.into())
    }

    pub fn invalid_state(operation: &'static str, state: impl std::fmt::Display) -> Self {
        Self::InvalidState {
            operation,
            state: state.to_string(),
        }
    }
}
