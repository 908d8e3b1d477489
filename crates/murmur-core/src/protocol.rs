//! Wire protocol.
//!
//! Every frame is a JSON object `{"type": ..., ...fields}` with camelCase
//! field names. Client and server frames are closed unions so that handling
//! a new frame kind is checked by the compiler rather than by string
//! comparison.

use serde::{Deserialize, Serialize};

use crate::error::ProtocolError;
use crate::messages::Message;
use crate::types::{GroupId, Identity, Target};

/// Whether a session description is an offer or an answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SdpType {
    Offer,
    Answer,
}

/// Opaque SDP blob negotiated between the two peers.
///
/// The server never inspects it; it is relayed as-is.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescription {
    #[serde(rename = "type")]
    pub sdp_type: SdpType,
    pub sdp: String,
}

impl SessionDescription {
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self {
            sdp_type: SdpType::Offer,
            sdp: sdp.into(),
        }
    }

    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            sdp_type: SdpType::Answer,
            sdp: sdp.into(),
        }
    }
}

/// Opaque connectivity-path descriptor exchanged during negotiation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IceCandidate {
    pub candidate: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sdp_mid: Option<String>,
    #[serde(
        default,
        rename = "sdpMLineIndex",
        skip_serializing_if = "Option::is_none"
    )]
    pub sdp_m_line_index: Option<u16>,
}

impl IceCandidate {
    pub fn new(candidate: impl Into<String>) -> Self {
        Self {
            candidate: candidate.into(),
            sdp_mid: None,
            sdp_m_line_index: None,
        }
    }
}

/// Frames sent by a client to the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ClientFrame {
    /// Binds the connection to an identity. Must be the first frame.
    #[serde(rename = "auth", rename_all = "camelCase")]
    Auth { user_id: Identity },

    /// Submit a chat message to a user or a group.
    #[serde(rename = "send-message", rename_all = "camelCase")]
    SendMessage {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        to_user_id: Option<Identity>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        group_id: Option<GroupId>,
        content: String,
    },

    #[serde(rename = "typing", rename_all = "camelCase")]
    Typing { to_user_id: Identity, is_typing: bool },

    #[serde(rename = "group-typing", rename_all = "camelCase")]
    GroupTyping { group_id: GroupId, is_typing: bool },

    #[serde(rename = "call-offer", rename_all = "camelCase")]
    CallOffer {
        to_user_id: Identity,
        from_user_id: Identity,
        caller_name: String,
        is_video: bool,
        offer: SessionDescription,
    },

    #[serde(rename = "call-answer", rename_all = "camelCase")]
    CallAnswer {
        to_user_id: Identity,
        answer: SessionDescription,
    },

    #[serde(rename = "ice-candidate", rename_all = "camelCase")]
    IceCandidate {
        to_user_id: Identity,
        candidate: IceCandidate,
    },

    #[serde(rename = "call-end", rename_all = "camelCase")]
    CallEnd {
        to_user_id: Identity,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },

    /// Read receipt for a previously delivered message.
    #[serde(rename = "mark-read", rename_all = "camelCase")]
    MarkRead { message_id: String },
}

impl ClientFrame {
    /// Parse a client frame from its JSON text.
    pub fn decode(text: &str) -> Result<Self, ProtocolError> {
        serde_json::from_str(text).map_err(ProtocolError::from)
    }

    pub fn encode(&self) -> Result<String, ProtocolError> {
        serde_json::to_string(self).map_err(ProtocolError::from)
    }

    /// Frame type name, for logs and metrics.
    pub fn name(&self) -> &'static str {
        match self {
            ClientFrame::Auth { .. } => "auth",
            ClientFrame::SendMessage { .. } => "send-message",
            ClientFrame::Typing { .. } => "typing",
            ClientFrame::GroupTyping { .. } => "group-typing",
            ClientFrame::CallOffer { .. } => "call-offer",
            ClientFrame::CallAnswer { .. } => "call-answer",
            ClientFrame::IceCandidate { .. } => "ice-candidate",
            ClientFrame::CallEnd { .. } => "call-end",
            ClientFrame::MarkRead { .. } => "mark-read",
        }
    }

    /// Resolve the target of a `send-message` frame.
    ///
    /// Exactly one of `toUserId` or `groupId` must be present.
    pub fn message_target(
        to_user_id: Option<Identity>,
        group_id: Option<GroupId>,
    ) -> Result<Target, ProtocolError> {
        match (to_user_id, group_id) {
            (Some(user), None) => Ok(Target::Direct(user)),
            (None, Some(group)) => Ok(Target::Group(group)),
            (Some(_), Some(_)) => Err(ProtocolError::InvalidFrame(
                "send-message must not carry both toUserId and groupId".to_string(),
            )),
            (None, None) => Err(ProtocolError::InvalidFrame(
                "send-message requires toUserId or groupId".to_string(),
            )),
        }
    }
}

/// Frames pushed by the server to a client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ServerFrame {
    #[serde(rename = "new_message", rename_all = "camelCase")]
    NewMessage {
        message: Message,
        sender_id: Identity,
        sender_username: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        group_id: Option<GroupId>,
        content: String,
    },

    #[serde(rename = "typing", rename_all = "camelCase")]
    Typing { from_user_id: Identity, is_typing: bool },

    #[serde(rename = "group-typing", rename_all = "camelCase")]
    GroupTyping {
        group_id: GroupId,
        from_user_id: Identity,
        is_typing: bool,
    },

    #[serde(rename = "incoming-call", rename_all = "camelCase")]
    IncomingCall {
        from_user_id: Identity,
        is_video: bool,
        offer: SessionDescription,
        caller_name: String,
    },

    #[serde(rename = "call-answer", rename_all = "camelCase")]
    CallAnswer {
        from_user_id: Identity,
        answer: SessionDescription,
    },

    #[serde(rename = "ice-candidate", rename_all = "camelCase")]
    IceCandidate {
        from_user_id: Identity,
        candidate: IceCandidate,
    },

    /// The remote side tore the call down.
    #[serde(rename = "call-ended", rename_all = "camelCase")]
    CallEnded {
        from_user_id: Identity,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },

    #[serde(rename = "message-read", rename_all = "camelCase")]
    MessageRead { message_id: String, reader_id: Identity },

    #[serde(rename = "user-blocked", rename_all = "camelCase")]
    UserBlocked { blocked_by: Identity },

    #[serde(rename = "user-unblocked", rename_all = "camelCase")]
    UserUnblocked { unblocked_by: Identity },

    /// Reported back to the acting user only.
    #[serde(rename = "error")]
    Error { code: String, message: String },
}

impl ServerFrame {
    pub fn decode(text: &str) -> Result<Self, ProtocolError> {
        serde_json::from_str(text).map_err(ProtocolError::from)
    }

    /// Serialize the frame to its JSON text.
    pub fn encode(&self) -> Result<String, ProtocolError> {
        serde_json::to_string(self).map_err(ProtocolError::from)
    }

    pub fn error(code: impl Into<String>, message: impl Into<String>) -> Self {
        ServerFrame::Error {
            code: code.into(),
            message: message.into(),
        }
    }

    /// Frame type name, for logs and metrics.
    pub fn name(&self) -> &'static str {
        match self {
            ServerFrame::NewMessage { .. } => "new_message",
            ServerFrame::Typing { .. } => "typing",
            ServerFrame::GroupTyping { .. } => "group-typing",
            ServerFrame::IncomingCall { .. } => "incoming-call",
            ServerFrame::CallAnswer { .. } => "call-answer",
            ServerFrame::IceCandidate { .. } => "ice-candidate",
            ServerFrame::CallEnded { .. } => "call-ended",
            ServerFrame::MessageRead { .. } => "message-read",
            ServerFrame::UserBlocked { .. } => "user-blocked",
            ServerFrame::UserUnblocked { .. } => "user-unblocked",
            ServerFrame::Error { .. } => "error",
        }
    }
}
