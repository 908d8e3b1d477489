//! Call states and terminal reasons.

use std::fmt;

/// Why a call ended normally.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndReason {
    /// Either side hung up
    Hangup,
    /// The callee declined the incoming call
    Declined,
    /// No answer within the ringing timeout
    Timeout,
    /// The remote side gave up because of a local failure
    PeerFailed,
}

impl EndReason {
    /// Value carried in the `reason` field of `call-end` frames.
    pub fn as_wire(&self) -> &'static str {
        match self {
            EndReason::Hangup => "ended",
            EndReason::Declined => "declined",
            EndReason::Timeout => "timeout",
            EndReason::PeerFailed => "failed",
        }
    }

    /// Interpret the `reason` of a received `call-ended` frame.
    ///
    /// A missing or unknown reason is treated as a hang-up.
    pub fn from_wire(reason: Option<&str>) -> Self {
        match reason {
            Some("declined") => EndReason::Declined,
            Some("timeout") => EndReason::Timeout,
            Some("failed") => EndReason::PeerFailed,
            _ => EndReason::Hangup,
        }
    }
}

impl fmt::Display for EndReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_wire())
    }
}

/// Why a call failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureReason {
    /// Camera or microphone denied or unavailable
    MediaUnavailable,
    /// The peer transport reported failed, disconnected or closed
    Connectivity,
    /// A frame could not be handed to the signaling channel
    Signaling,
    /// The peer connection rejected an offer, answer or description
    PeerConnection,
}

impl FailureReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureReason::MediaUnavailable => "media-unavailable",
            FailureReason::Connectivity => "connectivity",
            FailureReason::Signaling => "signaling",
            FailureReason::PeerConnection => "peer-connection",
        }
    }
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Call lifecycle on one side of a call.
///
/// ```text
/// Idle -> Originating -> Ringing -> Connecting -> Connected -> Ended
///                                                           \-> Failed
/// ```
///
/// The callee enters `Ringing` on an incoming call and goes to `Connecting`
/// once it accepts. `Ended` and `Failed` are terminal for the session; a new
/// call may start from them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CallState {
    #[default]
    Idle,
    /// Acquiring local media and building the offer
    Originating,
    /// Offer sent and awaiting answer, or incoming call awaiting the user
    Ringing,
    /// Descriptions exchanged, waiting for connectivity
    Connecting,
    Connected,
    Ended(EndReason),
    Failed(FailureReason),
}

impl CallState {
    /// Terminal states close a session.
    pub fn is_terminal(&self) -> bool {
        matches!(self, CallState::Ended(_) | CallState::Failed(_))
    }

    /// A session exists and has not reached a terminal state.
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            CallState::Originating | CallState::Ringing | CallState::Connecting | CallState::Connected
        )
    }

    pub fn name(&self) -> &'static str {
        match self {
            CallState::Idle => "idle",
            CallState::Originating => "originating",
            CallState::Ringing => "ringing",
            CallState::Connecting => "connecting",
            CallState::Connected => "connected",
            CallState::Ended(_) => "ended",
            CallState::Failed(_) => "failed",
        }
    }
}

impl fmt::Display for CallState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CallState::Ended(reason) => write!(f, "ended ({})", reason),
            CallState::Failed(reason) => write!(f, "failed ({})", reason),
            other => write!(f, "{}", other.name()),
        }
    }
}

/// Which side of the call this coordinator is on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallDirection {
    Outgoing,
    Incoming,
}

/// A state change, as published to subscribers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallTransition {
    pub from: CallState,
    pub to: CallState,
}
