//! One-to-one voice/video call signaling.
//!
//! The server only relays call frames between the two parties; the state
//! machine runs on each client through [`CallCoordinator`].
//!
//! ```text
//!  caller                         server                        callee
//!    | originate: acquire media     |                              |
//!    |-- call-offer --------------->|-- incoming-call ------------>| Ringing
//!    | Ringing (60s timer)          |                              | accept
//!    |<-- call-answer --------------|<-- call-answer --------------| Connecting
//!    | Connecting                   |                              |
//!    |<== ice-candidate ===========>|<============================>|
//!    | Connected                    |                              | Connected
//!    |-- call-end ----------------->|-- call-ended --------------->| Ended
//! ```
//!
//! Remote ICE candidates that arrive before the remote description is set
//! are buffered and applied in arrival order once it is.

mod coordinator;
mod media;
mod session;
mod state;

pub use coordinator::{CallConfig, CallCoordinator, DEFAULT_RINGING_TIMEOUT};
pub use media::{
    ConnectivityState, LocalMedia, MediaDevices, MediaTrack, PeerConnection,
    PeerConnectionFactory, PeerEvent, PeerEventSender, SignalingChannel, TrackKind,
};
pub use session::CallInfo;
pub use state::{CallDirection, CallState, CallTransition, EndReason, FailureReason};
