//! Seams between the coordinator and the local media/WebRTC stack.
//!
//! The coordinator never touches devices or transports directly. A host
//! provides implementations of these traits backed by its real media stack;
//! tests provide recording mocks.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::CallError;
use crate::protocol::{ClientFrame, IceCandidate, SessionDescription};
use crate::types::CallKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackKind {
    Audio,
    Video,
}

/// A local or remote media track.
pub trait MediaTrack: Send + Sync + fmt::Debug {
    fn id(&self) -> &str;

    fn kind(&self) -> TrackKind;

    /// Stop the track and release the underlying device or stream.
    fn stop(&self);
}

/// Tracks captured from local devices for one call.
///
/// Dropping the value stops every track.
#[derive(Debug)]
pub struct LocalMedia {
    tracks: Vec<Arc<dyn MediaTrack>>,
}

impl LocalMedia {
    pub fn new(tracks: Vec<Arc<dyn MediaTrack>>) -> Self {
        Self { tracks }
    }

    pub fn tracks(&self) -> &[Arc<dyn MediaTrack>] {
        &self.tracks
    }
}

impl Drop for LocalMedia {
    fn drop(&mut self) {
        for track in self.tracks.drain(..) {
            track.stop();
        }
    }
}

/// Access to camera and microphone.
#[async_trait]
pub trait MediaDevices: Send + Sync {
    /// Capture audio (and video for video calls).
    ///
    /// Fails with `CallError::MediaAcquisition` when access is denied or no
    /// device is available.
    async fn acquire(&self, kind: CallKind) -> Result<LocalMedia, CallError>;
}

/// Connectivity of the underlying peer transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectivityState {
    New,
    Checking,
    Connected,
    Disconnected,
    Failed,
    Closed,
}

impl ConnectivityState {
    /// States that end the call.
    pub fn is_lost(&self) -> bool {
        matches!(
            self,
            ConnectivityState::Disconnected | ConnectivityState::Failed | ConnectivityState::Closed
        )
    }
}

/// Asynchronous notifications from a peer connection.
#[derive(Debug, Clone)]
pub enum PeerEvent {
    /// A local ICE candidate to relay to the remote side
    LocalCandidate(IceCandidate),
    /// The transport's connectivity changed
    Connectivity(ConnectivityState),
    /// The remote side added a media track
    RemoteTrack(Arc<dyn MediaTrack>),
}

pub type PeerEventSender = mpsc::UnboundedSender<PeerEvent>;

/// One peer-to-peer media session.
#[async_trait]
pub trait PeerConnection: Send + Sync {
    fn add_track(&self, track: Arc<dyn MediaTrack>) -> Result<(), CallError>;

    async fn create_offer(&self) -> Result<SessionDescription, CallError>;

    async fn create_answer(&self) -> Result<SessionDescription, CallError>;

    async fn set_local_description(&self, description: SessionDescription) -> Result<(), CallError>;

    async fn set_remote_description(&self, description: SessionDescription) -> Result<(), CallError>;

    /// Apply a remote candidate. Only valid once the remote description is set.
    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<(), CallError>;

    /// Close the transport. Must be safe to call more than once.
    fn close(&self);
}

/// Creates peer connections that report their events on `events`.
pub trait PeerConnectionFactory: Send + Sync {
    fn create(&self, events: PeerEventSender) -> Result<Arc<dyn PeerConnection>, CallError>;
}

/// Outbound path from the coordinator to the server.
///
/// `send` is called while the coordinator holds its state lock so that an
/// offer or answer always leaves before the candidates that follow it.
/// Implementations must not call back into the same coordinator.
#[async_trait]
pub trait SignalingChannel: Send + Sync {
    async fn send(&self, frame: ClientFrame) -> Result<(), CallError>;
}
