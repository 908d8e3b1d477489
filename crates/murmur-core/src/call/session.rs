//! Resources owned by one call.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::media::{LocalMedia, MediaTrack, PeerConnection};
use super::state::CallDirection;
use crate::protocol::{IceCandidate, SessionDescription};
use crate::timer::ScheduledTask;
use crate::types::{CallKind, Identity};

/// Public view of the call in progress.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallInfo {
    pub peer: Identity,
    /// Caller's display name, for incoming calls
    pub peer_name: Option<String>,
    pub kind: CallKind,
    pub direction: CallDirection,
}

/// Everything a live call holds.
///
/// Exactly one `ActiveCall` exists per coordinator while a call is active.
/// Dropping it is the teardown: timers are cancelled, the event pump stops,
/// every local and remote track is stopped and the peer connection closed.
/// The coordinator only ever drops it after taking it out of its state under
/// the lock, so teardown runs once per call.
pub(crate) struct ActiveCall {
    pub(crate) id: Uuid,
    pub(crate) peer: Identity,
    pub(crate) peer_name: Option<String>,
    pub(crate) kind: CallKind,
    pub(crate) direction: CallDirection,
    /// Offer received with an incoming call, consumed on accept
    pub(crate) remote_offer: Option<SessionDescription>,
    /// Set once `accept` started acquiring media
    pub(crate) accepting: bool,
    pub(crate) local_media: Option<LocalMedia>,
    pub(crate) remote_tracks: Vec<Arc<dyn MediaTrack>>,
    pub(crate) peer_connection: Option<Arc<dyn PeerConnection>>,
    pub(crate) remote_description_applied: bool,
    /// Remote candidates received before the remote description was applied
    pub(crate) pending_candidates: Vec<IceCandidate>,
    pub(crate) ringing: Option<ScheduledTask>,
    pub(crate) events: Option<CancellationToken>,
}

impl ActiveCall {
    pub(crate) fn new(peer: Identity, kind: CallKind, direction: CallDirection) -> Self {
        Self {
            id: Uuid::new_v4(),
            peer,
            peer_name: None,
            kind,
            direction,
            remote_offer: None,
            accepting: false,
            local_media: None,
            remote_tracks: Vec::new(),
            peer_connection: None,
            remote_description_applied: false,
            pending_candidates: Vec::new(),
            ringing: None,
            events: None,
        }
    }

    pub(crate) fn info(&self) -> CallInfo {
        CallInfo {
            peer: self.peer.clone(),
            peer_name: self.peer_name.clone(),
            kind: self.kind,
            direction: self.direction,
        }
    }
}

impl Drop for ActiveCall {
    fn drop(&mut self) {
        if let Some(ringing) = self.ringing.take() {
            ringing.cancel();
        }
        if let Some(events) = self.events.take() {
            events.cancel();
        }
        // LocalMedia stops its own tracks on drop.
        self.local_media.take();
        for track in self.remote_tracks.drain(..) {
            track.stop();
        }
        if let Some(pc) = self.peer_connection.take() {
            pc.close();
        }
    }
}
