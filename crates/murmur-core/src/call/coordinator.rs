//! Call signaling coordinator.

use std::sync::{Arc, Weak};
use std::time::Duration;

use tokio::sync::{broadcast, mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use super::media::{
    ConnectivityState, LocalMedia, MediaDevices, PeerConnection, PeerConnectionFactory, PeerEvent,
    SignalingChannel,
};
use super::session::{ActiveCall, CallInfo};
use super::state::{CallDirection, CallState, CallTransition, EndReason, FailureReason};
use crate::error::CallError;
use crate::metrics;
use crate::protocol::{ClientFrame, IceCandidate, ServerFrame, SessionDescription};
use crate::timer::ScheduledTask;
use crate::types::{CallKind, Identity};

/// Time an outgoing call may ring before it is ended with reason `timeout`.
pub const DEFAULT_RINGING_TIMEOUT: Duration = Duration::from_secs(60);

const TRANSITION_BUFFER: usize = 32;

/// Per-user coordinator settings.
#[derive(Debug, Clone)]
pub struct CallConfig {
    pub local_identity: Identity,
    /// Shown to callees as `callerName`
    pub display_name: String,
    pub ringing_timeout: Duration,
}

impl CallConfig {
    pub fn new(local_identity: Identity, display_name: impl Into<String>) -> Self {
        Self {
            local_identity,
            display_name: display_name.into(),
            ringing_timeout: DEFAULT_RINGING_TIMEOUT,
        }
    }

    pub fn with_ringing_timeout(mut self, timeout: Duration) -> Self {
        self.ringing_timeout = timeout;
        self
    }
}

struct CallInner {
    state: CallState,
    /// Present exactly while `state.is_active()`
    session: Option<ActiveCall>,
}

impl CallInner {
    fn current(&mut self, call_id: Uuid) -> Option<&mut ActiveCall> {
        self.session.as_mut().filter(|session| session.id == call_id)
    }
}

struct Shared {
    config: CallConfig,
    media: Arc<dyn MediaDevices>,
    peers: Arc<dyn PeerConnectionFactory>,
    signaling: Arc<dyn SignalingChannel>,
    inner: Mutex<CallInner>,
    transitions: broadcast::Sender<CallTransition>,
}

type SetupError = (CallError, FailureReason);

fn peer_failure(e: CallError) -> SetupError {
    (e, FailureReason::PeerConnection)
}

/// Drives one user's side of a one-to-one call.
///
/// All state lives behind a single async mutex. User operations, frames from
/// the server, peer connection events and the ringing timer are serialized
/// through it, and every callback re-checks that the call it was scheduled
/// for is still the current one before acting. Media acquisition is the only
/// step performed without the lock held.
///
/// Cloning is cheap; clones drive the same call.
#[derive(Clone)]
pub struct CallCoordinator {
    shared: Arc<Shared>,
}

impl CallCoordinator {
    pub fn new(
        config: CallConfig,
        media: Arc<dyn MediaDevices>,
        peers: Arc<dyn PeerConnectionFactory>,
        signaling: Arc<dyn SignalingChannel>,
    ) -> Self {
        let (transitions, _) = broadcast::channel(TRANSITION_BUFFER);
        Self {
            shared: Arc::new(Shared {
                config,
                media,
                peers,
                signaling,
                inner: Mutex::new(CallInner {
                    state: CallState::Idle,
                    session: None,
                }),
                transitions,
            }),
        }
    }

    pub async fn state(&self) -> CallState {
        self.shared.inner.lock().await.state
    }

    /// The call in progress, if any.
    pub async fn current_call(&self) -> Option<CallInfo> {
        self.shared
            .inner
            .lock()
            .await
            .session
            .as_ref()
            .map(ActiveCall::info)
    }

    /// Stream of state changes, starting from the next transition.
    pub fn subscribe(&self) -> broadcast::Receiver<CallTransition> {
        self.shared.transitions.subscribe()
    }

    /// Start an outgoing call.
    ///
    /// Acquires local media, sends `call-offer` and starts ringing. A media
    /// failure ends in `Failed` without anything sent to the callee.
    #[instrument(name = "call.originate", skip_all, fields(callee = %callee, kind = %kind))]
    pub async fn originate(&self, callee: Identity, kind: CallKind) -> Result<(), CallError> {
        let call_id = {
            let mut inner = self.shared.inner.lock().await;
            if inner.state.is_active() {
                return Err(CallError::Busy);
            }
            let session = ActiveCall::new(callee.clone(), kind, CallDirection::Outgoing);
            let call_id = session.id;
            inner.session = Some(session);
            self.transition(&mut inner, CallState::Originating);
            call_id
        };

        let acquired = self.shared.media.acquire(kind).await;

        let mut inner = self.shared.inner.lock().await;
        if inner.current(call_id).is_none() {
            // Hung up while devices were being acquired. Dropping `acquired`
            // releases them.
            debug!("Call ended during media acquisition");
            return Err(CallError::invalid_state("originate", inner.state));
        }

        let media = match acquired {
            Ok(media) => media,
            Err(e) => {
                warn!(error = %e, "Could not acquire local media");
                self.teardown(&mut inner, CallState::Failed(FailureReason::MediaUnavailable));
                return Err(e);
            }
        };

        if let Err((e, reason)) = self.send_offer(&mut inner, call_id, &callee, kind, media).await {
            warn!(error = %e, "Failed to send call offer");
            self.teardown(&mut inner, CallState::Failed(reason));
            return Err(e);
        }

        self.transition(&mut inner, CallState::Ringing);
        self.arm_ringing_timeout(&mut inner, call_id);
        Ok(())
    }

    /// Accept the ringing incoming call.
    #[instrument(name = "call.accept", skip(self))]
    pub async fn accept(&self) -> Result<(), CallError> {
        let (call_id, kind) = {
            let mut inner = self.shared.inner.lock().await;
            let state = inner.state;
            match inner.session.as_mut() {
                Some(session)
                    if state == CallState::Ringing
                        && session.direction == CallDirection::Incoming
                        && !session.accepting =>
                {
                    session.accepting = true;
                    (session.id, session.kind)
                }
                _ => return Err(CallError::invalid_state("accept", state)),
            }
        };

        let acquired = self.shared.media.acquire(kind).await;

        let mut inner = self.shared.inner.lock().await;
        if inner.current(call_id).is_none() {
            debug!("Call ended during media acquisition");
            return Err(CallError::invalid_state("accept", inner.state));
        }

        let media = match acquired {
            Ok(media) => media,
            Err(e) => {
                warn!(error = %e, "Could not acquire local media");
                self.end_and_notify(
                    &mut inner,
                    CallState::Failed(FailureReason::MediaUnavailable),
                    EndReason::PeerFailed,
                )
                .await;
                return Err(e);
            }
        };

        if let Err((e, reason)) = self.send_answer(&mut inner, call_id, media).await {
            warn!(error = %e, "Failed to answer call");
            self.end_and_notify(&mut inner, CallState::Failed(reason), EndReason::PeerFailed)
                .await;
            return Err(e);
        }

        self.transition(&mut inner, CallState::Connecting);
        Ok(())
    }

    /// Decline the ringing incoming call.
    #[instrument(name = "call.decline", skip(self))]
    pub async fn decline(&self) -> Result<(), CallError> {
        let mut inner = self.shared.inner.lock().await;
        let incoming = inner
            .session
            .as_ref()
            .is_some_and(|session| session.direction == CallDirection::Incoming);
        if inner.state != CallState::Ringing || !incoming {
            return Err(CallError::invalid_state("decline", inner.state));
        }
        self.end_and_notify(
            &mut inner,
            CallState::Ended(EndReason::Declined),
            EndReason::Declined,
        )
        .await;
        Ok(())
    }

    /// End the current call from this side. No-op when no call is active.
    #[instrument(name = "call.hang_up", skip(self))]
    pub async fn hang_up(&self) {
        let mut inner = self.shared.inner.lock().await;
        if !inner.state.is_active() {
            debug!(state = %inner.state, "Hang-up with no active call");
            return;
        }
        self.end_and_notify(&mut inner, CallState::Ended(EndReason::Hangup), EndReason::Hangup)
            .await;
    }

    /// Feed a frame received from the server.
    ///
    /// Returns false for frames that are not call signaling.
    pub async fn handle_frame(&self, frame: ServerFrame) -> bool {
        match frame {
            ServerFrame::IncomingCall {
                from_user_id,
                is_video,
                offer,
                caller_name,
            } => {
                self.on_incoming_call(from_user_id, CallKind::from_is_video(is_video), offer, caller_name)
                    .await
            }
            ServerFrame::CallAnswer {
                from_user_id,
                answer,
            } => self.on_answer(from_user_id, answer).await,
            ServerFrame::IceCandidate {
                from_user_id,
                candidate,
            } => self.on_remote_candidate(from_user_id, candidate).await,
            ServerFrame::CallEnded {
                from_user_id,
                reason,
            } => self.on_remote_end(from_user_id, reason).await,
            _ => return false,
        }
        true
    }

    #[instrument(name = "call.incoming", skip_all, fields(caller = %caller))]
    async fn on_incoming_call(
        &self,
        caller: Identity,
        kind: CallKind,
        offer: SessionDescription,
        caller_name: String,
    ) {
        let mut inner = self.shared.inner.lock().await;
        if inner.state.is_active() {
            info!(state = %inner.state, "Ignoring incoming call while another call is active");
            return;
        }

        let mut session = ActiveCall::new(caller, kind, CallDirection::Incoming);
        session.peer_name = Some(caller_name);
        session.remote_offer = Some(offer);
        inner.session = Some(session);
        self.transition(&mut inner, CallState::Ringing);
    }

    async fn on_answer(&self, from: Identity, answer: SessionDescription) {
        let mut inner = self.shared.inner.lock().await;
        let state = inner.state;
        let Some(session) = inner.session.as_mut() else {
            debug!(from = %from, "Ignoring call answer with no active call");
            return;
        };
        if session.peer != from
            || session.direction != CallDirection::Outgoing
            || state != CallState::Ringing
        {
            debug!(from = %from, state = %state, "Ignoring unexpected call answer");
            return;
        }

        if let Some(ringing) = session.ringing.take() {
            ringing.cancel();
        }
        let call_id = session.id;
        let Some(pc) = session.peer_connection.clone() else {
            return;
        };

        if let Err(e) = pc.set_remote_description(answer).await {
            warn!(error = %e, "Remote answer rejected");
            self.end_and_notify(
                &mut inner,
                CallState::Failed(FailureReason::PeerConnection),
                EndReason::PeerFailed,
            )
            .await;
            return;
        }

        self.apply_pending_candidates(&mut inner, call_id, pc.as_ref()).await;
        self.transition(&mut inner, CallState::Connecting);
    }

    async fn on_remote_candidate(&self, from: Identity, candidate: IceCandidate) {
        let mut inner = self.shared.inner.lock().await;
        let Some(session) = inner.session.as_mut().filter(|session| session.peer == from) else {
            debug!(from = %from, "Dropping ICE candidate with no matching call");
            return;
        };

        if !session.remote_description_applied {
            session.pending_candidates.push(candidate);
            return;
        }
        if let Some(pc) = session.peer_connection.clone() {
            if let Err(e) = pc.add_ice_candidate(candidate).await {
                warn!(error = %e, "Failed to apply ICE candidate");
            }
        }
    }

    async fn on_remote_end(&self, from: Identity, reason: Option<String>) {
        let mut inner = self.shared.inner.lock().await;
        let from_peer = inner
            .session
            .as_ref()
            .is_some_and(|session| session.peer == from);
        if !from_peer {
            debug!(from = %from, "Ignoring call end from a party not in the call");
            return;
        }
        let reason = EndReason::from_wire(reason.as_deref());
        info!(from = %from, %reason, "Remote side ended the call");
        self.teardown(&mut inner, CallState::Ended(reason));
    }

    async fn on_peer_event(&self, call_id: Uuid, event: PeerEvent) {
        let mut inner = self.shared.inner.lock().await;
        let Some(session) = inner.current(call_id) else {
            return;
        };

        match event {
            PeerEvent::LocalCandidate(candidate) => {
                let frame = ClientFrame::IceCandidate {
                    to_user_id: session.peer.clone(),
                    candidate,
                };
                if let Err(e) = self.shared.signaling.send(frame).await {
                    warn!(error = %e, "Failed to relay local ICE candidate");
                }
            }
            PeerEvent::RemoteTrack(track) => {
                debug!(track = track.id(), "Remote track added");
                session.remote_tracks.push(track);
            }
            PeerEvent::Connectivity(ConnectivityState::Connected) => {
                if inner.state == CallState::Connecting {
                    self.transition(&mut inner, CallState::Connected);
                }
            }
            PeerEvent::Connectivity(connectivity) if connectivity.is_lost() => {
                warn!(?connectivity, "Peer connectivity lost");
                self.teardown(&mut inner, CallState::Failed(FailureReason::Connectivity));
            }
            PeerEvent::Connectivity(connectivity) => {
                debug!(?connectivity, "Peer connectivity changed");
            }
        }
    }

    async fn on_ringing_timeout(&self, call_id: Uuid) {
        let mut inner = self.shared.inner.lock().await;
        let state = inner.state;
        let still_ringing = inner
            .current(call_id)
            .is_some_and(|session| session.direction == CallDirection::Outgoing)
            && state == CallState::Ringing;
        if !still_ringing {
            return;
        }
        info!("No answer before ringing timeout");
        self.end_and_notify(&mut inner, CallState::Ended(EndReason::Timeout), EndReason::Timeout)
            .await;
    }

    async fn send_offer(
        &self,
        inner: &mut CallInner,
        call_id: Uuid,
        callee: &Identity,
        kind: CallKind,
        media: LocalMedia,
    ) -> Result<(), SetupError> {
        let pc = self
            .open_peer_connection(inner, call_id, media)
            .map_err(peer_failure)?;
        let offer = pc.create_offer().await.map_err(peer_failure)?;
        pc.set_local_description(offer.clone())
            .await
            .map_err(peer_failure)?;

        let frame = ClientFrame::CallOffer {
            to_user_id: callee.clone(),
            from_user_id: self.shared.config.local_identity.clone(),
            caller_name: self.shared.config.display_name.clone(),
            is_video: kind.is_video(),
            offer,
        };
        self.shared
            .signaling
            .send(frame)
            .await
            .map_err(|e| (e, FailureReason::Signaling))
    }

    async fn send_answer(
        &self,
        inner: &mut CallInner,
        call_id: Uuid,
        media: LocalMedia,
    ) -> Result<(), SetupError> {
        let pc = self
            .open_peer_connection(inner, call_id, media)
            .map_err(peer_failure)?;

        let (peer, offer) = inner
            .current(call_id)
            .and_then(|session| Some((session.peer.clone(), session.remote_offer.take()?)))
            .ok_or_else(|| peer_failure(CallError::peer("incoming call carries no offer")))?;

        pc.set_remote_description(offer).await.map_err(peer_failure)?;
        self.apply_pending_candidates(inner, call_id, pc.as_ref()).await;

        let answer = pc.create_answer().await.map_err(peer_failure)?;
        pc.set_local_description(answer.clone())
            .await
            .map_err(peer_failure)?;

        self.shared
            .signaling
            .send(ClientFrame::CallAnswer {
                to_user_id: peer,
                answer,
            })
            .await
            .map_err(|e| (e, FailureReason::Signaling))
    }

    /// Create the peer connection, attach local tracks and start pumping its
    /// events. The session owns everything from here on, so a failure below
    /// is cleaned up by the session's teardown.
    fn open_peer_connection(
        &self,
        inner: &mut CallInner,
        call_id: Uuid,
        media: LocalMedia,
    ) -> Result<Arc<dyn PeerConnection>, CallError> {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let pc = self.shared.peers.create(events_tx)?;

        let Some(session) = inner.current(call_id) else {
            pc.close();
            return Err(CallError::invalid_state("connect", "no active call"));
        };
        session.peer_connection = Some(Arc::clone(&pc));
        session.events = Some(self.spawn_event_pump(call_id, events_rx));

        for track in media.tracks() {
            pc.add_track(Arc::clone(track))?;
        }
        session.local_media = Some(media);
        Ok(pc)
    }

    async fn apply_pending_candidates(
        &self,
        inner: &mut CallInner,
        call_id: Uuid,
        pc: &dyn PeerConnection,
    ) {
        let pending = match inner.current(call_id) {
            Some(session) => {
                session.remote_description_applied = true;
                std::mem::take(&mut session.pending_candidates)
            }
            None => return,
        };
        if !pending.is_empty() {
            debug!(count = pending.len(), "Applying buffered ICE candidates");
        }
        for candidate in pending {
            if let Err(e) = pc.add_ice_candidate(candidate).await {
                warn!(error = %e, "Failed to apply buffered ICE candidate");
            }
        }
    }

    fn spawn_event_pump(
        &self,
        call_id: Uuid,
        mut events: mpsc::UnboundedReceiver<PeerEvent>,
    ) -> CancellationToken {
        let token = CancellationToken::new();
        let cancelled = token.clone();
        let shared: Weak<Shared> = Arc::downgrade(&self.shared);
        tokio::spawn(async move {
            loop {
                let event = tokio::select! {
                    _ = cancelled.cancelled() => break,
                    event = events.recv() => match event {
                        Some(event) => event,
                        None => break,
                    },
                };
                let Some(shared) = shared.upgrade() else {
                    break;
                };
                CallCoordinator { shared }.on_peer_event(call_id, event).await;
            }
        });
        token
    }

    fn arm_ringing_timeout(&self, inner: &mut CallInner, call_id: Uuid) {
        let shared = Arc::downgrade(&self.shared);
        let timer = ScheduledTask::after(self.shared.config.ringing_timeout, async move {
            if let Some(shared) = shared.upgrade() {
                CallCoordinator { shared }.on_ringing_timeout(call_id).await;
            }
        });
        if let Some(session) = inner.current(call_id) {
            session.ringing = Some(timer);
        }
    }

    /// Tear the call down and tell the peer why.
    async fn end_and_notify(&self, inner: &mut CallInner, terminal: CallState, reason: EndReason) {
        let Some(peer) = self.teardown(inner, terminal) else {
            return;
        };
        let frame = ClientFrame::CallEnd {
            to_user_id: peer,
            reason: Some(reason.as_wire().to_string()),
        };
        if let Err(e) = self.shared.signaling.send(frame).await {
            warn!(error = %e, "Failed to relay call end");
        }
    }

    /// Move to `terminal` and release the session's resources.
    ///
    /// Returns the peer of the released session, or `None` when no call was
    /// active, which makes repeated teardown a no-op.
    fn teardown(&self, inner: &mut CallInner, terminal: CallState) -> Option<Identity> {
        let session = inner.session.take()?;
        let peer = session.peer.clone();
        self.transition(inner, terminal);

        match terminal {
            CallState::Ended(reason) => metrics::record_call_finished("ended", reason.as_wire()),
            CallState::Failed(reason) => metrics::record_call_finished("failed", reason.as_str()),
            _ => {}
        }

        drop(session);
        Some(peer)
    }

    fn transition(&self, inner: &mut CallInner, to: CallState) {
        let from = inner.state;
        if from == to {
            return;
        }
        inner.state = to;
        info!(%from, %to, "Call state changed");
        // No subscribers is fine.
        let _ = self.shared.transitions.send(CallTransition { from, to });
    }
}
