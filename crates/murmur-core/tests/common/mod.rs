//! Test utilities for call and fan-out integration tests.
//!
//! Provides recording mocks for the media, peer connection and signaling
//! seams, plus a helper that wires a `CallCoordinator` to a `Hub` the way a
//! real client would through its WebSocket.

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use murmur_core::call::{
    CallConfig, CallCoordinator, LocalMedia, MediaDevices, MediaTrack, PeerConnection,
    PeerConnectionFactory, PeerEvent, PeerEventSender, SignalingChannel, TrackKind,
};
use murmur_core::protocol::{IceCandidate, SessionDescription};
use murmur_core::{CallError, CallKind, ClientFrame, Hub, Identity};
use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;

/// Default timeout for test operations.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// Let spawned tasks (event pumps, client inboxes) run until idle.
///
/// Meant for paused-clock tests, where the sleep only completes once every
/// other task is blocked.
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(10)).await;
}

// ============================================================================
// Media
// ============================================================================

#[derive(Debug)]
pub struct MockTrack {
    id: String,
    kind: TrackKind,
    stops: AtomicUsize,
}

impl MockTrack {
    pub fn new(id: impl Into<String>, kind: TrackKind) -> Arc<Self> {
        Arc::new(Self {
            id: id.into(),
            kind,
            stops: AtomicUsize::new(0),
        })
    }

    pub fn stop_count(&self) -> usize {
        self.stops.load(Ordering::SeqCst)
    }
}

impl MediaTrack for MockTrack {
    fn id(&self) -> &str {
        &self.id
    }

    fn kind(&self) -> TrackKind {
        self.kind
    }

    fn stop(&self) {
        self.stops.fetch_add(1, Ordering::SeqCst);
    }
}

/// Media devices that hand out mock tracks, or deny access.
pub struct MockMedia {
    owner: String,
    deny: AtomicBool,
    gate: Option<Arc<Notify>>,
    issued: Mutex<Vec<Arc<MockTrack>>>,
}

impl MockMedia {
    pub fn new(owner: &str) -> Arc<Self> {
        Arc::new(Self {
            owner: owner.to_string(),
            deny: AtomicBool::new(false),
            gate: None,
            issued: Mutex::new(Vec::new()),
        })
    }

    /// Devices that refuse every acquisition.
    pub fn denying(owner: &str) -> Arc<Self> {
        let media = Self::new(owner);
        media.deny.store(true, Ordering::SeqCst);
        media
    }

    /// Devices whose acquisition completes only once `gate` is notified.
    pub fn gated(owner: &str, gate: Arc<Notify>) -> Arc<Self> {
        Arc::new(Self {
            owner: owner.to_string(),
            deny: AtomicBool::new(false),
            gate: Some(gate),
            issued: Mutex::new(Vec::new()),
        })
    }

    /// Every track handed out so far.
    pub fn tracks(&self) -> Vec<Arc<MockTrack>> {
        self.issued.lock().unwrap().clone()
    }
}

#[async_trait]
impl MediaDevices for MockMedia {
    async fn acquire(&self, kind: CallKind) -> Result<LocalMedia, CallError> {
        if let Some(gate) = &self.gate {
            gate.notified().await;
        }
        if self.deny.load(Ordering::SeqCst) {
            return Err(CallError::media("permission denied"));
        }

        let mut tracks = vec![MockTrack::new(format!("{}-audio", self.owner), TrackKind::Audio)];
        if kind.is_video() {
            tracks.push(MockTrack::new(format!("{}-video", self.owner), TrackKind::Video));
        }
        self.issued.lock().unwrap().extend(tracks.iter().cloned());

        Ok(LocalMedia::new(
            tracks
                .into_iter()
                .map(|track| track as Arc<dyn MediaTrack>)
                .collect(),
        ))
    }
}

// ============================================================================
// Peer connections
// ============================================================================

/// Peer connection that records every call made on it.
///
/// Emits one local ICE candidate each time a local description is set.
/// Refuses remote candidates until a remote description is set, like a real
/// WebRTC stack.
pub struct MockPeer {
    label: String,
    events: PeerEventSender,
    log: Mutex<Vec<String>>,
    closes: AtomicUsize,
    candidates: AtomicUsize,
}

impl MockPeer {
    fn new(label: String, events: PeerEventSender) -> Self {
        Self {
            label,
            events,
            log: Mutex::new(Vec::new()),
            closes: AtomicUsize::new(0),
            candidates: AtomicUsize::new(0),
        }
    }

    pub fn log(&self) -> Vec<String> {
        self.log.lock().unwrap().clone()
    }

    /// Remote candidates applied, in order.
    pub fn applied_candidates(&self) -> Vec<String> {
        self.log()
            .into_iter()
            .filter_map(|entry| entry.strip_prefix("candidate:").map(str::to_string))
            .collect()
    }

    pub fn close_count(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    /// Simulate an event from the underlying transport.
    pub fn emit(&self, event: PeerEvent) {
        let _ = self.events.send(event);
    }

    fn record(&self, entry: String) {
        self.log.lock().unwrap().push(entry);
    }

    fn has_remote_description(&self) -> bool {
        self.log
            .lock()
            .unwrap()
            .iter()
            .any(|entry| entry.starts_with("remote:"))
    }
}

#[async_trait]
impl PeerConnection for MockPeer {
    fn add_track(&self, track: Arc<dyn MediaTrack>) -> Result<(), CallError> {
        self.record(format!("track:{}", track.id()));
        Ok(())
    }

    async fn create_offer(&self) -> Result<SessionDescription, CallError> {
        Ok(SessionDescription::offer(format!("offer-from-{}", self.label)))
    }

    async fn create_answer(&self) -> Result<SessionDescription, CallError> {
        Ok(SessionDescription::answer(format!("answer-from-{}", self.label)))
    }

    async fn set_local_description(&self, description: SessionDescription) -> Result<(), CallError> {
        self.record(format!("local:{}", description.sdp));
        let n = self.candidates.fetch_add(1, Ordering::SeqCst);
        self.emit(PeerEvent::LocalCandidate(IceCandidate::new(format!(
            "{}-cand-{}",
            self.label, n
        ))));
        Ok(())
    }

    async fn set_remote_description(&self, description: SessionDescription) -> Result<(), CallError> {
        self.record(format!("remote:{}", description.sdp));
        Ok(())
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<(), CallError> {
        if !self.has_remote_description() {
            return Err(CallError::peer("remote description not set"));
        }
        self.record(format!("candidate:{}", candidate.candidate));
        Ok(())
    }

    fn close(&self) {
        self.closes.fetch_add(1, Ordering::SeqCst);
        self.record("close".to_string());
    }
}

pub struct MockPeerFactory {
    label: String,
    created: Mutex<Vec<Arc<MockPeer>>>,
}

impl MockPeerFactory {
    pub fn new(label: &str) -> Arc<Self> {
        Arc::new(Self {
            label: label.to_string(),
            created: Mutex::new(Vec::new()),
        })
    }

    pub fn created_count(&self) -> usize {
        self.created.lock().unwrap().len()
    }

    /// Most recently created peer connection.
    pub fn last(&self) -> Arc<MockPeer> {
        self.created
            .lock()
            .unwrap()
            .last()
            .cloned()
            .expect("no peer connection created")
    }
}

impl PeerConnectionFactory for MockPeerFactory {
    fn create(&self, events: PeerEventSender) -> Result<Arc<dyn PeerConnection>, CallError> {
        let peer = Arc::new(MockPeer::new(format!("{}-pc", self.label), events));
        self.created.lock().unwrap().push(peer.clone());
        Ok(peer)
    }
}

// ============================================================================
// Signaling
// ============================================================================

/// Signaling channel that only records outbound frames.
#[derive(Default)]
pub struct RecordingSignaling {
    frames: Mutex<Vec<ClientFrame>>,
}

impl RecordingSignaling {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn frames(&self) -> Vec<ClientFrame> {
        self.frames.lock().unwrap().clone()
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.frames().iter().map(ClientFrame::name).collect()
    }

    pub fn call_end_reasons(&self) -> Vec<Option<String>> {
        self.frames()
            .into_iter()
            .filter_map(|frame| match frame {
                ClientFrame::CallEnd { reason, .. } => Some(reason),
                _ => None,
            })
            .collect()
    }
}

#[async_trait]
impl SignalingChannel for RecordingSignaling {
    async fn send(&self, frame: ClientFrame) -> Result<(), CallError> {
        self.frames.lock().unwrap().push(frame);
        Ok(())
    }
}

/// Signaling channel that hands frames to a hub as `identity`, standing in
/// for the client's WebSocket.
pub struct HubSignaling {
    hub: Arc<Hub>,
    identity: Identity,
}

#[async_trait]
impl SignalingChannel for HubSignaling {
    async fn send(&self, frame: ClientFrame) -> Result<(), CallError> {
        self.hub.handle(&self.identity, frame).await;
        Ok(())
    }
}

// ============================================================================
// Clients
// ============================================================================

/// Coordinator with recording mocks, not connected to any hub.
pub struct Harness {
    pub coordinator: CallCoordinator,
    pub media: Arc<MockMedia>,
    pub peers: Arc<MockPeerFactory>,
    pub signaling: Arc<RecordingSignaling>,
}

impl Harness {
    pub fn new(identity: &str) -> Self {
        Self::with_media(identity, MockMedia::new(identity))
    }

    pub fn with_media(identity: &str, media: Arc<MockMedia>) -> Self {
        let peers = MockPeerFactory::new(identity);
        let signaling = RecordingSignaling::new();
        let coordinator = CallCoordinator::new(
            CallConfig::new(Identity::new(identity), display_name(identity)),
            media.clone(),
            peers.clone(),
            signaling.clone(),
        );
        Self {
            coordinator,
            media,
            peers,
            signaling,
        }
    }
}

/// A client bound to a hub, with its inbox feeding its coordinator.
pub struct TestClient {
    pub identity: Identity,
    pub coordinator: CallCoordinator,
    pub media: Arc<MockMedia>,
    pub peers: Arc<MockPeerFactory>,
    inbox: JoinHandle<()>,
}

impl TestClient {
    pub fn connect(hub: &Arc<Hub>, name: &str) -> Self {
        let identity = Identity::new(name);
        let media = MockMedia::new(name);
        let peers = MockPeerFactory::new(name);
        let coordinator = CallCoordinator::new(
            CallConfig::new(identity.clone(), display_name(name)),
            media.clone(),
            peers.clone(),
            Arc::new(HubSignaling {
                hub: hub.clone(),
                identity: identity.clone(),
            }),
        );

        let (tx, mut rx) = mpsc::channel(256);
        hub.registry().bind(identity.clone(), tx);

        let inbox_coordinator = coordinator.clone();
        let inbox = tokio::spawn(async move {
            while let Some(frame) = rx.recv().await {
                inbox_coordinator.handle_frame(frame).await;
            }
        });

        Self {
            identity,
            coordinator,
            media,
            peers,
            inbox,
        }
    }
}

impl Drop for TestClient {
    fn drop(&mut self) {
        self.inbox.abort();
    }
}

/// "alice" -> "Alice"
pub fn display_name(identity: &str) -> String {
    let mut chars = identity.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}
