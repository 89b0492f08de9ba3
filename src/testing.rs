//! In-process media capability for tests and the demo binary.
//!
//! [`FakeTransport`] follows the ordering rules of a real peer connection
//! (an answer or a remote candidate needs the remote description first) and
//! records every call so tests can assert on what the engine did.

use crate::media::{
    MediaConstraints, MediaDevices, MediaError, MediaTrack, MediaTrackSet, PeerConnectionState,
    PeerTransport, TrackKind, TransportError, TransportEvent, TransportFactory,
};
use crate::types::{IceCandidate, SessionDescription};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

const EVENT_CAPACITY: usize = 64;

static NEXT_TRANSPORT_ID: AtomicU64 = AtomicU64::new(1);

/// Hands out one microphone and, if requested, one camera track.
pub struct FakeMediaDevices {
    available: bool,
    acquisitions: AtomicU64,
}

impl FakeMediaDevices {
    pub fn new() -> Self {
        Self {
            available: true,
            acquisitions: AtomicU64::new(0),
        }
    }

    /// Devices that refuse every capture request.
    pub fn unavailable() -> Self {
        Self {
            available: false,
            acquisitions: AtomicU64::new(0),
        }
    }

    pub fn acquisitions(&self) -> u64 {
        self.acquisitions.load(Ordering::SeqCst)
    }
}

impl Default for FakeMediaDevices {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MediaDevices for FakeMediaDevices {
    async fn acquire_local_tracks(
        &self,
        constraints: &MediaConstraints,
    ) -> Result<MediaTrackSet, MediaError> {
        self.acquisitions.fetch_add(1, Ordering::SeqCst);
        if !self.available {
            return Err(MediaError::Unavailable("no capture device".into()));
        }
        let mut tracks = MediaTrackSet::new();
        if constraints.audio {
            tracks.add(MediaTrack::new("mic-0", TrackKind::Audio));
        }
        if constraints.video.is_some() {
            tracks.add(MediaTrack::new("cam-0", TrackKind::Video));
        }
        Ok(tracks)
    }
}

/// One recorded call on a [`FakeTransport`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportCall {
    CreateOffer,
    CreateAnswer,
    SetLocalDescription(SessionDescription),
    SetRemoteDescription(SessionDescription),
    AddIceCandidate(IceCandidate),
    AddTrack(String),
    Close,
}

#[derive(Default)]
struct FakeTransportState {
    calls: Vec<TransportCall>,
    local: Option<SessionDescription>,
    remote: Option<SessionDescription>,
    applied_candidates: usize,
    connected: bool,
    closed: bool,
}

pub struct FakeTransport {
    id: u64,
    label: String,
    candidates: Vec<IceCandidate>,
    auto_connect: bool,
    events: mpsc::Sender<TransportEvent>,
    state: Mutex<FakeTransportState>,
}

impl FakeTransport {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn calls(&self) -> Vec<TransportCall> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn local_description(&self) -> Option<SessionDescription> {
        self.state.lock().unwrap().local.clone()
    }

    pub fn remote_description(&self) -> Option<SessionDescription> {
        self.state.lock().unwrap().remote.clone()
    }

    /// Remote candidates the engine applied, in order.
    pub fn applied_candidates(&self) -> Vec<IceCandidate> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                TransportCall::AddIceCandidate(c) => Some(c),
                _ => None,
            })
            .collect()
    }

    /// Ids of the tracks added to this transport.
    pub fn tracks(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                TransportCall::AddTrack(id) => Some(id),
                _ => None,
            })
            .collect()
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().unwrap().closed
    }

    /// Raise a transport callback as if the connection produced it.
    pub fn emit(&self, event: TransportEvent) {
        let _ = self.events.try_send(event);
    }

    fn record(&self, call: TransportCall) -> Result<(), TransportError> {
        let mut state = self.state.lock().unwrap();
        if state.closed {
            return Err(TransportError::Closed);
        }
        state.calls.push(call);
        Ok(())
    }

    fn maybe_connect(&self) {
        if !self.auto_connect {
            return;
        }
        let mut state = self.state.lock().unwrap();
        if state.connected
            || state.local.is_none()
            || state.remote.is_none()
            || state.applied_candidates == 0
        {
            return;
        }
        state.connected = true;
        drop(state);
        self.emit(TransportEvent::ConnectionStateChanged(
            PeerConnectionState::Connected,
        ));
    }
}

#[async_trait]
impl PeerTransport for FakeTransport {
    async fn create_offer(&self) -> Result<SessionDescription, TransportError> {
        self.record(TransportCall::CreateOffer)?;
        Ok(SessionDescription::offer(self.label.clone()))
    }

    async fn create_answer(&self) -> Result<SessionDescription, TransportError> {
        self.record(TransportCall::CreateAnswer)?;
        if self.state.lock().unwrap().remote.is_none() {
            return Err(TransportError::Rejected(
                "cannot answer without a remote offer".into(),
            ));
        }
        Ok(SessionDescription::answer(self.label.clone()))
    }

    async fn set_local_description(&self, desc: &SessionDescription) -> Result<(), TransportError> {
        self.record(TransportCall::SetLocalDescription(desc.clone()))?;
        self.state.lock().unwrap().local = Some(desc.clone());
        for candidate in &self.candidates {
            self.emit(TransportEvent::IceCandidate(candidate.clone()));
        }
        self.maybe_connect();
        Ok(())
    }

    async fn set_remote_description(
        &self,
        desc: &SessionDescription,
    ) -> Result<(), TransportError> {
        self.record(TransportCall::SetRemoteDescription(desc.clone()))?;
        self.state.lock().unwrap().remote = Some(desc.clone());
        self.maybe_connect();
        Ok(())
    }

    async fn add_ice_candidate(&self, candidate: &IceCandidate) -> Result<(), TransportError> {
        self.record(TransportCall::AddIceCandidate(candidate.clone()))?;
        {
            let mut state = self.state.lock().unwrap();
            if state.remote.is_none() {
                return Err(TransportError::Rejected(
                    "remote description not set".into(),
                ));
            }
            state.applied_candidates += 1;
        }
        self.maybe_connect();
        Ok(())
    }

    async fn add_track(&self, track: &MediaTrack) -> Result<(), TransportError> {
        self.record(TransportCall::AddTrack(track.id().to_string()))
    }

    async fn close(&self) {
        let mut state = self.state.lock().unwrap();
        if !state.closed {
            state.calls.push(TransportCall::Close);
            state.closed = true;
        }
    }
}

/// Builds [`FakeTransport`]s and keeps a handle to each for inspection.
pub struct FakeTransportFactory {
    label: String,
    candidates: Vec<IceCandidate>,
    auto_connect: bool,
    failing: AtomicBool,
    transports: Mutex<Vec<Arc<FakeTransport>>>,
}

impl FakeTransportFactory {
    /// `label` becomes the SDP body of every description the transports produce.
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            candidates: Vec::new(),
            auto_connect: false,
            failing: AtomicBool::new(false),
            transports: Mutex::new(Vec::new()),
        }
    }

    /// Candidates each transport "gathers" once its local description is set.
    pub fn with_candidates(mut self, candidates: Vec<IceCandidate>) -> Self {
        self.candidates = candidates;
        self
    }

    /// Report `Connected` once both descriptions and a remote candidate are applied.
    pub fn with_auto_connect(mut self) -> Self {
        self.auto_connect = true;
        self
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn transports(&self) -> Vec<Arc<FakeTransport>> {
        self.transports.lock().unwrap().clone()
    }

    pub fn latest(&self) -> Option<Arc<FakeTransport>> {
        self.transports.lock().unwrap().last().cloned()
    }
}

#[async_trait]
impl TransportFactory for FakeTransportFactory {
    async fn create_transport(
        &self,
    ) -> Result<(Arc<dyn PeerTransport>, mpsc::Receiver<TransportEvent>), TransportError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(TransportError::Failed("transport creation disabled".into()));
        }
        let (events, rx) = mpsc::channel(EVENT_CAPACITY);
        let transport = Arc::new(FakeTransport {
            id: NEXT_TRANSPORT_ID.fetch_add(1, Ordering::SeqCst),
            label: self.label.clone(),
            candidates: self.candidates.clone(),
            auto_connect: self.auto_connect,
            events,
            state: Mutex::new(FakeTransportState::default()),
        });
        self.transports.lock().unwrap().push(transport.clone());
        Ok((transport, rx))
    }
}
