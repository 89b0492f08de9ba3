//! Seams to the media capability: local capture and the peer transport.
//!
//! Codec negotiation, packetization and NAT traversal all live behind
//! [`PeerTransport`]; this crate only drives its signaling surface.

mod error;

pub use error::{MediaError, TransportError};

use crate::types::{IceCandidate, SessionDescription};
use async_trait::async_trait;
use serde::Serialize;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::mpsc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackKind {
    Audio,
    Video,
}

/// Handle to one audio or video track.
///
/// Clones share the enabled flag, so muting through any handle mutes the
/// track everywhere it is attached.
#[derive(Clone)]
pub struct MediaTrack {
    id: String,
    kind: TrackKind,
    enabled: Arc<AtomicBool>,
}

impl MediaTrack {
    pub fn new(id: impl Into<String>, kind: TrackKind) -> Self {
        Self {
            id: id.into(),
            kind,
            enabled: Arc::new(AtomicBool::new(true)),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn kind(&self) -> TrackKind {
        self.kind
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::SeqCst);
    }
}

impl PartialEq for MediaTrack {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id && self.kind == other.kind
    }
}

impl Eq for MediaTrack {}

impl std::fmt::Debug for MediaTrack {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MediaTrack")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("enabled", &self.is_enabled())
            .finish()
    }
}

/// Ordered set of tracks, unique by id.
#[derive(Debug, Clone, Default)]
pub struct MediaTrackSet {
    tracks: Vec<MediaTrack>,
}

impl MediaTrackSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a track; returns false if one with the same id is present.
    pub fn add(&mut self, track: MediaTrack) -> bool {
        if self.contains(track.id()) {
            return false;
        }
        self.tracks.push(track);
        true
    }

    pub fn contains(&self, id: &str) -> bool {
        self.tracks.iter().any(|t| t.id() == id)
    }

    pub fn tracks(&self) -> &[MediaTrack] {
        &self.tracks
    }

    pub fn audio_tracks(&self) -> impl Iterator<Item = &MediaTrack> {
        self.tracks.iter().filter(|t| t.kind() == TrackKind::Audio)
    }

    pub fn video_tracks(&self) -> impl Iterator<Item = &MediaTrack> {
        self.tracks.iter().filter(|t| t.kind() == TrackKind::Video)
    }

    pub fn ids(&self) -> Vec<String> {
        self.tracks.iter().map(|t| t.id().to_string()).collect()
    }

    pub fn len(&self) -> usize {
        self.tracks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }

    pub fn clear(&mut self) {
        self.tracks.clear();
    }
}

impl FromIterator<MediaTrack> for MediaTrackSet {
    fn from_iter<I: IntoIterator<Item = MediaTrack>>(iter: I) -> Self {
        let mut set = Self::new();
        for track in iter {
            set.add(track);
        }
        set
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FacingMode {
    User,
    Environment,
}

/// What to capture at startup.
#[derive(Debug, Clone)]
pub struct MediaConstraints {
    pub audio: bool,
    pub video: Option<FacingMode>,
}

impl Default for MediaConstraints {
    fn default() -> Self {
        Self {
            audio: true,
            video: Some(FacingMode::User),
        }
    }
}

/// Camera/microphone capability.
#[async_trait]
pub trait MediaDevices: Send + Sync {
    async fn acquire_local_tracks(
        &self,
        constraints: &MediaConstraints,
    ) -> Result<MediaTrackSet, MediaError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PeerConnectionState {
    New,
    Connecting,
    Connected,
    Disconnected,
    Failed,
    Closed,
}

/// Callbacks raised by a transport, delivered through its event receiver.
#[derive(Debug, Clone)]
pub enum TransportEvent {
    /// A local candidate was gathered.
    IceCandidate(IceCandidate),
    /// The peer started sending a track.
    Track(MediaTrack),
    ConnectionStateChanged(PeerConnectionState),
}

/// A single-use peer connection. Once closed it cannot be reused.
#[async_trait]
pub trait PeerTransport: Send + Sync {
    async fn create_offer(&self) -> Result<SessionDescription, TransportError>;

    async fn create_answer(&self) -> Result<SessionDescription, TransportError>;

    async fn set_local_description(&self, desc: &SessionDescription) -> Result<(), TransportError>;

    async fn set_remote_description(&self, desc: &SessionDescription)
    -> Result<(), TransportError>;

    async fn add_ice_candidate(&self, candidate: &IceCandidate) -> Result<(), TransportError>;

    async fn add_track(&self, track: &MediaTrack) -> Result<(), TransportError>;

    async fn close(&self);
}

/// Builds fresh transports together with their event stream.
#[async_trait]
pub trait TransportFactory: Send + Sync {
    async fn create_transport(
        &self,
    ) -> Result<(Arc<dyn PeerTransport>, mpsc::Receiver<TransportEvent>), TransportError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_track_set_is_unique_by_id() {
        let mut set = MediaTrackSet::new();
        assert!(set.add(MediaTrack::new("mic", TrackKind::Audio)));
        assert!(!set.add(MediaTrack::new("mic", TrackKind::Audio)));
        assert!(set.add(MediaTrack::new("cam", TrackKind::Video)));
        assert_eq!(set.len(), 2);
        assert_eq!(set.audio_tracks().count(), 1);
        assert_eq!(set.video_tracks().count(), 1);
    }

    #[test]
    fn test_clones_share_enabled_flag() {
        let track = MediaTrack::new("mic", TrackKind::Audio);
        let attached = track.clone();
        track.set_enabled(false);
        assert!(!attached.is_enabled());
    }
}
