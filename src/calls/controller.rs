//! Call lifecycle on top of one [`NegotiationEngine`].

use super::engine::NegotiationEngine;
use super::state::NegotiationState;
use crate::config::CallConfig;
use crate::error::CallError;
use crate::media::{MediaDevices, MediaTrackSet, TransportFactory};
use crate::store::DocumentStore;
use crate::types::{CallId, EventBus, Role};
use log::{info, warn};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::RwLock;

/// What a rendering layer needs to draw the call.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CallView {
    pub call_id: Option<CallId>,
    pub role: Option<Role>,
    pub state: NegotiationState,
    pub muted: bool,
    pub camera_enabled: bool,
    pub local_tracks: Vec<String>,
    pub remote_tracks: Vec<String>,
}

/// Owns local media and drives start, hangup and restart.
///
/// Mute and camera flags are flipped on the track handles themselves, which
/// the transport shares, so toggling never renegotiates.
pub struct CallSessionController {
    engine: NegotiationEngine,
    local_tracks: MediaTrackSet,
    last_call: RwLock<Option<(Role, CallId)>>,
}

impl CallSessionController {
    /// Acquire local media and build an idle engine.
    ///
    /// Media is acquired exactly once here; a failure is returned as
    /// [`CallError::MediaUnavailable`] and not retried.
    pub async fn new(
        devices: Arc<dyn MediaDevices>,
        store: Arc<dyn DocumentStore>,
        factory: Arc<dyn TransportFactory>,
        config: CallConfig,
    ) -> Result<Self, CallError> {
        let local_tracks = devices.acquire_local_tracks(&config.constraints).await?;
        info!("acquired local media: {:?}", local_tracks.ids());
        let engine = NegotiationEngine::new(store, factory, config.engine).await?;
        Ok(Self {
            engine,
            local_tracks,
            last_call: RwLock::new(None),
        })
    }

    /// Attach local tracks and start negotiating on `call_id`.
    ///
    /// An initiator without an id gets a generated one; a responder must be
    /// told which call to join. Returns the id in use.
    pub async fn start_call(
        &self,
        role: Role,
        call_id: Option<CallId>,
    ) -> Result<CallId, CallError> {
        let call_id = match (role, call_id) {
            (_, Some(id)) => id,
            (Role::Initiator, None) => CallId::generate(),
            (Role::Responder, None) => return Err(CallError::MissingCallId),
        };

        // A previous attempt may have ended on its own (timeout, transport failure).
        if self.engine.state().is_closed() {
            self.engine.reset().await?;
        }
        self.engine.attach_local_tracks(&self.local_tracks).await?;
        *self.last_call.write().await = Some((role, call_id.clone()));

        if let Err(e) = self.engine.start(role, call_id.clone()).await {
            warn!("call {call_id} failed to start: {e}");
            if let Err(reset_err) = self.engine.reset().await {
                warn!("could not reset after failed start: {reset_err}");
            }
            return Err(e);
        }
        info!("call {call_id} started as {role:?}");
        Ok(call_id)
    }

    /// Close the current attempt and get a fresh transport ready.
    pub async fn hangup(&self) -> Result<(), CallError> {
        let call_id = self.engine.call_id().await;
        self.engine.close().await?;
        self.engine.reset().await?;
        match call_id {
            Some(id) => info!("hung up call {id}"),
            None => info!("hung up"),
        }
        Ok(())
    }

    /// Hang up and start again with the previous role.
    ///
    /// Without an explicit id the initiator opens a new channel. A responder
    /// must be told which channel to join, since the one it was on still holds
    /// the previous offer.
    pub async fn restart(&self, call_id: Option<CallId>) -> Result<CallId, CallError> {
        let Some((role, _)) = self.last_call.read().await.clone() else {
            return Err(CallError::NoActiveCall);
        };
        if role == Role::Responder && call_id.is_none() {
            return Err(CallError::MissingCallId);
        }
        self.hangup().await?;
        self.start_call(role, call_id).await
    }

    /// Flip the microphone; returns whether it is now muted.
    pub fn toggle_mute(&self) -> bool {
        let muted = !self.is_muted();
        for track in self.local_tracks.audio_tracks() {
            track.set_enabled(!muted);
        }
        self.is_muted()
    }

    /// Flip the camera; returns whether it is now enabled.
    pub fn toggle_camera(&self) -> bool {
        let enabled = !self.is_camera_enabled();
        for track in self.local_tracks.video_tracks() {
            track.set_enabled(enabled);
        }
        self.is_camera_enabled()
    }

    pub fn is_muted(&self) -> bool {
        !self.local_tracks.audio_tracks().any(|t| t.is_enabled())
    }

    pub fn is_camera_enabled(&self) -> bool {
        self.local_tracks.video_tracks().any(|t| t.is_enabled())
    }

    pub fn local_tracks(&self) -> &MediaTrackSet {
        &self.local_tracks
    }

    pub async fn remote_tracks(&self) -> MediaTrackSet {
        self.engine.remote_tracks().await
    }

    pub fn state(&self) -> NegotiationState {
        self.engine.state()
    }

    pub fn engine(&self) -> &NegotiationEngine {
        &self.engine
    }

    pub fn events(&self) -> &EventBus {
        self.engine.events()
    }

    pub async fn view(&self) -> CallView {
        CallView {
            call_id: self.engine.call_id().await,
            role: self.engine.role().await,
            state: self.engine.state(),
            muted: self.is_muted(),
            camera_enabled: self.is_camera_enabled(),
            local_tracks: self.local_tracks.ids(),
            remote_tracks: self.engine.remote_tracks().await.ids(),
        }
    }
}
