use crate::calls::NegotiationState;
use crate::error::CallError;
use crate::media::MediaTrack;
use crate::types::call::CallId;
use crate::types::candidate::IceCandidate;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::broadcast;

// The size of the broadcast channel buffer.
const CHANNEL_CAPACITY: usize = 100;

/// A committed negotiation state transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StateChange {
    pub call_id: Option<CallId>,
    pub generation: u64,
    pub from: NegotiationState,
    pub to: NegotiationState,
}

// Macro to generate EventBus fields and constructor
macro_rules! define_event_bus {
    ($(($field:ident, $type:ty)),* $(,)?) => {
        /// Typed event bus with a separate broadcast channel for each engine callback.
        #[derive(Debug)]
        pub struct EventBus {
            $(
                pub $field: broadcast::Sender<$type>,
            )*
        }

        impl EventBus {
            pub fn new() -> Self {
                Self {
                    $(
                        $field: broadcast::channel(CHANNEL_CAPACITY).0,
                    )*
                }
            }
        }
    };
}

define_event_bus! {
    (state_changed, StateChange),
    // Local candidates, emitted as they are trickled to the peer.
    (ice_candidate, Arc<IceCandidate>),
    (track_added, MediaTrack),
    // Failures raised while processing notifications, outside any awaited call.
    (error, Arc<CallError>),
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
