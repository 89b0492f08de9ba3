//! Two-party call negotiation.
//!
//! # Architecture
//!
//! - [`NegotiationState`]: the state machine, a pure transition function
//! - [`NegotiationEngine`]: drives one attempt's offer/answer and candidate
//!   exchange through a single-consumer queue
//! - [`CallSessionController`]: local media, start/hangup/restart and the
//!   [`CallView`] projection for a rendering layer
//!
//! # Handshake
//!
//! The initiator creates the call document, writes its offer and waits for an
//! answer. The responder reads the offer, answers it, and both sides trickle
//! candidates into their own sub-collection while reading the other's.

mod controller;
mod engine;
mod state;

pub use controller::{CallSessionController, CallView};
pub use engine::NegotiationEngine;
pub use state::{InvalidTransition, NegotiationState, NegotiationTransition};
