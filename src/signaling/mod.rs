//! Signaling over the shared-document store.
//!
//! Layout of one call, rooted at the configured channel root:
//!
//! ```text
//! calls/{id}                     { offer: {type, sdp}, answer: {type, sdp} }
//! calls/{id}/offerCandidates     candidates discovered by the initiator
//! calls/{id}/answerCandidates    candidates discovered by the responder
//! ```

mod channel;
mod relay;

pub use channel::{ChannelFeed, ChannelSnapshot, SessionChannel};
pub use relay::{CandidateFeed, CandidateRelay};

use crate::store::{Document, StoreError};
use serde::Serialize;

fn to_document<T: Serialize>(value: &T) -> Result<Document, StoreError> {
    Ok(serde_json::from_value(serde_json::to_value(value)?)?)
}
