//! Call-related error types.

use crate::calls::InvalidTransition;
use crate::media::{MediaError, TransportError};
use crate::store::StoreError;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CallError {
    /// Local capture failed. Fatal to call start, never retried.
    #[error("local media unavailable: {0}")]
    MediaUnavailable(#[from] MediaError),

    /// A store read or write failed. Transient, the caller may retry.
    #[error("signaling store unavailable: {0}")]
    StoreUnavailable(StoreError),

    #[error("channel already exists: {0}")]
    AlreadyExists(String),

    #[error("channel not found: {0}")]
    NotFound(String),

    /// A notification arrived that the current state cannot accept.
    #[error("protocol violation: {0}")]
    ProtocolViolation(String),

    #[error("transport failure: {0}")]
    TransportFatal(#[from] TransportError),

    #[error("invalid negotiation state transition: {0}")]
    InvalidTransition(#[from] InvalidTransition),

    #[error("a call id is required to join a call")]
    MissingCallId,

    #[error("no call has been started")]
    NoActiveCall,

    #[error("negotiation did not connect within {0:?}")]
    NegotiationTimeout(Duration),

    #[error("negotiation engine stopped")]
    EngineStopped,
}

impl From<StoreError> for CallError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::AlreadyExists(path) => Self::AlreadyExists(path),
            StoreError::NotFound(path) => Self::NotFound(path),
            other => Self::StoreUnavailable(other),
        }
    }
}
