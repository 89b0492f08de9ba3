use thiserror::Error;

#[derive(Debug, Error)]
pub enum MediaError {
    #[error("capture device unavailable: {0}")]
    Unavailable(String),

    #[error("permission to capture media was denied")]
    PermissionDenied,
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("transport rejected the operation: {0}")]
    Rejected(String),

    #[error("transport is closed")]
    Closed,

    #[error("transport failed: {0}")]
    Failed(String),
}
