use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("document already exists: {0}")]
    AlreadyExists(String),

    #[error("document not found: {0}")]
    NotFound(String),

    #[error("serialization/deserialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, StoreError>;
