use grape_core::error::{DecodeError, ValidationError};
use grape_core::CorrelationKey;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DBError {
    #[error(transparent)]
    SQLError(#[from] sqlx::Error),
    #[error(transparent)]
    Migration(#[from] sqlx::migrate::MigrateError),
}

#[derive(Debug, Error)]
pub enum PacketError {
    #[error("Message shorter than its header announces")]
    Truncated,
    #[error("Unsupported version: {0}")]
    InvalidVersion(u8),
    #[error("Invalid token length: {0}")]
    InvalidTokenLength(u8),
    #[error("Invalid option encoding")]
    InvalidOption,
    #[error("Payload marker without payload")]
    EmptyPayload,
    #[error("Empty message with trailing bytes")]
    TrailingBytes,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BlockError {
    #[error("Block {0} arrived out of order")]
    Incomplete(u32),
    #[error("Body exceeds {0} bytes")]
    TooLarge(usize),
    #[error("Invalid block option")]
    InvalidOption,
}

/// Everything a single ingestion request can fail with
#[derive(Debug, Error)]
pub enum IngestError {
    #[error(transparent)]
    Decode(#[from] DecodeError),
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("No transmission announced for {0}")]
    CorrelationNotFound(CorrelationKey),
    #[error("Unknown path: {0}")]
    UnknownPath(std::string::String),
    #[error(transparent)]
    Storage(#[from] DBError),
}

impl IngestError {
    /// Faults caused by the sender, as opposed to the server
    pub fn is_user(&self) -> bool {
        !matches!(self, IngestError::Storage(_))
    }
}
