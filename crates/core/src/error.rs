use thiserror::Error;
use uuid::Uuid;

pub type EngineResult<T> = Result<T, EngineError>;

#[derive(Error, Debug)]
pub enum EngineError {
    /// Consumers match on this message text; keep it verbatim.
    #[error("Conversion event {conversion_event_id} not found in touchpoints")]
    ConversionNotFound { conversion_event_id: Uuid },

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Data unavailable: {0}")]
    DataUnavailable(String),

    #[error("Invariant violated: {0}")]
    Invariant(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Coarse classification used by the API layer to pick a user-facing status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    InvalidArgument,
    DataUnavailable,
    Internal,
}

impl EngineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            EngineError::ConversionNotFound { .. } => ErrorKind::NotFound,
            EngineError::InvalidArgument(_) | EngineError::Serialization(_) => {
                ErrorKind::InvalidArgument
            }
            EngineError::DataUnavailable(_) => ErrorKind::DataUnavailable,
            EngineError::Invariant(_) | EngineError::Config(_) => ErrorKind::Internal,
        }
    }
}
