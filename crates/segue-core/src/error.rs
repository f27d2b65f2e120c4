//! Error types for segue-core.

use crate::backend::InferenceBackend;
use thiserror::Error;

/// Error type for segue-core operations.
///
/// Recoverable realtime conditions (full dispatch queue, no free slot,
/// missing output samples) are handled by local degradation and logging and
/// never surface here.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Invalid config: {0}")]
    InvalidConfig(String),

    #[error("No processor factory registered for backend {0:?}")]
    BackendUnavailable(InferenceBackend),

    #[error("Backend {0:?} is not covered by the inference config")]
    InvalidBackend(InferenceBackend),

    #[error("Processor error: {0}")]
    Processor(String),

    #[error("Failed to spawn inference worker")]
    WorkerSpawn(#[from] std::io::Error),
}

/// Result type alias.
pub type Result<T> = std::result::Result<T, Error>;
