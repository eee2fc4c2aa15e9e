use std::time::Duration;

use thiserror::Error;

/// Failures surfaced by flushers and the components they drive.
#[derive(Debug, Error)]
pub enum FlushError {
    #[error("serialization failed: {0}")]
    Serialize(String),

    #[error("compression failed: {0}")]
    Compress(String),

    #[error("sender queue rejected item: {0}")]
    Queue(String),

    #[error("flusher already stopped")]
    AlreadyStopped,

    #[error("operation timed out after {0:?}")]
    Timeout(Duration),

    #[error("operation failed: {0}")]
    InternalFailure(String),
}

pub type FlushResult = Result<(), FlushError>;
