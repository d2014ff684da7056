use thiserror::Error;

/// Fatal engine errors.
///
/// Everything here ends the engine; per-session and per-announce failures
/// are handled internally and never surface as `EngineError`.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("storage error: {0}")]
    Storage(#[from] crate::storage::StorageError),

    #[error("tracker error: {0}")]
    Tracker(#[from] crate::tracker::TrackerError),
}
