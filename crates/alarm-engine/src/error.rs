//! Error types for the engine facade and its ambient setup.

use alarm_cache::CacheError;
use alarm_health::HealthError;
use alarm_store::{AlarmId, StoreError};
use alarm_sync::SyncError;
use thiserror::Error;

/// Errors from configuration, paths and logging setup.
#[derive(Error, Debug)]
pub enum CoreError {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Path error (e.g., home directory not found)
    #[error("Path error: {0}")]
    Path(String),

    #[error("Logging error: {0}")]
    Logging(#[from] observability::InitError),
}

/// Result type alias using CoreError.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors returned by [`crate::AlarmEngine`] operations.
///
/// Backend failures never surface here: scheduling is asynchronous and its
/// outcome is reported through the record's sync status and the event bus.
#[derive(Error, Debug)]
pub enum EngineError {
    /// Rejected before reaching the store.
    #[error("invalid request: {0}")]
    Validation(String),

    #[error("alarm not found: {0}")]
    NotFound(AlarmId),

    #[error("alarm already exists: {0}")]
    AlreadyExists(AlarmId),

    /// The store could not commit; the operation had no effect.
    #[error("store error: {0}")]
    Store(#[source] StoreError),

    #[error("cache error: {0}")]
    Cache(#[source] CacheError),

    #[error("sync error: {0}")]
    Sync(#[from] SyncError),

    #[error("health configuration error: {0}")]
    Health(#[from] HealthError),

    #[error(transparent)]
    Core(#[from] CoreError),
}

impl From<StoreError> for EngineError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(id) => Self::NotFound(id),
            other => Self::Store(other),
        }
    }
}

impl From<CacheError> for EngineError {
    fn from(err: CacheError) -> Self {
        match err {
            CacheError::NotFound(id) => Self::NotFound(id),
            other => Self::Cache(other),
        }
    }
}

pub type EngineResult<T> = Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_not_found_maps_to_not_found() {
        let err: EngineError = StoreError::NotFound(AlarmId::from("a1")).into();
        assert!(matches!(err, EngineError::NotFound(id) if id.as_str() == "a1"));
    }

    #[test]
    fn store_conflict_stays_a_store_error() {
        let err: EngineError = StoreError::VersionConflict {
            id: AlarmId::from("a1"),
            expected: 1,
            found: 2,
        }
        .into();
        assert!(matches!(err, EngineError::Store(_)));
    }

    #[test]
    fn cache_not_found_maps_to_not_found() {
        let err: EngineError = CacheError::NotFound(AlarmId::from("a1")).into();
        assert!(matches!(err, EngineError::NotFound(_)));
        let err: EngineError = CacheError::InvalidCapacity(0).into();
        assert!(matches!(err, EngineError::Cache(_)));
    }
}
