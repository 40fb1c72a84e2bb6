//! # Alarm Cache
//!
//! Memoizes derived alarm data (next fire time, content locator) keyed by a
//! content fingerprint. Entries self-evict when their alarm changes or goes away.

mod cache;
mod fingerprint;

pub use cache::{
    derive, CacheEntry, CacheStats, DerivedAlarm, DerivedCache, RecordSource, DEFAULT_SHARDS,
};
pub use fingerprint::Fingerprint;

use alarm_store::AlarmId;

#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("cache capacity must be positive, got {0}")]
    InvalidCapacity(usize),

    #[error("alarm not found: {0}")]
    NotFound(AlarmId),
}

pub type CacheResult<T> = Result<T, CacheError>;
