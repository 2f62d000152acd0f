//! Access layer error types.

use thiserror::Error;

/// Failures of the response cache backend.
///
/// These never reach callers of the data access service: reads degrade
/// to a miss and failed invalidations fall back to a full clear.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache store unavailable: {0}")]
    Unavailable(String),

    #[error("cached value could not be encoded or decoded: {0}")]
    Codec(#[from] serde_json::Error),
}
