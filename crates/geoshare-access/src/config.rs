//! Access layer configuration.

use serde::Deserialize;

use crate::index::CoercionPolicy;

/// Configuration for the data access service.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AccessConfig {
    /// Upper bound on the lifetime of a cached response, in seconds.
    /// `None` keeps entries until they are invalidated.
    pub cache_ttl_secs: Option<u64>,
    /// How attribute values are turned into index strings.
    pub coercion: CoercionPolicy,
    /// Prefix of every key written to the cache store.
    pub cache_namespace: String,
}

impl Default for AccessConfig {
    fn default() -> Self {
        Self {
            cache_ttl_secs: None,
            coercion: CoercionPolicy::default(),
            cache_namespace: "geoshare".into(),
        }
    }
}
