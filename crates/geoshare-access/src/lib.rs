//! GeoShare Access: permission resolution, attribute indexing and the
//! invalidating response cache, tied together by the data access
//! service.

pub mod cache;
pub mod config;
pub mod credential;
pub mod error;
pub mod index;
pub mod origin;
pub mod permission;
pub mod service;

pub use cache::{
    CacheKey, CacheStore, CacheTicket, IdentityClass, InvalidationScope, Lookup,
    MemoryCacheStore, ResponseCache, UnitOfWork,
};
pub use config::AccessConfig;
pub use error::CacheError;
pub use index::{CoercionPolicy, IndexEngine};
pub use permission::{PermissionRequest, PermissionResolver, ScopeDecision, decide};
pub use service::{
    AttributeFilter, DataAccessService, IssuedApiKey, NewDataset, ReadOptions, ThingQuery,
};
