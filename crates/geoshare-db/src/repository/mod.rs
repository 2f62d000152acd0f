//! SurrealDB repository implementations.

mod api_key;
mod data_index;
mod dataset;
mod group;
mod origin;
mod permission;
mod thing;
mod user;

pub use api_key::SurrealApiKeyRepository;
pub use data_index::SurrealDataIndexRepository;
pub use dataset::SurrealDatasetRepository;
pub use group::SurrealGroupRepository;
pub use origin::SurrealOriginRepository;
pub use permission::SurrealDataPermissionRepository;
pub use thing::SurrealThingRepository;
pub use user::SurrealUserRepository;
