//! [`EntityStore`] backed by a single SurrealDB connection.

use geoshare_core::repository::EntityStore;
use surrealdb::{Connection, Surreal};

use crate::repository::{
    SurrealApiKeyRepository, SurrealDataIndexRepository, SurrealDataPermissionRepository,
    SurrealDatasetRepository, SurrealGroupRepository, SurrealOriginRepository,
    SurrealThingRepository, SurrealUserRepository,
};

/// All GeoShare repositories over one SurrealDB client.
#[derive(Clone)]
pub struct SurrealStore<C: Connection> {
    users: SurrealUserRepository<C>,
    datasets: SurrealDatasetRepository<C>,
    things: SurrealThingRepository<C>,
    permissions: SurrealDataPermissionRepository<C>,
    api_keys: SurrealApiKeyRepository<C>,
    origins: SurrealOriginRepository<C>,
    groups: SurrealGroupRepository<C>,
    indexes: SurrealDataIndexRepository<C>,
}

impl<C: Connection> SurrealStore<C> {
    pub fn new(db: Surreal<C>) -> Self {
        Self {
            users: SurrealUserRepository::new(db.clone()),
            datasets: SurrealDatasetRepository::new(db.clone()),
            things: SurrealThingRepository::new(db.clone()),
            permissions: SurrealDataPermissionRepository::new(db.clone()),
            api_keys: SurrealApiKeyRepository::new(db.clone()),
            origins: SurrealOriginRepository::new(db.clone()),
            groups: SurrealGroupRepository::new(db.clone()),
            indexes: SurrealDataIndexRepository::new(db),
        }
    }
}

impl<C: Connection> EntityStore for SurrealStore<C> {
    type Users = SurrealUserRepository<C>;
    type Datasets = SurrealDatasetRepository<C>;
    type Things = SurrealThingRepository<C>;
    type Permissions = SurrealDataPermissionRepository<C>;
    type ApiKeys = SurrealApiKeyRepository<C>;
    type Origins = SurrealOriginRepository<C>;
    type Groups = SurrealGroupRepository<C>;
    type Indexes = SurrealDataIndexRepository<C>;

    fn users(&self) -> &Self::Users {
        &self.users
    }

    fn datasets(&self) -> &Self::Datasets {
        &self.datasets
    }

    fn things(&self) -> &Self::Things {
        &self.things
    }

    fn permissions(&self) -> &Self::Permissions {
        &self.permissions
    }

    fn api_keys(&self) -> &Self::ApiKeys {
        &self.api_keys
    }

    fn origins(&self) -> &Self::Origins {
        &self.origins
    }

    fn groups(&self) -> &Self::Groups {
        &self.groups
    }

    fn indexes(&self) -> &Self::Indexes {
        &self.indexes
    }
}
