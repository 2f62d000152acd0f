//! Repository trait definitions for data access abstraction.
//!
//! All repository operations are async. Dataset-scoped repositories
//! take a `dataset_id` parameter to enforce tenant isolation.

use uuid::Uuid;

use crate::error::GeoshareResult;
use crate::models::{
    api_key::{ApiKey, CreateApiKey},
    data_index::{DataIndex, IndexedValue},
    dataset::{CreateDataset, Dataset, UpdateDataset},
    group::{CreateGroup, Group},
    origin::{CreateOrigin, Origin},
    permission::{CreateDataPermission, DataPermission, PermissionScope, UpdateDataPermission},
    thing::{CreateThing, Thing, ThingFilter, UpdateThing},
    user::{CreateUser, User},
};

/// Pagination parameters for list queries.
#[derive(Debug, Clone)]
pub struct Pagination {
    pub offset: u64,
    pub limit: u64,
}

impl Default for Pagination {
    fn default() -> Self {
        Self {
            offset: 0,
            limit: 50,
        }
    }
}

/// A paginated result set.
#[derive(Debug, Clone)]
pub struct PaginatedResult<T> {
    pub items: Vec<T>,
    pub total: u64,
    pub offset: u64,
    pub limit: u64,
}

impl<T> PaginatedResult<T> {
    /// Pagination for the page after this one, if there is one.
    pub fn next_page(&self) -> Option<Pagination> {
        let next = self.offset + self.limit;
        (next < self.total).then_some(Pagination {
            offset: next,
            limit: self.limit,
        })
    }
}

// ---------------------------------------------------------------------------
// Global scope
// ---------------------------------------------------------------------------

pub trait UserRepository: Send + Sync {
    fn create(&self, input: CreateUser) -> impl Future<Output = GeoshareResult<User>> + Send;
    fn get_by_id(&self, id: Uuid) -> impl Future<Output = GeoshareResult<User>> + Send;
}

pub trait DatasetRepository: Send + Sync {
    /// Creates the dataset together with its default permission row
    /// (`*`, retrieve only).
    fn create(&self, input: CreateDataset) -> impl Future<Output = GeoshareResult<Dataset>> + Send;
    fn get_by_id(&self, id: Uuid) -> impl Future<Output = GeoshareResult<Dataset>> + Send;
    fn update(
        &self,
        id: Uuid,
        input: UpdateDataset,
    ) -> impl Future<Output = GeoshareResult<Dataset>> + Send;
    /// Deletes the dataset and every record that belongs to it.
    fn delete(&self, id: Uuid) -> impl Future<Output = GeoshareResult<()>> + Send;
    fn list(
        &self,
        pagination: Pagination,
    ) -> impl Future<Output = GeoshareResult<PaginatedResult<Dataset>>> + Send;
}

// ---------------------------------------------------------------------------
// Dataset-scoped repositories
// ---------------------------------------------------------------------------

pub trait ThingRepository: Send + Sync {
    /// Fails with `Validation` if a submission's place is not a place of
    /// the same dataset.
    fn create(&self, input: CreateThing) -> impl Future<Output = GeoshareResult<Thing>> + Send;
    fn get_by_id(
        &self,
        dataset_id: Uuid,
        id: Uuid,
    ) -> impl Future<Output = GeoshareResult<Thing>> + Send;
    fn update(
        &self,
        dataset_id: Uuid,
        id: Uuid,
        input: UpdateThing,
    ) -> impl Future<Output = GeoshareResult<Thing>> + Send;
    /// Deletes the thing (and, for a place, its submissions) along with
    /// their indexed values. Returns the IDs of every removed thing.
    fn delete(
        &self,
        dataset_id: Uuid,
        id: Uuid,
    ) -> impl Future<Output = GeoshareResult<Vec<Uuid>>> + Send;
    fn list(
        &self,
        dataset_id: Uuid,
        filter: &ThingFilter,
    ) -> impl Future<Output = GeoshareResult<Vec<Thing>>> + Send;
    /// Every thing in the dataset, places and submissions alike.
    fn list_all(&self, dataset_id: Uuid) -> impl Future<Output = GeoshareResult<Vec<Thing>>> + Send;
}

pub trait DataPermissionRepository: Send + Sync {
    /// Fails with `AlreadyExists` if the scope already has a row for the
    /// submission set.
    fn create(
        &self,
        input: CreateDataPermission,
    ) -> impl Future<Output = GeoshareResult<DataPermission>> + Send;
    fn get_by_id(
        &self,
        dataset_id: Uuid,
        id: Uuid,
    ) -> impl Future<Output = GeoshareResult<DataPermission>> + Send;
    fn update(
        &self,
        dataset_id: Uuid,
        id: Uuid,
        input: UpdateDataPermission,
    ) -> impl Future<Output = GeoshareResult<DataPermission>> + Send;
    fn delete(&self, dataset_id: Uuid, id: Uuid) -> impl Future<Output = GeoshareResult<()>> + Send;
    fn list_for_scope(
        &self,
        dataset_id: Uuid,
        scope: PermissionScope,
    ) -> impl Future<Output = GeoshareResult<Vec<DataPermission>>> + Send;
    fn list_for_dataset(
        &self,
        dataset_id: Uuid,
    ) -> impl Future<Output = GeoshareResult<Vec<DataPermission>>> + Send;
}

pub trait ApiKeyRepository: Send + Sync {
    /// Creates the key with a default `*` row granting retrieve and create.
    fn create(&self, input: CreateApiKey) -> impl Future<Output = GeoshareResult<ApiKey>> + Send;
    fn get_by_id(
        &self,
        dataset_id: Uuid,
        id: Uuid,
    ) -> impl Future<Output = GeoshareResult<ApiKey>> + Send;
    fn get_by_hash(
        &self,
        dataset_id: Uuid,
        key_hash: &str,
    ) -> impl Future<Output = GeoshareResult<ApiKey>> + Send;
    fn set_active(
        &self,
        dataset_id: Uuid,
        id: Uuid,
        active: bool,
    ) -> impl Future<Output = GeoshareResult<ApiKey>> + Send;
    /// Deletes the key and its permission rows.
    fn delete(&self, dataset_id: Uuid, id: Uuid) -> impl Future<Output = GeoshareResult<()>> + Send;
    fn list(&self, dataset_id: Uuid) -> impl Future<Output = GeoshareResult<Vec<ApiKey>>> + Send;
}

pub trait OriginRepository: Send + Sync {
    /// Creates the origin with a default `*` row granting retrieve and
    /// create.
    fn create(&self, input: CreateOrigin) -> impl Future<Output = GeoshareResult<Origin>> + Send;
    fn get_by_id(
        &self,
        dataset_id: Uuid,
        id: Uuid,
    ) -> impl Future<Output = GeoshareResult<Origin>> + Send;
    /// Deletes the origin and its permission rows.
    fn delete(&self, dataset_id: Uuid, id: Uuid) -> impl Future<Output = GeoshareResult<()>> + Send;
    fn list(&self, dataset_id: Uuid) -> impl Future<Output = GeoshareResult<Vec<Origin>>> + Send;
}

pub trait GroupRepository: Send + Sync {
    fn create(&self, input: CreateGroup) -> impl Future<Output = GeoshareResult<Group>> + Send;
    fn get_by_id(
        &self,
        dataset_id: Uuid,
        id: Uuid,
    ) -> impl Future<Output = GeoshareResult<Group>> + Send;
    /// Deletes the group, its memberships and its permission rows.
    fn delete(&self, dataset_id: Uuid, id: Uuid) -> impl Future<Output = GeoshareResult<()>> + Send;
    fn list(&self, dataset_id: Uuid) -> impl Future<Output = GeoshareResult<Vec<Group>>> + Send;

    /// Add a user to a group. Adding an existing member is a no-op.
    fn add_member(
        &self,
        dataset_id: Uuid,
        group_id: Uuid,
        user_id: Uuid,
    ) -> impl Future<Output = GeoshareResult<()>> + Send;

    fn remove_member(
        &self,
        dataset_id: Uuid,
        group_id: Uuid,
        user_id: Uuid,
    ) -> impl Future<Output = GeoshareResult<()>> + Send;

    /// Groups of this dataset the user belongs to.
    fn get_user_groups(
        &self,
        dataset_id: Uuid,
        user_id: Uuid,
    ) -> impl Future<Output = GeoshareResult<Vec<Group>>> + Send;
}

pub trait DataIndexRepository: Send + Sync {
    /// Fails with `AlreadyExists` if the dataset already indexes the
    /// attribute.
    fn create(
        &self,
        dataset_id: Uuid,
        attr_name: &str,
    ) -> impl Future<Output = GeoshareResult<DataIndex>> + Send;
    fn get_by_attr(
        &self,
        dataset_id: Uuid,
        attr_name: &str,
    ) -> impl Future<Output = GeoshareResult<DataIndex>> + Send;
    fn list(&self, dataset_id: Uuid) -> impl Future<Output = GeoshareResult<Vec<DataIndex>>> + Send;
    /// Deletes the index and all of its values.
    fn delete(&self, dataset_id: Uuid, id: Uuid) -> impl Future<Output = GeoshareResult<()>> + Send;

    /// Sets the value for one (index, thing) pair, replacing any
    /// previous value.
    fn upsert_value(
        &self,
        index: &DataIndex,
        thing_id: Uuid,
        value: &str,
    ) -> impl Future<Output = GeoshareResult<()>> + Send;
    fn delete_value(
        &self,
        index_id: Uuid,
        thing_id: Uuid,
    ) -> impl Future<Output = GeoshareResult<()>> + Send;
    fn delete_thing_values(&self, thing_id: Uuid) -> impl Future<Output = GeoshareResult<()>> + Send;
    fn list_values(
        &self,
        index_id: Uuid,
    ) -> impl Future<Output = GeoshareResult<Vec<IndexedValue>>> + Send;
    /// IDs of the things whose value for the index equals `value`.
    fn find_things(
        &self,
        index_id: Uuid,
        value: &str,
    ) -> impl Future<Output = GeoshareResult<Vec<Uuid>>> + Send;
}

// ---------------------------------------------------------------------------
// Store bundle
// ---------------------------------------------------------------------------

/// The full set of repositories backing one deployment.
///
/// Services are generic over this trait so that they have no
/// dependency on the database crate.
pub trait EntityStore: Send + Sync {
    type Users: UserRepository;
    type Datasets: DatasetRepository;
    type Things: ThingRepository;
    type Permissions: DataPermissionRepository;
    type ApiKeys: ApiKeyRepository;
    type Origins: OriginRepository;
    type Groups: GroupRepository;
    type Indexes: DataIndexRepository;

    fn users(&self) -> &Self::Users;
    fn datasets(&self) -> &Self::Datasets;
    fn things(&self) -> &Self::Things;
    fn permissions(&self) -> &Self::Permissions;
    fn api_keys(&self) -> &Self::ApiKeys;
    fn origins(&self) -> &Self::Origins;
    fn groups(&self) -> &Self::Groups;
    fn indexes(&self) -> &Self::Indexes;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn next_page_stops_at_total() {
        let page = PaginatedResult::<()> {
            items: vec![],
            total: 120,
            offset: 50,
            limit: 50,
        };
        let next = page.next_page().unwrap();
        assert_eq!(next.offset, 100);

        let last = PaginatedResult::<()> {
            items: vec![],
            total: 120,
            offset: 100,
            limit: 50,
        };
        assert!(last.next_page().is_none());
    }
}
