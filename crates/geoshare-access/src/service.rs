//! Data access service: permission-gated, cached reads and writes of
//! datasets and their things.
//!
//! Every write runs inside a cache [`UnitOfWork`]: the invalidation
//! scopes are queued before the store is touched and flushed once the
//! operation finishes, whether it succeeded or not.

use std::sync::Arc;

use geoshare_core::error::{GeoshareError, GeoshareResult};
use geoshare_core::models::api_key::{ApiKey, CreateApiKey};
use geoshare_core::models::data_index::DataIndex;
use geoshare_core::models::dataset::{CreateDataset, Dataset, UpdateDataset};
use geoshare_core::models::group::{CreateGroup, Group};
use geoshare_core::models::identity::Identity;
use geoshare_core::models::origin::{CreateOrigin, Origin};
use geoshare_core::models::permission::{
    Action, CreateDataPermission, DataPermission, PermissionScope, UpdateDataPermission,
};
use geoshare_core::models::thing::{
    CreateThing, PLACES_SET, PRIVATE_FIELD_PREFIX, Thing, ThingFilter, ThingKind, UpdateThing,
};
use geoshare_core::repository::{
    ApiKeyRepository, DataPermissionRepository, DatasetRepository, EntityStore, GroupRepository,
    OriginRepository, ThingRepository, UserRepository,
};
use serde_json::Value;
use tracing::{debug, info};
use uuid::Uuid;

use crate::cache::{
    CacheKey, CacheStore, IdentityClass, InvalidationScope, Lookup, ResponseCache,
};
use crate::config::AccessConfig;
use crate::credential::{generate_api_key, hash_api_key};
use crate::index::IndexEngine;
use crate::origin::OriginPattern;
use crate::permission::{PermissionRequest, PermissionResolver};

/// What a read may include beyond public, visible data.
///
/// Asking for any of these makes the read protected.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReadOptions {
    pub include_invisible: bool,
    pub include_private_places: bool,
    pub include_private_fields: bool,
}

impl ReadOptions {
    pub fn is_protected(&self) -> bool {
        self.include_invisible || self.include_private_places || self.include_private_fields
    }

    /// Whether `thing` may appear in the response at all.
    fn shows(&self, thing: &Thing) -> bool {
        (thing.visible || self.include_invisible)
            && (!thing.is_private() || self.include_private_places)
    }

    fn shape(&self, mut thing: Thing) -> Thing {
        if !self.include_private_fields {
            thing
                .data
                .retain(|key, _| !key.starts_with(PRIVATE_FIELD_PREFIX));
        }
        thing
    }

    fn add_params(&self, key: CacheKey) -> CacheKey {
        key.param("invisible", self.include_invisible)
            .param("private_places", self.include_private_places)
            .param("private_fields", self.include_private_fields)
    }
}

/// Equality filter on one top-level data attribute.
#[derive(Debug, Clone)]
pub struct AttributeFilter {
    pub name: String,
    pub value: Value,
}

/// A listing request.
#[derive(Debug, Clone)]
pub struct ThingQuery {
    pub filter: ThingFilter,
    pub attribute: Option<AttributeFilter>,
}

impl ThingQuery {
    pub fn places() -> Self {
        Self {
            filter: ThingFilter::Places,
            attribute: None,
        }
    }

    pub fn submissions(set_name: impl Into<String>, place_id: Option<Uuid>) -> Self {
        Self {
            filter: ThingFilter::Submissions {
                set_name: set_name.into(),
                place_id,
            },
            attribute: None,
        }
    }

    pub fn with_attribute(mut self, name: impl Into<String>, value: Value) -> Self {
        self.attribute = Some(AttributeFilter {
            name: name.into(),
            value,
        });
        self
    }

    fn add_params(&self, mut key: CacheKey) -> CacheKey {
        key = match &self.filter {
            ThingFilter::Places => key.param("set", PLACES_SET),
            ThingFilter::Submissions { set_name, place_id } => {
                let key = key.param("set", set_name);
                match place_id {
                    Some(place_id) => key.param("place", place_id),
                    None => key,
                }
            }
        };
        match &self.attribute {
            Some(attr) => key.param("attr", &attr.name).param("value", &attr.value),
            None => key,
        }
    }
}

/// Fields of a new dataset. The owner is the creating user.
#[derive(Debug, Clone)]
pub struct NewDataset {
    pub slug: String,
    pub display_name: String,
    pub auth_required: bool,
}

/// A freshly issued API key. The raw key is only available here.
#[derive(Debug, Clone)]
pub struct IssuedApiKey {
    pub key: ApiKey,
    pub raw_key: String,
}

/// Data access service.
///
/// Generic over the entity store and the cache backend so that it has
/// no dependency on the database crate.
pub struct DataAccessService<S: EntityStore, C: CacheStore> {
    store: Arc<S>,
    resolver: PermissionResolver<S>,
    indexes: IndexEngine<S>,
    cache: ResponseCache<C>,
}

impl<S: EntityStore, C: CacheStore> Clone for DataAccessService<S, C> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            resolver: self.resolver.clone(),
            indexes: self.indexes.clone(),
            cache: self.cache.clone(),
        }
    }
}

impl<S: EntityStore, C: CacheStore> DataAccessService<S, C> {
    pub fn new(store: S, cache_store: C, config: &AccessConfig) -> Self {
        let store = Arc::new(store);
        Self {
            resolver: PermissionResolver::new(Arc::clone(&store)),
            indexes: IndexEngine::new(Arc::clone(&store), config.coercion),
            cache: ResponseCache::new(cache_store, config),
            store,
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn resolver(&self) -> &PermissionResolver<S> {
        &self.resolver
    }

    pub fn indexes(&self) -> &IndexEngine<S> {
        &self.indexes
    }

    pub fn cache(&self) -> &ResponseCache<C> {
        &self.cache
    }

    // -----------------------------------------------------------------------
    // Permissions
    // -----------------------------------------------------------------------

    pub async fn check_permission(&self, request: &PermissionRequest) -> GeoshareResult<bool> {
        self.resolver.check(request).await
    }

    /// Fails with the 401 or 403 error when the request is denied.
    pub async fn authorize(&self, request: &PermissionRequest) -> GeoshareResult<()> {
        if self.resolver.check(request).await? {
            Ok(())
        } else {
            Err(request.denial())
        }
    }

    // -----------------------------------------------------------------------
    // Datasets
    // -----------------------------------------------------------------------

    /// Creates a dataset owned by the requesting user.
    pub async fn create_dataset(
        &self,
        identity: &Identity,
        input: NewDataset,
    ) -> GeoshareResult<Dataset> {
        let owner_id = match identity {
            Identity::User { user_id } => *user_id,
            Identity::Anonymous => {
                return Err(GeoshareError::AuthenticationRequired {
                    reason: "creating a dataset requires a logged-in user".into(),
                });
            }
            _ => {
                return Err(GeoshareError::PermissionDenied {
                    reason: "only users can own datasets".into(),
                });
            }
        };

        let dataset = self
            .store
            .datasets()
            .create(CreateDataset {
                owner_id,
                slug: input.slug,
                display_name: input.display_name,
                auth_required: input.auth_required,
            })
            .await?;

        info!(
            dataset_id = %dataset.id,
            owner_id = %owner_id,
            slug = %dataset.slug,
            "Dataset created"
        );
        Ok(dataset)
    }

    pub async fn update_dataset(
        &self,
        identity: &Identity,
        dataset_id: Uuid,
        input: UpdateDataset,
    ) -> GeoshareResult<Dataset> {
        self.require_owner(identity, dataset_id).await?;
        self.administer(dataset_id, self.store.datasets().update(dataset_id, input))
            .await
    }

    /// Deletes the dataset and everything in it.
    pub async fn delete_dataset(&self, identity: &Identity, dataset_id: Uuid) -> GeoshareResult<()> {
        self.require_owner(identity, dataset_id).await?;
        self.administer(dataset_id, self.store.datasets().delete(dataset_id))
            .await?;
        info!(dataset_id = %dataset_id, "Dataset deleted");
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Reads
    // -----------------------------------------------------------------------

    /// Reads one thing. A cache hit answers without touching the store.
    pub async fn get_thing(
        &self,
        identity: &Identity,
        dataset_id: Uuid,
        thing_id: Uuid,
        options: ReadOptions,
    ) -> GeoshareResult<Thing> {
        let key = options.add_params(CacheKey::new(
            dataset_id,
            format!("things/{thing_id}"),
            IdentityClass::of(identity),
        ));
        let deps = [InvalidationScope::Thing(thing_id)];
        let ticket = match self.cache.get::<Thing>(&key, &deps).await {
            Lookup::Hit(thing) => return Ok(thing),
            Lookup::Miss(ticket) => ticket,
        };

        // 1. Load the target.
        let thing = self.store.things().get_by_id(dataset_id, thing_id).await?;

        // 2. Gate on its submission set.
        let request = PermissionRequest::new(
            identity.clone(),
            Action::Retrieve,
            dataset_id,
            thing.submission_set(),
        )
        .on_thing(&thing)
        .protected(options.is_protected());
        self.authorize(&request).await?;

        // 3. Hidden things do not exist for this read.
        if !options.shows(&thing) {
            return Err(GeoshareError::NotFound {
                entity: "thing".into(),
                id: thing_id.to_string(),
            });
        }

        let thing = options.shape(thing);
        self.cache.put(ticket, &thing).await;
        Ok(thing)
    }

    /// Lists things, optionally filtered by one indexed attribute.
    ///
    /// An unindexed attribute is filtered by scanning the documents.
    pub async fn list_things(
        &self,
        identity: &Identity,
        dataset_id: Uuid,
        query: &ThingQuery,
        options: ReadOptions,
    ) -> GeoshareResult<Vec<Thing>> {
        let key = options.add_params(query.add_params(CacheKey::new(
            dataset_id,
            "things",
            IdentityClass::of(identity),
        )));
        let ticket = match self.cache.get::<Vec<Thing>>(&key, &[]).await {
            Lookup::Hit(things) => return Ok(things),
            Lookup::Miss(ticket) => ticket,
        };

        let request = PermissionRequest::new(
            identity.clone(),
            Action::Retrieve,
            dataset_id,
            query.filter.submission_set(),
        )
        .protected(options.is_protected());
        self.authorize(&request).await?;

        let mut things = self.store.things().list(dataset_id, &query.filter).await?;

        if let Some(attr) = &query.attribute {
            let ids = match self
                .indexes
                .filter_by_index(dataset_id, &attr.name, &attr.value)
                .await
            {
                Ok(ids) => ids,
                Err(GeoshareError::NoSuchIndex { .. }) => {
                    debug!(dataset_id = %dataset_id, attr_name = %attr.name, "No index; scanning");
                    self.indexes.scan_filter(&things, &attr.name, &attr.value)
                }
                Err(e) => return Err(e),
            };
            things.retain(|t| ids.contains(&t.id));
        }

        let things: Vec<Thing> = things
            .into_iter()
            .filter(|t| options.shows(t))
            .map(|t| options.shape(t))
            .collect();

        self.cache.put(ticket, &things).await;
        Ok(things)
    }

    // -----------------------------------------------------------------------
    // Writes
    // -----------------------------------------------------------------------

    /// Creates a thing. The submitter is always the requesting user.
    pub async fn create_thing(
        &self,
        identity: &Identity,
        mut input: CreateThing,
    ) -> GeoshareResult<Thing> {
        let dataset_id = input.dataset_id;
        let request = PermissionRequest::new(
            identity.clone(),
            Action::Create,
            dataset_id,
            input.submission_set(),
        );
        self.authorize(&request).await?;
        input.submitter_id = identity.user_id();

        let mut unit = self.cache.begin(dataset_id);
        unit.invalidate(InvalidationScope::Dataset(dataset_id));
        if let ThingKind::Submission { place_id, .. } = &input.kind {
            unit.invalidate(InvalidationScope::Thing(*place_id));
        }

        let result = self.store.things().create(input).await;
        if let Ok(thing) = &result {
            self.indexes.on_thing_saved(thing).await;
            debug!(dataset_id = %dataset_id, thing_id = %thing.id, "Thing created");
        }
        unit.commit().await;
        result
    }

    pub async fn update_thing(
        &self,
        identity: &Identity,
        dataset_id: Uuid,
        thing_id: Uuid,
        input: UpdateThing,
    ) -> GeoshareResult<Thing> {
        let thing = self.store.things().get_by_id(dataset_id, thing_id).await?;
        let request = PermissionRequest::new(
            identity.clone(),
            Action::Update,
            dataset_id,
            thing.submission_set(),
        )
        .on_thing(&thing);
        self.authorize(&request).await?;

        let mut unit = self.cache.begin(dataset_id);
        unit.invalidate(InvalidationScope::Dataset(dataset_id));
        unit.invalidate(InvalidationScope::Thing(thing_id));
        if let Some(place_id) = thing.place_id() {
            unit.invalidate(InvalidationScope::Thing(place_id));
        }

        let result = self
            .store
            .things()
            .update(dataset_id, thing_id, input)
            .await;
        if let Ok(updated) = &result {
            self.indexes.on_thing_saved(updated).await;
            debug!(dataset_id = %dataset_id, thing_id = %thing_id, "Thing updated");
        }
        unit.commit().await;
        result
    }

    /// Deletes a thing. Deleting a place also deletes its submissions.
    pub async fn delete_thing(
        &self,
        identity: &Identity,
        dataset_id: Uuid,
        thing_id: Uuid,
    ) -> GeoshareResult<()> {
        let thing = self.store.things().get_by_id(dataset_id, thing_id).await?;
        let request = PermissionRequest::new(
            identity.clone(),
            Action::Destroy,
            dataset_id,
            thing.submission_set(),
        )
        .on_thing(&thing);
        self.authorize(&request).await?;

        let mut unit = self.cache.begin(dataset_id);
        unit.invalidate(InvalidationScope::Dataset(dataset_id));
        unit.invalidate(InvalidationScope::Thing(thing_id));
        if let Some(place_id) = thing.place_id() {
            unit.invalidate(InvalidationScope::Thing(place_id));
        }

        let result = self.store.things().delete(dataset_id, thing_id).await;
        if let Ok(removed) = &result {
            self.indexes.on_thing_deleted(dataset_id, removed).await;
            for id in removed {
                unit.invalidate(InvalidationScope::Thing(*id));
            }
            debug!(
                dataset_id = %dataset_id,
                thing_id = %thing_id,
                removed = removed.len(),
                "Thing deleted"
            );
        }
        unit.commit().await;
        result.map(|_| ())
    }

    // -----------------------------------------------------------------------
    // Administration (owner only)
    // -----------------------------------------------------------------------

    pub async fn create_permission(
        &self,
        identity: &Identity,
        input: CreateDataPermission,
    ) -> GeoshareResult<DataPermission> {
        let dataset_id = input.dataset_id;
        self.require_owner(identity, dataset_id).await?;
        self.require_scope(dataset_id, input.scope).await?;
        self.administer(dataset_id, self.store.permissions().create(input))
            .await
    }

    pub async fn update_permission(
        &self,
        identity: &Identity,
        dataset_id: Uuid,
        permission_id: Uuid,
        input: UpdateDataPermission,
    ) -> GeoshareResult<DataPermission> {
        self.require_owner(identity, dataset_id).await?;
        self.administer(
            dataset_id,
            self.store
                .permissions()
                .update(dataset_id, permission_id, input),
        )
        .await
    }

    pub async fn delete_permission(
        &self,
        identity: &Identity,
        dataset_id: Uuid,
        permission_id: Uuid,
    ) -> GeoshareResult<()> {
        self.require_owner(identity, dataset_id).await?;
        self.administer(
            dataset_id,
            self.store.permissions().delete(dataset_id, permission_id),
        )
        .await
    }

    /// Issues a new key with the default retrieve and create row.
    pub async fn issue_api_key(
        &self,
        identity: &Identity,
        dataset_id: Uuid,
        label: &str,
    ) -> GeoshareResult<IssuedApiKey> {
        self.require_owner(identity, dataset_id).await?;
        let raw_key = generate_api_key();
        let key = self
            .administer(
                dataset_id,
                self.store.api_keys().create(CreateApiKey {
                    dataset_id,
                    key_hash: hash_api_key(&raw_key),
                    label: label.to_string(),
                }),
            )
            .await?;
        info!(dataset_id = %dataset_id, key_id = %key.id, "API key issued");
        Ok(IssuedApiKey { key, raw_key })
    }

    /// Deactivates a key. Cached responses computed for it are dropped.
    pub async fn revoke_api_key(
        &self,
        identity: &Identity,
        dataset_id: Uuid,
        key_id: Uuid,
    ) -> GeoshareResult<ApiKey> {
        self.require_owner(identity, dataset_id).await?;
        let key = self
            .administer(
                dataset_id,
                self.store.api_keys().set_active(dataset_id, key_id, false),
            )
            .await?;
        info!(dataset_id = %dataset_id, key_id = %key_id, "API key revoked");
        Ok(key)
    }

    pub async fn add_origin(
        &self,
        identity: &Identity,
        dataset_id: Uuid,
        pattern: &str,
    ) -> GeoshareResult<Origin> {
        self.require_owner(identity, dataset_id).await?;
        OriginPattern::new(pattern).map_err(|e| GeoshareError::Validation {
            message: format!("invalid origin pattern {pattern:?}: {e}"),
        })?;
        self.administer(
            dataset_id,
            self.store.origins().create(CreateOrigin {
                dataset_id,
                pattern: pattern.to_string(),
            }),
        )
        .await
    }

    pub async fn remove_origin(
        &self,
        identity: &Identity,
        dataset_id: Uuid,
        origin_id: Uuid,
    ) -> GeoshareResult<()> {
        self.require_owner(identity, dataset_id).await?;
        self.administer(dataset_id, self.store.origins().delete(dataset_id, origin_id))
            .await
    }

    pub async fn create_group(
        &self,
        identity: &Identity,
        dataset_id: Uuid,
        name: &str,
    ) -> GeoshareResult<Group> {
        self.require_owner(identity, dataset_id).await?;
        self.administer(
            dataset_id,
            self.store.groups().create(CreateGroup {
                dataset_id,
                name: name.to_string(),
            }),
        )
        .await
    }

    pub async fn delete_group(
        &self,
        identity: &Identity,
        dataset_id: Uuid,
        group_id: Uuid,
    ) -> GeoshareResult<()> {
        self.require_owner(identity, dataset_id).await?;
        self.administer(dataset_id, self.store.groups().delete(dataset_id, group_id))
            .await
    }

    pub async fn add_group_member(
        &self,
        identity: &Identity,
        dataset_id: Uuid,
        group_id: Uuid,
        user_id: Uuid,
    ) -> GeoshareResult<()> {
        self.require_owner(identity, dataset_id).await?;
        // Both ends must exist before the edge is created.
        self.store.groups().get_by_id(dataset_id, group_id).await?;
        self.store.users().get_by_id(user_id).await?;
        self.administer(
            dataset_id,
            self.store
                .groups()
                .add_member(dataset_id, group_id, user_id),
        )
        .await
    }

    pub async fn remove_group_member(
        &self,
        identity: &Identity,
        dataset_id: Uuid,
        group_id: Uuid,
        user_id: Uuid,
    ) -> GeoshareResult<()> {
        self.require_owner(identity, dataset_id).await?;
        self.administer(
            dataset_id,
            self.store
                .groups()
                .remove_member(dataset_id, group_id, user_id),
        )
        .await
    }

    pub async fn add_index(
        &self,
        identity: &Identity,
        dataset_id: Uuid,
        attr_name: &str,
    ) -> GeoshareResult<DataIndex> {
        self.require_owner(identity, dataset_id).await?;
        self.administer(dataset_id, self.indexes.add_index(dataset_id, attr_name))
            .await
    }

    pub async fn remove_index(
        &self,
        identity: &Identity,
        dataset_id: Uuid,
        attr_name: &str,
    ) -> GeoshareResult<()> {
        self.require_owner(identity, dataset_id).await?;
        self.administer(dataset_id, self.indexes.remove_index(dataset_id, attr_name))
            .await
    }

    // -----------------------------------------------------------------------
    // Helpers
    // -----------------------------------------------------------------------

    async fn require_owner(&self, identity: &Identity, dataset_id: Uuid) -> GeoshareResult<Dataset> {
        let dataset = self.store.datasets().get_by_id(dataset_id).await?;
        match identity.user_id() {
            Some(user_id) if dataset.is_owned_by(user_id) => Ok(dataset),
            _ if identity.is_anonymous() => Err(GeoshareError::AuthenticationRequired {
                reason: "dataset administration requires the owner to log in".into(),
            }),
            _ => Err(GeoshareError::PermissionDenied {
                reason: "only the dataset owner may administer it".into(),
            }),
        }
    }

    /// Rejects scopes that do not belong to the dataset.
    async fn require_scope(&self, dataset_id: Uuid, scope: PermissionScope) -> GeoshareResult<()> {
        let found = match scope {
            PermissionScope::Dataset(id) if id == dataset_id => Ok(()),
            PermissionScope::Dataset(_) => Err(GeoshareError::NotFound {
                entity: "dataset".into(),
                id: scope.id().to_string(),
            }),
            PermissionScope::ApiKey(id) => {
                self.store.api_keys().get_by_id(dataset_id, id).await.map(drop)
            }
            PermissionScope::Origin(id) => {
                self.store.origins().get_by_id(dataset_id, id).await.map(drop)
            }
            PermissionScope::Group(id) => {
                self.store.groups().get_by_id(dataset_id, id).await.map(drop)
            }
        };
        match found {
            Err(GeoshareError::NotFound { .. }) => Err(GeoshareError::Validation {
                message: format!(
                    "{} {} is not part of dataset {dataset_id}",
                    scope.kind(),
                    scope.id()
                ),
            }),
            other => other,
        }
    }

    /// Runs an administrative mutation in a unit of work that drops the
    /// dataset's cached responses.
    async fn administer<T>(
        &self,
        dataset_id: Uuid,
        operation: impl Future<Output = GeoshareResult<T>>,
    ) -> GeoshareResult<T> {
        let mut unit = self.cache.begin(dataset_id);
        unit.invalidate(InvalidationScope::Dataset(dataset_id));
        let result = operation.await;
        unit.commit().await;
        result
    }
}
