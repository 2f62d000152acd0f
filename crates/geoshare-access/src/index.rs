//! Attribute indexing over thing data documents.
//!
//! An index declares one top-level key of every thing's data document
//! in a dataset as queryable by equality. Values are stored as strings
//! produced by a [`CoercionPolicy`], and queries are coerced the same
//! way before lookup.
//!
//! Maintenance on save and delete is best-effort: a failure is logged,
//! the dataset is marked stale, and the next lookup rebuilds every index
//! of the dataset before answering.

use std::collections::HashSet;
use std::sync::Arc;

use dashmap::{DashMap, DashSet};
use geoshare_core::error::{GeoshareError, GeoshareResult};
use geoshare_core::models::data_index::DataIndex;
use geoshare_core::models::thing::Thing;
use geoshare_core::repository::{DataIndexRepository, EntityStore, ThingRepository};
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Marks coerced values that must never equal a plain string.
const TYPE_TAG: char = '\u{1f}';

/// How JSON values are turned into index strings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CoercionPolicy {
    /// Everything is compared by its text: `2` equals `"2"` and `true`
    /// equals `"true"`.
    #[default]
    Lenient,
    /// Strings and numbers compare by text; booleans, null and nested
    /// values only equal values of the same type.
    Typed,
}

impl CoercionPolicy {
    pub fn coerce(&self, value: &Value) -> String {
        match (self, value) {
            (_, Value::String(s)) => s.clone(),
            (_, Value::Number(n)) => n.to_string(),
            (CoercionPolicy::Lenient, Value::Null) => "null".into(),
            (CoercionPolicy::Lenient, other) => other.to_string(),
            (CoercionPolicy::Typed, Value::Bool(b)) => format!("{TYPE_TAG}bool:{b}"),
            (CoercionPolicy::Typed, Value::Null) => format!("{TYPE_TAG}null"),
            (CoercionPolicy::Typed, other) => format!("{TYPE_TAG}json:{other}"),
        }
    }

    /// Unindexed equivalent of an index lookup: IDs of the things whose
    /// attribute coerces to the same string as `value`.
    pub fn scan_filter<'a>(
        &self,
        things: impl IntoIterator<Item = &'a Thing>,
        attr_name: &str,
        value: &Value,
    ) -> HashSet<Uuid> {
        let wanted = self.coerce(value);
        things
            .into_iter()
            .filter(|t| t.data.get(attr_name).is_some_and(|v| self.coerce(v) == wanted))
            .map(|t| t.id)
            .collect()
    }
}

/// Maintains and queries the attribute indexes of every dataset.
pub struct IndexEngine<S: EntityStore> {
    store: Arc<S>,
    policy: CoercionPolicy,
    stale: Arc<DashSet<Uuid>>,
    /// Maintenance passes started per dataset.
    maintenance: Arc<DashMap<Uuid, u64>>,
}

impl<S: EntityStore> Clone for IndexEngine<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            policy: self.policy,
            stale: Arc::clone(&self.stale),
            maintenance: Arc::clone(&self.maintenance),
        }
    }
}

impl<S: EntityStore> IndexEngine<S> {
    pub fn new(store: Arc<S>, policy: CoercionPolicy) -> Self {
        Self {
            store,
            policy,
            stale: Arc::new(DashSet::new()),
            maintenance: Arc::new(DashMap::new()),
        }
    }

    pub fn policy(&self) -> CoercionPolicy {
        self.policy
    }

    /// Declares `attr_name` indexed and backfills values for every
    /// existing thing. Adding an existing index returns it unchanged.
    pub async fn add_index(&self, dataset_id: Uuid, attr_name: &str) -> GeoshareResult<DataIndex> {
        let indexes = self.store.indexes();
        match indexes.get_by_attr(dataset_id, attr_name).await {
            Ok(index) => return Ok(index),
            Err(GeoshareError::NotFound { .. }) => {}
            Err(e) => return Err(e),
        }

        let index = match indexes.create(dataset_id, attr_name).await {
            Ok(index) => index,
            // Lost a race with a concurrent add.
            Err(GeoshareError::AlreadyExists { .. }) => {
                return indexes.get_by_attr(dataset_id, attr_name).await;
            }
            Err(e) => return Err(e),
        };

        let things = self.store.things().list_all(dataset_id).await?;
        let mut backfilled = 0usize;
        for thing in &things {
            if let Some(value) = thing.data.get(attr_name) {
                indexes
                    .upsert_value(&index, thing.id, &self.policy.coerce(value))
                    .await?;
                backfilled += 1;
            }
        }

        info!(
            dataset_id = %dataset_id,
            attr_name,
            backfilled,
            "Index added"
        );
        Ok(index)
    }

    /// Drops the index and all of its values.
    pub async fn remove_index(&self, dataset_id: Uuid, attr_name: &str) -> GeoshareResult<()> {
        let index = self.lookup(dataset_id, attr_name).await?;
        self.store.indexes().delete(dataset_id, index.id).await?;
        info!(dataset_id = %dataset_id, attr_name, "Index removed");
        Ok(())
    }

    /// Brings every index of the thing's dataset up to date with it.
    pub async fn on_thing_saved(&self, thing: &Thing) {
        self.note_maintenance(thing.dataset_id);
        if let Err(e) = self.index_thing(thing).await {
            warn!(
                dataset_id = %thing.dataset_id,
                thing_id = %thing.id,
                error = %e,
                "Index maintenance failed; dataset marked stale"
            );
            self.stale.insert(thing.dataset_id);
        }
    }

    /// Drops the indexed values of deleted things.
    pub async fn on_thing_deleted(&self, dataset_id: Uuid, thing_ids: &[Uuid]) {
        self.note_maintenance(dataset_id);
        for thing_id in thing_ids {
            if let Err(e) = self.store.indexes().delete_thing_values(*thing_id).await {
                warn!(
                    dataset_id = %dataset_id,
                    thing_id = %thing_id,
                    error = %e,
                    "Index cleanup failed; dataset marked stale"
                );
                self.stale.insert(dataset_id);
            }
        }
    }

    /// IDs of the things whose `attr_name` equals `value`.
    ///
    /// Fails with [`GeoshareError::NoSuchIndex`] when the attribute is
    /// not indexed.
    pub async fn filter_by_index(
        &self,
        dataset_id: Uuid,
        attr_name: &str,
        value: &Value,
    ) -> GeoshareResult<HashSet<Uuid>> {
        if self.is_stale(dataset_id) {
            self.reindex(dataset_id).await?;
        }

        let index = self.lookup(dataset_id, attr_name).await?;
        let ids = self
            .store
            .indexes()
            .find_things(index.id, &self.policy.coerce(value))
            .await?;
        Ok(ids.into_iter().collect())
    }

    /// Rebuilds every index of the dataset from its things.
    ///
    /// The dataset stays stale if the rebuild fails, or if a save or
    /// delete was maintained while it ran.
    pub async fn reindex(&self, dataset_id: Uuid) -> GeoshareResult<()> {
        // Cleared up front so that a maintenance failure during the
        // rebuild marks the dataset again.
        self.stale.remove(&dataset_id);
        let started = self.maintenance_count(dataset_id);

        if let Err(e) = self.rebuild(dataset_id).await {
            self.stale.insert(dataset_id);
            return Err(e);
        }

        if self.maintenance_count(dataset_id) != started {
            debug!(dataset_id = %dataset_id, "Things changed during reindex; dataset left stale");
            self.stale.insert(dataset_id);
        }
        Ok(())
    }

    /// Writes the current value of every thing, then drops values whose
    /// thing is gone or no longer has the attribute. Lookups during the
    /// rebuild never see an emptied index.
    async fn rebuild(&self, dataset_id: Uuid) -> GeoshareResult<()> {
        let indexes = self.store.indexes().list(dataset_id).await?;
        if indexes.is_empty() {
            return Ok(());
        }

        let things = self.store.things().list_all(dataset_id).await?;
        let mut dropped = 0usize;
        for index in &indexes {
            let mut current = HashSet::new();
            for thing in &things {
                if let Some(value) = thing.data.get(&index.attr_name) {
                    self.store
                        .indexes()
                        .upsert_value(index, thing.id, &self.policy.coerce(value))
                        .await?;
                    current.insert(thing.id);
                }
            }

            for old in self.store.indexes().list_values(index.id).await? {
                if current.contains(&old.thing_id) || self.still_indexed(index, old.thing_id).await? {
                    continue;
                }
                self.store
                    .indexes()
                    .delete_value(index.id, old.thing_id)
                    .await?;
                dropped += 1;
            }
        }

        info!(
            dataset_id = %dataset_id,
            indexes = indexes.len(),
            things = things.len(),
            dropped,
            "Dataset reindexed"
        );
        Ok(())
    }

    /// Whether a value missing from the rebuild snapshot belongs to a
    /// thing saved since, which its own maintenance keeps current.
    async fn still_indexed(&self, index: &DataIndex, thing_id: Uuid) -> GeoshareResult<bool> {
        match self.store.things().get_by_id(index.dataset_id, thing_id).await {
            Ok(thing) => Ok(thing.data.contains_key(&index.attr_name)),
            Err(GeoshareError::NotFound { .. }) => Ok(false),
            Err(e) => Err(e),
        }
    }

    fn note_maintenance(&self, dataset_id: Uuid) {
        *self.maintenance.entry(dataset_id).or_insert(0) += 1;
    }

    fn maintenance_count(&self, dataset_id: Uuid) -> u64 {
        self.maintenance.get(&dataset_id).map_or(0, |count| *count)
    }

    /// See [`CoercionPolicy::scan_filter`].
    pub fn scan_filter<'a>(
        &self,
        things: impl IntoIterator<Item = &'a Thing>,
        attr_name: &str,
        value: &Value,
    ) -> HashSet<Uuid> {
        self.policy.scan_filter(things, attr_name, value)
    }

    pub fn is_stale(&self, dataset_id: Uuid) -> bool {
        self.stale.contains(&dataset_id)
    }

    /// Forces a rebuild before the next lookup in the dataset.
    pub fn mark_stale(&self, dataset_id: Uuid) {
        self.stale.insert(dataset_id);
    }

    async fn lookup(&self, dataset_id: Uuid, attr_name: &str) -> GeoshareResult<DataIndex> {
        match self.store.indexes().get_by_attr(dataset_id, attr_name).await {
            Err(GeoshareError::NotFound { .. }) => Err(GeoshareError::NoSuchIndex {
                dataset_id,
                attr_name: attr_name.into(),
            }),
            other => other,
        }
    }

    async fn index_thing(&self, thing: &Thing) -> GeoshareResult<()> {
        let indexes = self.store.indexes();
        for index in indexes.list(thing.dataset_id).await? {
            match thing.data.get(&index.attr_name) {
                Some(value) => {
                    indexes
                        .upsert_value(&index, thing.id, &self.policy.coerce(value))
                        .await?
                }
                None => indexes.delete_value(index.id, thing.id).await?,
            }
        }
        Ok(())
    }
}
