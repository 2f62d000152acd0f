//! Invalidating response cache.
//!
//! Cached values are JSON documents keyed by dataset, resource path,
//! the parameters that shape the payload, and the requester's identity
//! bucket. Every stored key is also registered in the key set of each
//! scope it depends on (its dataset, and optionally individual things),
//! so a mutation can drop exactly the entries it affects.
//!
//! The cache never fails a request. Backend errors on read count as a
//! miss. A failed invalidation falls back to clearing the whole store;
//! if that fails too the cache is poisoned and every read misses until a
//! clear succeeds.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use geoshare_core::models::identity::Identity;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, error, warn};
use uuid::Uuid;

use crate::config::AccessConfig;
use crate::credential::hash_api_key;
use crate::error::CacheError;
use crate::origin::normalize_origin;

// ---------------------------------------------------------------------------
// Store backend
// ---------------------------------------------------------------------------

/// Key-value backend of the response cache.
pub trait CacheStore: Send + Sync {
    fn get(&self, key: &str) -> impl Future<Output = Result<Option<String>, CacheError>> + Send;

    fn set(
        &self,
        key: &str,
        value: String,
        ttl: Option<Duration>,
    ) -> impl Future<Output = Result<(), CacheError>> + Send;

    fn delete_many(&self, keys: &[String]) -> impl Future<Output = Result<(), CacheError>> + Send;

    /// Adds `member` to the set stored at `set_key`.
    fn add_to_set(
        &self,
        set_key: &str,
        member: &str,
    ) -> impl Future<Output = Result<(), CacheError>> + Send;

    /// Removes the set stored at `set_key` and returns its members.
    fn take_set(&self, set_key: &str) -> impl Future<Output = Result<Vec<String>, CacheError>> + Send;

    fn clear(&self) -> impl Future<Output = Result<(), CacheError>> + Send;
}

#[derive(Debug, Clone)]
struct Entry {
    value: String,
    created_at: DateTime<Utc>,
    ttl: Option<Duration>,
}

impl Entry {
    fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.ttl.is_some_and(|ttl| now - self.created_at >= ttl)
    }
}

/// In-process [`CacheStore`] on concurrent maps.
#[derive(Debug, Default, Clone)]
pub struct MemoryCacheStore {
    entries: Arc<DashMap<String, Entry>>,
    sets: Arc<DashMap<String, HashSet<String>>>,
}

impl MemoryCacheStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live entries, excluding key sets.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl CacheStore for MemoryCacheStore {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        let now = Utc::now();
        let expired = match self.entries.get(key) {
            Some(entry) if !entry.is_expired(now) => return Ok(Some(entry.value.clone())),
            Some(_) => true,
            None => false,
        };
        if expired {
            self.entries.remove(key);
        }
        Ok(None)
    }

    async fn set(&self, key: &str, value: String, ttl: Option<Duration>) -> Result<(), CacheError> {
        self.entries.insert(
            key.to_string(),
            Entry {
                value,
                created_at: Utc::now(),
                ttl,
            },
        );
        Ok(())
    }

    async fn delete_many(&self, keys: &[String]) -> Result<(), CacheError> {
        for key in keys {
            self.entries.remove(key);
        }
        Ok(())
    }

    async fn add_to_set(&self, set_key: &str, member: &str) -> Result<(), CacheError> {
        self.sets
            .entry(set_key.to_string())
            .or_default()
            .insert(member.to_string());
        Ok(())
    }

    async fn take_set(&self, set_key: &str) -> Result<Vec<String>, CacheError> {
        Ok(self
            .sets
            .remove(set_key)
            .map(|(_, members)| members.into_iter().collect())
            .unwrap_or_default())
    }

    async fn clear(&self) -> Result<(), CacheError> {
        self.entries.clear();
        self.sets.clear();
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Keys
// ---------------------------------------------------------------------------

/// The permission-relevant class of a requester.
///
/// Requesters in different classes may get different answers, so they
/// never share cache entries.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum IdentityClass {
    Anonymous,
    User(Uuid),
    /// SHA-256 digest of the presented key.
    ApiKey(String),
    /// Normalized declared origin.
    Origin(String),
}

impl IdentityClass {
    pub fn of(identity: &Identity) -> Self {
        match identity {
            Identity::Anonymous => IdentityClass::Anonymous,
            Identity::User { user_id } => IdentityClass::User(*user_id),
            Identity::ApiKey { key } => IdentityClass::ApiKey(hash_api_key(key)),
            Identity::Origin { origin } => IdentityClass::Origin(normalize_origin(origin)),
        }
    }

    pub fn bucket(&self) -> String {
        match self {
            IdentityClass::Anonymous => "anonymous".into(),
            IdentityClass::User(id) => format!("user:{id}"),
            IdentityClass::ApiKey(digest) => format!("key:{digest}"),
            IdentityClass::Origin(origin) => format!("origin:{origin}"),
        }
    }
}

/// Shape of a cacheable request.
#[derive(Debug, Clone)]
pub struct CacheKey {
    dataset_id: Uuid,
    path: String,
    params: BTreeMap<String, String>,
    identity: IdentityClass,
}

impl CacheKey {
    pub fn new(dataset_id: Uuid, path: impl Into<String>, identity: IdentityClass) -> Self {
        Self {
            dataset_id,
            path: path.into(),
            params: BTreeMap::new(),
            identity,
        }
    }

    /// Adds a parameter that affects the payload.
    pub fn param(mut self, name: &str, value: impl ToString) -> Self {
        self.params.insert(name.to_string(), value.to_string());
        self
    }

    pub fn dataset_id(&self) -> Uuid {
        self.dataset_id
    }

    /// Renders the key under `namespace`. Parameters are sorted, so the
    /// order they were added in does not matter.
    pub fn render(&self, namespace: &str) -> String {
        let params = self
            .params
            .iter()
            .map(|(k, v)| format!("{}={}", escape(k), escape(v)))
            .collect::<Vec<_>>()
            .join("&");
        format!(
            "{namespace}:{}:{}?{params}#{}",
            self.dataset_id,
            self.path,
            self.identity.bucket()
        )
    }
}

fn escape(s: &str) -> String {
    s.replace('%', "%25")
        .replace('&', "%26")
        .replace('=', "%3D")
        .replace('#', "%23")
}

/// A set of cache entries that a mutation can invalidate at once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InvalidationScope {
    Dataset(Uuid),
    Thing(Uuid),
}

impl InvalidationScope {
    fn set_key(&self, namespace: &str) -> String {
        match self {
            InvalidationScope::Dataset(id) => format!("{namespace}:deps:dataset:{id}"),
            InvalidationScope::Thing(id) => format!("{namespace}:deps:thing:{id}"),
        }
    }
}

// ---------------------------------------------------------------------------
// Response cache
// ---------------------------------------------------------------------------

struct Inner<C> {
    store: C,
    namespace: String,
    ttl: Option<Duration>,
    poisoned: AtomicBool,
    /// Open units of work per dataset.
    pending: DashMap<Uuid, usize>,
    /// Invalidation generation per dataset. Bumped when a unit opens,
    /// before its scopes are dropped, and when it ends.
    generations: DashMap<Uuid, u64>,
    /// Bumped by every thing-scoped invalidation.
    thing_generation: AtomicU64,
}

/// Invalidation state observed when a lookup missed.
///
/// A value loaded after the miss may only be stored through
/// [`ResponseCache::put`] while no invalidation touching it has run
/// since.
#[derive(Debug, Clone)]
pub struct CacheTicket {
    key: CacheKey,
    deps: Vec<InvalidationScope>,
    dataset_generation: u64,
    thing_generation: u64,
}

impl CacheTicket {
    pub fn key(&self) -> &CacheKey {
        &self.key
    }
}

/// Outcome of [`ResponseCache::get`].
#[derive(Debug)]
pub enum Lookup<T> {
    Hit(T),
    Miss(CacheTicket),
}

impl<T> Lookup<T> {
    pub fn hit(self) -> Option<T> {
        match self {
            Lookup::Hit(value) => Some(value),
            Lookup::Miss(_) => None,
        }
    }
}

/// Invalidation-aware cache of serialized responses.
pub struct ResponseCache<C: CacheStore> {
    inner: Arc<Inner<C>>,
}

impl<C: CacheStore> Clone for ResponseCache<C> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<C: CacheStore> ResponseCache<C> {
    pub fn new(store: C, config: &AccessConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                store,
                namespace: config.cache_namespace.clone(),
                ttl: config
                    .cache_ttl_secs
                    .and_then(|secs| i64::try_from(secs).ok())
                    .and_then(Duration::try_seconds),
                poisoned: AtomicBool::new(false),
                pending: DashMap::new(),
                generations: DashMap::new(),
                thing_generation: AtomicU64::new(0),
            }),
        }
    }

    pub fn store(&self) -> &C {
        &self.inner.store
    }

    /// The store key for a request shape.
    pub fn key_for(&self, key: &CacheKey) -> String {
        key.render(&self.inner.namespace)
    }

    /// Looks up a cached value.
    ///
    /// `deps` are the scopes the value will be registered under besides
    /// its dataset. A miss carries the ticket that [`ResponseCache::put`]
    /// needs, captured before the store is consulted.
    pub async fn get<T: DeserializeOwned>(
        &self,
        key: &CacheKey,
        deps: &[InvalidationScope],
    ) -> Lookup<T> {
        let ticket = self.ticket(key, deps);
        if self.is_poisoned() {
            self.try_recover().await;
            return Lookup::Miss(ticket);
        }
        if self.has_pending(key.dataset_id) {
            return Lookup::Miss(ticket);
        }

        let rendered = self.key_for(key);
        let raw = match self.inner.store.get(&rendered).await {
            Ok(Some(raw)) => raw,
            Ok(None) => return Lookup::Miss(ticket),
            Err(e) => {
                warn!(key = %rendered, error = %e, "Cache read failed; treating as miss");
                return Lookup::Miss(ticket);
            }
        };

        match decode(&raw) {
            Ok(value) => {
                debug!(key = %rendered, "Cache hit");
                Lookup::Hit(value)
            }
            Err(e) => {
                warn!(key = %rendered, error = %e, "Undecodable cache entry; treating as miss");
                Lookup::Miss(ticket)
            }
        }
    }

    /// Stores a value loaded after the miss that issued `ticket`, and
    /// registers it under its dataset scope and the ticket's deps.
    ///
    /// Nothing is stored if an invalidation of any of those scopes
    /// started after the miss.
    pub async fn put<T: Serialize>(&self, ticket: CacheTicket, value: &T) {
        let key = &ticket.key;
        if self.is_poisoned() || self.has_pending(key.dataset_id) {
            return;
        }
        let rendered = self.key_for(key);
        if !self.is_current(&ticket) {
            debug!(key = %rendered, "Cache write superseded by an invalidation");
            return;
        }

        let raw = match encode(value) {
            Ok(raw) => raw,
            Err(e) => {
                warn!(key = %rendered, error = %e, "Cache value not serializable");
                return;
            }
        };

        if let Err(e) = self.inner.store.set(&rendered, raw, self.inner.ttl).await {
            warn!(key = %rendered, error = %e, "Cache write failed");
            return;
        }

        let scopes = std::iter::once(InvalidationScope::Dataset(key.dataset_id))
            .chain(ticket.deps.iter().copied());
        for scope in scopes {
            let set_key = scope.set_key(&self.inner.namespace);
            if let Err(e) = self.inner.store.add_to_set(&set_key, &rendered).await {
                // An unregistered entry could never be invalidated.
                warn!(key = %rendered, error = %e, "Cache dependency registration failed");
                self.discard(rendered).await;
                return;
            }
        }

        // An invalidation that started while the entry was being written
        // may have taken the key sets before this entry joined them.
        if !self.is_current(&ticket) {
            debug!(key = %rendered, "Cache write superseded while storing");
            self.discard(rendered).await;
        }
    }

    /// Drops every entry registered under `scope`.
    pub async fn invalidate(&self, scope: InvalidationScope) {
        self.invalidate_all(&[scope]).await;
    }

    /// Drops every entry registered under any of `scopes`.
    pub async fn invalidate_all(&self, scopes: &[InvalidationScope]) {
        for scope in scopes {
            self.bump(*scope);
        }

        let mut failed = None;
        for scope in scopes {
            let set_key = scope.set_key(&self.inner.namespace);
            let result = match self.inner.store.take_set(&set_key).await {
                Ok(keys) => self.inner.store.delete_many(&keys).await,
                Err(e) => Err(e),
            };
            if let Err(e) = result {
                failed = Some(e);
                break;
            }
        }

        match failed {
            None => debug!(scopes = scopes.len(), "Cache invalidated"),
            Some(e) => {
                warn!(error = %e, "Cache invalidation failed; clearing the cache");
                if let Err(e) = self.clear().await {
                    error!(error = %e, "Cache clear failed; cache poisoned");
                    self.poison();
                }
            }
        }
    }

    /// Removes every entry. A successful clear lifts poisoning.
    pub async fn clear(&self) -> Result<(), CacheError> {
        self.inner.store.clear().await?;
        self.inner.poisoned.store(false, Ordering::SeqCst);
        Ok(())
    }

    pub fn is_poisoned(&self) -> bool {
        self.inner.poisoned.load(Ordering::SeqCst)
    }

    /// Makes every read miss until [`ResponseCache::clear`] succeeds.
    pub fn poison(&self) {
        self.inner.poisoned.store(true, Ordering::SeqCst);
    }

    /// Opens a unit of work on `dataset_id`. Until it ends, reads of the
    /// dataset bypass the cache.
    pub fn begin(&self, dataset_id: Uuid) -> UnitOfWork<C> {
        *self.inner.pending.entry(dataset_id).or_insert(0) += 1;
        self.bump(InvalidationScope::Dataset(dataset_id));
        UnitOfWork {
            cache: self.clone(),
            dataset_id,
            scopes: Vec::new(),
            finished: false,
        }
    }

    fn ticket(&self, key: &CacheKey, deps: &[InvalidationScope]) -> CacheTicket {
        CacheTicket {
            key: key.clone(),
            deps: deps.to_vec(),
            dataset_generation: self.dataset_generation(key.dataset_id),
            thing_generation: self.inner.thing_generation.load(Ordering::SeqCst),
        }
    }

    fn is_current(&self, ticket: &CacheTicket) -> bool {
        let things_moved = ticket
            .deps
            .iter()
            .any(|scope| matches!(scope, InvalidationScope::Thing(_)))
            && self.inner.thing_generation.load(Ordering::SeqCst) != ticket.thing_generation;
        !things_moved && self.dataset_generation(ticket.key.dataset_id) == ticket.dataset_generation
    }

    fn dataset_generation(&self, dataset_id: Uuid) -> u64 {
        self.inner
            .generations
            .get(&dataset_id)
            .map_or(0, |generation| *generation)
    }

    fn bump(&self, scope: InvalidationScope) {
        match scope {
            InvalidationScope::Dataset(id) => {
                *self.inner.generations.entry(id).or_insert(0) += 1;
            }
            InvalidationScope::Thing(_) => {
                self.inner.thing_generation.fetch_add(1, Ordering::SeqCst);
            }
        }
    }

    async fn discard(&self, rendered: String) {
        if self.inner.store.delete_many(&[rendered]).await.is_err() {
            self.poison();
        }
    }

    fn has_pending(&self, dataset_id: Uuid) -> bool {
        self.inner
            .pending
            .get(&dataset_id)
            .is_some_and(|count| *count > 0)
    }

    fn end_unit(&self, dataset_id: Uuid) {
        self.inner
            .pending
            .remove_if_mut(&dataset_id, |_, count| {
                *count = count.saturating_sub(1);
                *count == 0
            });
        self.bump(InvalidationScope::Dataset(dataset_id));
    }

    async fn try_recover(&self) {
        match self.clear().await {
            Ok(()) => warn!("Poisoned cache cleared"),
            Err(e) => debug!(error = %e, "Poisoned cache still unavailable"),
        }
    }
}

fn encode<T: Serialize>(value: &T) -> Result<String, CacheError> {
    Ok(serde_json::to_string(value)?)
}

fn decode<T: DeserializeOwned>(raw: &str) -> Result<T, CacheError> {
    Ok(serde_json::from_str(raw)?)
}

/// Buffered invalidation for one write operation.
///
/// Scopes queued with [`UnitOfWork::invalidate`] are flushed once by
/// [`UnitOfWork::commit`]. Dropping a unit that has queued scopes
/// without committing it poisons the cache.
pub struct UnitOfWork<C: CacheStore> {
    cache: ResponseCache<C>,
    dataset_id: Uuid,
    scopes: Vec<InvalidationScope>,
    finished: bool,
}

impl<C: CacheStore> UnitOfWork<C> {
    pub fn dataset_id(&self) -> Uuid {
        self.dataset_id
    }

    pub fn invalidate(&mut self, scope: InvalidationScope) {
        if !self.scopes.contains(&scope) {
            self.scopes.push(scope);
        }
    }

    pub fn pending(&self) -> &[InvalidationScope] {
        &self.scopes
    }

    /// Flushes the queued invalidations.
    pub async fn commit(mut self) {
        let scopes = std::mem::take(&mut self.scopes);
        self.cache.invalidate_all(&scopes).await;
        self.finished = true;
        self.cache.end_unit(self.dataset_id);
    }
}

impl<C: CacheStore> Drop for UnitOfWork<C> {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        if !self.scopes.is_empty() {
            warn!(
                dataset_id = %self.dataset_id,
                pending = self.scopes.len(),
                "Unit of work dropped before commit; cache poisoned"
            );
            self.cache.poison();
        }
        self.cache.end_unit(self.dataset_id);
    }
}
