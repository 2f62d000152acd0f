//! Integration tests for the data access service: permission gating,
//! cached reads and invalidation on every kind of mutation.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use geoshare_access::{
    AccessConfig, CacheError, CacheStore, DataAccessService, MemoryCacheStore, NewDataset,
    ReadOptions, ThingQuery,
};
use geoshare_core::error::GeoshareError;
use geoshare_core::models::identity::Identity;
use geoshare_core::models::permission::{
    CreateDataPermission, Grants, PermissionScope, UpdateDataPermission,
};
use geoshare_core::models::thing::{CreateThing, Thing, UpdateThing};
use geoshare_core::models::user::CreateUser;
use geoshare_core::repository::{
    DataPermissionRepository, EntityStore, ThingRepository, UserRepository,
};
use geoshare_db::SurrealStore;
use serde_json::{Map, Value, json};
use surrealdb::Surreal;
use surrealdb::engine::local::{Db, Mem};
use uuid::Uuid;

/// Entity store that counts every repository access.
struct CountingStore {
    inner: SurrealStore<Db>,
    accesses: Arc<AtomicUsize>,
}

impl CountingStore {
    fn touch(&self) -> &SurrealStore<Db> {
        self.accesses.fetch_add(1, Ordering::SeqCst);
        &self.inner
    }
}

impl EntityStore for CountingStore {
    type Users = <SurrealStore<Db> as EntityStore>::Users;
    type Datasets = <SurrealStore<Db> as EntityStore>::Datasets;
    type Things = <SurrealStore<Db> as EntityStore>::Things;
    type Permissions = <SurrealStore<Db> as EntityStore>::Permissions;
    type ApiKeys = <SurrealStore<Db> as EntityStore>::ApiKeys;
    type Origins = <SurrealStore<Db> as EntityStore>::Origins;
    type Groups = <SurrealStore<Db> as EntityStore>::Groups;
    type Indexes = <SurrealStore<Db> as EntityStore>::Indexes;

    fn users(&self) -> &Self::Users {
        self.touch().users()
    }

    fn datasets(&self) -> &Self::Datasets {
        self.touch().datasets()
    }

    fn things(&self) -> &Self::Things {
        self.touch().things()
    }

    fn permissions(&self) -> &Self::Permissions {
        self.touch().permissions()
    }

    fn api_keys(&self) -> &Self::ApiKeys {
        self.touch().api_keys()
    }

    fn origins(&self) -> &Self::Origins {
        self.touch().origins()
    }

    fn groups(&self) -> &Self::Groups {
        self.touch().groups()
    }

    fn indexes(&self) -> &Self::Indexes {
        self.touch().indexes()
    }
}

struct Fixture<C: CacheStore> {
    service: DataAccessService<CountingStore, C>,
    /// Shares the database with the service but bypasses it.
    backdoor: SurrealStore<Db>,
    /// Repository accesses made by the service.
    accesses: Arc<AtomicUsize>,
    owner: Identity,
    dataset_id: Uuid,
}

async fn setup_with<C: CacheStore>(cache_store: C) -> Fixture<C> {
    let db = Surreal::new::<Mem>(()).await.unwrap();
    db.use_ns("test").use_db("test").await.unwrap();
    geoshare_db::run_migrations(&db).await.unwrap();

    let store = SurrealStore::new(db);
    let backdoor = store.clone();
    let owner = store
        .users()
        .create(CreateUser {
            username: "owner".into(),
        })
        .await
        .unwrap();
    let owner = Identity::User { user_id: owner.id };

    let accesses = Arc::new(AtomicUsize::new(0));
    let counting = CountingStore {
        inner: store,
        accesses: Arc::clone(&accesses),
    };
    let service = DataAccessService::new(counting, cache_store, &AccessConfig::default());
    let dataset = service
        .create_dataset(
            &owner,
            NewDataset {
                slug: "ds".into(),
                display_name: "DS".into(),
                auth_required: false,
            },
        )
        .await
        .unwrap();

    Fixture {
        service,
        backdoor,
        accesses,
        owner,
        dataset_id: dataset.id,
    }
}

async fn setup() -> Fixture<MemoryCacheStore> {
    setup_with(MemoryCacheStore::new()).await
}

fn data(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        _ => panic!("test data must be an object"),
    }
}

impl<C: CacheStore> Fixture<C> {
    fn accesses(&self) -> usize {
        self.accesses.load(Ordering::SeqCst)
    }

    async fn user(&self, name: &str) -> Identity {
        let user = self
            .backdoor
            .users()
            .create(CreateUser {
                username: name.into(),
            })
            .await
            .unwrap();
        Identity::User { user_id: user.id }
    }

    async fn place(&self, value: Value) -> Uuid {
        self.service
            .create_thing(&self.owner, CreateThing::place(self.dataset_id, data(value)))
            .await
            .unwrap()
            .id
    }

    /// Replaces the grants of the dataset's `*` row.
    async fn set_dataset_grants(&self, grants: Grants) {
        let row = self
            .backdoor
            .permissions()
            .list_for_scope(self.dataset_id, PermissionScope::Dataset(self.dataset_id))
            .await
            .unwrap()
            .into_iter()
            .find(|r| r.is_wildcard())
            .unwrap();
        self.service
            .update_permission(
                &self.owner,
                self.dataset_id,
                row.id,
                UpdateDataPermission {
                    grants: Some(grants),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
    }
}

#[tokio::test]
async fn anonymous_put_is_401_and_owner_put_is_visible_to_later_reads() {
    let f = setup().await;
    let id = f.place(json!({"foo": "bar"})).await;
    let anonymous = Identity::Anonymous;
    let read = || {
        f.service
            .get_thing(&anonymous, f.dataset_id, id, ReadOptions::default())
    };
    assert_eq!(read().await.unwrap().data["foo"], json!("bar"));

    let change = UpdateThing {
        data: Some(data(json!({"foo": "baz"}))),
        ..Default::default()
    };
    let err = f
        .service
        .update_thing(&Identity::Anonymous, f.dataset_id, id, change.clone())
        .await
        .unwrap_err();
    assert_eq!(err.status_code(), 401);
    assert_eq!(read().await.unwrap().data["foo"], json!("bar"));

    f.service
        .update_thing(&f.owner, f.dataset_id, id, change)
        .await
        .unwrap();
    assert_eq!(read().await.unwrap().data["foo"], json!("baz"));
}

#[tokio::test]
async fn cache_hit_does_not_touch_the_store() {
    let f = setup().await;
    let id = f.place(json!({"foo": "bar"})).await;
    let anonymous = Identity::Anonymous;
    let query = ThingQuery::places();
    let read = || {
        f.service
            .get_thing(&anonymous, f.dataset_id, id, ReadOptions::default())
    };
    let list = || {
        f.service
            .list_things(&anonymous, f.dataset_id, &query, ReadOptions::default())
    };

    let before = f.accesses();
    read().await.unwrap();
    list().await.unwrap();
    assert!(f.accesses() > before);

    let warm = f.accesses();
    assert_eq!(read().await.unwrap().data["foo"], json!("bar"));
    assert_eq!(list().await.unwrap().len(), 1);
    assert_eq!(f.accesses(), warm);

    // Changed behind the service's back: the cached response still answers.
    f.backdoor
        .things()
        .update(
            f.dataset_id,
            id,
            UpdateThing {
                data: Some(data(json!({"foo": "stale"}))),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(read().await.unwrap().data["foo"], json!("bar"));

    // Any write through the service drops it.
    f.place(json!({})).await;
    assert_eq!(read().await.unwrap().data["foo"], json!("stale"));
}

#[tokio::test]
async fn listings_are_invalidated_by_creates_and_deletes() {
    let f = setup().await;
    let query = ThingQuery::places();
    let anonymous = Identity::Anonymous;
    let list = || {
        f.service
            .list_things(&anonymous, f.dataset_id, &query, ReadOptions::default())
    };
    assert!(list().await.unwrap().is_empty());

    let id = f.place(json!({"n": 1})).await;
    assert_eq!(list().await.unwrap().len(), 1);

    f.service
        .delete_thing(&f.owner, f.dataset_id, id)
        .await
        .unwrap();
    assert!(list().await.unwrap().is_empty());
}

#[tokio::test]
async fn deleting_a_place_removes_its_submissions() {
    let f = setup().await;
    let place = f.place(json!({})).await;
    let comment = f
        .service
        .create_thing(
            &f.owner,
            CreateThing::submission(f.dataset_id, place, "comments", data(json!({"t": "hi"}))),
        )
        .await
        .unwrap();
    f.service
        .get_thing(&Identity::Anonymous, f.dataset_id, comment.id, ReadOptions::default())
        .await
        .unwrap();

    f.service
        .delete_thing(&f.owner, f.dataset_id, place)
        .await
        .unwrap();

    let err = f
        .service
        .get_thing(&Identity::Anonymous, f.dataset_id, comment.id, ReadOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, GeoshareError::NotFound { .. }));
}

#[tokio::test]
async fn attribute_filter_uses_the_index_or_falls_back_to_a_scan() {
    let f = setup().await;
    let a = f.place(json!({"foo": "bar"})).await;
    let b = f.place(json!({"foo": "bar"})).await;
    f.place(json!({"foo": "baz"})).await;

    let query = ThingQuery::places().with_attribute("foo", json!("bar"));
    let ids = |things: Vec<Thing>| {
        let mut ids: Vec<Uuid> = things.into_iter().map(|t| t.id).collect();
        ids.sort();
        ids
    };
    let mut expected = vec![a, b];
    expected.sort();

    let scanned = f
        .service
        .list_things(&Identity::Anonymous, f.dataset_id, &query, ReadOptions::default())
        .await
        .unwrap();
    assert_eq!(ids(scanned), expected);

    f.service
        .add_index(&f.owner, f.dataset_id, "foo")
        .await
        .unwrap();
    let indexed = f
        .service
        .list_things(&Identity::Anonymous, f.dataset_id, &query, ReadOptions::default())
        .await
        .unwrap();
    assert_eq!(ids(indexed), expected);
}

#[tokio::test]
async fn protected_reads_are_gated_and_shaped() {
    let f = setup().await;
    let hidden = f
        .service
        .create_thing(
            &f.owner,
            CreateThing {
                visible: false,
                ..CreateThing::place(f.dataset_id, data(json!({"name": "x"})))
            },
        )
        .await
        .unwrap();
    let public = f.place(json!({"name": "y", "private-email": "a@b.c"})).await;

    let everything = ReadOptions {
        include_invisible: true,
        include_private_places: true,
        include_private_fields: true,
    };

    // Anonymous: hidden things vanish, private fields are stripped and
    // asking for more is a 401.
    let err = f
        .service
        .get_thing(&Identity::Anonymous, f.dataset_id, hidden.id, ReadOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, GeoshareError::NotFound { .. }));
    let thing = f
        .service
        .get_thing(&Identity::Anonymous, f.dataset_id, public, ReadOptions::default())
        .await
        .unwrap();
    assert!(!thing.data.contains_key("private-email"));
    let err = f
        .service
        .list_things(&Identity::Anonymous, f.dataset_id, &ThingQuery::places(), everything)
        .await
        .unwrap_err();
    assert_eq!(err.status_code(), 401);

    // The owner sees it all.
    let things = f
        .service
        .list_things(&f.owner, f.dataset_id, &ThingQuery::places(), everything)
        .await
        .unwrap();
    assert_eq!(things.len(), 2);
    let thing = f
        .service
        .get_thing(&f.owner, f.dataset_id, public, everything)
        .await
        .unwrap();
    assert_eq!(thing.data["private-email"], json!("a@b.c"));
}

#[tokio::test]
async fn revoking_a_key_takes_effect_for_cached_reads() {
    let f = setup().await;
    let id = f.place(json!({"foo": "bar"})).await;
    f.set_dataset_grants(Grants::default()).await;
    let issued = f
        .service
        .issue_api_key(&f.owner, f.dataset_id, "app")
        .await
        .unwrap();
    let key = Identity::ApiKey {
        key: issued.raw_key.clone(),
    };

    let read = || f.service.get_thing(&key, f.dataset_id, id, ReadOptions::default());
    read().await.unwrap();
    read().await.unwrap();
    let err = f
        .service
        .get_thing(&Identity::Anonymous, f.dataset_id, id, ReadOptions::default())
        .await
        .unwrap_err();
    assert_eq!(err.status_code(), 401);

    f.service
        .revoke_api_key(&f.owner, f.dataset_id, issued.key.id)
        .await
        .unwrap();
    assert_eq!(read().await.unwrap_err().status_code(), 403);
}

#[tokio::test]
async fn group_membership_changes_invalidate_cached_reads() {
    let f = setup().await;
    let place = f.place(json!({})).await;
    f.set_dataset_grants(Grants::default()).await;
    let member = f.user("member").await;
    let group = f
        .service
        .create_group(&f.owner, f.dataset_id, "readers")
        .await
        .unwrap();
    f.service
        .create_permission(
            &f.owner,
            CreateDataPermission {
                dataset_id: f.dataset_id,
                scope: PermissionScope::Group(group.id),
                submission_set: "*".into(),
                grants: Grants::read_only(),
            },
        )
        .await
        .unwrap();

    let read = || f.service.get_thing(&member, f.dataset_id, place, ReadOptions::default());
    assert_eq!(read().await.unwrap_err().status_code(), 403);

    let user_id = member.user_id().unwrap();
    f.service
        .add_group_member(&f.owner, f.dataset_id, group.id, user_id)
        .await
        .unwrap();
    read().await.unwrap();

    f.service
        .remove_group_member(&f.owner, f.dataset_id, group.id, user_id)
        .await
        .unwrap();
    assert_eq!(read().await.unwrap_err().status_code(), 403);
}

#[tokio::test]
async fn submitter_can_edit_their_own_submission_only() {
    let f = setup().await;
    let place = f.place(json!({})).await;
    f.service
        .create_permission(
            &f.owner,
            CreateDataPermission {
                dataset_id: f.dataset_id,
                scope: PermissionScope::Dataset(f.dataset_id),
                submission_set: "comments".into(),
                grants: Grants::read_create(),
            },
        )
        .await
        .unwrap();
    let author = f.user("author").await;
    let other = f.user("other").await;

    let comment = f
        .service
        .create_thing(
            &author,
            CreateThing::submission(f.dataset_id, place, "comments", data(json!({"t": "a"}))),
        )
        .await
        .unwrap();
    assert_eq!(comment.submitter_id, author.user_id());

    let change = UpdateThing {
        data: Some(data(json!({"t": "b"}))),
        ..Default::default()
    };
    let err = f
        .service
        .update_thing(&other, f.dataset_id, comment.id, change.clone())
        .await
        .unwrap_err();
    assert_eq!(err.status_code(), 403);
    f.service
        .update_thing(&author, f.dataset_id, comment.id, change)
        .await
        .unwrap();
}

#[tokio::test]
async fn administration_is_owner_only() {
    let f = setup().await;
    let stranger = f.user("stranger").await;

    let err = f
        .service
        .add_index(&Identity::Anonymous, f.dataset_id, "foo")
        .await
        .unwrap_err();
    assert_eq!(err.status_code(), 401);
    let err = f
        .service
        .add_origin(&stranger, f.dataset_id, "*.example.com")
        .await
        .unwrap_err();
    assert_eq!(err.status_code(), 403);
    let err = f
        .service
        .delete_dataset(&stranger, f.dataset_id)
        .await
        .unwrap_err();
    assert_eq!(err.status_code(), 403);
}

#[tokio::test]
async fn permission_scope_must_belong_to_the_dataset() {
    let f = setup().await;
    let err = f
        .service
        .create_permission(
            &f.owner,
            CreateDataPermission {
                dataset_id: f.dataset_id,
                scope: PermissionScope::Group(Uuid::new_v4()),
                submission_set: "*".into(),
                grants: Grants::all(),
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, GeoshareError::Validation { .. }));
}

/// A cache backend whose every operation fails.
struct UnavailableCache;

impl CacheStore for UnavailableCache {
    async fn get(&self, _key: &str) -> Result<Option<String>, CacheError> {
        Err(CacheError::Unavailable("down".into()))
    }

    async fn set(
        &self,
        _key: &str,
        _value: String,
        _ttl: Option<chrono::Duration>,
    ) -> Result<(), CacheError> {
        Err(CacheError::Unavailable("down".into()))
    }

    async fn delete_many(&self, _keys: &[String]) -> Result<(), CacheError> {
        Err(CacheError::Unavailable("down".into()))
    }

    async fn add_to_set(&self, _set_key: &str, _member: &str) -> Result<(), CacheError> {
        Err(CacheError::Unavailable("down".into()))
    }

    async fn take_set(&self, _set_key: &str) -> Result<Vec<String>, CacheError> {
        Err(CacheError::Unavailable("down".into()))
    }

    async fn clear(&self) -> Result<(), CacheError> {
        Err(CacheError::Unavailable("down".into()))
    }
}

#[tokio::test]
async fn unavailable_cache_degrades_to_fresh_reads() {
    let f = setup_with(UnavailableCache).await;
    let id = f.place(json!({"foo": "bar"})).await;
    assert!(f.service.cache().is_poisoned());

    let anonymous = Identity::Anonymous;
    let read = || {
        f.service
            .get_thing(&anonymous, f.dataset_id, id, ReadOptions::default())
    };
    assert_eq!(read().await.unwrap().data["foo"], json!("bar"));

    f.service
        .update_thing(
            &f.owner,
            f.dataset_id,
            id,
            UpdateThing {
                data: Some(data(json!({"foo": "baz"}))),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(read().await.unwrap().data["foo"], json!("baz"));
}

type Hook = Box<dyn FnOnce() + Send>;

/// Memory cache that runs a hook once, right before the next entry is
/// written.
struct HookedCache {
    inner: MemoryCacheStore,
    on_set: Arc<Mutex<Option<Hook>>>,
}

impl CacheStore for HookedCache {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        self.inner.get(key).await
    }

    async fn set(
        &self,
        key: &str,
        value: String,
        ttl: Option<chrono::Duration>,
    ) -> Result<(), CacheError> {
        let hook = self.on_set.lock().unwrap().take();
        if let Some(hook) = hook {
            hook();
        }
        self.inner.set(key, value, ttl).await
    }

    async fn delete_many(&self, keys: &[String]) -> Result<(), CacheError> {
        self.inner.delete_many(keys).await
    }

    async fn add_to_set(&self, set_key: &str, member: &str) -> Result<(), CacheError> {
        self.inner.add_to_set(set_key, member).await
    }

    async fn take_set(&self, set_key: &str) -> Result<Vec<String>, CacheError> {
        self.inner.take_set(set_key).await
    }

    async fn clear(&self) -> Result<(), CacheError> {
        self.inner.clear().await
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn read_overtaken_by_a_write_does_not_cache_the_old_row() {
    let on_set: Arc<Mutex<Option<Hook>>> = Arc::new(Mutex::new(None));
    let f = setup_with(HookedCache {
        inner: MemoryCacheStore::new(),
        on_set: Arc::clone(&on_set),
    })
    .await;
    let id = f.place(json!({"foo": "bar"})).await;

    // The write commits after the read loaded the row but before its
    // result is cached.
    let (service, owner, dataset_id) = (f.service.clone(), f.owner.clone(), f.dataset_id);
    *on_set.lock().unwrap() = Some(Box::new(move || {
        tokio::task::block_in_place(|| {
            tokio::runtime::Handle::current().block_on(async {
                let change = UpdateThing {
                    data: Some(data(json!({"foo": "baz"}))),
                    ..Default::default()
                };
                service
                    .update_thing(&owner, dataset_id, id, change)
                    .await
                    .unwrap();
            })
        })
    }));

    let anonymous = Identity::Anonymous;
    let read = || {
        f.service
            .get_thing(&anonymous, f.dataset_id, id, ReadOptions::default())
    };
    assert_eq!(read().await.unwrap().data["foo"], json!("bar"));
    assert!(on_set.lock().unwrap().is_none());
    assert_eq!(read().await.unwrap().data["foo"], json!("baz"));
}

#[tokio::test]
async fn deleting_the_dataset_removes_everything() {
    let f = setup().await;
    let id = f.place(json!({"foo": "bar"})).await;
    f.service
        .get_thing(&Identity::Anonymous, f.dataset_id, id, ReadOptions::default())
        .await
        .unwrap();

    f.service
        .delete_dataset(&f.owner, f.dataset_id)
        .await
        .unwrap();

    let err = f
        .service
        .get_thing(&Identity::Anonymous, f.dataset_id, id, ReadOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, GeoshareError::NotFound { .. }));
}
