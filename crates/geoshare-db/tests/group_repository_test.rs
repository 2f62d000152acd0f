//! Integration tests for the Group repository.

use geoshare_core::error::GeoshareError;
use geoshare_core::models::dataset::CreateDataset;
use geoshare_core::models::group::CreateGroup;
use geoshare_core::models::permission::{CreateDataPermission, Grants, PermissionScope};
use geoshare_core::models::user::CreateUser;
use geoshare_core::repository::{
    DataPermissionRepository, DatasetRepository, EntityStore, GroupRepository, UserRepository,
};
use geoshare_db::SurrealStore;
use surrealdb::Surreal;
use surrealdb::engine::local::{Db, Mem};
use uuid::Uuid;

/// In-memory DB with one dataset and two users.
async fn setup() -> (SurrealStore<Db>, Uuid, Uuid, Uuid) {
    let db = Surreal::new::<Mem>(()).await.unwrap();
    db.use_ns("test").use_db("test").await.unwrap();
    geoshare_db::run_migrations(&db).await.unwrap();

    let store = SurrealStore::new(db);
    let alice = store
        .users()
        .create(CreateUser {
            username: "alice".into(),
        })
        .await
        .unwrap();
    let bob = store
        .users()
        .create(CreateUser {
            username: "bob".into(),
        })
        .await
        .unwrap();
    let dataset = store
        .datasets()
        .create(CreateDataset {
            owner_id: alice.id,
            slug: "ds".into(),
            display_name: "DS".into(),
            auth_required: false,
        })
        .await
        .unwrap();
    (store, dataset.id, alice.id, bob.id)
}

#[tokio::test]
async fn membership_round_trip() {
    let (store, dataset_id, alice, bob) = setup().await;
    let groups = store.groups();
    let editors = groups
        .create(CreateGroup {
            dataset_id,
            name: "editors".into(),
        })
        .await
        .unwrap();

    groups.add_member(dataset_id, editors.id, bob).await.unwrap();
    // Adding twice is a no-op.
    groups.add_member(dataset_id, editors.id, bob).await.unwrap();

    let bob_groups = groups.get_user_groups(dataset_id, bob).await.unwrap();
    assert_eq!(bob_groups.len(), 1);
    assert_eq!(bob_groups[0].id, editors.id);
    assert!(groups.get_user_groups(dataset_id, alice).await.unwrap().is_empty());

    groups.remove_member(dataset_id, editors.id, bob).await.unwrap();
    assert!(groups.get_user_groups(dataset_id, bob).await.unwrap().is_empty());
}

#[tokio::test]
async fn add_member_rejects_unknown_user() {
    let (store, dataset_id, _, _) = setup().await;
    let group = store
        .groups()
        .create(CreateGroup {
            dataset_id,
            name: "editors".into(),
        })
        .await
        .unwrap();

    let err = store
        .groups()
        .add_member(dataset_id, group.id, Uuid::new_v4())
        .await
        .unwrap_err();
    assert!(matches!(err, GeoshareError::NotFound { ref entity, .. } if entity == "user"));
}

#[tokio::test]
async fn delete_removes_memberships_and_rows() {
    let (store, dataset_id, _, bob) = setup().await;
    let group = store
        .groups()
        .create(CreateGroup {
            dataset_id,
            name: "editors".into(),
        })
        .await
        .unwrap();
    store
        .groups()
        .add_member(dataset_id, group.id, bob)
        .await
        .unwrap();
    store
        .permissions()
        .create(CreateDataPermission {
            dataset_id,
            scope: PermissionScope::Group(group.id),
            submission_set: "*".into(),
            grants: Grants::all(),
        })
        .await
        .unwrap();

    store.groups().delete(dataset_id, group.id).await.unwrap();

    assert!(
        store
            .groups()
            .get_user_groups(dataset_id, bob)
            .await
            .unwrap()
            .is_empty()
    );
    assert!(
        store
            .permissions()
            .list_for_scope(dataset_id, PermissionScope::Group(group.id))
            .await
            .unwrap()
            .is_empty()
    );
}
