//! Integration tests for the Thing repository.

use geoshare_core::error::GeoshareError;
use geoshare_core::models::dataset::CreateDataset;
use geoshare_core::models::thing::{CreateThing, ThingFilter, UpdateThing};
use geoshare_core::models::user::CreateUser;
use geoshare_core::repository::{DatasetRepository, EntityStore, ThingRepository, UserRepository};
use geoshare_db::SurrealStore;
use serde_json::{Map, Value, json};
use surrealdb::Surreal;
use surrealdb::engine::local::{Db, Mem};
use uuid::Uuid;

async fn setup() -> (SurrealStore<Db>, Uuid) {
    let db = Surreal::new::<Mem>(()).await.unwrap();
    db.use_ns("test").use_db("test").await.unwrap();
    geoshare_db::run_migrations(&db).await.unwrap();

    let store = SurrealStore::new(db);
    let owner = store
        .users()
        .create(CreateUser {
            username: "owner".into(),
        })
        .await
        .unwrap();
    let dataset = store
        .datasets()
        .create(CreateDataset {
            owner_id: owner.id,
            slug: "ds".into(),
            display_name: "DS".into(),
            auth_required: false,
        })
        .await
        .unwrap();
    (store, dataset.id)
}

fn data(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        _ => panic!("test data must be an object"),
    }
}

#[tokio::test]
async fn place_round_trips_its_data_document() {
    let (store, dataset_id) = setup().await;
    let place = store
        .things()
        .create(CreateThing::place(
            dataset_id,
            data(json!({"foo": "bar", "nested": {"n": [1, 2]}})),
        ))
        .await
        .unwrap();

    let fetched = store.things().get_by_id(dataset_id, place.id).await.unwrap();
    assert_eq!(fetched.data["foo"], json!("bar"));
    assert_eq!(fetched.data["nested"], json!({"n": [1, 2]}));
    assert!(fetched.visible);
    assert!(!fetched.is_private());
}

#[tokio::test]
async fn submission_requires_a_place_in_the_same_dataset() {
    let (store, dataset_id) = setup().await;
    let err = store
        .things()
        .create(CreateThing::submission(
            dataset_id,
            Uuid::new_v4(),
            "comments",
            Map::new(),
        ))
        .await
        .unwrap_err();
    assert!(matches!(err, GeoshareError::Validation { .. }));
}

#[tokio::test]
async fn list_filters_by_kind_set_and_place() {
    let (store, dataset_id) = setup().await;
    let things = store.things();
    let p1 = things
        .create(CreateThing::place(dataset_id, Map::new()))
        .await
        .unwrap();
    let p2 = things
        .create(CreateThing::place(dataset_id, Map::new()))
        .await
        .unwrap();
    things
        .create(CreateThing::submission(dataset_id, p1.id, "comments", Map::new()))
        .await
        .unwrap();
    things
        .create(CreateThing::submission(dataset_id, p2.id, "comments", Map::new()))
        .await
        .unwrap();
    things
        .create(CreateThing::submission(dataset_id, p1.id, "support", Map::new()))
        .await
        .unwrap();

    assert_eq!(things.list(dataset_id, &ThingFilter::Places).await.unwrap().len(), 2);

    let all_comments = ThingFilter::Submissions {
        set_name: "comments".into(),
        place_id: None,
    };
    assert_eq!(things.list(dataset_id, &all_comments).await.unwrap().len(), 2);

    let p1_comments = ThingFilter::Submissions {
        set_name: "comments".into(),
        place_id: Some(p1.id),
    };
    let listed = things.list(dataset_id, &p1_comments).await.unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].place_id(), Some(p1.id));

    assert_eq!(things.list_all(dataset_id).await.unwrap().len(), 5);
}

#[tokio::test]
async fn update_replaces_data_and_flags() {
    let (store, dataset_id) = setup().await;
    let place = store
        .things()
        .create(CreateThing::place(dataset_id, data(json!({"foo": "bar"}))))
        .await
        .unwrap();

    let updated = store
        .things()
        .update(
            dataset_id,
            place.id,
            UpdateThing {
                visible: Some(false),
                private: Some(true),
                data: Some(data(json!({"foo": "baz"}))),
            },
        )
        .await
        .unwrap();
    assert!(!updated.visible);
    assert!(updated.is_private());
    assert_eq!(updated.data["foo"], json!("baz"));
}

#[tokio::test]
async fn deleting_a_place_removes_its_submissions() {
    let (store, dataset_id) = setup().await;
    let things = store.things();
    let place = things
        .create(CreateThing::place(dataset_id, Map::new()))
        .await
        .unwrap();
    let comment = things
        .create(CreateThing::submission(dataset_id, place.id, "comments", Map::new()))
        .await
        .unwrap();

    let removed = things.delete(dataset_id, place.id).await.unwrap();
    assert_eq!(removed.len(), 2);
    assert!(removed.contains(&comment.id));

    let err = things.get_by_id(dataset_id, comment.id).await.unwrap_err();
    assert!(matches!(err, GeoshareError::NotFound { .. }));
}

#[tokio::test]
async fn things_are_scoped_to_their_dataset() {
    let (store, dataset_id) = setup().await;
    let place = store
        .things()
        .create(CreateThing::place(dataset_id, Map::new()))
        .await
        .unwrap();

    let err = store
        .things()
        .get_by_id(Uuid::new_v4(), place.id)
        .await
        .unwrap_err();
    assert!(matches!(err, GeoshareError::NotFound { .. }));
    assert_eq!(
        store.things().get_by_id(dataset_id, place.id).await.unwrap().id,
        place.id
    );
}
