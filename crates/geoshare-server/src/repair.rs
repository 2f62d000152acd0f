//! Startup index repair.

use geoshare_access::IndexEngine;
use geoshare_core::error::GeoshareResult;
use geoshare_core::repository::{DatasetRepository, EntityStore, Pagination};
use tracing::{info, warn};

/// Rebuilds the indexes of every dataset. A dataset that fails is
/// logged and skipped; it stays stale until its next lookup. Returns the
/// number rebuilt.
pub async fn repair_indexes<S: EntityStore>(
    store: &S,
    engine: &IndexEngine<S>,
) -> GeoshareResult<usize> {
    let mut page = Some(Pagination::default());
    let mut repaired = 0usize;

    while let Some(pagination) = page {
        let result = store.datasets().list(pagination).await?;
        for dataset in &result.items {
            match engine.reindex(dataset.id).await {
                Ok(()) => repaired += 1,
                Err(e) => warn!(dataset_id = %dataset.id, error = %e, "Index repair failed"),
            }
        }
        page = result.next_page();
    }

    info!(datasets = repaired, "Index repair complete");
    Ok(repaired)
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::sync::Arc;

    use geoshare_access::CoercionPolicy;
    use geoshare_core::models::dataset::CreateDataset;
    use geoshare_core::models::thing::CreateThing;
    use geoshare_core::models::user::CreateUser;
    use geoshare_core::repository::{DataIndexRepository, ThingRepository, UserRepository};
    use geoshare_db::SurrealStore;
    use serde_json::json;
    use surrealdb::Surreal;
    use surrealdb::engine::local::Mem;

    use super::*;

    #[tokio::test]
    async fn rebuilds_values_missed_while_down() {
        let db = Surreal::new::<Mem>(()).await.unwrap();
        db.use_ns("test").use_db("test").await.unwrap();
        geoshare_db::run_migrations(&db).await.unwrap();
        let store = Arc::new(SurrealStore::new(db));

        let owner = store
            .users()
            .create(CreateUser {
                username: "owner".into(),
            })
            .await
            .unwrap();
        let mut datasets = Vec::new();
        for slug in ["a", "b"] {
            let dataset = store
                .datasets()
                .create(CreateDataset {
                    owner_id: owner.id,
                    slug: slug.into(),
                    display_name: slug.into(),
                    auth_required: false,
                })
                .await
                .unwrap();
            store.indexes().create(dataset.id, "foo").await.unwrap();
            datasets.push(dataset.id);
        }

        // Written without index maintenance.
        let serde_json::Value::Object(data) = json!({"foo": "bar"}) else {
            unreachable!()
        };
        let thing = store
            .things()
            .create(CreateThing::place(datasets[0], data))
            .await
            .unwrap();

        let engine = IndexEngine::new(Arc::clone(&store), CoercionPolicy::Lenient);
        let repaired = repair_indexes(store.as_ref(), &engine).await.unwrap();
        assert_eq!(repaired, 2);

        let ids = engine
            .filter_by_index(datasets[0], "foo", &json!("bar"))
            .await
            .unwrap();
        assert_eq!(ids, HashSet::from([thing.id]));
    }
}
