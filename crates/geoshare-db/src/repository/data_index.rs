//! SurrealDB implementation of [`DataIndexRepository`].
//!
//! Indexed values live in `indexed_value`, one record per (index, thing)
//! pair keyed `<index_id>_<thing_id>` so that re-indexing a thing is a
//! single UPSERT.

use chrono::{DateTime, Utc};
use geoshare_core::error::GeoshareResult;
use geoshare_core::models::data_index::{DataIndex, IndexedValue};
use geoshare_core::repository::DataIndexRepository;
use surrealdb::{Connection, Surreal};
use surrealdb_types::SurrealValue;
use uuid::Uuid;

use crate::error::{DbError, parse_uuid};

#[derive(Debug, SurrealValue)]
struct DataIndexRowWithId {
    record_id: String,
    dataset_id: String,
    attr_name: String,
    created_at: DateTime<Utc>,
}

impl DataIndexRowWithId {
    fn try_into_index(self) -> Result<DataIndex, DbError> {
        Ok(DataIndex {
            id: parse_uuid("data_index", &self.record_id)?,
            dataset_id: parse_uuid("dataset", &self.dataset_id)?,
            attr_name: self.attr_name,
            created_at: self.created_at,
        })
    }
}

#[derive(Debug, SurrealValue)]
struct IndexedValueRow {
    index_id: String,
    thing_id: String,
    value: String,
}

fn value_key(index_id: Uuid, thing_id: Uuid) -> String {
    format!("{index_id}_{thing_id}")
}

/// SurrealDB implementation of the DataIndex repository.
#[derive(Clone)]
pub struct SurrealDataIndexRepository<C: Connection> {
    db: Surreal<C>,
}

impl<C: Connection> SurrealDataIndexRepository<C> {
    pub fn new(db: Surreal<C>) -> Self {
        Self { db }
    }

    async fn find(
        &self,
        dataset_id: Uuid,
        filter: &str,
        key: (&'static str, String),
    ) -> Result<DataIndex, DbError> {
        let query = format!(
            "SELECT meta::id(id) AS record_id, * FROM data_index \
             WHERE dataset_id = $dataset_id AND {filter}"
        );
        let id = key.1.clone();
        let mut result = self
            .db
            .query(query)
            .bind(("dataset_id", dataset_id.to_string()))
            .bind(key)
            .await?;

        let rows: Vec<DataIndexRowWithId> = result.take(0)?;
        rows.into_iter()
            .next()
            .ok_or_else(|| DbError::NotFound {
                entity: "data_index".into(),
                id,
            })?
            .try_into_index()
    }
}

impl<C: Connection> DataIndexRepository for SurrealDataIndexRepository<C> {
    async fn create(&self, dataset_id: Uuid, attr_name: &str) -> GeoshareResult<DataIndex> {
        let id = Uuid::new_v4();

        self.db
            .query(
                "CREATE type::record('data_index', $id) SET \
                 dataset_id = $dataset_id, attr_name = $attr_name",
            )
            .bind(("id", id.to_string()))
            .bind(("dataset_id", dataset_id.to_string()))
            .bind(("attr_name", attr_name.to_string()))
            .await
            .map_err(DbError::from)?
            .check()
            .map_err(|e| DbError::from_statement("data_index", e))?;

        Ok(self
            .find(
                dataset_id,
                "id = type::record('data_index', $id)",
                ("id", id.to_string()),
            )
            .await?)
    }

    async fn get_by_attr(&self, dataset_id: Uuid, attr_name: &str) -> GeoshareResult<DataIndex> {
        Ok(self
            .find(
                dataset_id,
                "attr_name = $attr_name",
                ("attr_name", attr_name.to_string()),
            )
            .await?)
    }

    async fn list(&self, dataset_id: Uuid) -> GeoshareResult<Vec<DataIndex>> {
        let mut result = self
            .db
            .query(
                "SELECT meta::id(id) AS record_id, * FROM data_index \
                 WHERE dataset_id = $dataset_id ORDER BY attr_name ASC",
            )
            .bind(("dataset_id", dataset_id.to_string()))
            .await
            .map_err(DbError::from)?;

        let rows: Vec<DataIndexRowWithId> = result.take(0).map_err(DbError::from)?;
        Ok(rows
            .into_iter()
            .map(|row| row.try_into_index())
            .collect::<Result<Vec<_>, DbError>>()?)
    }

    async fn delete(&self, dataset_id: Uuid, id: Uuid) -> GeoshareResult<()> {
        self.db
            .query(
                "BEGIN TRANSACTION; \
                 DELETE indexed_value WHERE index_id = $id; \
                 DELETE type::record('data_index', $id) WHERE dataset_id = $dataset_id; \
                 COMMIT TRANSACTION;",
            )
            .bind(("id", id.to_string()))
            .bind(("dataset_id", dataset_id.to_string()))
            .await
            .map_err(DbError::from)?
            .check()
            .map_err(|e| DbError::Migration(e.to_string()))?;

        Ok(())
    }

    async fn upsert_value(&self, index: &DataIndex, thing_id: Uuid, value: &str) -> GeoshareResult<()> {
        self.db
            .query(
                "UPSERT type::record('indexed_value', $key) SET \
                 index_id = $index_id, dataset_id = $dataset_id, \
                 thing_id = $thing_id, value = $value",
            )
            .bind(("key", value_key(index.id, thing_id)))
            .bind(("index_id", index.id.to_string()))
            .bind(("dataset_id", index.dataset_id.to_string()))
            .bind(("thing_id", thing_id.to_string()))
            .bind(("value", value.to_string()))
            .await
            .map_err(DbError::from)?
            .check()
            .map_err(|e| DbError::Migration(e.to_string()))?;

        Ok(())
    }

    async fn delete_value(&self, index_id: Uuid, thing_id: Uuid) -> GeoshareResult<()> {
        self.db
            .query("DELETE type::record('indexed_value', $key)")
            .bind(("key", value_key(index_id, thing_id)))
            .await
            .map_err(DbError::from)?
            .check()
            .map_err(|e| DbError::Migration(e.to_string()))?;

        Ok(())
    }

    async fn delete_thing_values(&self, thing_id: Uuid) -> GeoshareResult<()> {
        self.db
            .query("DELETE indexed_value WHERE thing_id = $thing_id")
            .bind(("thing_id", thing_id.to_string()))
            .await
            .map_err(DbError::from)?
            .check()
            .map_err(|e| DbError::Migration(e.to_string()))?;

        Ok(())
    }

    async fn list_values(&self, index_id: Uuid) -> GeoshareResult<Vec<IndexedValue>> {
        let mut result = self
            .db
            .query(
                "SELECT index_id, thing_id, value FROM indexed_value \
                 WHERE index_id = $index_id ORDER BY thing_id ASC",
            )
            .bind(("index_id", index_id.to_string()))
            .await
            .map_err(DbError::from)?;

        let rows: Vec<IndexedValueRow> = result.take(0).map_err(DbError::from)?;
        Ok(rows
            .into_iter()
            .map(|row| {
                Ok(IndexedValue {
                    index_id: parse_uuid("data_index", &row.index_id)?,
                    thing_id: parse_uuid("thing", &row.thing_id)?,
                    value: row.value,
                })
            })
            .collect::<Result<Vec<_>, DbError>>()?)
    }

    async fn find_things(&self, index_id: Uuid, value: &str) -> GeoshareResult<Vec<Uuid>> {
        let mut result = self
            .db
            .query(
                "SELECT VALUE thing_id FROM indexed_value \
                 WHERE index_id = $index_id AND value = $value",
            )
            .bind(("index_id", index_id.to_string()))
            .bind(("value", value.to_string()))
            .await
            .map_err(DbError::from)?;

        let ids: Vec<String> = result.take(0).map_err(DbError::from)?;
        Ok(ids
            .iter()
            .map(|id| parse_uuid("thing", id))
            .collect::<Result<Vec<_>, DbError>>()?)
    }
}
