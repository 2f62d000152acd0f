//! SurrealDB implementation of [`OriginRepository`].

use chrono::{DateTime, Utc};
use geoshare_core::error::GeoshareResult;
use geoshare_core::models::origin::{CreateOrigin, Origin};
use geoshare_core::repository::OriginRepository;
use surrealdb::{Connection, Surreal};
use surrealdb_types::SurrealValue;
use uuid::Uuid;

use crate::error::{DbError, parse_uuid};

#[derive(Debug, SurrealValue)]
struct OriginRowWithId {
    record_id: String,
    dataset_id: String,
    pattern: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl OriginRowWithId {
    fn try_into_origin(self) -> Result<Origin, DbError> {
        Ok(Origin {
            id: parse_uuid("origin", &self.record_id)?,
            dataset_id: parse_uuid("dataset", &self.dataset_id)?,
            pattern: self.pattern,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

/// SurrealDB implementation of the Origin repository.
#[derive(Clone)]
pub struct SurrealOriginRepository<C: Connection> {
    db: Surreal<C>,
}

impl<C: Connection> SurrealOriginRepository<C> {
    pub fn new(db: Surreal<C>) -> Self {
        Self { db }
    }
}

impl<C: Connection> OriginRepository for SurrealOriginRepository<C> {
    async fn create(&self, input: CreateOrigin) -> GeoshareResult<Origin> {
        let id = Uuid::new_v4();

        self.db
            .query(
                "BEGIN TRANSACTION; \
                 CREATE type::record('origin', $id) SET \
                 dataset_id = $dataset_id, pattern = $pattern; \
                 CREATE type::record('data_permission', $permission_id) SET \
                 dataset_id = $dataset_id, scope_kind = 'Origin', scope_id = $id, \
                 submission_set = '*', can_retrieve = true, can_create = true; \
                 COMMIT TRANSACTION;",
            )
            .bind(("id", id.to_string()))
            .bind(("permission_id", Uuid::new_v4().to_string()))
            .bind(("dataset_id", input.dataset_id.to_string()))
            .bind(("pattern", input.pattern))
            .await
            .map_err(DbError::from)?
            .check()
            .map_err(|e| DbError::from_statement("origin", e))?;

        self.get_by_id(input.dataset_id, id).await
    }

    async fn get_by_id(&self, dataset_id: Uuid, id: Uuid) -> GeoshareResult<Origin> {
        let id_str = id.to_string();

        let mut result = self
            .db
            .query(
                "SELECT meta::id(id) AS record_id, * FROM type::record('origin', $id) \
                 WHERE dataset_id = $dataset_id",
            )
            .bind(("id", id_str.clone()))
            .bind(("dataset_id", dataset_id.to_string()))
            .await
            .map_err(DbError::from)?;

        let rows: Vec<OriginRowWithId> = result.take(0).map_err(DbError::from)?;
        let row = rows.into_iter().next().ok_or_else(|| DbError::NotFound {
            entity: "origin".into(),
            id: id_str,
        })?;
        Ok(row.try_into_origin()?)
    }

    async fn delete(&self, dataset_id: Uuid, id: Uuid) -> GeoshareResult<()> {
        self.get_by_id(dataset_id, id).await?;

        self.db
            .query(
                "BEGIN TRANSACTION; \
                 DELETE data_permission WHERE scope_kind = 'Origin' AND scope_id = $id; \
                 DELETE type::record('origin', $id) WHERE dataset_id = $dataset_id; \
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

    async fn list(&self, dataset_id: Uuid) -> GeoshareResult<Vec<Origin>> {
        let mut result = self
            .db
            .query(
                "SELECT meta::id(id) AS record_id, * FROM origin \
                 WHERE dataset_id = $dataset_id ORDER BY created_at ASC",
            )
            .bind(("dataset_id", dataset_id.to_string()))
            .await
            .map_err(DbError::from)?;

        let rows: Vec<OriginRowWithId> = result.take(0).map_err(DbError::from)?;
        Ok(rows
            .into_iter()
            .map(|row| row.try_into_origin())
            .collect::<Result<Vec<_>, DbError>>()?)
    }
}
