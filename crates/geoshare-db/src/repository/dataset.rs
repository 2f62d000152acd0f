//! SurrealDB implementation of [`DatasetRepository`].

use chrono::{DateTime, Utc};
use geoshare_core::error::GeoshareResult;
use geoshare_core::models::dataset::{CreateDataset, Dataset, UpdateDataset};
use geoshare_core::repository::{DatasetRepository, PaginatedResult, Pagination};
use surrealdb::{Connection, Surreal};
use surrealdb_types::SurrealValue;
use uuid::Uuid;

use crate::error::{DbError, parse_uuid};

#[derive(Debug, SurrealValue)]
struct DatasetRowWithId {
    record_id: String,
    owner_id: String,
    slug: String,
    display_name: String,
    auth_required: bool,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl DatasetRowWithId {
    fn try_into_dataset(self) -> Result<Dataset, DbError> {
        Ok(Dataset {
            id: parse_uuid("dataset", &self.record_id)?,
            owner_id: parse_uuid("owner", &self.owner_id)?,
            slug: self.slug,
            display_name: self.display_name,
            auth_required: self.auth_required,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

#[derive(Debug, SurrealValue)]
struct CountRow {
    total: u64,
}

/// SurrealDB implementation of the Dataset repository.
#[derive(Clone)]
pub struct SurrealDatasetRepository<C: Connection> {
    db: Surreal<C>,
}

impl<C: Connection> SurrealDatasetRepository<C> {
    pub fn new(db: Surreal<C>) -> Self {
        Self { db }
    }
}

impl<C: Connection> DatasetRepository for SurrealDatasetRepository<C> {
    async fn create(&self, input: CreateDataset) -> GeoshareResult<Dataset> {
        let id = Uuid::new_v4();

        // Every dataset starts out world-readable.
        self.db
            .query(
                "BEGIN TRANSACTION; \
                 CREATE type::record('dataset', $id) SET \
                 owner_id = $owner_id, slug = $slug, \
                 display_name = $display_name, auth_required = $auth_required; \
                 CREATE type::record('data_permission', $permission_id) SET \
                 dataset_id = $id, scope_kind = 'Dataset', scope_id = $id, \
                 submission_set = '*', can_retrieve = true; \
                 COMMIT TRANSACTION;",
            )
            .bind(("id", id.to_string()))
            .bind(("permission_id", Uuid::new_v4().to_string()))
            .bind(("owner_id", input.owner_id.to_string()))
            .bind(("slug", input.slug))
            .bind(("display_name", input.display_name))
            .bind(("auth_required", input.auth_required))
            .await
            .map_err(DbError::from)?
            .check()
            .map_err(|e| DbError::from_statement("dataset", e))?;

        self.get_by_id(id).await
    }

    async fn get_by_id(&self, id: Uuid) -> GeoshareResult<Dataset> {
        let id_str = id.to_string();

        let mut result = self
            .db
            .query("SELECT meta::id(id) AS record_id, * FROM type::record('dataset', $id)")
            .bind(("id", id_str.clone()))
            .await
            .map_err(DbError::from)?;

        let rows: Vec<DatasetRowWithId> = result.take(0).map_err(DbError::from)?;
        let row = rows.into_iter().next().ok_or_else(|| DbError::NotFound {
            entity: "dataset".into(),
            id: id_str,
        })?;
        Ok(row.try_into_dataset()?)
    }

    async fn update(&self, id: Uuid, input: UpdateDataset) -> GeoshareResult<Dataset> {
        let id_str = id.to_string();

        let mut sets = Vec::new();
        if input.slug.is_some() {
            sets.push("slug = $slug");
        }
        if input.display_name.is_some() {
            sets.push("display_name = $display_name");
        }
        if input.auth_required.is_some() {
            sets.push("auth_required = $auth_required");
        }
        sets.push("updated_at = time::now()");

        let query = format!(
            "UPDATE type::record('dataset', $id) SET {}; \
             SELECT meta::id(id) AS record_id, * FROM type::record('dataset', $id);",
            sets.join(", ")
        );

        let mut builder = self.db.query(&query).bind(("id", id_str.clone()));
        if let Some(slug) = input.slug {
            builder = builder.bind(("slug", slug));
        }
        if let Some(display_name) = input.display_name {
            builder = builder.bind(("display_name", display_name));
        }
        if let Some(auth_required) = input.auth_required {
            builder = builder.bind(("auth_required", auth_required));
        }

        let mut result = builder
            .await
            .map_err(DbError::from)?
            .check()
            .map_err(|e| DbError::from_statement("dataset", e))?;

        let rows: Vec<DatasetRowWithId> = result.take(1).map_err(DbError::from)?;
        let row = rows.into_iter().next().ok_or_else(|| DbError::NotFound {
            entity: "dataset".into(),
            id: id_str,
        })?;
        Ok(row.try_into_dataset()?)
    }

    async fn delete(&self, id: Uuid) -> GeoshareResult<()> {
        self.get_by_id(id).await?;

        self.db
            .query(
                "BEGIN TRANSACTION; \
                 DELETE member_of WHERE out IN \
                     (SELECT VALUE id FROM group WHERE dataset_id = $id); \
                 DELETE indexed_value WHERE dataset_id = $id; \
                 DELETE data_index WHERE dataset_id = $id; \
                 DELETE data_permission WHERE dataset_id = $id; \
                 DELETE api_key WHERE dataset_id = $id; \
                 DELETE origin WHERE dataset_id = $id; \
                 DELETE group WHERE dataset_id = $id; \
                 DELETE thing WHERE dataset_id = $id; \
                 DELETE type::record('dataset', $id); \
                 COMMIT TRANSACTION;",
            )
            .bind(("id", id.to_string()))
            .await
            .map_err(DbError::from)?
            .check()
            .map_err(|e| DbError::Migration(e.to_string()))?;

        Ok(())
    }

    async fn list(&self, pagination: Pagination) -> GeoshareResult<PaginatedResult<Dataset>> {
        let mut count_result = self
            .db
            .query("SELECT count() AS total FROM dataset GROUP ALL")
            .await
            .map_err(DbError::from)?;
        let count_rows: Vec<CountRow> = count_result.take(0).map_err(DbError::from)?;
        let total = count_rows.first().map(|r| r.total).unwrap_or(0);

        let mut result = self
            .db
            .query(
                "SELECT meta::id(id) AS record_id, * FROM dataset \
                 ORDER BY created_at ASC \
                 LIMIT $limit START $offset",
            )
            .bind(("limit", pagination.limit))
            .bind(("offset", pagination.offset))
            .await
            .map_err(DbError::from)?;

        let rows: Vec<DatasetRowWithId> = result.take(0).map_err(DbError::from)?;
        let items = rows
            .into_iter()
            .map(|row| row.try_into_dataset())
            .collect::<Result<Vec<_>, DbError>>()?;

        Ok(PaginatedResult {
            items,
            total,
            offset: pagination.offset,
            limit: pagination.limit,
        })
    }
}
