//! SurrealDB implementation of [`ApiKeyRepository`].

use chrono::{DateTime, Utc};
use geoshare_core::error::GeoshareResult;
use geoshare_core::models::api_key::{ApiKey, CreateApiKey};
use geoshare_core::repository::ApiKeyRepository;
use surrealdb::{Connection, Surreal};
use surrealdb_types::SurrealValue;
use uuid::Uuid;

use crate::error::{DbError, parse_uuid};

#[derive(Debug, SurrealValue)]
struct ApiKeyRowWithId {
    record_id: String,
    dataset_id: String,
    key_hash: String,
    label: String,
    active: bool,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl ApiKeyRowWithId {
    fn try_into_api_key(self) -> Result<ApiKey, DbError> {
        Ok(ApiKey {
            id: parse_uuid("api_key", &self.record_id)?,
            dataset_id: parse_uuid("dataset", &self.dataset_id)?,
            key_hash: self.key_hash,
            label: self.label,
            active: self.active,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

/// SurrealDB implementation of the ApiKey repository.
#[derive(Clone)]
pub struct SurrealApiKeyRepository<C: Connection> {
    db: Surreal<C>,
}

impl<C: Connection> SurrealApiKeyRepository<C> {
    pub fn new(db: Surreal<C>) -> Self {
        Self { db }
    }

    async fn find(
        &self,
        dataset_id: Uuid,
        filter: &str,
        key: (&'static str, String),
    ) -> Result<ApiKey, DbError> {
        let query = format!(
            "SELECT meta::id(id) AS record_id, * FROM api_key \
             WHERE dataset_id = $dataset_id AND {filter}"
        );
        let id = key.1.clone();
        let mut result = self
            .db
            .query(query)
            .bind(("dataset_id", dataset_id.to_string()))
            .bind(key)
            .await?;

        let rows: Vec<ApiKeyRowWithId> = result.take(0)?;
        rows.into_iter()
            .next()
            .ok_or_else(|| DbError::NotFound {
                entity: "api_key".into(),
                id,
            })?
            .try_into_api_key()
    }
}

impl<C: Connection> ApiKeyRepository for SurrealApiKeyRepository<C> {
    async fn create(&self, input: CreateApiKey) -> GeoshareResult<ApiKey> {
        let id = Uuid::new_v4();

        // New keys may read and submit to every set until told otherwise.
        self.db
            .query(
                "BEGIN TRANSACTION; \
                 CREATE type::record('api_key', $id) SET \
                 dataset_id = $dataset_id, key_hash = $key_hash, label = $label; \
                 CREATE type::record('data_permission', $permission_id) SET \
                 dataset_id = $dataset_id, scope_kind = 'ApiKey', scope_id = $id, \
                 submission_set = '*', can_retrieve = true, can_create = true; \
                 COMMIT TRANSACTION;",
            )
            .bind(("id", id.to_string()))
            .bind(("permission_id", Uuid::new_v4().to_string()))
            .bind(("dataset_id", input.dataset_id.to_string()))
            .bind(("key_hash", input.key_hash))
            .bind(("label", input.label))
            .await
            .map_err(DbError::from)?
            .check()
            .map_err(|e| DbError::from_statement("api_key", e))?;

        self.get_by_id(input.dataset_id, id).await
    }

    async fn get_by_id(&self, dataset_id: Uuid, id: Uuid) -> GeoshareResult<ApiKey> {
        Ok(self
            .find(
                dataset_id,
                "id = type::record('api_key', $id)",
                ("id", id.to_string()),
            )
            .await?)
    }

    async fn get_by_hash(&self, dataset_id: Uuid, key_hash: &str) -> GeoshareResult<ApiKey> {
        Ok(self
            .find(
                dataset_id,
                "key_hash = $key_hash",
                ("key_hash", key_hash.to_string()),
            )
            .await?)
    }

    async fn set_active(&self, dataset_id: Uuid, id: Uuid, active: bool) -> GeoshareResult<ApiKey> {
        self.get_by_id(dataset_id, id).await?;

        self.db
            .query(
                "UPDATE type::record('api_key', $id) SET \
                 active = $active, updated_at = time::now() \
                 WHERE dataset_id = $dataset_id",
            )
            .bind(("id", id.to_string()))
            .bind(("dataset_id", dataset_id.to_string()))
            .bind(("active", active))
            .await
            .map_err(DbError::from)?
            .check()
            .map_err(|e| DbError::Migration(e.to_string()))?;

        self.get_by_id(dataset_id, id).await
    }

    async fn delete(&self, dataset_id: Uuid, id: Uuid) -> GeoshareResult<()> {
        self.get_by_id(dataset_id, id).await?;

        self.db
            .query(
                "BEGIN TRANSACTION; \
                 DELETE data_permission WHERE scope_kind = 'ApiKey' AND scope_id = $id; \
                 DELETE type::record('api_key', $id) WHERE dataset_id = $dataset_id; \
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

    async fn list(&self, dataset_id: Uuid) -> GeoshareResult<Vec<ApiKey>> {
        let mut result = self
            .db
            .query(
                "SELECT meta::id(id) AS record_id, * FROM api_key \
                 WHERE dataset_id = $dataset_id ORDER BY created_at ASC",
            )
            .bind(("dataset_id", dataset_id.to_string()))
            .await
            .map_err(DbError::from)?;

        let rows: Vec<ApiKeyRowWithId> = result.take(0).map_err(DbError::from)?;
        Ok(rows
            .into_iter()
            .map(|row| row.try_into_api_key())
            .collect::<Result<Vec<_>, DbError>>()?)
    }
}
