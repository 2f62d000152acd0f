//! SurrealDB implementation of [`DataPermissionRepository`].

use chrono::{DateTime, Utc};
use geoshare_core::error::GeoshareResult;
use geoshare_core::models::permission::{
    CreateDataPermission, DataPermission, Grants, PermissionScope, UpdateDataPermission,
};
use geoshare_core::repository::DataPermissionRepository;
use surrealdb::{Connection, Surreal};
use surrealdb_types::SurrealValue;
use uuid::Uuid;

use crate::error::{DbError, parse_uuid};

#[derive(Debug, SurrealValue)]
struct PermissionRowWithId {
    record_id: String,
    dataset_id: String,
    scope_kind: String,
    scope_id: String,
    submission_set: String,
    can_retrieve: bool,
    can_create: bool,
    can_update: bool,
    can_destroy: bool,
    can_access_protected: bool,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl PermissionRowWithId {
    fn try_into_permission(self) -> Result<DataPermission, DbError> {
        let scope_id = parse_uuid("scope", &self.scope_id)?;
        let scope = PermissionScope::from_parts(&self.scope_kind, scope_id).ok_or_else(|| {
            DbError::Migration(format!("unknown permission scope: {}", self.scope_kind))
        })?;
        Ok(DataPermission {
            id: parse_uuid("data_permission", &self.record_id)?,
            dataset_id: parse_uuid("dataset", &self.dataset_id)?,
            scope,
            submission_set: self.submission_set,
            grants: Grants {
                can_retrieve: self.can_retrieve,
                can_create: self.can_create,
                can_update: self.can_update,
                can_destroy: self.can_destroy,
                can_access_protected: self.can_access_protected,
            },
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

/// SET clause writing all five grant flags.
const GRANT_SETS: &str = "can_retrieve = $can_retrieve, can_create = $can_create, \
     can_update = $can_update, can_destroy = $can_destroy, \
     can_access_protected = $can_access_protected";

/// SurrealDB implementation of the DataPermission repository.
#[derive(Clone)]
pub struct SurrealDataPermissionRepository<C: Connection> {
    db: Surreal<C>,
}

impl<C: Connection> SurrealDataPermissionRepository<C> {
    pub fn new(db: Surreal<C>) -> Self {
        Self { db }
    }

    async fn select(
        &self,
        filter: &str,
        dataset_id: Uuid,
        extra: Vec<(&'static str, String)>,
    ) -> Result<Vec<DataPermission>, DbError> {
        let query = format!(
            "SELECT meta::id(id) AS record_id, * FROM data_permission \
             WHERE dataset_id = $dataset_id AND {filter} \
             ORDER BY created_at ASC"
        );
        let mut builder = self
            .db
            .query(query)
            .bind(("dataset_id", dataset_id.to_string()));
        for binding in extra {
            builder = builder.bind(binding);
        }

        let mut result = builder.await?;
        let rows: Vec<PermissionRowWithId> = result.take(0)?;
        rows.into_iter()
            .map(|row| row.try_into_permission())
            .collect()
    }
}

impl<C: Connection> DataPermissionRepository for SurrealDataPermissionRepository<C> {
    async fn create(&self, input: CreateDataPermission) -> GeoshareResult<DataPermission> {
        let id = Uuid::new_v4();
        let grants = input.grants;

        let query = format!(
            "CREATE type::record('data_permission', $id) SET \
             dataset_id = $dataset_id, scope_kind = $scope_kind, \
             scope_id = $scope_id, submission_set = $submission_set, {GRANT_SETS}"
        );

        self.db
            .query(query)
            .bind(("id", id.to_string()))
            .bind(("dataset_id", input.dataset_id.to_string()))
            .bind(("scope_kind", input.scope.kind()))
            .bind(("scope_id", input.scope.id().to_string()))
            .bind(("submission_set", input.submission_set))
            .bind(("can_retrieve", grants.can_retrieve))
            .bind(("can_create", grants.can_create))
            .bind(("can_update", grants.can_update))
            .bind(("can_destroy", grants.can_destroy))
            .bind(("can_access_protected", grants.can_access_protected))
            .await
            .map_err(DbError::from)?
            .check()
            .map_err(|e| DbError::from_statement("data_permission", e))?;

        self.get_by_id(input.dataset_id, id).await
    }

    async fn get_by_id(&self, dataset_id: Uuid, id: Uuid) -> GeoshareResult<DataPermission> {
        let id_str = id.to_string();
        let rows = self
            .select(
                "id = type::record('data_permission', $id)",
                dataset_id,
                vec![("id", id_str.clone())],
            )
            .await?;

        rows.into_iter().next().ok_or_else(|| {
            DbError::NotFound {
                entity: "data_permission".into(),
                id: id_str,
            }
            .into()
        })
    }

    async fn update(
        &self,
        dataset_id: Uuid,
        id: Uuid,
        input: UpdateDataPermission,
    ) -> GeoshareResult<DataPermission> {
        self.get_by_id(dataset_id, id).await?;

        let mut sets = Vec::new();
        if input.submission_set.is_some() {
            sets.push("submission_set = $submission_set");
        }
        if input.grants.is_some() {
            sets.push(GRANT_SETS);
        }
        sets.push("updated_at = time::now()");

        let query = format!(
            "UPDATE type::record('data_permission', $id) SET {} \
             WHERE dataset_id = $dataset_id",
            sets.join(", ")
        );

        let mut builder = self
            .db
            .query(&query)
            .bind(("id", id.to_string()))
            .bind(("dataset_id", dataset_id.to_string()));
        if let Some(submission_set) = input.submission_set {
            builder = builder.bind(("submission_set", submission_set));
        }
        if let Some(grants) = input.grants {
            builder = builder
                .bind(("can_retrieve", grants.can_retrieve))
                .bind(("can_create", grants.can_create))
                .bind(("can_update", grants.can_update))
                .bind(("can_destroy", grants.can_destroy))
                .bind(("can_access_protected", grants.can_access_protected));
        }

        builder
            .await
            .map_err(DbError::from)?
            .check()
            .map_err(|e| DbError::from_statement("data_permission", e))?;

        self.get_by_id(dataset_id, id).await
    }

    async fn delete(&self, dataset_id: Uuid, id: Uuid) -> GeoshareResult<()> {
        self.get_by_id(dataset_id, id).await?;

        self.db
            .query(
                "DELETE type::record('data_permission', $id) \
                 WHERE dataset_id = $dataset_id",
            )
            .bind(("id", id.to_string()))
            .bind(("dataset_id", dataset_id.to_string()))
            .await
            .map_err(DbError::from)?
            .check()
            .map_err(|e| DbError::Migration(e.to_string()))?;

        Ok(())
    }

    async fn list_for_scope(
        &self,
        dataset_id: Uuid,
        scope: PermissionScope,
    ) -> GeoshareResult<Vec<DataPermission>> {
        Ok(self
            .select(
                "scope_kind = $scope_kind AND scope_id = $scope_id",
                dataset_id,
                vec![
                    ("scope_kind", scope.kind().to_string()),
                    ("scope_id", scope.id().to_string()),
                ],
            )
            .await?)
    }

    async fn list_for_dataset(&self, dataset_id: Uuid) -> GeoshareResult<Vec<DataPermission>> {
        Ok(self.select("true", dataset_id, Vec::new()).await?)
    }
}
