//! SurrealDB implementation of [`GroupRepository`].

use chrono::{DateTime, Utc};
use geoshare_core::error::GeoshareResult;
use geoshare_core::models::group::{CreateGroup, Group};
use geoshare_core::repository::GroupRepository;
use surrealdb::{Connection, Surreal};
use surrealdb_types::SurrealValue;
use uuid::Uuid;

use crate::error::{DbError, parse_uuid};

#[derive(Debug, SurrealValue)]
struct GroupRowWithId {
    record_id: String,
    dataset_id: String,
    name: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl GroupRowWithId {
    fn try_into_group(self) -> Result<Group, DbError> {
        Ok(Group {
            id: parse_uuid("group", &self.record_id)?,
            dataset_id: parse_uuid("dataset", &self.dataset_id)?,
            name: self.name,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

/// Row struct for count queries.
#[derive(Debug, SurrealValue)]
struct CountRow {
    total: u64,
}

fn collect_groups(rows: Vec<GroupRowWithId>) -> Result<Vec<Group>, DbError> {
    rows.into_iter().map(|row| row.try_into_group()).collect()
}

/// SurrealDB implementation of the Group repository.
#[derive(Clone)]
pub struct SurrealGroupRepository<C: Connection> {
    db: Surreal<C>,
}

impl<C: Connection> SurrealGroupRepository<C> {
    pub fn new(db: Surreal<C>) -> Self {
        Self { db }
    }
}

impl<C: Connection> GroupRepository for SurrealGroupRepository<C> {
    async fn create(&self, input: CreateGroup) -> GeoshareResult<Group> {
        let id = Uuid::new_v4();

        self.db
            .query(
                "CREATE type::record('group', $id) SET \
                 dataset_id = $dataset_id, name = $name",
            )
            .bind(("id", id.to_string()))
            .bind(("dataset_id", input.dataset_id.to_string()))
            .bind(("name", input.name))
            .await
            .map_err(DbError::from)?
            .check()
            .map_err(|e| DbError::from_statement("group", e))?;

        self.get_by_id(input.dataset_id, id).await
    }

    async fn get_by_id(&self, dataset_id: Uuid, id: Uuid) -> GeoshareResult<Group> {
        let id_str = id.to_string();

        let mut result = self
            .db
            .query(
                "SELECT meta::id(id) AS record_id, * FROM type::record('group', $id) \
                 WHERE dataset_id = $dataset_id",
            )
            .bind(("id", id_str.clone()))
            .bind(("dataset_id", dataset_id.to_string()))
            .await
            .map_err(DbError::from)?;

        let rows: Vec<GroupRowWithId> = result.take(0).map_err(DbError::from)?;
        let row = rows.into_iter().next().ok_or_else(|| DbError::NotFound {
            entity: "group".into(),
            id: id_str,
        })?;
        Ok(row.try_into_group()?)
    }

    async fn delete(&self, dataset_id: Uuid, id: Uuid) -> GeoshareResult<()> {
        self.get_by_id(dataset_id, id).await?;

        // Membership edges and permission rows go with the group.
        self.db
            .query(
                "BEGIN TRANSACTION; \
                 DELETE member_of WHERE out = type::record('group', $id); \
                 DELETE data_permission WHERE scope_kind = 'Group' AND scope_id = $id; \
                 DELETE type::record('group', $id) WHERE dataset_id = $dataset_id; \
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

    async fn list(&self, dataset_id: Uuid) -> GeoshareResult<Vec<Group>> {
        let mut result = self
            .db
            .query(
                "SELECT meta::id(id) AS record_id, * FROM group \
                 WHERE dataset_id = $dataset_id ORDER BY created_at ASC",
            )
            .bind(("dataset_id", dataset_id.to_string()))
            .await
            .map_err(DbError::from)?;

        let rows: Vec<GroupRowWithId> = result.take(0).map_err(DbError::from)?;
        Ok(collect_groups(rows)?)
    }

    async fn add_member(&self, dataset_id: Uuid, group_id: Uuid, user_id: Uuid) -> GeoshareResult<()> {
        let user_id_str = user_id.to_string();
        let group_id_str = group_id.to_string();

        // The user must exist and the group must belong to the dataset.
        let mut check = self
            .db
            .query(
                "SELECT count() AS total FROM user \
                 WHERE id = type::record('user', $user_id) GROUP ALL; \
                 SELECT count() AS total FROM group \
                 WHERE id = type::record('group', $group_id) \
                 AND dataset_id = $dataset_id GROUP ALL; \
                 SELECT count() AS total FROM member_of \
                 WHERE in = type::record('user', $user_id) \
                 AND out = type::record('group', $group_id) GROUP ALL;",
            )
            .bind(("user_id", user_id_str.clone()))
            .bind(("group_id", group_id_str.clone()))
            .bind(("dataset_id", dataset_id.to_string()))
            .await
            .map_err(DbError::from)?;

        let user_count: Vec<CountRow> = check.take(0).map_err(DbError::from)?;
        if user_count.first().map(|r| r.total).unwrap_or(0) == 0 {
            return Err(DbError::NotFound {
                entity: "user".into(),
                id: user_id_str,
            }
            .into());
        }

        let group_count: Vec<CountRow> = check.take(1).map_err(DbError::from)?;
        if group_count.first().map(|r| r.total).unwrap_or(0) == 0 {
            return Err(DbError::NotFound {
                entity: "group".into(),
                id: group_id_str,
            }
            .into());
        }

        let edge_count: Vec<CountRow> = check.take(2).map_err(DbError::from)?;
        if edge_count.first().map(|r| r.total).unwrap_or(0) > 0 {
            return Ok(());
        }

        let query = format!("RELATE user:`{user_id_str}` -> member_of -> group:`{group_id_str}`;");
        self.db
            .query(query)
            .await
            .map_err(DbError::from)?
            .check()
            .map_err(|e| DbError::from_statement("member_of", e))?;

        Ok(())
    }

    async fn remove_member(
        &self,
        dataset_id: Uuid,
        group_id: Uuid,
        user_id: Uuid,
    ) -> GeoshareResult<()> {
        self.get_by_id(dataset_id, group_id).await?;

        self.db
            .query(
                "DELETE member_of WHERE \
                 in = type::record('user', $user_id) AND \
                 out = type::record('group', $group_id)",
            )
            .bind(("user_id", user_id.to_string()))
            .bind(("group_id", group_id.to_string()))
            .await
            .map_err(DbError::from)?
            .check()
            .map_err(|e| DbError::Migration(e.to_string()))?;

        Ok(())
    }

    async fn get_user_groups(&self, dataset_id: Uuid, user_id: Uuid) -> GeoshareResult<Vec<Group>> {
        let mut result = self
            .db
            .query(
                "SELECT meta::id(id) AS record_id, * FROM group \
                 WHERE dataset_id = $dataset_id \
                 AND id IN (\
                     SELECT VALUE out FROM member_of \
                     WHERE in = type::record('user', $user_id)\
                 )",
            )
            .bind(("dataset_id", dataset_id.to_string()))
            .bind(("user_id", user_id.to_string()))
            .await
            .map_err(DbError::from)?;

        let rows: Vec<GroupRowWithId> = result.take(0).map_err(DbError::from)?;
        Ok(collect_groups(rows)?)
    }
}
