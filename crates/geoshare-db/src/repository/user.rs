//! SurrealDB implementation of [`UserRepository`].

use chrono::{DateTime, Utc};
use geoshare_core::error::GeoshareResult;
use geoshare_core::models::user::{CreateUser, User};
use geoshare_core::repository::UserRepository;
use surrealdb::{Connection, Surreal};
use surrealdb_types::SurrealValue;
use uuid::Uuid;

use crate::error::{DbError, parse_uuid};

#[derive(Debug, SurrealValue)]
struct UserRowWithId {
    record_id: String,
    username: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl UserRowWithId {
    fn try_into_user(self) -> Result<User, DbError> {
        Ok(User {
            id: parse_uuid("user", &self.record_id)?,
            username: self.username,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

/// SurrealDB implementation of the User repository.
#[derive(Clone)]
pub struct SurrealUserRepository<C: Connection> {
    db: Surreal<C>,
}

impl<C: Connection> SurrealUserRepository<C> {
    pub fn new(db: Surreal<C>) -> Self {
        Self { db }
    }

    async fn fetch_one(&self, filter: &str, key: (&'static str, String)) -> GeoshareResult<User> {
        let query = format!("SELECT meta::id(id) AS record_id, * FROM user WHERE {filter}");
        let id = key.1.clone();
        let mut result = self
            .db
            .query(query)
            .bind(key)
            .await
            .map_err(DbError::from)?;

        let rows: Vec<UserRowWithId> = result.take(0).map_err(DbError::from)?;
        let row = rows.into_iter().next().ok_or_else(|| DbError::NotFound {
            entity: "user".into(),
            id,
        })?;
        Ok(row.try_into_user()?)
    }
}

impl<C: Connection> UserRepository for SurrealUserRepository<C> {
    async fn create(&self, input: CreateUser) -> GeoshareResult<User> {
        let id = Uuid::new_v4();
        let id_str = id.to_string();

        self.db
            .query("CREATE type::record('user', $id) SET username = $username")
            .bind(("id", id_str.clone()))
            .bind(("username", input.username))
            .await
            .map_err(DbError::from)?
            .check()
            .map_err(|e| DbError::from_statement("user", e))?;

        self.get_by_id(id).await
    }

    async fn get_by_id(&self, id: Uuid) -> GeoshareResult<User> {
        self.fetch_one("id = type::record('user', $id)", ("id", id.to_string()))
            .await
    }
}
