//! Database-specific error types and conversions.

use geoshare_core::error::GeoshareError;

/// Database-layer error type.
#[derive(Debug, thiserror::Error)]
pub enum DbError {
    #[error("SurrealDB error: {0}")]
    Surreal(#[from] surrealdb::Error),

    #[error("Migration failed: {0}")]
    Migration(String),

    #[error("Record not found: {entity} with id {id}")]
    NotFound { entity: String, id: String },

    #[error("{entity} already exists")]
    Conflict { entity: String },

    #[error("Invalid input: {0}")]
    Invalid(String),
}

impl DbError {
    /// Classifies a failed statement: unique index violations become
    /// [`DbError::Conflict`], anything else is reported as-is.
    pub(crate) fn from_statement(entity: &str, err: impl std::fmt::Display) -> Self {
        let message = err.to_string();
        if message.contains("already contains") || message.contains("already exists") {
            DbError::Conflict {
                entity: entity.into(),
            }
        } else {
            DbError::Migration(message)
        }
    }
}

impl From<DbError> for GeoshareError {
    fn from(err: DbError) -> Self {
        match err {
            DbError::NotFound { entity, id } => GeoshareError::NotFound { entity, id },
            DbError::Conflict { entity } => GeoshareError::AlreadyExists { entity },
            DbError::Invalid(message) => GeoshareError::Validation { message },
            other => GeoshareError::Database(other.to_string()),
        }
    }
}

/// Parses a UUID stored as a string column.
pub(crate) fn parse_uuid(field: &str, value: &str) -> Result<uuid::Uuid, DbError> {
    uuid::Uuid::parse_str(value).map_err(|e| DbError::Migration(format!("invalid {field} UUID: {e}")))
}
