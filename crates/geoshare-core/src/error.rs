//! Error types for the GeoShare system.

use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum GeoshareError {
    #[error("Entity not found: {entity} with id {id}")]
    NotFound { entity: String, id: String },

    #[error("Entity already exists: {entity}")]
    AlreadyExists { entity: String },

    /// The request carried no authenticated identity and was denied.
    #[error("Authentication required: {reason}")]
    AuthenticationRequired { reason: String },

    /// The request was authenticated but the identity lacks permission.
    #[error("Permission denied: {reason}")]
    PermissionDenied { reason: String },

    #[error("Validation error: {message}")]
    Validation { message: String },

    #[error("Unknown action: {0}")]
    UnknownAction(String),

    /// No data index is declared for the attribute. Callers fall back
    /// to scanning the documents.
    #[error("No index on attribute {attr_name} in dataset {dataset_id}")]
    NoSuchIndex { dataset_id: Uuid, attr_name: String },

    #[error("Database error: {0}")]
    Database(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl GeoshareError {
    /// HTTP status code the web layer reports for this error.
    pub fn status_code(&self) -> u16 {
        match self {
            GeoshareError::NotFound { .. } | GeoshareError::NoSuchIndex { .. } => 404,
            GeoshareError::AlreadyExists { .. } => 409,
            GeoshareError::AuthenticationRequired { .. } => 401,
            GeoshareError::PermissionDenied { .. } => 403,
            GeoshareError::Validation { .. } => 400,
            GeoshareError::UnknownAction(_)
            | GeoshareError::Database(_)
            | GeoshareError::Internal(_) => 500,
        }
    }
}

pub type GeoshareResult<T> = Result<T, GeoshareError>;
