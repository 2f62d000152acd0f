//! API key domain model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A credential a dataset owner hands to a client application.
///
/// Only the SHA-256 digest of the raw key is stored.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiKey {
    pub id: Uuid,
    pub dataset_id: Uuid,
    pub key_hash: String,
    pub label: String,
    /// Revoked keys stay on record but no longer authenticate.
    pub active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateApiKey {
    pub dataset_id: Uuid,
    pub key_hash: String,
    pub label: String,
}
