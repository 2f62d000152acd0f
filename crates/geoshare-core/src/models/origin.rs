//! CORS origin domain model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// An allowed browser origin for a dataset. The pattern may contain `*`
/// wildcards and may omit the scheme.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Origin {
    pub id: Uuid,
    pub dataset_id: Uuid,
    pub pattern: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateOrigin {
    pub dataset_id: Uuid,
    pub pattern: String,
}
