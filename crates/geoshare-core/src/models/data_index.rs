//! Data index domain model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Declares a top-level attribute of every thing's data document in a
/// dataset as queryable by equality.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataIndex {
    pub id: Uuid,
    pub dataset_id: Uuid,
    pub attr_name: String,
    pub created_at: DateTime<Utc>,
}

/// The string-coerced value of one indexed attribute for one thing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexedValue {
    pub index_id: Uuid,
    pub thing_id: Uuid,
    pub value: String,
}
