//! Dataset domain model.
//!
//! A dataset is the tenant boundary: every place, submission,
//! permission row, key, origin, group and index belongs to exactly one
//! dataset, and deleting the dataset removes all of them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// An isolated collection of crowdsourced data with a single owner.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Dataset {
    pub id: Uuid,
    /// The user with unconditional full access to this dataset.
    pub owner_id: Uuid,
    /// URL-safe identifier, unique per owner (e.g., `bike-share`).
    pub slug: String,
    pub display_name: String,
    /// When set, only authenticated users may create things.
    pub auth_required: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Dataset {
    pub fn is_owned_by(&self, user_id: Uuid) -> bool {
        self.owner_id == user_id
    }
}

/// Fields required to create a new dataset.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateDataset {
    pub owner_id: Uuid,
    pub slug: String,
    pub display_name: String,
    pub auth_required: bool,
}

/// Fields that can be updated on an existing dataset.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct UpdateDataset {
    pub slug: Option<String>,
    pub display_name: Option<String>,
    pub auth_required: Option<bool>,
}
