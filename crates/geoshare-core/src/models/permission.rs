//! Data permission domain model.
//!
//! Permission rows all share one shape and differ only in the scope
//! they hang off: the dataset itself, an API key, a CORS origin, or a
//! group of users.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::GeoshareError;

/// Submission set name matching every set without a row of its own.
pub const WILDCARD_SET: &str = "*";

/// The four data actions a permission row can grant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    Retrieve,
    Create,
    Update,
    Destroy,
}

impl Action {
    pub const ALL: [Action; 4] = [
        Action::Retrieve,
        Action::Create,
        Action::Update,
        Action::Destroy,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Retrieve => "retrieve",
            Action::Create => "create",
            Action::Update => "update",
            Action::Destroy => "destroy",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Action {
    type Err = GeoshareError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "retrieve" => Ok(Action::Retrieve),
            "create" => Ok(Action::Create),
            "update" => Ok(Action::Update),
            "destroy" => Ok(Action::Destroy),
            other => Err(GeoshareError::UnknownAction(other.to_string())),
        }
    }
}

/// The owner of a set of permission rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "scope", content = "scope_id")]
pub enum PermissionScope {
    /// Applies to every identity.
    Dataset(Uuid),
    ApiKey(Uuid),
    Origin(Uuid),
    Group(Uuid),
}

impl PermissionScope {
    pub fn kind(&self) -> &'static str {
        match self {
            PermissionScope::Dataset(_) => "Dataset",
            PermissionScope::ApiKey(_) => "ApiKey",
            PermissionScope::Origin(_) => "Origin",
            PermissionScope::Group(_) => "Group",
        }
    }

    pub fn id(&self) -> Uuid {
        match self {
            PermissionScope::Dataset(id)
            | PermissionScope::ApiKey(id)
            | PermissionScope::Origin(id)
            | PermissionScope::Group(id) => *id,
        }
    }

    /// Rebuilds a scope from its stored kind and ID.
    pub fn from_parts(kind: &str, id: Uuid) -> Option<Self> {
        match kind {
            "Dataset" => Some(PermissionScope::Dataset(id)),
            "ApiKey" => Some(PermissionScope::ApiKey(id)),
            "Origin" => Some(PermissionScope::Origin(id)),
            "Group" => Some(PermissionScope::Group(id)),
            _ => None,
        }
    }
}

/// Which actions a scope grants on one submission set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Grants {
    pub can_retrieve: bool,
    pub can_create: bool,
    pub can_update: bool,
    pub can_destroy: bool,
    /// Needed on top of the action flag for reads of invisible things,
    /// private places or private fields.
    pub can_access_protected: bool,
}

impl Grants {
    pub fn read_only() -> Self {
        Self {
            can_retrieve: true,
            ..Default::default()
        }
    }

    pub fn read_create() -> Self {
        Self {
            can_retrieve: true,
            can_create: true,
            ..Default::default()
        }
    }

    pub fn all() -> Self {
        Self {
            can_retrieve: true,
            can_create: true,
            can_update: true,
            can_destroy: true,
            can_access_protected: true,
        }
    }

    pub fn allows(&self, action: Action) -> bool {
        match action {
            Action::Retrieve => self.can_retrieve,
            Action::Create => self.can_create,
            Action::Update => self.can_update,
            Action::Destroy => self.can_destroy,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataPermission {
    pub id: Uuid,
    pub dataset_id: Uuid,
    #[serde(flatten)]
    pub scope: PermissionScope,
    /// A specific set name, or [`WILDCARD_SET`].
    pub submission_set: String,
    #[serde(flatten)]
    pub grants: Grants,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl DataPermission {
    pub fn is_wildcard(&self) -> bool {
        self.submission_set == WILDCARD_SET
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateDataPermission {
    pub dataset_id: Uuid,
    pub scope: PermissionScope,
    pub submission_set: String,
    pub grants: Grants,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct UpdateDataPermission {
    pub submission_set: Option<String>,
    pub grants: Option<Grants>,
}
