//! Request identity as resolved by the web layer from session cookies,
//! API key headers or the `Origin` header.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::GeoshareError;
use crate::models::permission::Action;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Identity {
    Anonymous,
    /// A logged-in user.
    User { user_id: Uuid },
    /// A raw API key as presented by the client.
    ApiKey { key: String },
    /// The declared origin of a cross-origin browser request.
    Origin { origin: String },
}

impl Identity {
    /// The authenticated user behind this identity, if any.
    pub fn user_id(&self) -> Option<Uuid> {
        match self {
            Identity::User { user_id } => Some(*user_id),
            _ => None,
        }
    }

    pub fn is_anonymous(&self) -> bool {
        matches!(self, Identity::Anonymous)
    }

    /// Builds the error for a denied request: anonymous callers are asked
    /// to authenticate (401), everyone else is forbidden (403).
    pub fn denial(&self, action: Action, submission_set: &str) -> GeoshareError {
        if self.is_anonymous() {
            GeoshareError::AuthenticationRequired {
                reason: format!("{action} on {submission_set} requires authentication"),
            }
        } else {
            GeoshareError::PermissionDenied {
                reason: format!("{action} on {submission_set} is not permitted"),
            }
        }
    }
}
