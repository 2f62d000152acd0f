//! Submitted thing domain model: places and the submissions attached
//! to them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

/// Submission set name under which places are permissioned.
pub const PLACES_SET: &str = "places";

/// Prefix marking data keys that are only returned to protected reads.
pub const PRIVATE_FIELD_PREFIX: &str = "private";

/// What a thing is. Exactly one variant applies to every thing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum ThingKind {
    Place {
        /// Private places are hidden from unprotected reads.
        private: bool,
    },
    Submission {
        place_id: Uuid,
        /// Grouping label, e.g. `comments` or `support`.
        set_name: String,
    },
}

/// A stored record with an opaque JSON data document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Thing {
    pub id: Uuid,
    pub dataset_id: Uuid,
    #[serde(flatten)]
    pub kind: ThingKind,
    pub visible: bool,
    pub submitter_id: Option<Uuid>,
    pub data: Map<String, Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Thing {
    /// The submission set this thing is permissioned under.
    pub fn submission_set(&self) -> &str {
        match &self.kind {
            ThingKind::Place { .. } => PLACES_SET,
            ThingKind::Submission { set_name, .. } => set_name,
        }
    }

    pub fn is_private(&self) -> bool {
        matches!(self.kind, ThingKind::Place { private: true })
    }

    pub fn place_id(&self) -> Option<Uuid> {
        match &self.kind {
            ThingKind::Place { .. } => None,
            ThingKind::Submission { place_id, .. } => Some(*place_id),
        }
    }

    pub fn is_submitted_by(&self, user_id: Uuid) -> bool {
        self.submitter_id == Some(user_id)
    }
}

/// Fields required to create a new thing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateThing {
    pub dataset_id: Uuid,
    pub kind: ThingKind,
    pub visible: bool,
    pub submitter_id: Option<Uuid>,
    pub data: Map<String, Value>,
}

impl CreateThing {
    /// A visible, public place with the given data.
    pub fn place(dataset_id: Uuid, data: Map<String, Value>) -> Self {
        Self {
            dataset_id,
            kind: ThingKind::Place { private: false },
            visible: true,
            submitter_id: None,
            data,
        }
    }

    /// A visible submission in `set_name` on `place_id`.
    pub fn submission(
        dataset_id: Uuid,
        place_id: Uuid,
        set_name: impl Into<String>,
        data: Map<String, Value>,
    ) -> Self {
        Self {
            dataset_id,
            kind: ThingKind::Submission {
                place_id,
                set_name: set_name.into(),
            },
            visible: true,
            submitter_id: None,
            data,
        }
    }

    pub fn submitted_by(mut self, user_id: Uuid) -> Self {
        self.submitter_id = Some(user_id);
        self
    }

    pub fn submission_set(&self) -> &str {
        match &self.kind {
            ThingKind::Place { .. } => PLACES_SET,
            ThingKind::Submission { set_name, .. } => set_name,
        }
    }
}

/// Fields that can be updated on an existing thing.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct UpdateThing {
    pub visible: Option<bool>,
    /// Ignored for submissions.
    pub private: Option<bool>,
    /// Replaces the whole data document.
    pub data: Option<Map<String, Value>>,
}

/// Which things a listing returns.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ThingFilter {
    /// Every place in the dataset.
    Places,
    /// Submissions in one set, optionally restricted to one place.
    Submissions {
        set_name: String,
        place_id: Option<Uuid>,
    },
}

impl ThingFilter {
    pub fn submission_set(&self) -> &str {
        match self {
            ThingFilter::Places => PLACES_SET,
            ThingFilter::Submissions { set_name, .. } => set_name,
        }
    }

    pub fn matches(&self, thing: &Thing) -> bool {
        match (self, &thing.kind) {
            (ThingFilter::Places, ThingKind::Place { .. }) => true,
            (
                ThingFilter::Submissions {
                    set_name,
                    place_id,
                },
                ThingKind::Submission {
                    place_id: thing_place,
                    set_name: thing_set,
                },
            ) => set_name == thing_set && place_id.is_none_or(|p| p == *thing_place),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn thing(kind: ThingKind) -> Thing {
        Thing {
            id: Uuid::new_v4(),
            dataset_id: Uuid::new_v4(),
            kind,
            visible: true,
            submitter_id: None,
            data: Map::new(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn places_use_the_places_set() {
        let place = thing(ThingKind::Place { private: false });
        assert_eq!(place.submission_set(), "places");
        assert!(place.place_id().is_none());
    }

    #[test]
    fn submissions_use_their_set_name() {
        let place_id = Uuid::new_v4();
        let comment = thing(ThingKind::Submission {
            place_id,
            set_name: "comments".into(),
        });
        assert_eq!(comment.submission_set(), "comments");
        assert_eq!(comment.place_id(), Some(place_id));
    }

    #[test]
    fn filter_matches_set_and_place() {
        let place_id = Uuid::new_v4();
        let comment = thing(ThingKind::Submission {
            place_id,
            set_name: "comments".into(),
        });
        let any_place = ThingFilter::Submissions {
            set_name: "comments".into(),
            place_id: None,
        };
        let other_place = ThingFilter::Submissions {
            set_name: "comments".into(),
            place_id: Some(Uuid::new_v4()),
        };
        assert!(any_place.matches(&comment));
        assert!(!other_place.matches(&comment));
        assert!(!ThingFilter::Places.matches(&comment));
    }

    #[test]
    fn kind_serializes_as_tagged_fields() {
        let place = thing(ThingKind::Place { private: true });
        let value = serde_json::to_value(&place).unwrap();
        assert_eq!(value["kind"], json!("Place"));
        assert_eq!(value["private"], json!(true));
    }
}
