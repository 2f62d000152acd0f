//! SurrealDB implementation of [`ThingRepository`].
//!
//! Places and submissions share the `thing` table. The `kind` column
//! discriminates them; submissions additionally carry `place_id` and
//! `set_name`.

use chrono::{DateTime, Utc};
use geoshare_core::error::GeoshareResult;
use geoshare_core::models::thing::{CreateThing, Thing, ThingFilter, ThingKind, UpdateThing};
use geoshare_core::repository::ThingRepository;
use serde_json::{Map, Value};
use surrealdb::{Connection, Surreal};
use surrealdb_types::SurrealValue;
use uuid::Uuid;

use crate::error::{DbError, parse_uuid};

#[derive(Debug, SurrealValue)]
struct ThingRowWithId {
    record_id: String,
    dataset_id: String,
    kind: String,
    private: bool,
    place_id: Option<String>,
    set_name: Option<String>,
    visible: bool,
    submitter_id: Option<String>,
    data: Value,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl ThingRowWithId {
    fn try_into_thing(self) -> Result<Thing, DbError> {
        let kind = match (self.kind.as_str(), self.place_id, self.set_name) {
            ("Place", _, _) => ThingKind::Place {
                private: self.private,
            },
            ("Submission", Some(place_id), Some(set_name)) => ThingKind::Submission {
                place_id: parse_uuid("place", &place_id)?,
                set_name,
            },
            (other, _, _) => {
                return Err(DbError::Migration(format!(
                    "malformed thing {}: kind {other}",
                    self.record_id
                )));
            }
        };
        let data = match self.data {
            Value::Object(map) => map,
            Value::Null => Map::new(),
            other => {
                return Err(DbError::Migration(format!(
                    "thing data must be an object, found {other}"
                )));
            }
        };
        Ok(Thing {
            id: parse_uuid("thing", &self.record_id)?,
            dataset_id: parse_uuid("dataset", &self.dataset_id)?,
            kind,
            visible: self.visible,
            submitter_id: self
                .submitter_id
                .as_deref()
                .map(|s| parse_uuid("submitter", s))
                .transpose()?,
            data,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

#[derive(Debug, SurrealValue)]
struct CountRow {
    total: u64,
}

fn collect_things(rows: Vec<ThingRowWithId>) -> Result<Vec<Thing>, DbError> {
    rows.into_iter().map(|row| row.try_into_thing()).collect()
}

/// SurrealDB implementation of the Thing repository.
#[derive(Clone)]
pub struct SurrealThingRepository<C: Connection> {
    db: Surreal<C>,
}

impl<C: Connection> SurrealThingRepository<C> {
    pub fn new(db: Surreal<C>) -> Self {
        Self { db }
    }

    async fn ensure_place(&self, dataset_id: Uuid, place_id: Uuid) -> Result<(), DbError> {
        let mut result = self
            .db
            .query(
                "SELECT count() AS total FROM thing \
                 WHERE id = type::record('thing', $place_id) \
                 AND dataset_id = $dataset_id AND kind = 'Place' GROUP ALL",
            )
            .bind(("place_id", place_id.to_string()))
            .bind(("dataset_id", dataset_id.to_string()))
            .await?;

        let rows: Vec<CountRow> = result.take(0)?;
        if rows.first().map(|r| r.total).unwrap_or(0) == 0 {
            return Err(DbError::Invalid(format!(
                "{place_id} is not a place in dataset {dataset_id}"
            )));
        }
        Ok(())
    }
}

impl<C: Connection> ThingRepository for SurrealThingRepository<C> {
    async fn create(&self, input: CreateThing) -> GeoshareResult<Thing> {
        let (kind, private, place_id, set_name) = match &input.kind {
            ThingKind::Place { private } => ("Place", *private, None, None),
            ThingKind::Submission { place_id, set_name } => {
                self.ensure_place(input.dataset_id, *place_id).await?;
                (
                    "Submission",
                    false,
                    Some(place_id.to_string()),
                    Some(set_name.clone()),
                )
            }
        };

        let id = Uuid::new_v4();
        self.db
            .query(
                "CREATE type::record('thing', $id) SET \
                 dataset_id = $dataset_id, kind = $kind, private = $private, \
                 place_id = $place_id, set_name = $set_name, visible = $visible, \
                 submitter_id = $submitter_id, data = $data",
            )
            .bind(("id", id.to_string()))
            .bind(("dataset_id", input.dataset_id.to_string()))
            .bind(("kind", kind))
            .bind(("private", private))
            .bind(("place_id", place_id))
            .bind(("set_name", set_name))
            .bind(("visible", input.visible))
            .bind(("submitter_id", input.submitter_id.map(|u| u.to_string())))
            .bind(("data", Value::Object(input.data)))
            .await
            .map_err(DbError::from)?
            .check()
            .map_err(|e| DbError::from_statement("thing", e))?;

        self.get_by_id(input.dataset_id, id).await
    }

    async fn get_by_id(&self, dataset_id: Uuid, id: Uuid) -> GeoshareResult<Thing> {
        let id_str = id.to_string();

        let mut result = self
            .db
            .query(
                "SELECT meta::id(id) AS record_id, * FROM type::record('thing', $id) \
                 WHERE dataset_id = $dataset_id",
            )
            .bind(("id", id_str.clone()))
            .bind(("dataset_id", dataset_id.to_string()))
            .await
            .map_err(DbError::from)?;

        let rows: Vec<ThingRowWithId> = result.take(0).map_err(DbError::from)?;
        let row = rows.into_iter().next().ok_or_else(|| DbError::NotFound {
            entity: "thing".into(),
            id: id_str,
        })?;
        Ok(row.try_into_thing()?)
    }

    async fn update(&self, dataset_id: Uuid, id: Uuid, input: UpdateThing) -> GeoshareResult<Thing> {
        let existing = self.get_by_id(dataset_id, id).await?;

        let mut sets = Vec::new();
        if input.visible.is_some() {
            sets.push("visible = $visible");
        }
        let private = input.private.filter(|_| existing.place_id().is_none());
        if private.is_some() {
            sets.push("private = $private");
        }
        if input.data.is_some() {
            sets.push("data = $data");
        }
        sets.push("updated_at = time::now()");

        let query = format!(
            "UPDATE type::record('thing', $id) SET {} WHERE dataset_id = $dataset_id",
            sets.join(", ")
        );

        let mut builder = self
            .db
            .query(&query)
            .bind(("id", id.to_string()))
            .bind(("dataset_id", dataset_id.to_string()));
        if let Some(visible) = input.visible {
            builder = builder.bind(("visible", visible));
        }
        if let Some(private) = private {
            builder = builder.bind(("private", private));
        }
        if let Some(data) = input.data {
            builder = builder.bind(("data", Value::Object(data)));
        }

        builder
            .await
            .map_err(DbError::from)?
            .check()
            .map_err(|e| DbError::from_statement("thing", e))?;

        self.get_by_id(dataset_id, id).await
    }

    async fn delete(&self, dataset_id: Uuid, id: Uuid) -> GeoshareResult<Vec<Uuid>> {
        let thing = self.get_by_id(dataset_id, id).await?;
        let id_str = id.to_string();
        let dataset_id_str = dataset_id.to_string();

        let mut removed = vec![id_str.clone()];
        if thing.place_id().is_none() {
            let mut result = self
                .db
                .query(
                    "SELECT VALUE meta::id(id) FROM thing \
                     WHERE dataset_id = $dataset_id AND place_id = $id",
                )
                .bind(("dataset_id", dataset_id_str.clone()))
                .bind(("id", id_str))
                .await
                .map_err(DbError::from)?;
            let submissions: Vec<String> = result.take(0).map_err(DbError::from)?;
            removed.extend(submissions);
        }

        self.db
            .query(
                "BEGIN TRANSACTION; \
                 DELETE indexed_value WHERE thing_id IN $ids; \
                 DELETE thing WHERE dataset_id = $dataset_id AND meta::id(id) IN $ids; \
                 COMMIT TRANSACTION;",
            )
            .bind(("ids", removed.clone()))
            .bind(("dataset_id", dataset_id_str))
            .await
            .map_err(DbError::from)?
            .check()
            .map_err(|e| DbError::Migration(e.to_string()))?;

        Ok(removed
            .iter()
            .map(|s| parse_uuid("thing", s))
            .collect::<Result<Vec<_>, DbError>>()?)
    }

    async fn list(&self, dataset_id: Uuid, filter: &ThingFilter) -> GeoshareResult<Vec<Thing>> {
        let (condition, set_name, place_id) = match filter {
            ThingFilter::Places => ("kind = 'Place'", None, None),
            ThingFilter::Submissions {
                set_name,
                place_id: None,
            } => (
                "kind = 'Submission' AND set_name = $set_name",
                Some(set_name.clone()),
                None,
            ),
            ThingFilter::Submissions {
                set_name,
                place_id: Some(place_id),
            } => (
                "kind = 'Submission' AND set_name = $set_name AND place_id = $place_id",
                Some(set_name.clone()),
                Some(place_id.to_string()),
            ),
        };

        let query = format!(
            "SELECT meta::id(id) AS record_id, * FROM thing \
             WHERE dataset_id = $dataset_id AND {condition} \
             ORDER BY created_at ASC"
        );

        let mut builder = self
            .db
            .query(&query)
            .bind(("dataset_id", dataset_id.to_string()));
        if let Some(set_name) = set_name {
            builder = builder.bind(("set_name", set_name));
        }
        if let Some(place_id) = place_id {
            builder = builder.bind(("place_id", place_id));
        }

        let mut result = builder.await.map_err(DbError::from)?;
        let rows: Vec<ThingRowWithId> = result.take(0).map_err(DbError::from)?;
        Ok(collect_things(rows)?)
    }

    async fn list_all(&self, dataset_id: Uuid) -> GeoshareResult<Vec<Thing>> {
        let mut result = self
            .db
            .query(
                "SELECT meta::id(id) AS record_id, * FROM thing \
                 WHERE dataset_id = $dataset_id ORDER BY created_at ASC",
            )
            .bind(("dataset_id", dataset_id.to_string()))
            .await
            .map_err(DbError::from)?;

        let rows: Vec<ThingRowWithId> = result.take(0).map_err(DbError::from)?;
        Ok(collect_things(rows)?)
    }
}
