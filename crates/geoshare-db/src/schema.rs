//! Schema definitions and migration runner for SurrealDB.
//!
//! All table definitions use SCHEMAFULL mode. UUIDs are stored as
//! strings. Enums are stored as strings with ASSERT constraints.
//! Thing data documents are the one FLEXIBLE object: their shape is
//! owned by the client.

use surrealdb::{Connection, Surreal};
use surrealdb_types::SurrealValue;
use tracing::info;

use crate::error::DbError;

// -----------------------------------------------------------------------
// Migration tracking
// -----------------------------------------------------------------------

const MIGRATION_TABLE_DDL: &str = "\
DEFINE TABLE IF NOT EXISTS _migration SCHEMAFULL;
DEFINE FIELD IF NOT EXISTS version ON TABLE _migration TYPE int;
DEFINE FIELD IF NOT EXISTS name ON TABLE _migration TYPE string;
DEFINE FIELD IF NOT EXISTS applied_at ON TABLE _migration TYPE datetime \
    DEFAULT time::now();
DEFINE INDEX IF NOT EXISTS idx_migration_version ON TABLE _migration \
    COLUMNS version UNIQUE;
";

#[derive(Debug, SurrealValue)]
struct MigrationRecord {
    version: u32,
}

struct Migration {
    version: u32,
    name: &'static str,
    sql: &'static str,
}

static MIGRATIONS: &[Migration] = &[Migration {
    version: 1,
    name: "initial_schema",
    sql: SCHEMA_V1,
}];

// -----------------------------------------------------------------------
// Schema v1
// -----------------------------------------------------------------------

const SCHEMA_V1: &str = "\
-- =======================================================================
-- Users (global scope)
-- =======================================================================
DEFINE TABLE user SCHEMAFULL;
DEFINE FIELD username ON TABLE user TYPE string;
DEFINE FIELD created_at ON TABLE user TYPE datetime DEFAULT time::now();
DEFINE FIELD updated_at ON TABLE user TYPE datetime DEFAULT time::now();
DEFINE INDEX idx_user_username ON TABLE user COLUMNS username UNIQUE;

-- =======================================================================
-- Datasets (global scope, owned by a user)
-- =======================================================================
DEFINE TABLE dataset SCHEMAFULL;
DEFINE FIELD owner_id ON TABLE dataset TYPE string;
DEFINE FIELD slug ON TABLE dataset TYPE string;
DEFINE FIELD display_name ON TABLE dataset TYPE string;
DEFINE FIELD auth_required ON TABLE dataset TYPE bool DEFAULT false;
DEFINE FIELD created_at ON TABLE dataset TYPE datetime DEFAULT time::now();
DEFINE FIELD updated_at ON TABLE dataset TYPE datetime DEFAULT time::now();
DEFINE INDEX idx_dataset_owner_slug ON TABLE dataset \
    COLUMNS owner_id, slug UNIQUE;

-- =======================================================================
-- Things: places and submissions (dataset scope)
-- =======================================================================
DEFINE TABLE thing SCHEMAFULL;
DEFINE FIELD dataset_id ON TABLE thing TYPE string;
DEFINE FIELD kind ON TABLE thing TYPE string \
    ASSERT $value IN ['Place', 'Submission'];
DEFINE FIELD private ON TABLE thing TYPE bool DEFAULT false;
DEFINE FIELD place_id ON TABLE thing TYPE option<string>;
DEFINE FIELD set_name ON TABLE thing TYPE option<string>;
DEFINE FIELD visible ON TABLE thing TYPE bool DEFAULT true;
DEFINE FIELD submitter_id ON TABLE thing TYPE option<string>;
DEFINE FIELD data ON TABLE thing TYPE object FLEXIBLE DEFAULT {};
DEFINE FIELD created_at ON TABLE thing TYPE datetime DEFAULT time::now();
DEFINE FIELD updated_at ON TABLE thing TYPE datetime DEFAULT time::now();
DEFINE INDEX idx_thing_dataset_kind ON TABLE thing COLUMNS dataset_id, kind;
DEFINE INDEX idx_thing_place ON TABLE thing COLUMNS place_id;

-- =======================================================================
-- Data permissions (dataset scope, owned by one scope record)
-- =======================================================================
DEFINE TABLE data_permission SCHEMAFULL;
DEFINE FIELD dataset_id ON TABLE data_permission TYPE string;
DEFINE FIELD scope_kind ON TABLE data_permission TYPE string \
    ASSERT $value IN ['Dataset', 'ApiKey', 'Origin', 'Group'];
DEFINE FIELD scope_id ON TABLE data_permission TYPE string;
DEFINE FIELD submission_set ON TABLE data_permission TYPE string;
DEFINE FIELD can_retrieve ON TABLE data_permission TYPE bool DEFAULT false;
DEFINE FIELD can_create ON TABLE data_permission TYPE bool DEFAULT false;
DEFINE FIELD can_update ON TABLE data_permission TYPE bool DEFAULT false;
DEFINE FIELD can_destroy ON TABLE data_permission TYPE bool DEFAULT false;
DEFINE FIELD can_access_protected ON TABLE data_permission TYPE bool \
    DEFAULT false;
DEFINE FIELD created_at ON TABLE data_permission TYPE datetime \
    DEFAULT time::now();
DEFINE FIELD updated_at ON TABLE data_permission TYPE datetime \
    DEFAULT time::now();
DEFINE INDEX idx_data_permission_scope_set ON TABLE data_permission \
    COLUMNS scope_kind, scope_id, submission_set UNIQUE;
DEFINE INDEX idx_data_permission_dataset ON TABLE data_permission \
    COLUMNS dataset_id;

-- =======================================================================
-- API keys (dataset scope)
-- =======================================================================
DEFINE TABLE api_key SCHEMAFULL;
DEFINE FIELD dataset_id ON TABLE api_key TYPE string;
DEFINE FIELD key_hash ON TABLE api_key TYPE string;
DEFINE FIELD label ON TABLE api_key TYPE string;
DEFINE FIELD active ON TABLE api_key TYPE bool DEFAULT true;
DEFINE FIELD created_at ON TABLE api_key TYPE datetime DEFAULT time::now();
DEFINE FIELD updated_at ON TABLE api_key TYPE datetime DEFAULT time::now();
DEFINE INDEX idx_api_key_dataset_hash ON TABLE api_key \
    COLUMNS dataset_id, key_hash UNIQUE;

-- =======================================================================
-- CORS origins (dataset scope)
-- =======================================================================
DEFINE TABLE origin SCHEMAFULL;
DEFINE FIELD dataset_id ON TABLE origin TYPE string;
DEFINE FIELD pattern ON TABLE origin TYPE string;
DEFINE FIELD created_at ON TABLE origin TYPE datetime DEFAULT time::now();
DEFINE FIELD updated_at ON TABLE origin TYPE datetime DEFAULT time::now();
DEFINE INDEX idx_origin_dataset_pattern ON TABLE origin \
    COLUMNS dataset_id, pattern UNIQUE;

-- =======================================================================
-- Groups (dataset scope)
-- =======================================================================
DEFINE TABLE group SCHEMAFULL;
DEFINE FIELD dataset_id ON TABLE group TYPE string;
DEFINE FIELD name ON TABLE group TYPE string;
DEFINE FIELD created_at ON TABLE group TYPE datetime DEFAULT time::now();
DEFINE FIELD updated_at ON TABLE group TYPE datetime DEFAULT time::now();
DEFINE INDEX idx_group_dataset_name ON TABLE group \
    COLUMNS dataset_id, name UNIQUE;

-- User -> Group membership
DEFINE TABLE member_of TYPE RELATION SCHEMAFULL;
DEFINE FIELD created_at ON TABLE member_of TYPE datetime DEFAULT time::now();
DEFINE INDEX idx_member_of_pair ON TABLE member_of COLUMNS in, out UNIQUE;

-- =======================================================================
-- Attribute indexes (dataset scope)
-- =======================================================================
DEFINE TABLE data_index SCHEMAFULL;
DEFINE FIELD dataset_id ON TABLE data_index TYPE string;
DEFINE FIELD attr_name ON TABLE data_index TYPE string;
DEFINE FIELD created_at ON TABLE data_index TYPE datetime \
    DEFAULT time::now();
DEFINE INDEX idx_data_index_attr ON TABLE data_index \
    COLUMNS dataset_id, attr_name UNIQUE;

-- One row per (index, thing); record ID is `<index_id>_<thing_id>`.
DEFINE TABLE indexed_value SCHEMAFULL;
DEFINE FIELD index_id ON TABLE indexed_value TYPE string;
DEFINE FIELD dataset_id ON TABLE indexed_value TYPE string;
DEFINE FIELD thing_id ON TABLE indexed_value TYPE string;
DEFINE FIELD value ON TABLE indexed_value TYPE string;
DEFINE INDEX idx_indexed_value_lookup ON TABLE indexed_value \
    COLUMNS index_id, value;
DEFINE INDEX idx_indexed_value_thing ON TABLE indexed_value \
    COLUMNS thing_id;
";

/// Apply all pending migrations to the database.
///
/// Migrations are tracked in the `_migration` table; running this on an
/// up-to-date database is a no-op.
pub async fn run_migrations<C: Connection>(db: &Surreal<C>) -> Result<(), DbError> {
    db.query(MIGRATION_TABLE_DDL)
        .await?
        .check()
        .map_err(|e| DbError::Migration(e.to_string()))?;

    let mut result = db
        .query("SELECT version FROM _migration ORDER BY version DESC LIMIT 1")
        .await?;
    let records: Vec<MigrationRecord> = result.take(0)?;
    let current_version = records.first().map(|m| m.version).unwrap_or(0);

    for migration in MIGRATIONS.iter().filter(|m| m.version > current_version) {
        info!(
            version = migration.version,
            name = migration.name,
            "Applying migration"
        );
        db.query(migration.sql).await?.check().map_err(|e| {
            DbError::Migration(format!(
                "Migration v{} '{}' failed: {}",
                migration.version, migration.name, e,
            ))
        })?;

        db.query("CREATE _migration SET version = $version, name = $name")
            .bind(("version", migration.version))
            .bind(("name", migration.name))
            .await?
            .check()
            .map_err(|e| {
                DbError::Migration(format!(
                    "Failed to record migration v{}: {}",
                    migration.version, e,
                ))
            })?;

        info!(version = migration.version, "Migration applied");
    }

    Ok(())
}

/// Returns the raw schema DDL for version 1.
pub fn schema_v1() -> &'static str {
    SCHEMA_V1
}
