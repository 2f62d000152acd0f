//! GeoShare Server: loads configuration, prepares the database and
//! repairs attribute indexes.

mod config;
mod error;
mod repair;

use std::process::ExitCode;

use geoshare_access::{DataAccessService, MemoryCacheStore};
use geoshare_db::{DbError, DbManager, SurrealStore};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use crate::config::{LogConfig, ServerConfig};
use crate::error::ServerError;

#[tokio::main]
async fn main() -> ExitCode {
    let config = match ServerConfig::load() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("geoshare-server: {e}");
            return ExitCode::FAILURE;
        }
    };

    if let Err(e) = init_logging(&config.log) {
        eprintln!("geoshare-server: {e}");
        return ExitCode::FAILURE;
    }

    info!("Starting GeoShare server...");
    match run(config).await {
        Ok(()) => {
            info!("GeoShare server stopped.");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!(error = %e, "GeoShare server failed");
            ExitCode::FAILURE
        }
    }
}

/// `RUST_LOG` wins over the configured filter.
fn init_logging(config: &LogConfig) -> Result<(), ServerError> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(&config.filter).map_err(|e| ServerError::LogFilter {
            filter: config.filter.clone(),
            reason: e.to_string(),
        })?,
    };

    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if config.json {
        builder.json().init();
    } else {
        builder.init();
    }
    Ok(())
}

async fn run(config: ServerConfig) -> Result<(), ServerError> {
    let manager = DbManager::connect(&config.db)
        .await
        .map_err(DbError::from)?;
    geoshare_db::run_migrations(manager.client()).await?;

    let service = DataAccessService::new(
        SurrealStore::new(manager.client().clone()),
        MemoryCacheStore::new(),
        &config.access,
    );
    let repaired = repair::repair_indexes(service.store(), service.indexes()).await?;

    info!(
        datasets = repaired,
        coercion = ?config.access.coercion,
        "GeoShare data access core ready"
    );
    Ok(())
}
