//! Bootstrap error types.

use std::path::PathBuf;

use geoshare_core::error::GeoshareError;
use geoshare_db::DbError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("cannot read config file {path}: {source}")]
    ReadConfig {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("invalid config file {path}: {source}")]
    ParseConfig {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("invalid log filter {filter:?}: {reason}")]
    LogFilter { filter: String, reason: String },

    #[error(transparent)]
    Database(#[from] DbError),

    #[error(transparent)]
    Domain(#[from] GeoshareError),
}
