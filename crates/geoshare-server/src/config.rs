//! Server configuration, read from the TOML file named by
//! `GEOSHARE_CONFIG`.

use std::path::Path;

use geoshare_access::AccessConfig;
use geoshare_db::DbConfig;
use serde::Deserialize;

use crate::error::ServerError;

/// Environment variable holding the config file path.
pub const CONFIG_ENV: &str = "GEOSHARE_CONFIG";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub db: DbConfig,
    pub access: AccessConfig,
    pub log: LogConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// `EnvFilter` directives used when `RUST_LOG` is unset.
    pub filter: String,
    /// Emit JSON lines instead of human-readable output.
    pub json: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            filter: "geoshare=info".into(),
            json: true,
        }
    }
}

impl ServerConfig {
    /// Reads the file named by [`CONFIG_ENV`], or returns the defaults
    /// when the variable is unset.
    pub fn load() -> Result<Self, ServerError> {
        match std::env::var_os(CONFIG_ENV) {
            Some(path) => Self::from_file(Path::new(&path)),
            None => Ok(Self::default()),
        }
    }

    pub fn from_file(path: &Path) -> Result<Self, ServerError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ServerError::ReadConfig {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&raw).map_err(|source| ServerError::ParseConfig {
            path: path.to_path_buf(),
            source,
        })
    }
}
