//! Layered configuration (spec.md §6).
//!
//! Built on the `config` crate's builder: compiled-in defaults, an
//! optional TOML file, then environment variables as the final override
//! layer. `.env` files are loaded first via `dotenvy` so local development
//! can populate the process environment without exporting anything.

use crate::error::{FlowforgeError, FlowforgeResult};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Recognized environment/config keys (spec.md §6). Anything else present
/// in the environment or config file is ignored with a warning rather than
/// rejected.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FlowforgeConfig {
    pub db_url: String,
    pub readonly_db_url: Option<String>,
    pub db_pool_size: u32,
    pub redis_url: String,
    pub batch_workers: usize,
    pub handler_workers: usize,
    pub attachment_storage: String,
    pub session_storage: String,
    pub search_index_url: Option<String>,
    pub domain: String,
    pub fcm_key: Option<String>,
    pub librato_user: Option<String>,
    pub librato_token: Option<String>,
}

impl Default for FlowforgeConfig {
    fn default() -> Self {
        Self {
            db_url: "postgres://localhost/flowforge".to_string(),
            readonly_db_url: None,
            db_pool_size: 36,
            redis_url: "redis://localhost:6379/0".to_string(),
            batch_workers: 4,
            handler_workers: 32,
            attachment_storage: "s3".to_string(),
            session_storage: "db".to_string(),
            search_index_url: None,
            domain: "localhost".to_string(),
            fcm_key: None,
            librato_user: None,
            librato_token: None,
        }
    }
}

impl FlowforgeConfig {
    /// Loads config from (in increasing priority): compiled-in defaults,
    /// an optional TOML file at `path`, then process environment
    /// variables (`.env` is read into the environment first if present).
    pub fn load(path: Option<&Path>) -> FlowforgeResult<Self> {
        if let Err(err) = dotenvy::dotenv() {
            if !matches!(err, dotenvy::Error::Io(ref io) if io.kind() == std::io::ErrorKind::NotFound) {
                tracing::warn!(error = %err, "failed to load .env file");
            }
        }

        let defaults = config::Config::try_from(&FlowforgeConfig::default())
            .map_err(|e| FlowforgeError::Config(e.to_string()))?;
        let mut builder = config::Config::builder().add_source(defaults);

        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(false));
        }

        builder = builder.add_source(
            config::Environment::default()
                .try_parsing(true)
                .separator("__"),
        );

        let built = builder
            .build()
            .map_err(|e| FlowforgeError::Config(e.to_string()))?;

        built
            .try_deserialize()
            .map_err(|e| FlowforgeError::Config(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_usable_without_any_source() {
        let config = FlowforgeConfig::default();
        assert_eq!(config.batch_workers, 4);
        assert_eq!(config.handler_workers, 32);
        assert!(config.readonly_db_url.is_none());
    }
}
