use std::{env, fmt::Display, fs::read_to_string, path::PathBuf, str::FromStr};

use thiserror::Error;
use tracing::{info, warn};

use crate::{ledger::DEFAULT_MAX_ATTEMPTS, store::StoreLayout};

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid {key} value {value:?}: {reason}")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },
}

#[derive(Debug, Clone)]
pub struct StoreConfig {
    pub endpoint: Option<String>,
    pub key: Option<String>,
    pub layout: StoreLayout,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub reload: bool,
    pub site_dir: PathBuf,
    pub max_attempts: u32,
    pub store: StoreConfig,
}

impl Config {
    pub fn load() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds the config from any key lookup. Missing store settings are left
    /// as `None` and only fail once the store is first needed.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = StoreLayout::default();

        Ok(Self {
            host: try_load(&lookup, "HOST", "127.0.0.1")?,
            port: try_load(&lookup, "PORT", "8000")?,
            reload: try_load::<String>(&lookup, "RELOAD", "0")? == "1",
            site_dir: try_load(&lookup, "SITE_DIR", ".")?,
            max_attempts: try_load::<u32>(
                &lookup,
                "LEDGER_MAX_ATTEMPTS",
                &DEFAULT_MAX_ATTEMPTS.to_string(),
            )?
            .max(1),
            store: StoreConfig {
                endpoint: optional(&lookup, "STORE_ENDPOINT"),
                key: optional(&lookup, "STORE_KEY").or_else(|| read_secret("STORE_KEY")),
                layout: StoreLayout {
                    database: try_load(&lookup, "STORE_DB", &defaults.database)?,
                    container: try_load(&lookup, "STORE_CONTAINER", &defaults.container)?,
                    partition_key: try_load(
                        &lookup,
                        "STORE_PARTITION_KEY",
                        &defaults.partition_key,
                    )?,
                },
            },
        })
    }
}

fn optional(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<String> {
    lookup(key).filter(|value| !value.trim().is_empty())
}

fn try_load<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &'static str,
    default: &str,
) -> Result<T, ConfigError>
where
    T::Err: Display,
{
    let value = optional(lookup, key).unwrap_or_else(|| {
        info!("{key} not set, using default: {default}");
        default.to_string()
    });

    value.parse().map_err(|e: T::Err| {
        warn!("Invalid {key} value: {e}");

        ConfigError::Invalid {
            key,
            reason: e.to_string(),
            value,
        }
    })
}

fn read_secret(secret_name: &str) -> Option<String> {
    let path = format!("/run/secrets/{secret_name}");

    read_to_string(&path)
        .map(|s| s.trim().to_string())
        .map_err(|e| {
            warn!("Failed to read {secret_name} from file: {e}");
        })
        .ok()
}
