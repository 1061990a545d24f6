//! Configuration loading helpers
//!
//! A configuration file (YAML, TOML or JSON, picked by extension) is layered
//! under environment variables: `{PREFIX}SECTION__KEY=value` overrides
//! `section.key` from the file.

use std::path::{Path, PathBuf};

use figment::{
    providers::{Env, Format, Json, Toml, Yaml},
    Figment,
};
use serde::de::DeserializeOwned;
use thiserror::Error;
use tracing::{debug, info};

/// Errors raised while loading configuration
#[derive(Debug, Error)]
pub enum ConfigLoadError {
    #[error("Configuration file not found: {0}")]
    NotFound(PathBuf),

    #[error("Unsupported configuration format: {0}")]
    UnsupportedFormat(String),

    #[error("Invalid configuration: {0}")]
    Invalid(#[from] Box<figment::Error>),
}

/// Build the layered figment for `path` without extracting it
pub fn figment_for(path: &Path, env_prefix: &str) -> Result<Figment, ConfigLoadError> {
    if !path.exists() {
        return Err(ConfigLoadError::NotFound(path.to_path_buf()));
    }

    let extension = path
        .extension()
        .and_then(|ext| ext.to_str())
        .unwrap_or_default()
        .to_ascii_lowercase();

    let figment = match extension.as_str() {
        "yaml" | "yml" => Figment::new().merge(Yaml::file(path)),
        "toml" => Figment::new().merge(Toml::file(path)),
        "json" => Figment::new().merge(Json::file(path)),
        other => return Err(ConfigLoadError::UnsupportedFormat(other.to_string())),
    };

    debug!("Config env prefix: {}", env_prefix);
    Ok(figment.merge(Env::prefixed(env_prefix).split("__")))
}

/// Load and deserialize configuration with priority: ENV > file > serde defaults
pub fn load_config<T>(path: &Path, env_prefix: &str) -> Result<T, ConfigLoadError>
where
    T: DeserializeOwned,
{
    let config = figment_for(path, env_prefix)?
        .extract()
        .map_err(|e| ConfigLoadError::Invalid(Box::new(e)))?;
    info!("Loaded configuration from {}", path.display());
    Ok(config)
}
