//! Config Loader
//!
//! Reads a `ClientConfig` from TOML, JSON or YAML. Configuration is never written back.

use log::{debug, info, warn};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::fs;

use super::types::ClientConfig;

/// Environment variable overriding `global.log_level`
pub const LOG_LEVEL_ENV: &str = "MCP_CONNECT_LOG_LEVEL";

#[derive(Error, Debug)]
pub enum LoaderError {
    #[error("IO error: {0}")]
    IoError(String),

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Default location: `<config dir>/mcp-connect/config.toml`
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("mcp-connect").join("config.toml"))
}

/// Parse configuration text in the given format (`toml`, `json`, `yaml`/`yml`)
pub fn parse_config(content: &str, format: &str) -> Result<ClientConfig, LoaderError> {
    let config: ClientConfig = match format {
        "toml" => toml::from_str(content)
            .map_err(|e| LoaderError::ParseError(format!("TOML parse error: {}", e)))?,
        "json" => serde_json::from_str(content)
            .map_err(|e| LoaderError::ParseError(format!("JSON parse error: {}", e)))?,
        "yaml" | "yml" => serde_yaml::from_str(content)
            .map_err(|e| LoaderError::ParseError(format!("YAML parse error: {}", e)))?,
        other => {
            return Err(LoaderError::ParseError(format!(
                "Unknown config format: {}",
                other
            )))
        }
    };

    config
        .validate()
        .map_err(|e| LoaderError::Invalid(e.to_string()))?;
    Ok(config)
}

/// Load configuration from a file, format chosen by extension
pub async fn load_config_file(path: &Path) -> Result<ClientConfig, LoaderError> {
    let content = fs::read_to_string(path)
        .await
        .map_err(|e| LoaderError::IoError(format!("{}: {}", path.display(), e)))?;

    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("toml");

    let mut config = parse_config(&content, extension)?;
    apply_env_overrides(&mut config);

    info!("Loaded client configuration from {:?}", path);
    Ok(config)
}

/// Load from `path`, or the default location, falling back to built-in defaults
pub async fn load_or_default(path: Option<&Path>) -> Result<ClientConfig, LoaderError> {
    if let Some(path) = path {
        return load_config_file(path).await;
    }

    match default_config_path() {
        Some(path) if path.exists() => load_config_file(&path).await,
        _ => {
            debug!("No configuration file found, using defaults");
            let mut config = ClientConfig::default();
            apply_env_overrides(&mut config);
            Ok(config)
        }
    }
}

fn apply_env_overrides(config: &mut ClientConfig) {
    if let Ok(level) = std::env::var(LOG_LEVEL_ENV) {
        if level.trim().is_empty() {
            warn!("{} is set but empty; ignoring", LOG_LEVEL_ENV);
        } else {
            config.global.log_level = level;
        }
    }
}
