use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

pub const CONFIG_FILE_NAME: &str = ".gemini_chatbot_config.json";
pub const IMAGE_DIR_NAME: &str = ".genz_chatbot_temp";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
  #[error("failed to read config {path}: {source}")]
  Read {
    path: PathBuf,
    source: std::io::Error,
  },
  #[error("failed to write config {path}: {source}")]
  Write {
    path: PathBuf,
    source: std::io::Error,
  },
  #[error("config {path} is not valid JSON: {source}")]
  Parse {
    path: PathBuf,
    source: serde_json::Error,
  },
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct AppConfig {
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub api_key: Option<String>,
}

impl AppConfig {
  pub fn with_api_key(api_key: impl Into<String>) -> Self {
    Self {
      api_key: Some(api_key.into()),
    }
  }

  /// The stored key, if it is non-blank.
  pub fn credential(&self) -> Option<&str> {
    self
      .api_key
      .as_deref()
      .map(str::trim)
      .filter(|key| !key.is_empty())
  }
}

pub fn default_config_path() -> Option<PathBuf> {
  dirs::home_dir().map(|home| home.join(CONFIG_FILE_NAME))
}

pub fn default_image_dir() -> Option<PathBuf> {
  dirs::home_dir().map(|home| home.join(IMAGE_DIR_NAME))
}

/// Reads the config file. A missing file is not an error.
pub fn load_config(path: &Path) -> Result<Option<AppConfig>, ConfigError> {
  if !path.exists() {
    return Ok(None);
  }
  let data = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
    path: path.to_path_buf(),
    source,
  })?;
  let config = serde_json::from_str(&data).map_err(|source| ConfigError::Parse {
    path: path.to_path_buf(),
    source,
  })?;
  Ok(Some(config))
}

pub fn save_config(path: &Path, config: &AppConfig) -> Result<(), ConfigError> {
  let write_err = |source: std::io::Error| ConfigError::Write {
    path: path.to_path_buf(),
    source,
  };
  if let Some(parent) = path.parent() {
    std::fs::create_dir_all(parent).map_err(write_err)?;
  }
  let json = serde_json::to_string_pretty(config).map_err(|err| write_err(err.into()))?;
  std::fs::write(path, json).map_err(write_err)?;
  tracing::info!(path = %path.display(), "saved configuration");
  Ok(())
}
