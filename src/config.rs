use serde::Deserialize;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors raised while locating or parsing the config file.
#[derive(Debug, Error)]
pub enum ConfigError {
  #[error("config file not found: {0}")]
  NotFound(String),

  #[error("failed to read config file {}: {source}", .path.display())]
  Io {
    path: PathBuf,
    source: std::io::Error,
  },

  #[error("failed to parse config file {}: {source}", .path.display())]
  Parse {
    path: PathBuf,
    source: serde_yaml::Error,
  },
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
  #[serde(default)]
  pub cache: CacheConfig,
}

/// Tuning for the client-side query cache.
#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
  /// Age in seconds after which a fresh entry is treated as stale
  /// (unset: only mutations outdate entries)
  #[serde(default)]
  pub stale_after_secs: Option<u64>,

  /// Consecutive fetch failures after which reads stop retrying and serve
  /// the stored error
  #[serde(default = "default_retry_budget")]
  pub error_retry_budget: u32,

  /// Whether invalidated entries refetch immediately or on next read
  #[serde(default)]
  pub revalidate: RevalidateMode,
}

fn default_retry_budget() -> u32 {
  3
}

impl Default for CacheConfig {
  fn default() -> Self {
    Self {
      stale_after_secs: None,
      error_retry_budget: default_retry_budget(),
      revalidate: RevalidateMode::default(),
    }
  }
}

/// When invalidated entries are refetched.
#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RevalidateMode {
  /// Refetch on the next read (stale-while-revalidate)
  #[default]
  Lazy,
  /// Refetch as soon as a mutation lands
  Eager,
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided (an error if it does not exist)
  /// 2. ./restash.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/restash/config.yaml
  ///
  /// With no file anywhere, defaults apply.
  pub fn load(explicit_path: Option<&Path>) -> Result<Self, ConfigError> {
    let path = if let Some(p) = explicit_path {
      if p.exists() {
        Some(p.to_path_buf())
      } else {
        return Err(ConfigError::NotFound(p.display().to_string()));
      }
    } else {
      Self::find_config_file()
    };

    match path {
      Some(p) => Self::load_from_path(&p),
      None => Ok(Self::default()),
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    // Check current directory
    let local = PathBuf::from("restash.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("restash").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self, ConfigError> {
    let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
      path: path.to_path_buf(),
      source: e,
    })?;

    serde_yaml::from_str(&contents).map_err(|e| ConfigError::Parse {
      path: path.to_path_buf(),
      source: e,
    })
  }
}
