use std::fs;
use std::io;
use std::path::Path;
use std::path::PathBuf;
use std::time::Duration;

use log::info;
use serde::Deserialize;

use crate::error::ConfigError;

pub const DEFAULT_CONFIG_PATH: &str = "arcade.json";

// NOTE: Used to match what a regular browser sends as some profile pages are
// served differently to unknown clients.
const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0 Safari/537.36";

/// Every key is optional. A missing file means all defaults.
#[must_use]
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default)]
pub struct Config {
  pub store_path: PathBuf,
  pub fetch: FetchConfig,
  pub refresh: RefreshConfig,
}

impl Default for Config {
  fn default() -> Self {
    Self {
      store_path: PathBuf::from("leaderboard.json"),
      fetch: FetchConfig::default(),
      refresh: RefreshConfig::default(),
    }
  }
}

#[must_use]
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default)]
pub struct FetchConfig {
  /// Fetch through this relay (`<relay>?url=<profile>`) instead of directly.
  pub relay_url: Option<String>,
  pub timeout_secs: u64,
  pub user_agent: String,
}

impl Default for FetchConfig {
  fn default() -> Self {
    Self {
      relay_url: None,
      timeout_secs: 15,
      user_agent: String::from(DEFAULT_USER_AGENT),
    }
  }
}

impl FetchConfig {
  pub fn timeout(&self) -> Duration {
    Duration::from_secs(self.timeout_secs)
  }
}

#[must_use]
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default)]
pub struct RefreshConfig {
  pub batch_width: usize,
  pub batch_pause_millis: u64,
  pub max_attempts: u32,
  pub retry_backoff_millis: u64,
  pub cleanup_duplicates_first: bool,
}

impl Default for RefreshConfig {
  fn default() -> Self {
    Self {
      batch_width: 5,
      batch_pause_millis: 1000,
      max_attempts: 2,
      retry_backoff_millis: 500,
      cleanup_duplicates_first: false,
    }
  }
}

impl Config {
  pub fn load(path: &Path) -> Result<Self, ConfigError> {
    let json = match fs::read_to_string(path) {
      Ok(json) => json,
      Err(error) if error.kind() == io::ErrorKind::NotFound => {
        info!("No config at {path:?}, using defaults.");
        return Ok(Self::default());
      }
      Err(source) => {
        return Err(ConfigError::Io {
          path: path.display().to_string(),
          source,
        })
      }
    };

    serde_json::from_str(&json).map_err(|source| ConfigError::Json {
      path: path.display().to_string(),
      source,
    })
  }
}

#[cfg(test)]
mod tests {
  use std::fs;
  use std::path::PathBuf;

  use pretty_assertions::assert_eq;

  use super::Config;
  use super::RefreshConfig;
  use crate::error::ConfigError;

  #[test]
  fn test_missing_file_means_defaults() {
    let dir = tempfile::tempdir().unwrap();

    assert_eq!(
      Config::load(&dir.path().join("absent.json")).unwrap(),
      Config::default()
    );
  }

  #[test]
  fn test_partial_file_keeps_other_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("arcade.json");
    fs::write(
      &path,
      r#"{
        "storePath": "/var/lib/arcade/board.json",
        "fetch": { "relayUrl": "https://relay.example/api/proxy-profile" },
        "refresh": { "batchWidth": 3, "cleanupDuplicatesFirst": true }
      }"#,
    )
    .unwrap();

    let config = Config::load(&path).unwrap();

    assert_eq!(config.store_path, PathBuf::from("/var/lib/arcade/board.json"));
    assert_eq!(
      config.fetch.relay_url.as_deref(),
      Some("https://relay.example/api/proxy-profile")
    );
    assert_eq!(config.fetch.timeout_secs, 15);
    assert_eq!(
      config.refresh,
      RefreshConfig {
        batch_width: 3,
        cleanup_duplicates_first: true,
        ..RefreshConfig::default()
      }
    );
  }

  #[test]
  fn test_malformed_file_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("arcade.json");
    fs::write(&path, "{ storePath: ").unwrap();

    assert!(matches!(
      Config::load(&path),
      Err(ConfigError::Json { .. })
    ));
  }
}
