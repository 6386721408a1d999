//! Orchestrator configuration.
//!
//! Resolution order, lowest to highest precedence:
//! 1. Built-in defaults derived from [`crate::platform::paths`]
//! 2. `<config_dir>/config.toml` (or an explicit file)
//! 3. `KILN_PREFIX`, `KILN_BUILD_DIR`, `KILN_CACHE_DIR`
//! 4. Command-line flags (applied by the caller)
//!
//! The resulting [`Config`] is passed explicitly to every component.

use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::consts::{
  DEFAULT_BASE_PATH, DEFAULT_COMMAND_TIMEOUT_SECS, DEFAULT_FETCH_TIMEOUT_SECS, DEFAULT_LOCK_TIMEOUT_SECS,
};
use crate::layout::PrefixLayout;
use crate::platform::paths;

const CONFIG_FILENAME: &str = "config.toml";

#[derive(Debug, Error)]
pub enum ConfigError {
  #[error("failed to read config {path}: {source}")]
  Read {
    path: PathBuf,
    #[source]
    source: io::Error,
  },

  #[error("invalid config {path}: {source}")]
  Parse {
    path: PathBuf,
    #[source]
    source: toml::de::Error,
  },

  #[error("cannot make {} absolute: {source}", path.display())]
  Absolute {
    path: PathBuf,
    #[source]
    source: io::Error,
  },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
  /// Root of the shared install prefix.
  pub prefix: PathBuf,
  /// Parent directory for ephemeral build roots.
  pub build_dir: PathBuf,
  /// Download cache for checksum-verified sources.
  pub cache_dir: PathBuf,
  pub fetch_timeout_secs: u64,
  /// Per build step and per test command.
  pub command_timeout_secs: u64,
  /// How long staging waits for another run holding the same package.
  pub lock_timeout_secs: u64,
  /// Extra attempts for retryable fetch failures.
  pub fetch_retries: u32,
  /// Reject sources declared with the unverified checksum marker.
  pub require_checksum: bool,
  /// PATH entries appended after dependency `bin/` directories.
  pub base_path: Vec<PathBuf>,
  /// Host environment variables forwarded into build steps.
  pub pass_env: Vec<String>,
}

impl Default for Config {
  fn default() -> Self {
    Self {
      prefix: paths::default_prefix(),
      build_dir: paths::default_build_dir(),
      cache_dir: paths::cache_dir(),
      fetch_timeout_secs: DEFAULT_FETCH_TIMEOUT_SECS,
      command_timeout_secs: DEFAULT_COMMAND_TIMEOUT_SECS,
      lock_timeout_secs: DEFAULT_LOCK_TIMEOUT_SECS,
      fetch_retries: 0,
      require_checksum: false,
      base_path: DEFAULT_BASE_PATH.iter().map(PathBuf::from).collect(),
      pass_env: Vec::new(),
    }
  }
}

impl Config {
  /// Load configuration from `path`, or from the default location when `None`.
  ///
  /// A missing default file is not an error; a missing explicit file is.
  pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
    let (path, explicit) = match path {
      Some(p) => (p.to_path_buf(), true),
      None => (paths::config_dir().join(CONFIG_FILENAME), false),
    };

    let mut config = match std::fs::read_to_string(&path) {
      Ok(content) => {
        debug!(path = %path.display(), "loading config");
        Self::from_toml_str(&content).map_err(|source| ConfigError::Parse {
          path: path.clone(),
          source,
        })?
      }
      Err(e) if e.kind() == io::ErrorKind::NotFound && !explicit => Self::default(),
      Err(source) => return Err(ConfigError::Read { path, source }),
    };

    config.apply_env();
    config.make_absolute()?;
    Ok(config)
  }

  pub fn from_toml_str(content: &str) -> Result<Self, toml::de::Error> {
    toml::from_str(content)
  }

  /// Configuration with every directory placed under `root`.
  pub fn rooted(root: &Path) -> Self {
    Self {
      prefix: root.join("prefix"),
      build_dir: root.join("builds"),
      cache_dir: root.join("cache"),
      ..Self::default()
    }
  }

  fn apply_env(&mut self) {
    if let Some(prefix) = std::env::var_os("KILN_PREFIX") {
      self.prefix = PathBuf::from(prefix);
    }
    if let Some(build_dir) = std::env::var_os("KILN_BUILD_DIR") {
      self.build_dir = PathBuf::from(build_dir);
    }
    if let Some(cache_dir) = std::env::var_os("KILN_CACHE_DIR") {
      self.cache_dir = PathBuf::from(cache_dir);
    }
  }

  /// Resolve relative `prefix`, `build_dir` and `cache_dir` against the
  /// current directory. Build steps and tests run elsewhere, so every
  /// recorded path must be absolute.
  pub fn make_absolute(&mut self) -> Result<(), ConfigError> {
    for dir in [&mut self.prefix, &mut self.build_dir, &mut self.cache_dir] {
      if dir.is_relative() {
        let resolved = std::path::absolute(&*dir).map_err(|source| ConfigError::Absolute {
          path: dir.clone(),
          source,
        })?;
        *dir = resolved;
      }
    }
    Ok(())
  }

  pub fn layout(&self) -> PrefixLayout {
    PrefixLayout::new(&self.prefix)
  }

  pub fn fetch_timeout(&self) -> Duration {
    Duration::from_secs(self.fetch_timeout_secs)
  }

  pub fn command_timeout(&self) -> Duration {
    Duration::from_secs(self.command_timeout_secs)
  }

  pub fn lock_timeout(&self) -> Duration {
    Duration::from_secs(self.lock_timeout_secs)
  }
}
