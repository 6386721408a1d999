//! Removing an installed package.

use std::fs;
use std::io;
use std::path::PathBuf;

use serde::Serialize;
use thiserror::Error;
use tracing::{info, warn};

use crate::config::{Config, ConfigError};
use crate::lock::{LockError, PackageLock};
use crate::record::{RecordError, RecordStore};

#[derive(Debug, Error)]
pub enum UninstallError {
  #[error("package '{0}' is not installed")]
  NotInstalled(String),

  #[error("package '{name}' is required by: {}", dependents.join(", "))]
  InUse { name: String, dependents: Vec<String> },

  #[error("recorded keg {} is outside {}", keg.display(), owned.display())]
  OutsideOwnedTree { keg: PathBuf, owned: PathBuf },

  #[error(transparent)]
  Lock(#[from] LockError),

  #[error(transparent)]
  Record(#[from] RecordError),

  #[error(transparent)]
  Config(#[from] ConfigError),

  #[error("failed to remove {}: {source}", path.display())]
  Io {
    path: PathBuf,
    #[source]
    source: io::Error,
  },
}

#[derive(Debug, Clone, Copy, Default)]
pub struct UninstallOptions {
  /// Remove even if other packages depend on this one at runtime.
  pub force: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct UninstallReport {
  pub name: String,
  pub version: String,
  pub removed: PathBuf,
  pub files: usize,
  /// Dependents left behind by a forced removal.
  pub orphaned_dependents: Vec<String>,
}

/// Remove `name`'s package directory and record.
pub fn uninstall(name: &str, options: UninstallOptions, config: &Config) -> Result<UninstallReport, UninstallError> {
  let mut config = config.clone();
  config.make_absolute()?;
  let layout = config.layout();
  let store = RecordStore::for_layout(&layout);

  let record = store
    .load(name)?
    .ok_or_else(|| UninstallError::NotInstalled(name.to_string()))?;

  let _lock = PackageLock::acquire(&layout, name, &format!("uninstall {}", name), config.lock_timeout())?;

  let dependents: Vec<String> = store
    .list()?
    .into_iter()
    .filter(|r| r.name != name && r.runtime_dependencies.iter().any(|d| d == name))
    .map(|r| r.name)
    .collect();

  if !dependents.is_empty() {
    if !options.force {
      return Err(UninstallError::InUse {
        name: name.to_string(),
        dependents,
      });
    }
    warn!(package = %name, dependents = ?dependents, "forcing removal of a runtime dependency");
  }

  let owned = layout.package_dir(name);
  if !record.prefix.starts_with(&owned) || record.prefix == owned {
    return Err(UninstallError::OutsideOwnedTree {
      keg: record.prefix.clone(),
      owned,
    });
  }

  match fs::remove_dir_all(&owned) {
    Ok(()) => {}
    Err(e) if e.kind() == io::ErrorKind::NotFound => {
      warn!(path = %owned.display(), "package directory already missing");
    }
    Err(source) => return Err(UninstallError::Io { path: owned, source }),
  }
  store.remove(name)?;

  info!(package = %name, version = %record.version, "uninstalled");
  Ok(UninstallReport {
    name: record.name,
    version: record.version,
    removed: owned,
    files: record.files.len(),
    orphaned_dependents: dependents,
  })
}
