//! Local dependency resolution.
//!
//! Dependencies are satisfied only by packages already recorded in the prefix;
//! nothing is installed on demand.

use std::collections::BTreeMap;
use std::path::PathBuf;

use thiserror::Error;
use tracing::debug;

pub use crate::descriptor::dependency_env_var;
use crate::descriptor::{DependencyScope, DependencySpec};
use crate::record::{InstallationRecord, RecordError, RecordStore};

#[derive(Debug, Error)]
pub enum ResolveError {
  #[error("missing dependencies: {}", names.join(", "))]
  MissingDependency { names: Vec<String> },

  #[error(transparent)]
  Record(#[from] RecordError),
}

#[derive(Debug, Clone)]
pub struct ResolvedDependency {
  pub scope: DependencyScope,
  pub record: InstallationRecord,
}

/// Installed records for every declared dependency, in declaration order.
#[derive(Debug, Clone, Default)]
pub struct ResolvedDependencies {
  entries: Vec<ResolvedDependency>,
}

impl ResolvedDependencies {
  pub fn get(&self, name: &str) -> Option<&InstallationRecord> {
    self.entries.iter().find(|e| e.record.name == name).map(|e| &e.record)
  }

  pub fn iter(&self) -> impl Iterator<Item = &ResolvedDependency> {
    self.entries.iter()
  }

  pub fn len(&self) -> usize {
    self.entries.len()
  }

  pub fn is_empty(&self) -> bool {
    self.entries.is_empty()
  }

  /// `KILN_DEP_<NAME>_PREFIX` for every dependency, build and runtime.
  pub fn build_env(&self) -> BTreeMap<String, String> {
    self
      .entries
      .iter()
      .map(|e| {
        (
          dependency_env_var(&e.record.name),
          e.record.prefix.to_string_lossy().into_owned(),
        )
      })
      .collect()
  }

  /// `bin/` of every dependency, for the build PATH.
  pub fn build_bin_dirs(&self) -> Vec<PathBuf> {
    self.entries.iter().map(|e| e.record.bin_dir()).collect()
  }

  /// `bin/` of runtime dependencies only.
  pub fn runtime_bin_dirs(&self) -> Vec<PathBuf> {
    self.runtime().map(|r| r.bin_dir()).collect()
  }

  pub fn runtime_names(&self) -> Vec<String> {
    self.runtime().map(|r| r.name.clone()).collect()
  }

  pub fn build_names(&self) -> Vec<String> {
    self
      .entries
      .iter()
      .filter(|e| e.scope == DependencyScope::Build)
      .map(|e| e.record.name.clone())
      .collect()
  }

  fn runtime(&self) -> impl Iterator<Item = &InstallationRecord> {
    self
      .entries
      .iter()
      .filter(|e| e.scope == DependencyScope::Runtime)
      .map(|e| &e.record)
  }
}

/// Look up every dependency in `records`, reporting all missing names at once.
pub fn resolve(deps: &[DependencySpec], records: &RecordStore) -> Result<ResolvedDependencies, ResolveError> {
  let mut entries = Vec::with_capacity(deps.len());
  let mut missing = Vec::new();

  for dep in deps {
    match records.load(&dep.name)? {
      Some(record) => {
        debug!(name = %dep.name, scope = %dep.scope, version = %record.version, "dependency resolved");
        entries.push(ResolvedDependency {
          scope: dep.scope,
          record,
        });
      }
      None => missing.push(dep.name.clone()),
    }
  }

  if !missing.is_empty() {
    return Err(ResolveError::MissingDependency { names: missing });
  }

  Ok(ResolvedDependencies { entries })
}
