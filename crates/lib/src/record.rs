//! Installation records.
//!
//! One JSON file per installed package under `<prefix>/.kiln/records/`.
//! A record is written only after a keg has been published, and it is what the
//! dependency resolver, `test` and `uninstall` consult later.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::consts::RECORD_FORMAT_VERSION;
use crate::descriptor::{Category, Checksum, TestProcedure, is_valid_name};
use crate::layout::{self, PrefixLayout};

#[derive(Debug, Error)]
pub enum RecordError {
  #[error("failed to create records directory: {0}")]
  CreateDir(#[source] io::Error),

  #[error("failed to read record for '{name}': {source}")]
  Read {
    name: String,
    #[source]
    source: io::Error,
  },

  #[error("corrupt record for '{name}': {source}")]
  Parse {
    name: String,
    #[source]
    source: serde_json::Error,
  },

  #[error("failed to serialize record: {0}")]
  Serialize(#[source] serde_json::Error),

  #[error("failed to write record: {0}")]
  Write(#[source] io::Error),

  #[error("record for '{name}' has unsupported format version {version}")]
  UnsupportedVersion { name: String, version: u32 },

  #[error("'{0}' is not a valid package name")]
  InvalidName(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstalledFile {
  /// Absolute path inside the keg.
  pub path: PathBuf,
  pub category: Category,
  pub sha256: String,
}

/// Persisted proof that a package was built and staged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstallationRecord {
  pub format_version: u32,
  pub name: String,
  pub version: String,
  /// Absolute keg path (`<prefix>/pkgs/<name>/<version>`).
  pub prefix: PathBuf,
  pub files: Vec<InstalledFile>,
  pub runtime_dependencies: Vec<String>,
  pub build_dependencies: Vec<String>,
  pub source_url: String,
  pub checksum: Checksum,
  /// Kept so `test` can run without the original descriptor.
  pub test: TestProcedure,
  pub installed_at: DateTime<Utc>,
}

impl InstallationRecord {
  pub fn bin_dir(&self) -> PathBuf {
    layout::bin_dir(&self.prefix)
  }

  /// Equal in everything but the timestamp.
  pub fn same_installation(&self, other: &InstallationRecord) -> bool {
    InstallationRecord {
      installed_at: other.installed_at,
      ..self.clone()
    } == *other
  }

  pub fn files_in(&self, category: Category) -> impl Iterator<Item = &InstalledFile> {
    self.files.iter().filter(move |f| f.category == category)
  }
}

/// Reads and writes installation records.
#[derive(Debug, Clone)]
pub struct RecordStore {
  dir: PathBuf,
}

impl RecordStore {
  pub fn new(dir: PathBuf) -> Self {
    Self { dir }
  }

  pub fn for_layout(layout: &PrefixLayout) -> Self {
    Self::new(layout.records_dir())
  }

  pub fn dir(&self) -> &Path {
    &self.dir
  }

  fn record_path(&self, name: &str) -> PathBuf {
    self.dir.join(format!("{}.json", name))
  }

  /// Load the record for `name`, or `None` if the package is not installed.
  pub fn load(&self, name: &str) -> Result<Option<InstallationRecord>, RecordError> {
    if !is_valid_name(name) {
      return Err(RecordError::InvalidName(name.to_string()));
    }

    let content = match fs::read_to_string(self.record_path(name)) {
      Ok(content) => content,
      Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
      Err(source) => {
        return Err(RecordError::Read {
          name: name.to_string(),
          source,
        });
      }
    };

    let record: InstallationRecord = serde_json::from_str(&content).map_err(|source| RecordError::Parse {
      name: name.to_string(),
      source,
    })?;

    if record.format_version != RECORD_FORMAT_VERSION {
      return Err(RecordError::UnsupportedVersion {
        name: name.to_string(),
        version: record.format_version,
      });
    }

    Ok(Some(record))
  }

  /// Write a record atomically (temp file, then rename).
  pub fn save(&self, record: &InstallationRecord) -> Result<(), RecordError> {
    fs::create_dir_all(&self.dir).map_err(RecordError::CreateDir)?;

    let path = self.record_path(&record.name);
    let temp_path = self.dir.join(format!("{}.json.tmp", record.name));

    let content = serde_json::to_string_pretty(record).map_err(RecordError::Serialize)?;
    fs::write(&temp_path, &content).map_err(RecordError::Write)?;
    fs::rename(&temp_path, &path).map_err(RecordError::Write)?;

    debug!(name = %record.name, path = %path.display(), "record saved");
    Ok(())
  }

  /// Remove the record for `name`. Returns false if there was none.
  pub fn remove(&self, name: &str) -> Result<bool, RecordError> {
    if !is_valid_name(name) {
      return Err(RecordError::InvalidName(name.to_string()));
    }

    match fs::remove_file(self.record_path(name)) {
      Ok(()) => Ok(true),
      Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
      Err(e) => Err(RecordError::Write(e)),
    }
  }

  /// All records, sorted by package name.
  pub fn list(&self) -> Result<Vec<InstallationRecord>, RecordError> {
    let entries = match fs::read_dir(&self.dir) {
      Ok(entries) => entries,
      Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
      Err(source) => {
        return Err(RecordError::Read {
          name: "*".to_string(),
          source,
        });
      }
    };

    let mut names: Vec<String> = entries
      .filter_map(|e| e.ok())
      .filter_map(|e| {
        let file_name = e.file_name().into_string().ok()?;
        file_name.strip_suffix(".json").map(str::to_string)
      })
      .collect();
    names.sort();

    let mut records = Vec::with_capacity(names.len());
    for name in names {
      if let Some(record) = self.load(&name)? {
        records.push(record);
      }
    }
    Ok(records)
  }
}
