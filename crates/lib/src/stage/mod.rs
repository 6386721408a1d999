//! Installing build outputs into the shared prefix.
//!
//! Staging is all-or-nothing:
//! 1. every mapping is matched against the source tree before anything is written
//! 2. matches are copied into a private tree under `.kiln/staging` and hashed
//! 3. the tree is renamed into `pkgs/<name>/<version>`, the record is written
//!    and the `current` link is swapped
//!
//! A failure before step 3 leaves the prefix untouched; a failure during step 3
//! restores the previous keg, record and link.

mod mapping;

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::Utc;
use thiserror::Error;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::consts::{CURRENT_LINK, RECORD_FORMAT_VERSION};
use crate::descriptor::{Category, Checksum, FileMapping, TestProcedure};
use crate::layout::{PrefixLayout, category_subpath};
use crate::lock::{LockError, PackageLock};
use crate::record::{InstallationRecord, InstalledFile, RecordError, RecordStore};
use crate::util::hash::hash_file;

#[derive(Debug, Error)]
pub enum StageError {
  #[error(transparent)]
  Locked(LockError),

  #[error("no files match pattern '{pattern}'")]
  NoMatch { pattern: String },

  #[error("pattern '{pattern}' matched {count} paths but declares a rename")]
  AmbiguousRename { pattern: String, count: usize },

  #[error("invalid pattern '{pattern}': {message}")]
  InvalidPattern { pattern: String, message: String },

  #[error("staging '{mapping}' failed: {reason}")]
  StageIncomplete { mapping: String, reason: String },

  #[error("failed to publish {}: {source}", path.display())]
  Publish {
    path: PathBuf,
    #[source]
    source: io::Error,
  },

  #[error(transparent)]
  Record(#[from] RecordError),
}

/// Everything the stager needs, owned so staging can run on a blocking thread.
#[derive(Debug, Clone)]
pub struct StageRequest {
  pub layout: PrefixLayout,
  pub name: String,
  pub version: String,
  pub source_root: PathBuf,
  pub mappings: Vec<FileMapping>,
  pub runtime_dependencies: Vec<String>,
  pub build_dependencies: Vec<String>,
  pub source_url: String,
  pub checksum: Checksum,
  pub test: TestProcedure,
  pub lock_timeout: Duration,
}

/// Copy mapped outputs into the prefix and record the installation.
pub fn stage(request: &StageRequest) -> Result<InstallationRecord, StageError> {
  let matched = mapping::match_all(&request.source_root, &request.mappings)?;

  let _lock = PackageLock::acquire(
    &request.layout,
    &request.name,
    &format!("install {}", request.name),
    request.lock_timeout,
  )
  .map_err(StageError::Locked)?;

  let staging_parent = request.layout.staging_dir();
  fs::create_dir_all(&staging_parent).map_err(|source| StageError::Publish {
    path: staging_parent.clone(),
    source,
  })?;
  let staging = tempfile::Builder::new()
    .prefix(&format!("{}-", request.name))
    .tempdir_in(&staging_parent)
    .map_err(|source| StageError::Publish {
      path: staging_parent.clone(),
      source,
    })?;

  let keg = request.layout.keg_dir(&request.name, &request.version);
  let mut files = Vec::new();
  for m in &matched {
    for rel in &m.matches {
      copy_match(request, m.mapping, rel, staging.path(), &keg, &mut files)?;
    }
  }
  files.sort_by(|a, b| a.path.cmp(&b.path));
  debug!(package = %request.name, files = files.len(), "staged outputs");

  let store = RecordStore::for_layout(&request.layout);
  let previous = store.load(&request.name)?;

  let mut record = InstallationRecord {
    format_version: RECORD_FORMAT_VERSION,
    name: request.name.clone(),
    version: request.version.clone(),
    prefix: keg.clone(),
    files,
    runtime_dependencies: request.runtime_dependencies.clone(),
    build_dependencies: request.build_dependencies.clone(),
    source_url: request.source_url.clone(),
    checksum: request.checksum.clone(),
    test: request.test.clone(),
    installed_at: Utc::now(),
  };
  if let Some(prev) = &previous
    && record.same_installation(prev)
  {
    record.installed_at = prev.installed_at;
  }

  publish(request, staging.path(), &record, previous.as_ref(), &store)?;

  info!(package = %request.name, version = %request.version, keg = %keg.display(), "installed");
  Ok(record)
}

fn copy_match(
  request: &StageRequest,
  mapping: &FileMapping,
  rel: &Path,
  staging: &Path,
  keg: &Path,
  files: &mut Vec<InstalledFile>,
) -> Result<(), StageError> {
  let incomplete = |reason: String| StageError::StageIncomplete {
    mapping: mapping.pattern.clone(),
    reason,
  };

  let mut dest_rel = category_subpath(mapping.category, &request.name);
  if let Some(subdir) = &mapping.subdir {
    dest_rel.push(subdir);
  }
  match (&mapping.rename, rel.file_name()) {
    (Some(rename), _) => dest_rel.push(rename),
    (None, Some(name)) => dest_rel.push(name),
    (None, None) => return Err(incomplete(format!("'{}' has no file name", rel.display()))),
  }

  let src = request.source_root.join(rel);
  let metadata = fs::metadata(&src).map_err(|e| incomplete(format!("{}: {}", src.display(), e)))?;

  if !metadata.is_dir() {
    return copy_file(mapping, &src, &dest_rel, staging, keg, files);
  }

  for entry in WalkDir::new(&src).min_depth(1).sort_by_file_name() {
    let entry = entry.map_err(|e| incomplete(e.to_string()))?;
    if entry.file_type().is_dir() {
      continue;
    }
    let Ok(inner) = entry.path().strip_prefix(&src) else {
      continue;
    };
    copy_file(mapping, entry.path(), &dest_rel.join(inner), staging, keg, files)?;
  }
  Ok(())
}

fn copy_file(
  mapping: &FileMapping,
  src: &Path,
  dest_rel: &Path,
  staging: &Path,
  keg: &Path,
  files: &mut Vec<InstalledFile>,
) -> Result<(), StageError> {
  let incomplete = |reason: String| StageError::StageIncomplete {
    mapping: mapping.pattern.clone(),
    reason,
  };

  let dest = staging.join(dest_rel);
  if dest.exists() {
    return Err(incomplete(format!("'{}' is produced more than once", dest_rel.display())));
  }
  if let Some(parent) = dest.parent() {
    fs::create_dir_all(parent).map_err(|e| incomplete(e.to_string()))?;
  }
  fs::copy(src, &dest).map_err(|e| incomplete(format!("{}: {}", src.display(), e)))?;

  #[cfg(unix)]
  {
    use std::os::unix::fs::PermissionsExt;
    if mapping.category == Category::Executable {
      fs::set_permissions(&dest, fs::Permissions::from_mode(0o755)).map_err(|e| incomplete(e.to_string()))?;
    }
  }

  let sha256 = hash_file(&dest).map_err(|e| incomplete(e.to_string()))?;
  files.push(InstalledFile {
    path: keg.join(dest_rel),
    category: mapping.category,
    sha256: sha256.0,
  });
  Ok(())
}

/// Move the staged tree into place, then write the record and swap the link.
fn publish(
  request: &StageRequest,
  staged: &Path,
  record: &InstallationRecord,
  previous: Option<&InstallationRecord>,
  store: &RecordStore,
) -> Result<(), StageError> {
  let layout = &request.layout;
  let package_dir = layout.package_dir(&request.name);
  let keg = layout.keg_dir(&request.name, &request.version);
  let publish_err = |path: &Path| {
    let path = path.to_path_buf();
    move |source: io::Error| StageError::Publish { path, source }
  };

  fs::create_dir_all(&package_dir).map_err(publish_err(&package_dir))?;

  // Staging directories are created private; kegs are world-readable.
  #[cfg(unix)]
  {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(staged, fs::Permissions::from_mode(0o755)).map_err(publish_err(staged))?;
  }

  let aside = package_dir.join(format!(".{}.old-{}", request.version, std::process::id()));
  let had_keg = keg.exists();
  if had_keg {
    fs::rename(&keg, &aside).map_err(publish_err(&keg))?;
  }

  let rollback = |restore_record: bool| {
    if keg.exists()
      && let Err(e) = fs::remove_dir_all(&keg)
    {
      warn!(path = %keg.display(), error = %e, "rollback: failed to remove new keg");
    }
    if had_keg && let Err(e) = fs::rename(&aside, &keg) {
      warn!(path = %keg.display(), error = %e, "rollback: failed to restore previous keg");
    }
    if restore_record {
      let restored = match previous {
        Some(prev) => store.save(prev),
        None => store.remove(&request.name).map(|_| ()),
      };
      if let Err(e) = restored {
        warn!(package = %request.name, error = %e, "rollback: failed to restore previous record");
      }
    }
  };

  if let Err(source) = fs::rename(staged, &keg) {
    rollback(false);
    return Err(StageError::Publish {
      path: keg.clone(),
      source,
    });
  }

  if let Err(e) = store.save(record) {
    rollback(true);
    return Err(e.into());
  }

  if let Err(source) = swap_current_link(&package_dir, &request.version) {
    rollback(true);
    return Err(StageError::Publish {
      path: layout.current_link(&request.name),
      source,
    });
  }

  if had_keg && let Err(e) = fs::remove_dir_all(&aside) {
    warn!(path = %aside.display(), error = %e, "failed to remove replaced keg");
  }

  if let Some(prev) = previous
    && prev.version != request.version
    && prev.prefix.starts_with(&package_dir)
    && prev.prefix.exists()
  {
    debug!(package = %request.name, version = %prev.version, "removing superseded keg");
    if let Err(e) = fs::remove_dir_all(&prev.prefix) {
      warn!(path = %prev.prefix.display(), error = %e, "failed to remove superseded keg");
    }
  }

  Ok(())
}

/// Point `current` at `version` by renaming a fresh link over the old one.
#[cfg(unix)]
fn swap_current_link(package_dir: &Path, version: &str) -> io::Result<()> {
  let tmp = package_dir.join(format!(".{}.tmp-{}", CURRENT_LINK, std::process::id()));
  if fs::symlink_metadata(&tmp).is_ok() {
    fs::remove_file(&tmp)?;
  }
  std::os::unix::fs::symlink(version, &tmp)?;
  fs::rename(&tmp, package_dir.join(CURRENT_LINK))
}

#[cfg(not(unix))]
fn swap_current_link(_package_dir: &Path, _version: &str) -> io::Result<()> {
  Err(io::Error::new(io::ErrorKind::Unsupported, "version links require a unix platform"))
}
