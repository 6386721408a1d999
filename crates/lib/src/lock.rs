//! Per-package file locks.
//!
//! Each package owns `<prefix>/.kiln/locks/<name>.lock`. Staging and uninstall
//! hold it exclusively, so two runs touching the same package subtree are
//! serialized while runs for different packages never contend.

use std::fs::{File, OpenOptions};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::layout::PrefixLayout;

const POLL_INTERVAL: Duration = Duration::from_millis(50);

#[derive(Debug, Serialize, Deserialize)]
pub struct LockMetadata {
  pub version: u32,
  pub pid: u32,
  pub started_at_unix: u64,
  pub command: String,
  pub package: String,
}

#[derive(Debug, Error)]
pub enum LockError {
  #[error(
    "package '{package}' is locked by another process: {command} (PID {pid}, started at unix {started_at_unix})\n\
             If you're sure no kiln process is running, remove the lock file:\n  {lock_path}"
  )]
  Contention {
    package: String,
    command: String,
    pid: u32,
    started_at_unix: u64,
    lock_path: PathBuf,
  },

  #[error(
    "package '{package}' is locked (could not read lock metadata)\n\
             If you're sure no kiln process is running, remove the lock file:\n  {lock_path}"
  )]
  ContentionUnknown { package: String, lock_path: PathBuf },

  #[error("failed to create lock directory: {0}")]
  CreateDir(#[source] io::Error),

  #[error("failed to open lock file: {0}")]
  OpenFile(#[source] io::Error),

  #[error("failed to write lock metadata: {0}")]
  WriteMetadata(#[source] io::Error),

  #[error("failed to acquire lock: {0}")]
  LockFailed(#[source] io::Error),
}

impl LockError {
  pub fn is_contention(&self) -> bool {
    matches!(self, LockError::Contention { .. } | LockError::ContentionUnknown { .. })
  }
}

/// An exclusive lock on one package's subtree, released on drop.
#[derive(Debug)]
pub struct PackageLock {
  file: File,
  lock_path: PathBuf,
}

impl PackageLock {
  /// Acquire the lock without waiting.
  pub fn try_acquire(layout: &PrefixLayout, package: &str, command: &str) -> Result<Self, LockError> {
    let lock_path = layout.lock_path(package);
    std::fs::create_dir_all(layout.locks_dir()).map_err(LockError::CreateDir)?;

    let file = OpenOptions::new()
      .read(true)
      .write(true)
      .create(true)
      .truncate(false)
      .open(&lock_path)
      .map_err(LockError::OpenFile)?;

    if let Err(err) = try_lock_exclusive(&file) {
      if err.kind() == io::ErrorKind::WouldBlock {
        return Err(read_contention_error(package, &lock_path));
      }
      return Err(LockError::LockFailed(err));
    }

    write_metadata(&file, package, command)?;
    debug!(package, path = %lock_path.display(), "package lock acquired");

    Ok(PackageLock { file, lock_path })
  }

  /// Acquire the lock, polling until `timeout` elapses.
  ///
  /// On timeout the last contention error is returned.
  pub fn acquire(layout: &PrefixLayout, package: &str, command: &str, timeout: Duration) -> Result<Self, LockError> {
    let deadline = Instant::now() + timeout;
    let mut logged = false;

    loop {
      match Self::try_acquire(layout, package, command) {
        Err(e) if e.is_contention() && Instant::now() < deadline => {
          if !logged {
            debug!(package, "waiting for package lock held by another run");
            logged = true;
          }
          std::thread::sleep(POLL_INTERVAL);
        }
        result => return result,
      }
    }
  }

  /// Reads the lock metadata from the held file handle.
  pub fn read_metadata(&self) -> io::Result<LockMetadata> {
    use std::io::{Seek, SeekFrom};

    let mut file = &self.file;
    file.seek(SeekFrom::Start(0))?;
    let mut contents = String::new();
    file.read_to_string(&mut contents)?;
    serde_json::from_str(&contents).map_err(io::Error::other)
  }

  pub fn lock_path(&self) -> &Path {
    &self.lock_path
  }
}

fn write_metadata(file: &File, package: &str, command: &str) -> Result<(), LockError> {
  let metadata = LockMetadata {
    version: 1,
    pid: std::process::id(),
    started_at_unix: SystemTime::now()
      .duration_since(UNIX_EPOCH)
      .unwrap_or_default()
      .as_secs(),
    command: command.to_string(),
    package: package.to_string(),
  };

  file.set_len(0).map_err(LockError::WriteMetadata)?;
  let mut writer = io::BufWriter::new(file);
  serde_json::to_writer_pretty(&mut writer, &metadata).map_err(|e| LockError::WriteMetadata(io::Error::other(e)))?;
  writer.flush().map_err(LockError::WriteMetadata)?;

  Ok(())
}

fn read_contention_error(package: &str, lock_path: &Path) -> LockError {
  if let Ok(mut file) = File::open(lock_path) {
    let mut contents = String::new();
    if file.read_to_string(&mut contents).is_ok()
      && let Ok(metadata) = serde_json::from_str::<LockMetadata>(&contents)
    {
      return LockError::Contention {
        package: package.to_string(),
        command: metadata.command,
        pid: metadata.pid,
        started_at_unix: metadata.started_at_unix,
        lock_path: lock_path.to_path_buf(),
      };
    }
  }

  LockError::ContentionUnknown {
    package: package.to_string(),
    lock_path: lock_path.to_path_buf(),
  }
}

#[cfg(unix)]
fn try_lock_exclusive(file: &File) -> io::Result<()> {
  use rustix::fs::{FlockOperation, flock};
  use std::os::unix::io::AsFd;

  flock(file.as_fd(), FlockOperation::NonBlockingLockExclusive)
    .map_err(|e| io::Error::from_raw_os_error(e.raw_os_error()))
}

#[cfg(not(unix))]
fn try_lock_exclusive(_file: &File) -> io::Result<()> {
  Err(io::Error::new(
    io::ErrorKind::Unsupported,
    "package locks require a unix platform",
  ))
}
