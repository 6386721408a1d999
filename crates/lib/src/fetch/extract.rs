//! Archive unpacking.
//!
//! Supported formats:
//! - `.tar.gz` / `.tgz`
//! - `.tar`
//! - `.zip`
//!
//! Files without a recognizable extension are sniffed by magic bytes.

use std::fs::{self, File};
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};

use flate2::read::GzDecoder;
use tar::Archive;
use tracing::{debug, info};

use super::FetchError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveKind {
  TarGz,
  Tar,
  Zip,
}

impl ArchiveKind {
  pub fn from_file_name(name: &str) -> Option<Self> {
    let lower = name.to_ascii_lowercase();
    if lower.ends_with(".tar.gz") || lower.ends_with(".tgz") {
      Some(ArchiveKind::TarGz)
    } else if lower.ends_with(".tar") {
      Some(ArchiveKind::Tar)
    } else if lower.ends_with(".zip") {
      Some(ArchiveKind::Zip)
    } else {
      None
    }
  }

  pub fn sniff(header: &[u8]) -> Option<Self> {
    if header.starts_with(&[0x1f, 0x8b]) {
      Some(ArchiveKind::TarGz)
    } else if header.starts_with(b"PK\x03\x04") {
      Some(ArchiveKind::Zip)
    } else if header.len() >= 262 && &header[257..262] == b"ustar" {
      Some(ArchiveKind::Tar)
    } else {
      None
    }
  }

  fn detect(path: &Path) -> Result<Self, FetchError> {
    if let Some(kind) = path.file_name().and_then(|n| n.to_str()).and_then(Self::from_file_name) {
      return Ok(kind);
    }

    let mut header = Vec::with_capacity(512);
    File::open(path)
      .and_then(|f| f.take(512).read_to_end(&mut header))
      .map_err(|e| FetchError::io(path, e))?;

    Self::sniff(&header).ok_or_else(|| extraction(path, "unrecognized archive format"))
  }
}

fn extraction(archive: &Path, message: impl std::fmt::Display) -> FetchError {
  FetchError::Extraction {
    archive: archive.to_path_buf(),
    message: message.to_string(),
  }
}

/// Unpack `archive` into `dest` and return the source root.
pub fn extract_archive(archive: &Path, dest: &Path) -> Result<PathBuf, FetchError> {
  let kind = ArchiveKind::detect(archive)?;
  debug!(archive = %archive.display(), ?kind, "unpacking");

  fs::create_dir_all(dest).map_err(|e| FetchError::io(dest, e))?;
  let file = File::open(archive).map_err(|e| FetchError::io(archive, e))?;

  match kind {
    ArchiveKind::TarGz => unpack_tar(Archive::new(GzDecoder::new(BufReader::new(file))), dest),
    ArchiveKind::Tar => unpack_tar(Archive::new(BufReader::new(file)), dest),
    ArchiveKind::Zip => unpack_zip(file, dest),
  }
  .map_err(|message| extraction(archive, message))?;

  let root = source_root(dest).map_err(|message| extraction(archive, message))?;
  info!(root = %root.display(), "unpacked source");
  Ok(root)
}

fn unpack_tar<R: Read>(mut archive: Archive<R>, dest: &Path) -> Result<(), String> {
  archive.set_preserve_permissions(true);
  archive.unpack(dest).map_err(|e| e.to_string())
}

fn unpack_zip(file: File, dest: &Path) -> Result<(), String> {
  let mut archive = zip::ZipArchive::new(BufReader::new(file)).map_err(|e| format!("failed to open zip: {}", e))?;

  for i in 0..archive.len() {
    let mut entry = archive
      .by_index(i)
      .map_err(|e| format!("failed to read zip entry: {}", e))?;

    let path = entry
      .enclosed_name()
      .ok_or_else(|| format!("zip entry '{}' escapes the archive", entry.name()))?;
    let dest_path = dest.join(path);

    if entry.is_dir() {
      fs::create_dir_all(&dest_path).map_err(|e| e.to_string())?;
      continue;
    }

    if let Some(parent) = dest_path.parent() {
      fs::create_dir_all(parent).map_err(|e| e.to_string())?;
    }
    let mut outfile = File::create(&dest_path).map_err(|e| e.to_string())?;
    std::io::copy(&mut entry, &mut outfile).map_err(|e| e.to_string())?;

    #[cfg(unix)]
    {
      use std::os::unix::fs::PermissionsExt;
      if let Some(mode) = entry.unix_mode() {
        fs::set_permissions(&dest_path, fs::Permissions::from_mode(mode)).map_err(|e| e.to_string())?;
      }
    }
  }

  Ok(())
}

/// A lone top-level directory becomes the root; anything else keeps `dest`.
fn source_root(dest: &Path) -> Result<PathBuf, String> {
  let entries: Vec<_> = fs::read_dir(dest)
    .map_err(|e| e.to_string())?
    .filter_map(|e| e.ok())
    .collect();

  match entries.as_slice() {
    [] => Err("archive is empty".to_string()),
    [only] if only.file_type().map(|t| t.is_dir()).unwrap_or(false) => Ok(only.path()),
    _ => Ok(dest.to_path_buf()),
  }
}
