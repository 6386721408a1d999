//! Source acquisition.
//!
//! Downloads a package's source archive into the build root while hashing it,
//! verifies the declared checksum, and only then unpacks it. A mismatching
//! archive is deleted without ever being extracted.

mod extract;

use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use reqwest::{StatusCode, Url};
use thiserror::Error;
use tokio::fs;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::{debug, info, warn};

use crate::descriptor::{Checksum, SourceSpec};
use crate::util::hash::{ContentHash, StreamHasher, hash_file};

pub use extract::{ArchiveKind, extract_archive};

#[derive(Debug, Error)]
pub enum FetchError {
  #[error("source unavailable at {url}: {message}")]
  Unavailable { url: String, message: String },

  #[error("fetching {url} failed with HTTP {status}")]
  HttpStatus { url: String, status: u16 },

  #[error("fetching {url} timed out after {timeout:?}")]
  Timeout { url: String, timeout: Duration },

  #[error("checksum mismatch for {url}: expected {expected}, got {actual}")]
  IntegrityMismatch {
    url: String,
    expected: String,
    actual: String,
  },

  #[error("failed to extract {}: {message}", archive.display())]
  Extraction { archive: PathBuf, message: String },

  #[error("refusing unverified source {url}: checksums are required")]
  UnverifiedSource { url: String },

  #[error("invalid source url '{url}': {message}")]
  InvalidUrl { url: String, message: String },

  #[error("I/O error at {}: {source}", path.display())]
  Io {
    path: PathBuf,
    #[source]
    source: io::Error,
  },
}

impl FetchError {
  /// Transient failures that a later attempt may not hit.
  pub fn is_retryable(&self) -> bool {
    matches!(self, FetchError::Unavailable { .. } | FetchError::Timeout { .. })
  }

  fn io(path: &Path, source: io::Error) -> Self {
    FetchError::Io {
      path: path.to_path_buf(),
      source,
    }
  }
}

#[derive(Debug, Clone)]
pub struct FetchOptions {
  /// Upper bound for one network download.
  pub timeout: Duration,
  /// Root of the download cache; `None` disables caching.
  pub cache_dir: Option<PathBuf>,
  pub require_checksum: bool,
}

/// Directory holding the unpacked source tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractedSourceRoot {
  pub path: PathBuf,
  pub archive_sha256: ContentHash,
}

enum Location {
  Remote(Url),
  Local(PathBuf),
}

fn parse_location(raw: &str) -> Result<Location, FetchError> {
  let invalid = |message: String| FetchError::InvalidUrl {
    url: raw.to_string(),
    message,
  };

  if !raw.contains("://") {
    return Ok(Location::Local(PathBuf::from(raw)));
  }

  let url = Url::parse(raw).map_err(|e| invalid(e.to_string()))?;
  match url.scheme() {
    "http" | "https" => Ok(Location::Remote(url)),
    "file" => url
      .to_file_path()
      .map(Location::Local)
      .map_err(|()| invalid("not a local file path".to_string())),
    other => Err(invalid(format!("unsupported scheme '{}'", other))),
  }
}

/// Fetch, verify and unpack `source` below `dest_dir`.
///
/// The archive lands in `dest_dir/downloads/` and is unpacked into
/// `dest_dir/src/`. If the archive holds a single top-level directory, that
/// directory is returned as the source root.
pub async fn fetch(source: &SourceSpec, dest_dir: &Path, options: &FetchOptions) -> Result<ExtractedSourceRoot, FetchError> {
  let url = source.url.as_str();

  match &source.checksum {
    Checksum::Unverified if options.require_checksum => {
      return Err(FetchError::UnverifiedSource { url: url.to_string() });
    }
    Checksum::Unverified => warn!(url = %url, "source is unverified; skipping checksum verification"),
    Checksum::Sha256(_) => {}
  }

  let location = parse_location(url)?;

  let downloads_dir = dest_dir.join("downloads");
  fs::create_dir_all(&downloads_dir)
    .await
    .map_err(|e| FetchError::io(&downloads_dir, e))?;
  let archive_path = downloads_dir.join(url_to_filename(url));

  let actual = match cached_copy(&source.checksum, options, &archive_path).await {
    Some(hash) => hash,
    None => {
      info!(url = %url, "fetching source");
      let hash = download(&location, url, &archive_path, options.timeout).await?;
      verify(&source.checksum, url, &hash, &archive_path).await?;
      if source.checksum.is_verified() {
        store_in_cache(options, &archive_path, &hash).await;
      }
      hash
    }
  };

  let src_dir = dest_dir.join("src");
  let archive = archive_path.clone();
  let dest = src_dir.clone();
  let root = tokio::task::spawn_blocking(move || extract_archive(&archive, &dest))
    .await
    .map_err(|e| FetchError::Extraction {
      archive: archive_path.clone(),
      message: e.to_string(),
    })??;

  info!(url = %url, root = %root.display(), "source ready");
  Ok(ExtractedSourceRoot {
    path: root,
    archive_sha256: actual,
  })
}

async fn verify(checksum: &Checksum, url: &str, actual: &ContentHash, archive: &Path) -> Result<(), FetchError> {
  if let Checksum::Sha256(expected) = checksum
    && !expected.eq_ignore_ascii_case(&actual.0)
  {
    if let Err(e) = fs::remove_file(archive).await {
      warn!(path = %archive.display(), error = %e, "failed to remove rejected archive");
    }
    return Err(FetchError::IntegrityMismatch {
      url: url.to_string(),
      expected: expected.clone(),
      actual: actual.0.clone(),
    });
  }
  Ok(())
}

/// Stream the source into `dest`, returning the hash of what was written.
async fn download(location: &Location, url: &str, dest: &Path, timeout: Duration) -> Result<ContentHash, FetchError> {
  match location {
    Location::Remote(remote) => tokio::time::timeout(timeout, download_http(remote, url, dest, timeout))
      .await
      .map_err(|_| FetchError::Timeout {
        url: url.to_string(),
        timeout,
      })?,
    Location::Local(path) => copy_local(path, dest).await,
  }
}

async fn download_http(remote: &Url, url: &str, dest: &Path, timeout: Duration) -> Result<ContentHash, FetchError> {
  let map_err = |e: reqwest::Error| {
    if e.is_timeout() {
      FetchError::Timeout {
        url: url.to_string(),
        timeout,
      }
    } else {
      FetchError::Unavailable {
        url: url.to_string(),
        message: e.to_string(),
      }
    }
  };

  let client = reqwest::Client::builder().timeout(timeout).build().map_err(map_err)?;
  let mut response = client.get(remote.clone()).send().await.map_err(map_err)?;

  let status = response.status();
  if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
    return Err(FetchError::Unavailable {
      url: url.to_string(),
      message: format!("HTTP {}", status),
    });
  }
  if !status.is_success() {
    return Err(FetchError::HttpStatus {
      url: url.to_string(),
      status: status.as_u16(),
    });
  }

  let mut file = fs::File::create(dest).await.map_err(|e| FetchError::io(dest, e))?;
  let mut hasher = StreamHasher::new();
  while let Some(chunk) = response.chunk().await.map_err(map_err)? {
    hasher.update(&chunk);
    file.write_all(&chunk).await.map_err(|e| FetchError::io(dest, e))?;
  }
  file.flush().await.map_err(|e| FetchError::io(dest, e))?;

  debug!(url = %url, bytes = hasher.len(), "download complete");
  Ok(hasher.finalize())
}

async fn copy_local(src: &Path, dest: &Path) -> Result<ContentHash, FetchError> {
  let mut input = fs::File::open(src).await.map_err(|e| FetchError::io(src, e))?;
  let mut output = fs::File::create(dest).await.map_err(|e| FetchError::io(dest, e))?;
  let mut hasher = StreamHasher::new();
  let mut buffer = vec![0u8; 64 * 1024];

  loop {
    let n = input.read(&mut buffer).await.map_err(|e| FetchError::io(src, e))?;
    if n == 0 {
      break;
    }
    hasher.update(&buffer[..n]);
    output
      .write_all(&buffer[..n])
      .await
      .map_err(|e| FetchError::io(dest, e))?;
  }
  output.flush().await.map_err(|e| FetchError::io(dest, e))?;

  debug!(path = %src.display(), bytes = hasher.len(), "copied local source");
  Ok(hasher.finalize())
}

fn cache_path(options: &FetchOptions, hash: &str) -> Option<PathBuf> {
  options
    .cache_dir
    .as_ref()
    .map(|dir| dir.join("downloads").join(hash.to_ascii_lowercase()))
}

/// Copy a verified archive out of the cache, if one is there and still intact.
async fn cached_copy(checksum: &Checksum, options: &FetchOptions, dest: &Path) -> Option<ContentHash> {
  let Checksum::Sha256(expected) = checksum else {
    return None;
  };
  let cached = cache_path(options, expected)?;
  if !cached.exists() {
    return None;
  }

  let check = cached.clone();
  let actual = tokio::task::spawn_blocking(move || hash_file(&check)).await.ok()?.ok()?;
  if !actual.0.eq_ignore_ascii_case(expected) {
    debug!(path = %cached.display(), "cached archive hash mismatch, re-downloading");
    return None;
  }

  match fs::copy(&cached, dest).await {
    Ok(_) => {
      info!(path = %cached.display(), "using cached source");
      Some(actual)
    }
    Err(e) => {
      warn!(path = %cached.display(), error = %e, "failed to copy cached source");
      None
    }
  }
}

async fn store_in_cache(options: &FetchOptions, archive: &Path, hash: &ContentHash) {
  let Some(cached) = cache_path(options, &hash.0) else {
    return;
  };

  let (src, dest) = (archive.to_path_buf(), cached.clone());
  let result = tokio::task::spawn_blocking(move || persist_in_cache(&src, &dest))
    .await
    .unwrap_or_else(|e| Err(io::Error::other(e)));

  if let Err(e) = result {
    warn!(path = %cached.display(), error = %e, "failed to cache source");
  }
}

/// Copy through a uniquely named temp file so concurrent writers never share one.
fn persist_in_cache(archive: &Path, cached: &Path) -> io::Result<()> {
  let parent = cached
    .parent()
    .ok_or_else(|| io::Error::other("cache path has no parent"))?;
  std::fs::create_dir_all(parent)?;

  let mut tmp = tempfile::NamedTempFile::new_in(parent)?;
  io::copy(&mut std::fs::File::open(archive)?, tmp.as_file_mut())?;
  tmp.persist(cached).map_err(|e| e.error)?;
  Ok(())
}

/// Convert a URL to a safe filename.
///
/// Takes the last path component and sanitizes it. Falls back to a hash of
/// the URL if no suitable filename can be extracted.
fn url_to_filename(url: &str) -> String {
  let last = url.split(['?', '#']).next().unwrap_or(url).rsplit('/').next();

  if let Some(filename) = last {
    let sanitized: String = filename
      .chars()
      .map(|c| {
        if c.is_alphanumeric() || c == '-' || c == '_' || c == '.' {
          c
        } else {
          '_'
        }
      })
      .collect();

    if !sanitized.is_empty() && sanitized != "." && sanitized != ".." {
      return sanitized;
    }
  }

  let hash = crate::util::hash::hash_bytes(url.as_bytes());
  format!("download_{}", &hash.0[..16])
}
