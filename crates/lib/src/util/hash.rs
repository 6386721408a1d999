//! Hashing utilities for source verification and installed-file records.
//!
//! Everything here is SHA-256, rendered as lowercase hex:
//! - `ContentHash`: a full 64-character digest
//! - `StreamHasher`: incremental hashing for downloads written chunk by chunk
//! - `hash_file()` / `hash_bytes()`: one-shot helpers

use std::fs;
use std::io::{self, Read};
use std::path::Path;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// A full 64-character SHA256 hash.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContentHash(pub String);

impl ContentHash {
  /// Returns true if `s` is a well-formed digest (64 hex characters).
  pub fn is_valid_hex(s: &str) -> bool {
    s.len() == 64 && s.chars().all(|c| c.is_ascii_hexdigit())
  }
}

impl std::fmt::Display for ContentHash {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(f, "{}", self.0)
  }
}

/// Incremental SHA256 over data that arrives in chunks.
#[derive(Default)]
pub struct StreamHasher {
  hasher: Sha256,
  len: u64,
}

impl StreamHasher {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn update(&mut self, chunk: &[u8]) {
    self.hasher.update(chunk);
    self.len += chunk.len() as u64;
  }

  /// Number of bytes hashed so far.
  pub fn len(&self) -> u64 {
    self.len
  }

  pub fn is_empty(&self) -> bool {
    self.len == 0
  }

  pub fn finalize(self) -> ContentHash {
    ContentHash(hex::encode(self.hasher.finalize()))
  }
}

/// Hash a file's contents.
///
/// Returns the full 64-character SHA256 hash of the file.
pub fn hash_file(path: &Path) -> io::Result<ContentHash> {
  let mut file = fs::File::open(path)?;

  let mut hasher = StreamHasher::new();
  let mut buffer = [0u8; 8192];

  loop {
    let bytes_read = file.read(&mut buffer)?;
    if bytes_read == 0 {
      break;
    }
    hasher.update(&buffer[..bytes_read]);
  }

  Ok(hasher.finalize())
}

/// Hash arbitrary bytes.
pub fn hash_bytes(data: &[u8]) -> ContentHash {
  let mut hasher = StreamHasher::new();
  hasher.update(data);
  hasher.finalize()
}
