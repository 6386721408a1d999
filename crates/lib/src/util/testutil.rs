//! Test helpers for kiln-lib.
//!
//! Shell invocations and source archive fixtures shared by unit tests.

use std::fs::{self, File};
use std::path::{Path, PathBuf};

use flate2::Compression;
use flate2::write::GzEncoder;

use crate::util::hash::{ContentHash, hash_file};

/// Returns the shell command and args to execute a shell script.
pub fn shell_cmd(script: &str) -> (&'static str, Vec<String>) {
  ("/bin/sh", vec!["-c".to_string(), script.to_string()])
}

/// A PATH value that finds the usual system tools.
pub fn system_path() -> String {
  "/usr/local/bin:/usr/bin:/bin".to_string()
}

/// Writes `files` (relative path, contents) under `root`, creating parents.
pub fn write_tree(root: &Path, files: &[(&str, &str)]) {
  for (rel, contents) in files {
    let path = root.join(rel);
    if let Some(parent) = path.parent() {
      fs::create_dir_all(parent).unwrap();
    }
    fs::write(path, contents).unwrap();
  }
}

/// Builds `<dir>/<file_name>` as a gzipped tarball whose entries all live
/// under `top/`, and returns its path and sha256.
pub fn make_tarball(dir: &Path, file_name: &str, top: &str, files: &[(&str, &str)]) -> (PathBuf, ContentHash) {
  let tree = tempfile::TempDir::new().unwrap();
  write_tree(&tree.path().join(top), files);

  let archive_path = dir.join(file_name);
  let encoder = GzEncoder::new(File::create(&archive_path).unwrap(), Compression::default());
  let mut builder = tar::Builder::new(encoder);
  builder.append_dir_all(top, tree.path().join(top)).unwrap();
  builder.into_inner().unwrap().finish().unwrap();

  let hash = hash_file(&archive_path).unwrap();
  (archive_path, hash)
}
