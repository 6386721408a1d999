//! Shared fixtures for pipeline integration tests.

use std::fs::{self, File};
use std::path::{Path, PathBuf};

use flate2::Compression;
use flate2::write::GzEncoder;
use kiln_lib::config::Config;
use kiln_lib::descriptor::{self, PackageDescriptor};
use kiln_lib::util::hash::hash_file;
use tempfile::TempDir;
use walkdir::WalkDir;

/// An isolated prefix, build directory and cache.
pub struct Fixture {
  pub temp: TempDir,
  pub config: Config,
}

impl Fixture {
  pub fn new() -> Self {
    let temp = TempDir::new().unwrap();
    let mut config = Config::rooted(temp.path());
    config.command_timeout_secs = 60;
    config.lock_timeout_secs = 30;
    Self { temp, config }
  }

  pub fn fixtures_dir(&self) -> PathBuf {
    let dir = self.temp.path().join("fixtures");
    fs::create_dir_all(&dir).unwrap();
    dir
  }

  /// A source tarball for `name` whose `tool.sh` runs `script_body`.
  ///
  /// Returns the archive path and its sha256.
  pub fn source(&self, name: &str, script_body: &str) -> (PathBuf, String) {
    let top = format!("{}-1.0.0", name);
    let tree = self.temp.path().join("trees").join(&top);
    fs::create_dir_all(&tree).unwrap();
    fs::write(tree.join("tool.sh"), format!("#!/bin/sh\n{}\n", script_body)).unwrap();
    fs::write(tree.join("README.md"), format!("# {}\n", name)).unwrap();

    let archive = self.fixtures_dir().join(format!("{}.tar.gz", top));
    let encoder = GzEncoder::new(File::create(&archive).unwrap(), Compression::default());
    let mut builder = tar::Builder::new(encoder);
    builder.append_dir_all(&top, &tree).unwrap();
    builder.into_inner().unwrap().finish().unwrap();

    let hash = hash_file(&archive).unwrap().0;
    (archive, hash)
  }

  /// A verified descriptor for a package built from [`Fixture::source`].
  pub fn package(&self, name: &str, script_body: &str) -> PackageDescriptor {
    let (archive, hash) = self.source(name, script_body);
    descriptor::load(&package_toml(name, &archive, &hash, "")).unwrap()
  }

  pub fn snapshot_prefix(&self) -> Vec<(PathBuf, Vec<u8>)> {
    snapshot(&self.config.prefix)
  }

  /// Build roots still present under the build directory.
  pub fn leftover_build_roots(&self) -> usize {
    match fs::read_dir(&self.config.build_dir) {
      Ok(entries) => entries.count(),
      Err(_) => 0,
    }
  }

  pub fn short_lock_timeout(&mut self) {
    self.config.lock_timeout_secs = 0;
  }
}

/// Standard descriptor: copy `tool.sh` to `out/<name>`, install it and the README.
///
/// `extra` is appended verbatim (dependencies, extra tables).
pub fn package_toml(name: &str, archive: &Path, checksum: &str, extra: &str) -> String {
  format!(
    r#"name = "{name}"
version = "1.0.0"

[source]
url = "{url}"
checksum = "{checksum}"

[install]
steps = [
  {{ command = "/bin/sh", args = ["-c", "mkdir -p out && cp tool.sh out/{name} && chmod 755 out/{name}"] }},
]
mappings = [
  {{ pattern = "out/{name}", category = "executable" }},
  {{ pattern = "README.md", category = "documentation" }},
]

[test]
command = "${{bin}}/{name}"
args = ["--version"]
{extra}
"#,
    url = archive.display(),
  )
}

/// Every path under `root` with its file contents.
pub fn snapshot(root: &Path) -> Vec<(PathBuf, Vec<u8>)> {
  if !root.exists() {
    return vec![];
  }
  WalkDir::new(root)
    .sort_by_file_name()
    .into_iter()
    .map(|e| e.unwrap())
    .filter(|e| !e.path().starts_with(root.join(".kiln/locks")))
    .map(|e| {
      let contents = if e.file_type().is_file() {
        fs::read(e.path()).unwrap()
      } else {
        vec![]
      };
      (e.path().to_path_buf(), contents)
    })
    .collect()
}
