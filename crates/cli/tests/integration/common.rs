//! Shared test helpers for CLI integration tests.

use std::fs::{self, File};
use std::path::{Path, PathBuf};

use assert_cmd::Command;
use assert_cmd::cargo::cargo_bin_cmd;
use flate2::Compression;
use flate2::write::GzEncoder;
use kiln_lib::util::hash::hash_file;
use tempfile::TempDir;

/// Isolated test environment.
///
/// Each test gets its own config file, prefix, build directory and cache.
pub struct TestEnv {
  pub temp: TempDir,
  pub config_path: PathBuf,
}

impl TestEnv {
  pub fn new() -> Self {
    let temp = TempDir::new().unwrap();
    let config_path = temp.path().join("config.toml");
    let root = temp.path();
    fs::write(
      &config_path,
      format!(
        "prefix = \"{}\"\nbuild_dir = \"{}\"\ncache_dir = \"{}\"\ncommand_timeout_secs = 60\nlock_timeout_secs = 30\n",
        root.join("prefix").display(),
        root.join("builds").display(),
        root.join("cache").display(),
      ),
    )
    .unwrap();
    Self { temp, config_path }
  }

  pub fn prefix(&self) -> PathBuf {
    self.temp.path().join("prefix")
  }

  pub fn builds(&self) -> PathBuf {
    self.temp.path().join("builds")
  }

  /// Command configured to use this environment.
  pub fn kiln(&self) -> Command {
    let mut cmd: Command = cargo_bin_cmd!("kiln");
    cmd.arg("--config").arg(&self.config_path);
    cmd.env("XDG_CONFIG_HOME", self.temp.path().join("xdg-config"));
    cmd.env_remove("KILN_PREFIX");
    cmd.env_remove("KILN_BUILD_DIR");
    cmd.env_remove("KILN_CACHE_DIR");
    cmd.env_remove("RUST_LOG");
    cmd
  }

  /// Write a source tarball whose `tool.sh` runs `script_body` and a
  /// descriptor that installs it as `bin/<name>`.
  ///
  /// `extra` is appended to the descriptor verbatim.
  pub fn package(&self, name: &str, script_body: &str, extra: &str) -> PathBuf {
    let (archive, sha) = self.source(name, script_body);
    self.descriptor(name, &archive, &sha, build_script(name), extra)
  }

  pub fn source(&self, name: &str, script_body: &str) -> (PathBuf, String) {
    let top = format!("{}-1.0.0", name);
    let tree = self.temp.path().join("trees").join(&top);
    fs::create_dir_all(&tree).unwrap();
    fs::write(tree.join("tool.sh"), format!("#!/bin/sh\n{}\n", script_body)).unwrap();
    fs::write(tree.join("README.md"), format!("# {}\n", name)).unwrap();

    let archive = self.temp.path().join(format!("{}.tar.gz", top));
    let encoder = GzEncoder::new(File::create(&archive).unwrap(), Compression::default());
    let mut builder = tar::Builder::new(encoder);
    builder.append_dir_all(&top, &tree).unwrap();
    builder.into_inner().unwrap().finish().unwrap();

    let sha = hash_file(&archive).unwrap().0;
    (archive, sha)
  }

  pub fn descriptor(&self, name: &str, archive: &Path, checksum: &str, build: String, extra: &str) -> PathBuf {
    let path = self.temp.path().join(format!("{}.toml", name));
    let content = format!(
      r#"name = "{name}"
version = "1.0.0"

[source]
url = "{url}"
checksum = "{checksum}"

[install]
steps = [
  {{ command = "/bin/sh", args = ["-c", "{build}"] }},
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
    );
    fs::write(&path, content).unwrap();
    path
  }

  /// Number of build roots left behind.
  pub fn leftover_build_roots(&self) -> usize {
    fs::read_dir(self.builds()).map(|entries| entries.count()).unwrap_or(0)
  }
}

pub fn build_script(name: &str) -> String {
  format!("mkdir -p out && cp tool.sh out/{name} && chmod 755 out/{name}")
}

pub fn runtime_dependency(name: &str) -> String {
  format!("\n[[dependencies]]\nname = \"{}\"\nscope = \"runtime\"\n", name)
}
