//! Package descriptor model.
//!
//! A descriptor declares where to fetch a source archive, how to verify and
//! build it, which dependencies it needs, which files to install and how to
//! smoke-test the result. Loading is a pure transformation from text into an
//! immutable [`PackageDescriptor`]; all orchestration lives elsewhere.
//!
//! # Format
//!
//! ```toml
//! name = "adan"
//! homepage = "https://github.com/placeholder/ADAN"
//! license = "MIT"
//!
//! [source]
//! url = "https://github.com/placeholder/ADAN/archive/v0.1.0.tar.gz"
//! checksum = "SKIP"
//!
//! [[dependencies]]
//! name = "rust"
//! scope = "build"
//!
//! [install]
//! steps = [{ command = "cargo", args = ["build", "--release", "--locked"] }]
//! mappings = [{ pattern = "target/release/ADAN", category = "executable", rename = "adan" }]
//!
//! [test]
//! command = "${bin}/adan"
//! args = ["--help"]
//! ```

mod types;

use std::collections::{BTreeMap, HashSet};
use std::io;
use std::path::{Component, Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;

use crate::consts::CURRENT_LINK;
use crate::util::hash::ContentHash;

pub use types::*;

/// Checksum values that declare a source as unverified.
const UNVERIFIED_MARKERS: &[&str] = &["SKIP", "unverified"];

const ARCHIVE_EXTENSIONS: &[&str] = &[".tar.gz", ".tgz", ".tar.xz", ".tar.bz2", ".tar", ".zip"];

#[derive(Debug, Error)]
pub enum DescriptorError {
  #[error("malformed descriptor: {message}")]
  MalformedDescriptor { message: String },

  #[error("invalid dependency '{name}': {reason}")]
  InvalidDependency { name: String, reason: String },

  #[error("failed to read descriptor {path}: {source}")]
  Read {
    path: PathBuf,
    #[source]
    source: io::Error,
  },
}

impl DescriptorError {
  fn malformed(message: impl Into<String>) -> Self {
    DescriptorError::MalformedDescriptor {
      message: message.into(),
    }
  }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawDescriptor {
  name: Option<String>,
  version: Option<String>,
  description: Option<String>,
  homepage: Option<String>,
  license: Option<String>,
  source: Option<RawSource>,
  #[serde(default)]
  dependencies: Vec<RawDependency>,
  install: Option<RawInstall>,
  test: Option<RawTest>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawSource {
  url: Option<String>,
  checksum: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawDependency {
  name: String,
  scope: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawInstall {
  #[serde(default)]
  steps: Vec<RawStep>,
  #[serde(default)]
  mappings: Vec<RawMapping>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawStep {
  command: String,
  #[serde(default)]
  args: Vec<String>,
  #[serde(default)]
  env: BTreeMap<String, String>,
  cwd: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawMapping {
  pattern: String,
  category: String,
  rename: Option<String>,
  subdir: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawTest {
  command: String,
  #[serde(default)]
  args: Vec<String>,
  #[serde(default)]
  expect_status: i32,
}

/// Parse and validate a TOML descriptor.
pub fn load(raw: &str) -> Result<PackageDescriptor, DescriptorError> {
  let raw: RawDescriptor = toml::from_str(raw).map_err(|e| DescriptorError::malformed(e.to_string()))?;
  validate(raw)
}

/// Parse and validate a JSON descriptor.
pub fn load_json(raw: &str) -> Result<PackageDescriptor, DescriptorError> {
  let raw: RawDescriptor = serde_json::from_str(raw).map_err(|e| DescriptorError::malformed(e.to_string()))?;
  validate(raw)
}

/// Read a descriptor file; `.json` files are parsed as JSON, anything else as TOML.
pub fn load_file(path: &Path) -> Result<PackageDescriptor, DescriptorError> {
  let content = std::fs::read_to_string(path).map_err(|source| DescriptorError::Read {
    path: path.to_path_buf(),
    source,
  })?;

  match path.extension().and_then(|e| e.to_str()) {
    Some("json") => load_json(&content),
    _ => load(&content),
  }
}

fn validate(raw: RawDescriptor) -> Result<PackageDescriptor, DescriptorError> {
  let name = raw.name.ok_or_else(|| DescriptorError::malformed("missing field `name`"))?;
  if name.is_empty() {
    return Err(DescriptorError::malformed("`name` must not be empty"));
  }
  if !is_valid_name(&name) {
    return Err(DescriptorError::malformed(format!(
      "`name` '{}' may only contain ASCII letters, digits, '.', '_', '+', '-' and must not start with '.'",
      name
    )));
  }

  let raw_source = raw.source.ok_or_else(|| DescriptorError::malformed("missing table `source`"))?;
  let source = validate_source(raw_source)?;

  let version = match raw.version {
    Some(v) if v.is_empty() => return Err(DescriptorError::malformed("`version` must not be empty")),
    Some(v) => v,
    None => derive_version(&source.url).ok_or_else(|| {
      DescriptorError::malformed(format!(
        "cannot derive a version from source url '{}'; set `version` explicitly",
        source.url
      ))
    })?,
  };
  if !is_safe_relative(&version) || version.contains('/') {
    return Err(DescriptorError::malformed(format!("`version` '{}' is not a valid path component", version)));
  }
  // Kegs share `pkgs/<name>/` with the `current` link and dot-prefixed scratch entries.
  if version.starts_with('.') || version == CURRENT_LINK {
    return Err(DescriptorError::malformed(format!("`version` '{}' is reserved", version)));
  }

  let dependencies = validate_dependencies(&name, raw.dependencies)?;

  let raw_install = raw.install.ok_or_else(|| DescriptorError::malformed("missing table `install`"))?;
  let install = validate_install(raw_install)?;

  let raw_test = raw.test.ok_or_else(|| DescriptorError::malformed("missing table `test`"))?;
  if raw_test.command.is_empty() {
    return Err(DescriptorError::malformed("`test.command` must not be empty"));
  }

  Ok(PackageDescriptor {
    name,
    version,
    description: raw.description,
    homepage: raw.homepage,
    license: raw.license,
    source,
    dependencies,
    install,
    test: TestProcedure {
      command: raw_test.command,
      args: raw_test.args,
      expect_status: raw_test.expect_status,
    },
  })
}

fn validate_source(raw: RawSource) -> Result<SourceSpec, DescriptorError> {
  let url = raw.url.filter(|u| !u.is_empty()).ok_or_else(|| DescriptorError::malformed("missing field `source.url`"))?;
  let checksum = raw
    .checksum
    .ok_or_else(|| DescriptorError::malformed("missing field `source.checksum` (use \"SKIP\" to opt out)"))?;

  Ok(SourceSpec {
    url,
    checksum: parse_checksum(&checksum)?,
  })
}

fn parse_checksum(value: &str) -> Result<Checksum, DescriptorError> {
  if UNVERIFIED_MARKERS.contains(&value) {
    return Ok(Checksum::Unverified);
  }

  let hex = value.strip_prefix("sha256:").unwrap_or(value);
  if ContentHash::is_valid_hex(hex) {
    return Ok(Checksum::Sha256(hex.to_ascii_lowercase()));
  }

  Err(DescriptorError::malformed(format!(
    "`source.checksum` '{}' is neither a sha256 hex digest nor \"SKIP\"",
    value
  )))
}

fn validate_dependencies(
  package: &str,
  raw: Vec<RawDependency>,
) -> Result<Vec<DependencySpec>, DescriptorError> {
  let mut seen = HashSet::new();
  let mut env_vars: BTreeMap<String, String> = BTreeMap::new();
  let mut deps = Vec::with_capacity(raw.len());

  for dep in raw {
    let invalid = |reason: &str| DescriptorError::InvalidDependency {
      name: dep.name.clone(),
      reason: reason.to_string(),
    };

    if !is_valid_name(&dep.name) {
      return Err(invalid("not a valid package name"));
    }
    if dep.name == package {
      return Err(invalid("a package cannot depend on itself"));
    }
    if !seen.insert(dep.name.clone()) {
      return Err(invalid("declared more than once"));
    }
    let var = dependency_env_var(&dep.name);
    if let Some(other) = env_vars.get(&var) {
      return Err(invalid(&format!("'{}' already maps to {}", other, var)));
    }
    env_vars.insert(var, dep.name.clone());

    let scope = match dep.scope.as_deref() {
      None => DependencyScope::Runtime,
      Some(tag) => DependencyScope::parse(tag)
        .ok_or_else(|| invalid(&format!("unknown scope '{}' (expected 'build' or 'runtime')", tag)))?,
    };

    deps.push(DependencySpec { name: dep.name, scope });
  }

  Ok(deps)
}

/// Environment variable naming a dependency's keg inside build steps.
pub fn dependency_env_var(name: &str) -> String {
  let upper: String = name
    .chars()
    .map(|c| {
      if c.is_ascii_alphanumeric() {
        c.to_ascii_uppercase()
      } else {
        '_'
      }
    })
    .collect();
  format!("KILN_DEP_{}_PREFIX", upper)
}

fn validate_install(raw: RawInstall) -> Result<InstallProcedure, DescriptorError> {
  let mut steps = Vec::with_capacity(raw.steps.len());
  for (idx, step) in raw.steps.into_iter().enumerate() {
    if step.command.is_empty() {
      return Err(DescriptorError::malformed(format!("install.steps[{}]: empty command", idx)));
    }
    if let Some(cwd) = &step.cwd
      && !is_safe_relative(cwd)
    {
      return Err(DescriptorError::malformed(format!(
        "install.steps[{}]: cwd '{}' must be relative to the source root",
        idx, cwd
      )));
    }
    steps.push(BuildStep {
      command: step.command,
      args: step.args,
      env: step.env,
      cwd: step.cwd,
    });
  }

  if raw.mappings.is_empty() {
    return Err(DescriptorError::malformed("install.mappings must declare at least one file"));
  }

  let mut mappings = Vec::with_capacity(raw.mappings.len());
  for (idx, mapping) in raw.mappings.into_iter().enumerate() {
    let category = Category::parse(&mapping.category).ok_or_else(|| {
      DescriptorError::malformed(format!(
        "install.mappings[{}]: unknown category '{}' (expected executable, documentation or shared-data)",
        idx, mapping.category
      ))
    })?;
    if mapping.pattern.is_empty() || Path::new(&mapping.pattern).is_absolute() {
      return Err(DescriptorError::malformed(format!(
        "install.mappings[{}]: pattern must be a non-empty relative glob",
        idx
      )));
    }
    if let Some(rename) = &mapping.rename
      && (!is_safe_relative(rename) || rename.contains('/'))
    {
      return Err(DescriptorError::malformed(format!(
        "install.mappings[{}]: rename '{}' must be a plain file name",
        idx, rename
      )));
    }
    if let Some(subdir) = &mapping.subdir
      && !is_safe_relative(subdir)
    {
      return Err(DescriptorError::malformed(format!(
        "install.mappings[{}]: subdir '{}' must be a relative path without '..'",
        idx, subdir
      )));
    }
    mappings.push(FileMapping {
      pattern: mapping.pattern,
      category,
      rename: mapping.rename,
      subdir: mapping.subdir,
    });
  }

  Ok(InstallProcedure { steps, mappings })
}

/// Package names become directory and file names under the prefix.
pub fn is_valid_name(name: &str) -> bool {
  !name.is_empty()
    && !name.starts_with('.')
    && name
      .chars()
      .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '+' | '-'))
}

/// True for non-empty relative paths made only of normal components.
pub(crate) fn is_safe_relative(path: &str) -> bool {
  let path = Path::new(path);
  !path.as_os_str().is_empty() && path.components().all(|c| matches!(c, Component::Normal(_)))
}

/// Derive a version from the last segment of a source URL.
///
/// `.../archive/v0.1.0.tar.gz` → `0.1.0`, `.../ripgrep-15.1.0.tar.gz` → `15.1.0`.
pub fn derive_version(url: &str) -> Option<String> {
  let file = url.split(['?', '#']).next()?.rsplit('/').next()?;
  let stem = ARCHIVE_EXTENSIONS
    .iter()
    .find_map(|ext| file.strip_suffix(ext))
    .unwrap_or(file);

  stem.rsplit(['-', '_']).find_map(|segment| {
    let candidate = segment
      .strip_prefix('v')
      .or_else(|| segment.strip_prefix('V'))
      .unwrap_or(segment);
    let starts_with_digit = candidate.chars().next().is_some_and(|c| c.is_ascii_digit());
    let well_formed = candidate
      .chars()
      .all(|c| c.is_ascii_alphanumeric() || c == '.' || c == '+');
    (starts_with_digit && well_formed).then(|| candidate.to_string())
  })
}
