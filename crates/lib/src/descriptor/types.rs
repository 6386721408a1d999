use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// A validated package descriptor.
///
/// Produced only by [`super::load`]; fields are read-only to callers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PackageDescriptor {
  pub(crate) name: String,
  pub(crate) version: String,
  pub(crate) description: Option<String>,
  pub(crate) homepage: Option<String>,
  pub(crate) license: Option<String>,
  pub(crate) source: SourceSpec,
  pub(crate) dependencies: Vec<DependencySpec>,
  pub(crate) install: InstallProcedure,
  pub(crate) test: TestProcedure,
}

impl PackageDescriptor {
  pub fn name(&self) -> &str {
    &self.name
  }

  pub fn version(&self) -> &str {
    &self.version
  }

  pub fn description(&self) -> Option<&str> {
    self.description.as_deref()
  }

  pub fn homepage(&self) -> Option<&str> {
    self.homepage.as_deref()
  }

  pub fn license(&self) -> Option<&str> {
    self.license.as_deref()
  }

  pub fn source(&self) -> &SourceSpec {
    &self.source
  }

  pub fn dependencies(&self) -> &[DependencySpec] {
    &self.dependencies
  }

  pub fn install(&self) -> &InstallProcedure {
    &self.install
  }

  pub fn test(&self) -> &TestProcedure {
    &self.test
  }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceSpec {
  pub url: String,
  pub checksum: Checksum,
}

/// Expected content hash of the source archive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Checksum {
  /// Lowercase hex SHA256 of the archive bytes.
  Sha256(String),
  /// Declared with the `SKIP` / `unverified` marker; integrity is not checked.
  Unverified,
}

impl Checksum {
  pub fn is_verified(&self) -> bool {
    matches!(self, Checksum::Sha256(_))
  }
}

impl fmt::Display for Checksum {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Checksum::Sha256(hex) => write!(f, "sha256:{}", hex),
      Checksum::Unverified => write!(f, "unverified"),
    }
  }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DependencySpec {
  pub name: String,
  pub scope: DependencyScope,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DependencyScope {
  /// Visible only while build steps run.
  Build,
  /// Visible during the build and required to stay installed afterwards.
  Runtime,
}

impl DependencyScope {
  pub fn parse(tag: &str) -> Option<Self> {
    match tag {
      "build" => Some(Self::Build),
      "runtime" => Some(Self::Runtime),
      _ => None,
    }
  }
}

impl fmt::Display for DependencyScope {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      DependencyScope::Build => write!(f, "build"),
      DependencyScope::Runtime => write!(f, "runtime"),
    }
  }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstallProcedure {
  pub steps: Vec<BuildStep>,
  pub mappings: Vec<FileMapping>,
}

/// One external command run inside the source root.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildStep {
  pub command: String,
  pub args: Vec<String>,
  pub env: BTreeMap<String, String>,
  /// Working directory relative to the source root.
  pub cwd: Option<String>,
}

impl BuildStep {
  /// Command line for diagnostics.
  pub fn display(&self) -> String {
    std::iter::once(self.command.as_str())
      .chain(self.args.iter().map(String::as_str))
      .collect::<Vec<_>>()
      .join(" ")
  }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileMapping {
  /// Glob relative to the source root.
  pub pattern: String,
  pub category: Category,
  /// Destination file name; only allowed when the pattern matches one path.
  pub rename: Option<String>,
  /// Extra directory below the category directory.
  pub subdir: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Category {
  Executable,
  Documentation,
  SharedData,
}

impl Category {
  pub fn parse(tag: &str) -> Option<Self> {
    match tag {
      "executable" | "bin" => Some(Self::Executable),
      "documentation" | "doc" => Some(Self::Documentation),
      "shared-data" | "share" => Some(Self::SharedData),
      _ => None,
    }
  }
}

impl fmt::Display for Category {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Category::Executable => write!(f, "executable"),
      Category::Documentation => write!(f, "documentation"),
      Category::SharedData => write!(f, "shared-data"),
    }
  }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestProcedure {
  pub command: String,
  pub args: Vec<String>,
  pub expect_status: i32,
}
