//! Install prefix layout.
//!
//! ```text
//! <prefix>/
//! ├── pkgs/<name>/<version>/        # keg
//! │   ├── bin/
//! │   └── share/{doc/<name>,<name>}/
//! ├── pkgs/<name>/current -> <version>
//! └── .kiln/
//!     ├── records/<name>.json
//!     ├── locks/<name>.lock
//!     └── staging/
//! ```
//!
//! Staging lives under the prefix so the final publish is a same-filesystem rename.

use std::path::{Path, PathBuf};

use crate::consts::{CURRENT_LINK, PKGS_DIR, STATE_DIR};
use crate::descriptor::Category;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrefixLayout {
  root: PathBuf,
}

impl PrefixLayout {
  pub fn new(root: impl Into<PathBuf>) -> Self {
    Self { root: root.into() }
  }

  pub fn root(&self) -> &Path {
    &self.root
  }

  /// Directory owned exclusively by one package (all of its versions).
  pub fn package_dir(&self, name: &str) -> PathBuf {
    self.root.join(PKGS_DIR).join(name)
  }

  /// Versioned install prefix of one package.
  pub fn keg_dir(&self, name: &str, version: &str) -> PathBuf {
    self.package_dir(name).join(version)
  }

  pub fn current_link(&self, name: &str) -> PathBuf {
    self.package_dir(name).join(CURRENT_LINK)
  }

  pub fn state_dir(&self) -> PathBuf {
    self.root.join(STATE_DIR)
  }

  pub fn records_dir(&self) -> PathBuf {
    self.state_dir().join("records")
  }

  pub fn locks_dir(&self) -> PathBuf {
    self.state_dir().join("locks")
  }

  pub fn lock_path(&self, name: &str) -> PathBuf {
    self.locks_dir().join(format!("{}.lock", name))
  }

  pub fn staging_dir(&self) -> PathBuf {
    self.state_dir().join("staging")
  }
}

/// Path of a category's directory relative to a keg.
pub fn category_subpath(category: Category, package: &str) -> PathBuf {
  match category {
    Category::Executable => PathBuf::from("bin"),
    Category::Documentation => Path::new("share").join("doc").join(package),
    Category::SharedData => Path::new("share").join(package),
  }
}

/// The binaries directory inside a keg.
pub fn bin_dir(keg: &Path) -> PathBuf {
  keg.join("bin")
}
