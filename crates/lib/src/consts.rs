//! Crate-wide names and defaults.

pub const APP_NAME: &str = "kiln";

/// Directory under the prefix holding kegs (`pkgs/<name>/<version>`).
pub const PKGS_DIR: &str = "pkgs";

/// Directory under the prefix holding kiln's own state.
pub const STATE_DIR: &str = ".kiln";

/// Name of the per-package link pointing at the active version.
pub const CURRENT_LINK: &str = "current";

/// Current on-disk format of `InstallationRecord`.
pub const RECORD_FORMAT_VERSION: u32 = 1;

/// PATH entries available to build steps and tests besides dependency prefixes.
pub const DEFAULT_BASE_PATH: &[&str] = &["/usr/local/bin", "/usr/bin", "/bin"];

/// Value of SOURCE_DATE_EPOCH inside the sandbox (1980-01-01T00:00:00Z, the ZIP epoch).
pub const SOURCE_DATE_EPOCH: &str = "315532800";

pub const DEFAULT_FETCH_TIMEOUT_SECS: u64 = 300;
pub const DEFAULT_COMMAND_TIMEOUT_SECS: u64 = 3600;
pub const DEFAULT_LOCK_TIMEOUT_SECS: u64 = 600;
