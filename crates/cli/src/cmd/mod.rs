mod info;
mod install;
mod list;
mod uninstall;

pub use info::cmd_info;
pub use install::cmd_install;
pub use list::cmd_list;
pub use test::cmd_test;
pub use uninstall::cmd_uninstall;

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use anyhow::{Context, Result};
use kiln_lib::config::Config;

use crate::output::OutputFormat;

/// Installed, but the self-test failed.
pub const EXIT_TEST_FAILED: u8 = 2;

/// Flags shared by every subcommand.
pub struct GlobalArgs {
  pub prefix: Option<PathBuf>,
  pub config: Option<PathBuf>,
  pub output: OutputFormat,
  pub verbose: bool,
}

impl GlobalArgs {
  /// Load the config file and environment, then apply command-line overrides.
  pub fn load_config(&self) -> Result<Config> {
    let mut config = Config::load(self.config.as_deref()).context("Failed to load configuration")?;
    if let Some(prefix) = &self.prefix {
      config.prefix = prefix.clone();
      config.make_absolute().context("Failed to resolve --prefix")?;
    }
    Ok(config)
  }
}

pub fn test_failed() -> ExitCode {
  ExitCode::from(EXIT_TEST_FAILED)
}

fn runtime() -> Result<tokio::runtime::Runtime> {
  tokio::runtime::Runtime::new().context("Failed to create async runtime")
}

/// Accepts whole seconds (`90`) or a humantime duration (`1m 30s`).
pub fn parse_timeout(value: &str) -> Result<Duration, String> {
  let duration = match value.trim().parse::<u64>() {
    Ok(secs) => Duration::from_secs(secs),
    Err(_) => humantime::parse_duration(value).map_err(|e| e.to_string())?,
  };
  if duration.is_zero() {
    return Err("timeout must be greater than zero".to_string());
  }
  Ok(duration)
}
