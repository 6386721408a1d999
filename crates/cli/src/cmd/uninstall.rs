use std::process::ExitCode;

use anyhow::{Context, Result};

use kiln_lib::uninstall::{UninstallOptions, uninstall};

use super::GlobalArgs;
use crate::output::{print_json, print_stat, print_success, print_warning};

pub fn cmd_uninstall(name: &str, force: bool, global: &GlobalArgs) -> Result<ExitCode> {
  let config = global.load_config()?;

  let report =
    uninstall(name, UninstallOptions { force }, &config).with_context(|| format!("Failed to uninstall '{}'", name))?;

  if global.output.is_json() {
    print_json(&report)?;
    return Ok(ExitCode::SUCCESS);
  }

  print_success(&format!("Uninstalled {} {}", report.name, report.version));
  print_stat("Removed", &report.removed.display().to_string());
  print_stat("Files", &report.files.to_string());
  if !report.orphaned_dependents.is_empty() {
    print_warning(&format!(
      "Still depended on by: {}",
      report.orphaned_dependents.join(", ")
    ));
  }

  Ok(ExitCode::SUCCESS)
}
