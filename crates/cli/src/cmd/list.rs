use std::process::ExitCode;

use anyhow::{Context, Result};
use serde::Serialize;

use kiln_lib::record::RecordStore;

use super::GlobalArgs;
use crate::output::{format_timestamp, print_info, print_json};

#[derive(Serialize)]
struct ListItem {
  name: String,
  version: String,
  prefix: String,
  installed_at: String,
  runtime_dependencies: Vec<String>,
}

pub fn cmd_list(global: &GlobalArgs) -> Result<ExitCode> {
  let config = global.load_config()?;
  let store = RecordStore::for_layout(&config.layout());
  let records = store.list().context("Failed to read installation records")?;

  if global.output.is_json() {
    let items: Vec<ListItem> = records
      .iter()
      .map(|r| ListItem {
        name: r.name.clone(),
        version: r.version.clone(),
        prefix: r.prefix.display().to_string(),
        installed_at: r.installed_at.to_rfc3339(),
        runtime_dependencies: r.runtime_dependencies.clone(),
      })
      .collect();
    print_json(&items)?;
    return Ok(ExitCode::SUCCESS);
  }

  if records.is_empty() {
    print_info("No packages installed");
    return Ok(ExitCode::SUCCESS);
  }

  let width = records.iter().map(|r| r.name.len()).max().unwrap_or(0);
  for record in &records {
    if global.verbose {
      println!(
        "{:<width$}  {}  {}  {}",
        record.name,
        record.version,
        format_timestamp(record.installed_at),
        record.prefix.display(),
      );
    } else {
      println!("{:<width$}  {}", record.name, record.version);
    }
  }
  print_info(&format!("{} package(s) installed", records.len()));

  Ok(ExitCode::SUCCESS)
}
