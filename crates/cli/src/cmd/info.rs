use std::process::ExitCode;

use anyhow::{Context, Result, bail};
use owo_colors::{OwoColorize, Stream};

use kiln_lib::descriptor::{Category, Checksum};
use kiln_lib::record::RecordStore;

use super::GlobalArgs;
use crate::output::{format_timestamp, print_json, print_stat, truncate_hash};

pub fn cmd_info(name: &str, global: &GlobalArgs) -> Result<ExitCode> {
  let config = global.load_config()?;
  let store = RecordStore::for_layout(&config.layout());

  let Some(record) = store
    .load(name)
    .with_context(|| format!("Failed to read record for '{}'", name))?
  else {
    bail!("package '{}' is not installed", name);
  };

  if global.output.is_json() {
    print_json(&record)?;
    return Ok(ExitCode::SUCCESS);
  }

  println!(
    "{} {}",
    record.name.if_supports_color(Stream::Stdout, |s| s.bold()),
    record.version
  );
  print_stat("Prefix", &record.prefix.display().to_string());
  print_stat("Source", &record.source_url);
  let checksum = match &record.checksum {
    Checksum::Sha256(hex) => format!("sha256:{}", truncate_hash(hex)),
    Checksum::Unverified => "unverified".to_string(),
  };
  print_stat("Checksum", &checksum);
  print_stat("Installed", &format_timestamp(record.installed_at));
  print_stat("Runtime deps", &join_or_none(&record.runtime_dependencies));
  print_stat("Build deps", &join_or_none(&record.build_dependencies));

  let mut test = record.test.command.clone();
  for arg in &record.test.args {
    test.push(' ');
    test.push_str(arg);
  }
  print_stat("Test", &test);

  for category in [Category::Executable, Category::Documentation, Category::SharedData] {
    let files: Vec<_> = record.files_in(category).collect();
    if files.is_empty() {
      continue;
    }
    print_stat(&category.to_string(), &format!("{} file(s)", files.len()));
    if global.verbose {
      for file in files {
        println!("    {}  {}", truncate_hash(&file.sha256), file.path.display());
      }
    }
  }

  Ok(ExitCode::SUCCESS)
}

fn join_or_none(names: &[String]) -> String {
  if names.is_empty() {
    "none".to_string()
  } else {
    names.join(", ")
  }
}
