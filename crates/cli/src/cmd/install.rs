use std::path::Path;
use std::process::ExitCode;
use std::time::Duration;

use anyhow::{Result, anyhow};
use serde::Serialize;
use tracing::debug;

use kiln_lib::pipeline::{self, ErrorClass, InstallReport, RunError, Stage};
use kiln_lib::test_runner::TestOutcome;

use super::{GlobalArgs, runtime, test_failed};
use crate::output::{
  format_duration, print_captured, print_error, print_info, print_json, print_stat, print_success, print_warning,
};

/// Machine-readable form of a failed run.
#[derive(Serialize)]
struct FailureOutput<'a> {
  status: &'static str,
  stage: Stage,
  class: ErrorClass,
  retryable: bool,
  message: String,
  #[serde(skip_serializing_if = "Option::is_none")]
  output: Option<&'a str>,
}

pub fn cmd_install(
  descriptor_path: &Path,
  fetch_timeout: Option<Duration>,
  command_timeout: Option<Duration>,
  global: &GlobalArgs,
) -> Result<ExitCode> {
  let mut config = global.load_config()?;
  if let Some(timeout) = fetch_timeout {
    config.fetch_timeout_secs = timeout.as_secs().max(1);
  }
  if let Some(timeout) = command_timeout {
    config.command_timeout_secs = timeout.as_secs().max(1);
  }
  debug!(prefix = %config.prefix.display(), "configuration loaded");

  let descriptor = match pipeline::load(descriptor_path) {
    Ok(descriptor) => descriptor,
    Err(err) => return report_failure(&err, global),
  };
  if !global.output.is_json() {
    print_info(&format!("Installing {} {}", descriptor.name(), descriptor.version()));
  }

  let rt = runtime()?;
  let result = rt.block_on(async {
    // Dropping the install future kills the running step and removes the build root.
    tokio::select! {
      result = pipeline::install(&descriptor, &config) => result.map(Some),
      _ = tokio::signal::ctrl_c() => Ok(None),
    }
  });

  match result {
    Ok(Some(report)) => report_success(&report, global),
    Ok(None) => Err(anyhow!("Interrupted")),
    Err(err) => report_failure(&err, global),
  }
}

fn report_success(report: &InstallReport, global: &GlobalArgs) -> Result<ExitCode> {
  let passed = report.test.is_pass();

  if global.output.is_json() {
    print_json(report)?;
  } else {
    let record = &report.record;
    print_success(&format!("Installed {} {}", record.name, record.version));
    print_stat("Prefix", &record.prefix.display().to_string());
    print_stat("Files", &record.files.len().to_string());

    let build_time: Duration = report.build.steps.iter().map(|s| s.output.duration).sum();
    print_stat(
      "Build",
      &format!("{} step(s) in {}", report.build.steps.len(), format_duration(build_time)),
    );

    if global.verbose {
      for step in &report.build.steps {
        println!();
        print_info(&format!("Step {}: {}", step.index, step.command));
        print_captured(&step.output.combined());
      }
    }

    match &report.test {
      TestOutcome::Pass { output } => {
        print_success(&format!("Self-test passed ({})", format_duration(output.duration)));
      }
      TestOutcome::Fail { exit_status, output } => {
        print_warning(&format!("Self-test failed (exit status {})", status_label(*exit_status)));
        print_captured(&output.combined());
      }
    }
  }

  Ok(if passed { ExitCode::SUCCESS } else { test_failed() })
}

fn report_failure(err: &RunError, global: &GlobalArgs) -> Result<ExitCode> {
  if global.output.is_json() {
    print_json(&FailureOutput {
      status: "error",
      stage: err.stage,
      class: err.class(),
      retryable: err.is_retryable(),
      message: err.to_string(),
      output: err.output(),
    })?;
  } else {
    print_error(&err.to_string());
    if let Some(output) = err.output() {
      print_captured(output);
    }
  }
  Ok(ExitCode::FAILURE)
}

pub(super) fn status_label(status: Option<i32>) -> String {
  status.map_or_else(|| "signal".to_string(), |code| code.to_string())
}
