//! Post-install self-test.
//!
//! Runs a package's declared test command against its installed keg. The
//! outcome is a value: a failing test never touches installed state.

use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;
use tracing::{info, warn};

use crate::build::join_path;
use crate::descriptor::TestProcedure;
use crate::process::{self, Invocation, ProcessError, ProcessOutput};
use crate::record::InstallationRecord;

#[derive(Debug, Error)]
pub enum TestError {
  #[error("test command `{command}` could not be started: {source}")]
  Spawn {
    command: String,
    #[source]
    source: ProcessError,
  },

  #[error("test command `{command}` timed out after {timeout:?}")]
  Timeout { command: String, timeout: Duration },

  #[error("failed to create test directory: {0}")]
  Workdir(#[source] io::Error),
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum TestOutcome {
  Pass { output: ProcessOutput },
  Fail { exit_status: Option<i32>, output: ProcessOutput },
}

impl TestOutcome {
  pub fn is_pass(&self) -> bool {
    matches!(self, TestOutcome::Pass { .. })
  }

  pub fn output(&self) -> &ProcessOutput {
    match self {
      TestOutcome::Pass { output } | TestOutcome::Fail { output, .. } => output,
    }
  }
}

#[derive(Debug, Clone)]
pub struct TestOptions {
  pub timeout: Duration,
  pub base_path: Vec<PathBuf>,
}

/// Expand `${bin}` and `${prefix}` against an installed keg.
pub fn substitute(value: &str, keg: &Path) -> String {
  value
    .replace("${bin}", &crate::layout::bin_dir(keg).to_string_lossy())
    .replace("${prefix}", &keg.to_string_lossy())
}

/// Run `procedure` against the installation described by `record`.
///
/// PATH is the keg's `bin/`, then `runtime_bin_dirs`, then the base path. The
/// command runs in a throwaway directory that also serves as HOME.
pub async fn test(
  procedure: &TestProcedure,
  record: &InstallationRecord,
  runtime_bin_dirs: &[PathBuf],
  options: &TestOptions,
) -> Result<TestOutcome, TestError> {
  let workdir = tempfile::Builder::new()
    .prefix("kiln-test-")
    .tempdir()
    .map_err(TestError::Workdir)?;

  let path_dirs: Vec<PathBuf> = std::iter::once(record.bin_dir())
    .chain(runtime_bin_dirs.iter().cloned())
    .chain(options.base_path.iter().cloned())
    .collect();
  let work = workdir.path().to_string_lossy().into_owned();

  let invocation = Invocation::new(substitute(&procedure.command, &record.prefix), workdir.path())
    .args(procedure.args.iter().map(|a| substitute(a, &record.prefix)))
    .env("PATH", join_path(&path_dirs))
    .env("HOME", work.clone())
    .env("TMPDIR", work)
    .env("LANG", "C")
    .env("LC_ALL", "C")
    .env("KILN_PACKAGE_PREFIX", record.prefix.to_string_lossy());

  let command = std::iter::once(invocation.program.as_str())
    .chain(invocation.args.iter().map(String::as_str))
    .collect::<Vec<_>>()
    .join(" ");
  info!(package = %record.name, command = %command, "running test");

  let output = process::run(&invocation, options.timeout).await.map_err(|e| match e {
    ProcessError::Timeout { timeout, .. } => TestError::Timeout {
      command: command.clone(),
      timeout,
    },
    source => TestError::Spawn {
      command: command.clone(),
      source,
    },
  })?;

  if output.status == Some(procedure.expect_status) {
    info!(package = %record.name, "test passed");
    Ok(TestOutcome::Pass { output })
  } else {
    warn!(package = %record.name, status = ?output.status, expected = procedure.expect_status, "test failed");
    Ok(TestOutcome::Fail {
      exit_status: output.status,
      output,
    })
  }
}
