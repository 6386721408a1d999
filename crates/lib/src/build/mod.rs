//! Sandboxed execution of a package's build steps.
//!
//! Every step runs with a cleared environment:
//! - `PATH` is the dependency `bin/` directories followed by the configured base path
//! - `HOME` and `TMPDIR`/`TMP`/`TEMP` point inside the build root
//! - `LANG=C`, `LC_ALL=C`, `SOURCE_DATE_EPOCH=315532800`
//! - `KILN_SOURCE_ROOT`, `KILN_PACKAGE_NAME`, `KILN_PACKAGE_VERSION`
//! - `KILN_DEP_<NAME>_PREFIX` for each resolved dependency
//! - allowlisted host variables from `pass_env`, then the step's own `env`
//!
//! Steps run strictly in order. The first non-zero exit stops the build.

use std::collections::BTreeMap;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info};

use crate::consts::SOURCE_DATE_EPOCH;
use crate::descriptor::{BuildStep, InstallProcedure, is_safe_relative};
use crate::process::{self, Invocation, ProcessError, ProcessOutput};
use crate::resolve::ResolvedDependencies;

#[derive(Debug, Error)]
pub enum BuildError {
  #[error("build step {step_index} (`{command}`) exited with {}", exit_label(*exit_status))]
  BuildStepFailed {
    step_index: usize,
    command: String,
    exit_status: Option<i32>,
    /// Combined stdout and stderr of the failing step.
    output: String,
  },

  #[error("build step {step_index} (`{command}`) timed out after {timeout:?}")]
  Timeout {
    step_index: usize,
    command: String,
    timeout: Duration,
  },

  #[error("build step {step_index} (`{command}`) could not be started: {source}")]
  Spawn {
    step_index: usize,
    command: String,
    #[source]
    source: ProcessError,
  },

  #[error("build step {step_index} has an invalid working directory '{cwd}'")]
  InvalidCwd { step_index: usize, cwd: String },

  #[error("failed to prepare build root at {}: {source}", path.display())]
  Io {
    path: PathBuf,
    #[source]
    source: io::Error,
  },
}

fn exit_label(status: Option<i32>) -> String {
  match status {
    Some(code) => format!("status {}", code),
    None => "a signal".to_string(),
  }
}

impl BuildError {
  /// Captured output of the failing step, if any.
  pub fn output(&self) -> Option<&str> {
    match self {
      BuildError::BuildStepFailed { output, .. } => Some(output),
      _ => None,
    }
  }
}

#[derive(Debug, Clone)]
pub struct BuildOptions {
  pub timeout: Duration,
  pub base_path: Vec<PathBuf>,
  /// Host variables copied into the sandbox when set.
  pub pass_env: Vec<String>,
  /// Ephemeral directory owned by this run.
  pub build_root: PathBuf,
  pub name: String,
  pub version: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct StepOutput {
  pub index: usize,
  pub command: String,
  #[serde(flatten)]
  pub output: ProcessOutput,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct BuildOutput {
  pub steps: Vec<StepOutput>,
}

/// Environment shared by every step of one build.
pub fn sandbox_env(source_root: &Path, resolved: &ResolvedDependencies, options: &BuildOptions) -> BTreeMap<String, String> {
  let home = options.build_root.join("home");
  let tmp = options.build_root.join("tmp");

  let path_dirs: Vec<PathBuf> = resolved
    .build_bin_dirs()
    .into_iter()
    .chain(options.base_path.iter().cloned())
    .collect();

  let mut env = BTreeMap::new();
  env.insert("PATH".to_string(), join_path(&path_dirs));
  env.insert("HOME".to_string(), display(&home));
  for key in ["TMPDIR", "TMP", "TEMP"] {
    env.insert(key.to_string(), display(&tmp));
  }
  env.insert("LANG".to_string(), "C".to_string());
  env.insert("LC_ALL".to_string(), "C".to_string());
  env.insert("SOURCE_DATE_EPOCH".to_string(), SOURCE_DATE_EPOCH.to_string());
  env.insert("KILN_SOURCE_ROOT".to_string(), display(source_root));
  env.insert("KILN_PACKAGE_NAME".to_string(), options.name.clone());
  env.insert("KILN_PACKAGE_VERSION".to_string(), options.version.clone());
  env.extend(resolved.build_env());

  for key in &options.pass_env {
    if let Some(value) = std::env::var_os(key) {
      env.insert(key.clone(), value.to_string_lossy().into_owned());
    }
  }

  env
}

pub(crate) fn join_path(dirs: &[PathBuf]) -> String {
  dirs.iter().map(|d| display(d)).collect::<Vec<_>>().join(":")
}

fn display(path: &Path) -> String {
  path.to_string_lossy().into_owned()
}

/// Run every build step of `procedure` inside `source_root`.
pub async fn run(
  procedure: &InstallProcedure,
  source_root: &Path,
  resolved: &ResolvedDependencies,
  options: &BuildOptions,
) -> Result<BuildOutput, BuildError> {
  for dir in [options.build_root.join("home"), options.build_root.join("tmp")] {
    tokio::fs::create_dir_all(&dir)
      .await
      .map_err(|source| BuildError::Io { path: dir.clone(), source })?;
  }

  let base_env = sandbox_env(source_root, resolved, options);
  let mut output = BuildOutput::default();

  for (step_index, step) in procedure.steps.iter().enumerate() {
    let invocation = invocation_for(step_index, step, source_root, &base_env)?;
    let command = step.display();
    info!(package = %options.name, step = step_index, command = %command, "running build step");

    let result = process::run(&invocation, options.timeout).await.map_err(|e| match e {
      ProcessError::Timeout { timeout, .. } => BuildError::Timeout {
        step_index,
        command: command.clone(),
        timeout,
      },
      source => BuildError::Spawn {
        step_index,
        command: command.clone(),
        source,
      },
    })?;

    if !result.success() {
      debug!(step = step_index, status = ?result.status, "build step failed");
      return Err(BuildError::BuildStepFailed {
        step_index,
        command,
        exit_status: result.status,
        output: result.combined(),
      });
    }

    output.steps.push(StepOutput {
      index: step_index,
      command,
      output: result,
    });
  }

  info!(package = %options.name, steps = output.steps.len(), "build finished");
  Ok(output)
}

fn invocation_for(
  step_index: usize,
  step: &BuildStep,
  source_root: &Path,
  base_env: &BTreeMap<String, String>,
) -> Result<Invocation, BuildError> {
  let cwd = match &step.cwd {
    None => source_root.to_path_buf(),
    Some(rel) if is_safe_relative(rel) => source_root.join(rel),
    Some(rel) => {
      return Err(BuildError::InvalidCwd {
        step_index,
        cwd: rel.clone(),
      });
    }
  };

  // A relative program with a separator is resolved against the step's cwd.
  let program = if step.command.contains('/') && Path::new(&step.command).is_relative() {
    display(&cwd.join(&step.command))
  } else {
    step.command.clone()
  };

  let mut env = base_env.clone();
  env.extend(step.env.iter().map(|(k, v)| (k.clone(), v.clone())));

  Ok(Invocation {
    program,
    args: step.args.clone(),
    env,
    cwd,
  })
}
