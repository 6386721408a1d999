//! External process invocation.
//!
//! A non-zero exit is ordinary data in [`ProcessOutput`]; only failing to
//! launch or wait for the process, or running past the timeout, is an error.
//! The child always starts from an empty environment: callers pass every
//! variable it should see. On unix it also leads its own process group, and
//! the whole group is killed once the run ends, times out or is dropped, so
//! background jobs and compiler subprocesses never outlive their step.

use std::collections::BTreeMap;
use std::io;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::{Duration, Instant};

use serde::Serialize;
use thiserror::Error;
use tokio::process::Command;
use tracing::debug;

#[derive(Debug, Error)]
pub enum ProcessError {
  #[error("failed to start '{program}': {source}")]
  Spawn {
    program: String,
    #[source]
    source: io::Error,
  },

  #[error("'{program}' timed out after {timeout:?}")]
  Timeout { program: String, timeout: Duration },

  #[error("failed waiting for '{program}': {source}")]
  Wait {
    program: String,
    #[source]
    source: io::Error,
  },
}

/// A fully specified command: program, arguments, complete environment, working directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
  pub program: String,
  pub args: Vec<String>,
  pub env: BTreeMap<String, String>,
  pub cwd: PathBuf,
}

impl Invocation {
  pub fn new(program: impl Into<String>, cwd: impl Into<PathBuf>) -> Self {
    Self {
      program: program.into(),
      args: Vec::new(),
      env: BTreeMap::new(),
      cwd: cwd.into(),
    }
  }

  pub fn args<I, S>(mut self, args: I) -> Self
  where
    I: IntoIterator<Item = S>,
    S: Into<String>,
  {
    self.args.extend(args.into_iter().map(Into::into));
    self
  }

  pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
    self.env.insert(key.into(), value.into());
    self
  }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProcessOutput {
  /// Exit code, or `None` when the process was killed by a signal.
  pub status: Option<i32>,
  pub stdout: String,
  pub stderr: String,
  #[serde(with = "duration_millis")]
  pub duration: Duration,
}

impl ProcessOutput {
  pub fn success(&self) -> bool {
    self.status == Some(0)
  }

  /// stdout followed by stderr, for diagnostics.
  pub fn combined(&self) -> String {
    match (self.stdout.is_empty(), self.stderr.is_empty()) {
      (_, true) => self.stdout.clone(),
      (true, false) => self.stderr.clone(),
      (false, false) => {
        let mut out = self.stdout.clone();
        if !out.ends_with('\n') {
          out.push('\n');
        }
        out.push_str(&self.stderr);
        out
      }
    }
  }
}

/// Run `invocation` to completion, killing it if `timeout` elapses first.
///
/// Dropping the returned future also kills the child.
pub async fn run(invocation: &Invocation, timeout: Duration) -> Result<ProcessOutput, ProcessError> {
  let mut command = Command::new(&invocation.program);
  command
    .args(&invocation.args)
    .current_dir(&invocation.cwd)
    .env_clear()
    .envs(&invocation.env)
    .stdin(Stdio::null())
    .stdout(Stdio::piped())
    .stderr(Stdio::piped())
    .kill_on_drop(true);
  #[cfg(unix)]
  command.process_group(0);

  debug!(program = %invocation.program, args = ?invocation.args, cwd = ?invocation.cwd, "spawning process");

  let started = Instant::now();
  let child = command.spawn().map_err(|source| ProcessError::Spawn {
    program: invocation.program.clone(),
    source,
  })?;
  let _group = ProcessGroup::of(&child);

  let output = match tokio::time::timeout(timeout, child.wait_with_output()).await {
    Ok(result) => result.map_err(|source| ProcessError::Wait {
      program: invocation.program.clone(),
      source,
    })?,
    Err(_) => {
      return Err(ProcessError::Timeout {
        program: invocation.program.clone(),
        timeout,
      });
    }
  };

  let result = ProcessOutput {
    status: output.status.code(),
    stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
    stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
    duration: started.elapsed(),
  };

  debug!(program = %invocation.program, status = ?result.status, elapsed = ?result.duration, "process exited");
  Ok(result)
}

/// Kills the child's process group when dropped.
struct ProcessGroup {
  #[cfg(unix)]
  pgid: Option<rustix::process::Pid>,
}

impl ProcessGroup {
  #[cfg(unix)]
  fn of(child: &tokio::process::Child) -> Self {
    let pgid = child
      .id()
      .and_then(|id| i32::try_from(id).ok())
      .and_then(rustix::process::Pid::from_raw);
    Self { pgid }
  }

  #[cfg(not(unix))]
  fn of(_child: &tokio::process::Child) -> Self {
    Self {}
  }
}

impl Drop for ProcessGroup {
  fn drop(&mut self) {
    #[cfg(unix)]
    {
      // ESRCH once every member has already exited.
      if let Some(pgid) = self.pgid {
        let _ = rustix::process::kill_process_group(pgid, rustix::process::Signal::KILL);
      }
    }
  }
}

mod duration_millis {
  use std::time::Duration;

  use serde::Serializer;

  pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_u64(duration.as_millis() as u64)
  }
}
