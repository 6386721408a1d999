use std::fmt;
use std::io;

use serde::Serialize;
use thiserror::Error;

use crate::build::BuildError;
use crate::config::ConfigError;
use crate::descriptor::DescriptorError;
use crate::fetch::FetchError;
use crate::record::RecordError;
use crate::resolve::ResolveError;
use crate::stage::StageError;
use crate::test_runner::TestError;

/// Pipeline states, in order. A failure names the stage that was being entered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
  Loaded,
  DependenciesResolved,
  Fetched,
  Built,
  Staged,
  Tested,
}

impl fmt::Display for Stage {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let name = match self {
      Stage::Loaded => "load",
      Stage::DependenciesResolved => "resolve",
      Stage::Fetched => "fetch",
      Stage::Built => "build",
      Stage::Staged => "stage",
      Stage::Tested => "test",
    };
    f.write_str(name)
  }
}

/// How a failure should be treated by whoever invoked the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClass {
  /// The descriptor itself is wrong; never retried.
  Descriptor,
  /// Something outside the package is missing or unreachable.
  Environment,
  /// The source does not match what was declared.
  Integrity,
  /// A build or staging step failed; diagnostics are attached.
  Execution,
  Internal,
}

#[derive(Debug, Error)]
pub enum StageFailure {
  #[error(transparent)]
  Descriptor(#[from] DescriptorError),

  #[error(transparent)]
  Resolve(#[from] ResolveError),

  #[error(transparent)]
  Fetch(#[from] FetchError),

  #[error(transparent)]
  Build(#[from] BuildError),

  #[error(transparent)]
  Stage(#[from] StageError),

  #[error(transparent)]
  Test(#[from] TestError),

  #[error(transparent)]
  Record(#[from] RecordError),

  #[error(transparent)]
  Config(#[from] ConfigError),

  #[error("package '{0}' is not installed")]
  NotInstalled(String),

  #[error("failed to prepare build root: {0}")]
  BuildRoot(#[source] io::Error),

  #[error("background task failed: {0}")]
  Join(String),
}

#[derive(Debug, Error)]
#[error("{stage} failed: {cause}")]
pub struct RunError {
  pub stage: Stage,
  #[source]
  pub cause: StageFailure,
}

impl RunError {
  pub fn new(stage: Stage, cause: impl Into<StageFailure>) -> Self {
    Self {
      stage,
      cause: cause.into(),
    }
  }

  pub fn class(&self) -> ErrorClass {
    match &self.cause {
      StageFailure::Descriptor(_) => ErrorClass::Descriptor,
      StageFailure::Resolve(ResolveError::MissingDependency { .. }) => ErrorClass::Environment,
      StageFailure::Fetch(e) => match e {
        FetchError::Unavailable { .. } | FetchError::Timeout { .. } | FetchError::HttpStatus { .. } => {
          ErrorClass::Environment
        }
        FetchError::IntegrityMismatch { .. } | FetchError::Extraction { .. } => ErrorClass::Integrity,
        FetchError::UnverifiedSource { .. } | FetchError::InvalidUrl { .. } => ErrorClass::Descriptor,
        FetchError::Io { .. } => ErrorClass::Internal,
      },
      StageFailure::Stage(StageError::Locked(_)) => ErrorClass::Environment,
      StageFailure::Build(_) | StageFailure::Stage(_) | StageFailure::Test(_) => ErrorClass::Execution,
      StageFailure::NotInstalled(_) => ErrorClass::Environment,
      StageFailure::Resolve(ResolveError::Record(_))
      | StageFailure::Record(_)
      | StageFailure::Config(_)
      | StageFailure::BuildRoot(_)
      | StageFailure::Join(_) => ErrorClass::Internal,
    }
  }

  /// Whether running the same pipeline again might succeed without changes to the descriptor.
  pub fn is_retryable(&self) -> bool {
    match &self.cause {
      StageFailure::Resolve(ResolveError::MissingDependency { .. }) => true,
      StageFailure::Fetch(e) => e.is_retryable(),
      StageFailure::Stage(StageError::Locked(_)) => true,
      _ => false,
    }
  }

  /// Captured output of a failed build step.
  pub fn output(&self) -> Option<&str> {
    match &self.cause {
      StageFailure::Build(e) => e.output(),
      _ => None,
    }
  }
}
