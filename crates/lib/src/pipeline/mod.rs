//! The install pipeline.
//!
//! `Loaded → DependenciesResolved → Fetched → Built → Staged → Tested`
//!
//! Each stage is a precondition for the next and the first failure ends the
//! run. The build root is a temporary directory under `config.build_dir` that
//! is removed on every exit path, including when the future is dropped.

mod error;

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Serialize;
use tempfile::TempDir;
use tracing::{info, warn};

use crate::build::{self, BuildOptions, BuildOutput};
use crate::config::{Config, ConfigError};
use crate::descriptor::{self, DependencyScope, DependencySpec, PackageDescriptor};
use crate::fetch::{self, ExtractedSourceRoot, FetchOptions};
use crate::record::{InstallationRecord, RecordStore};
use crate::resolve::{self, ResolveError};
use crate::stage::{self, StageRequest};
use crate::test_runner::{self, TestOptions, TestOutcome};

pub use error::{ErrorClass, RunError, Stage, StageFailure};

const RETRY_BACKOFF: Duration = Duration::from_millis(500);

#[derive(Debug, Clone, Serialize)]
pub struct InstallReport {
  pub record: InstallationRecord,
  pub build: BuildOutput,
  pub test: TestOutcome,
}

/// Load a descriptor file as the pipeline's first stage.
pub fn load(path: &Path) -> Result<PackageDescriptor, RunError> {
  descriptor::load_file(path).map_err(|e| RunError::new(Stage::Loaded, e))
}

/// Build, install and test one package.
///
/// A failing self-test is reported in [`InstallReport::test`]; the package
/// stays installed.
pub async fn install(descriptor: &PackageDescriptor, config: &Config) -> Result<InstallReport, RunError> {
  let config = &absolute(config).map_err(|e| RunError::new(Stage::DependenciesResolved, e))?;
  let name = descriptor.name();
  let version = descriptor.version();
  info!(package = %name, version = %version, "installing");

  let layout = config.layout();
  let store = RecordStore::for_layout(&layout);

  let resolved =
    resolve::resolve(descriptor.dependencies(), &store).map_err(|e| RunError::new(Stage::DependenciesResolved, e))?;

  let build_root = create_build_root(config, name).map_err(|e| RunError::new(Stage::Fetched, e))?;

  let source_root = fetch_with_retries(descriptor, build_root.path(), config)
    .await
    .map_err(|e| RunError::new(Stage::Fetched, e))?;

  let build_options = BuildOptions {
    timeout: config.command_timeout(),
    base_path: config.base_path.clone(),
    pass_env: config.pass_env.clone(),
    build_root: build_root.path().to_path_buf(),
    name: name.to_string(),
    version: version.to_string(),
  };
  let build = build::run(descriptor.install(), &source_root.path, &resolved, &build_options)
    .await
    .map_err(|e| RunError::new(Stage::Built, e))?;

  // Runtime dependencies must still be present when the keg is published.
  let runtime_specs: Vec<DependencySpec> = descriptor
    .dependencies()
    .iter()
    .filter(|d| d.scope == DependencyScope::Runtime)
    .cloned()
    .collect();
  let runtime = resolve::resolve(&runtime_specs, &store).map_err(|e| RunError::new(Stage::Staged, e))?;

  let request = StageRequest {
    layout: layout.clone(),
    name: name.to_string(),
    version: version.to_string(),
    source_root: source_root.path.clone(),
    mappings: descriptor.install().mappings.clone(),
    runtime_dependencies: runtime.runtime_names(),
    build_dependencies: resolved.build_names(),
    source_url: descriptor.source().url.clone(),
    checksum: descriptor.source().checksum.clone(),
    test: descriptor.test().clone(),
    lock_timeout: config.lock_timeout(),
  };
  let record = tokio::task::spawn_blocking(move || stage::stage(&request))
    .await
    .map_err(|e| RunError::new(Stage::Staged, StageFailure::Join(e.to_string())))?
    .map_err(|e| RunError::new(Stage::Staged, e))?;

  drop(build_root);

  let test = test_runner::test(
    descriptor.test(),
    &record,
    &runtime.runtime_bin_dirs(),
    &test_options(config),
  )
  .await
  .map_err(|e| RunError::new(Stage::Tested, e))?;

  info!(package = %name, version = %version, passed = test.is_pass(), "install finished");
  Ok(InstallReport { record, build, test })
}

/// Re-run the recorded self-test of an installed package.
pub async fn retest(name: &str, config: &Config) -> Result<TestOutcome, RunError> {
  let config = &absolute(config).map_err(|e| RunError::new(Stage::Tested, e))?;
  let store = RecordStore::for_layout(&config.layout());
  let record = store
    .load(name)
    .map_err(|e| RunError::new(Stage::Tested, e))?
    .ok_or_else(|| RunError::new(Stage::Tested, StageFailure::NotInstalled(name.to_string())))?;

  let runtime_bin_dirs = runtime_bin_dirs(&record, &store).map_err(|e| RunError::new(Stage::DependenciesResolved, e))?;

  test_runner::test(&record.test, &record, &runtime_bin_dirs, &test_options(config))
    .await
    .map_err(|e| RunError::new(Stage::Tested, e))
}

fn runtime_bin_dirs(record: &InstallationRecord, store: &RecordStore) -> Result<Vec<PathBuf>, ResolveError> {
  let specs: Vec<DependencySpec> = record
    .runtime_dependencies
    .iter()
    .map(|name| DependencySpec {
      name: name.clone(),
      scope: DependencyScope::Runtime,
    })
    .collect();
  Ok(resolve::resolve(&specs, store)?.runtime_bin_dirs())
}

/// A copy of `config` whose directories are absolute.
fn absolute(config: &Config) -> Result<Config, ConfigError> {
  let mut config = config.clone();
  config.make_absolute()?;
  Ok(config)
}

fn test_options(config: &Config) -> TestOptions {
  TestOptions {
    timeout: config.command_timeout(),
    base_path: config.base_path.clone(),
  }
}

fn create_build_root(config: &Config, name: &str) -> Result<TempDir, StageFailure> {
  std::fs::create_dir_all(&config.build_dir).map_err(StageFailure::BuildRoot)?;
  tempfile::Builder::new()
    .prefix(&format!("{}-", name))
    .tempdir_in(&config.build_dir)
    .map_err(StageFailure::BuildRoot)
}

async fn fetch_with_retries(
  descriptor: &PackageDescriptor,
  build_root: &Path,
  config: &Config,
) -> Result<ExtractedSourceRoot, fetch::FetchError> {
  let options = FetchOptions {
    timeout: config.fetch_timeout(),
    cache_dir: Some(config.cache_dir.clone()),
    require_checksum: config.require_checksum,
  };

  let mut attempt = 0;
  loop {
    match fetch::fetch(descriptor.source(), build_root, &options).await {
      Err(e) if e.is_retryable() && attempt < config.fetch_retries => {
        attempt += 1;
        warn!(url = %descriptor.source().url, attempt, error = %e, "fetch failed, retrying");
        tokio::time::sleep(RETRY_BACKOFF * attempt).await;
      }
      result => return result,
    }
  }
}
