use std::fs;

use kiln_lib::descriptor::{self, Category};
use kiln_lib::fetch::FetchError;
use kiln_lib::pipeline::{self, ErrorClass, Stage, StageFailure};
use kiln_lib::record::RecordStore;
use kiln_lib::resolve::ResolveError;
use kiln_lib::stage::StageError;
use kiln_lib::test_runner::TestOutcome;

use super::common::{Fixture, package_toml};

#[tokio::test]
async fn installs_builds_and_tests() {
  let fixture = Fixture::new();
  let pkg = fixture.package("hello", r#"echo "hello 1.0.0""#);

  let report = pipeline::install(&pkg, &fixture.config).await.unwrap();

  let keg = fixture.config.prefix.join("pkgs/hello/1.0.0");
  assert_eq!(report.record.prefix, keg);
  assert!(keg.join("bin/hello").exists());
  assert!(keg.join("share/doc/hello/README.md").exists());
  assert_eq!(report.record.files_in(Category::Executable).count(), 1);
  assert_eq!(report.build.steps.len(), 1);
  assert!(report.test.is_pass());
  assert_eq!(report.test.output().stdout.trim(), "hello 1.0.0");

  let stored = RecordStore::for_layout(&fixture.config.layout()).load("hello").unwrap();
  assert_eq!(stored, Some(report.record));
  assert_eq!(fixture.leftover_build_roots(), 0);
}

#[tokio::test]
async fn build_failure_leaves_no_trace() {
  let fixture = Fixture::new();
  let (archive, hash) = fixture.source("broken", "true");
  let toml = package_toml("broken", &archive, &hash, "").replace(
    "mkdir -p out && cp tool.sh out/broken && chmod 755 out/broken",
    "echo 'error[E0425]: cannot find value' >&2; exit 101",
  );
  let pkg = descriptor::load(&toml).unwrap();

  let err = pipeline::install(&pkg, &fixture.config).await.unwrap_err();

  assert_eq!(err.stage, Stage::Built);
  assert_eq!(err.class(), ErrorClass::Execution);
  assert!(err.output().unwrap().contains("cannot find value"));
  assert!(RecordStore::for_layout(&fixture.config.layout()).load("broken").unwrap().is_none());
  assert!(!fixture.config.prefix.join("pkgs").exists());
  assert_eq!(fixture.leftover_build_roots(), 0);
}

#[tokio::test]
async fn integrity_mismatch_never_builds() {
  let fixture = Fixture::new();
  let (archive, _) = fixture.source("tampered", "true");
  let marker = fixture.temp.path().join("build-ran");
  let toml = package_toml("tampered", &archive, &"0".repeat(64), "").replace(
    "mkdir -p out",
    &format!("touch {} && mkdir -p out", marker.display()),
  );
  let pkg = descriptor::load(&toml).unwrap();

  let err = pipeline::install(&pkg, &fixture.config).await.unwrap_err();

  assert_eq!(err.stage, Stage::Fetched);
  assert_eq!(err.class(), ErrorClass::Integrity);
  assert!(matches!(
    err.cause,
    StageFailure::Fetch(FetchError::IntegrityMismatch { .. })
  ));
  assert!(!marker.exists());
  assert!(!fixture.config.prefix.exists());
}

#[tokio::test]
async fn unmatched_mapping_leaves_prefix_unchanged() {
  let fixture = Fixture::new();
  pipeline::install(&fixture.package("hello", "echo hi"), &fixture.config)
    .await
    .unwrap();
  let before = fixture.snapshot_prefix();

  let (archive, hash) = fixture.source("hello", "echo hi");
  let toml = package_toml("hello", &archive, &hash, "").replace(
    r#"{ pattern = "README.md", category = "documentation" },"#,
    r#"{ pattern = "README.md", category = "documentation" },
  { pattern = "man/*.1", category = "documentation" },"#,
  );
  let err = pipeline::install(&descriptor::load(&toml).unwrap(), &fixture.config)
    .await
    .unwrap_err();

  assert_eq!(err.stage, Stage::Staged);
  assert!(matches!(err.cause, StageFailure::Stage(StageError::NoMatch { .. })));
  assert_eq!(fixture.snapshot_prefix(), before);
}

#[tokio::test]
async fn reinstall_is_idempotent() {
  let fixture = Fixture::new();
  let pkg = fixture.package("hello", "echo hi");

  let first = pipeline::install(&pkg, &fixture.config).await.unwrap();
  let before = fixture.snapshot_prefix();
  let second = pipeline::install(&pkg, &fixture.config).await.unwrap();

  assert_eq!(first.record, second.record);
  assert_eq!(fixture.snapshot_prefix(), before);
}

#[tokio::test]
async fn missing_dependencies_are_listed_together() {
  let fixture = Fixture::new();
  let (archive, hash) = fixture.source("app", "true");
  let extra = r#"
[[dependencies]]
name = "rust"
scope = "build"

[[dependencies]]
name = "zlib"
"#;
  let pkg = descriptor::load(&package_toml("app", &archive, &hash, extra)).unwrap();

  let err = pipeline::install(&pkg, &fixture.config).await.unwrap_err();

  assert_eq!(err.stage, Stage::DependenciesResolved);
  assert!(err.is_retryable());
  match err.cause {
    StageFailure::Resolve(ResolveError::MissingDependency { names }) => assert_eq!(names, vec!["rust", "zlib"]),
    other => panic!("unexpected cause: {other}"),
  }
  assert_eq!(fixture.leftover_build_roots(), 0);
}

#[tokio::test]
async fn dependencies_reach_build_and_test() {
  let fixture = Fixture::new();
  pipeline::install(&fixture.package("greeter", "echo greetings"), &fixture.config)
    .await
    .unwrap();
  pipeline::install(&fixture.package("toolchain", "echo tc"), &fixture.config)
    .await
    .unwrap();

  let (archive, hash) = fixture.source("app", "greeter");
  let extra = r#"
[[dependencies]]
name = "greeter"
scope = "runtime"

[[dependencies]]
name = "toolchain"
scope = "build"
"#;
  let toml = package_toml("app", &archive, &hash, extra).replace(
    "mkdir -p out",
    "test -x $KILN_DEP_TOOLCHAIN_PREFIX/bin/toolchain && toolchain && mkdir -p out",
  );
  let report = pipeline::install(&descriptor::load(&toml).unwrap(), &fixture.config)
    .await
    .unwrap();

  assert_eq!(report.record.runtime_dependencies, vec!["greeter"]);
  assert_eq!(report.record.build_dependencies, vec!["toolchain"]);
  assert_eq!(report.build.steps[0].output.stdout.trim(), "tc");
  assert!(report.test.is_pass());
  assert_eq!(report.test.output().stdout.trim(), "greetings");
}

#[tokio::test]
async fn failing_self_test_keeps_installation() {
  let fixture = Fixture::new();
  let pkg = fixture.package("flaky", "echo 'segfault' >&2; exit 3");

  let report = pipeline::install(&pkg, &fixture.config).await.unwrap();

  match &report.test {
    TestOutcome::Fail { exit_status, output } => {
      assert_eq!(*exit_status, Some(3));
      assert!(output.stderr.contains("segfault"));
    }
    other => panic!("expected failing test, got {other:?}"),
  }
  assert!(fixture.config.prefix.join("pkgs/flaky/1.0.0/bin/flaky").exists());
}

#[tokio::test]
async fn retest_uses_the_record() {
  let fixture = Fixture::new();
  pipeline::install(&fixture.package("hello", "echo hi"), &fixture.config)
    .await
    .unwrap();

  let outcome = pipeline::retest("hello", &fixture.config).await.unwrap();
  assert!(outcome.is_pass());

  let err = pipeline::retest("ghost", &fixture.config).await.unwrap_err();
  assert!(matches!(err.cause, StageFailure::NotInstalled(_)));
}

#[tokio::test]
async fn unverified_source_can_be_required_away() {
  let mut fixture = Fixture::new();
  fixture.config.require_checksum = true;
  let (archive, _) = fixture.source("loose", "true");
  let pkg = descriptor::load(&package_toml("loose", &archive, "SKIP", "")).unwrap();

  let err = pipeline::install(&pkg, &fixture.config).await.unwrap_err();

  assert_eq!(err.stage, Stage::Fetched);
  assert!(matches!(
    err.cause,
    StageFailure::Fetch(FetchError::UnverifiedSource { .. })
  ));
}

#[tokio::test]
async fn descriptor_file_errors_are_load_stage() {
  let fixture = Fixture::new();
  let path = fixture.temp.path().join("bad.toml");
  fs::write(&path, "name = \"\"\n").unwrap();

  let err = pipeline::load(&path).unwrap_err();
  assert_eq!(err.stage, Stage::Loaded);
  assert_eq!(err.class(), ErrorClass::Descriptor);
}

#[tokio::test]
#[serial_test::serial]
async fn relative_prefix_is_made_absolute() {
  let mut fixture = Fixture::new();
  let pkg = fixture.package("hello", r#"echo "hello 1.0.0""#);
  fixture.config.prefix = std::path::PathBuf::from("relprefix");

  let previous = std::env::current_dir().unwrap();
  std::env::set_current_dir(fixture.temp.path()).unwrap();
  let cwd = std::env::current_dir().unwrap();
  let result = pipeline::install(&pkg, &fixture.config).await;
  std::env::set_current_dir(previous).unwrap();

  let report = result.unwrap();
  assert_eq!(report.record.prefix, cwd.join("relprefix/pkgs/hello/1.0.0"));
  assert!(report.test.is_pass());
  assert_eq!(report.test.output().stdout.trim(), "hello 1.0.0");
}
