use std::time::Duration;

use kiln_lib::descriptor;
use kiln_lib::lock::PackageLock;
use kiln_lib::pipeline::{self, Stage, StageFailure};
use kiln_lib::record::RecordStore;
use kiln_lib::stage::StageError;

use super::common::{Fixture, package_toml};

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn different_packages_install_concurrently() {
  let fixture = Fixture::new();
  let alpha = fixture.package("alpha", "echo alpha");
  let beta = fixture.package("beta", "echo beta");

  let (a, b) = tokio::join!(
    pipeline::install(&alpha, &fixture.config),
    pipeline::install(&beta, &fixture.config)
  );

  assert!(a.unwrap().test.is_pass());
  assert!(b.unwrap().test.is_pass());
  let names: Vec<_> = RecordStore::for_layout(&fixture.config.layout())
    .list()
    .unwrap()
    .into_iter()
    .map(|r| r.name)
    .collect();
  assert_eq!(names, vec!["alpha", "beta"]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn same_package_installs_serialize() {
  let fixture = Fixture::new();
  let pkg = fixture.package("hello", "echo hi");

  let (a, b) = tokio::join!(
    pipeline::install(&pkg, &fixture.config),
    pipeline::install(&pkg, &fixture.config)
  );

  let (a, b) = (a.unwrap(), b.unwrap());
  assert!(a.record.same_installation(&b.record));
  let stored = RecordStore::for_layout(&fixture.config.layout())
    .load("hello")
    .unwrap()
    .unwrap();
  assert!(stored.same_installation(&a.record));
  assert!(fixture.config.prefix.join("pkgs/hello/1.0.0/bin/hello").exists());
}

#[tokio::test]
async fn held_lock_blocks_only_its_package() {
  let mut fixture = Fixture::new();
  fixture.short_lock_timeout();
  let layout = fixture.config.layout();
  let _held = PackageLock::try_acquire(&layout, "alpha", "another run").unwrap();

  let beta = pipeline::install(&fixture.package("beta", "echo beta"), &fixture.config).await;
  assert!(beta.is_ok());

  let err = pipeline::install(&fixture.package("alpha", "echo alpha"), &fixture.config)
    .await
    .unwrap_err();
  assert_eq!(err.stage, Stage::Staged);
  assert!(matches!(err.cause, StageFailure::Stage(StageError::Locked(_))));
  assert!(err.is_retryable());
  assert!(!fixture.config.prefix.join("pkgs/alpha").exists());
}

#[tokio::test]
async fn dropping_an_install_stops_the_build() {
  let fixture = Fixture::new();
  let (archive, hash) = fixture.source("slow", "true");
  let marker = fixture.temp.path().join("still-running");
  let toml = package_toml("slow", &archive, &hash, "").replace(
    "mkdir -p out && cp tool.sh out/slow && chmod 755 out/slow",
    &format!("(sleep 2; touch {}) & wait", marker.display()),
  );
  let pkg = descriptor::load(&toml).unwrap();

  let cancelled = tokio::time::timeout(Duration::from_secs(1), pipeline::install(&pkg, &fixture.config)).await;
  assert!(cancelled.is_err());

  assert_eq!(fixture.leftover_build_roots(), 0);
  assert!(RecordStore::for_layout(&fixture.config.layout()).load("slow").unwrap().is_none());
  assert!(!fixture.config.prefix.join("pkgs/slow").exists());

  tokio::time::sleep(Duration::from_millis(2500)).await;
  assert!(!marker.exists());
}
