use kiln_lib::descriptor;
use kiln_lib::pipeline;
use kiln_lib::record::RecordStore;
use kiln_lib::uninstall::{UninstallError, UninstallOptions, uninstall};

use super::common::{Fixture, package_toml};

#[tokio::test]
async fn uninstall_reverses_install() {
  let fixture = Fixture::new();
  pipeline::install(&fixture.package("hello", "echo hi"), &fixture.config)
    .await
    .unwrap();

  let report = uninstall("hello", UninstallOptions::default(), &fixture.config).unwrap();

  assert_eq!(report.version, "1.0.0");
  assert_eq!(report.files, 2);
  assert!(!fixture.config.prefix.join("pkgs/hello").exists());
  assert!(RecordStore::for_layout(&fixture.config.layout()).load("hello").unwrap().is_none());
}

#[tokio::test]
async fn runtime_dependency_is_protected() {
  let fixture = Fixture::new();
  pipeline::install(&fixture.package("zlib", "echo zlib"), &fixture.config)
    .await
    .unwrap();
  let (archive, hash) = fixture.source("app", "echo app");
  let extra = "\n[[dependencies]]\nname = \"zlib\"\n";
  pipeline::install(
    &descriptor::load(&package_toml("app", &archive, &hash, extra)).unwrap(),
    &fixture.config,
  )
  .await
  .unwrap();

  let err = uninstall("zlib", UninstallOptions::default(), &fixture.config).unwrap_err();
  assert!(matches!(err, UninstallError::InUse { .. }));

  uninstall("app", UninstallOptions::default(), &fixture.config).unwrap();
  uninstall("zlib", UninstallOptions::default(), &fixture.config).unwrap();
}
