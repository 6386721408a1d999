use predicates::prelude::*;

use super::common::{TestEnv, build_script};

#[test]
fn install_succeeds_and_reports() {
  let env = TestEnv::new();
  let descriptor = env.package("hello", r#"echo "hello 1.0.0""#, "");

  env
    .kiln()
    .arg("install")
    .arg(&descriptor)
    .assert()
    .success()
    .stdout(predicate::str::contains("Installed hello 1.0.0"))
    .stdout(predicate::str::contains("Self-test passed"));

  assert!(env.prefix().join("pkgs/hello/1.0.0/bin/hello").exists());
  assert!(env.prefix().join("pkgs/hello/current").exists());
  assert_eq!(env.leftover_build_roots(), 0);

  env
    .kiln()
    .arg("list")
    .assert()
    .success()
    .stdout(predicate::str::contains("hello"))
    .stdout(predicate::str::contains("1 package(s) installed"));

  env
    .kiln()
    .args(["info", "hello"])
    .assert()
    .success()
    .stdout(predicate::str::contains("hello 1.0.0"))
    .stdout(predicate::str::contains("executable"));
}

#[test]
fn install_json_output() {
  let env = TestEnv::new();
  let descriptor = env.package("hello", r#"echo "hello 1.0.0""#, "");

  let output = env
    .kiln()
    .args(["--output", "json", "install"])
    .arg(&descriptor)
    .output()
    .unwrap();

  assert!(output.status.success());
  let report: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
  assert_eq!(report["record"]["name"], "hello");
  assert_eq!(report["test"]["result"], "pass");
  assert_eq!(report["build"]["steps"].as_array().unwrap().len(), 1);

  let info = env.kiln().args(["info", "hello", "--output", "json"]).output().unwrap();
  let record: serde_json::Value = serde_json::from_slice(&info.stdout).unwrap();
  assert_eq!(record["version"], "1.0.0");
}

#[test]
fn failing_self_test_exits_two_and_keeps_install() {
  let env = TestEnv::new();
  let descriptor = env.package("flaky", "echo 'segfault' >&2; exit 3", "");

  env
    .kiln()
    .arg("install")
    .arg(&descriptor)
    .assert()
    .code(2)
    .stdout(predicate::str::contains("Installed flaky 1.0.0"))
    .stderr(predicate::str::contains("Self-test failed (exit status 3)"))
    .stderr(predicate::str::contains("segfault"));

  assert!(env.prefix().join("pkgs/flaky/1.0.0/bin/flaky").exists());

  env
    .kiln()
    .args(["test", "flaky"])
    .assert()
    .code(2)
    .stderr(predicate::str::contains("self-test failed"));
}

#[test]
fn retest_installed_package() {
  let env = TestEnv::new();
  let descriptor = env.package("hello", r#"echo "hello 1.0.0""#, "");
  env.kiln().arg("install").arg(&descriptor).assert().success();

  env
    .kiln()
    .args(["test", "hello"])
    .assert()
    .success()
    .stdout(predicate::str::contains("hello: self-test passed"));
}

#[test]
fn build_failure_prints_stage_and_output() {
  let env = TestEnv::new();
  let (archive, sha) = env.source("broken", "true");
  let descriptor = env.descriptor(
    "broken",
    &archive,
    &sha,
    "echo 'error[E0425]: cannot find value' >&2; exit 101".to_string(),
    "",
  );

  env
    .kiln()
    .arg("install")
    .arg(&descriptor)
    .assert()
    .code(1)
    .stderr(predicate::str::contains("build failed"))
    .stderr(predicate::str::contains("cannot find value"));

  assert!(!env.prefix().join("pkgs/broken").exists());
  assert_eq!(env.leftover_build_roots(), 0);
}

#[test]
fn integrity_failure_json() {
  let env = TestEnv::new();
  let (archive, _) = env.source("tampered", "true");
  let descriptor = env.descriptor("tampered", &archive, &"0".repeat(64), build_script("tampered"), "");

  let output = env
    .kiln()
    .args(["install", "--output", "json"])
    .arg(&descriptor)
    .output()
    .unwrap();

  assert_eq!(output.status.code(), Some(1));
  let failure: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
  assert_eq!(failure["status"], "error");
  assert_eq!(failure["stage"], "fetched");
  assert_eq!(failure["class"], "integrity");
  assert_eq!(failure["retryable"], false);
}

#[test]
fn missing_dependency_names_it() {
  let env = TestEnv::new();
  let descriptor = env.package("app", "true", &super::common::runtime_dependency("libfoo"));

  env
    .kiln()
    .arg("install")
    .arg(&descriptor)
    .assert()
    .code(1)
    .stderr(predicate::str::contains("resolve failed"))
    .stderr(predicate::str::contains("libfoo"));
}

#[test]
fn prefix_flag_overrides_config() {
  let env = TestEnv::new();
  let descriptor = env.package("hello", "true", "");
  let other = env.temp.path().join("other-prefix");

  env
    .kiln()
    .arg("--prefix")
    .arg(&other)
    .arg("install")
    .arg(&descriptor)
    .assert()
    .success();

  assert!(other.join("pkgs/hello/1.0.0/bin/hello").exists());
  assert!(!env.prefix().join("pkgs/hello").exists());
}

#[test]
fn unverified_source_warns() {
  let env = TestEnv::new();
  let (archive, _) = env.source("loose", "true");
  let descriptor = env.descriptor("loose", &archive, "SKIP", build_script("loose"), "");

  env
    .kiln()
    .arg("install")
    .arg(&descriptor)
    .assert()
    .success()
    .stderr(predicate::str::contains("WARN"));
}

#[test]
fn relative_prefix_flag_resolves_against_cwd() {
  let env = TestEnv::new();
  let descriptor = env.package("hello", r#"echo "hello 1.0.0""#, "");

  env
    .kiln()
    .current_dir(env.temp.path())
    .args(["--prefix", "relprefix", "install"])
    .arg(&descriptor)
    .assert()
    .success()
    .stdout(predicate::str::contains("Self-test passed"));

  assert!(env.temp.path().join("relprefix/pkgs/hello/1.0.0/bin/hello").exists());
}
