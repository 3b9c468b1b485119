//! Process-level checks: driver preflight and interpreter failure handling.
//!
//! These tests rewrite `PATH` and the client-side script variable, so they
//! run serially.

use quickstrom::error::{CheckError, ConfigError};
use quickstrom::{Browser, Check};
use serial_test::serial;
use std::path::Path;

async fn with_path<T>(dir: &Path, fut: impl std::future::Future<Output = T>) -> T {
    let original = std::env::var_os("PATH");
    std::env::set_var("PATH", dir);
    let out = fut.await;
    match original {
        Some(path) => std::env::set_var("PATH", path),
        None => std::env::remove_var("PATH"),
    }
    out
}

fn write_scripts_dir(dir: &Path) {
    for name in ["queryState.js", "installEventListener.js", "awaitEvents.js"] {
        std::fs::write(dir.join(name), "return null;").unwrap();
    }
}

#[tokio::test]
#[serial]
async fn a_missing_driver_fails_before_any_session() {
    let empty = tempfile::tempdir().unwrap();
    let mut check = Check::new("todomvc", "http://localhost:8000/");
    check.browser = Browser::Firefox;

    let err = with_path(empty.path(), check.execute()).await.unwrap_err();
    match err {
        CheckError::Config(ConfigError::DriverMissing(binary)) => {
            assert_eq!(binary, "geckodriver");
        }
        other => panic!("expected a driver-missing config error, got {}", other),
    }
}

#[cfg(unix)]
#[tokio::test]
#[serial]
async fn a_nonzero_interpreter_exit_is_reported_with_its_code() {
    use std::os::unix::fs::PermissionsExt;

    let bin = tempfile::tempdir().unwrap();
    // the preflight only checks for the driver's presence
    std::fs::write(bin.path().join("geckodriver"), "").unwrap();
    let specstrom = bin.path().join("specstrom");
    std::fs::write(&specstrom, "#!/bin/sh\nexit 2\n").unwrap();
    std::fs::set_permissions(&specstrom, std::fs::Permissions::from_mode(0o755)).unwrap();

    let scripts = tempfile::tempdir().unwrap();
    write_scripts_dir(scripts.path());
    std::env::set_var(quickstrom::scripts::CLIENT_SIDE_DIR_VAR, scripts.path());

    let log_dir = tempfile::tempdir().unwrap();
    let mut check = Check::new("todomvc", "http://localhost:8000/");
    check.interpreter_log = log_dir.path().join("interpreter.log");

    let err = with_path(bin.path(), check.execute()).await.unwrap_err();
    match err {
        CheckError::InterpreterFailed {
            exit_code,
            log_path,
        } => {
            assert_eq!(exit_code, Some(2));
            assert_eq!(log_path, check.interpreter_log);
            assert!(log_path.exists());
        }
        other => panic!("expected an interpreter failure, got {}", other),
    }
}

#[cfg(unix)]
#[tokio::test]
#[serial]
async fn a_clean_interpreter_exit_without_done_yields_no_results() {
    use std::os::unix::fs::PermissionsExt;

    let bin = tempfile::tempdir().unwrap();
    std::fs::write(bin.path().join("geckodriver"), "").unwrap();
    let specstrom = bin.path().join("specstrom");
    std::fs::write(&specstrom, "#!/bin/sh\nexit 0\n").unwrap();
    std::fs::set_permissions(&specstrom, std::fs::Permissions::from_mode(0o755)).unwrap();

    let scripts = tempfile::tempdir().unwrap();
    write_scripts_dir(scripts.path());
    std::env::set_var(quickstrom::scripts::CLIENT_SIDE_DIR_VAR, scripts.path());

    let log_dir = tempfile::tempdir().unwrap();
    let mut check = Check::new("todomvc", "http://localhost:8000/");
    check.interpreter_log = log_dir.path().join("interpreter.log");

    let results = with_path(bin.path(), check.execute()).await.unwrap();
    assert!(results.is_empty());
}
