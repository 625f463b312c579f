// ABOUTME: Integration tests for the process-backed local sandbox host
// ABOUTME: Boots real instances in temp directories and runs small shell processes

#![cfg(unix)]

use serde_json::json;
use serial_test::serial;
use std::time::Duration;
use tempfile::TempDir;

use livebuild_preview::{
    FileTree, HostErrorCode, LocalSandboxHost, LogType, SandboxHost, SpawnSpec,
};

fn shell(script: &str) -> SpawnSpec {
    SpawnSpec::new("sh", vec!["-c".to_string(), script.to_string()])
}

#[tokio::test]
#[serial]
async fn test_second_boot_violates_singleton_until_released() {
    let dir = TempDir::new().unwrap();
    let host = LocalSandboxHost::new(Some(dir.path().to_path_buf()));

    let first = host.boot().await.unwrap();
    let err = host.boot().await.unwrap_err();
    assert_eq!(err.code, HostErrorCode::SingletonViolation);

    let current = host.current_instance().unwrap();
    assert!(current.ptr_eq(&first));

    drop(current);
    drop(first);
    let again = host.boot().await.unwrap();
    assert!(again.is_alive());
}

#[tokio::test]
#[serial]
async fn test_mount_spawn_and_ready_detection() {
    let dir = TempDir::new().unwrap();
    let host = LocalSandboxHost::new(Some(dir.path().to_path_buf()));
    let sandbox = host.boot().await.unwrap();

    let tree = FileTree::from_manifest(&json!({
        "node_modules": { "vite": { "package.json": "{}" } },
        "greeting.txt": "hello"
    }))
    .unwrap();
    sandbox.mount(&tree).await.unwrap();
    assert!(sandbox.file_exists("node_modules/vite/package.json").await);
    assert!(!sandbox.file_exists("node_modules/react/package.json").await);

    let ready = sandbox.on_server_ready();
    let mut process = sandbox
        .spawn(shell(
            "cat greeting.txt; echo '  Local:   http://localhost:4173/'; sleep 30",
        ))
        .await
        .unwrap();
    let mut output = process.take_output().unwrap();
    let exit = process.take_exit().unwrap();

    let ready = tokio::time::timeout(Duration::from_secs(10), ready)
        .await
        .expect("server ready not reported")
        .unwrap();
    assert_eq!(ready.port, 4173);
    assert_eq!(ready.url, "http://localhost:4173");

    let first = output.recv().await.unwrap();
    assert_eq!(first.stream, LogType::Stdout);
    assert_eq!(first.line, "hello");

    process.kill();
    let code = tokio::time::timeout(Duration::from_secs(10), exit)
        .await
        .expect("killed process did not exit")
        .unwrap();
    assert_eq!(code, -1);
}

#[tokio::test]
#[serial]
async fn test_exit_code_and_stderr_are_reported() {
    let dir = TempDir::new().unwrap();
    let host = LocalSandboxHost::new(Some(dir.path().to_path_buf()));
    let sandbox = host.boot().await.unwrap();

    let mut process = sandbox
        .spawn(shell("echo 'npm ERR! missing script: dev' >&2; exit 3"))
        .await
        .unwrap();
    let mut output = process.take_output().unwrap();
    let exit = process.take_exit().unwrap();

    let code = tokio::time::timeout(Duration::from_secs(10), exit)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(code, 3);

    let line = output.recv().await.unwrap();
    assert_eq!(line.stream, LogType::Stderr);
    assert!(line.line.contains("missing script"));
}
