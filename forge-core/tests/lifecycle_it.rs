// Copyright (c) 2026 Forge Authors
// SPDX-License-Identifier: Apache-2.0

//! End-to-end: spawn a stand-in worker process, bring up a mock HTTP API
//! on its port, and drive it through the launch → ready → stop cycle.

#![cfg(unix)]

use std::io::Write;
use std::os::unix::fs::PermissionsExt;
use std::sync::Arc;

use axum::routing::get;
use axum::Router;
use forge_core::config::Config;
use forge_core::lifecycle::WorkerLifecycleManager;
use forge_core::model::{Worker, WorkerStatus};
use forge_core::options::WorkerOptions;
use forge_core::platform::PlatformProbe;
use forge_core::port::find_available;
use forge_core::runtime_locator::RuntimeLocator;
use forge_core::store::Store;
use uuid::Uuid;

struct NullProbe;

impl PlatformProbe for NullProbe {
    fn gpu_inventory(&self) -> forge_core::platform::GpuInventory {
        Default::default()
    }
    fn host_metrics(&self) -> forge_core::platform::HostMetrics {
        Default::default()
    }
    fn process_alive(&self, pid: i32) -> bool {
        unsafe { libc::kill(pid, 0) == 0 }
    }
    fn kill_process(&self, pid: i32, _mode: forge_core::platform::KillMode) -> bool {
        unsafe {
            libc::kill(pid, libc::SIGKILL);
        }
        true
    }
}

fn write_fake_worker_interpreter(install_path: &std::path::Path) -> std::path::PathBuf {
    let interpreter = install_path.join(".venv").join("bin").join("python3");
    std::fs::create_dir_all(interpreter.parent().unwrap()).unwrap();
    let mut file = std::fs::File::create(&interpreter).unwrap();
    writeln!(file, "#!/bin/sh").unwrap();
    writeln!(file, "if [ \"$1\" = \"--version\" ]; then echo 'Python 3.11.4'; exit 0; fi").unwrap();
    writeln!(file, "echo 'Server running'").unwrap();
    writeln!(file, "sleep 5").unwrap();
    drop(file);
    std::fs::set_permissions(&interpreter, std::fs::Permissions::from_mode(0o755)).unwrap();
    interpreter
}

async fn spawn_mock_worker_api(port: u16) {
    let app = Router::new().route("/system_stats", get(|| async { "ok" }));
    let listener = tokio::net::TcpListener::bind(("127.0.0.1", port)).await.unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
}

#[tokio::test]
async fn launch_then_ready_then_stop() {
    let install_dir = tempfile::tempdir().unwrap();
    write_fake_worker_interpreter(install_dir.path());

    let store = Arc::new(Store::in_memory().unwrap());
    let locator = Arc::new(RuntimeLocator::new(store.clone()));
    let manager = WorkerLifecycleManager::new(
        store.clone(),
        Box::new(NullProbe),
        locator,
        Config::default(),
    );

    let port = find_available(25_000).unwrap();
    let now = chrono::Utc::now().timestamp();
    let worker_id = Uuid::new_v4();
    store
        .insert_worker(&Worker {
            id: worker_id,
            name: "w1".to_string(),
            port,
            device_selector: "cpu".to_string(),
            options: serde_json::json!({}),
            status: WorkerStatus::Stopped,
            pid: None,
            last_error: None,
            created_at: now,
            updated_at: now,
        })
        .unwrap();

    spawn_mock_worker_api(port).await;

    manager
        .launch(worker_id, install_dir.path(), WorkerOptions::default(), None, None)
        .await
        .unwrap();

    let after_launch = store.get_worker(worker_id).unwrap();
    assert_eq!(after_launch.status, WorkerStatus::Starting);
    assert!(after_launch.pid.is_some());

    let readiness = manager.ready(worker_id, Some(20), Some(100)).await.unwrap();
    assert!(readiness.ready);
    assert_eq!(readiness.status, WorkerStatus::Running);

    let logs = manager.logs(worker_id, None);
    assert!(logs.iter().any(|l| l.contains("Server running")));

    let stopped = manager.stop(worker_id).await.unwrap();
    assert!(stopped);
    assert_eq!(store.get_worker(worker_id).unwrap().status, WorkerStatus::Stopped);
}
