// Copyright (c) 2026 Forge Authors
// SPDX-License-Identifier: Apache-2.0

//! Worker Lifecycle Manager: spawns, tracks, and tears down worker child
//! processes, and polls them for readiness.

mod process;

pub use process::{WorkerHandle, WorkerSnapshot};

use std::path::Path;
use std::process::Stdio;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use reqwest::Client;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::config::Config;
use crate::error::{ForgeError, Result};
use crate::log_classifier::{self, LogCategory};
use crate::model::{Worker, WorkerStatus};
use crate::options::WorkerOptions;
use crate::platform::{KillMode, PlatformProbe};
use crate::runtime_locator::RuntimeLocator;
use crate::store::Store;

/// Per-line callback invoked for every stdout/stderr line a worker emits.
pub type LogCallback = Arc<dyn Fn(&str) + Send + Sync>;

const API_PROBE_PATHS: &[&str] = &["/system_stats", "/prompt", "/"];

/// Readiness poll outcome.
#[derive(Debug, Clone, PartialEq)]
pub struct Readiness {
    pub ready: bool,
    pub status: WorkerStatus,
}

pub struct WorkerLifecycleManager {
    store: Arc<Store>,
    platform: Box<dyn PlatformProbe>,
    runtime_locator: Arc<RuntimeLocator>,
    config: Config,
    http: Client,
    handles: DashMap<Uuid, Arc<WorkerHandle>>,
}

impl WorkerLifecycleManager {
    pub fn new(
        store: Arc<Store>,
        platform: Box<dyn PlatformProbe>,
        runtime_locator: Arc<RuntimeLocator>,
        config: Config,
    ) -> Self {
        let http = Client::builder()
            .build()
            .expect("reqwest client with default TLS backend must build");
        Self {
            store,
            platform,
            runtime_locator,
            config,
            http,
            handles: DashMap::new(),
        }
    }

    fn handle_for(&self, worker_id: Uuid) -> Arc<WorkerHandle> {
        self.handles
            .entry(worker_id)
            .or_insert_with(|| Arc::new(WorkerHandle::default()))
            .clone()
    }

    /// Spawn and track a worker's child process, resolving the runtime
    /// interpreter, building its argv, and attaching log readers.
    pub async fn launch(
        &self,
        worker_id: Uuid,
        install_path: &Path,
        mut options: WorkerOptions,
        on_stdout: Option<LogCallback>,
        on_stderr: Option<LogCallback>,
    ) -> Result<Worker> {
        let worker = self.store.get_worker(worker_id)?;
        options.port = Some(worker.port);
        let device_selector = options.device_selector();

        let interpreter = self.runtime_locator.locate(install_path)?;
        let handle = self.handle_for(worker_id);
        handle.reset();

        let mut command = Command::new(&interpreter);
        command
            .arg("main.py")
            .args(options.build_args())
            .current_dir(install_path)
            .envs(options.env_vars())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let mut child = match command.spawn() {
            Ok(child) => child,
            Err(e) => {
                let message = format!("failed to spawn worker process: {e}");
                self.store.update_worker_status(
                    worker_id,
                    WorkerStatus::Error,
                    None,
                    Some(&message),
                )?;
                return Err(ForgeError::SpawnFailure(message));
            }
        };

        let pid = child.id().map(|p| p as i32);
        *handle.pid.lock().unwrap() = pid;
        *handle.start_time.lock().unwrap() = Some(Instant::now());

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();

        if let Some(stdout) = stdout {
            spawn_reader(stdout, handle.clone(), false, on_stdout);
        }
        if let Some(stderr) = stderr {
            spawn_reader(stderr, handle.clone(), true, on_stderr);
        }

        *handle.child.lock().unwrap() = Some(child);
        spawn_exit_watcher(self.store.clone(), handle.clone(), worker_id);

        self.store.update_worker_status(worker_id, WorkerStatus::Starting, pid, None)?;
        self.store.set_device_selector(worker_id, &device_selector)?;

        self.store.get_worker(worker_id)
    }

    /// Terminate a worker's process, if any, and mark it stopped. Returns
    /// true iff the OS confirms the process is no longer alive.
    pub async fn stop(&self, worker_id: Uuid) -> Result<bool> {
        let worker = self.store.get_worker(worker_id)?;
        let pid = worker.pid.ok_or_else(|| {
            ForgeError::InvalidState(format!("worker {worker_id} has no known pid"))
        })?;

        let handle = self.handle_for(worker_id);
        handle.stopping.store(true, Ordering::SeqCst);

        let confirmed = self.platform.kill_process(pid, KillMode::Graceful);

        // Belt-and-braces: if we still own a live child handle, kill it
        // too rather than trusting the OS-level signal alone.
        if let Some(mut child) = handle.child.lock().unwrap().take() {
            let _ = child.start_kill();
        }

        self.store
            .update_worker_status(worker_id, WorkerStatus::Stopped, None, None)?;
        handle.reset();
        Ok(confirmed)
    }

    /// Poll a worker for readiness: status checks, liveness, the HTTP API
    /// probe, and a scan of accumulated error lines for known-fatal
    /// patterns.
    pub async fn ready(
        &self,
        worker_id: Uuid,
        attempts: Option<u32>,
        interval_ms: Option<u64>,
    ) -> Result<Readiness> {
        let effective_attempts = attempts.unwrap_or_else(|| {
            let total = self.config.startup_timeout.as_millis() as u64;
            let step = self.config.check_interval.as_millis().max(1) as u64;
            ((total + step - 1) / step).max(1) as u32
        });
        let interval = interval_ms
            .map(Duration::from_millis)
            .unwrap_or(self.config.check_interval);

        let worker = self.store.get_worker(worker_id)?;
        let handle = self.handle_for(worker_id);

        for _ in 0..effective_attempts {
            let worker = self.store.get_worker(worker_id)?;
            if matches!(worker.status, WorkerStatus::Stopped | WorkerStatus::Error) {
                return Ok(Readiness {
                    ready: false,
                    status: worker.status,
                });
            }

            if let Some(pid) = worker.pid {
                if !self.platform.process_alive(pid) {
                    self.store.update_worker_status(
                        worker_id,
                        WorkerStatus::Error,
                        worker.pid,
                        Some("Process not running"),
                    )?;
                    return Ok(Readiness {
                        ready: false,
                        status: WorkerStatus::Error,
                    });
                }
            }

            if self.probe_api(worker.port).await {
                self.store.update_worker_status(
                    worker_id,
                    WorkerStatus::Running,
                    worker.pid,
                    None,
                )?;
                return Ok(Readiness {
                    ready: true,
                    status: WorkerStatus::Running,
                });
            }

            if handle.logs.snapshot(None).iter().any(|l| log_classifier::is_fatal(l)) {
                self.store.update_worker_status(
                    worker_id,
                    WorkerStatus::Error,
                    worker.pid,
                    Some("worker reported a fatal log pattern"),
                )?;
                return Ok(Readiness {
                    ready: false,
                    status: WorkerStatus::Error,
                });
            }

            tokio::time::sleep(interval).await;
        }

        let still_alive = worker
            .pid
            .map(|pid| self.platform.process_alive(pid))
            .unwrap_or(false);
        let final_status = self.store.get_worker(worker_id)?.status;
        if still_alive {
            Ok(Readiness {
                ready: false,
                status: final_status,
            })
        } else {
            self.store
                .update_worker_status(worker_id, WorkerStatus::Error, None, Some("readiness probe timed out"))?;
            Ok(Readiness {
                ready: false,
                status: WorkerStatus::Error,
            })
        }
    }

    async fn probe_api(&self, port: u16) -> bool {
        for path in API_PROBE_PATHS {
            let url = format!("http://127.0.0.1:{port}{path}");
            let response = self
                .http
                .get(&url)
                .timeout(self.config.api_timeout)
                .send()
                .await;
            match response {
                Ok(r) if r.status().is_success() => return true,
                Ok(_) => continue,
                Err(e) => {
                    warn!(url = %url, error = %e, "worker API probe failed");
                    continue;
                }
            }
        }
        false
    }

    pub fn get(&self, worker_id: Uuid) -> Option<WorkerSnapshot> {
        self.handles.get(&worker_id).map(|h| WorkerSnapshot {
            pid: *h.pid.lock().unwrap(),
            log_count: h.logs.len(),
            warning_count: h.warnings.len(),
            error_count: h.errors.len(),
        })
    }

    pub fn get_all(&self) -> Vec<(Uuid, WorkerSnapshot)> {
        self.handles
            .iter()
            .map(|entry| {
                let h = entry.value();
                (
                    *entry.key(),
                    WorkerSnapshot {
                        pid: *h.pid.lock().unwrap(),
                        log_count: h.logs.len(),
                        warning_count: h.warnings.len(),
                        error_count: h.errors.len(),
                    },
                )
            })
            .collect()
    }

    pub fn logs(&self, worker_id: Uuid, limit: Option<usize>) -> Vec<String> {
        self.handles
            .get(&worker_id)
            .map(|h| h.logs.snapshot(limit))
            .unwrap_or_default()
    }

    pub fn errors(&self, worker_id: Uuid) -> Vec<String> {
        self.handles
            .get(&worker_id)
            .map(|h| h.errors.snapshot(None))
            .unwrap_or_default()
    }

    pub fn warnings(&self, worker_id: Uuid) -> Vec<String> {
        self.handles
            .get(&worker_id)
            .map(|h| h.warnings.snapshot(None))
            .unwrap_or_default()
    }
}

fn spawn_reader<R>(
    reader: R,
    handle: Arc<WorkerHandle>,
    is_stderr: bool,
    callback: Option<LogCallback>,
) where
    R: tokio::io::AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut lines = BufReader::new(reader).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => {
                    handle.logs.push(line.clone());
                    match log_classifier::classify(&line) {
                        LogCategory::Error => handle.errors.push(line.clone()),
                        LogCategory::Warning => handle.warnings.push(line.clone()),
                        _ => {}
                    }
                    if let Some(cb) = &callback {
                        cb(&line);
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    warn!(stderr = is_stderr, error = %e, "worker log reader failed");
                    break;
                }
            }
        }
    });
}

fn spawn_exit_watcher(store: Arc<Store>, handle: Arc<WorkerHandle>, worker_id: Uuid) {
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(Duration::from_millis(200)).await;
            let exit_status = {
                let mut guard = handle.child.lock().unwrap();
                match guard.as_mut() {
                    Some(child) => match child.try_wait() {
                        Ok(status) => status,
                        Err(e) => {
                            error!(worker_id = %worker_id, error = %e, "failed to poll worker exit status");
                            None
                        }
                    },
                    // Already taken by `stop()`; nothing left to watch.
                    None => return,
                }
            };

            if let Some(status) = exit_status {
                if handle.is_stopping() {
                    return;
                }
                let result = if status.success() {
                    store.update_worker_status(worker_id, WorkerStatus::Stopped, None, None)
                } else {
                    #[cfg(unix)]
                    let signaled = {
                        use std::os::unix::process::ExitStatusExt;
                        status.signal().is_some()
                    };
                    #[cfg(not(unix))]
                    let signaled = false;

                    if signaled {
                        store.update_worker_status(worker_id, WorkerStatus::Stopped, None, None)
                    } else {
                        let message = format!(
                            "Process exited with code {}",
                            status.code().unwrap_or(-1)
                        );
                        store.update_worker_status(
                            worker_id,
                            WorkerStatus::Error,
                            None,
                            Some(&message),
                        )
                    }
                };
                if let Err(e) = result {
                    error!(worker_id = %worker_id, error = %e, "failed to record worker exit");
                } else {
                    info!(worker_id = %worker_id, "worker process exited");
                }
                return;
            }
        }
    });
}
