// Copyright (c) 2026 Forge Authors
// SPDX-License-Identifier: Apache-2.0

//! Resource-Metric Sampler: periodically snapshots host and per-GPU
//! metrics for every running worker.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::warn;
use uuid::Uuid;

use crate::model::{MetricSample, WorkerStatus};
use crate::platform::PlatformProbe;
use crate::store::Store;

pub struct MetricSampler {
    store: Arc<Store>,
    platform: Box<dyn PlatformProbe>,
}

/// A running sampler timer. Dropping this without calling `stop` leaves
/// the background task running; `stop` is the documented way to end it.
pub struct SamplerHandle {
    token: CancellationToken,
    task: JoinHandle<()>,
}

impl MetricSampler {
    pub fn new(store: Arc<Store>, platform: Box<dyn PlatformProbe>) -> Self {
        Self { store, platform }
    }

    /// Load every running worker, parse its device selector, and append
    /// one metric row per matching GPU index. Never panics on a missing
    /// or malformed inventory — a failed tick is logged and skipped.
    pub fn record_all(&self) {
        let workers = match self.store.list_workers_with_status(WorkerStatus::Running) {
            Ok(w) => w,
            Err(e) => {
                warn!(error = %e, "metric sampler failed to list running workers");
                return;
            }
        };
        if workers.is_empty() {
            return;
        }

        let inventory = self.platform.gpu_inventory();
        let host = self.platform.host_metrics();
        let timestamp = chrono::Utc::now().timestamp();

        for worker in workers {
            let indices: Vec<i64> = worker
                .device_selector
                .split(',')
                .filter_map(|token| token.trim().parse::<i64>().ok())
                .collect();

            for index in indices {
                let Some(device) = inventory.devices.iter().find(|d| d.index == index) else {
                    continue;
                };
                let sample = MetricSample {
                    id: Uuid::new_v4(),
                    worker_id: Some(worker.id),
                    timestamp,
                    gpu_index: Some(index),
                    vram_used_mb: device.vram_used_mb,
                    vram_total_mb: device.vram_total_mb,
                    gpu_utilization_pct: device.utilization_pct,
                    ram_used_mb: Some(host.ram_used_mb),
                    cpu_utilization_pct: Some(host.cpu_pct),
                };
                if let Err(e) = self.store.insert_metric_sample(&sample) {
                    warn!(worker_id = %worker.id, error = %e, "failed to persist metric sample");
                }
            }
        }
    }

    /// Start a background timer calling `record_all` every `interval_ms`.
    pub fn start(self: &Arc<Self>, interval_ms: u64) -> SamplerHandle {
        let token = CancellationToken::new();
        let child_token = token.clone();
        let sampler = self.clone();

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_millis(interval_ms));
            loop {
                tokio::select! {
                    _ = child_token.cancelled() => return,
                    _ = ticker.tick() => sampler.record_all(),
                }
            }
        });

        SamplerHandle { token, task }
    }

    /// Stop a previously started timer. Idempotent: stopping an
    /// already-cancelled handle is a no-op, not a panic.
    pub async fn stop(&self, handle: SamplerHandle) {
        handle.token.cancel();
        let _ = handle.task.await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Worker;
    use crate::platform::{GpuDevice, GpuInventory, HostMetrics};

    struct FakeProbe;

    impl PlatformProbe for FakeProbe {
        fn gpu_inventory(&self) -> GpuInventory {
            GpuInventory {
                available: true,
                devices: vec![GpuDevice {
                    index: 0,
                    name: "Fake GPU".to_string(),
                    vram_used_mb: Some(1024.0),
                    vram_total_mb: Some(8192.0),
                    utilization_pct: Some(42.0),
                    temperature_c: Some(60.0),
                    fan_speed_pct: Some(50.0),
                    power_w: Some(120.0),
                    power_limit_w: Some(250.0),
                }],
            }
        }
        fn host_metrics(&self) -> HostMetrics {
            HostMetrics {
                cpu_pct: 12.5,
                ram_used_mb: 4096.0,
                ram_total_mb: 16384.0,
            }
        }
        fn process_alive(&self, _pid: i32) -> bool {
            true
        }
        fn kill_process(&self, _pid: i32, _mode: crate::platform::KillMode) -> bool {
            true
        }
    }

    fn running_worker(device_selector: &str) -> Worker {
        let now = chrono::Utc::now().timestamp();
        Worker {
            id: Uuid::new_v4(),
            name: "w".to_string(),
            port: 1234,
            device_selector: device_selector.to_string(),
            options: serde_json::json!({}),
            status: WorkerStatus::Running,
            pid: Some(1),
            last_error: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn record_all_writes_one_sample_per_matching_gpu_index() {
        let store = Arc::new(Store::in_memory().unwrap());
        let worker = running_worker("0");
        store.insert_worker(&worker).unwrap();

        let sampler = MetricSampler::new(store.clone(), Box::new(FakeProbe));
        sampler.record_all();

        let samples = store.metric_samples_for_worker(worker.id).unwrap();
        assert_eq!(samples.len(), 1);
        assert_eq!(samples[0].gpu_index, Some(0));
        assert_eq!(samples[0].vram_used_mb, Some(1024.0));
    }

    #[test]
    fn non_integer_device_selector_is_skipped_without_error() {
        let store = Arc::new(Store::in_memory().unwrap());
        let worker = running_worker("cpu");
        store.insert_worker(&worker).unwrap();

        let sampler = MetricSampler::new(store.clone(), Box::new(FakeProbe));
        sampler.record_all();

        let samples = store.metric_samples_for_worker(worker.id).unwrap();
        assert!(samples.is_empty());
    }

    #[tokio::test]
    async fn stop_is_idempotent_after_cancel() {
        let store = Arc::new(Store::in_memory().unwrap());
        let sampler = Arc::new(MetricSampler::new(store, Box::new(FakeProbe)));
        let handle = sampler.start(10_000);
        handle.token.cancel();
        sampler.stop(handle).await;
    }
}
