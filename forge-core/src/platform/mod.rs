// Copyright (c) 2026 Forge Authors
// SPDX-License-Identifier: Apache-2.0

//! OS-neutral GPU inventory, host metrics, process-alive, and
//! kill-process queries, behind one trait with a platform implementation
//! selected once at startup.

use std::time::Duration;

#[cfg(target_os = "linux")]
mod linux;
#[cfg(target_os = "macos")]
mod macos;
#[cfg(target_os = "windows")]
mod windows;

/// A single GPU device as reported by the inventory probe. Fields the
/// platform cannot determine are `None`, never a fabricated zero — the
/// schema must distinguish "unknown" from "idle".
#[derive(Debug, Clone, PartialEq)]
pub struct GpuDevice {
    pub index: i64,
    pub name: String,
    pub vram_used_mb: Option<f64>,
    pub vram_total_mb: Option<f64>,
    pub utilization_pct: Option<f64>,
    pub temperature_c: Option<f64>,
    pub fan_speed_pct: Option<f64>,
    pub power_w: Option<f64>,
    pub power_limit_w: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct GpuInventory {
    pub available: bool,
    pub devices: Vec<GpuDevice>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct HostMetrics {
    pub cpu_pct: f64,
    pub ram_used_mb: f64,
    pub ram_total_mb: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KillMode {
    Graceful,
    Forceful,
}

/// Platform-neutral contract; one implementation per OS, chosen once at
/// process start via [`PlatformProbe::current`].
pub trait PlatformProbe: Send + Sync {
    fn gpu_inventory(&self) -> GpuInventory;
    fn host_metrics(&self) -> HostMetrics;
    fn process_alive(&self, pid: i32) -> bool;
    fn kill_process(&self, pid: i32, mode: KillMode) -> bool;
}

/// Poll interval used while escalating from a graceful to a forceful
/// kill.
pub const KILL_POLL_INTERVAL: Duration = Duration::from_millis(500);
/// Total grace period before escalating to a forceful signal.
pub const KILL_GRACE_PERIOD: Duration = Duration::from_secs(5);

/// Poll `process_alive` until it returns false or the grace period
/// elapses. Shared by every platform's `kill_process(.., Graceful)` path.
pub fn wait_for_exit<F: Fn() -> bool>(alive: F, timeout: Duration, interval: Duration) -> bool {
    let deadline = std::time::Instant::now() + timeout;
    loop {
        if !alive() {
            return true;
        }
        if std::time::Instant::now() >= deadline {
            return false;
        }
        std::thread::sleep(interval);
    }
}

/// Host CPU/RAM sampling shared across all three platform implementations
/// via `sysinfo` — the OS-specific pieces of the Platform Probe are only
/// the GPU inventory and kill/alive primitives.
#[cfg(any(target_os = "linux", target_os = "macos", target_os = "windows"))]
pub(crate) fn host_metrics_via_sysinfo() -> HostMetrics {
    use sysinfo::System;

    let mut sys = System::new();
    sys.refresh_cpu_usage();
    // A single sample reads 0% CPU usage on some platforms; sysinfo's own
    // docs recommend a short refresh gap for a meaningful delta.
    std::thread::sleep(sysinfo::MINIMUM_CPU_UPDATE_INTERVAL);
    sys.refresh_cpu_usage();
    sys.refresh_memory();

    let cpu_pct = if sys.cpus().is_empty() {
        0.0
    } else {
        sys.cpus().iter().map(|c| c.cpu_usage() as f64).sum::<f64>() / sys.cpus().len() as f64
    };

    HostMetrics {
        cpu_pct,
        ram_used_mb: sys.used_memory() as f64 / (1024.0 * 1024.0),
        ram_total_mb: sys.total_memory() as f64 / (1024.0 * 1024.0),
    }
}

#[cfg(target_os = "linux")]
pub fn current() -> Box<dyn PlatformProbe> {
    Box::new(linux::LinuxProbe)
}

#[cfg(target_os = "macos")]
pub fn current() -> Box<dyn PlatformProbe> {
    Box::new(macos::MacProbe)
}

#[cfg(target_os = "windows")]
pub fn current() -> Box<dyn PlatformProbe> {
    Box::new(windows::WindowsProbe)
}

#[cfg(not(any(target_os = "linux", target_os = "macos", target_os = "windows")))]
pub fn current() -> Box<dyn PlatformProbe> {
    compile_error!("forge-core requires target_os in {linux, macos, windows}");
}
