// Copyright (c) 2026 Forge Authors
// SPDX-License-Identifier: Apache-2.0

use std::process::Command;

use tracing::warn;

use super::{
    host_metrics_via_sysinfo, wait_for_exit, GpuDevice, GpuInventory, HostMetrics, KillMode,
    PlatformProbe, KILL_GRACE_PERIOD, KILL_POLL_INTERVAL,
};

pub struct MacProbe;

/// Embedded probe script run under the worker's own Python runtime to
/// report CUDA/Metal device availability and names. Utilization and live
/// VRAM are not queryable this way on macOS — the script never prints
/// them, so those fields stay `None` rather than a fabricated zero.
const DEVICE_PROBE_SCRIPT: &str = r#"
import json
devices = []
try:
    import torch
    if torch.cuda.is_available():
        for i in range(torch.cuda.device_count()):
            devices.append({"index": i, "name": torch.cuda.get_device_name(i)})
    elif torch.backends.mps.is_available():
        devices.append({"index": 0, "name": "Apple MPS"})
except Exception:
    pass
print(json.dumps(devices))
"#;

fn run_device_probe(python: &str) -> Vec<GpuDevice> {
    let output = Command::new(python).arg("-c").arg(DEVICE_PROBE_SCRIPT).output();
    let parsed = match output {
        Ok(out) if out.status.success() => {
            serde_json::from_slice::<Vec<serde_json::Value>>(&out.stdout).unwrap_or_default()
        }
        Ok(out) => {
            warn!(status = ?out.status, "macOS device probe script exited non-zero");
            Vec::new()
        }
        Err(e) => {
            warn!(error = %e, "macOS device probe script unavailable");
            Vec::new()
        }
    };

    parsed
        .into_iter()
        .filter_map(|v| {
            Some(GpuDevice {
                index: v.get("index")?.as_i64()?,
                name: v.get("name")?.as_str()?.to_string(),
                vram_used_mb: None,
                vram_total_mb: None,
                utilization_pct: None,
                temperature_c: None,
                fan_speed_pct: None,
                power_w: None,
                power_limit_w: None,
            })
        })
        .collect()
}

impl PlatformProbe for MacProbe {
    fn gpu_inventory(&self) -> GpuInventory {
        let devices = run_device_probe("python3");
        GpuInventory {
            available: !devices.is_empty(),
            devices,
        }
    }

    fn host_metrics(&self) -> HostMetrics {
        host_metrics_via_sysinfo()
    }

    fn process_alive(&self, pid: i32) -> bool {
        if pid <= 0 {
            return false;
        }
        // SAFETY: signal 0 sends no signal, it only checks existence/permission.
        unsafe { libc::kill(pid, 0) == 0 }
    }

    fn kill_process(&self, pid: i32, mode: KillMode) -> bool {
        if pid <= 0 {
            return true;
        }
        let alive = || unsafe { libc::kill(pid, 0) == 0 };
        match mode {
            KillMode::Graceful => {
                unsafe {
                    libc::kill(pid, libc::SIGTERM);
                }
                if wait_for_exit(alive, KILL_GRACE_PERIOD, KILL_POLL_INTERVAL) {
                    return true;
                }
                unsafe {
                    libc::kill(pid, libc::SIGKILL);
                }
                wait_for_exit(alive, KILL_GRACE_PERIOD, KILL_POLL_INTERVAL)
            }
            KillMode::Forceful => {
                unsafe {
                    libc::kill(pid, libc::SIGKILL);
                }
                wait_for_exit(alive, KILL_GRACE_PERIOD, KILL_POLL_INTERVAL)
            }
        }
    }
}
