// Copyright (c) 2026 Forge Authors
// SPDX-License-Identifier: Apache-2.0

use std::process::Command;

use tracing::warn;

use super::{
    host_metrics_via_sysinfo, wait_for_exit, GpuDevice, GpuInventory, HostMetrics, KillMode,
    PlatformProbe, KILL_GRACE_PERIOD, KILL_POLL_INTERVAL,
};

pub struct LinuxProbe;

/// `nvidia-smi --query-gpu=... --format=csv,noheader,nounits` column
/// order: index, name, temp, fan, power.draw, power.limit, mem.used,
/// mem.total, util. Units are already stripped by `nounits`.
const NVIDIA_SMI_QUERY: &str =
    "index,name,temperature.gpu,fan.speed,power.draw,power.limit,memory.used,memory.total,utilization.gpu";

fn parse_f64(field: &str) -> Option<f64> {
    let field = field.trim();
    if field.is_empty() || field.eq_ignore_ascii_case("n/a") || field == "[N/A]" {
        None
    } else {
        field.parse().ok()
    }
}

fn parse_nvidia_smi_csv(output: &str) -> Vec<GpuDevice> {
    output
        .lines()
        .filter(|l| !l.trim().is_empty())
        .filter_map(|line| {
            let fields: Vec<&str> = line.split(',').map(str::trim).collect();
            if fields.len() < 9 {
                return None;
            }
            Some(GpuDevice {
                index: fields[0].parse().ok()?,
                name: fields[1].to_string(),
                temperature_c: parse_f64(fields[2]),
                fan_speed_pct: parse_f64(fields[3]),
                power_w: parse_f64(fields[4]),
                power_limit_w: parse_f64(fields[5]),
                vram_used_mb: parse_f64(fields[6]),
                vram_total_mb: parse_f64(fields[7]),
                utilization_pct: parse_f64(fields[8]),
            })
        })
        .collect()
}

impl PlatformProbe for LinuxProbe {
    fn gpu_inventory(&self) -> GpuInventory {
        let output = Command::new("nvidia-smi")
            .arg(format!("--query-gpu={NVIDIA_SMI_QUERY}"))
            .arg("--format=csv,noheader,nounits")
            .output();

        match output {
            Ok(out) if out.status.success() => {
                let text = String::from_utf8_lossy(&out.stdout);
                let devices = parse_nvidia_smi_csv(&text);
                GpuInventory {
                    available: !devices.is_empty(),
                    devices,
                }
            }
            Ok(out) => {
                warn!(
                    status = ?out.status,
                    "nvidia-smi exited non-zero, reporting empty GPU inventory"
                );
                GpuInventory::default()
            }
            Err(e) => {
                warn!(error = %e, "nvidia-smi unavailable, reporting empty GPU inventory");
                GpuInventory::default()
            }
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
        match mode {
            KillMode::Graceful => {
                // SAFETY: sending SIGTERM to a pid we own is safe.
                unsafe {
                    libc::kill(pid, libc::SIGTERM);
                }
                let alive = || unsafe { libc::kill(pid, 0) == 0 };
                if wait_for_exit(alive, KILL_GRACE_PERIOD, KILL_POLL_INTERVAL) {
                    return true;
                }
                // Escalate.
                unsafe {
                    libc::kill(pid, libc::SIGKILL);
                }
                wait_for_exit(alive, KILL_GRACE_PERIOD, KILL_POLL_INTERVAL)
            }
            KillMode::Forceful => {
                unsafe {
                    libc::kill(pid, libc::SIGKILL);
                }
                let alive = || unsafe { libc::kill(pid, 0) == 0 };
                wait_for_exit(alive, KILL_GRACE_PERIOD, KILL_POLL_INTERVAL)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_nvidia_smi_csv_with_na_fields() {
        let csv = "0, NVIDIA GeForce RTX 4090, 45, 30, 120.5, 450.0, 2048, 24564, 12\n\
                    1, NVIDIA GeForce RTX 4090, [N/A], [N/A], [N/A], [N/A], 0, 24564, 0";
        let devices = parse_nvidia_smi_csv(csv);
        assert_eq!(devices.len(), 2);
        assert_eq!(devices[0].index, 0);
        assert_eq!(devices[0].vram_total_mb, Some(24564.0));
        assert_eq!(devices[1].temperature_c, None);
    }
}
