// Copyright (c) 2026 Forge Authors
// SPDX-License-Identifier: Apache-2.0

use std::process::Command;

use tracing::warn;
use windows_sys::Win32::Foundation::{CloseHandle, FALSE};
use windows_sys::Win32::System::Threading::{
    GetExitCodeProcess, OpenProcess, TerminateProcess, PROCESS_QUERY_LIMITED_INFORMATION,
    PROCESS_TERMINATE, STILL_ACTIVE,
};

use super::{
    host_metrics_via_sysinfo, wait_for_exit, GpuDevice, GpuInventory, HostMetrics, KillMode,
    PlatformProbe, KILL_GRACE_PERIOD, KILL_POLL_INTERVAL,
};

pub struct WindowsProbe;

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

/// Fallback when no NVIDIA toolchain is present: a WMI video-controller
/// query, from which only `name` and `vram_total` are reliably available.
fn query_wmi_video_controllers() -> Vec<GpuDevice> {
    let output = Command::new("powershell")
        .args([
            "-NoProfile",
            "-Command",
            "Get-CimInstance Win32_VideoController | Select-Object Name,AdapterRAM | ConvertTo-Json",
        ])
        .output();

    let json = match output {
        Ok(out) if out.status.success() => out.stdout,
        Ok(out) => {
            warn!(status = ?out.status, "WMI video-controller query exited non-zero");
            return Vec::new();
        }
        Err(e) => {
            warn!(error = %e, "WMI video-controller query unavailable");
            return Vec::new();
        }
    };

    let value: serde_json::Value = match serde_json::from_slice(&json) {
        Ok(v) => v,
        Err(_) => return Vec::new(),
    };
    // PowerShell's ConvertTo-Json emits an object (not an array) when
    // there's exactly one result.
    let entries: Vec<serde_json::Value> = match value {
        serde_json::Value::Array(a) => a,
        obj @ serde_json::Value::Object(_) => vec![obj],
        _ => Vec::new(),
    };

    entries
        .into_iter()
        .enumerate()
        .filter_map(|(i, v)| {
            let name = v.get("Name")?.as_str()?.to_string();
            let vram_total_mb = v
                .get("AdapterRAM")
                .and_then(|r| r.as_f64())
                .map(|bytes| bytes / (1024.0 * 1024.0));
            Some(GpuDevice {
                index: i as i64,
                name,
                vram_used_mb: None,
                vram_total_mb,
                utilization_pct: None,
                temperature_c: None,
                fan_speed_pct: None,
                power_w: None,
                power_limit_w: None,
            })
        })
        .collect()
}

impl PlatformProbe for WindowsProbe {
    fn gpu_inventory(&self) -> GpuInventory {
        let nvidia = Command::new("nvidia-smi")
            .arg(format!("--query-gpu={NVIDIA_SMI_QUERY}"))
            .arg("--format=csv,noheader,nounits")
            .output();

        let devices = match nvidia {
            Ok(out) if out.status.success() => {
                parse_nvidia_smi_csv(&String::from_utf8_lossy(&out.stdout))
            }
            _ => query_wmi_video_controllers(),
        };

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
        unsafe {
            let handle = OpenProcess(PROCESS_QUERY_LIMITED_INFORMATION, FALSE, pid as u32);
            if handle.is_null() {
                return false;
            }
            let mut exit_code: u32 = 0;
            let ok = GetExitCodeProcess(handle, &mut exit_code);
            CloseHandle(handle);
            ok != 0 && exit_code == STILL_ACTIVE as u32
        }
    }

    fn kill_process(&self, pid: i32, mode: KillMode) -> bool {
        if pid <= 0 {
            return true;
        }
        let alive = || self.process_alive(pid);
        match mode {
            KillMode::Graceful => {
                // Best-effort polite request: taskkill without /F sends
                // WM_CLOSE to the process's windows, if any.
                let _ = Command::new("taskkill")
                    .args(["/PID", &pid.to_string(), "/T"])
                    .output();
                if wait_for_exit(alive, KILL_GRACE_PERIOD, KILL_POLL_INTERVAL) {
                    return true;
                }
                force_kill(pid);
                wait_for_exit(alive, KILL_GRACE_PERIOD, KILL_POLL_INTERVAL)
            }
            KillMode::Forceful => {
                force_kill(pid);
                wait_for_exit(alive, KILL_GRACE_PERIOD, KILL_POLL_INTERVAL)
            }
        }
    }
}

/// Invokes the tree-kill force command directly, falling back to a
/// direct `TerminateProcess` if `taskkill` itself isn't on PATH.
fn force_kill(pid: i32) {
    let status = Command::new("taskkill")
        .args(["/PID", &pid.to_string(), "/T", "/F"])
        .status();
    if status.map(|s| s.success()).unwrap_or(false) {
        return;
    }
    unsafe {
        let handle = OpenProcess(PROCESS_TERMINATE, FALSE, pid as u32);
        if !handle.is_null() {
            TerminateProcess(handle, 1);
            CloseHandle(handle);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_nvidia_smi_csv() {
        let csv = "0, NVIDIA GeForce RTX 4090, 45, 30, 120.5, 450.0, 2048, 24564, 12";
        let devices = parse_nvidia_smi_csv(csv);
        assert_eq!(devices.len(), 1);
        assert_eq!(devices[0].name, "NVIDIA GeForce RTX 4090");
    }
}
