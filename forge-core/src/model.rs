// Copyright (c) 2026 Forge Authors
// SPDX-License-Identifier: Apache-2.0

//! Persisted entities: Worker, Job, Metric Sample, Config Entry.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// `status` column of the `workers` table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerStatus {
    Stopped,
    Starting,
    Running,
    Error,
}

impl WorkerStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkerStatus::Stopped => "stopped",
            WorkerStatus::Starting => "starting",
            WorkerStatus::Running => "running",
            WorkerStatus::Error => "error",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "stopped" => Some(WorkerStatus::Stopped),
            "starting" => Some(WorkerStatus::Starting),
            "running" => Some(WorkerStatus::Running),
            "error" => Some(WorkerStatus::Error),
            _ => None,
        }
    }
}

/// `status` column of the `jobs` table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(JobStatus::Pending),
            "running" => Some(JobStatus::Running),
            "completed" => Some(JobStatus::Completed),
            "failed" => Some(JobStatus::Failed),
            "cancelled" => Some(JobStatus::Cancelled),
            _ => None,
        }
    }

    /// Terminal statuses cannot transition further.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Worker {
    pub id: Uuid,
    pub name: String,
    pub port: u16,
    /// Comma-separated integer GPU indices, or "cpu", or "mps".
    pub device_selector: String,
    /// Opaque JSON of worker flags (the `WorkerOptions` record, serialized).
    pub options: serde_json::Value,
    pub status: WorkerStatus,
    pub pid: Option<i32>,
    pub last_error: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: Uuid,
    pub workflow_data: serde_json::Value,
    pub priority: i64,
    pub status: JobStatus,
    pub worker_id: Option<Uuid>,
    pub output: Option<serde_json::Value>,
    pub error: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricSample {
    pub id: Uuid,
    pub worker_id: Option<Uuid>,
    pub timestamp: i64,
    pub gpu_index: Option<i64>,
    pub vram_used_mb: Option<f64>,
    pub vram_total_mb: Option<f64>,
    pub gpu_utilization_pct: Option<f64>,
    pub ram_used_mb: Option<f64>,
    pub cpu_utilization_pct: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigEntry {
    pub key: String,
    pub value: String,
    pub description: Option<String>,
}

/// Fixed config-store key under which the runtime locator's resolved
/// interpreter path is persisted.
pub const CONFIG_KEY_RUNTIME_PATH: &str = "RUNTIME_PATH";
/// Fixed config-store key for the worker install path override.
pub const CONFIG_KEY_WORKER_INSTALL_PATH: &str = "WORKER_INSTALL_PATH";
