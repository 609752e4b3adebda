// Copyright (c) 2026 Forge Authors
// SPDX-License-Identifier: Apache-2.0

//! Embedded SQLite-backed store for workers, jobs, metric samples, and
//! config entries.
//!
//! A single `rusqlite::Connection` guarded by a `Mutex` backs the whole
//! store — proportionate to a single-host, single-process embedded store;
//! `rusqlite::Connection` itself is `!Sync`; the mutex is what makes
//! `Store` usable from multiple async tasks via `tokio::task::spawn_blocking`
//! callers or, for the short queries here, direct synchronous calls under
//! the lock (queries are all sub-millisecond point lookups/updates, never
//! held across an `.await`).

use std::sync::Mutex;

use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use uuid::Uuid;

use crate::error::{ForgeError, Result};
use crate::model::{ConfigEntry, Job, JobStatus, MetricSample, Worker, WorkerStatus};

const SCHEMA: &str = include_str!("schema.sql");

pub struct Store {
    conn: Mutex<Connection>,
}

fn now() -> i64 {
    Utc::now().timestamp()
}

impl Store {
    pub fn open(path: &str) -> Result<Self> {
        let conn = Connection::open(path)?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    // ---- Worker ------------------------------------------------------

    pub fn insert_worker(&self, worker: &Worker) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO workers (id, name, port, device_selector, options, status, pid, last_error, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                worker.id.to_string(),
                worker.name,
                worker.port,
                worker.device_selector,
                worker.options.to_string(),
                worker.status.as_str(),
                worker.pid,
                worker.last_error,
                worker.created_at,
                worker.updated_at,
            ],
        )?;
        Ok(())
    }

    pub fn get_worker(&self, id: Uuid) -> Result<Worker> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            "SELECT id, name, port, device_selector, options, status, pid, last_error, created_at, updated_at
             FROM workers WHERE id = ?1",
            params![id.to_string()],
            row_to_worker,
        )
        .optional()?
        .ok_or(ForgeError::WorkerNotFound(id))
    }

    pub fn list_workers(&self) -> Result<Vec<Worker>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, name, port, device_selector, options, status, pid, last_error, created_at, updated_at
             FROM workers ORDER BY created_at ASC",
        )?;
        let rows = stmt.query_map([], row_to_worker)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(Into::into)
    }

    pub fn list_workers_with_status(&self, status: WorkerStatus) -> Result<Vec<Worker>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, name, port, device_selector, options, status, pid, last_error, created_at, updated_at
             FROM workers WHERE status = ?1 ORDER BY created_at ASC",
        )?;
        let rows = stmt.query_map(params![status.as_str()], row_to_worker)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(Into::into)
    }

    /// Transition a worker's status, optionally updating `pid`/`last_error`.
    /// No WHERE-clause guard here: unlike jobs, worker status is driven by
    /// a single owner (the Lifecycle Manager's in-memory map), so there is
    /// no concurrent-writer race to guard against at the row level.
    pub fn update_worker_status(
        &self,
        id: Uuid,
        status: WorkerStatus,
        pid: Option<i32>,
        last_error: Option<&str>,
    ) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        let updated = conn.execute(
            "UPDATE workers SET status = ?2, pid = ?3, last_error = ?4, updated_at = ?5 WHERE id = ?1",
            params![id.to_string(), status.as_str(), pid, last_error, now()],
        )?;
        if updated == 0 {
            return Err(ForgeError::WorkerNotFound(id));
        }
        Ok(())
    }

    pub fn set_device_selector(&self, id: Uuid, device_selector: &str) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        let updated = conn.execute(
            "UPDATE workers SET device_selector = ?2, updated_at = ?3 WHERE id = ?1",
            params![id.to_string(), device_selector, now()],
        )?;
        if updated == 0 {
            return Err(ForgeError::WorkerNotFound(id));
        }
        Ok(())
    }

    /// Refuse deletion if any job row referencing this worker is in a
    /// non-terminal state.
    pub fn delete_worker(&self, id: Uuid) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        let non_terminal: i64 = conn.query_row(
            "SELECT COUNT(*) FROM jobs WHERE worker_id = ?1 AND status IN ('pending', 'running')",
            params![id.to_string()],
            |row| row.get(0),
        )?;
        if non_terminal > 0 {
            return Err(ForgeError::InvalidState(format!(
                "worker {id} has {non_terminal} job(s) in a non-terminal state"
            )));
        }
        let deleted = conn.execute("DELETE FROM workers WHERE id = ?1", params![id.to_string()])?;
        if deleted == 0 {
            return Err(ForgeError::WorkerNotFound(id));
        }
        Ok(())
    }

    /// Worker ids that currently have a job bound in `running` status —
    /// used to compute the idle set when dispatching.
    pub fn busy_worker_ids(&self) -> Result<Vec<Uuid>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt =
            conn.prepare("SELECT worker_id FROM jobs WHERE status = 'running' AND worker_id IS NOT NULL")?;
        let rows = stmt.query_map([], |row| {
            let s: String = row.get(0)?;
            Ok(s)
        })?;
        let mut ids = Vec::new();
        for r in rows {
            let s = r?;
            if let Ok(u) = Uuid::parse_str(&s) {
                ids.push(u);
            }
        }
        Ok(ids)
    }

    // ---- Job -----------------------------------------------------------

    pub fn insert_job(&self, job: &Job) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO jobs (id, workflow_data, priority, status, worker_id, output, error, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                job.id.to_string(),
                job.workflow_data.to_string(),
                job.priority,
                job.status.as_str(),
                job.worker_id.map(|u| u.to_string()),
                job.output.as_ref().map(|v| v.to_string()),
                job.error,
                job.created_at,
                job.updated_at,
            ],
        )?;
        Ok(())
    }

    pub fn list_jobs(&self) -> Result<Vec<Job>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, workflow_data, priority, status, worker_id, output, error, created_at, updated_at
             FROM jobs ORDER BY created_at ASC",
        )?;
        let rows = stmt.query_map([], row_to_job)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(Into::into)
    }

    pub fn get_job(&self, id: Uuid) -> Result<Job> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            "SELECT id, workflow_data, priority, status, worker_id, output, error, created_at, updated_at
             FROM jobs WHERE id = ?1",
            params![id.to_string()],
            row_to_job,
        )
        .optional()?
        .ok_or(ForgeError::JobNotFound(id))
    }

    /// The single highest-priority pending job, ties broken oldest-first.
    pub fn top_pending_job(&self) -> Result<Option<Job>> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            "SELECT id, workflow_data, priority, status, worker_id, output, error, created_at, updated_at
             FROM jobs WHERE status = 'pending'
             ORDER BY priority DESC, created_at ASC LIMIT 1",
            [],
            row_to_job,
        )
        .optional()
        .map_err(Into::into)
    }

    /// `pending -> running`, binding `worker_id`. Guarded by a WHERE clause
    /// on the current status so a concurrent dispatch cannot double-bind
    /// the same job; at-most-one-job-per-worker relies on the caller
    /// having already filtered to idle workers.
    pub fn assign_job(&self, id: Uuid, worker_id: Uuid) -> Result<bool> {
        let conn = self.conn.lock().unwrap();
        let updated = conn.execute(
            "UPDATE jobs SET status = 'running', worker_id = ?2, updated_at = ?3
             WHERE id = ?1 AND status = 'pending'",
            params![id.to_string(), worker_id.to_string(), now()],
        )?;
        Ok(updated == 1)
    }

    /// `running -> completed`, storing the worker's response body.
    pub fn complete_job(&self, id: Uuid, output: &serde_json::Value) -> Result<bool> {
        let conn = self.conn.lock().unwrap();
        let updated = conn.execute(
            "UPDATE jobs SET status = 'completed', output = ?2, updated_at = ?3
             WHERE id = ?1 AND status = 'running'",
            params![id.to_string(), output.to_string(), now()],
        )?;
        Ok(updated == 1)
    }

    /// `running -> failed`, storing the error text. The worker itself is
    /// never marked error as a result of a job failing.
    pub fn fail_job(&self, id: Uuid, error: &str) -> Result<bool> {
        let conn = self.conn.lock().unwrap();
        let updated = conn.execute(
            "UPDATE jobs SET status = 'failed', error = ?2, updated_at = ?3
             WHERE id = ?1 AND status = 'running'",
            params![id.to_string(), error, now()],
        )?;
        Ok(updated == 1)
    }

    /// `{pending,running} -> cancelled`. Only valid from non-terminal
    /// statuses.
    pub fn cancel_job(&self, id: Uuid) -> Result<bool> {
        let conn = self.conn.lock().unwrap();
        let updated = conn.execute(
            "UPDATE jobs SET status = 'cancelled', updated_at = ?2
             WHERE id = ?1 AND status IN ('pending', 'running')",
            params![id.to_string(), now()],
        )?;
        Ok(updated == 1)
    }

    // ---- Metric Sample ---------------------------------------------------

    pub fn insert_metric_sample(&self, sample: &MetricSample) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO metric_samples (id, worker_id, timestamp, gpu_index, vram_used_mb, vram_total_mb, gpu_utilization_pct, ram_used_mb, cpu_utilization_pct)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                sample.id.to_string(),
                sample.worker_id.map(|u| u.to_string()),
                sample.timestamp,
                sample.gpu_index,
                sample.vram_used_mb,
                sample.vram_total_mb,
                sample.gpu_utilization_pct,
                sample.ram_used_mb,
                sample.cpu_utilization_pct,
            ],
        )?;
        Ok(())
    }

    pub fn metric_samples_for_worker(&self, worker_id: Uuid) -> Result<Vec<MetricSample>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, worker_id, timestamp, gpu_index, vram_used_mb, vram_total_mb, gpu_utilization_pct, ram_used_mb, cpu_utilization_pct
             FROM metric_samples WHERE worker_id = ?1 ORDER BY timestamp ASC",
        )?;
        let rows = stmt.query_map(params![worker_id.to_string()], row_to_sample)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(Into::into)
    }

    // ---- Config Entry ----------------------------------------------------

    /// Upsert-with-conflict-target semantics: last-writer-wins per key.
    pub fn upsert_config(&self, entry: &ConfigEntry) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO config_entries (key, value, description) VALUES (?1, ?2, ?3)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value, description = excluded.description",
            params![entry.key, entry.value, entry.description],
        )?;
        Ok(())
    }

    pub fn get_config(&self, key: &str) -> Result<Option<ConfigEntry>> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            "SELECT key, value, description FROM config_entries WHERE key = ?1",
            params![key],
            |row| {
                Ok(ConfigEntry {
                    key: row.get(0)?,
                    value: row.get(1)?,
                    description: row.get(2)?,
                })
            },
        )
        .optional()
        .map_err(Into::into)
    }
}

fn row_to_worker(row: &rusqlite::Row) -> rusqlite::Result<Worker> {
    let id: String = row.get(0)?;
    let status: String = row.get(5)?;
    let options: String = row.get(4)?;
    Ok(Worker {
        id: Uuid::parse_str(&id).unwrap_or_default(),
        name: row.get(1)?,
        port: row.get(2)?,
        device_selector: row.get(3)?,
        options: serde_json::from_str(&options).unwrap_or(serde_json::Value::Null),
        status: WorkerStatus::parse(&status).unwrap_or(WorkerStatus::Error),
        pid: row.get(6)?,
        last_error: row.get(7)?,
        created_at: row.get(8)?,
        updated_at: row.get(9)?,
    })
}

fn row_to_job(row: &rusqlite::Row) -> rusqlite::Result<Job> {
    let id: String = row.get(0)?;
    let workflow_data: String = row.get(1)?;
    let status: String = row.get(3)?;
    let worker_id: Option<String> = row.get(4)?;
    let output: Option<String> = row.get(5)?;
    Ok(Job {
        id: Uuid::parse_str(&id).unwrap_or_default(),
        workflow_data: serde_json::from_str(&workflow_data).unwrap_or(serde_json::Value::Null),
        priority: row.get(2)?,
        status: JobStatus::parse(&status).unwrap_or(JobStatus::Failed),
        worker_id: worker_id.and_then(|s| Uuid::parse_str(&s).ok()),
        output: output.and_then(|s| serde_json::from_str(&s).ok()),
        error: row.get(6)?,
        created_at: row.get(7)?,
        updated_at: row.get(8)?,
    })
}

fn row_to_sample(row: &rusqlite::Row) -> rusqlite::Result<MetricSample> {
    let id: String = row.get(0)?;
    let worker_id: Option<String> = row.get(1)?;
    Ok(MetricSample {
        id: Uuid::parse_str(&id).unwrap_or_default(),
        worker_id: worker_id.and_then(|s| Uuid::parse_str(&s).ok()),
        timestamp: row.get(2)?,
        gpu_index: row.get(3)?,
        vram_used_mb: row.get(4)?,
        vram_total_mb: row.get(5)?,
        gpu_utilization_pct: row.get(6)?,
        ram_used_mb: row.get(7)?,
        cpu_utilization_pct: row.get(8)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn new_worker(name: &str, port: u16) -> Worker {
        let ts = now();
        Worker {
            id: Uuid::new_v4(),
            name: name.to_string(),
            port,
            device_selector: "cpu".to_string(),
            options: json!({}),
            status: WorkerStatus::Stopped,
            pid: None,
            last_error: None,
            created_at: ts,
            updated_at: ts,
        }
    }

    fn new_job(priority: i64) -> Job {
        let ts = now();
        Job {
            id: Uuid::new_v4(),
            workflow_data: json!({"prompt": "hi"}),
            priority,
            status: JobStatus::Pending,
            worker_id: None,
            output: None,
            error: None,
            created_at: ts,
            updated_at: ts,
        }
    }

    #[test]
    fn worker_round_trips() {
        let store = Store::in_memory().unwrap();
        let w = new_worker("w1", 8188);
        store.insert_worker(&w).unwrap();
        let fetched = store.get_worker(w.id).unwrap();
        assert_eq!(fetched.name, "w1");
        assert_eq!(fetched.status, WorkerStatus::Stopped);
    }

    #[test]
    fn assign_job_is_guarded_against_double_assignment() {
        let store = Store::in_memory().unwrap();
        let w = new_worker("w1", 8188);
        store.insert_worker(&w).unwrap();
        let j = new_job(0);
        store.insert_job(&j).unwrap();

        assert!(store.assign_job(j.id, w.id).unwrap());
        // Second assignment attempt fails: job is no longer pending.
        assert!(!store.assign_job(j.id, w.id).unwrap());
    }

    #[test]
    fn delete_worker_refuses_with_pending_job() {
        let store = Store::in_memory().unwrap();
        let w = new_worker("w1", 8188);
        store.insert_worker(&w).unwrap();
        let j = new_job(0);
        store.insert_job(&j).unwrap();
        store.assign_job(j.id, w.id).unwrap();

        assert!(store.delete_worker(w.id).is_err());
    }

    #[test]
    fn top_pending_job_orders_by_priority_then_age() {
        let store = Store::in_memory().unwrap();
        let low = new_job(0);
        store.insert_job(&low).unwrap();
        std::thread::sleep(std::time::Duration::from_millis(5));
        let high = new_job(10);
        store.insert_job(&high).unwrap();

        let top = store.top_pending_job().unwrap().unwrap();
        assert_eq!(top.id, high.id);
    }
}
