// Copyright (c) 2026 Forge Authors
// SPDX-License-Identifier: Apache-2.0

//! Job Scheduler: pairs pending jobs with idle running workers and
//! submits their payload over HTTP.

use std::sync::Arc;
use std::time::Duration;

use reqwest::Client;
use tokio::sync::Mutex as AsyncMutex;
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::Result;
use crate::model::{Job, JobStatus};
use crate::store::Store;

pub struct JobScheduler {
    store: Arc<Store>,
    http: Client,
    api_timeout: Duration,
    /// Serializes dispatch passes so two concurrent callers cannot bind
    /// the same idle worker to two different jobs.
    dispatch_lock: AsyncMutex<()>,
}

impl JobScheduler {
    pub fn new(store: Arc<Store>, api_timeout: Duration) -> Self {
        Self {
            store,
            http: Client::new(),
            api_timeout,
            dispatch_lock: AsyncMutex::new(()),
        }
    }

    /// Create a pending job and, if it wasn't pre-bound to a worker,
    /// attempt to dispatch immediately.
    pub async fn enqueue(
        &self,
        workflow_data: serde_json::Value,
        priority: Option<i64>,
        worker_id: Option<Uuid>,
    ) -> Result<Job> {
        let now = chrono::Utc::now().timestamp();
        let job = Job {
            id: Uuid::new_v4(),
            workflow_data,
            priority: priority.unwrap_or(0),
            status: JobStatus::Pending,
            worker_id,
            output: None,
            error: None,
            created_at: now,
            updated_at: now,
        };
        self.store.insert_job(&job)?;

        if worker_id.is_none() {
            self.try_dispatch().await?;
        }

        self.store.get_job(job.id)
    }

    /// Cancel a job from `pending` or `running`. A running job additionally
    /// gets a best-effort interrupt POST to its bound worker.
    pub async fn cancel(&self, job_id: Uuid) -> Result<Job> {
        let job = self.store.get_job(job_id)?;

        if job.status == JobStatus::Running {
            if let Some(worker_id) = job.worker_id {
                if let Ok(worker) = self.store.get_worker(worker_id) {
                    let url = format!("http://127.0.0.1:{}/interrupt", worker.port);
                    let result = self.http.post(&url).timeout(self.api_timeout).send().await;
                    if let Err(e) = result {
                        warn!(worker_id = %worker_id, error = %e, "interrupt POST failed, proceeding with cancellation anyway");
                    }
                }
            }
        }

        if !self.store.cancel_job(job_id)? {
            return Err(crate::error::ForgeError::InvalidState(format!(
                "job {job_id} is {} and cannot be cancelled",
                job.status.as_str()
            )));
        }
        self.store.get_job(job_id)
    }

    /// Run dispatch passes until no pending/idle pair remains. Iterative
    /// rather than recursive so a long queue can't blow the stack.
    pub async fn try_dispatch(&self) -> Result<()> {
        let _guard = self.dispatch_lock.lock().await;
        loop {
            if !self.dispatch_one().await? {
                return Ok(());
            }
        }
    }

    /// A single pairing-and-submission step. Returns true if a pair was
    /// found and processed (regardless of the job's terminal outcome),
    /// signaling the caller to try again.
    async fn dispatch_one(&self) -> Result<bool> {
        let running = self.store.list_workers_with_status(crate::model::WorkerStatus::Running)?;
        if running.is_empty() {
            return Ok(false);
        }
        let busy = self.store.busy_worker_ids()?;
        let idle = running.into_iter().find(|w| !busy.contains(&w.id));
        let Some(worker) = idle else {
            return Ok(false);
        };

        let Some(job) = self.store.top_pending_job()? else {
            return Ok(false);
        };

        if !self.store.assign_job(job.id, worker.id)? {
            // Someone else grabbed it between the read and the guarded
            // update; try the next pass rather than failing the caller.
            return Ok(true);
        }

        self.submit(job.id, worker.id, &job.workflow_data, worker.port).await?;
        Ok(true)
    }

    async fn submit(
        &self,
        job_id: Uuid,
        worker_id: Uuid,
        workflow_data: &serde_json::Value,
        port: u16,
    ) -> Result<()> {
        let url = format!("http://127.0.0.1:{port}/prompt");
        let response = self
            .http
            .post(&url)
            .timeout(self.api_timeout)
            .json(workflow_data)
            .send()
            .await;

        match response {
            Ok(resp) if resp.status().is_success() => {
                let body: serde_json::Value = resp
                    .json()
                    .await
                    .unwrap_or_else(|_| serde_json::Value::Null);
                self.store.complete_job(job_id, &body)?;
                info!(job_id = %job_id, worker_id = %worker_id, "job completed");
            }
            Ok(resp) => {
                let message = format!("worker responded with status {}", resp.status());
                self.store.fail_job(job_id, &message)?;
            }
            Err(e) => {
                self.store.fail_job(job_id, &e.to_string())?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Worker, WorkerStatus};

    fn new_worker(port: u16, status: WorkerStatus) -> Worker {
        let now = chrono::Utc::now().timestamp();
        Worker {
            id: Uuid::new_v4(),
            name: "w".to_string(),
            port,
            device_selector: "cpu".to_string(),
            options: serde_json::json!({}),
            status,
            pid: Some(1),
            last_error: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[tokio::test]
    async fn enqueue_with_no_idle_worker_leaves_job_pending() {
        let store = Arc::new(Store::in_memory().unwrap());
        let scheduler = JobScheduler::new(store.clone(), Duration::from_millis(100));

        let job = scheduler
            .enqueue(serde_json::json!({"prompt": "hi"}), Some(5), None)
            .await
            .unwrap();
        assert_eq!(job.status, JobStatus::Pending);
    }

    #[tokio::test]
    async fn cancel_pending_job_never_assigns_a_worker() {
        let store = Arc::new(Store::in_memory().unwrap());
        let worker = new_worker(9_999, WorkerStatus::Stopped);
        store.insert_worker(&worker).unwrap();
        let scheduler = JobScheduler::new(store.clone(), Duration::from_millis(100));

        let job = scheduler
            .enqueue(serde_json::json!({"prompt": "hi"}), Some(5), None)
            .await
            .unwrap();
        let cancelled = scheduler.cancel(job.id).await.unwrap();
        assert_eq!(cancelled.status, JobStatus::Cancelled);
        assert!(cancelled.worker_id.is_none());
    }

    #[tokio::test]
    async fn cancel_terminal_job_returns_invalid_state() {
        let store = Arc::new(Store::in_memory().unwrap());
        let scheduler = JobScheduler::new(store.clone(), Duration::from_millis(100));

        let job = scheduler
            .enqueue(serde_json::json!({"prompt": "hi"}), Some(5), None)
            .await
            .unwrap();
        scheduler.cancel(job.id).await.unwrap();

        let result = scheduler.cancel(job.id).await;
        assert!(matches!(result, Err(crate::error::ForgeError::InvalidState(_))));
    }

    #[tokio::test]
    async fn dispatch_skips_busy_workers() {
        let store = Arc::new(Store::in_memory().unwrap());
        let busy_worker = new_worker(9_001, WorkerStatus::Running);
        store.insert_worker(&busy_worker).unwrap();
        let running_job = Job {
            id: Uuid::new_v4(),
            workflow_data: serde_json::json!({}),
            priority: 0,
            status: JobStatus::Running,
            worker_id: Some(busy_worker.id),
            output: None,
            error: None,
            created_at: chrono::Utc::now().timestamp(),
            updated_at: chrono::Utc::now().timestamp(),
        };
        store.insert_job(&running_job).unwrap();

        let scheduler = JobScheduler::new(store.clone(), Duration::from_millis(50));
        let dispatched = scheduler.dispatch_one().await.unwrap();
        assert!(!dispatched, "the only running worker is already busy");
    }
}
