// Copyright (c) 2026 Forge Authors
// SPDX-License-Identifier: Apache-2.0

//! End-to-end: a running worker picks up the top-priority pending job and
//! the worker's response lands in the job's output.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::Json;
use axum::routing::post;
use axum::Router;
use forge_core::model::{Worker, WorkerStatus};
use forge_core::port::find_available;
use forge_core::scheduler::JobScheduler;
use forge_core::store::Store;
use uuid::Uuid;

async fn spawn_mock_prompt_endpoint(port: u16) {
    let app = Router::new().route(
        "/prompt",
        post(|Json(body): Json<serde_json::Value>| async move {
            Json(serde_json::json!({"echo": body}))
        }),
    );
    let listener = tokio::net::TcpListener::bind(("127.0.0.1", port)).await.unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
}

fn insert_running_worker(store: &Store, port: u16) -> Uuid {
    let now = chrono::Utc::now().timestamp();
    let id = Uuid::new_v4();
    store
        .insert_worker(&Worker {
            id,
            name: "w1".to_string(),
            port,
            device_selector: "cpu".to_string(),
            options: serde_json::json!({}),
            status: WorkerStatus::Running,
            pid: Some(1),
            last_error: None,
            created_at: now,
            updated_at: now,
        })
        .unwrap();
    id
}

#[tokio::test]
async fn enqueue_onto_idle_worker_completes_the_job() {
    let store = Arc::new(Store::in_memory().unwrap());
    let port = find_available(26_000).unwrap();
    insert_running_worker(&store, port);
    spawn_mock_prompt_endpoint(port).await;

    let scheduler = JobScheduler::new(store.clone(), Duration::from_secs(2));
    let job = scheduler
        .enqueue(serde_json::json!({"prompt": "hello"}), Some(3), None)
        .await
        .unwrap();

    let fetched = store.get_job(job.id).unwrap();
    assert_eq!(fetched.status, forge_core::model::JobStatus::Completed);
    assert!(fetched.output.is_some());
}

#[tokio::test]
async fn highest_priority_job_is_dispatched_first() {
    let store = Arc::new(Store::in_memory().unwrap());
    let port = find_available(26_100).unwrap();
    spawn_mock_prompt_endpoint(port).await;

    let worker_id = insert_running_worker(&store, port);
    let scheduler = JobScheduler::new(store.clone(), Duration::from_secs(2));

    let pending_high = forge_core::model::Job {
        id: Uuid::new_v4(),
        workflow_data: serde_json::json!({"tag": "high"}),
        priority: 9,
        status: forge_core::model::JobStatus::Pending,
        worker_id: None,
        output: None,
        error: None,
        created_at: chrono::Utc::now().timestamp(),
        updated_at: chrono::Utc::now().timestamp(),
    };
    let pending_low = forge_core::model::Job {
        id: Uuid::new_v4(),
        priority: 1,
        ..pending_high.clone()
    };
    store.insert_job(&pending_low).unwrap();
    store.insert_job(&pending_high).unwrap();

    scheduler.try_dispatch().await.unwrap();

    let high_after = store.get_job(pending_high.id).unwrap();
    let low_after = store.get_job(pending_low.id).unwrap();
    assert_eq!(high_after.status, forge_core::model::JobStatus::Completed);
    assert_eq!(low_after.status, forge_core::model::JobStatus::Pending);
    assert_eq!(high_after.worker_id, Some(worker_id));
}
