// Copyright (c) 2026 Forge Authors
// SPDX-License-Identifier: Apache-2.0

use std::path::PathBuf;

use anyhow::Result;
use forge_core::model::{Worker, WorkerStatus};
use forge_core::options::WorkerOptions;
use forge_core::port::find_available;
use forge_core::Core;
use uuid::Uuid;

pub async fn start(
    core: &Core,
    name: String,
    install_path: PathBuf,
    port: Option<u16>,
    raw_flags: Vec<String>,
) -> Result<()> {
    let options = WorkerOptions::parse_args(&raw_flags);
    let port = match port {
        Some(p) => p,
        None => find_available(8188)?,
    };

    let now = chrono::Utc::now().timestamp();
    let worker_id = Uuid::new_v4();
    core.store.insert_worker(&Worker {
        id: worker_id,
        name,
        port,
        device_selector: options.device_selector(),
        options: serde_json::to_value(&options)?,
        status: WorkerStatus::Stopped,
        pid: None,
        last_error: None,
        created_at: now,
        updated_at: now,
    })?;

    core.lifecycle
        .launch(worker_id, &install_path, options, None, None)
        .await?;

    println!("{worker_id}");
    Ok(())
}

pub async fn stop(core: &Core, worker_id: Uuid) -> Result<()> {
    let stopped = core.lifecycle.stop(worker_id).await?;
    println!("stopped: {stopped}");
    Ok(())
}

pub async fn ready(
    core: &Core,
    worker_id: Uuid,
    attempts: Option<u32>,
    interval_ms: Option<u64>,
) -> Result<()> {
    let readiness = core.lifecycle.ready(worker_id, attempts, interval_ms).await?;
    println!("{}", serde_json::to_string_pretty(&serde_json::json!({
        "ready": readiness.ready,
        "status": readiness.status.as_str(),
    }))?);
    Ok(())
}

pub fn list(core: &Core) -> Result<()> {
    for worker in core.store.list_workers()? {
        println!(
            "{}  {:<20} {:<8} {:<8} port={}",
            worker.id,
            worker.name,
            worker.status.as_str(),
            worker.device_selector,
            worker.port,
        );
    }
    Ok(())
}

pub fn logs(core: &Core, worker_id: Uuid, limit: Option<usize>) -> Result<()> {
    for line in core.lifecycle.logs(worker_id, limit) {
        println!("{line}");
    }
    Ok(())
}
