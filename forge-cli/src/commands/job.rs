// Copyright (c) 2026 Forge Authors
// SPDX-License-Identifier: Apache-2.0

use anyhow::Result;
use forge_core::Core;
use uuid::Uuid;

pub async fn enqueue(
    core: &Core,
    workflow_data: String,
    priority: Option<i64>,
    worker_id: Option<Uuid>,
) -> Result<()> {
    let data: serde_json::Value = serde_json::from_str(&workflow_data)?;
    let job = core.scheduler.enqueue(data, priority, worker_id).await?;
    println!("{}", job.id);
    Ok(())
}

pub async fn cancel(core: &Core, job_id: Uuid) -> Result<()> {
    let job = core.scheduler.cancel(job_id).await?;
    println!("status: {}", job.status.as_str());
    Ok(())
}

pub fn list(core: &Core) -> Result<()> {
    for job in core.store.list_jobs()? {
        println!(
            "{}  priority={:<4} {:<10} worker={}",
            job.id,
            job.priority,
            job.status.as_str(),
            job.worker_id.map(|w| w.to_string()).unwrap_or_else(|| "-".to_string()),
        );
    }
    Ok(())
}
