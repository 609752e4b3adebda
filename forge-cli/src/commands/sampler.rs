// Copyright (c) 2026 Forge Authors
// SPDX-License-Identifier: Apache-2.0

use anyhow::Result;
use forge_core::Core;

/// Run one sampling tick immediately and exit.
pub fn tick(core: &Core) -> Result<()> {
    core.sampler.record_all();
    Ok(())
}

/// Run the sampler timer in the foreground until interrupted.
pub async fn watch(core: &Core, interval_ms: u64) -> Result<()> {
    let handle = core.sampler.start(interval_ms);
    tokio::signal::ctrl_c().await?;
    core.sampler.stop(handle).await;
    Ok(())
}
