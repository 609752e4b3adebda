// Copyright (c) 2026 Forge Authors
// SPDX-License-Identifier: Apache-2.0

//! Environment-derived configuration.
//!
//! No config-file format is introduced; everything here is read once at
//! startup with plain `std::env::var` chains, the same minimal style
//! used elsewhere in this codebase for single-value environment knobs.

use std::time::Duration;

fn env_u64(key: &str, default: u64) -> u64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

/// Timeouts and the storage location the Core reads from the process
/// environment.
#[derive(Debug, Clone)]
pub struct Config {
    pub startup_timeout: Duration,
    pub check_interval: Duration,
    pub api_timeout: Duration,
    pub storage_path: String,
}

impl Config {
    pub fn from_env() -> Self {
        Self {
            startup_timeout: Duration::from_millis(env_u64("WORKER_STARTUP_TIMEOUT_MS", 120_000)),
            check_interval: Duration::from_millis(env_u64("WORKER_CHECK_INTERVAL_MS", 3_000)),
            api_timeout: Duration::from_millis(env_u64("WORKER_API_TIMEOUT_MS", 5_000)),
            storage_path: std::env::var("STORAGE_URL").unwrap_or_else(|_| "forge.db".to_string()),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            startup_timeout: Duration::from_millis(120_000),
            check_interval: Duration::from_millis(3_000),
            api_timeout: Duration::from_millis(5_000),
            storage_path: "forge.db".to_string(),
        }
    }
}
