// Copyright (c) 2026 Forge Authors
// SPDX-License-Identifier: Apache-2.0

//! Core library behind the worker orchestration CLI: a persistent store,
//! a worker lifecycle manager, a job scheduler, and a resource-metric
//! sampler, wired together over a shared embedded SQLite database.

pub mod config;
pub mod error;
pub mod lifecycle;
pub mod log_classifier;
pub mod model;
pub mod options;
pub mod platform;
pub mod port;
pub mod runtime_locator;
pub mod sampler;
pub mod scheduler;
pub mod store;

use std::sync::Arc;

pub use error::{ForgeError, Result};

use config::Config;
use lifecycle::WorkerLifecycleManager;
use platform::PlatformProbe;
use runtime_locator::RuntimeLocator;
use sampler::MetricSampler;
use scheduler::JobScheduler;
use store::Store;

/// Owns every component and the store they share. Construct once per
/// process; every component accessor hands back a borrow or a cheap
/// `Arc` clone, not a fresh instance.
pub struct Core {
    pub store: Arc<Store>,
    pub config: Config,
    pub lifecycle: Arc<WorkerLifecycleManager>,
    pub scheduler: Arc<JobScheduler>,
    pub sampler: Arc<MetricSampler>,
}

impl Core {
    pub fn new(config: Config) -> Result<Self> {
        let store = Arc::new(Store::open(&config.storage_path)?);
        Self::with_store(store, config)
    }

    pub fn in_memory(config: Config) -> Result<Self> {
        let store = Arc::new(Store::in_memory()?);
        Self::with_store(store, config)
    }

    fn with_store(store: Arc<Store>, config: Config) -> Result<Self> {
        let platform: Box<dyn PlatformProbe> = platform::current();
        let platform_for_sampler: Box<dyn PlatformProbe> = platform::current();
        let runtime_locator = Arc::new(RuntimeLocator::new(store.clone()));
        let lifecycle = Arc::new(WorkerLifecycleManager::new(
            store.clone(),
            platform,
            runtime_locator,
            config.clone(),
        ));
        let scheduler = Arc::new(JobScheduler::new(store.clone(), config.api_timeout));
        let sampler = Arc::new(MetricSampler::new(store.clone(), platform_for_sampler));

        Ok(Self {
            store,
            config,
            lifecycle,
            scheduler,
            sampler,
        })
    }
}
