// Copyright (c) 2026 Forge Authors
// SPDX-License-Identifier: Apache-2.0

use uuid::Uuid;

/// Domain-level errors surfaced by the Core. These map onto the error
/// kinds a worker/job row's `last_error`/`error` column records; they are
/// not a 1:1 wrapper over library errors.
#[derive(Debug, thiserror::Error)]
pub enum ForgeError {
    #[error("worker {0} not found")]
    WorkerNotFound(Uuid),

    #[error("job {0} not found")]
    JobNotFound(Uuid),

    #[error("invalid state transition: {0}")]
    InvalidState(String),

    #[error("failed to spawn worker process: {0}")]
    SpawnFailure(String),

    #[error("no validated runtime interpreter found under {0}")]
    RuntimeNotFound(String),

    #[error("readiness probe timed out after {0:?}")]
    ProbeTimeout(std::time::Duration),

    #[error("worker reported a fatal log pattern: {0}")]
    WorkerFatal(String),

    #[error("job submission failed: {0}")]
    SubmitFailure(String),

    #[error("platform probe failed: {0}")]
    Platform(String),

    #[error("storage error: {0}")]
    Storage(#[from] rusqlite::Error),
}

pub type Result<T> = std::result::Result<T, ForgeError>;
