// Copyright (c) 2026 Forge Authors
// SPDX-License-Identifier: Apache-2.0

//! In-memory runtime state for a single worker: the owned child-process
//! handle plus its bounded log buffers. Mirrors the RAII-guard shape the
//! pack's process-supervision examples use — the child handle lives
//! behind a plain mutex, polled with `try_wait` rather than an
//! `.await`-holding `wait()`, so `stop()` can always take the lock to
//! perform its belt-and-braces kill.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Instant;

use tokio::process::Child;

/// Cap on each log buffer so a long-lived worker cannot grow memory
/// without bound.
pub const LOG_BUFFER_CAPACITY: usize = 2_000;

#[derive(Debug, Default)]
pub struct LogBuffer {
    lines: Mutex<VecDeque<String>>,
}

impl LogBuffer {
    pub fn push(&self, line: String) {
        let mut lines = self.lines.lock().unwrap();
        if lines.len() >= LOG_BUFFER_CAPACITY {
            lines.pop_front();
        }
        lines.push_back(line);
    }

    pub fn snapshot(&self, limit: Option<usize>) -> Vec<String> {
        let lines = self.lines.lock().unwrap();
        match limit {
            Some(n) if n < lines.len() => lines.iter().skip(lines.len() - n).cloned().collect(),
            _ => lines.iter().cloned().collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.lines.lock().unwrap().len()
    }
}

/// Owns the child process handle and the three log buffers for one
/// worker. Held exclusively by the lifecycle manager's map entry —
/// external callers only ever see snapshots produced from here.
pub struct WorkerHandle {
    pub child: Mutex<Option<Child>>,
    pub pid: Mutex<Option<i32>>,
    pub start_time: Mutex<Option<Instant>>,
    pub logs: LogBuffer,
    pub warnings: LogBuffer,
    pub errors: LogBuffer,
    /// Set by `stop()` before killing the child, so the background
    /// wait-loop knows an exit was requested rather than a crash.
    pub stopping: AtomicBool,
}

impl Default for WorkerHandle {
    fn default() -> Self {
        Self {
            child: Mutex::new(None),
            pid: Mutex::new(None),
            start_time: Mutex::new(None),
            logs: LogBuffer::default(),
            warnings: LogBuffer::default(),
            errors: LogBuffer::default(),
            stopping: AtomicBool::new(false),
        }
    }
}

impl WorkerHandle {
    pub fn reset(&self) {
        *self.child.lock().unwrap() = None;
        *self.pid.lock().unwrap() = None;
        *self.start_time.lock().unwrap() = None;
        self.stopping.store(false, Ordering::SeqCst);
    }

    pub fn is_stopping(&self) -> bool {
        self.stopping.load(Ordering::SeqCst)
    }
}

/// Immutable snapshot of a worker's runtime state, safe to hand to
/// external callers.
#[derive(Debug, Clone)]
pub struct WorkerSnapshot {
    pub pid: Option<i32>,
    pub log_count: usize,
    pub warning_count: usize,
    pub error_count: usize,
}
