//! Execution counters for `get_execution_stats`.
use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

use crate::sandbox::{ExecutionResult, Outcome};

#[derive(Debug, Default)]
pub struct ExecutionStats {
    requests: AtomicU64,
    successes: AtomicU64,
    timeouts: AtomicU64,
    memory_violations: AtomicU64,
    capability_violations: AtomicU64,
    runtime_errors: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    pub requests: u64,
    pub successes: u64,
    pub timeouts: u64,
    pub memory_violations: u64,
    pub capability_violations: u64,
    pub runtime_errors: u64,
}

impl ExecutionStats {
    pub fn record(&self, result: &ExecutionResult) {
        self.requests.fetch_add(1, Ordering::Relaxed);
        let counter = match result.outcome {
            Outcome::Success => &self.successes,
            Outcome::TimedOut => &self.timeouts,
            Outcome::MemoryExceeded => &self.memory_violations,
            Outcome::CapabilityViolation => &self.capability_violations,
            Outcome::RuntimeError => &self.runtime_errors,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            requests: self.requests.load(Ordering::Relaxed),
            successes: self.successes.load(Ordering::Relaxed),
            timeouts: self.timeouts.load(Ordering::Relaxed),
            memory_violations: self.memory_violations.load(Ordering::Relaxed),
            capability_violations: self.capability_violations.load(Ordering::Relaxed),
            runtime_errors: self.runtime_errors.load(Ordering::Relaxed),
        }
    }
}
