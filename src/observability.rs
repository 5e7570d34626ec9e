use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tracing::{debug, info};

/// Counters for committed workflow transitions
#[derive(Debug, Default)]
pub struct WorkflowMetrics {
    pub commits: AtomicU64,
    pub rollbacks: AtomicU64,
    pub challenges_issued: AtomicU64,
    pub challenges_failed: AtomicU64,
    pub identity_overrides: AtomicU64,
}

impl WorkflowMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_commit(&self) {
        self.commits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_rollback(&self) {
        self.rollbacks.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_challenge_issued(&self) {
        self.challenges_issued.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_challenge_failed(&self) {
        self.challenges_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_identity_override(&self) {
        self.identity_overrides.fetch_add(1, Ordering::Relaxed);
    }

    pub fn get_stats(&self) -> WorkflowStats {
        WorkflowStats {
            commits: self.commits.load(Ordering::Relaxed),
            rollbacks: self.rollbacks.load(Ordering::Relaxed),
            challenges_issued: self.challenges_issued.load(Ordering::Relaxed),
            challenges_failed: self.challenges_failed.load(Ordering::Relaxed),
            identity_overrides: self.identity_overrides.load(Ordering::Relaxed),
        }
    }

    pub fn log_stats(&self) {
        let stats = self.get_stats();
        info!(
            "Workflow metrics: commits={}, rollbacks={}, challenges_issued={}, challenges_failed={}, overrides={}",
            stats.commits,
            stats.rollbacks,
            stats.challenges_issued,
            stats.challenges_failed,
            stats.identity_overrides
        );
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkflowStats {
    pub commits: u64,
    pub rollbacks: u64,
    pub challenges_issued: u64,
    pub challenges_failed: u64,
    pub identity_overrides: u64,
}

/// Time an operation and log how long it took
pub struct OperationTimer {
    operation: &'static str,
    start: Instant,
}

impl OperationTimer {
    pub fn new(operation: &'static str) -> Self {
        Self {
            operation,
            start: Instant::now(),
        }
    }

    pub fn finish(self) {
        debug!(
            operation = self.operation,
            duration_ms = self.start.elapsed().as_millis() as u64,
            "Operation completed"
        );
    }
}
