//! In-memory job host and console (testing and simulation only)

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;

use crate::host::{BuildOutcome, JobConsole, JobHost};

// ---------------------------------------------------------------------------
// FakeJobHost
// ---------------------------------------------------------------------------

/// Job host whose active invocations and outcomes are set by hand.
#[derive(Debug, Default)]
pub struct FakeJobHost {
    active: Mutex<HashSet<(String, u64)>>,
    outcomes: Mutex<HashMap<(String, u64), BuildOutcome>>,
    liveness_queries: AtomicUsize,
}

impl FakeJobHost {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn start(&self, job: &str, number: u64) {
        self.active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert((job.to_string(), number));
    }

    /// Mark an invocation as no longer running, recording its outcome.
    pub fn finish(&self, job: &str, number: u64, outcome: BuildOutcome) {
        self.active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&(job.to_string(), number));
        self.set_outcome(job, number, outcome);
    }

    pub fn stop(&self, job: &str, number: u64) {
        self.active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&(job.to_string(), number));
    }

    pub fn set_outcome(&self, job: &str, number: u64, outcome: BuildOutcome) {
        self.outcomes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert((job.to_string(), number), outcome);
    }

    pub fn liveness_queries(&self) -> usize {
        self.liveness_queries.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl JobHost for FakeJobHost {
    async fn is_active(&self, job: &str, number: u64) -> bool {
        self.liveness_queries.fetch_add(1, Ordering::Relaxed);
        self.active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(&(job.to_string(), number))
    }

    async fn build_outcome(&self, job: &str, number: u64) -> Option<BuildOutcome> {
        self.outcomes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&(job.to_string(), number))
            .copied()
    }
}

// ---------------------------------------------------------------------------
// MemoryConsole
// ---------------------------------------------------------------------------

/// Console that keeps every printed line.
#[derive(Debug, Default)]
pub struct MemoryConsole {
    lines: Mutex<Vec<String>>,
}

impl MemoryConsole {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lines(&self) -> Vec<String> {
        self.lines
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Whether any printed line contains `needle`.
    pub fn contains(&self, needle: &str) -> bool {
        self.lines
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .any(|l| l.contains(needle))
    }
}

impl JobConsole for MemoryConsole {
    fn println(&self, line: &str) {
        self.lines
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(line.to_string());
    }
}
