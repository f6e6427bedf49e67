//! Atomic counters for one coordinator instance.
//!
//! Counters are incremented silently at the call site. Call
//! [`Metrics::flush`] to emit current values as a single `info!` event.

use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Default)]
pub struct Metrics {
    polls: AtomicU64,
    claims: AtomicU64,
    reclaimed: AtomicU64,
    delivers: AtomicU64,
    delivers_cancelled: AtomicU64,
    promotions: AtomicU64,
}

impl Metrics {
    pub const fn new() -> Self {
        Self {
            polls: AtomicU64::new(0),
            claims: AtomicU64::new(0),
            reclaimed: AtomicU64::new(0),
            delivers: AtomicU64::new(0),
            delivers_cancelled: AtomicU64::new(0),
            promotions: AtomicU64::new(0),
        }
    }

    pub fn inc_polls(&self) {
        self.polls.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "polls", "counter incremented");
    }

    pub fn inc_claims(&self) {
        self.claims.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "claims", "counter incremented");
    }

    pub fn add_reclaimed(&self, n: u64) {
        self.reclaimed.fetch_add(n, Ordering::Relaxed);
    }

    pub fn inc_delivers(&self) {
        self.delivers.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "delivers", "counter incremented");
    }

    pub fn inc_delivers_cancelled(&self) {
        self.delivers_cancelled.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "delivers_cancelled", "counter incremented");
    }

    pub fn inc_promotions(&self) {
        self.promotions.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "promotions", "counter incremented");
    }

    /// Emit all current counter values as a single `info!` event.
    pub fn flush(&self) {
        tracing::info!(
            metric = "flush",
            polls = self.polls(),
            claims = self.claims(),
            reclaimed = self.reclaimed(),
            delivers = self.delivers(),
            delivers_cancelled = self.delivers_cancelled(),
            promotions = self.promotions(),
        );
    }

    pub fn polls(&self) -> u64 {
        self.polls.load(Ordering::Relaxed)
    }

    pub fn claims(&self) -> u64 {
        self.claims.load(Ordering::Relaxed)
    }

    pub fn reclaimed(&self) -> u64 {
        self.reclaimed.load(Ordering::Relaxed)
    }

    pub fn delivers(&self) -> u64 {
        self.delivers.load(Ordering::Relaxed)
    }

    pub fn delivers_cancelled(&self) -> u64 {
        self.delivers_cancelled.load(Ordering::Relaxed)
    }

    pub fn promotions(&self) -> u64 {
        self.promotions.load(Ordering::Relaxed)
    }
}
