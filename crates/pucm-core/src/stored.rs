//! Stored-baseline cache for multi-site consistency.
//!
//! Remembers the last promotion level the engine acted on per baseline. On a
//! replicated site a freshly promoted baseline can still read back at its old
//! level for a while; a mismatch against the stored level marks the read as
//! stale. The window is best-effort and tuned by the job's multi-site
//! interval.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;
use ucm_entities::PromotionLevel;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredBaseline {
    pub fqname: String,
    pub level: PromotionLevel,
    pub observed_at: DateTime<Utc>,
}

impl StoredBaseline {
    pub fn age_at(&self, now: DateTime<Utc>) -> Duration {
        now - self.observed_at
    }
}

#[derive(Debug, Default)]
pub struct StoredBaselines {
    entries: Mutex<HashMap<String, StoredBaseline>>,
}

impl StoredBaselines {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn observe(&self, fqname: &str, level: PromotionLevel) {
        self.observe_at(fqname, level, Utc::now());
    }

    /// Upsert the entry for `fqname` with an explicit timestamp.
    pub fn observe_at(&self, fqname: &str, level: PromotionLevel, now: DateTime<Utc>) {
        let entry = StoredBaseline {
            fqname: fqname.to_string(),
            level,
            observed_at: now,
        };
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(fqname.to_string(), entry);
        debug!(baseline = %fqname, level = %level, "stored baseline observed");
    }

    pub fn lookup(&self, fqname: &str) -> Option<StoredBaseline> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(fqname)
            .cloned()
    }

    pub fn prune(&self, threshold: Duration) -> usize {
        self.prune_at(threshold, Utc::now())
    }

    /// Remove every entry older than `threshold` as of `now`.
    pub fn prune_at(&self, threshold: Duration, now: DateTime<Utc>) -> usize {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        let before = entries.len();
        entries.retain(|_, e| e.age_at(now) <= threshold);
        let removed = before - entries.len();
        if removed > 0 {
            debug!(removed = removed, "pruned stored baselines");
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
