//! Candidate-baseline selection.
//!
//! Lists the baselines of a component on a stream at or above a level,
//! oldest first, then drops the ones another live invocation of the same
//! job is building and, with multi-site checking on, the ones whose level
//! disagrees with the stored-baseline cache.

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, info};
use ucm_entities::{EntityRef, PromotionLevel, UcmBackend};

use crate::error::{PucmError, Result};
use crate::host::JobHost;
use crate::registry::RegistryView;
use crate::stored::StoredBaselines;

/// Lists longer than this are abbreviated by [`format_baseline_list`].
pub const FULL_LIST_LIMIT: usize = 20;

/// What to select for.
#[derive(Debug, Clone, Copy)]
pub struct SelectionQuery<'a> {
    pub job: &'a str,
    pub stream: &'a EntityRef,
    pub component: &'a EntityRef,
    pub min_level: PromotionLevel,
    /// 0 disables the multi-site filter
    pub multi_site_minutes: u64,
}

impl SelectionQuery<'_> {
    fn multi_site_window(&self) -> Option<Duration> {
        if self.multi_site_minutes == 0 {
            return None;
        }
        let minutes = i64::try_from(self.multi_site_minutes).ok()?;
        Duration::try_minutes(minutes)
    }

    fn no_baselines(&self) -> PucmError {
        PucmError::NoBaselines {
            stream: self.stream.fqname().to_string(),
            component: self.component.fqname().to_string(),
            level: self.min_level.to_string(),
        }
    }
}

/// Collaborators selection reads from.
#[derive(Clone, Copy)]
pub struct Selector<'a> {
    pub backend: &'a dyn UcmBackend,
    pub host: &'a dyn JobHost,
    pub stored: &'a StoredBaselines,
}

impl Selector<'_> {
    pub async fn select(
        &self,
        claims: &RegistryView<'_>,
        query: &SelectionQuery<'_>,
    ) -> Result<Vec<EntityRef>> {
        self.select_at(claims, query, Utc::now()).await
    }

    /// Eligible baselines, oldest first, as of `now`.
    ///
    /// Fails with [`PucmError::NoBaselines`] when the backend lists nothing
    /// or when every listed baseline is filtered out.
    pub async fn select_at(
        &self,
        claims: &RegistryView<'_>,
        query: &SelectionQuery<'_>,
        now: DateTime<Utc>,
    ) -> Result<Vec<EntityRef>> {
        let window = query.multi_site_window();
        if let Some(window) = window {
            self.stored.prune_at(window, now);
        }

        let listed = self
            .backend
            .baselines(query.component, query.stream, query.min_level)
            .await?;
        if listed.is_empty() {
            return Err(query.no_baselines());
        }

        let mut eligible = Vec::with_capacity(listed.len());
        for baseline in listed {
            if let Some(claim) = claims.find_by_baseline(query.job, baseline.fqname()) {
                if self.host.is_active(query.job, claim.number()).await {
                    debug!(
                        baseline = %baseline,
                        claimed_by = claim.number(),
                        "baseline is being built, skipping"
                    );
                    continue;
                }
                debug!(baseline = %baseline, claimed_by = claim.number(), "stale claim ignored");
            }

            if window.is_some() {
                if let Some(entry) = self.stored.lookup(baseline.fqname()) {
                    let current = self.backend.promotion_level(&baseline).await?;
                    if current != entry.level {
                        info!(
                            baseline = %baseline,
                            stored = %entry.level,
                            current = %current,
                            "stale replica read, skipping baseline"
                        );
                        continue;
                    }
                }
            }

            eligible.push(baseline);
        }

        if eligible.is_empty() {
            return Err(query.no_baselines());
        }
        Ok(eligible)
    }
}

/// The baseline to build: the newest (last) or the oldest (first).
///
/// `None` on an empty list means nothing to build.
pub fn pick_one(baselines: &[EntityRef], prefer_newest: bool) -> Option<&EntityRef> {
    if prefer_newest {
        baselines.last()
    } else {
        baselines.first()
    }
}

/// Console lines listing `baselines` by short name.
pub fn format_baseline_list(baselines: &[EntityRef]) -> Vec<String> {
    let mut lines = vec![format!("Retrieved {} baseline(s):", baselines.len())];
    let line = |b: &EntityRef| format!("+ {}", b.short_name());

    if baselines.len() <= FULL_LIST_LIMIT {
        lines.extend(baselines.iter().map(line));
    } else {
        let n = baselines.len();
        lines.extend(baselines[..3].iter().map(line));
        lines.push(format!("...({} baselines not shown)...", n - 6));
        lines.extend(baselines[n - 3..].iter().map(line));
    }
    lines
}

#[cfg(test)]
mod tests {
    use super::*;

    fn baselines(n: usize) -> Vec<EntityRef> {
        (1..=n)
            .map(|i| EntityRef::parse(&format!(r"baseline:BL{}@\PVOB1", i)).unwrap())
            .collect()
    }

    #[test]
    fn pick_one_prefers_oldest_by_default() {
        let bls = baselines(3);
        assert_eq!(pick_one(&bls, false).unwrap().short_name(), "BL1");
        assert_eq!(pick_one(&bls, true).unwrap().short_name(), "BL3");
        assert!(pick_one(&[], true).is_none());
    }

    #[test]
    fn short_lists_are_printed_in_full() {
        let lines = format_baseline_list(&baselines(20));
        assert_eq!(lines.len(), 21);
        assert_eq!(lines[1], "+ BL1");
        assert_eq!(lines[20], "+ BL20");
    }

    #[test]
    fn long_lists_are_abbreviated() {
        let lines = format_baseline_list(&baselines(25));
        assert_eq!(
            &lines[1..],
            &[
                "+ BL1",
                "+ BL2",
                "+ BL3",
                "...(19 baselines not shown)...",
                "+ BL23",
                "+ BL24",
                "+ BL25",
            ]
        );
    }
}
