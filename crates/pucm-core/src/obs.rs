//! Structured observability hooks for job lifecycle events.
//!
//! - `job_span` tags everything logged during one invocation; async entry
//!   points instrument their futures with it
//! - `emit_*` functions log the engine's lifecycle events at `info!`

use tracing::{info, warn};

/// Span tagged with job name and invocation number.
pub fn job_span(job: &str, number: u64) -> tracing::Span {
    tracing::info_span!("pucm.job", job = %job, number = number)
}

/// Emit event: poll finished, with the baseline to build if any.
pub fn emit_poll_finished(job: &str, number: u64, baseline: Option<&str>) {
    info!(
        event = "poll.finished",
        job = %job,
        number = number,
        build_now = baseline.is_some(),
        baseline = baseline.unwrap_or(""),
    );
}

/// Emit event: a baseline was claimed for an invocation.
pub fn emit_baseline_selected(job: &str, number: u64, baseline: &str, candidates: usize) {
    info!(
        event = "baseline.selected",
        job = %job,
        number = number,
        baseline = %baseline,
        candidates = candidates,
    );
}

pub fn emit_registry_reclaimed(removed: usize, remaining: usize) {
    info!(event = "registry.reclaimed", removed = removed, remaining = remaining);
}

/// Emit event: deliver finished; `new_baseline` is empty when none was made.
pub fn emit_deliver_finished(baseline: &str, target: &str, new_baseline: Option<&str>) {
    info!(
        event = "deliver.finished",
        baseline = %baseline,
        target = %target,
        new_baseline = new_baseline.unwrap_or(""),
    );
}

/// Emit event: a conflicting deliver was cancelled (or the cancel failed).
pub fn emit_deliver_cancelled(source: &str, view_root: &str, cancelled: bool) {
    warn!(
        event = "deliver.cancelled",
        source = %source,
        view_root = %view_root,
        cancelled = cancelled,
    );
}

pub fn emit_promotion_applied(baseline: &str, outcome: &str, from: &str, to: &str) {
    info!(
        event = "promotion.applied",
        baseline = %baseline,
        outcome = %outcome,
        from = %from,
        to = %to,
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn job_span_enters() {
        let _span = job_span("nightly", 1).entered();
        emit_poll_finished("nightly", 1, None);
    }
}
