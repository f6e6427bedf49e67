//! Promotion protocol.
//!
//! Moves a baseline's promotion level according to the build outcome, then
//! applies the optional recommend and tag side effects. A side effect that
//! fails is reported and leaves the level change in place.

use serde::{Deserialize, Serialize};
use tracing::warn;
use ucm_entities::{EntityRef, PromotionLevel, UcmBackend};

use crate::config::PostBuildConfig;
use crate::error::{PucmError, Result};
use crate::host::{surface, BuildOutcome, JobConsole};
use crate::obs;

/// Tag type written on promoted baselines.
pub const TAG_TYPE: &str = "hudson";

/// Where a failed build moves its baseline.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DemotionPolicy {
    #[default]
    Reject,
    StepDown,
}

impl DemotionPolicy {
    pub fn demote(&self, level: PromotionLevel) -> PromotionLevel {
        match self {
            DemotionPolicy::Reject => PromotionLevel::Rejected,
            DemotionPolicy::StepDown => level.demoted(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PromotionReport {
    pub baseline: EntityRef,
    pub outcome: BuildOutcome,
    pub previous: PromotionLevel,
    pub level: PromotionLevel,
    pub recommended: bool,
    pub tag: Option<EntityRef>,
    /// Failed side effects, in order
    pub side_effect_errors: Vec<String>,
}

impl PromotionReport {
    /// Whether every requested side effect succeeded.
    pub fn is_clean(&self) -> bool {
        self.side_effect_errors.is_empty()
    }
}

/// Identifies the invocation in the tag entries.
#[derive(Debug, Clone, Copy)]
pub struct JobRef<'a> {
    pub job: &'a str,
    pub number: u64,
}

/// Apply `outcome` to `baseline` on `stream`.
///
/// Outcomes other than success and failure are refused before anything is
/// read or written.
pub async fn apply(
    backend: &dyn UcmBackend,
    console: &dyn JobConsole,
    baseline: &EntityRef,
    stream: &EntityRef,
    outcome: BuildOutcome,
    config: &PostBuildConfig,
    job: JobRef<'_>,
) -> Result<PromotionReport> {
    let success = match outcome {
        BuildOutcome::Success => true,
        BuildOutcome::Failure => false,
        other => {
            console.println(&format!(
                "[PUCM] Build result {} is not handled, {} left unchanged",
                other, baseline
            ));
            return Err(PucmError::UnhandledBuildOutcome {
                outcome: other.to_string(),
            });
        }
    };

    let previous = backend
        .promotion_level(baseline)
        .await
        .map_err(|e| surface(console, e))?;
    let level = match (config.promote, success) {
        (false, _) => previous,
        (true, true) => previous.promoted(),
        (true, false) => config.demote.demote(previous),
    };
    if level != previous {
        backend
            .set_promotion_level(baseline, level)
            .await
            .map_err(|e| surface(console, e))?;
    }
    if success {
        console.println(&format!(
            "[PUCM] Baseline {} promoted to {}",
            baseline.short_name(),
            level
        ));
    } else {
        console.println(&format!(
            "[PUCM] Build failed, baseline {} is {}",
            baseline.short_name(),
            level
        ));
    }
    obs::emit_promotion_applied(
        baseline.fqname(),
        outcome.as_str(),
        previous.as_str(),
        level.as_str(),
    );

    let mut report = PromotionReport {
        baseline: baseline.clone(),
        outcome,
        previous,
        level,
        recommended: false,
        tag: None,
        side_effect_errors: Vec::new(),
    };

    if success && config.recommended {
        match backend.recommend(stream, baseline).await {
            Ok(()) => {
                console.println(&format!(
                    "[PUCM] Baseline {} is now recommended",
                    baseline.short_name()
                ));
                report.recommended = true;
            }
            Err(e) => {
                if let Some(out) = e.output() {
                    console.println(out);
                }
                console.println(&format!(
                    "[PUCM] Could not recommend {}",
                    baseline.short_name()
                ));
                warn!(baseline = %baseline, error = %e, "recommend failed");
                report.side_effect_errors.push(format!("recommend: {}", e));
            }
        }
    }

    if config.make_tag {
        match tag_baseline(backend, baseline, outcome, job).await {
            Ok(tag) => report.tag = Some(tag),
            Err(e) => {
                if let Some(out) = e.output() {
                    console.println(out);
                }
                console.println(&format!("[PUCM] Could not tag {}", baseline.short_name()));
                warn!(baseline = %baseline, error = %e, "tagging failed");
                report.side_effect_errors.push(format!("tag: {}", e));
            }
        }
    }

    Ok(report)
}

async fn tag_baseline(
    backend: &dyn UcmBackend,
    baseline: &EntityRef,
    outcome: BuildOutcome,
    job: JobRef<'_>,
) -> ucm_entities::UcmResult<EntityRef> {
    let mut tag = backend.create_tag(baseline, TAG_TYPE, job.job).await?;
    tag.set_entry("buildstatus", outcome.as_str());
    tag.set_entry("job", format!("{}::{}", job.job, job.number));
    backend.persist_tag(&tag).await?;
    Ok(tag.entity)
}
