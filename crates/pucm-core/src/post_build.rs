//! Post-build orchestration: deliver, promote, remember, describe, release.
//!
//! A failed deliver ends the post-build early: the job is marked unstable and
//! the baseline keeps its promotion level.

use std::path::Path;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, warn, Instrument};
use ucm_entities::EntityRef;

use crate::config::JobConfig;
use crate::coordinator::Coordinator;
use crate::deliver::{DeliverReport, DeliverRequest, DeliverSession, DeliverState};
use crate::error::{PucmError, Result};
use crate::host::{surface, JobConsole};
use crate::obs;
use crate::promotion::{self, JobRef, PromotionReport};
use crate::registry::BuildStateData;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PostBuildStatus {
    /// Post-build was disabled for the invocation or it had no baseline
    NotPerformed,
    Performed,
}

#[derive(Debug, Clone, Serialize)]
pub struct PostBuildReport {
    pub status: PostBuildStatus,
    pub baseline: Option<EntityRef>,
    pub deliver: Option<DeliverReport>,
    /// Terminal deliver state and message when the deliver failed
    pub deliver_failure: Option<(DeliverState, String)>,
    pub promotion: Option<PromotionReport>,
    /// The job result should be downgraded to unstable
    pub unstable: bool,
    pub description: Option<String>,
}

impl PostBuildReport {
    fn not_performed(baseline: Option<EntityRef>) -> Self {
        Self {
            status: PostBuildStatus::NotPerformed,
            baseline,
            deliver: None,
            deliver_failure: None,
            promotion: None,
            unstable: false,
            description: None,
        }
    }
}

impl Coordinator {
    pub async fn post_build(
        &self,
        job: &str,
        number: u64,
        config: &JobConfig,
        workspace: &Path,
        console: &dyn JobConsole,
    ) -> Result<PostBuildReport> {
        self.post_build_at(job, number, config, workspace, console, Utc::now())
            .await
    }

    /// Run the post-build actions of invocation `number` and release its
    /// record, whatever happened.
    pub async fn post_build_at(
        &self,
        job: &str,
        number: u64,
        config: &JobConfig,
        workspace: &Path,
        console: &dyn JobConsole,
        now: DateTime<Utc>,
    ) -> Result<PostBuildReport> {
        self.post_build_in_span(job, number, config, workspace, console, now)
            .instrument(obs::job_span(job, number))
            .await
    }

    async fn post_build_in_span(
        &self,
        job: &str,
        number: u64,
        config: &JobConfig,
        workspace: &Path,
        console: &dyn JobConsole,
        now: DateTime<Utc>,
    ) -> Result<PostBuildReport> {
        let Some(state) = self.registry().get(job, number).await else {
            debug!("no build state, post-build not performed");
            return Ok(PostBuildReport::not_performed(None));
        };
        let data = state.snapshot();

        let result = match (&data.baseline, data.post_build) {
            (Some(baseline), true) => {
                self.run_post_build(job, number, config, workspace, console, &data, baseline, now)
                    .await
            }
            _ => {
                debug!("post-build disabled or no baseline");
                Ok(PostBuildReport::not_performed(data.baseline.clone()))
            }
        };

        let removed = self.registry().remove(&state).await;
        debug!(removed = removed, "build state released:\n{}", state.describe());
        self.metrics().flush();
        result
    }

    #[allow(clippy::too_many_arguments)]
    async fn run_post_build(
        &self,
        job: &str,
        number: u64,
        config: &JobConfig,
        workspace: &Path,
        console: &dyn JobConsole,
        data: &BuildStateData,
        baseline: &EntityRef,
        now: DateTime<Utc>,
    ) -> Result<PostBuildReport> {
        let mut report = PostBuildReport::not_performed(Some(baseline.clone()));
        report.status = PostBuildStatus::Performed;

        let component = match &data.component {
            Some(c) => c.clone(),
            None => self
                .backend()
                .baseline_component(baseline)
                .await
                .map_err(|e| surface(console, e))?,
        };
        let stream = match &data.stream {
            Some(s) => s.clone(),
            None => self
                .backend()
                .baseline_stream(baseline)
                .await
                .map_err(|e| surface(console, e))?,
        };

        if config.deliver.enabled {
            let host = config.host_name();
            let request = DeliverRequest {
                job,
                number,
                host: &host,
                baseline,
                component: &component,
                workspace,
                load_modules: data.load_modules,
                config: &config.deliver,
            };
            let mut session = DeliverSession::new(self.backend(), console, request);
            self.metrics().inc_delivers();
            match session.run().await {
                Ok(deliver) => report.deliver = Some(deliver),
                Err(err) => {
                    if session.state() == DeliverState::Cancelled {
                        self.metrics().inc_delivers_cancelled();
                    }
                    console.println(&format!("[PUCM] {}", err));
                    warn!(error = %err, state = ?session.state(), "deliver failed");
                    report.deliver_failure = Some((session.state(), err.to_string()));
                    report.unstable = true;
                }
            }
        }

        if report.deliver_failure.is_some() {
            console.println("[PUCM] Could not deliver, promotion level left unchanged");
            if config.post_build.set_description {
                report.description = Some(format!("{}, deliver failed", baseline.short_name()));
            }
            return Ok(report);
        }

        let Some(outcome) = self.host().build_outcome(job, number).await else {
            console.println("[PUCM] Build has no result, promotion level left unchanged");
            return Err(PucmError::UnhandledBuildOutcome {
                outcome: "UNKNOWN".to_string(),
            });
        };
        let promoted = promotion::apply(
            self.backend(),
            console,
            baseline,
            &stream,
            outcome,
            &config.post_build,
            JobRef { job, number },
        )
        .await?;
        self.metrics().inc_promotions();
        if !promoted.is_clean() {
            report.unstable = true;
        }

        if data.multi_site_minutes > 0 {
            self.stored()
                .observe_at(baseline.fqname(), promoted.level, now);
        }

        if config.post_build.set_description {
            report.description = Some(describe_build(&promoted, &report));
            console.println("[PUCM] Description set.");
        }

        report.promotion = Some(promoted);
        Ok(report)
    }
}

fn describe_build(promoted: &PromotionReport, report: &PostBuildReport) -> String {
    let mut text = format!(
        "{} ({} -> {})",
        promoted.baseline.short_name(),
        promoted.previous,
        promoted.level
    );
    if promoted.recommended {
        text.push_str(", recommended");
    }
    if let Some(bl) = report.deliver.as_ref().and_then(|d| d.new_baseline.as_ref()) {
        text.push_str(&format!(", created {}", bl.short_name()));
    }
    text
}
