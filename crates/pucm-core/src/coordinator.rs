//! The coordination service.
//!
//! A [`Coordinator`] owns the process-wide shared state (build-state
//! registry, stored-baseline cache, entity cache, counters) and is handed to
//! every job invocation. Construct one at process start.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, Instrument};
use ucm_entities::{EntityCache, EntityKind, EntityRef, UcmBackend};

use crate::config::JobConfig;
use crate::error::{PucmError, Result};
use crate::host::{print_output, surface, JobConsole, JobHost};
use crate::metrics::Metrics;
use crate::obs;
use crate::registry::{BuildState, BuildStates, RegistryView};
use crate::selection::{format_baseline_list, pick_one, SelectionQuery, Selector};
use crate::stored::StoredBaselines;

/// Result of a poll.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", content = "baseline", rename_all = "snake_case")]
pub enum PollOutcome {
    BuildNow(EntityRef),
    NoChanges,
}

pub struct Coordinator {
    backend: Arc<dyn UcmBackend>,
    host: Arc<dyn JobHost>,
    registry: BuildStates,
    stored: StoredBaselines,
    entities: EntityCache,
    metrics: Metrics,
}

impl Coordinator {
    pub fn new(backend: Arc<dyn UcmBackend>, host: Arc<dyn JobHost>) -> Self {
        Self {
            backend,
            host,
            registry: BuildStates::new(),
            stored: StoredBaselines::new(),
            entities: EntityCache::new(),
            metrics: Metrics::new(),
        }
    }

    pub fn backend(&self) -> &dyn UcmBackend {
        self.backend.as_ref()
    }

    pub fn host(&self) -> &dyn JobHost {
        self.host.as_ref()
    }

    pub fn registry(&self) -> &BuildStates {
        &self.registry
    }

    pub fn stored(&self) -> &StoredBaselines {
        &self.stored
    }

    pub fn entities(&self) -> &EntityCache {
        &self.entities
    }

    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    fn selector(&self) -> Selector<'_> {
        Selector {
            backend: self.backend.as_ref(),
            host: self.host.as_ref(),
            stored: &self.stored,
        }
    }

    pub async fn poll(
        &self,
        job: &str,
        number: u64,
        config: &JobConfig,
        console: &dyn JobConsole,
    ) -> Result<PollOutcome> {
        self.poll_at(job, number, config, console, Utc::now()).await
    }

    /// Look for a baseline to build for the upcoming invocation `number`.
    ///
    /// Claims the picked baseline in a record marked as created by the
    /// poller. When nothing is eligible the record is dropped again.
    pub async fn poll_at(
        &self,
        job: &str,
        number: u64,
        config: &JobConfig,
        console: &dyn JobConsole,
        now: DateTime<Utc>,
    ) -> Result<PollOutcome> {
        self.poll_in_span(job, number, config, console, now)
            .instrument(obs::job_span(job, number))
            .await
    }

    async fn poll_in_span(
        &self,
        job: &str,
        number: u64,
        config: &JobConfig,
        console: &dyn JobConsole,
        now: DateTime<Utc>,
    ) -> Result<PollOutcome> {
        self.metrics.inc_polls();

        let stream = self.entities.stream(&config.poll.stream)?;
        let component = self.entities.component(&config.poll.component)?;

        let mut claims = self.registry.lock().await;
        let state = claims.get_or_create(job, number);
        state.update(|d| {
            d.added_by_poller = true;
            d.multi_site_minutes = config.poll.multi_site_frequency_minutes;
            d.level = Some(config.poll.level);
            d.load_modules = config.poll.load_modules;
            d.stream = Some(stream.clone());
            d.component = Some(component.clone());
        });

        let query = SelectionQuery {
            job,
            stream: &stream,
            component: &component,
            min_level: config.poll.level,
            multi_site_minutes: config.poll.multi_site_frequency_minutes,
        };
        let picked = self
            .select_and_claim(&claims, &state, &query, config.poll.newest, now)
            .await;

        match picked {
            Ok(baseline) => {
                obs::emit_poll_finished(job, number, Some(baseline.fqname()));
                Ok(PollOutcome::BuildNow(baseline))
            }
            Err(err) => {
                claims.remove(&state);
                if err.is_no_baselines() {
                    console.println(&format!("[PUCM] {}", err));
                    obs::emit_poll_finished(job, number, None);
                    Ok(PollOutcome::NoChanges)
                } else {
                    print_output(console, &err);
                    Err(err)
                }
            }
        }
    }

    pub async fn checkout(
        &self,
        job: &str,
        number: u64,
        config: &JobConfig,
        explicit_baseline: Option<&str>,
        console: &dyn JobConsole,
    ) -> Result<EntityRef> {
        self.checkout_at(job, number, config, explicit_baseline, console, Utc::now())
            .await
    }

    /// Settle the baseline invocation `number` builds.
    ///
    /// Stale records are reclaimed first. An explicit baseline wins; otherwise
    /// a record created by a poll keeps the poll's choice and any other
    /// record selects now.
    pub async fn checkout_at(
        &self,
        job: &str,
        number: u64,
        config: &JobConfig,
        explicit_baseline: Option<&str>,
        console: &dyn JobConsole,
        now: DateTime<Utc>,
    ) -> Result<EntityRef> {
        self.checkout_in_span(job, number, config, explicit_baseline, console, now)
            .instrument(obs::job_span(job, number))
            .await
    }

    async fn checkout_in_span(
        &self,
        job: &str,
        number: u64,
        config: &JobConfig,
        explicit_baseline: Option<&str>,
        console: &dyn JobConsole,
        now: DateTime<Utc>,
    ) -> Result<EntityRef> {
        let reclaimed = self.registry.reclaim(self.host.as_ref()).await;
        self.metrics.add_reclaimed(reclaimed as u64);

        let mut claims = self.registry.lock().await;
        let state = claims.get_or_create(job, number);
        state.update(|d| {
            d.load_modules = config.poll.load_modules;
            d.multi_site_minutes = config.poll.multi_site_frequency_minutes;
            if d.level.is_none() {
                d.level = Some(config.poll.level);
            }
        });

        let baseline = match explicit_baseline {
            Some(name) => self.checkout_explicit(&state, name, console).await?,
            None if !state.snapshot().added_by_poller => {
                let stream = self.entities.stream(&config.poll.stream)?;
                let component = self.entities.component(&config.poll.component)?;
                state.update(|d| {
                    d.stream = Some(stream.clone());
                    d.component = Some(component.clone());
                });
                let query = SelectionQuery {
                    job,
                    stream: &stream,
                    component: &component,
                    min_level: config.poll.level,
                    multi_site_minutes: config.poll.multi_site_frequency_minutes,
                };
                match self
                    .select_and_claim(&claims, &state, &query, config.poll.newest, now)
                    .await
                {
                    Ok(bl) => bl,
                    Err(err) => {
                        print_output(console, &err);
                        console.println(&format!("[PUCM] {}", err));
                        return Err(err);
                    }
                }
            }
            None => match state.baseline() {
                Some(bl) => bl,
                None => {
                    let err = PucmError::NoBaselines {
                        stream: config.poll.stream.clone(),
                        component: config.poll.component.clone(),
                        level: config.poll.level.to_string(),
                    };
                    console.println(&format!("[PUCM] {}", err));
                    return Err(err);
                }
            },
        };
        drop(claims);

        for line in format_baseline_list(&state.snapshot().candidates) {
            console.println(&format!("[PUCM] {}", line));
        }
        console.println(&format!("[PUCM] Building baseline: {}", baseline));
        debug!("checkout state:\n{}", state.describe());
        Ok(baseline)
    }

    async fn checkout_explicit(
        &self,
        state: &BuildState,
        name: &str,
        console: &dyn JobConsole,
    ) -> Result<EntityRef> {
        let resolved = match EntityRef::parse_as(EntityKind::Baseline, name) {
            Ok(bl) => {
                self.entities
                    .resolve_and_verify(self.backend.as_ref(), bl.fqname())
                    .await
            }
            Err(e) => Err(e),
        };
        let baseline = match resolved {
            Ok(bl) => bl,
            Err(e) => {
                state.update(|d| d.post_build = false);
                console.println(&format!("[PUCM] Could not find baseline {}: {}", name, e));
                return Err(surface(console, e));
            }
        };

        let stream = self
            .backend
            .baseline_stream(&baseline)
            .await
            .map_err(|e| surface(console, e))?;
        let component = self
            .backend
            .baseline_component(&baseline)
            .await
            .map_err(|e| surface(console, e))?;
        state.update(|d| {
            d.baseline = Some(baseline.clone());
            d.stream = Some(stream);
            d.component = Some(component);
            d.candidates = vec![baseline.clone()];
        });
        self.metrics.inc_claims();
        obs::emit_baseline_selected(state.job(), state.number(), baseline.fqname(), 1);
        Ok(baseline)
    }

    /// Select under the registry lock and commit the pick to `state` before
    /// the lock is released.
    async fn select_and_claim(
        &self,
        claims: &RegistryView<'_>,
        state: &BuildState,
        query: &SelectionQuery<'_>,
        newest: bool,
        now: DateTime<Utc>,
    ) -> Result<EntityRef> {
        let candidates = self.selector().select_at(claims, query, now).await?;
        let baseline = pick_one(&candidates, newest)
            .cloned()
            .ok_or_else(|| PucmError::NoBaselines {
                stream: query.stream.fqname().to_string(),
                component: query.component.fqname().to_string(),
                level: query.min_level.to_string(),
            })?;

        let count = candidates.len();
        state.update(|d| {
            d.baseline = Some(baseline.clone());
            d.candidates = candidates;
        });
        self.metrics.inc_claims();
        obs::emit_baseline_selected(query.job, state.number(), baseline.fqname(), count);
        Ok(baseline)
    }
}
