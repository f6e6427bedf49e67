//! Build-state registry.
//!
//! One [`BuildState`] per (job name, invocation number). The table sits
//! behind a tokio mutex so a caller can keep it locked across job-host
//! liveness queries: [`BuildStates::lock`] hands out a [`RegistryView`] used
//! by the reclaim pass and by selection to check claims and commit a new one
//! without another invocation slipping in between.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Utc};
use tokio::sync::MutexGuard;
use tracing::{debug, warn};
use ucm_entities::{EntityRef, LoadModules, PromotionLevel};
use uuid::Uuid;

use crate::host::JobHost;
use crate::obs;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct BuildKey {
    job: String,
    number: u64,
}

/// Mutable coordination fields of a record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildStateData {
    pub baseline: Option<EntityRef>,
    pub stream: Option<EntityRef>,
    pub component: Option<EntityRef>,
    /// Candidates as observed during selection
    pub candidates: Vec<EntityRef>,
    pub level: Option<PromotionLevel>,
    pub load_modules: LoadModules,
    /// 0 disables the multi-site check
    pub multi_site_minutes: u64,
    pub added_by_poller: bool,
    pub post_build: bool,
}

impl Default for BuildStateData {
    fn default() -> Self {
        Self {
            baseline: None,
            stream: None,
            component: None,
            candidates: Vec::new(),
            level: None,
            load_modules: LoadModules::default(),
            multi_site_minutes: 0,
            added_by_poller: false,
            post_build: true,
        }
    }
}

/// Coordination record of one job invocation.
#[derive(Debug)]
pub struct BuildState {
    record_id: Uuid,
    job: String,
    number: u64,
    created_at: DateTime<Utc>,
    data: Mutex<BuildStateData>,
}

impl BuildState {
    fn new(job: &str, number: u64) -> Self {
        Self {
            record_id: Uuid::new_v4(),
            job: job.to_string(),
            number,
            created_at: Utc::now(),
            data: Mutex::new(BuildStateData::default()),
        }
    }

    pub fn record_id(&self) -> Uuid {
        self.record_id
    }

    pub fn job(&self) -> &str {
        &self.job
    }

    pub fn number(&self) -> u64 {
        self.number
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Copy of the current fields.
    pub fn snapshot(&self) -> BuildStateData {
        self.data
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Mutate the fields under the record's lock.
    pub fn update<R>(&self, f: impl FnOnce(&mut BuildStateData) -> R) -> R {
        let mut data = self.data.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut data)
    }

    pub fn baseline(&self) -> Option<EntityRef> {
        self.data
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .baseline
            .clone()
    }

    pub fn describe(&self) -> String {
        fn name(e: &Option<EntityRef>) -> &str {
            e.as_ref().map(|e| e.fqname()).unwrap_or("N/A")
        }

        let d = self.snapshot();
        let multi_site = if d.multi_site_minutes > 0 {
            format!("{} minutes", d.multi_site_minutes)
        } else {
            "N/A".to_string()
        };
        let mut out = String::new();
        out.push_str(&format!("Job name      : {}\n", self.job));
        out.push_str(&format!("Job number    : {}\n", self.number));
        out.push_str(&format!("Component     : {}\n", name(&d.component)));
        out.push_str(&format!("Stream        : {}\n", name(&d.stream)));
        out.push_str(&format!("Baseline      : {}\n", name(&d.baseline)));
        out.push_str(&format!(
            "Plevel        : {}\n",
            d.level.map(|l| l.as_str()).unwrap_or("N/A")
        ));
        out.push_str(&format!("Load module   : {}\n", d.load_modules));
        out.push_str(&format!("Added by poll : {}\n", d.added_by_poller));
        out.push_str(&format!("Multi site    : {}\n", multi_site));
        out.push_str(&format!("Post build    : {}\n", d.post_build));
        out
    }
}

/// Process-wide table of build states.
#[derive(Debug, Default)]
pub struct BuildStates {
    records: tokio::sync::Mutex<HashMap<BuildKey, Arc<BuildState>>>,
}

/// Exclusive access to the registry table.
pub struct RegistryView<'a> {
    records: MutexGuard<'a, HashMap<BuildKey, Arc<BuildState>>>,
}

impl RegistryView<'_> {
    pub fn get(&self, job: &str, number: u64) -> Option<Arc<BuildState>> {
        self.records.get(&key(job, number)).cloned()
    }

    pub fn get_or_create(&mut self, job: &str, number: u64) -> Arc<BuildState> {
        self.records
            .entry(key(job, number))
            .or_insert_with(|| {
                debug!(job = %job, number = number, "build state created");
                Arc::new(BuildState::new(job, number))
            })
            .clone()
    }

    /// The record of `job` that claims `baseline`, if any.
    pub fn find_by_baseline(&self, job: &str, baseline: &str) -> Option<Arc<BuildState>> {
        self.records
            .values()
            .find(|s| {
                s.job == job && s.baseline().map_or(false, |b| b.fqname() == baseline)
            })
            .cloned()
    }

    /// Remove `state` by identity. Returns whether it was present.
    pub fn remove(&mut self, state: &BuildState) -> bool {
        let k = key(&state.job, state.number);
        match self.records.get(&k) {
            Some(current) if current.record_id == state.record_id => {
                self.records.remove(&k);
                true
            }
            _ => false,
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

impl BuildStates {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn lock(&self) -> RegistryView<'_> {
        RegistryView {
            records: self.records.lock().await,
        }
    }

    pub async fn get(&self, job: &str, number: u64) -> Option<Arc<BuildState>> {
        self.lock().await.get(job, number)
    }

    pub async fn get_or_create(&self, job: &str, number: u64) -> Arc<BuildState> {
        self.lock().await.get_or_create(job, number)
    }

    pub async fn find_by_baseline(&self, job: &str, baseline: &str) -> Option<Arc<BuildState>> {
        self.lock().await.find_by_baseline(job, baseline)
    }

    pub async fn remove(&self, state: &BuildState) -> bool {
        self.lock().await.remove(state)
    }

    /// Drop every record whose invocation the host reports as inactive.
    ///
    /// Works on a copy of the table taken under the lock and removes by
    /// identity afterwards, so a record replaced meanwhile is left alone.
    pub async fn reclaim(&self, host: &dyn JobHost) -> usize {
        let mut view = self.lock().await;
        let snapshot: Vec<Arc<BuildState>> = view.records.values().cloned().collect();

        let mut inactive = Vec::new();
        for state in snapshot {
            if !host.is_active(&state.job, state.number).await {
                inactive.push(state);
            }
        }

        let mut removed = 0;
        for state in &inactive {
            if view.remove(state) {
                debug!(job = %state.job, number = state.number, "reclaimed build state");
                removed += 1;
            } else {
                warn!(
                    job = %state.job,
                    number = state.number,
                    "build state changed during reclaim"
                );
            }
        }
        obs::emit_registry_reclaimed(removed, view.len());
        removed
    }

    pub async fn len(&self) -> usize {
        self.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.lock().await.is_empty()
    }

    /// Rendering of every record, for debug logs.
    pub async fn describe(&self) -> String {
        let view = self.lock().await;
        let mut states: Vec<&Arc<BuildState>> = view.records.values().collect();
        states.sort_by(|a, b| a.job.cmp(&b.job).then(a.number.cmp(&b.number)));
        states
            .iter()
            .map(|s| s.describe())
            .collect::<Vec<_>>()
            .join("\n")
    }
}

fn key(job: &str, number: u64) -> BuildKey {
    BuildKey {
        job: job.to_string(),
        number,
    }
}
