//! Delivery engine.
//!
//! A [`DeliverSession`] walks one deliver through
//! `Idle -> ViewReady -> Delivering -> {Delivered, Cancelled, Failed}` and,
//! when a baseline-name template is configured, `Delivered ->
//! BaselineCreated`. The deliver itself is never retried; the only
//! corrective action is cancelling a deliver left in progress by a failure.

pub mod build_number;
pub mod view;

use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::{debug, info, warn};
use ucm_entities::{EntityKind, EntityRef, LoadModules, UcmBackend, UcmError};

use crate::config::DeliverConfig;
use crate::error::{PucmError, Result};
use crate::host::{self, JobConsole};
use crate::obs;

pub use build_number::{derive_build_number, missing_version_parts};
pub use view::{deliver_view_root, deliver_view_tag, derived_source_stream, prepare_view};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliverState {
    Idle,
    ViewReady,
    Delivering,
    Delivered,
    Cancelled,
    Failed,
    BaselineCreated,
}

impl DeliverState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            DeliverState::Delivered
                | DeliverState::Cancelled
                | DeliverState::Failed
                | DeliverState::BaselineCreated
        )
    }
}

/// Inputs of one deliver.
#[derive(Debug, Clone)]
pub struct DeliverRequest<'a> {
    pub job: &'a str,
    pub number: u64,
    pub host: &'a str,
    pub baseline: &'a EntityRef,
    pub component: &'a EntityRef,
    pub workspace: &'a Path,
    pub load_modules: LoadModules,
    pub config: &'a DeliverConfig,
}

/// What a successful deliver did.
#[derive(Debug, Clone, Serialize)]
pub struct DeliverReport {
    pub state: DeliverState,
    pub source: EntityRef,
    pub target: EntityRef,
    pub view_tag: String,
    pub view_root: PathBuf,
    pub build_number: String,
    pub new_baseline: Option<EntityRef>,
    /// Set when the deliver succeeded but creating the new baseline failed
    pub baseline_error: Option<String>,
}

pub struct DeliverSession<'a> {
    backend: &'a dyn UcmBackend,
    console: &'a dyn JobConsole,
    request: DeliverRequest<'a>,
    state: DeliverState,
    history: Vec<DeliverState>,
}

impl<'a> DeliverSession<'a> {
    pub fn new(
        backend: &'a dyn UcmBackend,
        console: &'a dyn JobConsole,
        request: DeliverRequest<'a>,
    ) -> Self {
        Self {
            backend,
            console,
            request,
            state: DeliverState::Idle,
            history: vec![DeliverState::Idle],
        }
    }

    pub fn state(&self) -> DeliverState {
        self.state
    }

    /// Every state entered so far, starting with `Idle`.
    pub fn history(&self) -> &[DeliverState] {
        &self.history
    }

    fn transition(&mut self, next: DeliverState) {
        debug!(from = ?self.state, to = ?next, "deliver state");
        self.state = next;
        self.history.push(next);
    }

    fn surface(&self, err: UcmError) -> PucmError {
        host::surface(self.console, err)
    }

    /// Run the deliver to a terminal state.
    ///
    /// On error the session is left in `Failed` or `Cancelled`.
    pub async fn run(&mut self) -> Result<DeliverReport> {
        match self.run_inner().await {
            Ok(report) => Ok(report),
            Err(err) => {
                if !self.state.is_terminal() {
                    self.transition(DeliverState::Failed);
                }
                Err(err)
            }
        }
    }

    async fn run_inner(&mut self) -> Result<DeliverReport> {
        let req = self.request.clone();
        let backend = self.backend;
        self.console.println("[PUCM] Starting deliver");

        let source = derived_source_stream(req.host, req.job, req.baseline.pvob())?;
        info!(source = %source, baseline = %req.baseline, "deliver source stream");

        let target = if req.config.alternate_target.is_empty() {
            backend
                .default_target(&source)
                .await
                .map_err(|e| self.surface(e))?
        } else {
            EntityRef::parse_as(EntityKind::Stream, &req.config.alternate_target)?
        };
        debug!(target = %target, "deliver target stream");

        let view_tag = deliver_view_tag(req.job, req.host, &target);
        let view_root = deliver_view_root(req.workspace, &target);
        prepare_view(
            backend,
            self.console,
            &target,
            &view_root,
            &view_tag,
            req.load_modules,
        )
        .await?;
        self.transition(DeliverState::ViewReady);

        let build_number =
            derive_build_number(backend, self.console, req.config, &target, req.number).await?;
        self.transition(DeliverState::Delivering);

        self.console.println(&format!(
            "[PUCM] Delivering {} to {} in {}",
            req.baseline,
            target,
            view_root.display()
        ));
        let delivered = self.deliver(&source, &target, &view_root, &view_tag).await;
        if let Err(err) = delivered {
            return Err(self.recover(err, &source, &view_root).await);
        }
        self.transition(DeliverState::Delivered);

        let mut report = DeliverReport {
            state: DeliverState::Delivered,
            source,
            target,
            view_tag,
            view_root,
            build_number,
            new_baseline: None,
            baseline_error: None,
        };

        if !req.config.baseline_name.is_empty() {
            let name = format!("{}{}", req.config.baseline_name, report.build_number);
            match backend
                .create_baseline(&name, req.component, &report.view_root)
                .await
            {
                Ok(bl) => {
                    self.console
                        .println(&format!("[PUCM] Created baseline {}", name));
                    self.transition(DeliverState::BaselineCreated);
                    report.state = DeliverState::BaselineCreated;
                    report.new_baseline = Some(bl);
                }
                Err(e) => {
                    self.console
                        .println(&format!("[PUCM] Failed creating baseline {}", name));
                    let err = self.surface(e);
                    warn!(baseline = %name, error = %err, "baseline creation failed after deliver");
                    report.baseline_error = Some(err.to_string());
                }
            }
        }

        obs::emit_deliver_finished(
            req.baseline.fqname(),
            report.target.fqname(),
            report.new_baseline.as_ref().map(|b| b.fqname()),
        );
        Ok(report)
    }

    /// Baseline-to-stream from a read-only source, stream-to-stream otherwise.
    async fn deliver(
        &self,
        source: &EntityRef,
        target: &EntityRef,
        view_root: &Path,
        view_tag: &str,
    ) -> Result<()> {
        let req = &self.request;
        let read_only = self
            .backend
            .is_read_only(source)
            .await
            .map_err(|e| self.surface(e))?;

        if read_only {
            debug!(stream = %source, "source stream is read only");
            let delivered = self
                .backend
                .deliver_baseline(req.baseline, source, view_root, view_tag)
                .await
                .map_err(|e| self.surface(e))?;
            if !delivered {
                return Err(PucmError::EmptyDeliver {
                    baseline: req.baseline.fqname().to_string(),
                });
            }
        } else {
            self.backend
                .deliver_stream(source, target, view_root)
                .await
                .map_err(|e| self.surface(e))?;
        }
        Ok(())
    }

    /// Cancel a deliver the failure left in progress, folding the outcome
    /// into the returned error.
    async fn recover(&mut self, err: PucmError, source: &EntityRef, view_root: &Path) -> PucmError {
        if matches!(err, PucmError::EmptyDeliver { .. }) {
            self.console.println(&format!("[PUCM] {}", err));
            return err;
        }

        self.console.println("[PUCM] Deliver operation failed.");
        let output = err.output().map(str::to_string);
        let in_progress = match self.backend.is_delivering(source).await {
            Ok(v) => v,
            Err(e) => {
                warn!(stream = %source, error = %e, "could not query deliver status");
                false
            }
        };
        if !in_progress {
            self.console.println(&format!("Error was: {}", err));
            return PucmError::backend(format!("Deliver operation failed: {}", err), output);
        }

        self.console.println("[PUCM] Trying to cancel...");
        let root = view_root.display().to_string();
        match self.backend.cancel_deliver(source, view_root).await {
            Ok(()) => {
                self.console.println("[PUCM] Deliver cancelled");
                self.transition(DeliverState::Cancelled);
                obs::emit_deliver_cancelled(source.fqname(), &root, true);
                PucmError::backend(
                    format!(
                        "The baseline could not be delivered and was cancelled: {}",
                        err
                    ),
                    output,
                )
            }
            Err(cancel_err) => {
                if let Some(out) = cancel_err.output() {
                    self.console.println(out);
                }
                self.console.println("[PUCM] Cancel failed");
                obs::emit_deliver_cancelled(source.fqname(), &root, false);
                PucmError::backend(
                    format!(
                        "Deliver operation failed and could not cancel: {}; cancel error: {}",
                        err, cancel_err
                    ),
                    output,
                )
            }
        }
    }
}
