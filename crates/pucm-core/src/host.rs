//! Job host boundary.
//!
//! The CI host owns job invocations. The engine only asks whether an
//! invocation is still running, what its build outcome was, and writes
//! user-visible lines to the invocation's console.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use ucm_entities::UcmError;

use crate::error::PucmError;

/// Result of the external build step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BuildOutcome {
    Success,
    Unstable,
    Failure,
    NotBuilt,
    Aborted,
}

impl BuildOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            BuildOutcome::Success => "SUCCESS",
            BuildOutcome::Unstable => "UNSTABLE",
            BuildOutcome::Failure => "FAILURE",
            BuildOutcome::NotBuilt => "NOT_BUILT",
            BuildOutcome::Aborted => "ABORTED",
        }
    }
}

impl std::fmt::Display for BuildOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Queries answered by the CI host.
#[async_trait]
pub trait JobHost: Send + Sync {
    /// Whether invocation `number` of `job` is still running.
    async fn is_active(&self, job: &str, number: u64) -> bool;

    /// Outcome of the build step of an invocation, if it has one yet.
    async fn build_outcome(&self, job: &str, number: u64) -> Option<BuildOutcome>;
}

/// User-visible output stream of one job invocation.
pub trait JobConsole: Send + Sync {
    fn println(&self, line: &str);
}

/// Print the raw backend output an already converted error carries.
pub(crate) fn print_output(console: &dyn JobConsole, err: &PucmError) {
    if let Some(output) = err.output() {
        console.println(output);
    }
}

/// Print a backend failure's raw output on `console`, then convert it.
pub(crate) fn surface(console: &dyn JobConsole, err: UcmError) -> PucmError {
    if let Some(output) = err.output() {
        console.println(output);
    }
    err.into()
}
