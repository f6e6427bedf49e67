//! PUCM Core: baseline coordination and delivery
//!
//! Decides which baseline a CI job builds next, keeps concurrent invocations
//! of a job off the same baseline, tolerates replication lag between
//! multi-site repositories, and delivers and promotes the baseline once the
//! build is done.
//!
//! ## Layer 1 - Coordination
//!
//! - `Coordinator`: service object owning the shared state; `poll`,
//!   `checkout` and `post_build` are the job-lifecycle entry points
//! - `BuildStates`: registry of per-invocation records
//! - `StoredBaselines`: multi-site stored-baseline cache
//! - `DeliverSession`: deliver state machine
//! - `promotion::apply`: promotion protocol

pub mod config;
pub mod coordinator;
pub mod deliver;
mod error;
pub mod fakes;
pub mod host;
pub mod metrics;
pub mod obs;
pub mod post_build;
pub mod promotion;
pub mod registry;
pub mod selection;
pub mod stored;
pub mod telemetry;

pub use config::{
    DeliverConfig, JobConfig, PollConfig, PostBuildConfig, SequenceSource, VersionSource,
};
pub use coordinator::{Coordinator, PollOutcome};
pub use deliver::{DeliverReport, DeliverRequest, DeliverSession, DeliverState};
pub use error::{PucmError, Result};
pub use host::{BuildOutcome, JobConsole, JobHost};
pub use metrics::Metrics;
pub use post_build::{PostBuildReport, PostBuildStatus};
pub use promotion::{DemotionPolicy, PromotionReport};
pub use registry::{BuildState, BuildStateData, BuildStates, RegistryView};
pub use selection::{format_baseline_list, pick_one, SelectionQuery, Selector};
pub use stored::{StoredBaseline, StoredBaselines};
pub use telemetry::init_tracing;

pub use ucm_entities::{EntityRef, LoadModules, PromotionLevel, UcmBackend, UcmError};
