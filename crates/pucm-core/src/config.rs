//! Per-job configuration.
//!
//! A job is configured by one TOML document with three sections:
//!
//! ```toml
//! host = "build-01"        # optional, see JobConfig::host_name
//!
//! [poll]
//! component = 'COMP1@\PVOB1'
//! stream = 'DEV@\PVOB1'
//! level = "INITIAL"
//! load_modules = "all"
//! newest = false
//! multi_site_frequency_minutes = 0
//!
//! [post_build]
//! promote = true
//! recommended = false
//! make_tag = false
//! set_description = true
//! demote = "reject"
//!
//! [deliver]
//! enabled = false
//! alternate_target = ""
//! baseline_name = ""
//! version_from = "none"
//! ```
//!
//! Every field has a default, so an empty document is a valid (if useless)
//! configuration. [`JobConfig::validate`] reports everything wrong at once.

use std::path::Path;

use serde::{Deserialize, Serialize};
use ucm_entities::{EntityKind, EntityRef, LoadModules, PromotionLevel};

use crate::deliver::build_number::missing_version_parts;
use crate::error::{PucmError, Result};
use crate::promotion::DemotionPolicy;

/// Upper bound on the multi-site interval: one week.
pub const MAX_MULTI_SITE_MINUTES: u64 = 7 * 24 * 60;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct JobConfig {
    /// Host identifier used in derived stream names and view tags.
    pub host: Option<String>,
    pub poll: PollConfig,
    pub post_build: PostBuildConfig,
    pub deliver: DeliverConfig,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PollConfig {
    pub component: String,
    pub stream: String,
    /// Minimum promotion level of candidate baselines
    pub level: PromotionLevel,
    pub load_modules: LoadModules,
    /// Build the newest eligible baseline instead of the oldest
    pub newest: bool,
    /// Multi-site consistency interval; 0 disables the check
    pub multi_site_frequency_minutes: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PostBuildConfig {
    pub promote: bool,
    pub recommended: bool,
    pub make_tag: bool,
    pub set_description: bool,
    pub demote: DemotionPolicy,
}

impl Default for PostBuildConfig {
    fn default() -> Self {
        Self {
            promote: true,
            recommended: false,
            make_tag: false,
            set_description: true,
            demote: DemotionPolicy::default(),
        }
    }
}

/// Where the build-number suffix of a new baseline comes from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VersionSource {
    #[default]
    None,
    Project,
    Settings,
}

/// Sequence part of a settings-based build number.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SequenceSource {
    /// Persistent per-project counter kept by the backend
    #[default]
    Component,
    /// The job invocation number
    BuildNumber,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeliverConfig {
    pub enabled: bool,
    /// Target stream override; empty means the source stream's default target
    pub alternate_target: String,
    /// New-baseline name template; empty means no baseline is created
    pub baseline_name: String,
    pub version_from: VersionSource,
    pub major: String,
    pub minor: String,
    pub patch: String,
    pub sequence: SequenceSource,
}

impl JobConfig {
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        toml::from_str(toml_str).map_err(|e| PucmError::Config(e.to_string()))
    }

    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| PucmError::Config(e.to_string()))
    }

    /// Read and parse a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml(&text)
    }

    /// Check names and settings, reporting every problem in one error.
    pub fn validate(&self) -> Result<()> {
        let mut problems = Vec::new();

        if self.poll.stream.trim().is_empty() {
            problems.push("poll.stream is empty".to_string());
        } else if let Err(e) = EntityRef::parse_as(EntityKind::Stream, &self.poll.stream) {
            problems.push(format!("poll.stream: {}", e));
        }

        if self.poll.component.trim().is_empty() {
            problems.push("poll.component is empty".to_string());
        } else if let Err(e) = EntityRef::parse_as(EntityKind::Component, &self.poll.component) {
            problems.push(format!("poll.component: {}", e));
        }

        if self.poll.multi_site_frequency_minutes > MAX_MULTI_SITE_MINUTES {
            problems.push(format!(
                "poll.multi_site_frequency_minutes must be at most {}",
                MAX_MULTI_SITE_MINUTES
            ));
        }

        if let Some(host) = &self.host {
            if host.trim().is_empty() {
                problems.push("host is set but empty".to_string());
            }
        }

        let deliver = &self.deliver;
        if deliver.enabled {
            if !deliver.alternate_target.is_empty() {
                if let Err(e) = EntityRef::parse_as(EntityKind::Stream, &deliver.alternate_target)
                {
                    problems.push(format!("deliver.alternate_target: {}", e));
                }
            }
            if !deliver.baseline_name.is_empty()
                && !deliver
                    .baseline_name
                    .chars()
                    .all(|c| c.is_alphanumeric() || matches!(c, '_' | '.' | '-'))
            {
                problems.push(format!(
                    "deliver.baseline_name {:?} contains characters not allowed in a baseline name",
                    deliver.baseline_name
                ));
            }
            if deliver.version_from == VersionSource::Settings {
                if let Some(missing) = missing_version_parts(deliver) {
                    problems.push(format!("deliver: {}", missing));
                }
            }
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(PucmError::Config(problems.join("; ")))
        }
    }

    /// Host identifier: the configured `host`, else `COMPUTERNAME`, else
    /// `HOSTNAME`, else `"localhost"`.
    pub fn host_name(&self) -> String {
        self.host
            .clone()
            .filter(|h| !h.trim().is_empty())
            .or_else(|| std::env::var("COMPUTERNAME").ok().filter(|h| !h.is_empty()))
            .or_else(|| std::env::var("HOSTNAME").ok().filter(|h| !h.is_empty()))
            .unwrap_or_else(|| "localhost".to_string())
    }
}
