//! Build-number suffixes for baselines created by a deliver.

use ucm_entities::{EntityRef, UcmBackend};

use crate::config::{DeliverConfig, SequenceSource, VersionSource};
use crate::error::{PucmError, Result};
use crate::host::{surface, JobConsole};

/// `"Major missing. Minor missing. "`-style report of empty version parts,
/// trimmed; `None` when all three are set.
pub fn missing_version_parts(config: &DeliverConfig) -> Option<String> {
    let missing: Vec<&str> = [
        (&config.major, "Major missing."),
        (&config.minor, "Minor missing."),
        (&config.patch, "Patch missing."),
    ]
    .into_iter()
    .filter(|(part, _)| part.trim().is_empty())
    .map(|(_, msg)| msg)
    .collect();

    if missing.is_empty() {
        None
    } else {
        Some(missing.join(" "))
    }
}

/// Derive the build number for a deliver into `target`.
///
/// - `none`: the empty string
/// - `project`: the backend's project build number for `target`
/// - `settings`: `__<major>_<minor>_<patch>_<sequence>`
pub async fn derive_build_number(
    backend: &dyn UcmBackend,
    console: &dyn JobConsole,
    config: &DeliverConfig,
    target: &EntityRef,
    job_number: u64,
) -> Result<String> {
    match config.version_from {
        VersionSource::None => Ok(String::new()),
        VersionSource::Project => backend
            .project_build_number(target)
            .await
            .map_err(|e| surface(console, e)),
        VersionSource::Settings => {
            if let Some(missing) = missing_version_parts(config) {
                return Err(PucmError::Config(format!(
                    "Missing build number information: {}",
                    missing
                )));
            }
            let sequence = match config.sequence {
                SequenceSource::Component => backend
                    .next_build_sequence(target)
                    .await
                    .map_err(|e| surface(console, e))?,
                SequenceSource::BuildNumber => job_number,
            };
            Ok(format!(
                "__{}_{}_{}_{}",
                config.major.trim(),
                config.minor.trim(),
                config.patch.trim(),
                sequence
            ))
        }
    }
}
