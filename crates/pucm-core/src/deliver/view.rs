//! Deliver naming and view preparation.

use std::path::{Path, PathBuf};

use ucm_entities::{EntityKind, EntityRef, LoadModules, UcmBackend, UcmError};

use crate::error::Result;
use crate::host::{surface, JobConsole};

/// Replace anything a UCM short name cannot hold with `_`.
fn name_safe(s: &str) -> String {
    s.chars()
        .map(|c| {
            if c.is_alphanumeric() || matches!(c, '_' | '.' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect()
}

/// Per-host development stream the job delivers from:
/// `stream:pucm_<host>_<job>@<pvob>`.
pub fn derived_source_stream(host: &str, job: &str, pvob: &str) -> Result<EntityRef> {
    let short = format!("pucm_{}_{}", name_safe(host), name_safe(job));
    Ok(EntityRef::new(EntityKind::Stream, &short, pvob)?)
}

/// `<job with whitespace replaced by _>_<host>_<target short name>`, with the
/// host made name-safe the same way as in the source stream.
pub fn deliver_view_tag(job: &str, host: &str, target: &EntityRef) -> String {
    let job: String = job
        .chars()
        .map(|c| if c.is_whitespace() { '_' } else { c })
        .collect();
    format!("{}_{}_{}", job, name_safe(host), target.short_name())
}

/// `<workspace>/deliverview_<target short name>`
pub fn deliver_view_root(workspace: &Path, target: &EntityRef) -> PathBuf {
    workspace.join(format!("deliverview_{}", target.short_name()))
}

/// Make the deliver view at `view_root` usable and load `stream`'s modules.
///
/// Reuses an existing directory and view tag, regenerating the on-disk view
/// metadata when the backend rejects the directory.
pub async fn prepare_view(
    backend: &dyn UcmBackend,
    console: &dyn JobConsole,
    stream: &EntityRef,
    view_root: &Path,
    view_tag: &str,
    modules: LoadModules,
) -> Result<()> {
    if tokio::fs::metadata(view_root).await.is_ok() {
        console.println(&format!("[PUCM] Reusing view root: {}", view_root.display()));
    } else {
        tokio::fs::create_dir_all(view_root).await?;
        console.println(&format!(
            "[PUCM] Created folder for view root: {}",
            view_root.display()
        ));
    }

    let raw = |e: UcmError| surface(console, e);
    if backend.view_exists(view_tag).await.map_err(raw)? {
        console.println(&format!("[PUCM] Reusing view tag: {}", view_tag));
        if backend.validate_view_root(view_root).await.is_err() {
            console.println("[PUCM] View root not valid, regenerating");
            backend
                .regenerate_view_metadata(view_root, view_tag)
                .await
                .map_err(raw)?;
        }
    } else {
        backend
            .create_view(stream, view_root, view_tag)
            .await
            .map_err(raw)?;
        console.println(&format!(
            "[PUCM] Created new view {} in {}",
            view_tag,
            view_root.display()
        ));
    }

    console.println(&format!(
        "[PUCM] Updating deliver view using {} modules",
        modules
    ));
    backend
        .update_view(view_root, modules)
        .await
        .map_err(raw)?;
    Ok(())
}
