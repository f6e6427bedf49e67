//! The UCM backend boundary.
//!
//! `UcmBackend` is everything the coordination engine needs from the
//! version-control system: baseline queries, promotion-level mutation,
//! deliver/cancel, baseline creation, snapshot views and tags. Executing the
//! underlying commands is the implementor's concern. An in-memory
//! implementation lives in [`crate::fakes`].

use std::collections::BTreeMap;
use std::path::Path;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::entity::EntityRef;
use crate::plevel::PromotionLevel;
use crate::UcmResult;

/// Which stream modules a snapshot view update loads.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LoadModules {
    #[default]
    All,
    Modifiable,
}

impl LoadModules {
    pub fn as_str(&self) -> &'static str {
        match self {
            LoadModules::All => "all",
            LoadModules::Modifiable => "modifiable",
        }
    }
}

impl std::fmt::Display for LoadModules {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A tag attached to an entity, with key/value entries.
///
/// Entries are set locally and only reach the backend through
/// [`UcmBackend::persist_tag`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tag {
    /// The tag's own identity (`tag@id@\pvob`).
    pub entity: EntityRef,
    /// The entity the tag is attached to.
    pub target: EntityRef,
    pub tag_type: String,
    pub tag_id: String,
    pub entries: BTreeMap<String, String>,
}

impl Tag {
    pub fn set_entry(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.entries.insert(key.into(), value.into());
    }

    pub fn entry(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(String::as_str)
    }
}

/// Operations consumed from the version-control backend.
///
/// Every failure is a [`crate::UcmError`]; command failures carry the raw
/// backend output when there was any.
#[async_trait]
pub trait UcmBackend: Send + Sync {
    /// Verify that the entity exists.
    async fn load(&self, entity: &EntityRef) -> UcmResult<()>;

    /// Baselines of `component` on `stream` at or above `min_level`,
    /// oldest first.
    async fn baselines(
        &self,
        component: &EntityRef,
        stream: &EntityRef,
        min_level: PromotionLevel,
    ) -> UcmResult<Vec<EntityRef>>;

    /// Current promotion level, read fresh from the backend.
    async fn promotion_level(&self, baseline: &EntityRef) -> UcmResult<PromotionLevel>;

    async fn set_promotion_level(
        &self,
        baseline: &EntityRef,
        level: PromotionLevel,
    ) -> UcmResult<()>;

    async fn baseline_component(&self, baseline: &EntityRef) -> UcmResult<EntityRef>;

    async fn baseline_stream(&self, baseline: &EntityRef) -> UcmResult<EntityRef>;

    async fn is_read_only(&self, stream: &EntityRef) -> UcmResult<bool>;

    async fn default_target(&self, stream: &EntityRef) -> UcmResult<EntityRef>;

    /// Mark `baseline` as the recommended baseline of `stream`.
    async fn recommend(&self, stream: &EntityRef, baseline: &EntityRef) -> UcmResult<()>;

    /// Build number derived from the project attributes of `stream`'s project.
    async fn project_build_number(&self, stream: &EntityRef) -> UcmResult<String>;

    /// Next value of the persistent per-project build sequence.
    async fn next_build_sequence(&self, stream: &EntityRef) -> UcmResult<u64>;

    /// Deliver the contents of `source` into `target` through the view at
    /// `view_root`.
    async fn deliver_stream(
        &self,
        source: &EntityRef,
        target: &EntityRef,
        view_root: &Path,
    ) -> UcmResult<()>;

    /// Deliver a single baseline from `source` to its default target.
    ///
    /// Returns `false` when the change set was empty and nothing was delivered.
    async fn deliver_baseline(
        &self,
        baseline: &EntityRef,
        source: &EntityRef,
        view_root: &Path,
        view_tag: &str,
    ) -> UcmResult<bool>;

    /// Whether a deliver from `stream` is still in progress.
    async fn is_delivering(&self, stream: &EntityRef) -> UcmResult<bool>;

    async fn cancel_deliver(&self, stream: &EntityRef, view_root: &Path) -> UcmResult<()>;

    /// Create a full baseline of `component` from the view at `view_root`.
    async fn create_baseline(
        &self,
        name: &str,
        component: &EntityRef,
        view_root: &Path,
    ) -> UcmResult<EntityRef>;

    async fn view_exists(&self, view_tag: &str) -> UcmResult<bool>;

    /// Check that `view_root` holds valid view metadata.
    async fn validate_view_root(&self, view_root: &Path) -> UcmResult<()>;

    /// Rewrite the on-disk view metadata of `view_root` for `view_tag`.
    async fn regenerate_view_metadata(&self, view_root: &Path, view_tag: &str) -> UcmResult<()>;

    /// Create a snapshot view of `stream` rooted at `view_root`.
    async fn create_view(
        &self,
        stream: &EntityRef,
        view_root: &Path,
        view_tag: &str,
    ) -> UcmResult<()>;

    async fn update_view(&self, view_root: &Path, modules: LoadModules) -> UcmResult<()>;

    /// Create (or fetch) the tag of `tag_type`/`tag_id` on `target`.
    async fn create_tag(&self, target: &EntityRef, tag_type: &str, tag_id: &str)
        -> UcmResult<Tag>;

    async fn persist_tag(&self, tag: &Tag) -> UcmResult<()>;
}
