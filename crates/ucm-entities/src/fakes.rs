//! In-memory fake of the UCM backend (testing and simulation only)
//!
//! `MemoryUcmBackend` keeps components, streams, baselines, views and tags in
//! a single mutex-guarded repository. Tests can script deliver behavior,
//! inject one-shot failures and read back the call log.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::backend::{LoadModules, Tag, UcmBackend};
use crate::entity::{EntityKind, EntityRef};
use crate::error::UcmError;
use crate::plevel::PromotionLevel;
use crate::UcmResult;

// ---------------------------------------------------------------------------
// Fixtures
// ---------------------------------------------------------------------------

/// Stream attributes in a repository fixture.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamFixture {
    pub read_only: bool,
    /// Fully-qualified name of the default deliver target
    pub default_target: Option<String>,
    /// Build number derived from the stream's project attributes
    pub build_number: Option<String>,
    /// Last issued value of the project build sequence
    pub build_sequence: u64,
}

/// One baseline in a repository fixture.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BaselineFixture {
    pub name: String,
    pub component: String,
    pub stream: String,
    #[serde(default)]
    pub level: PromotionLevel,
}

/// Serializable description of a whole fake repository.
///
/// Baselines are listed in creation order, oldest first.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RepositoryFixture {
    pub components: Vec<String>,
    pub streams: BTreeMap<String, StreamFixture>,
    pub baselines: Vec<BaselineFixture>,
}

/// How the next deliver call behaves.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum DeliverScript {
    #[default]
    Succeed,
    /// Baseline delivers report an empty change set
    EmptyChangeSet,
    /// Deliver fails with a merge conflict
    Conflict {
        message: String,
        output: Option<String>,
        /// Whether the failed deliver stays in progress on the source stream
        left_in_progress: bool,
    },
}

// ---------------------------------------------------------------------------
// MemoryUcmBackend
// ---------------------------------------------------------------------------

#[derive(Debug)]
struct BaselineState {
    entity: EntityRef,
    component: String,
    stream: String,
    level: PromotionLevel,
}

#[derive(Debug, Default)]
struct Repo {
    known: HashSet<String>,
    streams: HashMap<String, StreamFixture>,
    baselines: Vec<BaselineState>,
    recommended: HashMap<String, String>,
    delivering: HashSet<String>,
    deliver_script: DeliverScript,
    views: HashMap<String, PathBuf>,
    view_streams: HashMap<PathBuf, String>,
    invalid_roots: HashSet<PathBuf>,
    view_updates: Vec<(PathBuf, LoadModules)>,
    tags: BTreeMap<String, Tag>,
    next_tag: u64,
    failures: HashMap<String, UcmError>,
    calls: Vec<String>,
}

/// In-memory UCM backend.
#[derive(Debug, Default)]
pub struct MemoryUcmBackend {
    repo: Mutex<Repo>,
}

impl MemoryUcmBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a backend from a fixture, validating every name in it.
    pub fn from_fixture(fixture: &RepositoryFixture) -> UcmResult<Self> {
        let backend = Self::new();
        for component in &fixture.components {
            backend.add_component(&EntityRef::parse_as(EntityKind::Component, component)?);
        }
        for (name, stream) in &fixture.streams {
            if let Some(target) = &stream.default_target {
                EntityRef::parse_as(EntityKind::Stream, target)?;
            }
            backend.add_stream(&EntityRef::parse_as(EntityKind::Stream, name)?, stream.clone());
        }
        for bl in &fixture.baselines {
            let entity = EntityRef::parse_as(EntityKind::Baseline, &bl.name)?;
            let component = EntityRef::parse_as(EntityKind::Component, &bl.component)?;
            let stream = EntityRef::parse_as(EntityKind::Stream, &bl.stream)?;
            backend.add_baseline(&entity, &component, &stream, bl.level);
        }
        Ok(backend)
    }

    /// Parse a JSON fixture document.
    pub fn from_json(json: &str) -> UcmResult<Self> {
        let fixture: RepositoryFixture = serde_json::from_str(json)?;
        Self::from_fixture(&fixture)
    }

    fn repo(&self) -> MutexGuard<'_, Repo> {
        self.repo.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // -- seeding ----------------------------------------------------------

    pub fn add_component(&self, component: impl AsEntity) -> EntityRef {
        let entity = component.as_entity(EntityKind::Component);
        self.repo().known.insert(entity.fqname().to_string());
        entity
    }

    pub fn add_stream(&self, stream: impl AsEntity, attrs: StreamFixture) -> EntityRef {
        let entity = stream.as_entity(EntityKind::Stream);
        let mut repo = self.repo();
        repo.known.insert(entity.fqname().to_string());
        repo.streams.insert(entity.fqname().to_string(), attrs);
        entity
    }

    /// Append a baseline; later additions are newer.
    pub fn add_baseline(
        &self,
        baseline: impl AsEntity,
        component: &EntityRef,
        stream: &EntityRef,
        level: PromotionLevel,
    ) -> EntityRef {
        let entity = baseline.as_entity(EntityKind::Baseline);
        let mut repo = self.repo();
        repo.known.insert(entity.fqname().to_string());
        repo.baselines.push(BaselineState {
            entity: entity.clone(),
            component: component.fqname().to_string(),
            stream: stream.fqname().to_string(),
            level,
        });
        entity
    }

    /// Overwrite a baseline's level without recording a call, e.g. to
    /// simulate a replica catching up.
    pub fn set_level(&self, baseline: &EntityRef, level: PromotionLevel) {
        let mut repo = self.repo();
        if let Some(bl) = repo
            .baselines
            .iter_mut()
            .find(|b| b.entity.fqname() == baseline.fqname())
        {
            bl.level = level;
        }
    }

    /// Register an existing view. An invalid view fails validation until its
    /// metadata is regenerated.
    pub fn register_view(&self, view_tag: &str, view_root: &Path, stream: &EntityRef, valid: bool) {
        let mut repo = self.repo();
        repo.views
            .insert(view_tag.to_string(), view_root.to_path_buf());
        repo.view_streams
            .insert(view_root.to_path_buf(), stream.fqname().to_string());
        if !valid {
            repo.invalid_roots.insert(view_root.to_path_buf());
        }
    }

    pub fn script_deliver(&self, script: DeliverScript) {
        self.repo().deliver_script = script;
    }

    /// Make the next call of `operation` fail with `error`.
    pub fn fail_next(&self, operation: &str, error: UcmError) {
        self.repo().failures.insert(operation.to_string(), error);
    }

    // -- inspection -------------------------------------------------------

    /// Every backend call so far, as `"operation arg"` strings.
    pub fn calls(&self) -> Vec<String> {
        self.repo().calls.clone()
    }

    pub fn called(&self, operation: &str) -> bool {
        self.repo()
            .calls
            .iter()
            .any(|c| c.split(' ').next() == Some(operation))
    }

    pub fn level_of(&self, baseline: &EntityRef) -> Option<PromotionLevel> {
        self.repo()
            .baselines
            .iter()
            .find(|b| b.entity.fqname() == baseline.fqname())
            .map(|b| b.level)
    }

    pub fn recommended(&self, stream: &EntityRef) -> Option<String> {
        self.repo().recommended.get(stream.fqname()).cloned()
    }

    /// Persisted tags attached to `target`.
    pub fn tags_on(&self, target: &EntityRef) -> Vec<Tag> {
        self.repo()
            .tags
            .values()
            .filter(|t| t.target == *target)
            .cloned()
            .collect()
    }

    pub fn baseline_names(&self) -> Vec<String> {
        self.repo()
            .baselines
            .iter()
            .map(|b| b.entity.fqname().to_string())
            .collect()
    }

    pub fn view_updates(&self) -> Vec<(PathBuf, LoadModules)> {
        self.repo().view_updates.clone()
    }

    pub fn is_delivering_now(&self, stream: &EntityRef) -> bool {
        self.repo().delivering.contains(stream.fqname())
    }

    // -- helpers ----------------------------------------------------------

    /// Record the call and pop an injected failure for it, if any.
    fn enter(&self, repo: &mut Repo, operation: &str, arg: &str) -> UcmResult<()> {
        repo.calls.push(format!("{} {}", operation, arg));
        match repo.failures.remove(operation) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn stream_attrs<'a>(repo: &'a Repo, stream: &EntityRef) -> UcmResult<&'a StreamFixture> {
        repo.streams
            .get(stream.fqname())
            .ok_or_else(|| not_found("stream", stream))
    }

    fn baseline_state<'a>(repo: &'a Repo, baseline: &EntityRef) -> UcmResult<&'a BaselineState> {
        repo.baselines
            .iter()
            .find(|b| b.entity.fqname() == baseline.fqname())
            .ok_or_else(|| not_found("baseline", baseline))
    }
}

/// Anything the seeding helpers accept as an entity: a parsed reference or a
/// name string.
pub trait AsEntity {
    fn as_entity(&self, kind: EntityKind) -> EntityRef;
}

impl AsEntity for &EntityRef {
    fn as_entity(&self, _kind: EntityKind) -> EntityRef {
        (*self).clone()
    }
}

impl AsEntity for EntityRef {
    fn as_entity(&self, _kind: EntityKind) -> EntityRef {
        self.clone()
    }
}

impl AsEntity for &str {
    /// Panics on an unparseable name; seeding is test setup.
    fn as_entity(&self, kind: EntityKind) -> EntityRef {
        match EntityRef::parse_as(kind, self) {
            Ok(entity) => entity,
            Err(err) => panic!("invalid fixture name {self:?}: {err}"),
        }
    }
}

fn not_found(kind: &str, entity: &EntityRef) -> UcmError {
    UcmError::NotFound {
        kind: kind.to_string(),
        fqname: entity.fqname().to_string(),
    }
}

#[async_trait]
impl UcmBackend for MemoryUcmBackend {
    async fn load(&self, entity: &EntityRef) -> UcmResult<()> {
        let mut repo = self.repo();
        self.enter(&mut repo, "load", entity.fqname())?;
        if repo.known.contains(entity.fqname()) {
            Ok(())
        } else {
            Err(not_found(entity.kind().as_str(), entity))
        }
    }

    async fn baselines(
        &self,
        component: &EntityRef,
        stream: &EntityRef,
        min_level: PromotionLevel,
    ) -> UcmResult<Vec<EntityRef>> {
        let mut repo = self.repo();
        self.enter(&mut repo, "baselines", stream.fqname())?;
        Self::stream_attrs(&repo, stream)?;
        Ok(repo
            .baselines
            .iter()
            .filter(|b| {
                b.component == component.fqname()
                    && b.stream == stream.fqname()
                    && b.level >= min_level
            })
            .map(|b| b.entity.clone())
            .collect())
    }

    async fn promotion_level(&self, baseline: &EntityRef) -> UcmResult<PromotionLevel> {
        let mut repo = self.repo();
        self.enter(&mut repo, "promotion_level", baseline.fqname())?;
        Ok(Self::baseline_state(&repo, baseline)?.level)
    }

    async fn set_promotion_level(
        &self,
        baseline: &EntityRef,
        level: PromotionLevel,
    ) -> UcmResult<()> {
        let mut repo = self.repo();
        self.enter(&mut repo, "set_promotion_level", baseline.fqname())?;
        let bl = repo
            .baselines
            .iter_mut()
            .find(|b| b.entity.fqname() == baseline.fqname())
            .ok_or_else(|| not_found("baseline", baseline))?;
        bl.level = level;
        Ok(())
    }

    async fn baseline_component(&self, baseline: &EntityRef) -> UcmResult<EntityRef> {
        let mut repo = self.repo();
        self.enter(&mut repo, "baseline_component", baseline.fqname())?;
        EntityRef::parse(&Self::baseline_state(&repo, baseline)?.component)
    }

    async fn baseline_stream(&self, baseline: &EntityRef) -> UcmResult<EntityRef> {
        let mut repo = self.repo();
        self.enter(&mut repo, "baseline_stream", baseline.fqname())?;
        EntityRef::parse(&Self::baseline_state(&repo, baseline)?.stream)
    }

    async fn is_read_only(&self, stream: &EntityRef) -> UcmResult<bool> {
        let mut repo = self.repo();
        self.enter(&mut repo, "is_read_only", stream.fqname())?;
        Ok(Self::stream_attrs(&repo, stream)?.read_only)
    }

    async fn default_target(&self, stream: &EntityRef) -> UcmResult<EntityRef> {
        let mut repo = self.repo();
        self.enter(&mut repo, "default_target", stream.fqname())?;
        match &Self::stream_attrs(&repo, stream)?.default_target {
            Some(target) => EntityRef::parse_as(EntityKind::Stream, target),
            None => Err(UcmError::command(
                "default_target",
                format!("{} has no default deliver target", stream),
                None,
            )),
        }
    }

    async fn recommend(&self, stream: &EntityRef, baseline: &EntityRef) -> UcmResult<()> {
        let mut repo = self.repo();
        self.enter(&mut repo, "recommend", baseline.fqname())?;
        Self::stream_attrs(&repo, stream)?;
        repo.recommended
            .insert(stream.fqname().to_string(), baseline.fqname().to_string());
        Ok(())
    }

    async fn project_build_number(&self, stream: &EntityRef) -> UcmResult<String> {
        let mut repo = self.repo();
        self.enter(&mut repo, "project_build_number", stream.fqname())?;
        Self::stream_attrs(&repo, stream)?
            .build_number
            .clone()
            .ok_or_else(|| {
                UcmError::command(
                    "project_build_number",
                    format!("the project of {} has no build number attributes", stream),
                    None,
                )
            })
    }

    async fn next_build_sequence(&self, stream: &EntityRef) -> UcmResult<u64> {
        let mut repo = self.repo();
        self.enter(&mut repo, "next_build_sequence", stream.fqname())?;
        let attrs = repo
            .streams
            .get_mut(stream.fqname())
            .ok_or_else(|| not_found("stream", stream))?;
        attrs.build_sequence += 1;
        Ok(attrs.build_sequence)
    }

    async fn deliver_stream(
        &self,
        source: &EntityRef,
        target: &EntityRef,
        view_root: &Path,
    ) -> UcmResult<()> {
        let mut repo = self.repo();
        self.enter(&mut repo, "deliver_stream", source.fqname())?;
        Self::stream_attrs(&repo, target)?;
        if !repo.view_streams.contains_key(view_root) {
            return Err(UcmError::InvalidOperation {
                operation: "deliver_stream".to_string(),
                fqname: source.fqname().to_string(),
                reason: format!("no view at {}", view_root.display()),
            });
        }
        match repo.deliver_script.clone() {
            DeliverScript::Succeed | DeliverScript::EmptyChangeSet => Ok(()),
            DeliverScript::Conflict {
                message,
                output,
                left_in_progress,
            } => {
                if left_in_progress {
                    repo.delivering.insert(source.fqname().to_string());
                }
                Err(UcmError::command("deliver", message, output))
            }
        }
    }

    async fn deliver_baseline(
        &self,
        baseline: &EntityRef,
        source: &EntityRef,
        view_root: &Path,
        _view_tag: &str,
    ) -> UcmResult<bool> {
        let mut repo = self.repo();
        self.enter(&mut repo, "deliver_baseline", baseline.fqname())?;
        Self::baseline_state(&repo, baseline)?;
        if !repo.view_streams.contains_key(view_root) {
            return Err(UcmError::InvalidOperation {
                operation: "deliver_baseline".to_string(),
                fqname: baseline.fqname().to_string(),
                reason: format!("no view at {}", view_root.display()),
            });
        }
        match repo.deliver_script.clone() {
            DeliverScript::Succeed => Ok(true),
            DeliverScript::EmptyChangeSet => Ok(false),
            DeliverScript::Conflict {
                message,
                output,
                left_in_progress,
            } => {
                if left_in_progress {
                    repo.delivering.insert(source.fqname().to_string());
                }
                Err(UcmError::command("deliver", message, output))
            }
        }
    }

    async fn is_delivering(&self, stream: &EntityRef) -> UcmResult<bool> {
        let mut repo = self.repo();
        self.enter(&mut repo, "is_delivering", stream.fqname())?;
        Ok(repo.delivering.contains(stream.fqname()))
    }

    async fn cancel_deliver(&self, stream: &EntityRef, view_root: &Path) -> UcmResult<()> {
        let mut repo = self.repo();
        self.enter(&mut repo, "cancel_deliver", &view_root.display().to_string())?;
        if repo.delivering.remove(stream.fqname()) {
            Ok(())
        } else {
            Err(UcmError::command(
                "cancel_deliver",
                format!("no deliver in progress from {}", stream),
                None,
            ))
        }
    }

    async fn create_baseline(
        &self,
        name: &str,
        component: &EntityRef,
        view_root: &Path,
    ) -> UcmResult<EntityRef> {
        let mut repo = self.repo();
        self.enter(&mut repo, "create_baseline", name)?;
        let stream = repo.view_streams.get(view_root).cloned().ok_or_else(|| {
            UcmError::InvalidOperation {
                operation: "create_baseline".to_string(),
                fqname: component.fqname().to_string(),
                reason: format!("no view at {}", view_root.display()),
            }
        })?;
        let entity = EntityRef::new(EntityKind::Baseline, name, component.pvob())?;
        repo.known.insert(entity.fqname().to_string());
        repo.baselines.push(BaselineState {
            entity: entity.clone(),
            component: component.fqname().to_string(),
            stream,
            level: PromotionLevel::Initial,
        });
        Ok(entity)
    }

    async fn view_exists(&self, view_tag: &str) -> UcmResult<bool> {
        let mut repo = self.repo();
        self.enter(&mut repo, "view_exists", view_tag)?;
        Ok(repo.views.contains_key(view_tag))
    }

    async fn validate_view_root(&self, view_root: &Path) -> UcmResult<()> {
        let mut repo = self.repo();
        self.enter(&mut repo, "validate_view_root", &view_root.display().to_string())?;
        if repo.view_streams.contains_key(view_root) && !repo.invalid_roots.contains(view_root) {
            Ok(())
        } else {
            Err(UcmError::command(
                "validate_view_root",
                format!("{} is not a valid view root", view_root.display()),
                None,
            ))
        }
    }

    async fn regenerate_view_metadata(&self, view_root: &Path, view_tag: &str) -> UcmResult<()> {
        let mut repo = self.repo();
        self.enter(&mut repo, "regenerate_view_metadata", view_tag)?;
        let stream = repo
            .views
            .get(view_tag)
            .and_then(|old_root| repo.view_streams.get(old_root))
            .cloned()
            .ok_or_else(|| {
                UcmError::command(
                    "regenerate_view_metadata",
                    format!("no view tagged {}", view_tag),
                    None,
                )
            })?;
        repo.invalid_roots.remove(view_root);
        repo.views
            .insert(view_tag.to_string(), view_root.to_path_buf());
        repo.view_streams.insert(view_root.to_path_buf(), stream);
        Ok(())
    }

    async fn create_view(
        &self,
        stream: &EntityRef,
        view_root: &Path,
        view_tag: &str,
    ) -> UcmResult<()> {
        let mut repo = self.repo();
        self.enter(&mut repo, "create_view", view_tag)?;
        Self::stream_attrs(&repo, stream)?;
        if repo.views.contains_key(view_tag) {
            return Err(UcmError::command(
                "create_view",
                format!("view tag {} already exists", view_tag),
                None,
            ));
        }
        repo.views
            .insert(view_tag.to_string(), view_root.to_path_buf());
        repo.view_streams
            .insert(view_root.to_path_buf(), stream.fqname().to_string());
        Ok(())
    }

    async fn update_view(&self, view_root: &Path, modules: LoadModules) -> UcmResult<()> {
        let mut repo = self.repo();
        self.enter(&mut repo, "update_view", modules.as_str())?;
        if !repo.view_streams.contains_key(view_root) {
            return Err(UcmError::command(
                "update_view",
                format!("{} is not a view root", view_root.display()),
                None,
            ));
        }
        repo.view_updates.push((view_root.to_path_buf(), modules));
        Ok(())
    }

    async fn create_tag(
        &self,
        target: &EntityRef,
        tag_type: &str,
        tag_id: &str,
    ) -> UcmResult<Tag> {
        let mut repo = self.repo();
        self.enter(&mut repo, "create_tag", target.fqname())?;
        if let Some(existing) = repo
            .tags
            .values()
            .find(|t| t.target == *target && t.tag_type == tag_type && t.tag_id == tag_id)
        {
            return Ok(existing.clone());
        }
        repo.next_tag += 1;
        let entity = EntityRef::new(EntityKind::Tag, &repo.next_tag.to_string(), target.pvob())?;
        Ok(Tag {
            entity,
            target: target.clone(),
            tag_type: tag_type.to_string(),
            tag_id: tag_id.to_string(),
            entries: BTreeMap::new(),
        })
    }

    async fn persist_tag(&self, tag: &Tag) -> UcmResult<()> {
        let mut repo = self.repo();
        self.enter(&mut repo, "persist_tag", tag.entity.fqname())?;
        repo.known.insert(tag.entity.fqname().to_string());
        repo.tags
            .insert(tag.entity.fqname().to_string(), tag.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn fixture_round_trip_lists_baselines_oldest_first() {
        let json = r#"{
            "components": ["COMP1@\\PVOB1"],
            "streams": { "DEV@\\PVOB1": { "default_target": "INT@\\PVOB1" }, "INT@\\PVOB1": {} },
            "baselines": [
                { "name": "BL1@\\PVOB1", "component": "COMP1@\\PVOB1", "stream": "DEV@\\PVOB1", "level": "INITIAL" },
                { "name": "BL2@\\PVOB1", "component": "COMP1@\\PVOB1", "stream": "DEV@\\PVOB1", "level": "BUILT" }
            ]
        }"#;
        let backend = MemoryUcmBackend::from_json(json).unwrap();
        let comp = EntityRef::parse(r"component:COMP1@\PVOB1").unwrap();
        let dev = EntityRef::parse(r"stream:DEV@\PVOB1").unwrap();

        let all = backend
            .baselines(&comp, &dev, PromotionLevel::Initial)
            .await
            .unwrap();
        let names: Vec<_> = all.iter().map(|b| b.short_name().to_string()).collect();
        assert_eq!(names, vec!["BL1", "BL2"]);

        let built = backend
            .baselines(&comp, &dev, PromotionLevel::Built)
            .await
            .unwrap();
        assert_eq!(built.len(), 1);
    }

    #[test]
    fn fixture_with_bad_name_is_rejected() {
        let json = r#"{ "components": ["not a name"] }"#;
        assert!(matches!(
            MemoryUcmBackend::from_json(json),
            Err(UcmError::NotRecognized { .. })
        ));
    }

    #[tokio::test]
    async fn injected_failure_fires_once() {
        let backend = MemoryUcmBackend::new();
        let dev = backend.add_stream(r"DEV@\PVOB1", StreamFixture::default());
        backend.fail_next(
            "is_read_only",
            UcmError::command("is_read_only", "lock timeout", Some("raw".to_string())),
        );
        assert!(backend.is_read_only(&dev).await.is_err());
        assert!(!backend.is_read_only(&dev).await.unwrap());
    }
}
