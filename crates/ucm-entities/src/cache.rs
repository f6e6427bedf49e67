//! Process-lifetime entity identity cache.
//!
//! Resolution is keyed by the exact name string handed in. Entries are only
//! removed by [`EntityCache::invalidate`] or [`EntityCache::clear`].

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use tracing::debug;

use crate::backend::UcmBackend;
use crate::entity::{EntityKind, EntityRef};
use crate::UcmResult;

/// Shared cache of resolved entity references.
#[derive(Debug, Default)]
pub struct EntityCache {
    entries: Mutex<HashMap<String, EntityRef>>,
}

impl EntityCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve a name without asking the backend whether the entity exists.
    ///
    /// Use this when the caller already knows the entity is real, e.g. a
    /// baseline name the backend itself just listed.
    pub fn resolve_assuming_valid(&self, fqname: &str) -> UcmResult<EntityRef> {
        if let Some(hit) = self.lookup(fqname) {
            return Ok(hit);
        }
        let entity = EntityRef::parse(fqname)?;
        self.store(fqname, &entity);
        Ok(entity)
    }

    /// Resolve a name and verify it against the backend before caching it.
    pub async fn resolve_and_verify(
        &self,
        backend: &dyn UcmBackend,
        fqname: &str,
    ) -> UcmResult<EntityRef> {
        if let Some(hit) = self.lookup(fqname) {
            return Ok(hit);
        }
        let entity = EntityRef::parse(fqname)?;
        backend.load(&entity).await?;
        self.store(fqname, &entity);
        Ok(entity)
    }

    /// Resolve a name expected to denote `kind`, accepting the bare
    /// `shortname@\pvob` form for standard kinds.
    pub fn resolve_kind(&self, kind: EntityKind, name: &str) -> UcmResult<EntityRef> {
        if let Some(hit) = self.lookup(name).filter(|e| e.kind() == kind) {
            return Ok(hit);
        }
        let entity = EntityRef::parse_as(kind, name)?;
        self.store(name, &entity);
        Ok(entity)
    }

    pub fn stream(&self, name: &str) -> UcmResult<EntityRef> {
        self.resolve_kind(EntityKind::Stream, name)
    }

    pub fn baseline(&self, name: &str) -> UcmResult<EntityRef> {
        self.resolve_kind(EntityKind::Baseline, name)
    }

    pub fn component(&self, name: &str) -> UcmResult<EntityRef> {
        self.resolve_kind(EntityKind::Component, name)
    }

    /// Drop one cached name. Returns whether it was cached.
    pub fn invalidate(&self, fqname: &str) -> bool {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries.remove(fqname).is_some()
    }

    pub fn clear(&self) {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    pub fn len(&self) -> usize {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lookup(&self, name: &str) -> Option<EntityRef> {
        let entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        let hit = entries.get(name).cloned();
        if hit.is_some() {
            debug!(fqname = %name, "entity cache hit");
        }
        hit
    }

    fn store(&self, name: &str, entity: &EntityRef) {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries
            .entry(name.to_string())
            .or_insert_with(|| entity.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::UcmError;
    use crate::fakes::MemoryUcmBackend;
    use crate::plevel::PromotionLevel;

    #[test]
    fn repeated_resolution_hits_cache() {
        let cache = EntityCache::new();
        let a = cache.resolve_assuming_valid(r"baseline:BL@\PVOB").unwrap();
        let b = cache.resolve_assuming_valid(r"baseline:BL@\PVOB").unwrap();
        assert_eq!(a, b);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn unparseable_names_are_not_cached() {
        let cache = EntityCache::new();
        let err = cache.resolve_assuming_valid("nonsense").unwrap_err();
        assert!(matches!(err, UcmError::NotRecognized { .. }));
        assert!(cache.is_empty());
    }

    #[test]
    fn invalidate_evicts_one_entry() {
        let cache = EntityCache::new();
        cache.stream(r"DEV@\PVOB").unwrap();
        cache.component(r"COMP@\PVOB").unwrap();
        assert!(cache.invalidate(r"DEV@\PVOB"));
        assert!(!cache.invalidate(r"DEV@\PVOB"));
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test]
    async fn verified_resolution_consults_backend() {
        let backend = MemoryUcmBackend::new();
        let stream = backend.add_stream(r"stream:DEV@\PVOB", Default::default());
        let comp = backend.add_component(r"component:COMP@\PVOB");
        backend.add_baseline(r"baseline:BL1@\PVOB", &comp, &stream, PromotionLevel::Initial);

        let cache = EntityCache::new();
        let bl = cache
            .resolve_and_verify(&backend, r"baseline:BL1@\PVOB")
            .await
            .unwrap();
        assert_eq!(bl.short_name(), "BL1");

        let err = cache
            .resolve_and_verify(&backend, r"baseline:MISSING@\PVOB")
            .await
            .unwrap_err();
        assert!(matches!(err, UcmError::NotFound { .. }));
        assert_eq!(cache.len(), 1);
    }
}
