//! Typed, indexed entity containers.
//!
//! A [`Collection`] owns the listing of one entity kind together with its
//! [`IndexSet`]. Both live behind a single lock so no reader ever sees one
//! updated without the other. Cross-collection work (reference checks,
//! cascades) is driven by the manager, which takes several of these locks
//! in kind order.

use crate::cache::ResolutionCache;
use crate::entity::Entity;
use crate::error::{Error, Result};
use crate::index::IndexSet;
use crate::matching::{self, Criteria};
use crate::record;
use crate::storage::StorageBackend;
use chrono::Utc;
use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use provisio_types::{EntityId, EntityKind};
use std::collections::HashMap;
use std::sync::Arc;

/// Listing and indexes, always updated together
#[derive(Debug)]
pub(crate) struct CollectionState {
    kind: EntityKind,
    listing: HashMap<EntityId, Arc<Entity>>,
    indexes: IndexSet,
    /// Lazy stubs not yet replaced by their full record
    pending: usize,
}

impl CollectionState {
    fn new(kind: EntityKind, indexes: IndexSet) -> Self {
        CollectionState {
            kind,
            listing: HashMap::new(),
            indexes,
            pending: 0,
        }
    }

    pub(crate) fn get(&self, id: &EntityId) -> Option<&Arc<Entity>> {
        self.listing.get(id)
    }

    pub(crate) fn by_name(&self, name: &str) -> Option<&Arc<Entity>> {
        let ids = self.indexes.get("name")?.lookup(name);
        ids.iter().next().and_then(|id| self.listing.get(id))
    }

    /// Entities filed under `key` in `index`, ordered by name
    pub(crate) fn lookup(&self, index: &str, key: &str) -> Vec<Arc<Entity>> {
        let Some(index) = self.indexes.get(index) else {
            return Vec::new();
        };
        let mut found: Vec<Arc<Entity>> = index
            .lookup(key)
            .iter()
            .filter_map(|id| self.listing.get(id).cloned())
            .collect();
        found.sort_by(|a, b| a.name().cmp(b.name()));
        found
    }

    pub(crate) fn len(&self) -> usize {
        self.listing.len()
    }

    /// Reject `entity` if it would collide in a unique index
    pub(crate) fn check(&self, entity: &Entity) -> Result<()> {
        self.indexes.check_unique(entity)
    }

    /// Whether `parent` is `id` or sits below it
    pub(crate) fn would_cycle(&self, id: &EntityId, parent: &EntityId) -> bool {
        let mut next = Some(parent);
        let mut steps = 0;
        while let Some(current) = next {
            if current == id {
                return true;
            }
            steps += 1;
            if steps > self.listing.len() {
                return true;
            }
            next = self.listing.get(current).and_then(|e| e.parent());
        }
        false
    }

    pub(crate) fn insert(&mut self, entity: Arc<Entity>) -> Result<()> {
        if self.listing.contains_key(entity.id()) {
            return Err(Error::invariant(format!(
                "{} id '{}' inserted twice",
                self.kind,
                entity.id()
            )));
        }
        self.indexes.check_unique(&entity)?;
        self.indexes.add_to_index(&entity);
        if !entity.is_loaded() {
            self.pending += 1;
        }
        self.listing.insert(entity.id().clone(), entity);
        Ok(())
    }

    /// Swap in a new version of a stored entity, moving its index entries
    pub(crate) fn replace(&mut self, entity: Arc<Entity>) -> Result<Arc<Entity>> {
        let Some(old) = self.listing.get(entity.id()).cloned() else {
            return Err(Error::invariant(format!(
                "{} id '{}' replaced while absent",
                self.kind,
                entity.id()
            )));
        };
        self.indexes.check_unique(&entity)?;
        self.indexes.update(&old, &entity);
        match (old.is_loaded(), entity.is_loaded()) {
            (false, true) => self.pending -= 1,
            (true, false) => self.pending += 1,
            _ => {}
        }
        self.listing.insert(entity.id().clone(), entity);
        Ok(old)
    }

    pub(crate) fn remove(&mut self, id: &EntityId) -> Option<Arc<Entity>> {
        let entity = self.listing.remove(id)?;
        self.indexes.remove_from_index(&entity);
        if !entity.is_loaded() {
            self.pending -= 1;
        }
        Some(entity)
    }
}

/// All entities of one kind
#[derive(Debug)]
pub struct Collection {
    kind: EntityKind,
    state: RwLock<CollectionState>,
    storage: Arc<dyn StorageBackend>,
    cache: Arc<ResolutionCache>,
}

impl Collection {
    pub fn new(
        kind: EntityKind,
        indexes: IndexSet,
        storage: Arc<dyn StorageBackend>,
        cache: Arc<ResolutionCache>,
    ) -> Self {
        Collection {
            kind,
            state: RwLock::new(CollectionState::new(kind, indexes)),
            storage,
            cache,
        }
    }

    pub fn kind(&self) -> EntityKind {
        self.kind
    }

    pub fn len(&self) -> usize {
        self.state.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub(crate) fn read(&self) -> RwLockReadGuard<'_, CollectionState> {
        self.state.read()
    }

    pub(crate) fn write(&self) -> RwLockWriteGuard<'_, CollectionState> {
        self.state.write()
    }

    pub fn get(&self, id: &EntityId) -> Option<Arc<Entity>> {
        self.state.read().get(id).cloned()
    }

    pub fn find_by_name(&self, name: &str) -> Option<Arc<Entity>> {
        self.state.read().by_name(name).cloned()
    }

    /// Every entity, ordered by name
    pub fn all(&self) -> Vec<Arc<Entity>> {
        let mut all: Vec<Arc<Entity>> = self.state.read().listing.values().cloned().collect();
        all.sort_by(|a, b| a.name().cmp(b.name()));
        all
    }

    /// Same-kind children of `id`, ordered by name
    pub fn children(&self, id: &EntityId) -> Result<Vec<Arc<Entity>>> {
        self.load_pending()?;
        Ok(self.state.read().lookup("parent", id.as_str()))
    }

    /// Insert an entity.
    ///
    /// Assigns an id when the entity has none and stamps timestamps when
    /// persisting. The record is written before the in-memory insert, so a
    /// storage failure leaves the collection untouched. With
    /// `check_duplicate_name` on, both the name and the id must be free.
    /// With it off, an entity whose id is already stored replaces the
    /// stored version; a different entity with the same name is still
    /// rejected by the name index.
    pub fn add(&self, mut entity: Entity, persist: bool, check_duplicate_name: bool) -> Result<Arc<Entity>> {
        if entity.kind() != self.kind {
            return Err(Error::validation(
                self.kind,
                "kind",
                format!("cannot store a {} here", entity.kind()),
            ));
        }
        if entity.id().is_empty() {
            entity.id = EntityId::generate();
        }
        if persist {
            entity.touch(Utc::now());
        }

        let mut state = self.state.write();
        if let Some(parent_id) = entity.parent().cloned() {
            if state.would_cycle(entity.id(), &parent_id) {
                return Err(Error::CyclicParent {
                    kind: self.kind,
                    name: entity.name().to_string(),
                    parent: parent_id.to_string(),
                });
            }
            let parent = state
                .get(&parent_id)
                .ok_or_else(|| Error::not_found(self.kind, parent_id.as_str()))?;
            entity.depth = parent.depth() + 1;
        }
        if check_duplicate_name && state.by_name(entity.name()).is_some() {
            return Err(Error::DuplicateName {
                kind: self.kind,
                name: entity.name().to_string(),
            });
        }
        if check_duplicate_name && state.get(entity.id()).is_some() {
            return Err(Error::validation(
                self.kind,
                "id",
                format!("id '{}' is already in use", entity.id()),
            ));
        }

        let entity = Arc::new(entity);
        state.check(&entity)?;
        if persist {
            self.storage.serialize_item(self.kind, &entity)?;
        }
        let replaced = if state.get(entity.id()).is_some() {
            state.replace(Arc::clone(&entity))?;
            true
        } else {
            state.insert(Arc::clone(&entity))?;
            false
        };
        drop(state);

        if replaced {
            self.cache.invalidate_all();
        }
        tracing::debug!(kind = %self.kind, id = %entity.id(), name = entity.name(), replaced, "added");
        Ok(entity)
    }

    /// The entity with its full record, fetching it if it is a lazy stub
    pub fn get_loaded(&self, id: &EntityId) -> Result<Arc<Entity>> {
        let current = self
            .get(id)
            .ok_or_else(|| Error::not_found(self.kind, id.as_str()))?;
        if current.is_loaded() {
            return Ok(current);
        }

        let record = self.storage.deserialize_item(self.kind, id)?;
        let full = Arc::new(record::from_record(self.kind, record)?);
        if full.id() != id {
            return Err(Error::invariant(format!(
                "{} record for '{}' carries id '{}'",
                self.kind,
                id,
                full.id()
            )));
        }

        let mut state = self.state.write();
        match state.get(id) {
            None => return Err(Error::not_found(self.kind, id.as_str())),
            // another reader got there first
            Some(existing) if existing.is_loaded() => return Ok(Arc::clone(existing)),
            Some(_) => {
                state.replace(Arc::clone(&full))?;
            }
        }
        tracing::debug!(kind = %self.kind, id = %id, "loaded deferred record");
        Ok(full)
    }

    /// Replace every remaining stub with its full record
    pub fn load_pending(&self) -> Result<usize> {
        let stubs: Vec<EntityId> = {
            let state = self.state.read();
            if state.pending == 0 {
                return Ok(0);
            }
            state
                .listing
                .values()
                .filter(|e| !e.is_loaded())
                .map(|e| e.id().clone())
                .collect()
        };
        for id in &stubs {
            self.get_loaded(id)?;
        }
        tracing::info!(kind = %self.kind, count = stubs.len(), "loaded deferred records");
        Ok(stubs.len())
    }

    /// Every entity matching all criteria, ordered by name.
    ///
    /// Exact terms on indexed fields are answered from the index set; the
    /// remaining terms are checked against each candidate.
    pub fn find(&self, criteria: Criteria) -> Result<Vec<Arc<Entity>>> {
        let mut criteria = matching::rekey(criteria);
        matching::validate_keys(self.kind, &criteria)?;
        self.load_pending()?;

        let candidates: Vec<Arc<Entity>> = {
            let state = self.state.read();
            match state.indexes.find_by_index(&mut criteria) {
                Some(ids) => ids.iter().filter_map(|id| state.get(id).cloned()).collect(),
                None => state.listing.values().cloned().collect(),
            }
        };

        let mut found = Vec::new();
        for entity in candidates {
            if matching::matches(&entity, &criteria)? {
                found.push(entity);
            }
        }
        found.sort_by(|a, b| a.name().cmp(b.name()));
        Ok(found)
    }

    /// The single match, if any; more than one match is an error
    pub fn find_one(&self, criteria: Criteria) -> Result<Option<Arc<Entity>>> {
        let mut found = self.find(criteria)?;
        match found.len() {
            0 | 1 => Ok(found.pop()),
            n => Err(Error::InvalidQuery(format!(
                "{} {}s matched where one was expected",
                n, self.kind
            ))),
        }
    }

    /// Index-only lookup.
    ///
    /// Consumes the criteria an index can answer and returns their
    /// matches, or `None` when no criterion was indexable. Stubs are
    /// loaded first so deferred fields are filed.
    pub fn find_by_index(&self, criteria: &mut Criteria) -> Result<Option<Vec<Arc<Entity>>>> {
        self.load_pending()?;
        let state = self.state.read();
        let ids = match state.indexes.find_by_index(criteria) {
            Some(ids) => ids,
            None => return Ok(None),
        };
        let mut found: Vec<Arc<Entity>> = ids.iter().filter_map(|id| state.get(id).cloned()).collect();
        found.sort_by(|a, b| a.name().cmp(b.name()));
        Ok(Some(found))
    }

    /// Ids filed under `key` in the named index
    pub fn ids_by_index(&self, index: &str, key: &str) -> Result<Vec<EntityId>> {
        self.load_pending()?;
        let state = self.state.read();
        let mut ids: Vec<EntityId> = state
            .indexes
            .get(index)
            .map(|i| i.lookup(key).into_iter().collect())
            .unwrap_or_default();
        ids.sort();
        Ok(ids)
    }

    /// Recompute every index from the listing and compare
    pub fn verify_indexes(&self) -> Result<()> {
        let state = self.state.read();
        state.indexes.verify(state.listing.values())?;
        let stubs = state.listing.values().filter(|e| !e.is_loaded()).count();
        if stubs != state.pending {
            return Err(Error::invariant(format!(
                "{} collection counts {} stubs, listing holds {}",
                self.kind, state.pending, stubs
            )));
        }
        Ok(())
    }

    /// Switch to a new index declaration set, keeping the old one on conflict
    pub(crate) fn rebuild_indexes(&self, mut indexes: IndexSet) -> Result<()> {
        let mut state = self.state.write();
        let mut entities: Vec<&Arc<Entity>> = state.listing.values().collect();
        entities.sort_by(|a, b| a.name().cmp(b.name()));
        for entity in entities {
            indexes.check_unique(entity)?;
            indexes.add_to_index(entity);
        }
        state.indexes = indexes;
        tracing::debug!(kind = %self.kind, "rebuilt indexes");
        Ok(())
    }

    pub(crate) fn index_defs(&self) -> Vec<crate::index::IndexDef> {
        self.state.read().indexes.defs()
    }

    /// Drop every entity without touching storage
    pub(crate) fn clear(&self) {
        let mut state = self.state.write();
        state.listing.clear();
        state.indexes = state.indexes.empty_like();
        state.pending = 0;
    }
}
