//! Collection manager.
//!
//! The [`CollectionManager`] owns one [`Collection`] per entity kind, the
//! storage backend and the resolution cache. Mutations that can reach
//! across collections go through the manager: they are serialized by one
//! mutation lock and take collection write locks in kind order.

mod cascade;
mod txn;

use crate::cache::ResolutionCache;
use crate::collection::Collection;
use crate::config::Settings;
use crate::entity::{Attrs, Entity, EntityRef};
use crate::error::{Error, Result};
use crate::graph;
use crate::index::{self, IndexSet};
use crate::matching::Criteria;
use crate::record;
use crate::resolver::{self, Lineage, Scope};
use crate::schema::{self, FieldType};
use crate::storage::{FileStorage, MemoryStorage, StorageBackend};
use parking_lot::{Mutex, RwLock};
use provisio_incremental::{Change, DependencySource, MetricsSnapshot, Slot};
use provisio_types::{EntityId, EntityKind};
use std::fmt;
use std::sync::Arc;
use txn::StateAccess;

pub struct CollectionManager {
    settings: RwLock<Arc<Settings>>,
    storage: Arc<dyn StorageBackend>,
    cache: Arc<ResolutionCache>,
    /// Indexed by [`EntityKind::ordinal`]
    collections: Vec<Collection>,
    mutation: Mutex<()>,
}

impl CollectionManager {
    pub fn new(settings: Settings, storage: Arc<dyn StorageBackend>) -> Self {
        let cache = Arc::new(ResolutionCache::new(settings.cache_enabled));
        let collections = EntityKind::ALL
            .iter()
            .map(|kind| {
                Collection::new(
                    *kind,
                    IndexSet::for_settings(*kind, &settings),
                    Arc::clone(&storage),
                    Arc::clone(&cache),
                )
            })
            .collect();

        CollectionManager {
            settings: RwLock::new(Arc::new(settings)),
            storage,
            cache,
            collections,
            mutation: Mutex::new(()),
        }
    }

    /// A manager whose records live only in this process
    pub fn in_memory(settings: Settings) -> Self {
        Self::new(settings, Arc::new(MemoryStorage::new()))
    }

    /// A manager backed by JSON files under the configured storage root
    pub fn with_file_storage(settings: Settings) -> Self {
        let storage = Arc::new(FileStorage::from_settings(&settings));
        Self::new(settings, storage)
    }

    pub fn settings(&self) -> Arc<Settings> {
        Arc::clone(&self.settings.read())
    }

    pub fn storage(&self) -> &Arc<dyn StorageBackend> {
        &self.storage
    }

    pub fn cache(&self) -> &ResolutionCache {
        &self.cache
    }

    pub fn get_collection(&self, kind: EntityKind) -> &Collection {
        &self.collections[kind.ordinal()]
    }

    /// Replace the in-memory store with what storage holds.
    ///
    /// Kinds load in dependency order and records by ascending depth, so
    /// every parent is present before its children. Every record is decoded
    /// before any collection changes; if the decoded records cannot be
    /// inserted the previous contents are put back. The cache is dropped
    /// either way.
    pub fn load_all(&self) -> Result<()> {
        let _guard = self.mutation.lock();
        let lazy = self.settings().lazy_start;

        let mut decoded = Vec::with_capacity(EntityKind::ALL.len());
        for kind in EntityKind::ALL {
            let mut records = self.storage.deserialize_raw(kind)?;
            records.sort_by_key(record::depth_of);
            let mut entities = Vec::with_capacity(records.len());
            for rec in records {
                entities.push(if lazy {
                    record::stub_from_record(kind, rec)?
                } else {
                    record::from_record(kind, rec)?
                });
            }
            decoded.push((kind, entities));
        }

        let previous: Vec<(EntityKind, Vec<Entity>)> = EntityKind::ALL
            .into_iter()
            .map(|kind| {
                let mut entities: Vec<Entity> = self
                    .get_collection(kind)
                    .all()
                    .iter()
                    .map(|e| (**e).clone())
                    .collect();
                entities.sort_by_key(|e| e.depth());
                (kind, entities)
            })
            .collect();

        let outcome = self.fill_collections(decoded, lazy);
        if let Err(err) = &outcome {
            tracing::warn!(error = %err, "load failed, restoring previous contents");
            if let Err(restore) = self.fill_collections(previous, lazy) {
                tracing::error!(error = %restore, "could not restore previous contents");
            }
        }
        self.cache.invalidate_all();
        outcome
    }

    fn fill_collections(&self, contents: Vec<(EntityKind, Vec<Entity>)>, lazy: bool) -> Result<()> {
        for (kind, _) in &contents {
            self.get_collection(*kind).clear();
        }
        for (kind, entities) in contents {
            let collection = self.get_collection(kind);
            let count = entities.len();
            for entity in entities {
                collection.add(entity, false, true)?;
            }
            collection.verify_indexes()?;
            tracing::info!(kind = %kind, count, lazy, "loaded collection");
        }
        Ok(())
    }

    /// Write every entity of every collection
    pub fn save_all(&self) -> Result<()> {
        let _guard = self.mutation.lock();
        for kind in EntityKind::ALL {
            let collection = self.get_collection(kind);
            collection.load_pending()?;
            let entities = collection.all();
            self.storage.serialize_all(kind, &entities)?;
            tracing::info!(kind = %kind, count = entities.len(), "saved collection");
        }
        Ok(())
    }

    pub fn get(&self, kind: EntityKind, id: &EntityId) -> Option<Arc<Entity>> {
        self.get_collection(kind).get(id)
    }

    pub fn find_by_name(&self, kind: EntityKind, name: &str) -> Option<Arc<Entity>> {
        self.get_collection(kind).find_by_name(name)
    }

    /// The entity with its full record, loading a lazy stub if needed
    pub fn get_loaded(&self, kind: EntityKind, id: &EntityId) -> Result<Arc<Entity>> {
        self.get_collection(kind).get_loaded(id)
    }

    pub fn find_items(&self, kind: EntityKind, criteria: Criteria) -> Result<Vec<Arc<Entity>>> {
        self.get_collection(kind).find(criteria)
    }

    /// Add a new entity, checking every reference it holds
    pub fn add(&self, entity: Entity) -> Result<Arc<Entity>> {
        let _guard = self.mutation.lock();
        self.add_locked(entity)
    }

    fn add_locked(&self, mut entity: Entity) -> Result<Arc<Entity>> {
        let kind = entity.kind();
        let collection = self.get_collection(kind);
        collection.load_pending()?;

        if !entity.id().is_empty() && collection.get(entity.id()).is_some() {
            return Err(Error::validation(
                kind,
                "id",
                format!("id '{}' is already in use", entity.id()),
            ));
        }
        self.check_references(&entity)?;
        if entity.parent().is_none() {
            entity.depth = txn::link_depth(self, &entity)?;
        }

        let added = collection.add(entity, true, true)?;
        self.cache
            .invalidate(vec![Change::Modified(added.entity_ref())], self);
        tracing::info!(kind = %kind, id = %added.id(), name = added.name(), "added");
        Ok(added)
    }

    /// Clone an entity under a new name.
    ///
    /// The copy gets a fresh id; copied systems lose their network identity
    /// so they do not collide with the source.
    pub fn copy(&self, kind: EntityKind, id: &EntityId, new_name: &str) -> Result<Arc<Entity>> {
        let _guard = self.mutation.lock();
        let source = self.get_loaded(kind, id)?;

        let mut copy = (*source).clone();
        copy.id = EntityId::new("");
        copy.created_at = None;
        copy.modified_at = None;
        copy.set_name(new_name.to_string())?;
        if kind == EntityKind::System {
            copy.clear_network_identity();
        }
        self.add_locked(copy)
    }

    /// Every name reference must resolve; profiles need a distro or a
    /// parent and systems need a profile or an image
    fn check_references(&self, entity: &Entity) -> Result<()> {
        for spec in schema::fields(entity.kind()) {
            let (target, names): (EntityKind, Vec<&str>) = match spec.ty {
                FieldType::Ref(target) => (target, vec![entity.get_str(spec.name)]),
                FieldType::RefList(target) => (
                    target,
                    entity
                        .get(spec.name)
                        .as_list()
                        .unwrap_or_default()
                        .iter()
                        .filter_map(|v| v.as_str())
                        .collect(),
                ),
                _ => continue,
            };
            for name in names.into_iter().filter(|n| !n.is_empty()) {
                if self.find_by_name(target, name).is_none() {
                    return Err(Error::not_found(target, name));
                }
            }
        }

        match entity.kind() {
            EntityKind::Profile if entity.parent().is_none() && entity.get_str("distro").is_empty() => {
                Err(Error::validation(
                    EntityKind::Profile,
                    "distro",
                    "a profile needs a distro or a parent profile",
                ))
            }
            EntityKind::System if entity.get_str("profile").is_empty() && entity.get_str("image").is_empty() => {
                Err(Error::validation(
                    EntityKind::System,
                    "profile",
                    "a system needs a profile or an image",
                ))
            }
            _ => Ok(()),
        }
    }

    /// Ancestors of an entity, immediate parent first
    pub fn ancestors(&self, kind: EntityKind, id: &EntityId) -> Result<Vec<Arc<Entity>>> {
        let entity = self.get_loaded(kind, id)?;
        resolver::ancestors(&entity, self)
    }

    /// Entities that resolve directly through this one, ordered by kind then name
    pub fn children(&self, kind: EntityKind, id: &EntityId) -> Result<Vec<Arc<Entity>>> {
        let entity = self
            .get(kind, id)
            .ok_or_else(|| Error::not_found(kind, id.as_str()))?;
        self.load_pending(&EntityKind::ALL)?;
        Ok(txn::logical_children(self, &entity))
    }

    /// Effective configuration through the whole ancestor chain
    pub fn resolve(&self, kind: EntityKind, id: &EntityId) -> Result<Arc<Attrs>> {
        self.resolve_slot(kind, id, Slot::Resolved, Scope::Full)
    }

    /// The entity merged onto the settings node only
    pub fn resolve_own(&self, kind: EntityKind, id: &EntityId) -> Result<Arc<Attrs>> {
        self.resolve_slot(kind, id, Slot::Own, Scope::Own)
    }

    /// Full resolution with option maps and repo lists rendered as strings
    pub fn resolve_flat(&self, kind: EntityKind, id: &EntityId) -> Result<Attrs> {
        let resolved = self.resolve(kind, id)?;
        Ok(resolver::flatten((*resolved).clone()))
    }

    fn resolve_slot(&self, kind: EntityKind, id: &EntityId, slot: Slot, scope: Scope) -> Result<Arc<Attrs>> {
        let key = EntityRef::new(kind, id.clone());
        self.cache.get_or_compute(slot, &key, || {
            let entity = self.get_loaded(kind, id)?;
            let node = self.settings().resolution_node();
            resolver::resolve(&entity, scope, &node, self)
        })
    }

    /// Swap in new settings.
    ///
    /// Indexes whose enablement depends on settings are rebuilt; if that
    /// fails (duplicates under a newly enforced unique index) nothing
    /// changes. Every cached resolution is dropped.
    pub fn replace_settings(&self, settings: Settings) -> Result<()> {
        let _guard = self.mutation.lock();
        for kind in EntityKind::ALL {
            let collection = self.get_collection(kind);
            let defs = index::enabled(kind, &settings);
            if collection.index_defs() != defs {
                collection.load_pending()?;
                collection.rebuild_indexes(IndexSet::new(kind, defs))?;
            }
        }

        self.cache.set_enabled(settings.cache_enabled);
        *self.settings.write() = Arc::new(settings);
        self.cache.invalidate_all();
        tracing::info!("settings replaced");
        Ok(())
    }

    pub fn set_cache_enabled(&self, enabled: bool) {
        self.cache.set_enabled(enabled);
    }

    pub fn cache_stats(&self) -> MetricsSnapshot {
        self.cache.stats()
    }

    /// Total number of stored entities
    pub fn population(&self) -> usize {
        self.collections.iter().map(|c| c.len()).sum()
    }

    /// Run the index audit on every collection
    pub fn verify(&self) -> Result<()> {
        for collection in &self.collections {
            collection.verify_indexes()?;
        }
        Ok(())
    }

    /// Fill in every lazy stub of the given kinds
    fn load_pending(&self, kinds: &[EntityKind]) -> Result<()> {
        for kind in kinds {
            self.get_collection(*kind).load_pending()?;
        }
        Ok(())
    }
}

impl fmt::Debug for CollectionManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CollectionManager")
            .field("storage", &self.storage)
            .field("population", &self.population())
            .field("cache", &self.cache)
            .finish()
    }
}

impl Lineage for CollectionManager {
    fn logical_parent(&self, entity: &Entity) -> Result<Option<Arc<Entity>>> {
        if let Some(parent) = entity.parent() {
            return self.get_loaded(entity.kind(), parent).map(Some);
        }
        match graph::logical_link(entity) {
            Some((kind, name)) => {
                let linked = self
                    .find_by_name(kind, name)
                    .ok_or_else(|| Error::not_found(kind, name))?;
                self.get_loaded(kind, linked.id()).map(Some)
            }
            None => Ok(None),
        }
    }

    fn lookup(&self, kind: EntityKind, name: &str) -> Result<Option<Arc<Entity>>> {
        match self.find_by_name(kind, name) {
            Some(found) => self.get_loaded(kind, found.id()).map(Some),
            None => Ok(None),
        }
    }

    fn population(&self) -> usize {
        CollectionManager::population(self)
    }
}

impl DependencySource<EntityRef> for CollectionManager {
    fn dependents(&self, key: &EntityRef) -> Vec<EntityRef> {
        match self.get(key.kind, &key.id) {
            Some(entity) => txn::dependents(self, &entity)
                .into_iter()
                .map(|(_, dependent)| dependent.entity_ref())
                .collect(),
            None => Vec::new(),
        }
    }
}

impl StateAccess for CollectionManager {
    fn with_state<R>(&self, kind: EntityKind, f: impl FnOnce(&crate::collection::CollectionState) -> R) -> R {
        f(&*self.get_collection(kind).read())
    }
}
