//! In-process storage, for tests and ephemeral managers.

use super::{encode, StorageBackend, StorageError};
use crate::entity::Entity;
use crate::record::Record;
use parking_lot::RwLock;
use provisio_types::{EntityId, EntityKind};
use std::collections::{BTreeMap, HashMap};

#[derive(Debug, Default)]
pub struct MemoryStorage {
    records: RwLock<HashMap<EntityKind, BTreeMap<EntityId, Record>>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored records of a kind
    pub fn count(&self, kind: EntityKind) -> usize {
        self.records.read().get(&kind).map(|r| r.len()).unwrap_or(0)
    }

    /// Store a raw record as-is
    pub fn insert_raw(&self, kind: EntityKind, id: EntityId, record: Record) {
        self.records.write().entry(kind).or_default().insert(id, record);
    }

    pub fn get_raw(&self, kind: EntityKind, id: &EntityId) -> Option<Record> {
        self.records.read().get(&kind).and_then(|r| r.get(id).cloned())
    }
}

impl StorageBackend for MemoryStorage {
    fn serialize_item(&self, kind: EntityKind, entity: &Entity) -> Result<(), StorageError> {
        let record = encode(entity)?;
        self.insert_raw(kind, entity.id().clone(), record);
        Ok(())
    }

    fn serialize_delete(&self, kind: EntityKind, entity: &Entity) -> Result<(), StorageError> {
        if let Some(records) = self.records.write().get_mut(&kind) {
            records.remove(entity.id());
        }
        Ok(())
    }

    fn deserialize_raw(&self, kind: EntityKind) -> Result<Vec<Record>, StorageError> {
        Ok(self
            .records
            .read()
            .get(&kind)
            .map(|r| r.values().cloned().collect())
            .unwrap_or_default())
    }

    fn deserialize_item(&self, kind: EntityKind, id: &EntityId) -> Result<Record, StorageError> {
        self.get_raw(kind, id).ok_or_else(|| StorageError::Missing {
            kind,
            id: id.clone(),
        })
    }
}
