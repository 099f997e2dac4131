//! Storage backends.
//!
//! The engine only talks to storage through [`StorageBackend`]. Writes must
//! be atomic per item: a concurrent load sees the old record or the new
//! one, never a torn file.

mod file;
mod memory;

pub use file::FileStorage;
pub use memory::MemoryStorage;

use crate::entity::Entity;
use crate::record::Record;
use provisio_types::{EntityId, EntityKind};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("IO error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Record in {path} has id '{found}', expected '{expected}'")]
    Mismatch {
        path: PathBuf,
        expected: String,
        found: String,
    },

    #[error("No stored {kind} with id '{id}'")]
    Missing { kind: EntityKind, id: EntityId },

    #[error("Could not encode {kind} '{name}': {reason}")]
    Encode {
        kind: EntityKind,
        name: String,
        reason: String,
    },

    #[error("Backend error: {0}")]
    Backend(String),
}

impl StorageError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        StorageError::Io {
            path: path.into(),
            source,
        }
    }
}

/// Persistence contract for collections
pub trait StorageBackend: Send + Sync + fmt::Debug {
    /// Write one entity; idempotent and atomic per item
    fn serialize_item(&self, kind: EntityKind, entity: &Entity) -> Result<(), StorageError>;

    /// Delete one entity's record; deleting a missing record is not an error
    fn serialize_delete(&self, kind: EntityKind, entity: &Entity) -> Result<(), StorageError>;

    /// Write every entity of a collection
    fn serialize_all(&self, kind: EntityKind, entities: &[Arc<Entity>]) -> Result<(), StorageError> {
        for entity in entities {
            self.serialize_item(kind, entity)?;
        }
        Ok(())
    }

    /// All stored records of a kind
    fn deserialize_raw(&self, kind: EntityKind) -> Result<Vec<Record>, StorageError>;

    /// One stored record, for filling in a lazy stub
    fn deserialize_item(&self, kind: EntityKind, id: &EntityId) -> Result<Record, StorageError>;
}

/// Encode an entity for storage
pub(crate) fn encode(entity: &Entity) -> Result<Record, StorageError> {
    crate::record::to_record(entity).map_err(|e| StorageError::Encode {
        kind: entity.kind(),
        name: entity.name().to_string(),
        reason: e.to_string(),
    })
}
