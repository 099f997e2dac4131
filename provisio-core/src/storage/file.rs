//! One JSON file per entity under `<root>/<kind plural>/<id>.json`.

use super::{encode, StorageBackend, StorageError};
use crate::config::Settings;
use crate::entity::Entity;
use crate::record::Record;
use provisio_types::{EntityId, EntityKind};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

#[derive(Debug, Clone)]
pub struct FileStorage {
    root: PathBuf,
    pretty: bool,
}

impl FileStorage {
    pub fn new(root: impl Into<PathBuf>, pretty: bool) -> Self {
        Self {
            root: root.into(),
            pretty,
        }
    }

    /// Storage rooted where the settings point
    pub fn from_settings(settings: &Settings) -> Self {
        Self::new(settings.storage_root(), settings.storage.pretty_json)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn kind_dir(&self, kind: EntityKind) -> PathBuf {
        self.root.join(kind.plural())
    }

    fn item_path(&self, kind: EntityKind, id: &EntityId) -> PathBuf {
        self.kind_dir(kind).join(format!("{}.json", id))
    }

    fn read_record(&self, path: &Path) -> Result<Record, StorageError> {
        let contents = fs::read_to_string(path).map_err(|e| StorageError::io(path, e))?;
        let record: Record = serde_json::from_str(&contents)?;

        let expected = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        let found = record
            .get("id")
            .or_else(|| record.get("uid"))
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string();
        if found != expected {
            return Err(StorageError::Mismatch {
                path: path.to_path_buf(),
                expected,
                found,
            });
        }
        Ok(record)
    }
}

impl StorageBackend for FileStorage {
    fn serialize_item(&self, kind: EntityKind, entity: &Entity) -> Result<(), StorageError> {
        let dir = self.kind_dir(kind);
        fs::create_dir_all(&dir).map_err(|e| StorageError::io(&dir, e))?;

        let record = encode(entity)?;
        let bytes = if self.pretty {
            serde_json::to_vec_pretty(&record)?
        } else {
            serde_json::to_vec(&record)?
        };

        // write beside the target, then rename over it
        let path = self.item_path(kind, entity.id());
        let mut tmp = NamedTempFile::new_in(&dir).map_err(|e| StorageError::io(&dir, e))?;
        tmp.write_all(&bytes).map_err(|e| StorageError::io(tmp.path(), e))?;
        tmp.as_file()
            .sync_all()
            .map_err(|e| StorageError::io(tmp.path(), e))?;
        tmp.persist(&path)
            .map_err(|e| StorageError::io(&path, e.error))?;

        tracing::debug!(kind = %kind, id = %entity.id(), path = %path.display(), "wrote record");
        Ok(())
    }

    fn serialize_delete(&self, kind: EntityKind, entity: &Entity) -> Result<(), StorageError> {
        let path = self.item_path(kind, entity.id());
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StorageError::io(&path, e)),
        }
    }

    fn deserialize_raw(&self, kind: EntityKind) -> Result<Vec<Record>, StorageError> {
        let dir = self.kind_dir(kind);
        if !dir.exists() {
            return Ok(Vec::new());
        }

        let mut paths = Vec::new();
        for entry in fs::read_dir(&dir).map_err(|e| StorageError::io(&dir, e))? {
            let path = entry.map_err(|e| StorageError::io(&dir, e))?.path();
            if path.extension().map(|ext| ext == "json").unwrap_or(false) {
                paths.push(path);
            }
        }
        paths.sort();

        paths.iter().map(|p| self.read_record(p)).collect()
    }

    fn deserialize_item(&self, kind: EntityKind, id: &EntityId) -> Result<Record, StorageError> {
        let path = self.item_path(kind, id);
        if !path.exists() {
            return Err(StorageError::Missing {
                kind,
                id: id.clone(),
            });
        }
        self.read_record(&path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn distro(id: &str, name: &str) -> Entity {
        let mut entity = Entity::new(EntityKind::Distro, name).unwrap();
        entity.id = EntityId::new(id);
        entity
    }

    #[test]
    fn test_write_read_delete() {
        let dir = TempDir::new().unwrap();
        let storage = FileStorage::new(dir.path(), true);

        storage.serialize_item(EntityKind::Distro, &distro("d1", "f40")).unwrap();
        storage.serialize_item(EntityKind::Distro, &distro("d2", "f41")).unwrap();
        assert!(dir.path().join("distros").join("d1.json").exists());

        let records = storage.deserialize_raw(EntityKind::Distro).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0]["name"], "f40");

        storage.serialize_delete(EntityKind::Distro, &distro("d1", "f40")).unwrap();
        storage.serialize_delete(EntityKind::Distro, &distro("d1", "f40")).unwrap();
        assert_eq!(storage.deserialize_raw(EntityKind::Distro).unwrap().len(), 1);
    }

    #[test]
    fn test_overwrite_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let storage = FileStorage::new(dir.path(), false);
        let entity = distro("d1", "f40");

        storage.serialize_item(EntityKind::Distro, &entity).unwrap();
        storage.serialize_item(EntityKind::Distro, &entity).unwrap();

        let files: Vec<_> = fs::read_dir(dir.path().join("distros")).unwrap().collect();
        assert_eq!(files.len(), 1);
    }

    #[test]
    fn test_id_mismatch_rejected() {
        let dir = TempDir::new().unwrap();
        let storage = FileStorage::new(dir.path(), true);
        storage.serialize_item(EntityKind::Distro, &distro("d1", "f40")).unwrap();
        fs::rename(
            dir.path().join("distros/d1.json"),
            dir.path().join("distros/other.json"),
        )
        .unwrap();

        let err = storage.deserialize_raw(EntityKind::Distro).unwrap_err();
        assert!(matches!(err, StorageError::Mismatch { .. }));
    }

    #[test]
    fn test_missing_item() {
        let dir = TempDir::new().unwrap();
        let storage = FileStorage::new(dir.path(), true);

        let err = storage
            .deserialize_item(EntityKind::Repo, &EntityId::new("nope"))
            .unwrap_err();
        assert!(matches!(err, StorageError::Missing { .. }));
        assert!(storage.deserialize_raw(EntityKind::Repo).unwrap().is_empty());
    }
}
