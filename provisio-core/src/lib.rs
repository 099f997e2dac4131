//! # provisio-core
//!
//! Collection and inheritance resolution engine for provisioning entities.
//!
//! This crate provides the typed, indexed store of distros, profiles,
//! systems, repos, images and menus, the dependency-aware rename and
//! remove cascades over it, and the resolver that folds an entity's
//! ancestor chain into its effective configuration.
//!
//! ```rust,ignore
//! use provisio_core::{CollectionManager, Entity, Settings};
//! use provisio_types::EntityKind;
//!
//! let manager = CollectionManager::in_memory(Settings::default());
//! let distro = manager.add(Entity::new(EntityKind::Distro, "f40")?)?;
//! let resolved = manager.resolve(EntityKind::Distro, distro.id())?;
//! ```

pub mod cache;
pub mod collection;
pub mod config;
pub mod entity;
pub mod error;
pub mod graph;
pub mod index;
pub mod manager;
pub mod matching;
pub mod record;
pub mod resolver;
pub mod schema;
pub mod storage;

pub use cache::ResolutionCache;
pub use collection::Collection;
pub use config::{ConfigError, Settings, StorageConfig};
pub use entity::{Attrs, Entity, EntityRef, FieldChange};
pub use error::{Error, Result};
pub use index::{IndexDef, IndexSet, IndexSource};
pub use manager::CollectionManager;
pub use matching::Criteria;
pub use resolver::{Lineage, Scope};
pub use storage::{FileStorage, MemoryStorage, StorageBackend, StorageError};

pub use provisio_incremental::{MetricsSnapshot, Slot};
pub use provisio_types::{EntityId, EntityKind, Value, INHERIT};
