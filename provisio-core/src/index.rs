//! Secondary indexes.
//!
//! Each collection keeps one [`IndexSet`] next to its listing. Index keys
//! are strings: scalar attributes index under their value, list attributes
//! under each member, and system interface indexes under each interface's
//! value. Empty values of ordinary indexes are kept under `""` so that
//! "no parent" is an index hit too.

use crate::config::Settings;
use crate::entity::Entity;
use crate::error::{Error, Result};
use provisio_types::{EntityId, EntityKind, Value};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

/// Where an index reads its values from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexSource {
    Name,
    Parent,
    Field(&'static str),
    /// A sub-field of every network interface; empty values are skipped
    Interface(&'static str),
}

/// Declaration of one index
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexDef {
    pub name: &'static str,
    pub source: IndexSource,
    pub unique: bool,
}

impl IndexDef {
    const fn multi(name: &'static str, source: IndexSource) -> Self {
        IndexDef {
            name,
            source,
            unique: false,
        }
    }

    const fn unique(name: &'static str, source: IndexSource) -> Self {
        IndexDef {
            name,
            source,
            unique: true,
        }
    }

    /// The keys this index holds for `entity`
    pub fn values(&self, entity: &Entity) -> Vec<String> {
        match self.source {
            IndexSource::Name => vec![entity.name().to_string()],
            IndexSource::Parent => vec![entity
                .parent()
                .map(|p| p.as_str().to_string())
                .unwrap_or_default()],
            IndexSource::Field(field) => match entity.get(field) {
                Value::List(items) if !items.is_empty() => {
                    let mut keys: Vec<String> = items.iter().map(|i| i.to_string()).collect();
                    keys.sort();
                    keys.dedup();
                    keys
                }
                Value::List(_) | Value::Null => vec![String::new()],
                other => vec![other.to_string()],
            },
            IndexSource::Interface(field) => {
                let mut keys: Vec<String> = entity
                    .interfaces()
                    .filter_map(|(_, record)| record.get(field).and_then(|v| v.as_str()))
                    .filter(|v| !v.is_empty())
                    .map(|v| v.to_string())
                    .collect();
                keys.sort();
                keys.dedup();
                keys
            }
        }
    }
}

const NAME: IndexDef = IndexDef::unique("name", IndexSource::Name);
const PARENT: IndexDef = IndexDef::multi("parent", IndexSource::Parent);

const INTERFACE_INDEXES: &[IndexDef] = &[
    IndexDef::unique("mac_address", IndexSource::Interface("mac_address")),
    IndexDef::unique("ip_address", IndexSource::Interface("ip_address")),
    IndexDef::unique("ipv6_address", IndexSource::Interface("ipv6_address")),
    IndexDef::unique("dns_name", IndexSource::Interface("dns_name")),
];

/// Index declarations of a kind, before settings are applied
pub fn declared(kind: EntityKind) -> Vec<IndexDef> {
    let field = |name: &'static str| IndexDef::multi(name, IndexSource::Field(name));
    let mut defs = vec![NAME];
    match kind {
        EntityKind::Distro => defs.push(field("arch")),
        EntityKind::Image => defs.extend([field("arch"), field("menu")]),
        EntityKind::Menu => defs.push(PARENT),
        EntityKind::Profile => defs.extend([PARENT, field("distro"), field("menu"), field("repos")]),
        EntityKind::Repo => {}
        EntityKind::System => {
            defs.extend([field("profile"), field("image")]);
            defs.extend(INTERFACE_INDEXES.iter().copied());
        }
    }
    defs
}

/// Index declarations of a kind with settings-disabled indexes removed
pub fn enabled(kind: EntityKind, settings: &Settings) -> Vec<IndexDef> {
    declared(kind)
        .into_iter()
        .filter(|def| match def.source {
            IndexSource::Interface(field) => settings.interface_index_enabled(field),
            _ => true,
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Entries {
    Unique(HashMap<String, EntityId>),
    Multi(HashMap<String, HashSet<EntityId>>),
}

/// One index: key to owning id(s)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Index {
    def: IndexDef,
    entries: Entries,
}

impl Index {
    fn new(def: IndexDef) -> Self {
        let entries = if def.unique {
            Entries::Unique(HashMap::new())
        } else {
            Entries::Multi(HashMap::new())
        };
        Index { def, entries }
    }

    pub fn def(&self) -> &IndexDef {
        &self.def
    }

    pub fn lookup(&self, key: &str) -> HashSet<EntityId> {
        match &self.entries {
            Entries::Unique(map) => map.get(key).cloned().into_iter().collect(),
            Entries::Multi(map) => map.get(key).cloned().unwrap_or_default(),
        }
    }

    /// Owner of `key` other than `id`, for unique indexes
    fn conflict(&self, key: &str, id: &EntityId) -> Option<&EntityId> {
        match &self.entries {
            Entries::Unique(map) => map.get(key).filter(|owner| *owner != id),
            Entries::Multi(_) => None,
        }
    }

    fn insert(&mut self, key: String, id: &EntityId) {
        match &mut self.entries {
            Entries::Unique(map) => {
                map.insert(key, id.clone());
            }
            Entries::Multi(map) => {
                map.entry(key).or_default().insert(id.clone());
            }
        }
    }

    fn remove(&mut self, key: &str, id: &EntityId) {
        match &mut self.entries {
            Entries::Unique(map) => {
                if map.get(key) == Some(id) {
                    map.remove(key);
                }
            }
            Entries::Multi(map) => {
                if let Some(ids) = map.get_mut(key) {
                    ids.remove(id);
                    if ids.is_empty() {
                        map.remove(key);
                    }
                }
            }
        }
    }

    pub fn len(&self) -> usize {
        match &self.entries {
            Entries::Unique(map) => map.len(),
            Entries::Multi(map) => map.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// All indexes of one collection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexSet {
    kind: EntityKind,
    indexes: Vec<Index>,
}

impl IndexSet {
    pub fn new(kind: EntityKind, defs: Vec<IndexDef>) -> Self {
        IndexSet {
            kind,
            indexes: defs.into_iter().map(Index::new).collect(),
        }
    }

    pub fn for_settings(kind: EntityKind, settings: &Settings) -> Self {
        Self::new(kind, enabled(kind, settings))
    }

    /// Same declarations, no entries
    pub fn empty_like(&self) -> Self {
        Self::new(self.kind, self.defs())
    }

    pub fn defs(&self) -> Vec<IndexDef> {
        self.indexes.iter().map(|i| i.def).collect()
    }

    pub fn get(&self, name: &str) -> Option<&Index> {
        self.indexes.iter().find(|i| i.def.name == name)
    }

    /// Reject `entity` if it would collide in a unique index
    pub fn check_unique(&self, entity: &Entity) -> Result<()> {
        for index in self.indexes.iter().filter(|i| i.def.unique) {
            for key in index.def.values(entity) {
                if let Some(owner) = index.conflict(&key, entity.id()) {
                    return Err(if index.def.source == IndexSource::Name {
                        Error::DuplicateName {
                            kind: self.kind,
                            name: key,
                        }
                    } else {
                        Error::DuplicateValue {
                            kind: self.kind,
                            index: index.def.name.to_string(),
                            value: key,
                            owner: owner.to_string(),
                        }
                    });
                }
            }
        }
        Ok(())
    }

    /// Insert every index entry of `entity`
    pub fn add_to_index(&mut self, entity: &Entity) {
        for index in &mut self.indexes {
            for key in index.def.values(entity) {
                index.insert(key, entity.id());
            }
        }
        tracing::debug!(kind = %self.kind, id = %entity.id(), "indexed");
    }

    /// Remove every index entry of `entity`
    pub fn remove_from_index(&mut self, entity: &Entity) {
        for index in &mut self.indexes {
            for key in index.def.values(entity) {
                index.remove(&key, entity.id());
            }
        }
        tracing::debug!(kind = %self.kind, id = %entity.id(), "unindexed");
    }

    /// Move one index's entries for `id` from `old` keys to `new` keys
    pub fn update_index(&mut self, id: &EntityId, index: &str, old: &[String], new: &[String]) {
        let Some(index) = self.indexes.iter_mut().find(|i| i.def.name == index) else {
            return;
        };
        for key in old.iter().filter(|k| !new.contains(k)) {
            index.remove(key, id);
        }
        for key in new.iter().filter(|k| !old.contains(k)) {
            index.insert(key.clone(), id);
        }
    }

    /// Move every index entry that differs between two versions of an entity
    pub fn update(&mut self, old: &Entity, new: &Entity) {
        let moves: Vec<(&'static str, Vec<String>, Vec<String>)> = self
            .indexes
            .iter()
            .map(|i| (i.def.name, i.def.values(old), i.def.values(new)))
            .filter(|(_, before, after)| before != after)
            .collect();
        for (name, before, after) in moves {
            tracing::debug!(kind = %self.kind, id = %new.id(), index = name, "index moved");
            self.update_index(new.id(), name, &before, &after);
        }
    }

    /// Answer exact-match predicates from indexes.
    ///
    /// Keys answered here are removed from `criteria`; the caller must
    /// still apply the remaining ones. Returns `None` when no key was
    /// recognized, otherwise the intersection of the matches (possibly
    /// empty).
    pub fn find_by_index(&self, criteria: &mut BTreeMap<String, String>) -> Option<HashSet<EntityId>> {
        let mut result: Option<HashSet<EntityId>> = None;
        let keys: Vec<String> = criteria.keys().cloned().collect();

        for key in keys {
            let Some(index) = self.get(&key) else {
                continue;
            };
            let Some(term) = criteria.get(&key) else {
                continue;
            };
            if !is_exact_term(term, index.def.source) {
                continue;
            }
            let term = match index.def.name {
                "mac_address" => term.to_lowercase(),
                _ => term.clone(),
            };
            let hits = index.lookup(&term);
            criteria.remove(&key);
            result = Some(match result {
                None => hits,
                Some(acc) => acc.intersection(&hits).cloned().collect(),
            });
        }
        result
    }

    /// Rebuild every index from the listing and compare
    pub fn verify<'a>(&self, listing: impl IntoIterator<Item = &'a Arc<Entity>>) -> Result<()> {
        let mut expected = self.empty_like();
        for entity in listing {
            expected.add_to_index(entity);
        }
        for (actual, wanted) in self.indexes.iter().zip(&expected.indexes) {
            if actual != wanted {
                return Err(Error::invariant(format!(
                    "{} index '{}' disagrees with the listing",
                    self.kind, actual.def.name
                )));
            }
        }
        Ok(())
    }
}

/// Whether a search term can be answered by an exact index lookup
fn is_exact_term(term: &str, source: IndexSource) -> bool {
    if term.starts_with('~') || term.contains(['*', '?', '[']) {
        return false;
    }
    match source {
        // multi-term list searches require every term, leave them to the scan
        IndexSource::Field(_) => !term.contains(|c: char| c.is_whitespace() || c == ','),
        // empty interface values are never indexed
        IndexSource::Interface(_) => !term.is_empty(),
        _ => true,
    }
}
