//! Provisioning entities.

use crate::error::{Error, Result};
use crate::schema;
use chrono::{DateTime, Utc};
use provisio_types::{EntityId, EntityKind, Value};
use std::collections::BTreeMap;
use std::fmt;

/// An attribute bag
pub type Attrs = BTreeMap<String, Value>;

static NULL: Value = Value::Null;

/// Identity of an entity across collections
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntityRef {
    pub kind: EntityKind,
    pub id: EntityId,
}

impl EntityRef {
    pub fn new(kind: EntityKind, id: EntityId) -> Self {
        Self { kind, id }
    }
}

impl fmt::Display for EntityRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind, self.id)
    }
}

/// A single provisioning object
///
/// Entities are plain values. Stored entities are shared as `Arc<Entity>`
/// and never mutated in place: updates clone, modify and hand the new
/// version back to the owning collection, which moves its index entries.
#[derive(Debug, Clone, PartialEq)]
pub struct Entity {
    pub(crate) id: EntityId,
    pub(crate) kind: EntityKind,
    pub(crate) name: String,
    pub(crate) parent: Option<EntityId>,
    pub(crate) depth: u32,
    pub(crate) created_at: Option<DateTime<Utc>>,
    pub(crate) modified_at: Option<DateTime<Utc>>,
    pub(crate) attrs: Attrs,
    /// False for lazy-start stubs carrying only identity, name and depth
    pub(crate) loaded: bool,
}

/// A validated attribute change, reported by setters
#[derive(Debug, Clone, PartialEq)]
pub struct FieldChange {
    pub field: String,
    pub old: Value,
    pub new: Value,
}

impl FieldChange {
    pub fn is_noop(&self) -> bool {
        self.old == self.new
    }
}

impl Entity {
    /// A new, unsaved entity with every field at its initial value.
    ///
    /// The id stays empty until the entity is added to a collection.
    pub fn new(kind: EntityKind, name: impl Into<String>) -> Result<Self> {
        let name = name.into();
        schema::validate_name(kind, &name)?;
        Ok(Entity {
            id: EntityId::new(""),
            kind,
            name,
            parent: None,
            depth: 0,
            created_at: None,
            modified_at: None,
            attrs: schema::initial_attrs(kind),
            loaded: true,
        })
    }

    /// Builder-style setter
    pub fn with(mut self, field: &str, value: impl Into<Value>) -> Result<Self> {
        self.set(field, value.into())?;
        Ok(self)
    }

    /// Builder-style parent assignment (checked when the entity is added)
    pub fn with_parent(mut self, parent: EntityId) -> Result<Self> {
        if !schema::supports_parent(self.kind) {
            return Err(Error::validation(
                self.kind,
                "parent",
                format!("{} entities have no parent", self.kind),
            ));
        }
        self.parent = Some(parent);
        Ok(self)
    }

    pub fn id(&self) -> &EntityId {
        &self.id
    }

    pub fn kind(&self) -> EntityKind {
        self.kind
    }

    pub fn entity_ref(&self) -> EntityRef {
        EntityRef::new(self.kind, self.id.clone())
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn parent(&self) -> Option<&EntityId> {
        self.parent.as_ref()
    }

    pub fn depth(&self) -> u32 {
        self.depth
    }

    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        self.created_at
    }

    pub fn modified_at(&self) -> Option<DateTime<Utc>> {
        self.modified_at
    }

    pub fn attrs(&self) -> &Attrs {
        &self.attrs
    }

    pub fn is_loaded(&self) -> bool {
        self.loaded
    }

    /// The stored value of a field, `Null` when absent
    pub fn get(&self, field: &str) -> &Value {
        self.attrs.get(field).unwrap_or(&NULL)
    }

    /// The stored value of a string field, empty when unset or not a string
    pub fn get_str(&self, field: &str) -> &str {
        self.get(field).as_str().unwrap_or("")
    }

    /// Validate and store a field value.
    ///
    /// On error the entity is left untouched. The returned change tells the
    /// owning collection which index entries to move.
    pub fn set(&mut self, field: &str, value: Value) -> Result<FieldChange> {
        match field {
            "name" | "parent" | "id" | "depth" => {
                return Err(Error::validation(
                    self.kind,
                    field,
                    "structural fields change through rename and set_parent",
                ))
            }
            _ => {}
        }
        let new = schema::validate(self.kind, field, value)?;
        let old = self.attrs.insert(field.to_string(), new.clone()).unwrap_or(Value::Null);
        Ok(FieldChange {
            field: field.to_string(),
            old,
            new,
        })
    }

    /// Network interfaces of a system, by interface name
    pub fn interfaces(&self) -> impl Iterator<Item = (&str, &BTreeMap<String, Value>)> {
        self.get("interfaces")
            .as_map()
            .into_iter()
            .flat_map(|m| m.iter())
            .filter_map(|(name, record)| record.as_map().map(|r| (name.as_str(), r)))
    }

    /// The entity's own node in a resolution chain: attributes plus name
    pub fn node(&self) -> Attrs {
        let mut node = self.attrs.clone();
        node.insert("name".into(), Value::str(self.name.clone()));
        node
    }

    pub(crate) fn set_name(&mut self, name: String) -> Result<()> {
        schema::validate_name(self.kind, &name)?;
        self.name = name;
        Ok(())
    }

    pub(crate) fn touch(&mut self, now: DateTime<Utc>) {
        if self.created_at.is_none() {
            self.created_at = Some(now);
        }
        self.modified_at = Some(now);
    }

    /// Clear network identity so a copy does not collide with its source
    pub(crate) fn clear_network_identity(&mut self) {
        let Some(Value::Map(interfaces)) = self.attrs.get_mut("interfaces") else {
            return;
        };
        for record in interfaces.values_mut() {
            if let Value::Map(fields) = record {
                for key in ["mac_address", "ip_address", "ipv6_address", "dns_name"] {
                    fields.insert(key.to_string(), Value::str(""));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_entity_starts_inherited() {
        let profile = Entity::new(EntityKind::Profile, "web").unwrap();

        assert!(profile.id().is_empty());
        assert_eq!(profile.get("kernel_options"), &Value::Inherit);
        assert_eq!(profile.get("dhcp_tag"), &Value::str(""));
        assert_eq!(profile.get("nonexistent"), &Value::Null);
    }

    #[test]
    fn test_failed_set_keeps_old_value() {
        let mut repo = Entity::new(EntityKind::Repo, "base").unwrap();
        repo.set("priority", Value::Int(10)).unwrap();

        assert!(repo.set("priority", Value::Int(500)).is_err());
        assert_eq!(repo.get("priority"), &Value::Int(10));
    }

    #[test]
    fn test_set_reports_change() {
        let mut distro = Entity::new(EntityKind::Distro, "f40").unwrap();
        let change = distro.set("arch", Value::str("aarch64")).unwrap();

        assert_eq!(change.old, Value::str("x86_64"));
        assert_eq!(change.new, Value::str("aarch64"));
        assert!(!change.is_noop());
    }

    #[test]
    fn test_structural_fields_rejected() {
        let mut distro = Entity::new(EntityKind::Distro, "f40").unwrap();
        assert!(distro.set("name", Value::str("other")).is_err());
        assert!(Entity::new(EntityKind::Distro, "f40")
            .unwrap()
            .with_parent(EntityId::new("x"))
            .is_err());
    }

    #[test]
    fn test_clear_network_identity() {
        let mut system = Entity::new(EntityKind::System, "web01")
            .unwrap()
            .with(
                "interfaces",
                Value::map([(
                    "eth0",
                    Value::map([
                        ("mac_address", Value::str("aa:bb:cc:dd:ee:ff")),
                        ("netmask", Value::str("255.255.255.0")),
                    ]),
                )]),
            )
            .unwrap();

        system.clear_network_identity();
        let (_, eth0) = system.interfaces().next().unwrap();
        assert_eq!(eth0["mac_address"], Value::str(""));
        assert_eq!(eth0["netmask"], Value::str("255.255.255.0"));
    }
}
