//! Shared types for provisio
//!
//! This crate provides the vocabulary shared across the provisio crates:
//! entity identifiers, entity kinds and the attribute value model,
//! including the inherit sentinel.

use serde::de::{self, MapAccess, SeqAccess, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Serialized form of [`Value::Inherit`].
pub const INHERIT: &str = "<<inherit>>";

/// Entity identifier
///
/// Assigned once, stable across renames and never reused.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityId(pub String);

impl EntityId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Fresh random identifier (UUID v4, simple hex form)
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().simple().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for EntityId {
    fn from(id: &str) -> Self {
        EntityId(id.to_string())
    }
}

/// The kind of a provisioning entity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    /// Boot image (kernel + initrd)
    Distro,
    /// Package repository
    Repo,
    /// Boot menu
    Menu,
    /// Standalone boot image
    Image,
    /// Install profile
    Profile,
    /// Target machine
    System,
}

impl EntityKind {
    /// All kinds, in the order collections are loaded.
    ///
    /// Referenced kinds come before the kinds that reference them.
    pub const ALL: [EntityKind; 6] = [
        EntityKind::Distro,
        EntityKind::Repo,
        EntityKind::Menu,
        EntityKind::Image,
        EntityKind::Profile,
        EntityKind::System,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Distro => "distro",
            EntityKind::Repo => "repo",
            EntityKind::Menu => "menu",
            EntityKind::Image => "image",
            EntityKind::Profile => "profile",
            EntityKind::System => "system",
        }
    }

    /// Plural name, used for storage directories
    pub fn plural(&self) -> &'static str {
        match self {
            EntityKind::Distro => "distros",
            EntityKind::Repo => "repos",
            EntityKind::Menu => "menus",
            EntityKind::Image => "images",
            EntityKind::Profile => "profiles",
            EntityKind::System => "systems",
        }
    }

    /// Position in [`EntityKind::ALL`]; also the lock acquisition order.
    pub fn ordinal(&self) -> usize {
        match self {
            EntityKind::Distro => 0,
            EntityKind::Repo => 1,
            EntityKind::Menu => 2,
            EntityKind::Image => 3,
            EntityKind::Profile => 4,
            EntityKind::System => 5,
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when parsing an unknown kind name
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownKind(pub String);

impl fmt::Display for UnknownKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown entity kind '{}'", self.0)
    }
}

impl std::error::Error for UnknownKind {}

impl FromStr for EntityKind {
    type Err = UnknownKind;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "distro" | "distros" => Ok(EntityKind::Distro),
            "repo" | "repos" => Ok(EntityKind::Repo),
            "menu" | "menus" => Ok(EntityKind::Menu),
            "image" | "images" => Ok(EntityKind::Image),
            "profile" | "profiles" => Ok(EntityKind::Profile),
            "system" | "systems" => Ok(EntityKind::System),
            _ => Err(UnknownKind(s.to_string())),
        }
    }
}

/// An attribute value
///
/// Scalars, ordered lists and string-keyed maps. `Inherit` is the
/// sentinel meaning "use the resolved ancestor value here"; it is
/// serialized as the string `<<inherit>>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub enum Value {
    #[default]
    Null,
    Inherit,
    Bool(bool),
    Int(i64),
    Str(String),
    List(Vec<Value>),
    Map(BTreeMap<String, Value>),
}

impl Value {
    pub fn str(s: impl Into<String>) -> Self {
        Value::Str(s.into())
    }

    /// Build a list of strings
    pub fn str_list<I, S>(items: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Value::List(items.into_iter().map(|s| Value::Str(s.into())).collect())
    }

    /// Build a map from key/value pairs
    pub fn map<I, K>(entries: I) -> Self
    where
        I: IntoIterator<Item = (K, Value)>,
        K: Into<String>,
    {
        Value::Map(entries.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }

    pub fn is_inherit(&self) -> bool {
        matches!(self, Value::Inherit)
    }

    /// Null, the empty string, and empty collections count as unset.
    pub fn is_empty(&self) -> bool {
        match self {
            Value::Null => true,
            Value::Str(s) => s.is_empty(),
            Value::List(l) => l.is_empty(),
            Value::Map(m) => m.is_empty(),
            _ => false,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(l) => Some(l),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&BTreeMap<String, Value>> {
        match self {
            Value::Map(m) => Some(m),
            _ => None,
        }
    }

    /// Short type name used in validation messages
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Inherit => "inherit",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Str(_) => "string",
            Value::List(_) => "list",
            Value::Map(_) => "map",
        }
    }
}

/// Flat textual rendering: lists are space separated, maps become `k=v`.
impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => Ok(()),
            Value::Inherit => f.write_str(INHERIT),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Int(i) => write!(f, "{}", i),
            Value::Str(s) => f.write_str(s),
            Value::List(items) => {
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(" ")?;
                    }
                    write!(f, "{}", item)?;
                }
                Ok(())
            }
            Value::Map(map) => {
                for (i, (key, value)) in map.iter().enumerate() {
                    if i > 0 {
                        f.write_str(" ")?;
                    }
                    match value {
                        Value::Null => f.write_str(key)?,
                        Value::List(items) => {
                            // repeated keys, e.g. console=tty0 console=ttyS0
                            for (j, item) in items.iter().enumerate() {
                                if j > 0 {
                                    f.write_str(" ")?;
                                }
                                write!(f, "{}={}", key, item)?;
                            }
                        }
                        other => write!(f, "{}={}", key, other)?,
                    }
                }
                Ok(())
            }
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Str(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Str(s)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Value::List(items)
    }
}

impl From<BTreeMap<String, Value>> for Value {
    fn from(map: BTreeMap<String, Value>) -> Self {
        Value::Map(map)
    }
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Value::Null => serializer.serialize_unit(),
            Value::Inherit => serializer.serialize_str(INHERIT),
            Value::Bool(b) => serializer.serialize_bool(*b),
            Value::Int(i) => serializer.serialize_i64(*i),
            Value::Str(s) => serializer.serialize_str(s),
            Value::List(items) => items.serialize(serializer),
            Value::Map(map) => map.serialize(serializer),
        }
    }
}

struct ValueVisitor;

impl<'de> Visitor<'de> for ValueVisitor {
    type Value = Value;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a null, bool, integer, string, list or map")
    }

    fn visit_unit<E: de::Error>(self) -> Result<Value, E> {
        Ok(Value::Null)
    }

    fn visit_none<E: de::Error>(self) -> Result<Value, E> {
        Ok(Value::Null)
    }

    fn visit_some<D: Deserializer<'de>>(self, deserializer: D) -> Result<Value, D::Error> {
        Value::deserialize(deserializer)
    }

    fn visit_bool<E: de::Error>(self, b: bool) -> Result<Value, E> {
        Ok(Value::Bool(b))
    }

    fn visit_i64<E: de::Error>(self, i: i64) -> Result<Value, E> {
        Ok(Value::Int(i))
    }

    fn visit_u64<E: de::Error>(self, u: u64) -> Result<Value, E> {
        i64::try_from(u)
            .map(Value::Int)
            .map_err(|_| E::custom(format!("integer {} out of range", u)))
    }

    fn visit_f64<E: de::Error>(self, f: f64) -> Result<Value, E> {
        Err(E::custom(format!(
            "floating point attribute values are not supported ({})",
            f
        )))
    }

    fn visit_str<E: de::Error>(self, s: &str) -> Result<Value, E> {
        if s == INHERIT {
            Ok(Value::Inherit)
        } else {
            Ok(Value::Str(s.to_string()))
        }
    }

    fn visit_string<E: de::Error>(self, s: String) -> Result<Value, E> {
        if s == INHERIT {
            Ok(Value::Inherit)
        } else {
            Ok(Value::Str(s))
        }
    }

    fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<Value, A::Error> {
        let mut items = Vec::with_capacity(seq.size_hint().unwrap_or(0));
        while let Some(item) = seq.next_element::<Value>()? {
            items.push(item);
        }
        Ok(Value::List(items))
    }

    fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Value, A::Error> {
        let mut map = BTreeMap::new();
        while let Some((key, value)) = access.next_entry::<String, Value>()? {
            map.insert(key, value);
        }
        Ok(Value::Map(map))
    }
}

impl<'de> Deserialize<'de> for Value {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Value, D::Error> {
        deserializer.deserialize_any(ValueVisitor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_round_trip() {
        for kind in EntityKind::ALL {
            assert_eq!(kind.as_str().parse::<EntityKind>().unwrap(), kind);
            assert_eq!(kind.plural().parse::<EntityKind>().unwrap(), kind);
        }
        assert!("printer".parse::<EntityKind>().is_err());
    }

    #[test]
    fn test_generated_ids_are_distinct() {
        let a = EntityId::generate();
        let b = EntityId::generate();
        assert_ne!(a, b);
        assert_eq!(a.as_str().len(), 32);
    }

    #[test]
    fn test_inherit_sentinel_serialization() {
        let json = serde_json::to_string(&Value::Inherit).unwrap();
        assert_eq!(json, "\"<<inherit>>\"");

        let parsed: Value = serde_json::from_str(&json).unwrap();
        assert!(parsed.is_inherit());
    }

    #[test]
    fn test_nested_value_deserialization() {
        let parsed: Value =
            serde_json::from_str(r#"{"opts": {"a": 1, "!b": null}, "tags": ["x", true]}"#)
                .unwrap();

        let map = parsed.as_map().unwrap();
        let opts = map["opts"].as_map().unwrap();
        assert_eq!(opts["a"], Value::Int(1));
        assert_eq!(opts["!b"], Value::Null);
        assert_eq!(
            map["tags"],
            Value::List(vec![Value::str("x"), Value::Bool(true)])
        );
    }

    #[test]
    fn test_floats_rejected() {
        assert!(serde_json::from_str::<Value>("1.5").is_err());
    }

    #[test]
    fn test_display_flattening() {
        let opts = Value::map([
            ("console", Value::str_list(["tty0", "ttyS0"])),
            ("quiet", Value::Null),
            ("root", Value::str("/dev/sda")),
        ]);
        assert_eq!(
            opts.to_string(),
            "console=tty0 console=ttyS0 quiet root=/dev/sda"
        );
        assert_eq!(Value::str_list(["a", "b"]).to_string(), "a b");
    }
}
