//! Persisted record format.
//!
//! A record is a flat JSON object: `id`, `name`, `parent`, `depth`,
//! `created_at`, `modified_at` and one key per schema field. Loading
//! rejects unknown keys apart from a few deprecated aliases.

use crate::entity::Entity;
use crate::error::{Error, Result};
use crate::schema;
use chrono::{DateTime, TimeZone, Utc};
use provisio_types::{EntityId, EntityKind, Value};
use serde_json::{Map, Value as Json};

/// A stored record
pub type Record = Map<String, Json>;

/// Deprecated keys and their current names
const ALIASES: &[(&str, &str)] = &[
    ("ks_meta", "autoinstall_meta"),
    ("kickstart", "autoinstall"),
    ("kopts", "kernel_options"),
    ("kopts_post", "kernel_options_post"),
    ("ctime", "created_at"),
    ("mtime", "modified_at"),
    ("uid", "id"),
];

/// Keys accepted and ignored
const DROPPED: &[&str] = &["children"];

pub fn to_record(entity: &Entity) -> Result<Record> {
    let mut record = Record::new();
    record.insert("id".into(), Json::String(entity.id().to_string()));
    record.insert("name".into(), Json::String(entity.name().to_string()));
    record.insert(
        "parent".into(),
        Json::String(entity.parent().map(|p| p.to_string()).unwrap_or_default()),
    );
    record.insert("depth".into(), Json::from(entity.depth()));
    record.insert("created_at".into(), timestamp_json(entity.created_at()));
    record.insert("modified_at".into(), timestamp_json(entity.modified_at()));
    for field in schema::fields(entity.kind()) {
        let value = serde_json::to_value(entity.get(field.name)).map_err(|e| {
            Error::invariant(format!("{} '{}' field {} did not encode: {}", entity.kind(), entity.name(), field.name, e))
        })?;
        record.insert(field.name.to_string(), value);
    }
    Ok(record)
}

fn timestamp_json(ts: Option<DateTime<Utc>>) -> Json {
    ts.map(|t| Json::String(t.to_rfc3339())).unwrap_or(Json::Null)
}

/// Rewrite deprecated keys, warning once per key
fn normalize(kind: EntityKind, record: Record) -> Record {
    let mut normalized = Record::new();
    for (key, value) in record {
        if DROPPED.contains(&key.as_str()) {
            continue;
        }
        match ALIASES.iter().find(|(old, _)| *old == key) {
            Some((old, new)) => {
                tracing::warn!(kind = %kind, old, new, "remapping deprecated field");
                // the current name wins when both are present
                normalized.entry(new.to_string()).or_insert(value);
            }
            None => {
                normalized.insert(key, value);
            }
        }
    }
    normalized
}

fn required_str(kind: EntityKind, record: &Record, key: &str) -> Result<String> {
    match record.get(key) {
        Some(Json::String(s)) if !s.is_empty() => Ok(s.clone()),
        Some(Json::Number(n)) => Ok(n.to_string()),
        _ => Err(Error::validation(kind, key, "record is missing this field")),
    }
}

fn parse_timestamp(kind: EntityKind, key: &str, value: Option<&Json>) -> Result<Option<DateTime<Utc>>> {
    match value {
        None | Some(Json::Null) => Ok(None),
        Some(Json::String(s)) => DateTime::parse_from_rfc3339(s)
            .map(|t| Some(t.with_timezone(&Utc)))
            .map_err(|e| Error::validation(kind, key, e.to_string())),
        // legacy records store float seconds since the epoch
        Some(Json::Number(n)) => {
            let secs = n.as_f64().unwrap_or(0.0);
            let whole = secs.trunc() as i64;
            let nanos = ((secs - secs.trunc()) * 1e9) as u32;
            Utc.timestamp_opt(whole, nanos)
                .single()
                .map(Some)
                .ok_or_else(|| Error::validation(kind, key, format!("{} is not a valid timestamp", secs)))
        }
        Some(other) => Err(Error::validation(kind, key, format!("unexpected timestamp {}", other))),
    }
}

fn identity(kind: EntityKind, record: &Record) -> Result<Entity> {
    let id = required_str(kind, record, "id")?;
    let name = required_str(kind, record, "name")?;
    let mut entity = Entity::new(kind, name)?;
    entity.id = EntityId::new(id);
    entity.parent = match record.get("parent") {
        Some(Json::String(p)) if !p.is_empty() => {
            if !schema::supports_parent(kind) {
                return Err(Error::validation(kind, "parent", format!("{} entities have no parent", kind)));
            }
            Some(EntityId::new(p.clone()))
        }
        _ => None,
    };
    entity.depth = record
        .get("depth")
        .and_then(|d| d.as_u64())
        .and_then(|d| u32::try_from(d).ok())
        .unwrap_or(0);
    Ok(entity)
}

/// Rebuild a full entity from a record
pub fn from_record(kind: EntityKind, record: Record) -> Result<Entity> {
    let record = normalize(kind, record);
    let mut entity = identity(kind, &record)?;
    entity.created_at = parse_timestamp(kind, "created_at", record.get("created_at"))?;
    entity.modified_at = parse_timestamp(kind, "modified_at", record.get("modified_at"))?;

    for (key, json) in record {
        match key.as_str() {
            "id" | "name" | "parent" | "depth" | "created_at" | "modified_at" => continue,
            _ => {}
        }
        if schema::field(kind, &key).is_none() {
            return Err(Error::UnknownField { kind, field: key });
        }
        let value: Value = serde_json::from_value(json)
            .map_err(|e| Error::validation(kind, &key, e.to_string()))?;
        entity.set(&key, value)?;
    }
    Ok(entity)
}

/// Identity, name, parent and depth only; the rest is fetched on demand
pub fn stub_from_record(kind: EntityKind, record: Record) -> Result<Entity> {
    let record = normalize(kind, record);
    let mut entity = identity(kind, &record)?;
    entity.loaded = false;
    Ok(entity)
}

/// Record depth, used to order loads
pub fn depth_of(record: &Record) -> u64 {
    record.get("depth").and_then(|d| d.as_u64()).unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn as_record(value: Json) -> Record {
        match value {
            Json::Object(map) => map,
            _ => panic!("not an object"),
        }
    }

    #[test]
    fn test_round_trip_all_value_types() {
        let mut profile = Entity::new(EntityKind::Profile, "web")
            .unwrap()
            .with("distro", "f40")
            .unwrap()
            .with("repos", Value::str_list(["base", "updates"]))
            .unwrap()
            .with("kernel_options", "quiet console=tty0 console=ttyS0 !nomodeset")
            .unwrap()
            .with("virt_cpus", Value::Int(4))
            .unwrap()
            .with("enable_menu", false)
            .unwrap()
            .with("virt_ram", Value::Inherit)
            .unwrap();
        profile.id = EntityId::new("p1");
        profile.parent = Some(EntityId::new("p0"));
        profile.depth = 2;
        profile.touch(Utc.timestamp_opt(1_700_000_000, 0).unwrap());

        let record = to_record(&profile).unwrap();
        let text = serde_json::to_string(&record).unwrap();
        let back = from_record(EntityKind::Profile, serde_json::from_str(&text).unwrap()).unwrap();

        assert_eq!(back, profile);
        assert_eq!(record["virt_ram"], json!("<<inherit>>"));
    }

    #[test]
    fn test_unknown_key_rejected() {
        let record = as_record(json!({"id": "d1", "name": "f40", "colour": "red"}));
        let err = from_record(EntityKind::Distro, record).unwrap_err();
        assert!(matches!(err, Error::UnknownField { ref field, .. } if field == "colour"));
    }

    #[test]
    fn test_deprecated_aliases_remapped() {
        let record = as_record(json!({
            "uid": "d1",
            "name": "f40",
            "ks_meta": {"tree": "http://mirror/f40"},
            "kopts": "quiet",
            "ctime": 1700000000.5,
            "children": ["ignored"],
        }));
        let distro = from_record(EntityKind::Distro, record).unwrap();

        assert_eq!(distro.id().as_str(), "d1");
        assert_eq!(distro.get("autoinstall_meta").to_string(), "tree=http://mirror/f40");
        assert_eq!(distro.get("kernel_options").to_string(), "quiet");
        assert_eq!(distro.created_at().unwrap().timestamp(), 1_700_000_000);
    }

    #[test]
    fn test_invalid_value_rejected() {
        let record = as_record(json!({"id": "r1", "name": "base", "priority": 500}));
        assert!(matches!(
            from_record(EntityKind::Repo, record),
            Err(Error::Validation { .. })
        ));
    }

    #[test]
    fn test_stub_keeps_identity_only() {
        let record = as_record(json!({"id": "s1", "name": "web01", "depth": 2, "profile": "web"}));
        let stub = stub_from_record(EntityKind::System, record).unwrap();

        assert!(!stub.is_loaded());
        assert_eq!(stub.depth(), 2);
        assert_eq!(stub.get_str("profile"), "");
    }
}
