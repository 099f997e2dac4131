//! Search predicate matching.
//!
//! Criteria are string terms keyed by field name, compared against an
//! entity's own (unresolved) attributes. A leading `~` negates a term.

use crate::entity::Entity;
use crate::error::{Error, Result};
use crate::schema;
use globset::Glob;
use provisio_types::{EntityKind, Value};
use std::collections::BTreeMap;

/// Field name to search term
pub type Criteria = BTreeMap<String, String>;

/// Map legacy search keys onto current field names
pub fn rekey(criteria: Criteria) -> Criteria {
    criteria
        .into_iter()
        .map(|(key, term)| {
            let key = match key.as_str() {
                "kopts" => "kernel_options".to_string(),
                "kopts_post" => "kernel_options_post".to_string(),
                "ks_meta" => "autoinstall_meta".to_string(),
                "kickstart" => "autoinstall".to_string(),
                "inherit" => "parent".to_string(),
                "ip" => "ip_address".to_string(),
                "mac" => "mac_address".to_string(),
                "dhcp-tag" => "dhcp_tag".to_string(),
                "netboot-enabled" => "netboot_enabled".to_string(),
                other => other.replace("virt-", "virt_"),
            };
            let term = if key == "mac_address" {
                term.to_lowercase()
            } else {
                term
            };
            (key, term)
        })
        .collect()
}

/// Reject search keys that name no field of `kind`
pub fn validate_keys(kind: EntityKind, criteria: &Criteria) -> Result<()> {
    if criteria.is_empty() {
        return Err(Error::InvalidQuery("no search criteria given".into()));
    }
    for key in criteria.keys() {
        let known = matches!(key.as_str(), "name" | "id" | "parent")
            || schema::field(kind, key).is_some()
            || (schema::is_interface_field(key) && schema::field(kind, "interfaces").is_some());
        if !known {
            return Err(Error::InvalidQuery(format!("{} has no field '{}'", kind, key)));
        }
    }
    Ok(())
}

/// Whether `entity` satisfies every criterion
pub fn matches(entity: &Entity, criteria: &Criteria) -> Result<bool> {
    for (key, term) in criteria {
        if !matches_one(entity, key, term)? {
            return Ok(false);
        }
    }
    Ok(true)
}

fn matches_one(entity: &Entity, key: &str, term: &str) -> Result<bool> {
    let (negate, term) = match term.strip_prefix('~') {
        Some(rest) => (true, rest),
        None => (false, term),
    };

    let hit = match key {
        "name" => compare_str(term, entity.name())?,
        "id" => term == entity.id().as_str(),
        "parent" => compare_str(term, entity.parent().map(|p| p.as_str()).unwrap_or(""))?,
        _ if schema::field(entity.kind(), key).is_some() => compare(term, entity.get(key))?,
        _ if schema::is_interface_field(key) && schema::field(entity.kind(), "interfaces").is_some() => {
            let mut any = false;
            for (_, record) in entity.interfaces() {
                if compare(term, record.get(key).unwrap_or(&Value::Null))? {
                    any = true;
                    break;
                }
            }
            any
        }
        _ => {
            return Err(Error::InvalidQuery(format!(
                "{} has no field '{}'",
                entity.kind(),
                key
            )))
        }
    };

    Ok(hit != negate)
}

/// Compare one search term against a stored value
pub fn compare(term: &str, value: &Value) -> Result<bool> {
    Ok(match value {
        Value::Str(s) => compare_str(term, s)?,
        Value::Null => term.is_empty(),
        Value::Inherit => term == provisio_types::INHERIT,
        Value::Bool(b) => matches!(term.to_lowercase().as_str(), "true" | "1" | "y" | "yes") == *b,
        Value::Int(i) => term.trim().parse::<i64>().map(|t| t == *i).unwrap_or(false),
        Value::List(items) => {
            let wanted = schema::input_list(term);
            wanted
                .as_list()
                .unwrap_or_default()
                .iter()
                .all(|w| items.iter().any(|item| item.to_string() == w.to_string()))
        }
        Value::Map(map) => schema::input_map(term).iter().all(|(k, wanted)| match map.get(k) {
            None => false,
            // a bare key only asks for presence
            Some(_) if matches!(wanted, Value::Null) => true,
            Some(found) => found.to_string() == wanted.to_string(),
        }),
    })
}

/// Exact comparison, or a glob when the term contains `*`, `?` or `[`
fn compare_str(term: &str, value: &str) -> Result<bool> {
    if !term.contains(['*', '?', '[']) {
        return Ok(term == value);
    }
    let glob = Glob::new(term)
        .map_err(|e| Error::InvalidQuery(format!("bad pattern '{}': {}", term, e)))?;
    Ok(glob.compile_matcher().is_match(value))
}
