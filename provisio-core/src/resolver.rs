//! Inheritance resolution.
//!
//! An entity's effective configuration is the fold of its resolution chain,
//! global settings first and the entity itself last:
//!
//! - scalars replace, except that an inherited value keeps what came before
//! - lists are appended and de-duplicated, first occurrence wins
//! - maps merge key by key, then `!key` tombstones delete `key`
//! - sticky fields keep the first non-empty value
//!
//! Kind-specific post-processing runs afterwards through [`ResolveHook`]s.

use crate::entity::{Attrs, Entity};
use crate::error::{Error, Result};
use crate::schema;
use provisio_types::{EntityKind, Value};
use std::cmp::Reverse;
use std::sync::Arc;

/// Access to the entities above and around the one being resolved
pub trait Lineage {
    /// The next entity up the resolution chain, if any
    fn logical_parent(&self, entity: &Entity) -> Result<Option<Arc<Entity>>>;

    /// A fully loaded entity by name
    fn lookup(&self, kind: EntityKind, name: &str) -> Result<Option<Arc<Entity>>>;

    /// Upper bound on the length of any ancestor chain
    fn population(&self) -> usize;
}

/// How much of the chain a resolution covers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    /// The entity merged onto global settings only
    Own,
    /// Every ancestor
    Full,
}

/// Ancestors of `entity`, immediate parent first.
///
/// A chain longer than the number of stored entities can only come from a
/// cycle and is reported as an invariant violation.
pub fn ancestors(entity: &Entity, lineage: &dyn Lineage) -> Result<Vec<Arc<Entity>>> {
    let bound = lineage.population();
    let mut chain: Vec<Arc<Entity>> = Vec::new();
    let mut next = lineage.logical_parent(entity)?;
    while let Some(parent) = next {
        if chain.len() >= bound {
            return Err(Error::invariant(format!(
                "ancestor chain of {} '{}' exceeds {} entities",
                entity.kind(),
                entity.name(),
                bound
            )));
        }
        next = lineage.logical_parent(&parent)?;
        chain.push(parent);
    }
    Ok(chain)
}

/// Resolve the effective configuration of `entity`
pub fn resolve(entity: &Entity, scope: Scope, settings: &Attrs, lineage: &dyn Lineage) -> Result<Attrs> {
    let mut chain: Vec<(Option<EntityKind>, Attrs)> = vec![(None, settings.clone())];
    if scope == Scope::Full {
        let ancestors = ancestors(entity, lineage)?;
        chain.extend(ancestors.iter().rev().map(|a| (Some(a.kind()), a.node())));
    }
    chain.push((Some(entity.kind()), entity.node()));

    let mut results = blend(&chain);
    for hook in hooks(entity.kind()) {
        if scope == Scope::Own && hook.needs_lookup() {
            continue;
        }
        hook.apply(entity, &mut results, lineage)?;
    }
    Ok(results)
}

/// Fold a resolution chain into one attribute map
pub fn blend(chain: &[(Option<EntityKind>, Attrs)]) -> Attrs {
    let mut results = Attrs::new();
    for (kind, node) in chain {
        for (key, value) in node {
            if value.is_inherit() {
                if !results.contains_key(key) {
                    results.insert(key.clone(), fallback(*kind, key));
                }
                continue;
            }
            match results.get_mut(key) {
                None => {
                    results.insert(key.clone(), value.clone());
                }
                Some(acc) => merge(key, acc, value),
            }
        }
        for value in results.values_mut() {
            if let Value::Map(map) = value {
                remove_tombstones(map);
            }
        }
    }
    results
}

fn fallback(kind: Option<EntityKind>, key: &str) -> Value {
    kind.and_then(|k| schema::field(k, key))
        .map(|f| f.default_value())
        .unwrap_or(Value::Null)
}

fn merge(key: &str, acc: &mut Value, value: &Value) {
    match (acc, value) {
        (Value::Map(acc), Value::Map(new)) => {
            for (k, v) in new {
                acc.insert(k.clone(), v.clone());
            }
        }
        (Value::List(acc), Value::List(new)) => {
            for item in new {
                if !acc.contains(item) {
                    acc.push(item.clone());
                }
            }
        }
        (acc, value) => {
            if schema::is_sticky(key) && !acc.is_empty() {
                return;
            }
            *acc = value.clone();
        }
    }
}

/// Delete every `!key` entry together with `key`
pub fn remove_tombstones(map: &mut std::collections::BTreeMap<String, Value>) {
    let tombstones: Vec<String> = map
        .keys()
        .filter(|k| k.len() > 1 && k.starts_with('!'))
        .cloned()
        .collect();
    for tombstone in tombstones {
        map.remove(&tombstone[1..]);
        map.remove(&tombstone);
    }
}

const FLATTEN_MAPS: &[&str] = &[
    "kernel_options",
    "kernel_options_post",
    "autoinstall_meta",
    "template_files",
    "environment",
    "yumopts",
];
const FLATTEN_LISTS: &[&str] = &["repos", "rpm_list"];

/// Render option maps as `k=v` strings and repo lists as space separated strings
pub fn flatten(mut results: Attrs) -> Attrs {
    for (key, value) in results.iter_mut() {
        let flat = match value {
            Value::Map(_) => FLATTEN_MAPS.contains(&key.as_str()),
            Value::List(_) => FLATTEN_LISTS.contains(&key.as_str()),
            _ => false,
        };
        if flat {
            *value = Value::Str(value.to_string());
        }
    }
    results
}

/// Post-processing step run after the chain is folded
pub trait ResolveHook: Sync {
    fn name(&self) -> &'static str;

    /// Hooks that consult other entities are skipped for own-scope resolutions
    fn needs_lookup(&self) -> bool {
        false
    }

    fn apply(&self, entity: &Entity, results: &mut Attrs, lineage: &dyn Lineage) -> Result<()>;
}

/// Exposes `field_ifname` for every interface sub-field
struct InterfaceKeys;

impl ResolveHook for InterfaceKeys {
    fn name(&self) -> &'static str {
        "interface_keys"
    }

    fn apply(&self, entity: &Entity, results: &mut Attrs, _: &dyn Lineage) -> Result<()> {
        for (ifname, record) in entity.interfaces() {
            for (field, value) in record {
                results.insert(format!("{}_{}", field, ifname), value.clone());
            }
        }
        Ok(())
    }
}

/// Attaches the full record of every repository in `repos`, highest priority first
struct RepoData;

impl ResolveHook for RepoData {
    fn name(&self) -> &'static str {
        "repo_data"
    }

    fn needs_lookup(&self) -> bool {
        true
    }

    fn apply(&self, _: &Entity, results: &mut Attrs, lineage: &dyn Lineage) -> Result<()> {
        let names: Vec<String> = results
            .get("repos")
            .and_then(|v| v.as_list())
            .unwrap_or_default()
            .iter()
            .filter_map(|v| v.as_str().map(str::to_string))
            .collect();

        let mut repos = Vec::new();
        for name in names {
            if let Some(repo) = lineage.lookup(EntityKind::Repo, &name)? {
                repos.push(repo.node());
            }
        }
        repos.sort_by_key(|r| Reverse(r.get("priority").and_then(|p| p.as_int()).unwrap_or(0)));

        results.insert(
            "repo_data".into(),
            Value::List(repos.into_iter().map(Value::Map).collect()),
        );
        Ok(())
    }
}

/// `http_server`: the server, with the port unless it is 80
struct HttpServer;

impl ResolveHook for HttpServer {
    fn name(&self) -> &'static str {
        "http_server"
    }

    fn apply(&self, _: &Entity, results: &mut Attrs, _: &dyn Lineage) -> Result<()> {
        let server = results
            .get("server")
            .map(|v| v.to_string())
            .unwrap_or_default();
        let port = results.get("http_port").and_then(|v| v.as_int()).unwrap_or(80);
        let http_server = if port == 80 {
            server
        } else {
            format!("{}:{}", server, port)
        };
        results.insert("http_server".into(), Value::Str(http_server));
        Ok(())
    }
}

/// Convenience names for templates: `system_name`, `profile_name`, ...
struct TemplateNames;

impl ResolveHook for TemplateNames {
    fn name(&self) -> &'static str {
        "template_names"
    }

    fn apply(&self, entity: &Entity, results: &mut Attrs, _: &dyn Lineage) -> Result<()> {
        let get = |results: &Attrs, key: &str| {
            results
                .get(key)
                .map(|v| v.to_string())
                .unwrap_or_default()
        };
        let name = entity.name().to_string();
        let na = || Value::str("N/A");

        match entity.kind() {
            EntityKind::System => {
                results.insert("system_name".into(), Value::Str(name));
                let profile = get(&*results, "profile");
                results.insert("profile_name".into(), Value::Str(profile));
                let distro = get(&*results, "distro");
                if !distro.is_empty() {
                    results.insert("distro_name".into(), Value::Str(distro));
                } else {
                    let image = get(&*results, "image");
                    results.insert("distro_name".into(), na());
                    results.insert("image_name".into(), Value::Str(image));
                }
            }
            EntityKind::Profile => {
                results.insert("profile_name".into(), Value::Str(name));
                let distro = get(&*results, "distro");
                results.insert("distro_name".into(), Value::Str(distro));
            }
            EntityKind::Distro => {
                results.insert("distro_name".into(), Value::Str(name));
            }
            EntityKind::Image => {
                results.insert("distro_name".into(), na());
                results.insert("image_name".into(), Value::Str(name));
            }
            EntityKind::Repo | EntityKind::Menu => {}
        }
        Ok(())
    }
}

static SYSTEM_HOOKS: &[&dyn ResolveHook] = &[&InterfaceKeys, &RepoData, &HttpServer, &TemplateNames];
static PROFILE_HOOKS: &[&dyn ResolveHook] = &[&RepoData, &HttpServer, &TemplateNames];
static DEFAULT_HOOKS: &[&dyn ResolveHook] = &[&HttpServer, &TemplateNames];

/// Post-processing capabilities of a kind
pub fn hooks(kind: EntityKind) -> &'static [&'static dyn ResolveHook] {
    match kind {
        EntityKind::System => SYSTEM_HOOKS,
        EntityKind::Profile => PROFILE_HOOKS,
        _ => DEFAULT_HOOKS,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use provisio_types::EntityId;
    use std::collections::HashMap;

    /// A fixed set of entities linked by name
    #[derive(Default)]
    struct Fixture {
        entities: HashMap<(EntityKind, String), Arc<Entity>>,
        cyclic: bool,
    }

    impl Fixture {
        fn add(&mut self, entity: Entity) -> Arc<Entity> {
            let entity = Arc::new(entity);
            self.entities
                .insert((entity.kind(), entity.name().to_string()), entity.clone());
            entity
        }
    }

    impl Lineage for Fixture {
        fn logical_parent(&self, entity: &Entity) -> Result<Option<Arc<Entity>>> {
            if self.cyclic {
                return Ok(Some(Arc::new(entity.clone())));
            }
            for (field, kind) in crate::graph::upward_links(entity.kind()) {
                let name = entity.get_str(field);
                if !name.is_empty() {
                    return Ok(self.entities.get(&(*kind, name.to_string())).cloned());
                }
            }
            Ok(None)
        }

        fn lookup(&self, kind: EntityKind, name: &str) -> Result<Option<Arc<Entity>>> {
            Ok(self.entities.get(&(kind, name.to_string())).cloned())
        }

        fn population(&self) -> usize {
            self.entities.len()
        }
    }

    fn opts(pairs: &[(&str, Value)]) -> Value {
        Value::map(pairs.iter().cloned())
    }

    fn chain(nodes: Vec<Attrs>) -> Vec<(Option<EntityKind>, Attrs)> {
        nodes.into_iter().map(|n| (Some(EntityKind::Profile), n)).collect()
    }

    fn node(pairs: &[(&str, Value)]) -> Attrs {
        pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
    }

    #[test]
    fn test_map_override() {
        let a = node(&[("opts", opts(&[("a", Value::Int(1)), ("b", Value::Int(2))]))]);
        let c = node(&[("opts", opts(&[("b", Value::Int(3))]))]);

        let results = blend(&chain(vec![a, c]));
        assert_eq!(
            results["opts"],
            opts(&[("a", Value::Int(1)), ("b", Value::Int(3))])
        );
    }

    #[test]
    fn test_tombstone_removes_inherited_key() {
        let a = node(&[("opts", opts(&[("a", Value::Int(1)), ("b", Value::Int(2))]))]);
        let c = node(&[("opts", opts(&[("!b", Value::Null)]))]);

        let results = blend(&chain(vec![a, c]));
        assert_eq!(results["opts"], opts(&[("a", Value::Int(1))]));
    }

    #[test]
    fn test_list_union_preserves_order() {
        let a = node(&[("tags", Value::str_list(["x", "y"]))]);
        let c = node(&[("tags", Value::str_list(["y", "z"]))]);

        let results = blend(&chain(vec![a, c]));
        assert_eq!(results["tags"], Value::str_list(["x", "y", "z"]));
    }

    #[test]
    fn test_inherit_keeps_ancestor_value() {
        let a = node(&[("virt_ram", Value::Int(2048))]);
        let c = node(&[("virt_ram", Value::Inherit)]);

        assert_eq!(blend(&chain(vec![a, c]))["virt_ram"], Value::Int(2048));
    }

    #[test]
    fn test_inherit_without_ancestor_uses_field_default() {
        let c = node(&[("virt_ram", Value::Inherit), ("custom", Value::Inherit)]);

        let results = blend(&chain(vec![c]));
        assert_eq!(results["virt_ram"], Value::Int(512));
        assert_eq!(results["custom"], Value::Null);
    }

    #[test]
    fn test_sticky_keeps_first_non_empty() {
        let a = node(&[("distro", Value::str(""))]);
        let b = node(&[("distro", Value::str("f40"))]);
        let c = node(&[("distro", Value::str("f39"))]);

        assert_eq!(blend(&chain(vec![a, b, c]))["distro"], Value::str("f40"));
    }

    #[test]
    fn test_flatten() {
        let results = node(&[
            ("kernel_options", opts(&[("quiet", Value::Null), ("console", Value::str("ttyS0"))])),
            ("repos", Value::str_list(["base", "updates"])),
            ("owners", Value::str_list(["admin"])),
        ]);
        let flat = flatten(results);

        assert_eq!(flat["kernel_options"], Value::str("console=ttyS0 quiet"));
        assert_eq!(flat["repos"], Value::str("base updates"));
        assert_eq!(flat["owners"], Value::str_list(["admin"]));
    }

    #[test]
    fn test_full_resolution_through_profile_and_distro() {
        let mut fixture = Fixture::default();
        fixture.add(
            Entity::new(EntityKind::Distro, "f40")
                .unwrap()
                .with("kernel_options", "quiet console=tty0")
                .unwrap(),
        );
        fixture.add(
            Entity::new(EntityKind::Repo, "low")
                .unwrap()
                .with("priority", Value::Int(10))
                .unwrap(),
        );
        fixture.add(
            Entity::new(EntityKind::Repo, "high")
                .unwrap()
                .with("priority", Value::Int(90))
                .unwrap(),
        );
        fixture.add(
            Entity::new(EntityKind::Profile, "web")
                .unwrap()
                .with("distro", "f40")
                .unwrap()
                .with("repos", "low high")
                .unwrap()
                .with("kernel_options", "!quiet")
                .unwrap(),
        );
        let system = Entity::new(EntityKind::System, "web01")
            .unwrap()
            .with("profile", "web")
            .unwrap()
            .with(
                "interfaces",
                Value::map([("eth0", Value::map([("ip_address", Value::str("10.0.0.7"))]))]),
            )
            .unwrap();

        let mut settings = Attrs::new();
        settings.insert("server".into(), Value::str("boot.example.org"));
        settings.insert("http_port".into(), Value::Int(8080));

        let results = resolve(&system, Scope::Full, &settings, &fixture).unwrap();

        assert_eq!(results["kernel_options"].to_string(), "console=tty0");
        assert_eq!(results["ip_address_eth0"], Value::str("10.0.0.7"));
        assert_eq!(results["http_server"], Value::str("boot.example.org:8080"));
        assert_eq!(results["distro_name"], Value::str("f40"));
        assert_eq!(results["profile_name"], Value::str("web"));
        assert_eq!(results["system_name"], Value::str("web01"));

        let repo_names: Vec<String> = results["repo_data"]
            .as_list()
            .unwrap()
            .iter()
            .map(|r| r.as_map().unwrap()["name"].to_string())
            .collect();
        assert_eq!(repo_names, vec!["high", "low"]);
    }

    #[test]
    fn test_own_scope_skips_ancestors_and_lookups() {
        let mut fixture = Fixture::default();
        fixture.add(
            Entity::new(EntityKind::Distro, "f40")
                .unwrap()
                .with("kernel_options", "quiet")
                .unwrap(),
        );
        let profile = fixture.add(
            Entity::new(EntityKind::Profile, "web")
                .unwrap()
                .with("distro", "f40")
                .unwrap(),
        );

        let own = resolve(&profile, Scope::Own, &Attrs::new(), &fixture).unwrap();

        assert_eq!(own["kernel_options"], Value::Map(Default::default()));
        assert!(!own.contains_key("repo_data"));
    }

    #[test]
    fn test_cycle_is_invariant_violation() {
        let mut fixture = Fixture {
            cyclic: true,
            ..Fixture::default()
        };
        let mut menu = Entity::new(EntityKind::Menu, "loop").unwrap();
        menu.id = EntityId::new("m1");
        let menu = fixture.add(menu);

        let err = ancestors(&menu, &fixture).unwrap_err();
        assert!(matches!(err, Error::InvariantViolation(_)));
    }
}
