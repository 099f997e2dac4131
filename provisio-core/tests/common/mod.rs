//! Shared fixtures for the provisio-core integration tests

#![allow(dead_code)]

use provisio_core::{CollectionManager, Criteria, Entity, EntityKind, Value};
use std::sync::Arc;

/// distro f40 <- profile base <- profile web <- system web01
pub struct Tree {
    pub distro: Arc<Entity>,
    pub base: Arc<Entity>,
    pub web: Arc<Entity>,
    pub system: Arc<Entity>,
}

pub fn build_tree(manager: &CollectionManager) -> Tree {
    let distro = manager
        .add(
            Entity::new(EntityKind::Distro, "f40")
                .unwrap()
                .with("owners", Value::str_list(["x", "y"]))
                .unwrap(),
        )
        .unwrap();

    let base = manager
        .add(
            Entity::new(EntityKind::Profile, "base")
                .unwrap()
                .with("distro", "f40")
                .unwrap()
                .with(
                    "kernel_options",
                    Value::map([("a", Value::str("1")), ("b", Value::str("2"))]),
                )
                .unwrap(),
        )
        .unwrap();

    let web = manager
        .add(
            Entity::new(EntityKind::Profile, "web")
                .unwrap()
                .with_parent(base.id().clone())
                .unwrap()
                .with("kernel_options", Value::map([("b", Value::str("3"))]))
                .unwrap()
                .with("owners", Value::str_list(["y", "z"]))
                .unwrap(),
        )
        .unwrap();

    let system = manager
        .add(
            Entity::new(EntityKind::System, "web01")
                .unwrap()
                .with("profile", "web")
                .unwrap()
                .with("interfaces", interface("eth0", "AA:BB:CC:DD:EE:01", "10.0.0.11"))
                .unwrap(),
        )
        .unwrap();

    Tree {
        distro,
        base,
        web,
        system,
    }
}

pub fn interface(name: &str, mac: &str, ip: &str) -> Value {
    Value::map([(
        name,
        Value::map([
            ("mac_address", Value::str(mac)),
            ("ip_address", Value::str(ip)),
        ]),
    )])
}

pub fn criteria(pairs: &[(&str, &str)]) -> Criteria {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}
