//! Static dependency graph between entity kinds.
//!
//! `referrers` says which (kind, field) pairs may point at an entity of a
//! given kind; rename rewrites them and remove refuses to orphan them.
//! `upward_links` says which reference an entity resolves through when it
//! has no same-kind parent.

use crate::entity::Entity;
use provisio_types::EntityKind;

/// A field of `kind` that refers to another entity
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Reference {
    pub kind: EntityKind,
    pub field: &'static str,
    /// List membership rather than a scalar reference
    pub multi: bool,
}

impl Reference {
    const fn scalar(kind: EntityKind, field: &'static str) -> Self {
        Reference {
            kind,
            field,
            multi: false,
        }
    }

    const fn list(kind: EntityKind, field: &'static str) -> Self {
        Reference {
            kind,
            field,
            multi: true,
        }
    }

    /// `parent` references hold ids, every other reference holds a name
    pub fn by_id(&self) -> bool {
        self.field == "parent"
    }
}

use EntityKind as K;

const REPO_REFERRERS: &[Reference] = &[Reference::list(K::Profile, "repos")];
const DISTRO_REFERRERS: &[Reference] = &[Reference::scalar(K::Profile, "distro")];
const MENU_REFERRERS: &[Reference] = &[
    Reference::scalar(K::Menu, "parent"),
    Reference::scalar(K::Image, "menu"),
    Reference::scalar(K::Profile, "menu"),
];
const PROFILE_REFERRERS: &[Reference] = &[
    Reference::scalar(K::Profile, "parent"),
    Reference::scalar(K::System, "profile"),
];
const IMAGE_REFERRERS: &[Reference] = &[Reference::scalar(K::System, "image")];

/// Fields that may reference an entity of `kind`
pub fn referrers(kind: EntityKind) -> &'static [Reference] {
    match kind {
        K::Repo => REPO_REFERRERS,
        K::Distro => DISTRO_REFERRERS,
        K::Menu => MENU_REFERRERS,
        K::Profile => PROFILE_REFERRERS,
        K::Image => IMAGE_REFERRERS,
        K::System => &[],
    }
}

/// Name references an entity of `kind` resolves through, in priority order
pub fn upward_links(kind: EntityKind) -> &'static [(&'static str, EntityKind)] {
    match kind {
        K::Profile => &[("distro", K::Distro)],
        K::System => &[("profile", K::Profile), ("image", K::Image)],
        _ => &[],
    }
}

/// The kind and name an entity resolves through when it has no same-kind
/// parent: the first non-empty upward link
pub fn logical_link(entity: &Entity) -> Option<(EntityKind, &str)> {
    if entity.parent().is_some() {
        return None;
    }
    upward_links(entity.kind()).iter().find_map(|(field, target)| {
        let name = entity.get_str(field);
        (!name.is_empty()).then_some((*target, name))
    })
}

/// `kind` plus every kind that can transitively refer to it, in lock order
pub fn affected_kinds(kind: EntityKind) -> Vec<EntityKind> {
    let mut kinds = vec![kind];
    let mut i = 0;
    while i < kinds.len() {
        for reference in referrers(kinds[i]) {
            if !kinds.contains(&reference.kind) {
                kinds.push(reference.kind);
            }
        }
        i += 1;
    }
    kinds.sort_by_key(|k| k.ordinal());
    kinds
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_affected_kinds_closure() {
        assert_eq!(affected_kinds(K::System), vec![K::System]);
        assert_eq!(affected_kinds(K::Distro), vec![K::Distro, K::Profile, K::System]);
        assert_eq!(
            affected_kinds(K::Menu),
            vec![K::Menu, K::Image, K::Profile, K::System]
        );
    }

    #[test]
    fn test_references_point_at_real_fields() {
        for kind in EntityKind::ALL {
            for reference in referrers(kind) {
                if reference.by_id() {
                    assert!(crate::schema::supports_parent(reference.kind));
                    assert_eq!(reference.kind, kind);
                } else {
                    assert!(crate::schema::field(reference.kind, reference.field).is_some());
                }
            }
        }
    }

    #[test]
    fn test_logical_link_prefers_profile() {
        let system = Entity::new(K::System, "web01")
            .unwrap()
            .with("profile", "web")
            .unwrap()
            .with("image", "live")
            .unwrap();
        assert_eq!(logical_link(&system), Some((K::Profile, "web")));

        let system = Entity::new(K::System, "web02").unwrap().with("image", "live").unwrap();
        assert_eq!(logical_link(&system), Some((K::Image, "live")));

        let repo = Entity::new(K::Repo, "base").unwrap();
        assert_eq!(logical_link(&repo), None);
    }

    #[test]
    fn test_upward_links_are_referrers() {
        for kind in EntityKind::ALL {
            for (field, target) in upward_links(kind) {
                assert!(referrers(*target)
                    .iter()
                    .any(|r| r.kind == kind && r.field == *field));
            }
        }
    }
}
