//! Mutations that reach across the dependency graph: attribute updates,
//! reparenting, rename and remove.

use super::txn::{self, Plan, StateAccess, Txn};
use super::CollectionManager;
use crate::entity::Entity;
use crate::entity::EntityRef;
use crate::error::{Error, Result};
use crate::graph;
use crate::schema;
use chrono::Utc;
use provisio_incremental::Change;
use provisio_types::{EntityId, EntityKind, Value};
use std::collections::HashSet;
use std::sync::Arc;

impl CollectionManager {
    /// Set attributes of a stored entity.
    ///
    /// All values are validated before anything is stored. Changing the
    /// link an entity resolves through (a profile's distro, a system's
    /// profile or image) recomputes depth below it.
    pub fn update<I, S>(&self, kind: EntityKind, id: &EntityId, changes: I) -> Result<Arc<Entity>>
    where
        I: IntoIterator<Item = (S, Value)>,
        S: AsRef<str>,
    {
        let _guard = self.mutation.lock();
        let affected = graph::affected_kinds(kind);
        self.load_pending(&affected)?;
        let current = self.get_loaded(kind, id)?;

        let mut next = (*current).clone();
        let mut changed = false;
        let mut relinked = false;
        for (field, value) in changes {
            let change = next.set(field.as_ref(), value)?;
            if change.is_noop() {
                continue;
            }
            changed = true;
            relinked |= graph::upward_links(kind).iter().any(|(f, _)| *f == change.field);
        }
        if !changed {
            return Ok(current);
        }
        self.check_references(&next)?;
        next.touch(Utc::now());

        let txn = Txn::begin(self, &affected);
        if relinked && next.parent().is_none() {
            next.depth = txn::link_depth(&txn, &next)?;
        }
        let next = Arc::new(next);
        txn.state(kind)?.check(&next)?;

        let mut plan = Plan::default();
        plan.put(Arc::clone(&current), Arc::clone(&next));
        if relinked {
            txn.plan_depths(&mut plan, &next);
            plan.change(Change::Restructured(next.entity_ref()));
        } else {
            plan.change(Change::Modified(next.entity_ref()));
        }
        let touched = txn.commit(plan, true)?;

        tracing::info!(kind = %kind, id = %id, name = next.name(), touched, "updated");
        Ok(next)
    }

    /// Move an entity under a new same-kind parent, or detach it.
    ///
    /// Depth is recomputed for the entity and everything that resolves
    /// through it.
    pub fn set_parent(&self, kind: EntityKind, id: &EntityId, parent: Option<&EntityId>) -> Result<Arc<Entity>> {
        if !schema::supports_parent(kind) {
            return Err(Error::validation(kind, "parent", format!("{} entities have no parent", kind)));
        }
        let _guard = self.mutation.lock();
        let affected = graph::affected_kinds(kind);
        self.load_pending(&affected)?;
        let current = self.get_loaded(kind, id)?;
        if current.parent() == parent {
            return Ok(current);
        }

        let txn = Txn::begin(self, &affected);
        let mut next = (*current).clone();
        match parent {
            Some(parent_id) => {
                let state = txn.state(kind)?;
                let parent = state
                    .get(parent_id)
                    .ok_or_else(|| Error::not_found(kind, parent_id.as_str()))?;
                if state.would_cycle(id, parent_id) {
                    return Err(Error::CyclicParent {
                        kind,
                        name: current.name().to_string(),
                        parent: parent.name().to_string(),
                    });
                }
                next.parent = Some(parent_id.clone());
                next.depth = parent.depth() + 1;
            }
            None => {
                next.parent = None;
                if kind == EntityKind::Profile && next.get_str("distro").is_empty() {
                    return Err(Error::validation(
                        kind,
                        "distro",
                        "a profile needs a distro or a parent profile",
                    ));
                }
                next.depth = txn::link_depth(&txn, &next)?;
            }
        }
        next.touch(Utc::now());
        let next = Arc::new(next);

        let mut plan = Plan::default();
        plan.put(Arc::clone(&current), Arc::clone(&next));
        txn.plan_depths(&mut plan, &next);
        plan.change(Change::Restructured(next.entity_ref()));
        let touched = txn.commit(plan, true)?;

        tracing::info!(
            kind = %kind,
            name = next.name(),
            parent = %parent.map(|p| p.as_str()).unwrap_or(""),
            touched,
            "reparented"
        );
        Ok(next)
    }

    /// Rename an entity and rewrite every name reference to it.
    ///
    /// Referrers are rewritten and persisted together with the entity;
    /// `parent` references hold ids and are left alone.
    pub fn rename(&self, kind: EntityKind, id: &EntityId, new_name: &str) -> Result<Arc<Entity>> {
        let _guard = self.mutation.lock();
        let affected = graph::affected_kinds(kind);
        self.load_pending(&affected)?;
        let current = self.get_loaded(kind, id)?;
        if current.name() == new_name {
            return Ok(current);
        }
        schema::validate_name(kind, new_name)?;

        let txn = Txn::begin(self, &affected);
        if txn.state(kind)?.by_name(new_name).is_some() {
            return Err(Error::DuplicateName {
                kind,
                name: new_name.to_string(),
            });
        }

        let now = Utc::now();
        let mut next = (*current).clone();
        next.set_name(new_name.to_string())?;
        next.touch(now);
        let next = Arc::new(next);
        txn.state(kind)?.check(&next)?;

        let mut plan = Plan::default();
        plan.put(Arc::clone(&current), Arc::clone(&next));
        plan.change(Change::Restructured(next.entity_ref()));

        let old_name = current.name();
        let mut rewritten = 0;
        for (reference, dependent) in txn::dependents(&txn, &current) {
            if reference.by_id() {
                continue;
            }
            let base = plan
                .staged(&dependent.entity_ref())
                .unwrap_or_else(|| Arc::clone(&dependent));
            let value = if reference.multi {
                Value::List(
                    base.get(reference.field)
                        .as_list()
                        .unwrap_or_default()
                        .iter()
                        .map(|member| match member.as_str() {
                            Some(name) if name == old_name => Value::str(new_name),
                            _ => member.clone(),
                        })
                        .collect(),
                )
            } else {
                Value::str(new_name)
            };

            let mut updated = (*base).clone();
            updated.set(reference.field, value)?;
            updated.touch(now);
            plan.change(Change::Restructured(dependent.entity_ref()));
            plan.put(dependent, Arc::new(updated));
            rewritten += 1;
        }
        txn.commit(plan, true)?;

        tracing::info!(kind = %kind, from = old_name, to = new_name, rewritten, "renamed");
        Ok(next)
    }

    /// Remove an entity.
    ///
    /// Without `recursive`, any entity still referring to it blocks the
    /// removal. With it, entities that hold a scalar reference are removed
    /// first, deepest first, and list memberships (a profile's repos) are
    /// dropped from their holders. `cascade_delete` controls whether the
    /// removal reaches storage or only the in-memory store.
    pub fn remove(&self, kind: EntityKind, id: &EntityId, recursive: bool, cascade_delete: bool) -> Result<usize> {
        let _guard = self.mutation.lock();
        let affected = graph::affected_kinds(kind);
        self.load_pending(&affected)?;

        let txn = Txn::begin(self, &affected);
        let target = txn
            .entity(kind, id)
            .ok_or_else(|| Error::not_found(kind, id.as_str()))?;

        let mut plan = Plan::default();
        let mut visited = HashSet::new();
        plan_remove(&txn, &mut plan, &target, recursive, &mut visited)?;
        let removed = plan.deletions();
        txn.commit(plan, cascade_delete)?;

        tracing::info!(kind = %kind, name = target.name(), removed, recursive, "removed");
        Ok(removed)
    }
}

/// Stage the removal of `entity` after everything that depends on it
fn plan_remove(
    txn: &Txn<'_>,
    plan: &mut Plan,
    entity: &Arc<Entity>,
    recursive: bool,
    visited: &mut HashSet<EntityRef>,
) -> Result<()> {
    if !visited.insert(entity.entity_ref()) {
        return Ok(());
    }

    for (reference, dependent) in txn::dependents(txn, entity) {
        if visited.contains(&dependent.entity_ref()) {
            continue;
        }
        if !recursive {
            return Err(Error::Dependency {
                kind: entity.kind(),
                name: entity.name().to_string(),
                dependent_kind: dependent.kind(),
                dependent: dependent.name().to_string(),
            });
        }

        if reference.multi {
            let base = plan
                .staged(&dependent.entity_ref())
                .unwrap_or_else(|| Arc::clone(&dependent));
            let members: Vec<Value> = base
                .get(reference.field)
                .as_list()
                .unwrap_or_default()
                .iter()
                .filter(|member| member.as_str() != Some(entity.name()))
                .cloned()
                .collect();
            let mut stripped = (*base).clone();
            stripped.set(reference.field, Value::List(members))?;
            stripped.touch(Utc::now());
            plan.change(Change::Restructured(dependent.entity_ref()));
            plan.put(dependent, Arc::new(stripped));
        } else {
            plan_remove(txn, plan, &dependent, recursive, visited)?;
        }
    }

    tracing::debug!(kind = %entity.kind(), name = entity.name(), "staged removal");
    plan.delete(Arc::clone(entity));
    plan.change(Change::Removed(entity.entity_ref()));
    Ok(())
}
