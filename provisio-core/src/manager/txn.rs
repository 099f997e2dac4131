//! Multi-collection transactions.
//!
//! A [`Txn`] holds write locks on a set of collections, taken in kind
//! order. Work is first planned against the locked state, then every step
//! is persisted, then applied in memory. A storage failure part way
//! through writes back what was already persisted and leaves memory
//! untouched. Cache invalidation runs after the locks are released.

use super::CollectionManager;
use crate::collection::CollectionState;
use crate::entity::{Entity, EntityRef};
use crate::error::{Error, Result};
use crate::graph::{self, Reference};
use crate::schema;
use parking_lot::RwLockWriteGuard;
use provisio_incremental::Change;
use provisio_types::{EntityId, EntityKind};
use std::collections::{HashSet, VecDeque};
use std::sync::Arc;

/// Read access to collection state, through held locks or short read locks
pub(crate) trait StateAccess {
    fn with_state<R>(&self, kind: EntityKind, f: impl FnOnce(&CollectionState) -> R) -> R;

    fn entity(&self, kind: EntityKind, id: &EntityId) -> Option<Arc<Entity>> {
        self.with_state(kind, |s| s.get(id).cloned())
    }

    fn entity_by_name(&self, kind: EntityKind, name: &str) -> Option<Arc<Entity>> {
        self.with_state(kind, |s| s.by_name(name).cloned())
    }
}

/// Every entity holding a reference to `entity`, with the reference used
pub(crate) fn dependents<A: StateAccess>(access: &A, entity: &Entity) -> Vec<(Reference, Arc<Entity>)> {
    let mut found = Vec::new();
    for reference in graph::referrers(entity.kind()) {
        let key = if reference.by_id() {
            entity.id().as_str()
        } else {
            entity.name()
        };
        for dependent in access.with_state(reference.kind, |s| s.lookup(reference.field, key)) {
            if dependent.kind() == entity.kind() && dependent.id() == entity.id() {
                continue;
            }
            found.push((*reference, dependent));
        }
    }
    found
}

/// Entities whose resolution chain continues directly into `entity`
pub(crate) fn logical_children<A: StateAccess>(access: &A, entity: &Entity) -> Vec<Arc<Entity>> {
    let mut children = if schema::supports_parent(entity.kind()) {
        access.with_state(entity.kind(), |s| s.lookup("parent", entity.id().as_str()))
    } else {
        Vec::new()
    };

    for kind in EntityKind::ALL {
        for (field, target) in graph::upward_links(kind) {
            if *target != entity.kind() {
                continue;
            }
            let linked = access.with_state(kind, |s| s.lookup(field, entity.name()));
            children.extend(linked.into_iter().filter(|child| {
                graph::logical_link(child) == Some((entity.kind(), entity.name()))
            }));
        }
    }
    children
}

/// Depth of an entity without a same-kind parent: one below whatever its
/// upward link names, or zero
pub(crate) fn link_depth<A: StateAccess>(access: &A, entity: &Entity) -> Result<u32> {
    match graph::logical_link(entity) {
        Some((kind, name)) => access
            .entity_by_name(kind, name)
            .map(|linked| linked.depth() + 1)
            .ok_or_else(|| Error::not_found(kind, name)),
        None => Ok(0),
    }
}

#[derive(Debug)]
pub(crate) enum Step {
    Put { old: Arc<Entity>, new: Arc<Entity> },
    Delete(Arc<Entity>),
}

/// Planned writes plus the cache changes they cause
#[derive(Debug, Default)]
pub(crate) struct Plan {
    steps: Vec<Step>,
    changes: Vec<Change<EntityRef>>,
}

impl Plan {
    /// Stage a new version; restaging an entity keeps its original `old`
    pub(crate) fn put(&mut self, old: Arc<Entity>, new: Arc<Entity>) {
        let key = new.entity_ref();
        for step in &mut self.steps {
            if let Step::Put { new: staged, .. } = step {
                if staged.entity_ref() == key {
                    *staged = new;
                    return;
                }
            }
        }
        self.steps.push(Step::Put { old, new });
    }

    pub(crate) fn delete(&mut self, entity: Arc<Entity>) {
        self.steps.push(Step::Delete(entity));
    }

    /// The version staged for `key`, if any
    pub(crate) fn staged(&self, key: &EntityRef) -> Option<Arc<Entity>> {
        self.steps.iter().find_map(|step| match step {
            Step::Put { new, .. } if new.entity_ref() == *key => Some(Arc::clone(new)),
            _ => None,
        })
    }

    pub(crate) fn change(&mut self, change: Change<EntityRef>) {
        self.changes.push(change);
    }

    pub(crate) fn deletions(&self) -> usize {
        self.steps
            .iter()
            .filter(|s| matches!(s, Step::Delete(_)))
            .count()
    }
}

pub(crate) struct Txn<'a> {
    manager: &'a CollectionManager,
    guards: Vec<(EntityKind, RwLockWriteGuard<'a, CollectionState>)>,
}

impl<'a> Txn<'a> {
    /// Lock the given kinds in ordinal order
    pub(crate) fn begin(manager: &'a CollectionManager, kinds: &[EntityKind]) -> Self {
        let mut kinds = kinds.to_vec();
        kinds.sort_by_key(|k| k.ordinal());
        kinds.dedup();
        let guards = kinds
            .into_iter()
            .map(|kind| (kind, manager.get_collection(kind).write()))
            .collect();
        Txn { manager, guards }
    }

    pub(crate) fn state(&self, kind: EntityKind) -> Result<&CollectionState> {
        self.guards
            .iter()
            .find(|(k, _)| *k == kind)
            .map(|(_, guard)| &**guard)
            .ok_or_else(|| Error::invariant(format!("{} collection is not locked", kind)))
    }

    fn state_mut(&mut self, kind: EntityKind) -> Result<&mut CollectionState> {
        self.guards
            .iter_mut()
            .find(|(k, _)| *k == kind)
            .map(|(_, guard)| &mut **guard)
            .ok_or_else(|| Error::invariant(format!("{} collection is not locked", kind)))
    }

    /// Stage depth changes below `root`, which must already carry its new depth
    pub(crate) fn plan_depths(&self, plan: &mut Plan, root: &Arc<Entity>) {
        let mut visited = HashSet::new();
        visited.insert(root.entity_ref());
        let mut queue = VecDeque::from([Arc::clone(root)]);

        while let Some(parent) = queue.pop_front() {
            for child in logical_children(self, &parent) {
                if !visited.insert(child.entity_ref()) {
                    continue;
                }
                let current = plan.staged(&child.entity_ref()).unwrap_or_else(|| Arc::clone(&child));
                let depth = parent.depth() + 1;
                if current.depth() == depth {
                    continue;
                }
                let mut moved = (*current).clone();
                moved.depth = depth;
                let moved = Arc::new(moved);
                plan.put(child, Arc::clone(&moved));
                queue.push_back(moved);
            }
        }
    }

    /// Persist and apply a plan, then release the locks and invalidate.
    ///
    /// With `persist` off the plan is applied in memory only.
    pub(crate) fn commit(mut self, plan: Plan, persist: bool) -> Result<usize> {
        let Plan { steps, changes } = plan;
        if persist {
            self.persist(&steps)?;
        }

        for step in steps {
            match step {
                Step::Put { new, .. } => {
                    self.state_mut(new.kind())?.replace(new)?;
                }
                Step::Delete(old) => {
                    if self.state_mut(old.kind())?.remove(old.id()).is_none() {
                        return Err(Error::invariant(format!(
                            "{} '{}' vanished during removal",
                            old.kind(),
                            old.name()
                        )));
                    }
                }
            }
        }

        let manager = self.manager;
        drop(self);
        Ok(manager.cache.invalidate(changes, manager))
    }

    fn persist(&self, steps: &[Step]) -> Result<()> {
        let storage = self.manager.storage();
        for (done, step) in steps.iter().enumerate() {
            let result = match step {
                Step::Put { new, .. } => storage.serialize_item(new.kind(), new),
                Step::Delete(old) => storage.serialize_delete(old.kind(), old),
            };
            let Err(err) = result else {
                continue;
            };

            for undo in steps[..done].iter().rev() {
                let (Step::Put { old, .. } | Step::Delete(old)) = undo;
                if let Err(undo_err) = storage.serialize_item(old.kind(), old) {
                    tracing::warn!(
                        kind = %old.kind(),
                        id = %old.id(),
                        error = %undo_err,
                        "could not restore record after failed write"
                    );
                }
            }
            tracing::warn!(error = %err, steps = done, "rolled back partial write");
            return Err(err.into());
        }
        Ok(())
    }
}

impl StateAccess for Txn<'_> {
    fn with_state<R>(&self, kind: EntityKind, f: impl FnOnce(&CollectionState) -> R) -> R {
        match self.guards.iter().find(|(k, _)| *k == kind) {
            Some((_, guard)) => f(&**guard),
            None => f(&*self.manager.get_collection(kind).read()),
        }
    }
}
