//! Keyed item registry backing every monitor tree.
//!
//! Items live in an arena indexed by integer id with an explicit parent id,
//! so hierarchical snapshots are walked by indexing rather than pointer
//! chasing. The `EntityKey -> ItemId` map, selection, expansion and scroll
//! state sit behind one read/write lock: snapshot merges take the write
//! lock, selection and traversal queries take the read lock. Only the UI
//! thread mutates; worker threads hand their snapshots over through the
//! work pool and never touch items.

use crate::model::{EntityKey, Keyed};

use std::collections::{HashMap, HashSet};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ItemId(usize);

#[derive(Debug)]
pub struct Item<E> {
    pub entity: E,
    pub parent: Option<ItemId>,
    pub children: Vec<ItemId>,
    /// Bumped whenever the entity is replaced; display caches key off it.
    pub generation: u64,
}

/// A hierarchical snapshot node, produced worker-side.
#[derive(Debug, Clone)]
pub struct NestedNode<E> {
    pub entity: E,
    pub children: Vec<NestedNode<E>>,
}

impl<E> NestedNode<E> {
    pub fn leaf(entity: E) -> NestedNode<E> {
        NestedNode {
            entity,
            children: Vec::new(),
        }
    }
}

/// One row of a flattened, expansion-aware traversal.
#[derive(Debug, Clone)]
pub struct VisibleRow<E> {
    pub key: EntityKey,
    pub entity: E,
    pub depth: usize,
    pub selected: bool,
    pub expanded: bool,
    pub has_children: bool,
    pub generation: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeStats {
    /// False when the incoming key set matched and items were updated in
    /// place; true when the tree was rebuilt.
    pub structural: bool,
    pub created: usize,
    pub removed: usize,
}

struct Inner<E> {
    arena: Vec<Option<Item<E>>>,
    free: Vec<usize>,
    by_key: HashMap<EntityKey, ItemId>,
    roots: Vec<ItemId>,
    selection: HashSet<EntityKey>,
    expanded: HashSet<EntityKey>,
    scroll: usize,
}

impl<E: Keyed> Inner<E> {
    fn alloc(&mut self, item: Item<E>) -> ItemId {
        match self.free.pop() {
            Some(idx) => {
                self.arena[idx] = Some(item);
                ItemId(idx)
            }
            None => {
                self.arena.push(Some(item));
                ItemId(self.arena.len() - 1)
            }
        }
    }

    fn item(&self, id: ItemId) -> Option<&Item<E>> {
        self.arena.get(id.0).and_then(|slot| slot.as_ref())
    }

    fn item_mut(&mut self, id: ItemId) -> Option<&mut Item<E>> {
        self.arena.get_mut(id.0).and_then(|slot| slot.as_mut())
    }

    fn insert(&mut self, entity: E, parent: Option<ItemId>) -> ItemId {
        let key = entity.key();
        let id = self.alloc(Item {
            entity,
            parent,
            children: Vec::new(),
            generation: 0,
        });
        match parent {
            Some(pid) => {
                if let Some(p) = self.item_mut(pid) {
                    p.children.push(id);
                }
            }
            None => self.roots.push(id),
        }
        self.by_key.insert(key, id);
        id
    }

    /// Unlink children first, deselect, detach, pop the key. Tolerates a
    /// key that is already gone (terminal-job race).
    fn remove(&mut self, key: &EntityKey) -> usize {
        let id = match self.by_key.get(key) {
            Some(id) => *id,
            None => return 0,
        };
        let mut removed = 0;
        let child_keys: Vec<EntityKey> = self
            .item(id)
            .map(|item| {
                item.children
                    .iter()
                    .filter_map(|c| self.item(*c).map(|i| i.entity.key()))
                    .collect()
            })
            .unwrap_or_default();
        for child in child_keys {
            removed += self.remove(&child);
        }
        self.selection.remove(key);
        self.expanded.remove(key);
        if let Some(item) = self.arena[id.0].take() {
            match item.parent {
                Some(pid) => {
                    if let Some(p) = self.item_mut(pid) {
                        p.children.retain(|c| *c != id);
                    }
                }
                None => self.roots.retain(|r| *r != id),
            }
            removed += 1;
        }
        self.free.push(id.0);
        self.by_key.remove(key);
        removed
    }

    fn clear(&mut self) {
        self.arena.clear();
        self.free.clear();
        self.by_key.clear();
        self.roots.clear();
    }

    fn visit(&self, id: ItemId, depth: usize, out: &mut Vec<VisibleRow<E>>)
    where
        E: Clone,
    {
        let item = match self.item(id) {
            Some(item) => item,
            None => return,
        };
        let key = item.entity.key();
        let expanded = self.expanded.contains(&key);
        out.push(VisibleRow {
            selected: self.selection.contains(&key),
            expanded,
            has_children: !item.children.is_empty(),
            entity: item.entity.clone(),
            depth,
            generation: item.generation,
            key,
        });
        if expanded {
            for child in item.children.clone() {
                self.visit(child, depth + 1, out);
            }
        }
    }
}

pub struct ItemRegistry<E> {
    inner: RwLock<Inner<E>>,
}

impl<E: Keyed + Clone> Default for ItemRegistry<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E: Keyed + Clone> ItemRegistry<E> {
    pub fn new() -> ItemRegistry<E> {
        ItemRegistry {
            inner: RwLock::new(Inner {
                arena: Vec::new(),
                free: Vec::new(),
                by_key: HashMap::new(),
                roots: Vec::new(),
                selection: HashSet::new(),
                expanded: HashSet::new(),
                scroll: 0,
            }),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, Inner<E>> {
        self.inner.read().unwrap_or_else(|p| p.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, Inner<E>> {
        self.inner.write().unwrap_or_else(|p| p.into_inner())
    }

    pub fn len(&self) -> usize {
        self.read().by_key.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, key: &EntityKey) -> bool {
        self.read().by_key.contains_key(key)
    }

    pub fn keys(&self) -> HashSet<EntityKey> {
        self.read().by_key.keys().cloned().collect()
    }

    pub fn entity(&self, key: &EntityKey) -> Option<E> {
        let inner = self.read();
        let id = *inner.by_key.get(key)?;
        inner.item(id).map(|item| item.entity.clone())
    }

    /// Flat diff-merge. When the incoming key set equals the current one
    /// every item is updated in place; otherwise the tree is rebuilt in
    /// incoming order, preserving selection, expansion and scroll
    /// best-effort. Items absent from the snapshot survive when `retain`
    /// says so (terminal jobs still in the monitored set).
    pub fn merge(&self, snapshot: Vec<E>, retain: impl Fn(&E) -> bool) -> MergeStats {
        let mut inner = self.write();
        let incoming: HashSet<EntityKey> = snapshot.iter().map(|e| e.key()).collect();
        let current: HashSet<EntityKey> = inner.by_key.keys().cloned().collect();

        // Fast path: every incoming key is already present and whatever is
        // absent from the snapshot is retained (terminal monitored jobs).
        // Update in place, no structural change, repaint only.
        let absent_all_retained = incoming.is_subset(&current)
            && current.difference(&incoming).all(|key| {
                inner
                    .by_key
                    .get(key)
                    .copied()
                    .and_then(|id| inner.item(id))
                    .map(|item| retain(&item.entity))
                    .unwrap_or(false)
            });
        if absent_all_retained {
            for entity in snapshot {
                let key = entity.key();
                if let Some(id) = inner.by_key.get(&key).copied() {
                    if let Some(item) = inner.item_mut(id) {
                        item.entity = entity;
                        item.generation += 1;
                    }
                }
            }
            return MergeStats::default();
        }

        // Structural change: rebuild in incoming order.
        let created = incoming.difference(&current).count();
        let kept: Vec<E> = inner
            .roots
            .clone()
            .into_iter()
            .filter_map(|id| inner.item(id).map(|item| item.entity.clone()))
            .filter(|e| !incoming.contains(&e.key()) && retain(e))
            .collect();
        let selection = inner.selection.clone();
        let expanded = inner.expanded.clone();
        let scroll = inner.scroll;

        inner.clear();
        for entity in snapshot {
            if !inner.by_key.contains_key(&entity.key()) {
                inner.insert(entity, None);
            }
        }
        for entity in kept {
            inner.insert(entity, None);
        }

        let live: HashSet<EntityKey> = inner.by_key.keys().cloned().collect();
        inner.selection = selection.intersection(&live).cloned().collect();
        inner.expanded = expanded.intersection(&live).cloned().collect();
        inner.scroll = scroll;

        let removed = current.difference(&live).count();
        debug!(created, removed, "rebuilt tree");
        MergeStats {
            structural: true,
            created,
            removed,
        }
    }

    /// Hierarchical diff-merge. Each snapshot node is parented to the
    /// in-registry item of its snapshot parent at the time it is visited.
    pub fn merge_nested(&self, snapshot: Vec<NestedNode<E>>) -> MergeStats {
        fn collect_keys<E: Keyed>(nodes: &[NestedNode<E>], out: &mut HashSet<EntityKey>) {
            for node in nodes {
                out.insert(node.entity.key());
                collect_keys(&node.children, out);
            }
        }
        fn update_in_place<E: Keyed>(inner: &mut Inner<E>, nodes: Vec<NestedNode<E>>) {
            for node in nodes {
                let key = node.entity.key();
                if let Some(id) = inner.by_key.get(&key).copied() {
                    if let Some(item) = inner.item_mut(id) {
                        item.entity = node.entity;
                        item.generation += 1;
                    }
                }
                update_in_place(inner, node.children);
            }
        }
        fn build<E: Keyed>(inner: &mut Inner<E>, nodes: Vec<NestedNode<E>>, parent: Option<ItemId>) {
            for node in nodes {
                let id = inner.insert(node.entity, parent);
                build(inner, node.children, Some(id));
            }
        }

        let mut inner = self.write();
        let mut incoming = HashSet::new();
        collect_keys(&snapshot, &mut incoming);
        let current: HashSet<EntityKey> = inner.by_key.keys().cloned().collect();

        if incoming == current {
            update_in_place(&mut inner, snapshot);
            return MergeStats::default();
        }

        let created = incoming.difference(&current).count();
        let selection = inner.selection.clone();
        let expanded = inner.expanded.clone();
        let scroll = inner.scroll;

        inner.clear();
        build(&mut inner, snapshot, None);

        let live: HashSet<EntityKey> = inner.by_key.keys().cloned().collect();
        inner.selection = selection.intersection(&live).cloned().collect();
        inner.expanded = expanded.intersection(&live).cloned().collect();
        inner.scroll = scroll;

        MergeStats {
            structural: true,
            created,
            removed: current.difference(&live).count(),
        }
    }

    /// Create-or-update a single item under `parent` (None = root). The
    /// stuck-frame tree and dependent-job grouping build ancestors lazily
    /// through this.
    pub fn upsert_child(&self, parent: Option<&EntityKey>, entity: E) -> bool {
        let mut inner = self.write();
        let key = entity.key();
        if let Some(id) = inner.by_key.get(&key).copied() {
            if let Some(item) = inner.item_mut(id) {
                item.entity = entity;
                item.generation += 1;
            }
            return false;
        }
        let parent_id = parent.and_then(|p| inner.by_key.get(p).copied());
        inner.insert(entity, parent_id);
        true
    }

    pub fn remove_item(&self, key: &EntityKey) {
        self.write().remove(key);
    }

    pub fn remove_all(&self) {
        let mut inner = self.write();
        inner.clear();
        inner.selection.clear();
        inner.expanded.clear();
        inner.scroll = 0;
    }

    /// Drop every item whose entity fails the predicate (children first).
    pub fn retain_entities(&self, keep: impl Fn(&E) -> bool) -> usize {
        let doomed: Vec<EntityKey> = {
            let inner = self.read();
            inner
                .by_key
                .iter()
                .filter_map(|(key, id)| {
                    inner
                        .item(*id)
                        .filter(|item| !keep(&item.entity))
                        .map(|_| key.clone())
                })
                .collect()
        };
        let mut inner = self.write();
        let mut removed = 0;
        for key in &doomed {
            removed += inner.remove(key);
        }
        removed
    }

    pub fn set_selected(&self, key: &EntityKey, on: bool) {
        let mut inner = self.write();
        if !inner.by_key.contains_key(key) {
            return;
        }
        if on {
            inner.selection.insert(key.clone());
        } else {
            inner.selection.remove(key);
        }
    }

    pub fn clear_selection(&self) {
        self.write().selection.clear();
    }

    pub fn is_selected(&self, key: &EntityKey) -> bool {
        self.read().selection.contains(key)
    }

    pub fn selected_keys(&self) -> Vec<EntityKey> {
        self.read().selection.iter().cloned().collect()
    }

    pub fn set_expanded(&self, key: &EntityKey, on: bool) {
        let mut inner = self.write();
        if !inner.by_key.contains_key(key) {
            return;
        }
        if on {
            inner.expanded.insert(key.clone());
        } else {
            inner.expanded.remove(key);
        }
    }

    pub fn expand_all(&self) {
        let mut inner = self.write();
        inner.expanded = inner.by_key.keys().cloned().collect();
    }

    pub fn scroll(&self) -> usize {
        self.read().scroll
    }

    pub fn set_scroll(&self, value: usize) {
        self.write().scroll = value;
    }

    /// Flattened traversal in display order, honoring expansion.
    pub fn visible(&self) -> Vec<VisibleRow<E>> {
        let inner = self.read();
        let mut out = Vec::with_capacity(inner.by_key.len());
        for root in inner.roots.clone() {
            inner.visit(root, 0, &mut out);
        }
        out
    }

    /// Keys of an item's direct children, in display order.
    pub fn child_keys(&self, key: &EntityKey) -> Vec<EntityKey> {
        let inner = self.read();
        let id = match inner.by_key.get(key) {
            Some(id) => *id,
            None => return Vec::new(),
        };
        inner
            .item(id)
            .map(|item| {
                item.children
                    .iter()
                    .filter_map(|c| inner.item(*c).map(|i| i.entity.key()))
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn for_each(&self, mut f: impl FnMut(&E)) {
        let inner = self.read();
        for slot in inner.arena.iter().flatten() {
            f(&slot.entity);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{EntityKey, EntityKind, Keyed};
    use uuid::Uuid;

    #[derive(Debug, Clone, PartialEq)]
    struct Rec {
        id: Uuid,
        name: String,
        finished: bool,
    }

    impl Keyed for Rec {
        fn key(&self) -> EntityKey {
            EntityKey::new(EntityKind::Job, self.id)
        }
        fn label(&self) -> &str {
            &self.name
        }
    }

    fn rec(name: &str) -> Rec {
        Rec {
            id: Uuid::new_v4(),
            name: name.to_string(),
            finished: false,
        }
    }

    #[test]
    fn identical_key_set_updates_in_place() {
        let reg = ItemRegistry::new();
        let mut a = rec("a");
        let b = rec("b");
        reg.merge(vec![a.clone(), b.clone()], |_| false);

        a.name = "a2".to_string();
        let stats = reg.merge(vec![a.clone(), b], |_| false);
        assert!(!stats.structural);
        assert_eq!(reg.entity(&a.key()).unwrap().name, "a2");
    }

    #[test]
    fn merge_preserves_selection_and_scroll() {
        // Registry {j1, j2, j3}, select j2, snapshot {j1, j2, j4}:
        // j3 gone, j4 present, j2 still selected, scroll restored.
        let reg = ItemRegistry::new();
        let (j1, j2, j3, j4) = (rec("j1"), rec("j2"), rec("j3"), rec("j4"));
        reg.merge(vec![j1.clone(), j2.clone(), j3.clone()], |_| false);
        reg.set_selected(&j2.key(), true);
        reg.set_scroll(17);

        let stats = reg.merge(vec![j1.clone(), j2.clone(), j4.clone()], |_| false);
        assert!(stats.structural);
        assert!(!reg.contains(&j3.key()));
        assert!(reg.contains(&j4.key()));
        assert!(reg.is_selected(&j2.key()));
        assert_eq!(reg.scroll(), 17);
    }

    #[test]
    fn retain_keeps_terminal_monitored_items() {
        let reg = ItemRegistry::new();
        let mut done = rec("done");
        done.finished = true;
        let live = rec("live");
        reg.merge(vec![done.clone(), live.clone()], |_| false);

        // The finished job is the only absentee, so the merge does not
        // even need to restructure the tree.
        let stats = reg.merge(vec![live.clone()], |e: &Rec| e.finished);
        assert!(!stats.structural);
        assert!(reg.contains(&done.key()));
        assert_eq!(reg.len(), 2);

        // A non-terminal absent item is dropped by the same policy.
        let stats = reg.merge(vec![done.clone()], |e: &Rec| e.finished);
        assert!(stats.structural);
        assert!(!reg.contains(&live.key()));
        assert!(reg.contains(&done.key()));
    }

    #[test]
    fn remove_is_tolerant_and_recursive() {
        let reg = ItemRegistry::new();
        let parent = rec("p");
        let child = rec("c");
        reg.upsert_child(None, parent.clone());
        reg.upsert_child(Some(&parent.key()), child.clone());
        assert_eq!(reg.len(), 2);

        reg.remove_item(&parent.key());
        assert!(reg.is_empty());
        // Second removal of the same key is a no-op.
        reg.remove_item(&parent.key());
        assert!(!reg.contains(&child.key()));
    }

    #[test]
    fn visible_honors_expansion() {
        let reg = ItemRegistry::new();
        let parent = rec("p");
        let child = rec("c");
        reg.upsert_child(None, parent.clone());
        reg.upsert_child(Some(&parent.key()), child.clone());

        let rows = reg.visible();
        assert_eq!(rows.len(), 1);
        assert!(rows[0].has_children);

        reg.set_expanded(&parent.key(), true);
        let rows = reg.visible();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[1].depth, 1);
        assert_eq!(rows[1].key, child.key());
    }

    #[test]
    fn nested_merge_parents_by_visit_order() {
        let reg = ItemRegistry::new();
        let (show, group, job) = (rec("show"), rec("group"), rec("job"));
        let tree = vec![NestedNode {
            entity: show.clone(),
            children: vec![NestedNode {
                entity: group.clone(),
                children: vec![NestedNode::leaf(job.clone())],
            }],
        }];
        let stats = reg.merge_nested(tree.clone());
        assert!(stats.structural);
        assert_eq!(stats.created, 3);

        reg.expand_all();
        let rows = reg.visible();
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0].depth, 0);
        assert_eq!(rows[1].depth, 1);
        assert_eq!(rows[2].depth, 2);

        // Same shape again: in-place, nothing rebuilt.
        let stats = reg.merge_nested(tree);
        assert!(!stats.structural);
    }

    #[test]
    fn generation_bumps_on_replace() {
        let reg = ItemRegistry::new();
        let mut a = rec("a");
        reg.merge(vec![a.clone()], |_| false);
        let g0 = reg.visible()[0].generation;
        a.name = "a2".to_string();
        reg.merge(vec![a.clone()], |_| false);
        let g1 = reg.visible()[0].generation;
        assert!(g1 > g0);
    }
}
