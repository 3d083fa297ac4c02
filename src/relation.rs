//! Parent/child and custom typed relations.
//!
//! Relations are stored as slot indices into the entity store, never as
//! owning links; every public lookup on the world revalidates slots through
//! `is_valid` before handing entities back.

use rustc_hash::FxHashMap;
use smallvec::SmallVec;

const NO_PARENT: i32 = -1;

/// Slot-indexed relation tables.
#[derive(Default)]
pub struct RelationGraph {
    /// slot -> parent slot, `NO_PARENT` when detached
    parent: Vec<i32>,
    children: FxHashMap<u32, SmallVec<[u32; 8]>>,
    /// (from slot, relation id) -> target slots
    typed: FxHashMap<(u32, u32), SmallVec<[u32; 4]>>,
}

impl RelationGraph {
    pub fn new() -> Self {
        Self::default()
    }

    fn ensure_slot(&mut self, slot: u32) {
        if self.parent.len() <= slot as usize {
            self.parent.resize(slot as usize + 1, NO_PARENT);
        }
    }

    pub fn parent_of(&self, slot: u32) -> Option<u32> {
        match self.parent.get(slot as usize) {
            Some(&p) if p != NO_PARENT => Some(p as u32),
            _ => None,
        }
    }

    pub fn children_of(&self, slot: u32) -> &[u32] {
        self.children.get(&slot).map_or(&[], |c| c.as_slice())
    }

    /// True if `ancestor` appears on `slot`'s parent chain (including
    /// `slot` itself).
    pub fn is_ancestor(&self, ancestor: u32, slot: u32) -> bool {
        let mut current = Some(slot);
        while let Some(s) = current {
            if s == ancestor {
                return true;
            }
            current = self.parent_of(s);
        }
        false
    }

    /// Link `child` under `parent` (or detach with `None`). The caller has
    /// already rejected cycles via `is_ancestor`.
    pub fn set_parent(&mut self, child: u32, parent: Option<u32>) {
        self.ensure_slot(child);

        if let Some(old) = self.parent_of(child) {
            if let Some(siblings) = self.children.get_mut(&old) {
                siblings.retain(|&mut s| s != child);
            }
        }

        match parent {
            Some(p) => {
                self.parent[child as usize] = p as i32;
                let siblings = self.children.entry(p).or_default();
                if !siblings.contains(&child) {
                    siblings.push(child);
                }
            }
            None => self.parent[child as usize] = NO_PARENT,
        }
    }

    /// Drop every relation involving `slot`: clear its parent, orphan its
    /// children (they are not destroyed), and remove its outgoing typed
    /// relations. Stale incoming typed targets are filtered at lookup.
    pub fn detach(&mut self, slot: u32) {
        self.set_parent(slot, None);

        if let Some(children) = self.children.remove(&slot) {
            for child in children {
                if let Some(p) = self.parent.get_mut(child as usize) {
                    *p = NO_PARENT;
                }
            }
        }

        self.typed.retain(|&(from, _), _| from != slot);
    }

    pub fn add_relation(&mut self, from: u32, relation_id: u32, to: u32) {
        let targets = self.typed.entry((from, relation_id)).or_default();
        if !targets.contains(&to) {
            targets.push(to);
        }
    }

    pub fn remove_relation(&mut self, from: u32, relation_id: u32, to: u32) -> bool {
        if let Some(targets) = self.typed.get_mut(&(from, relation_id)) {
            let before = targets.len();
            targets.retain(|&mut t| t != to);
            return targets.len() != before;
        }
        false
    }

    pub fn related(&self, from: u32, relation_id: u32) -> &[u32] {
        self.typed
            .get(&(from, relation_id))
            .map_or(&[], |t| t.as_slice())
    }

    pub fn clear(&mut self) {
        self.parent.clear();
        self.children.clear();
        self.typed.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parent_and_children_stay_mirrored() {
        let mut graph = RelationGraph::new();
        graph.set_parent(2, Some(1));
        graph.set_parent(3, Some(1));

        assert_eq!(graph.parent_of(2), Some(1));
        assert_eq!(graph.children_of(1), &[2, 3]);

        // Reparenting removes the old link.
        graph.set_parent(2, Some(4));
        assert_eq!(graph.children_of(1), &[3]);
        assert_eq!(graph.children_of(4), &[2]);
    }

    #[test]
    fn detach_orphans_children_without_destroying() {
        let mut graph = RelationGraph::new();
        graph.set_parent(2, Some(1));
        graph.set_parent(3, Some(2));

        graph.detach(2);
        assert_eq!(graph.parent_of(2), None);
        assert_eq!(graph.parent_of(3), None);
        assert!(graph.children_of(1).is_empty());
        assert!(graph.children_of(2).is_empty());
    }

    #[test]
    fn ancestry_walks_the_parent_chain() {
        let mut graph = RelationGraph::new();
        graph.set_parent(2, Some(1));
        graph.set_parent(3, Some(2));

        assert!(graph.is_ancestor(1, 3));
        assert!(graph.is_ancestor(3, 3));
        assert!(!graph.is_ancestor(3, 1));
    }

    #[test]
    fn typed_relations_are_keyed_by_relation_id() {
        let mut graph = RelationGraph::new();
        graph.add_relation(1, 7, 2);
        graph.add_relation(1, 7, 3);
        graph.add_relation(1, 8, 4);
        graph.add_relation(1, 7, 2); // duplicate ignored

        assert_eq!(graph.related(1, 7), &[2, 3]);
        assert_eq!(graph.related(1, 8), &[4]);
        assert!(graph.remove_relation(1, 7, 2));
        assert!(!graph.remove_relation(1, 7, 2));
        assert_eq!(graph.related(1, 7), &[3]);

        graph.detach(1);
        assert!(graph.related(1, 8).is_empty());
    }
}
