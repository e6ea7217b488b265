//! Per-page B+ tree index (C3): an in-memory `key -> slot` map kept inside
//! each data page alongside its slotted records.
//!
//! The index is never written to disk. It is rebuilt from a page's slot
//! directory whenever the page is loaded, and kept up to date as records are
//! inserted. This keeps the on-disk page format free of index bookkeeping
//! and makes a corrupt or stale index impossible by construction.

use crate::constants::{SlotId, BTREE_BRANCHING_FACTOR};

#[derive(Debug, Clone)]
enum Node {
    Leaf {
        keys: Vec<u32>,
        children: Vec<SlotId>,
    },
    Internal {
        keys: Vec<u32>,
        children: Vec<Box<Node>>,
    },
}

impl Node {
    fn leaf() -> Node {
        Node::Leaf {
            keys: Vec::new(),
            children: Vec::new(),
        }
    }

    /// Inserts `key`/`slot` into this subtree. If the node this call landed
    /// on overflowed the branching factor, it's split in half and the
    /// separator key plus the new right sibling are handed back to the
    /// caller to graft in.
    fn insert(&mut self, key: u32, slot: SlotId) -> Option<(u32, Box<Node>)> {
        match self {
            Node::Leaf { keys, children } => {
                let pos = keys.partition_point(|&k| k < key);
                keys.insert(pos, key);
                children.insert(pos, slot);

                if keys.len() > BTREE_BRANCHING_FACTOR {
                    let split_at = keys.len() / 2;
                    let sib_keys = keys.split_off(split_at);
                    let sib_children = children.split_off(split_at);
                    let separator = sib_keys[0];
                    Some((
                        separator,
                        Box::new(Node::Leaf {
                            keys: sib_keys,
                            children: sib_children,
                        }),
                    ))
                } else {
                    None
                }
            }
            Node::Internal { keys, children } => {
                let idx = child_index(keys, key);
                if let Some((separator, sibling)) = children[idx].insert(key, slot) {
                    keys.insert(idx, separator);
                    children.insert(idx + 1, sibling);
                }

                if keys.len() > BTREE_BRANCHING_FACTOR {
                    let split_at = keys.len() / 2;
                    let promoted = keys[split_at];
                    let sib_keys = keys.split_off(split_at + 1);
                    let sib_children = children.split_off(split_at + 1);
                    keys.truncate(split_at);
                    Some((
                        promoted,
                        Box::new(Node::Internal {
                            keys: sib_keys,
                            children: sib_children,
                        }),
                    ))
                } else {
                    None
                }
            }
        }
    }

    fn search(&self, key: u32) -> Option<SlotId> {
        match self {
            Node::Leaf { keys, children } => keys.binary_search(&key).ok().map(|i| children[i]),
            Node::Internal { keys, children } => children[child_index(keys, key)].search(key),
        }
    }
}

/// `children[i]` covers every key `< keys[i]`; `children[keys.len()]` covers
/// everything `>= keys[keys.len() - 1]`. Mirrors a standard B+ tree descent.
fn child_index(keys: &[u32], key: u32) -> usize {
    keys.partition_point(|&k| k <= key)
}

/// A per-page index from record key to slot id.
///
/// There is no `next_leaf` sibling pointer, a deliberate deviation from the
/// documented leaf shape (see `SPEC_FULL.md` §9 and `DESIGN.md`): leaves
/// live by value inside a parent's `Box<Node>` and move on every split, so a
/// real link would need an arena of id-addressable nodes to host a pointer
/// nothing here walks — this index only ever does point `insert`/`search`,
/// never a range scan.
#[derive(Debug, Clone)]
pub struct BTreeIndex {
    root: Node,
}

impl BTreeIndex {
    pub fn new() -> BTreeIndex {
        BTreeIndex { root: Node::leaf() }
    }

    /// Rebuilds an index from a page's existing `(key, slot)` pairs, in
    /// whatever order they're handed in. Called once per page load.
    pub fn rebuild<I: IntoIterator<Item = (u32, SlotId)>>(entries: I) -> BTreeIndex {
        let mut index = BTreeIndex::new();
        for (key, slot) in entries {
            index.insert(key, slot);
        }
        index
    }

    pub fn insert(&mut self, key: u32, slot: SlotId) {
        if let Some((separator, sibling)) = self.root.insert(key, slot) {
            let old_root = std::mem::replace(&mut self.root, Node::leaf());
            self.root = Node::Internal {
                keys: vec![separator],
                children: vec![Box::new(old_root), sibling],
            };
        }
    }

    pub fn search(&self, key: u32) -> Option<SlotId> {
        self.root.search(key)
    }
}

impl Default for BTreeIndex {
    fn default() -> BTreeIndex {
        BTreeIndex::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn search_miss_on_empty_index() {
        let index = BTreeIndex::new();
        assert_eq!(index.search(1), None);
    }

    #[test]
    fn insert_then_search_finds_slot() {
        let mut index = BTreeIndex::new();
        index.insert(5, 0);
        index.insert(1, 1);
        index.insert(3, 2);

        assert_eq!(index.search(5), Some(0));
        assert_eq!(index.search(1), Some(1));
        assert_eq!(index.search(3), Some(2));
        assert_eq!(index.search(2), None);
    }

    #[test]
    fn survives_enough_inserts_to_force_root_splits() {
        let mut index = BTreeIndex::new();
        let count = (BTREE_BRANCHING_FACTOR as u32) * 3 + 17;

        for key in 0..count {
            // insert out of order so splits happen on both sides of the tree
            let shuffled = (key * 7919) % count;
            index.insert(shuffled, shuffled as SlotId);
        }

        for key in 0..count {
            assert_eq!(index.search(key), Some(key as SlotId), "key {key} missing");
        }
        assert_eq!(index.search(count), None);
    }

    #[test]
    fn rebuild_reconstructs_lookups() {
        let entries = vec![(10u32, 0u16), (20, 1), (5, 2)];
        let index = BTreeIndex::rebuild(entries);

        assert_eq!(index.search(10), Some(0));
        assert_eq!(index.search(20), Some(1));
        assert_eq!(index.search(5), Some(2));
        assert_eq!(index.search(6), None);
    }
}
