//! Account directory: a byte-wise prefix tree keyed by farmer id.
//!
//! Nodes live in an arena and point back at their parent, which lets a
//! delete prune upward and lets prefix search rebuild keys without carrying
//! a path around. A value hangs off a synthetic child under
//! [`TERMINATOR`], so a key that is also a prefix of another key (`"ab"` and
//! `"abc"`) can still carry its own value.
//!
//! `put`/`get`/`delete` are O(key length); `keys_with_prefix` is
//! O(subtree size).

use std::collections::BTreeMap;

use crate::error::{Result, SupervisorError};

/// Marks a value-bearing node. Never part of a valid farmer id.
pub const TERMINATOR: u8 = 0x0;

const ROOT: usize = 0;

#[derive(Debug)]
struct TrieNode<V> {
    byte: u8,
    parent: Option<usize>,
    depth: usize,
    children: BTreeMap<u8, usize>,
    value: Option<V>,
}

impl<V> TrieNode<V> {
    fn root() -> Self {
        TrieNode {
            byte: 0,
            parent: None,
            depth: 0,
            children: BTreeMap::new(),
            value: None,
        }
    }

    fn is_terminal(&self) -> bool {
        self.depth > 0 && self.byte == TERMINATOR && self.value.is_some()
    }
}

#[derive(Debug)]
pub struct AccountTree<V> {
    nodes: Vec<Option<TrieNode<V>>>,
    free: Vec<usize>,
    size: usize,
}

impl<V> Default for AccountTree<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V> AccountTree<V> {
    pub fn new() -> Self {
        AccountTree {
            nodes: vec![Some(TrieNode::root())],
            free: Vec::new(),
            size: 0,
        }
    }

    /// Number of value-bearing keys.
    pub fn len(&self) -> usize {
        self.size
    }

    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    /// Insert or overwrite. Returns the previous value for `key`, if any;
    /// overwriting does not change `len()`.
    pub fn put(&mut self, key: &str, value: V) -> Result<Option<V>> {
        if key.as_bytes().contains(&TERMINATOR) {
            return Err(SupervisorError::InvalidArgument(
                "key must not contain NUL bytes".to_string(),
            ));
        }

        let mut cur = ROOT;
        for &b in key.as_bytes() {
            let next = self.node(cur).and_then(|n| n.children.get(&b).copied());
            cur = match next {
                Some(idx) => idx,
                None => self.add_child(cur, b),
            };
        }

        let term = self.node(cur).and_then(|n| n.children.get(&TERMINATOR).copied());
        let term = match term {
            Some(idx) => idx,
            None => self.add_child(cur, TERMINATOR),
        };

        let previous = self.node_mut(term).and_then(|n| n.value.replace(value));
        if previous.is_none() {
            self.size += 1;
        }
        Ok(previous)
    }

    pub fn get(&self, key: &str) -> Result<&V> {
        let term = self.terminal_of(key).ok_or(SupervisorError::NotFound)?;
        self.node(term)
            .and_then(|n| n.value.as_ref())
            .ok_or(SupervisorError::NotFound)
    }

    pub fn get_mut(&mut self, key: &str) -> Result<&mut V> {
        let term = self.terminal_of(key).ok_or(SupervisorError::NotFound)?;
        self.node_mut(term)
            .and_then(|n| n.value.as_mut())
            .ok_or(SupervisorError::NotFound)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.terminal_of(key).is_some()
    }

    /// Remove `key` and prune every node left childless on the way up,
    /// stopping at the first ancestor still shared by another key.
    pub fn delete(&mut self, key: &str) -> Result<V> {
        let term = self.terminal_of(key).ok_or(SupervisorError::NotFound)?;
        let removed = self.release(term).ok_or(SupervisorError::NotFound)?;
        let value = removed.value.ok_or(SupervisorError::NotFound)?;
        self.size -= 1;

        let mut cur = removed.parent.unwrap_or(ROOT);
        while cur != ROOT {
            let childless = self.node(cur).map_or(false, |n| n.children.is_empty());
            if !childless {
                break;
            }
            match self.release(cur) {
                Some(node) => cur = node.parent.unwrap_or(ROOT),
                None => break,
            }
        }

        Ok(value)
    }

    /// True if any stored key starts with `prefix`.
    pub fn has_prefix(&self, prefix: &str) -> bool {
        self.find(prefix.as_bytes()).is_some()
    }

    /// All stored keys starting with `prefix`, sorted.
    pub fn keys_with_prefix(&self, prefix: &str) -> Vec<String> {
        let start = match self.find(prefix.as_bytes()) {
            Some(idx) => idx,
            None => return Vec::new(),
        };

        let mut keys = Vec::new();
        let mut stack = vec![start];
        while let Some(idx) = stack.pop() {
            let Some(node) = self.node(idx) else { continue };
            stack.extend(node.children.values().copied());
            if node.is_terminal() {
                keys.push(self.key_of(idx));
            }
        }

        keys.sort();
        keys
    }

    pub fn keys(&self) -> Vec<String> {
        self.keys_with_prefix("")
    }

    pub fn clear(&mut self) {
        *self = AccountTree::new();
    }

    /// Live node count including the root.
    #[cfg(test)]
    fn node_count(&self) -> usize {
        self.nodes.iter().filter(|n| n.is_some()).count()
    }

    fn node(&self, idx: usize) -> Option<&TrieNode<V>> {
        self.nodes.get(idx).and_then(Option::as_ref)
    }

    fn node_mut(&mut self, idx: usize) -> Option<&mut TrieNode<V>> {
        self.nodes.get_mut(idx).and_then(Option::as_mut)
    }

    fn find(&self, bytes: &[u8]) -> Option<usize> {
        let mut cur = ROOT;
        for b in bytes {
            cur = *self.node(cur)?.children.get(b)?;
        }
        Some(cur)
    }

    fn terminal_of(&self, key: &str) -> Option<usize> {
        let idx = self.find(key.as_bytes())?;
        let term = *self.node(idx)?.children.get(&TERMINATOR)?;
        self.node(term)?.is_terminal().then_some(term)
    }

    fn add_child(&mut self, parent: usize, byte: u8) -> usize {
        let depth = self.node(parent).map_or(0, |n| n.depth) + 1;
        let node = TrieNode {
            byte,
            parent: Some(parent),
            depth,
            children: BTreeMap::new(),
            value: None,
        };

        let idx = match self.free.pop() {
            Some(slot) => {
                self.nodes[slot] = Some(node);
                slot
            }
            None => {
                self.nodes.push(Some(node));
                self.nodes.len() - 1
            }
        };

        if let Some(p) = self.node_mut(parent) {
            p.children.insert(byte, idx);
        }
        idx
    }

    /// Detach a node from its parent and return it to the free list.
    fn release(&mut self, idx: usize) -> Option<TrieNode<V>> {
        let node = self.nodes.get_mut(idx)?.take()?;
        if let Some(parent) = node.parent.and_then(|p| self.node_mut(p)) {
            parent.children.remove(&node.byte);
        }
        self.free.push(idx);
        Some(node)
    }

    /// Rebuild the key of a terminal node by walking parents up to depth 0.
    fn key_of(&self, term: usize) -> String {
        let mut bytes = Vec::new();
        let mut cur = self.node(term).and_then(|n| n.parent);
        while let Some(idx) = cur {
            let Some(node) = self.node(idx) else { break };
            if node.depth == 0 {
                break;
            }
            bytes.push(node.byte);
            cur = node.parent;
        }
        bytes.reverse();
        String::from_utf8_lossy(&bytes).into_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_put_get_roundtrip() {
        let mut tree = AccountTree::new();
        tree.put("farmer-1", 1).expect("put");
        assert_eq!(*tree.get("farmer-1").expect("get"), 1);
        assert!(matches!(tree.get("farmer-2"), Err(SupervisorError::NotFound)));
        // prefix of a stored key is not itself a key
        assert!(matches!(tree.get("farmer-"), Err(SupervisorError::NotFound)));
    }

    #[test]
    fn test_len_counts_distinct_keys() {
        let mut tree = AccountTree::new();
        for (i, k) in ["a", "ab", "abc", "b", "zz"].iter().enumerate() {
            tree.put(k, i).expect("put");
        }
        assert_eq!(tree.len(), 5);

        let previous = tree.put("ab", 99).expect("overwrite");
        assert_eq!(previous, Some(1));
        assert_eq!(tree.len(), 5);
        assert_eq!(*tree.get("ab").expect("get"), 99);
    }

    #[test]
    fn test_delete_then_get() {
        let mut tree = AccountTree::new();
        tree.put("abc", "v").expect("put");
        assert_eq!(tree.delete("abc").expect("delete"), "v");
        assert!(matches!(tree.get("abc"), Err(SupervisorError::NotFound)));
        assert!(matches!(tree.delete("abc"), Err(SupervisorError::NotFound)));
        assert_eq!(tree.len(), 0);
        assert!(!tree.has_prefix("a"));
    }

    #[test]
    fn test_delete_prunes_only_unshared_branch() {
        let mut tree = AccountTree::new();
        tree.put("abc", 1).expect("put");
        let single = tree.node_count();
        tree.put("abd", 2).expect("put");
        // "abd" adds 'd' plus its terminator
        assert_eq!(tree.node_count(), single + 2);

        tree.delete("abd").expect("delete");
        assert_eq!(tree.node_count(), single);
        assert_eq!(*tree.get("abc").expect("get"), 1);

        tree.delete("abc").expect("delete");
        assert_eq!(tree.node_count(), 1, "only root left");
    }

    #[test]
    fn test_key_that_is_prefix_of_another() {
        let mut tree = AccountTree::new();
        tree.put("ab", 1).expect("put");
        tree.put("abc", 2).expect("put");

        tree.delete("ab").expect("delete ab");
        assert_eq!(*tree.get("abc").expect("abc survives"), 2);
        assert!(tree.has_prefix("ab"));

        tree.put("ab", 3).expect("put");
        tree.delete("abc").expect("delete abc");
        assert_eq!(*tree.get("ab").expect("ab survives"), 3);
        assert_eq!(tree.keys(), vec!["ab".to_string()]);
    }

    #[test]
    fn test_prefix_search() {
        let mut tree = AccountTree::new();
        tree.put("abc", ()).expect("put");
        tree.put("acb", ()).expect("put");

        assert_eq!(tree.keys_with_prefix("a"), vec!["abc".to_string(), "acb".to_string()]);
        assert!(tree.keys_with_prefix("b").is_empty());
        assert_eq!(tree.keys_with_prefix("ab"), vec!["abc".to_string()]);
        assert!(tree.has_prefix("ac"));
        assert!(!tree.has_prefix("ad"));
        assert_eq!(tree.keys().len(), 2);
    }

    #[test]
    fn test_get_mut_updates_in_place() {
        let mut tree = AccountTree::new();
        tree.put("f1", 10u64).expect("put");
        *tree.get_mut("f1").expect("get_mut") += 5;
        assert_eq!(*tree.get("f1").expect("get"), 15);
    }

    #[test]
    fn test_nul_key_rejected() {
        let mut tree: AccountTree<u8> = AccountTree::new();
        assert!(matches!(tree.put("a\0b", 1), Err(SupervisorError::InvalidArgument(_))));
        assert!(tree.is_empty());
    }

    #[test]
    fn test_freed_slots_are_reused() {
        let mut tree = AccountTree::new();
        tree.put("xyz", 1).expect("put");
        let slots = tree.nodes.len();
        tree.delete("xyz").expect("delete");
        tree.put("uvw", 2).expect("put");
        assert_eq!(tree.nodes.len(), slots);
        assert_eq!(tree.keys(), vec!["uvw".to_string()]);
    }
}
