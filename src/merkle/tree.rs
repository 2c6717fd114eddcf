/*
    Copyright © 2024, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! A persistent, authenticated, ordered map from byte keys to byte values, stored in a
//! [`KVStore`].
//!
//! ## Canonical shape
//!
//! The tree is a binary search tree ordered by key, heap-ordered by a **priority** that is
//! derived from each key's SHA256. Distinct keys get distinct priorities (up to SHA256
//! collisions), so the shape of the tree — and therefore its root hash — is a pure function of
//! the set of entries it holds. Two trees with equal `(key, value)` sets have equal root
//! hashes no matter in which order entries were inserted or removed. Balance is probabilistic:
//! hash-derived priorities are uniform, giving expected logarithmic depth.
//!
//! ## Persistence and sharing
//!
//! Nodes are immutable and shared through [`Arc`]: every mutating operation rebuilds only the
//! path it touches and leaves the rest of the tree shared with previous versions, so
//! [`clone`](Clone::clone)-ing a tree is cheap and clones never observe each other's writes.
//!
//! [`save`](MerkleTree::save) writes the nodes created since the last save into a
//! [`WriteBatch`] under keys derived from their hashes; [`load`](MerkleTree::load) hydrates a
//! tree lazily from a saved root hash, fetching nodes from the store as traversals first reach
//! them. A node that the store claims to have but cannot produce or decode is disk corruption,
//! which is fatal.

use std::cmp::Ordering;
use std::sync::{
    atomic::{AtomicBool, Ordering as AtomicOrdering},
    Arc,
};

use borsh::{BorshDeserialize, BorshSerialize};
use sha2::Digest;

use crate::kv_store::{combine, KVGet, KVStore, WriteBatch};
use crate::types::crypto_primitives::CryptoHasher;
use crate::types::data_types::CryptoHash;

/// An authenticated ordered map over a [`KVStore`].
///
/// All node records are namespaced under `prefix` in the store's key space, so several trees
/// can share one store.
#[derive(Clone)]
pub struct MerkleTree<K: KVStore> {
    db: K,
    prefix: &'static [u8],
    root: Option<NodeRef>,
}

impl<K: KVStore> MerkleTree<K> {
    /// Create an empty tree.
    pub fn new(db: K, prefix: &'static [u8]) -> MerkleTree<K> {
        Self {
            db,
            prefix,
            root: None,
        }
    }

    /// Open the tree whose root was previously [`save`](Self::save)d under `root_hash`.
    /// `None` opens an empty tree.
    ///
    /// The root node is fetched from the store immediately (so a dangling `root_hash` fails
    /// here); everything below it is fetched lazily as traversals first reach it.
    pub fn load(db: K, prefix: &'static [u8], root_hash: Option<CryptoHash>) -> MerkleTree<K> {
        let mut tree = Self {
            db,
            prefix,
            root: None,
        };
        if let Some(hash) = root_hash {
            let root = tree.resolve(&NodeRef::Unloaded { hash, size: 0 });
            tree.root = Some(NodeRef::Loaded(root));
        }
        tree
    }

    /// Get the value stored under `key`, along with the key's rank: the number of keys in the
    /// tree strictly smaller than it. For an absent key the rank is the position at which it
    /// would be inserted.
    pub fn get(&self, key: &[u8]) -> (u64, Option<Vec<u8>>) {
        let mut index: u64 = 0;
        let mut cursor = self.root.clone();
        while let Some(node_ref) = cursor {
            let node = self.resolve(&node_ref);
            match key.cmp(&node.key) {
                Ordering::Less => cursor = node.left.clone(),
                Ordering::Greater => {
                    index += node.left.as_ref().map_or(0, |left| left.size()) + 1;
                    cursor = node.right.clone();
                }
                Ordering::Equal => {
                    index += node.left.as_ref().map_or(0, |left| left.size());
                    return (index, Some(node.value.clone()));
                }
            }
        }
        (index, None)
    }

    /// Store `value` under `key`. Returns `true` if the key was already present (an update),
    /// `false` if it is new.
    pub fn set(&mut self, key: &[u8], value: &[u8]) -> bool {
        let root = self.root.clone();
        let (new_root, updated) = self.insert_into(root.as_ref(), key, value);
        self.root = Some(NodeRef::Loaded(new_root));
        updated
    }

    /// Remove `key` from the tree, returning the value it held, if any.
    pub fn remove(&mut self, key: &[u8]) -> Option<Vec<u8>> {
        let root = self.root.clone();
        let (new_root, removed) = self.delete_from(root.as_ref(), key);
        if removed.is_some() {
            self.root = new_root;
        }
        removed
    }

    /// Call `f` on every entry in ascending key order, until `f` returns `true` ("stop") or
    /// the entries run out. Returns whether iteration was stopped.
    pub fn iterate<F: FnMut(&[u8], &[u8]) -> bool>(&self, mut f: F) -> bool {
        match &self.root {
            Some(root) => self.iterate_subtree(root, &mut f),
            None => false,
        }
    }

    /// The number of entries in the tree.
    pub fn len(&self) -> u64 {
        self.root.as_ref().map_or(0, |root| root.size())
    }

    /// Check whether the tree has no entries.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The root hash authenticating the tree's current contents, or `None` for the empty tree.
    pub fn root_hash(&self) -> Option<CryptoHash> {
        self.root.as_ref().map(|root| root.hash())
    }

    /// Write every node created since the last save into `batch`. The caller must commit the
    /// batch to the tree's store; the written nodes are what a later
    /// [`load`](Self::load) of [`root_hash`](Self::root_hash) traverses.
    pub fn save(&self, batch: &mut K::WriteBatch) {
        if let Some(root) = &self.root {
            self.save_subtree(root, batch);
        }
    }

    fn insert_into(
        &self,
        node_ref: Option<&NodeRef>,
        key: &[u8],
        value: &[u8],
    ) -> (Arc<Node>, bool) {
        let node = match node_ref {
            None => return (Node::new(key.to_vec(), value.to_vec(), None, None), false),
            Some(node_ref) => self.resolve(node_ref),
        };
        match key.cmp(&node.key) {
            Ordering::Equal => (
                Node::new(
                    key.to_vec(),
                    value.to_vec(),
                    node.left.clone(),
                    node.right.clone(),
                ),
                true,
            ),
            Ordering::Less => {
                let (new_left, updated) = self.insert_into(node.left.as_ref(), key, value);
                let new_root = if new_left.priority > node.priority {
                    // Rotate right: the rebuilt left child takes this node's place.
                    let demoted = Node::new(
                        node.key.clone(),
                        node.value.clone(),
                        new_left.right.clone(),
                        node.right.clone(),
                    );
                    Node::new(
                        new_left.key.clone(),
                        new_left.value.clone(),
                        new_left.left.clone(),
                        Some(NodeRef::Loaded(demoted)),
                    )
                } else {
                    Node::new(
                        node.key.clone(),
                        node.value.clone(),
                        Some(NodeRef::Loaded(new_left)),
                        node.right.clone(),
                    )
                };
                (new_root, updated)
            }
            Ordering::Greater => {
                let (new_right, updated) = self.insert_into(node.right.as_ref(), key, value);
                let new_root = if new_right.priority > node.priority {
                    // Rotate left.
                    let demoted = Node::new(
                        node.key.clone(),
                        node.value.clone(),
                        node.left.clone(),
                        new_right.left.clone(),
                    );
                    Node::new(
                        new_right.key.clone(),
                        new_right.value.clone(),
                        Some(NodeRef::Loaded(demoted)),
                        new_right.right.clone(),
                    )
                } else {
                    Node::new(
                        node.key.clone(),
                        node.value.clone(),
                        node.left.clone(),
                        Some(NodeRef::Loaded(new_right)),
                    )
                };
                (new_root, updated)
            }
        }
    }

    fn delete_from(
        &self,
        node_ref: Option<&NodeRef>,
        key: &[u8],
    ) -> (Option<NodeRef>, Option<Vec<u8>>) {
        let Some(node_ref) = node_ref else {
            return (None, None);
        };
        let node = self.resolve(node_ref);
        match key.cmp(&node.key) {
            Ordering::Equal => (
                self.merge(node.left.clone(), node.right.clone()),
                Some(node.value.clone()),
            ),
            Ordering::Less => {
                let (new_left, removed) = self.delete_from(node.left.as_ref(), key);
                if removed.is_none() {
                    return (Some(node_ref.clone()), None);
                }
                let new_root = Node::new(
                    node.key.clone(),
                    node.value.clone(),
                    new_left,
                    node.right.clone(),
                );
                (Some(NodeRef::Loaded(new_root)), removed)
            }
            Ordering::Greater => {
                let (new_right, removed) = self.delete_from(node.right.as_ref(), key);
                if removed.is_none() {
                    return (Some(node_ref.clone()), None);
                }
                let new_root = Node::new(
                    node.key.clone(),
                    node.value.clone(),
                    node.left.clone(),
                    new_right,
                );
                (Some(NodeRef::Loaded(new_root)), removed)
            }
        }
    }

    // Merge two subtrees, all of `a`'s keys being smaller than all of `b`'s. The node with the
    // higher priority roots the merged subtree, keeping the shape canonical.
    fn merge(&self, a: Option<NodeRef>, b: Option<NodeRef>) -> Option<NodeRef> {
        match (a, b) {
            (None, b) => b,
            (a, None) => a,
            (Some(a_ref), Some(b_ref)) => {
                let a_node = self.resolve(&a_ref);
                let b_node = self.resolve(&b_ref);
                if a_node.priority > b_node.priority {
                    let right = self.merge(a_node.right.clone(), Some(b_ref));
                    Some(NodeRef::Loaded(Node::new(
                        a_node.key.clone(),
                        a_node.value.clone(),
                        a_node.left.clone(),
                        right,
                    )))
                } else {
                    let left = self.merge(Some(a_ref), b_node.left.clone());
                    Some(NodeRef::Loaded(Node::new(
                        b_node.key.clone(),
                        b_node.value.clone(),
                        left,
                        b_node.right.clone(),
                    )))
                }
            }
        }
    }

    fn iterate_subtree<F: FnMut(&[u8], &[u8]) -> bool>(
        &self,
        node_ref: &NodeRef,
        f: &mut F,
    ) -> bool {
        let node = self.resolve(node_ref);
        if let Some(left) = &node.left {
            if self.iterate_subtree(left, f) {
                return true;
            }
        }
        if f(&node.key, &node.value) {
            return true;
        }
        if let Some(right) = &node.right {
            if self.iterate_subtree(right, f) {
                return true;
            }
        }
        false
    }

    fn save_subtree(&self, node_ref: &NodeRef, batch: &mut K::WriteBatch) {
        if let NodeRef::Loaded(node) = node_ref {
            if !node.persisted.swap(true, AtomicOrdering::Relaxed) {
                if let Some(left) = &node.left {
                    self.save_subtree(left, batch);
                }
                if let Some(right) = &node.right {
                    self.save_subtree(right, batch);
                }
                let disk = NodeDisk {
                    key: node.key.clone(),
                    value: node.value.clone(),
                    size: node.size,
                    left: node.left.as_ref().map(|left| (left.hash(), left.size())),
                    right: node.right.as_ref().map(|right| (right.hash(), right.size())),
                };
                batch.set(
                    &combine(self.prefix, &node.hash.bytes()),
                    &disk.try_to_vec().unwrap(),
                );
            }
        }
    }

    // Materialize the node behind `node_ref`, fetching it from the store if it is not in
    // memory. A dangling or undecodable reference means the store is corrupt.
    fn resolve(&self, node_ref: &NodeRef) -> Arc<Node> {
        match node_ref {
            NodeRef::Loaded(node) => node.clone(),
            NodeRef::Unloaded { hash, .. } => {
                let node_key = combine(self.prefix, &hash.bytes());
                let bytes = self.db.get(&node_key).unwrap_or_else(|| {
                    panic!("Merkle tree node {} missing from the store", hash)
                });
                let disk = NodeDisk::deserialize(&mut bytes.as_slice()).unwrap_or_else(|_| {
                    panic!("Merkle tree node {} cannot be decoded", hash)
                });
                let priority = priority_of(&disk.key);
                Arc::new(Node {
                    priority,
                    size: disk.size,
                    hash: *hash,
                    left: disk.left.map(|(hash, size)| NodeRef::Unloaded { hash, size }),
                    right: disk.right.map(|(hash, size)| NodeRef::Unloaded { hash, size }),
                    key: disk.key,
                    value: disk.value,
                    persisted: AtomicBool::new(true),
                })
            }
        }
    }
}

/// A handle on a node: either materialized in memory or a (hash, size) pointer into the store.
#[derive(Clone)]
enum NodeRef {
    Loaded(Arc<Node>),
    Unloaded { hash: CryptoHash, size: u64 },
}

impl NodeRef {
    fn hash(&self) -> CryptoHash {
        match self {
            NodeRef::Loaded(node) => node.hash,
            NodeRef::Unloaded { hash, .. } => *hash,
        }
    }

    fn size(&self) -> u64 {
        match self {
            NodeRef::Loaded(node) => node.size,
            NodeRef::Unloaded { size, .. } => *size,
        }
    }
}

struct Node {
    key: Vec<u8>,
    value: Vec<u8>,
    priority: CryptoHash,
    size: u64,
    hash: CryptoHash,
    left: Option<NodeRef>,
    right: Option<NodeRef>,
    // Set once the node has been handed to a write batch (or was read from the store), so
    // save only walks subtrees containing new nodes.
    persisted: AtomicBool,
}

impl Node {
    fn new(key: Vec<u8>, value: Vec<u8>, left: Option<NodeRef>, right: Option<NodeRef>) -> Arc<Node> {
        let size = 1
            + left.as_ref().map_or(0, |left| left.size())
            + right.as_ref().map_or(0, |right| right.size());
        let priority = priority_of(&key);
        let hash = node_hash(&key, &value, size, left.as_ref(), right.as_ref());
        Arc::new(Node {
            key,
            value,
            priority,
            size,
            hash,
            left,
            right,
            persisted: AtomicBool::new(false),
        })
    }
}

/// The on-store encoding of a node. Priorities are recomputed from the key on load.
#[derive(BorshDeserialize, BorshSerialize)]
struct NodeDisk {
    key: Vec<u8>,
    value: Vec<u8>,
    size: u64,
    left: Option<(CryptoHash, u64)>,
    right: Option<(CryptoHash, u64)>,
}

fn priority_of(key: &[u8]) -> CryptoHash {
    CryptoHash::new(CryptoHasher::digest(key).into())
}

fn node_hash(
    key: &[u8],
    value: &[u8],
    size: u64,
    left: Option<&NodeRef>,
    right: Option<&NodeRef>,
) -> CryptoHash {
    let mut hasher = CryptoHasher::new();
    hasher.update(&size.to_le_bytes());
    hasher.update(&(key.len() as u64).to_le_bytes());
    hasher.update(key);
    hasher.update(&CryptoHasher::digest(value));
    hasher.update(&left.map_or(CryptoHash::zero(), |left| left.hash()).bytes());
    hasher.update(&right.map_or(CryptoHash::zero(), |right| right.hash()).bytes());
    CryptoHash::new(hasher.finalize().into())
}
