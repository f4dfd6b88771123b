//! Fixed-depth incremental Merkle tree over note commitments.
//!
//! Depth counts hash levels: a depth-D tree holds `2^D` leaves and its
//! proofs carry exactly D siblings, with the root alone at level D.
//! Unoccupied positions take per-level empty-subtree constants, so sparse
//! trees hash without materializing empty nodes. Committed leaves never
//! change; the tree only grows.

use std::collections::HashMap;

use halo2curves_axiom::bn256::Fr;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::hash::{empty_subtree_root, fr_from_hex, fr_to_hex, merkle_node, MAX_TREE_DEPTH};

/// Sibling path plus direction bits proving one leaf under the root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MerkleProof {
    /// Position of the proven leaf.
    pub leaf_index: u64,
    /// Sibling hash at each level, leaf level first.
    pub siblings: Vec<Fr>,
    /// 1 when the running node is the left operand at that level, else 0.
    pub indices: Vec<u8>,
}

impl MerkleProof {
    /// Folds the path upward from `leaf`, yielding the root this proof
    /// commits to. Inclusion holds when the result equals the tree root.
    pub fn root_from(&self, leaf: Fr) -> Fr {
        let mut node = leaf;
        for (sibling, bit) in self.siblings.iter().zip(self.indices.iter()) {
            node = if *bit == 1 {
                merkle_node(node, *sibling)
            } else {
                merkle_node(*sibling, node)
            };
        }
        node
    }
}

/// Serialized tree state: committed leaves plus depth. Restoring replays
/// the leaves and must reproduce an identical root.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TreeSnapshot {
    pub depth: usize,
    pub leaves: Vec<SnapshotLeaf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotLeaf {
    pub index: u64,
    /// 0x-prefixed big-endian hex scalar.
    pub value: String,
}

/// Incremental Merkle tree with sparse node storage.
#[derive(Debug, Clone)]
pub struct CommitmentTree {
    depth: usize,
    // (level, index) -> hash; level 0 holds leaves, level `depth` the root.
    nodes: HashMap<(usize, u64), Fr>,
    next_index: u64,
}

impl CommitmentTree {
    pub fn new(depth: usize) -> Result<Self> {
        if depth == 0 || depth > MAX_TREE_DEPTH {
            return Err(Error::InvalidConfig(format!(
                "tree depth must be 1..={MAX_TREE_DEPTH}, got {depth}"
            )));
        }
        Ok(CommitmentTree {
            depth,
            nodes: HashMap::new(),
            next_index: 0,
        })
    }

    pub fn depth(&self) -> usize {
        self.depth
    }

    /// Number of leaf positions, `2^depth`.
    pub fn capacity(&self) -> u64 {
        1u64 << self.depth
    }

    /// Next unused leaf index (the frontier). Gaps below it may exist when
    /// leaves arrive out of order.
    pub fn next_index(&self) -> u64 {
        self.next_index
    }

    pub fn contains(&self, index: u64) -> bool {
        self.nodes.contains_key(&(0, index))
    }

    pub fn leaf(&self, index: u64) -> Option<Fr> {
        self.nodes.get(&(0, index)).copied()
    }

    /// Committed leaves in index order.
    pub fn committed_leaves(&self) -> Vec<(u64, Fr)> {
        let mut leaves: Vec<(u64, Fr)> = self
            .nodes
            .iter()
            .filter(|((level, _), _)| *level == 0)
            .map(|((_, index), value)| (*index, *value))
            .collect();
        leaves.sort_by_key(|(index, _)| *index);
        leaves
    }

    /// Current root. Maintained incrementally by `insert`, so this is a
    /// plain lookup.
    pub fn root(&self) -> Fr {
        self.nodes
            .get(&(self.depth, 0))
            .copied()
            .unwrap_or_else(|| empty_subtree_root(self.depth))
    }

    /// Commits `value` at `index` and recomputes the O(depth) ancestors.
    ///
    /// Re-inserting the identical value is a no-op; a different value at an
    /// occupied index is a `ConflictingLeaf`, never an overwrite.
    pub fn insert(&mut self, value: Fr, index: u64) -> Result<()> {
        if index >= self.capacity() {
            return Err(Error::IndexOutOfBounds {
                index,
                depth: self.depth,
            });
        }
        if let Some(existing) = self.nodes.get(&(0, index)) {
            if *existing == value {
                return Ok(());
            }
            return Err(Error::ConflictingLeaf { index });
        }

        self.nodes.insert((0, index), value);
        let mut node = value;
        let mut node_index = index;
        for level in 0..self.depth {
            let is_left = node_index % 2 == 0;
            let sibling_index = if is_left { node_index + 1 } else { node_index - 1 };
            let sibling = self
                .nodes
                .get(&(level, sibling_index))
                .copied()
                .unwrap_or_else(|| empty_subtree_root(level));
            node = if is_left {
                merkle_node(node, sibling)
            } else {
                merkle_node(sibling, node)
            };
            node_index /= 2;
            self.nodes.insert((level + 1, node_index), node);
        }
        self.next_index = self.next_index.max(index + 1);
        Ok(())
    }

    /// Inclusion proof for the leaf at `index`.
    pub fn proof(&self, index: u64) -> Result<MerkleProof> {
        if index >= self.capacity() {
            return Err(Error::IndexOutOfBounds {
                index,
                depth: self.depth,
            });
        }
        if !self.contains(index) {
            return Err(Error::LeafNotPresent(index));
        }

        let mut siblings = Vec::with_capacity(self.depth);
        let mut indices = Vec::with_capacity(self.depth);
        let mut node_index = index;
        for level in 0..self.depth {
            let is_left = node_index % 2 == 0;
            let sibling_index = if is_left { node_index + 1 } else { node_index - 1 };
            let sibling = self
                .nodes
                .get(&(level, sibling_index))
                .copied()
                .unwrap_or_else(|| empty_subtree_root(level));
            siblings.push(sibling);
            indices.push(if is_left { 1 } else { 0 });
            node_index /= 2;
        }
        Ok(MerkleProof {
            leaf_index: index,
            siblings,
            indices,
        })
    }

    pub fn to_snapshot(&self) -> TreeSnapshot {
        TreeSnapshot {
            depth: self.depth,
            leaves: self
                .committed_leaves()
                .into_iter()
                .map(|(index, value)| SnapshotLeaf {
                    index,
                    value: fr_to_hex(&value),
                })
                .collect(),
        }
    }

    /// Rebuilds a tree by replaying the snapshot's leaves. The result holds
    /// the same root as the tree the snapshot was taken from.
    pub fn from_snapshot(snapshot: &TreeSnapshot) -> Result<Self> {
        let mut tree = CommitmentTree::new(snapshot.depth)?;
        for leaf in &snapshot.leaves {
            let value = fr_from_hex(&leaf.value)?;
            tree.insert(value, leaf.index)?;
        }
        Ok(tree)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(&self.to_snapshot())?)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        let snapshot: TreeSnapshot = serde_json::from_str(json)?;
        CommitmentTree::from_snapshot(&snapshot)
    }
}
