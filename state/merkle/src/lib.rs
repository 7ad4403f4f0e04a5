//! Sparse Merkle state for note commitments.
//!
//! The pool's tree is append-only, 20 levels deep, and far too large to
//! materialize densely. This crate rebuilds it from the ordered list of
//! `(commitment, leaf_index)` pairs observed on-chain, keeping only the
//! populated cells and falling back to precomputed per-level zero hashes
//! everywhere else. The build is O(#leaves * depth) hashes.
//!
//! Cross-checking the resulting root against the contract's known-root
//! history is the caller's job; this crate stays chain-agnostic.

use std::collections::{BTreeMap, HashMap};
use std::sync::LazyLock;

use thiserror::Error;

use dogenado_crypto::{fr_reduce_bytes, hash2, keccak256, Fr};

/// Tree depth fixed by the deployed circuits.
pub const TREE_DEPTH: usize = 20;

/// Seed string for the level-0 empty cell.
const ZERO_SEED: &[u8] = b"dogenado";

/// `Z_0 = keccak256("dogenado") mod p`, `Z_{i+1} = H(Z_i, Z_i)`.
/// Index `TREE_DEPTH` holds the root of the empty tree.
static ZERO_HASHES: LazyLock<[Fr; TREE_DEPTH + 1]> = LazyLock::new(|| {
    let mut ladder = [fr_reduce_bytes(&keccak256(ZERO_SEED)); TREE_DEPTH + 1];
    for level in 1..=TREE_DEPTH {
        ladder[level] = hash2(ladder[level - 1], ladder[level - 1]);
    }
    ladder
});

/// The empty-subtree hash at `level`.
pub fn zero_hash(level: usize) -> Fr {
    ZERO_HASHES[level]
}

#[derive(Debug, Error)]
pub enum MerkleError {
    #[error("leaf index {0} exceeds tree capacity")]
    IndexOutOfRange(u64),
    #[error("leaf index {0} is not present in the tree")]
    LeafAbsent(u64),
}

/// Authentication path for one leaf: bottom-up siblings plus direction
/// bits (`1` when the walked node is a right child).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MerklePath {
    pub siblings: [Fr; TREE_DEPTH],
    pub directions: [u8; TREE_DEPTH],
}

impl MerklePath {
    /// Fold a leaf up through the path and return the implied root.
    pub fn compute_root(&self, leaf: Fr) -> Fr {
        let mut current = leaf;
        for (sibling, direction) in self.siblings.iter().zip(self.directions.iter()) {
            current = if *direction == 0 {
                hash2(current, *sibling)
            } else {
                hash2(*sibling, current)
            };
        }
        current
    }
}

/// Sparse reconstruction of the commitment tree.
#[derive(Clone, Debug, Default)]
pub struct SparseTree {
    nodes: HashMap<(u8, u64), Fr>,
    leaf_count: usize,
}

impl SparseTree {
    /// Build from `(leaf_index, commitment)` pairs.
    ///
    /// Duplicate indices resolve to the first occurrence. Indices must be
    /// below 2^TREE_DEPTH.
    pub fn build(entries: &[(u64, Fr)]) -> Result<Self, MerkleError> {
        let capacity = 1u64 << TREE_DEPTH;
        let mut leaves: BTreeMap<u64, Fr> = BTreeMap::new();
        for (index, commitment) in entries {
            if *index >= capacity {
                return Err(MerkleError::IndexOutOfRange(*index));
            }
            leaves.entry(*index).or_insert(*commitment);
        }

        let mut nodes: HashMap<(u8, u64), Fr> = HashMap::new();
        let mut frontier: Vec<u64> = leaves.keys().copied().collect();
        for (index, commitment) in &leaves {
            nodes.insert((0, *index), *commitment);
        }

        for level in 0..TREE_DEPTH {
            let mut parents: Vec<u64> = frontier.iter().map(|index| index >> 1).collect();
            parents.dedup();
            for parent in &parents {
                let left = nodes
                    .get(&(level as u8, parent << 1))
                    .copied()
                    .unwrap_or(ZERO_HASHES[level]);
                let right = nodes
                    .get(&(level as u8, (parent << 1) | 1))
                    .copied()
                    .unwrap_or(ZERO_HASHES[level]);
                nodes.insert((level as u8 + 1, *parent), hash2(left, right));
            }
            frontier = parents;
        }

        Ok(Self {
            nodes,
            leaf_count: leaves.len(),
        })
    }

    /// Number of distinct populated leaves.
    pub fn len(&self) -> usize {
        self.leaf_count
    }

    pub fn is_empty(&self) -> bool {
        self.leaf_count == 0
    }

    /// The tree root; `Z_TREE_DEPTH` when no leaves are populated.
    pub fn root(&self) -> Fr {
        self.nodes
            .get(&(TREE_DEPTH as u8, 0))
            .copied()
            .unwrap_or(ZERO_HASHES[TREE_DEPTH])
    }

    /// The commitment stored at `leaf_index`, when present.
    pub fn leaf(&self, leaf_index: u64) -> Option<Fr> {
        self.nodes.get(&(0, leaf_index)).copied()
    }

    /// Extract the authentication path for a populated leaf.
    pub fn path(&self, leaf_index: u64) -> Result<MerklePath, MerkleError> {
        if leaf_index >= 1u64 << TREE_DEPTH {
            return Err(MerkleError::IndexOutOfRange(leaf_index));
        }
        if !self.nodes.contains_key(&(0, leaf_index)) {
            return Err(MerkleError::LeafAbsent(leaf_index));
        }
        let mut siblings = [ZERO_HASHES[0]; TREE_DEPTH];
        let mut directions = [0u8; TREE_DEPTH];
        let mut position = leaf_index;
        for level in 0..TREE_DEPTH {
            let sibling_index = position ^ 1;
            siblings[level] = self
                .nodes
                .get(&(level as u8, sibling_index))
                .copied()
                .unwrap_or(ZERO_HASHES[level]);
            directions[level] = (position & 1) as u8;
            position >>= 1;
        }
        Ok(MerklePath {
            siblings,
            directions,
        })
    }
}
