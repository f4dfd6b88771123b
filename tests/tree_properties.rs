use std::collections::BTreeMap;

use halo2curves_axiom::bn256::Fr;
use notevault::hash::empty_subtree_root;
use notevault::{merkle_node, CommitmentTree};
use proptest::prelude::*;

const DEPTH: usize = 6;

fn tree_from(leaves: &BTreeMap<u64, u64>) -> CommitmentTree {
    let mut tree = CommitmentTree::new(DEPTH).expect("depth in range");
    for (&index, &value) in leaves {
        tree.insert(Fr::from(value), index).expect("in-range insert");
    }
    tree
}

proptest! {
    // A tree rebuilt from its own snapshot, or replayed leaf-by-leaf in a
    // different order, must land on the same root.
    #[test]
    fn snapshot_and_replay_reproduce_root(
        leaves in prop::collection::btree_map(0u64..64, 1u64..u64::MAX, 0..=32usize),
    ) {
        let tree = tree_from(&leaves);

        let restored = CommitmentTree::from_snapshot(&tree.to_snapshot()).expect("restore");
        prop_assert_eq!(restored.root(), tree.root());

        let json = tree.to_json().expect("serialize");
        let decoded = CommitmentTree::from_json(&json).expect("deserialize");
        prop_assert_eq!(decoded.root(), tree.root());
        prop_assert_eq!(decoded.committed_leaves(), tree.committed_leaves());

        let mut reversed = CommitmentTree::new(DEPTH).expect("depth in range");
        for (&index, &value) in leaves.iter().rev() {
            reversed.insert(Fr::from(value), index).expect("in-range insert");
        }
        prop_assert_eq!(reversed.root(), tree.root());
    }

    // Every committed leaf's membership proof folds back to the live root.
    #[test]
    fn proofs_reconstruct_root(
        leaves in prop::collection::btree_map(0u64..64, 1u64..u64::MAX, 1..=16usize),
    ) {
        let tree = tree_from(&leaves);
        for (&index, &value) in &leaves {
            let proof = tree.proof(index).expect("proof for committed leaf");
            prop_assert_eq!(proof.root_from(Fr::from(value)), tree.root());
        }
    }
}

// Three leaves in a depth-3 tree, checked against hashes combined by hand.
#[test]
fn depth_three_proof_matches_manual_combination() {
    let a = Fr::from(1001);
    let b = Fr::from(1002);
    let c = Fr::from(1003);

    let mut tree = CommitmentTree::new(3).expect("depth in range");
    tree.insert(a, 0).expect("insert a");
    tree.insert(b, 1).expect("insert b");
    tree.insert(c, 2).expect("insert c");

    let n00 = merkle_node(a, b);
    let n01 = merkle_node(c, empty_subtree_root(0));
    let n10 = merkle_node(n00, n01);
    let n11 = empty_subtree_root(2);
    let root = merkle_node(n10, n11);
    assert_eq!(tree.root(), root);

    let proof = tree.proof(1).expect("proof for leaf 1");
    assert_eq!(proof.siblings, vec![a, n01, n11]);
    assert_eq!(proof.indices, vec![0, 1, 1]);
    assert_eq!(proof.root_from(b), root);
}

#[test]
fn snapshot_preserves_depth_and_leaf_order() {
    let mut tree = CommitmentTree::new(5).expect("depth in range");
    tree.insert(Fr::from(3), 9).expect("insert");
    tree.insert(Fr::from(2), 4).expect("insert");

    let snapshot = tree.to_snapshot();
    assert_eq!(snapshot.depth, 5);
    let indices: Vec<u64> = snapshot.leaves.iter().map(|leaf| leaf.index).collect();
    assert_eq!(indices, vec![4, 9]);
}
