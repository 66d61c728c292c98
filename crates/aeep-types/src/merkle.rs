//! Deterministic sorted-leaf Merkle tree used by the batching service.
//!
//! Leaves are the SHA-256 digests of the input interaction hashes, sorted
//! lexicographically before the tree is built so that batch membership is
//! independent of submission order. Internal nodes hash the concatenation
//! of their children in `min(L, R) || max(L, R)` order, so the tree is
//! insensitive to left/right assignment as well.

use crate::canonical::sha256_hex;

/// A single Merkle inclusion proof: the ordered sibling hashes from a leaf
/// up to (but excluding) the root.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct MerkleProof {
    pub leaf_hash: String,
    pub siblings: Vec<String>,
}

/// A built Merkle tree over a set of interaction hashes.
#[derive(Debug, Clone)]
pub struct MerkleTree {
    /// Sorted leaf hashes (hex).
    leaves: Vec<String>,
    /// `layers[0]` is the leaf layer, `layers.last()` is `[root]`.
    layers: Vec<Vec<String>>,
}

impl MerkleTree {
    /// Builds a tree from raw interaction-hash inputs. Each input is hashed
    /// with SHA-256 to form a leaf; the empty input set yields an empty
    /// tree whose root is the empty string.
    pub fn build<I, S>(inputs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<[u8]>,
    {
        let mut leaves: Vec<String> = inputs
            .into_iter()
            .map(|input| sha256_hex(input.as_ref()))
            .collect();
        leaves.sort();

        if leaves.is_empty() {
            return Self {
                leaves,
                layers: vec![vec![]],
            };
        }

        let mut layers = vec![leaves.clone()];
        let mut current = leaves.clone();
        while current.len() > 1 {
            let mut next = Vec::with_capacity(current.len().div_ceil(2));
            let mut i = 0;
            while i < current.len() {
                let left = &current[i];
                let right = if i + 1 < current.len() {
                    &current[i + 1]
                } else {
                    left
                };
                next.push(hash_pair(left, right));
                i += 2;
            }
            layers.push(next.clone());
            current = next;
        }

        Self { leaves, layers }
    }

    /// Hex-encoded Merkle root. Empty for an empty tree.
    pub fn root(&self) -> String {
        self.layers
            .last()
            .and_then(|layer| layer.first())
            .cloned()
            .unwrap_or_default()
    }

    /// Sorted leaf hashes, in tree order.
    pub fn leaves(&self) -> &[String] {
        &self.leaves
    }

    /// Builds the inclusion proof for the leaf produced by hashing `input`.
    /// Returns `None` if `input` was not part of the tree.
    pub fn proof_for<S: AsRef<[u8]>>(&self, input: S) -> Option<MerkleProof> {
        let leaf_hash = sha256_hex(input.as_ref());
        let mut index = self.leaves.iter().position(|l| l == &leaf_hash)?;
        let mut siblings = Vec::new();

        for layer in &self.layers[..self.layers.len().saturating_sub(1)] {
            let sibling_index = if index % 2 == 0 { index + 1 } else { index - 1 };
            let sibling = layer
                .get(sibling_index)
                .cloned()
                .unwrap_or_else(|| layer[index].clone());
            siblings.push(sibling);
            index /= 2;
        }

        Some(MerkleProof {
            leaf_hash,
            siblings,
        })
    }
}

/// Replays a proof against `leaf_hash` and checks the reconstructed root
/// against `expected_root`.
pub fn verify_proof(proof: &MerkleProof, expected_root: &str) -> bool {
    let mut current = proof.leaf_hash.clone();
    for sibling in &proof.siblings {
        current = hash_pair(&current, sibling);
    }
    current == expected_root
}

fn hash_pair(a: &str, b: &str) -> String {
    let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
    let mut preimage = String::with_capacity(lo.len() + hi.len());
    preimage.push_str(lo);
    preimage.push_str(hi);
    sha256_hex(preimage.as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_tree_has_empty_root() {
        let tree = MerkleTree::build(Vec::<&[u8]>::new());
        assert_eq!(tree.root(), "");
    }

    #[test]
    fn single_leaf_proof_is_empty_and_verifies() {
        let tree = MerkleTree::build(vec![b"only-leaf".as_slice()]);
        let proof = tree.proof_for(b"only-leaf".as_slice()).unwrap();
        assert!(proof.siblings.is_empty());
        assert!(verify_proof(&proof, &tree.root()));
    }

    #[test]
    fn every_leaf_proof_verifies() {
        let inputs: Vec<&[u8]> = vec![b"a", b"b", b"c", b"d", b"e"];
        let tree = MerkleTree::build(inputs.clone());
        for input in inputs {
            let proof = tree.proof_for(input).unwrap();
            assert!(verify_proof(&proof, &tree.root()));
        }
    }

    #[test]
    fn tampering_breaks_verification() {
        let tree = MerkleTree::build(vec![b"a".as_slice(), b"b", b"c"]);
        let mut proof = tree.proof_for(b"a".as_slice()).unwrap();
        proof.leaf_hash = sha256_hex(b"tampered");
        assert!(!verify_proof(&proof, &tree.root()));
    }

    #[test]
    fn order_independent_root() {
        let t1 = MerkleTree::build(vec![b"x".as_slice(), b"y", b"z"]);
        let t2 = MerkleTree::build(vec![b"z".as_slice(), b"x", b"y"]);
        assert_eq!(t1.root(), t2.root());
    }
}
