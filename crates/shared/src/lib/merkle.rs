//! Well-balanced binary merkle trees.
//!
//! Generic over the node hash: the state root uses Blake2b-256, the
//! accumulate root Keccak-256. Leaves and inner nodes are domain-separated
//! with a one-byte prefix. The empty tree has the all-zero root.

use crate::crypto::{blake2b_parts, keccak256_parts};
use crate::primitives::{Hash32, ServiceId};

const LEAF_PREFIX: &[u8] = &[0x00];
const NODE_PREFIX: &[u8] = &[0x01];

pub trait NodeHasher {
    fn leaf(data: &[u8]) -> Hash32;
    fn node(left: &Hash32, right: &Hash32) -> Hash32;
}

/// State-root flavour.
pub struct Blake2bTree;

impl NodeHasher for Blake2bTree {
    fn leaf(data: &[u8]) -> Hash32 {
        blake2b_parts(&[LEAF_PREFIX, data])
    }

    fn node(left: &Hash32, right: &Hash32) -> Hash32 {
        blake2b_parts(&[NODE_PREFIX, &left.0, &right.0])
    }
}

/// Accumulate-root flavour.
pub struct KeccakTree;

impl NodeHasher for KeccakTree {
    fn leaf(data: &[u8]) -> Hash32 {
        keccak256_parts(&[LEAF_PREFIX, data])
    }

    fn node(left: &Hash32, right: &Hash32) -> Hash32 {
        keccak256_parts(&[NODE_PREFIX, &left.0, &right.0])
    }
}

/// Root of the well-balanced tree over `leaves` in order: the left subtree
/// takes the larger half of an odd split.
pub fn merkle_root<H: NodeHasher, T: AsRef<[u8]>>(leaves: &[T]) -> Hash32 {
    if leaves.is_empty() {
        return Hash32::ZERO;
    }
    let hashes: Vec<Hash32> = leaves.iter().map(|leaf| H::leaf(leaf.as_ref())).collect();
    balanced::<H>(&hashes)
}

fn balanced<H: NodeHasher>(hashes: &[Hash32]) -> Hash32 {
    match hashes {
        [single] => *single,
        _ => {
            let mid = hashes.len().div_ceil(2);
            let left = balanced::<H>(&hashes[..mid]);
            let right = balanced::<H>(&hashes[mid..]);
            H::node(&left, &right)
        }
    }
}

/// The per-block accumulate root: 36-byte `service_id ‖ output_hash` entries
/// sorted by service id ascending, reduced through the Keccak tree.
pub fn accumulate_root(outputs: &[(ServiceId, Hash32)]) -> Hash32 {
    let mut sorted: Vec<(ServiceId, Hash32)> = outputs.to_vec();
    sorted.sort_by_key(|(service, _)| *service);
    let entries: Vec<[u8; 36]> = sorted
        .iter()
        .map(|(service, hash)| {
            let mut entry = [0u8; 36];
            entry[..4].copy_from_slice(&service.to_le_bytes());
            entry[4..].copy_from_slice(&hash.0);
            entry
        })
        .collect();
    merkle_root::<KeccakTree, _>(&entries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::blake2b;

    #[test]
    fn empty_tree_has_zero_root() {
        let leaves: [&[u8]; 0] = [];
        assert_eq!(merkle_root::<Blake2bTree, _>(&leaves), Hash32::ZERO);
        assert_eq!(accumulate_root(&[]), Hash32::ZERO);
    }

    #[test]
    fn singleton_root_is_the_leaf_hash() {
        let root = merkle_root::<Blake2bTree, _>(&[b"only".as_slice()]);
        assert_eq!(root, Blake2bTree::leaf(b"only"));
    }

    #[test]
    fn two_leaves_pair_up() {
        let root = merkle_root::<Blake2bTree, _>(&[b"l".as_slice(), b"r".as_slice()]);
        let expected = Blake2bTree::node(&Blake2bTree::leaf(b"l"), &Blake2bTree::leaf(b"r"));
        assert_eq!(root, expected);
    }

    #[test]
    fn odd_split_puts_larger_half_left() {
        let leaves = [b"a".as_slice(), b"b".as_slice(), b"c".as_slice()];
        let root = merkle_root::<Blake2bTree, _>(&leaves);
        let left = Blake2bTree::node(&Blake2bTree::leaf(b"a"), &Blake2bTree::leaf(b"b"));
        let expected = Blake2bTree::node(&left, &Blake2bTree::leaf(b"c"));
        assert_eq!(root, expected);
    }

    #[test]
    fn five_leaves_split_three_two() {
        let leaves: Vec<&[u8]> = vec![b"a", b"b", b"c", b"d", b"e"];
        let root = merkle_root::<Blake2bTree, _>(&leaves);
        let ab = Blake2bTree::node(&Blake2bTree::leaf(b"a"), &Blake2bTree::leaf(b"b"));
        let abc = Blake2bTree::node(&ab, &Blake2bTree::leaf(b"c"));
        let de = Blake2bTree::node(&Blake2bTree::leaf(b"d"), &Blake2bTree::leaf(b"e"));
        assert_eq!(root, Blake2bTree::node(&abc, &de));
    }

    #[test]
    fn order_matters() {
        let forward: Vec<&[u8]> = vec![b"a", b"b"];
        let backward: Vec<&[u8]> = vec![b"b", b"a"];
        assert_ne!(merkle_root::<Blake2bTree, _>(&forward), merkle_root::<Blake2bTree, _>(&backward));
    }

    #[test]
    fn leaf_and_node_domains_differ() {
        // A leaf of 65 bytes must not collide with an inner node over the
        // same payload.
        let l = blake2b(b"x");
        let r = blake2b(b"y");
        let as_node = Blake2bTree::node(&l, &r);
        let as_leaf = Blake2bTree::leaf(&[l.0.as_slice(), r.0.as_slice()].concat());
        assert_ne!(as_node, as_leaf);
    }

    #[test]
    fn accumulate_root_sorts_by_service_id() {
        let a = (7u32, blake2b(b"seven"));
        let b = (3u32, blake2b(b"three"));
        assert_eq!(accumulate_root(&[a, b]), accumulate_root(&[b, a]));
        let single = accumulate_root(&[b]);
        let mut entry = [0u8; 36];
        entry[..4].copy_from_slice(&3u32.to_le_bytes());
        entry[4..].copy_from_slice(&b.1 .0);
        assert_eq!(single, KeccakTree::leaf(&entry));
    }
}
