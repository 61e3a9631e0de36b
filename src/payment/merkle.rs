//! Source-address Merkle root.
//!
//! Leaves are `keccak256(address)`, sorted and deduplicated. The tree is
//! stored as a flat array of `2n - 1` nodes with the leaves at the tail;
//! every inner node hashes its two children in ascending order.

use alloy_primitives::{keccak256, B256};

/// Merkle root of a set of source addresses. The empty set has the zero root.
#[must_use]
pub fn source_addresses_root<S: AsRef<str>>(addresses: &[S]) -> B256 {
    let mut leaves: Vec<B256> = addresses
        .iter()
        .map(|address| keccak256(address.as_ref().as_bytes()))
        .collect();
    leaves.sort_unstable();
    leaves.dedup();

    let n = leaves.len();
    if n == 0 {
        return B256::ZERO;
    }

    let mut tree = vec![B256::ZERO; 2 * n - 1];
    tree[n - 1..].copy_from_slice(&leaves);
    for i in (0..n - 1).rev() {
        tree[i] = hash_pair(tree[2 * i + 1], tree[2 * i + 2]);
    }
    tree[0]
}

fn hash_pair(a: B256, b: B256) -> B256 {
    let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
    let mut preimage = [0u8; 64];
    preimage[..32].copy_from_slice(lo.as_slice());
    preimage[32..].copy_from_slice(hi.as_slice());
    keccak256(preimage)
}
