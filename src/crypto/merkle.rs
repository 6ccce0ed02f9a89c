use crate::crypto::hash::sha256;
use crate::types::Hash;

/// Root of a binary Merkle tree over the given leaves.
///
/// Leaves are hashed with a 0x00 prefix and inner nodes with a 0x01 prefix so
/// a leaf can never be reinterpreted as an inner node. An empty input yields
/// the zero hash.
pub fn merkle_root(leaves: &[Vec<u8>]) -> Hash {
    if leaves.is_empty() {
        return Hash::ZERO;
    }
    let mut level: Vec<Hash> = leaves.iter().map(|l| leaf_hash(l)).collect();
    while level.len() > 1 {
        let mut next = Vec::with_capacity((level.len() + 1) / 2);
        for pair in level.chunks(2) {
            match pair {
                [a, b] => next.push(inner_hash(a, b)),
                [a] => next.push(*a),
                _ => unreachable!(),
            }
        }
        level = next;
    }
    level[0]
}

fn leaf_hash(data: &[u8]) -> Hash {
    let mut buf = Vec::with_capacity(1 + data.len());
    buf.push(0x00);
    buf.extend_from_slice(data);
    sha256(&buf)
}

fn inner_hash(left: &Hash, right: &Hash) -> Hash {
    let mut buf = Vec::with_capacity(65);
    buf.push(0x01);
    buf.extend_from_slice(&left.0);
    buf.extend_from_slice(&right.0);
    sha256(&buf)
}
