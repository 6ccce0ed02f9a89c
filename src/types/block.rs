use serde::{Deserialize, Serialize};

use crate::crypto::hash::sha256;
use crate::crypto::merkle::merkle_root;
use crate::types::serialization::encode_block_header;
use crate::types::{Address, Hash, Tx};

/// Identifies a block as a chunked object: the header hash plus the header
/// of the part set the block was gossiped as. Two blocks with equal ids are
/// byte-identical.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockId {
    pub hash: Hash,
    pub parts: PartSetHeader,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartSetHeader {
    pub total: u32,
    pub hash: Hash,
}

impl BlockId {
    pub fn is_zero(&self) -> bool {
        self.hash == Hash::ZERO && self.parts.total == 0
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockHeader {
    pub chain_id: String,
    pub height: u64,
    pub time_ms: u64,
    pub num_txs: u64,
    pub total_txs: u64,
    pub last_block_id: BlockId,
    pub last_commit_hash: Hash,
    pub data_hash: Hash,
    pub validators_hash: Hash,
    pub next_validators_hash: Hash,
    pub consensus_hash: Hash,
    pub app_hash: Vec<u8>,
    pub last_results_hash: Hash,
    pub evidence_hash: Hash,
    pub proposer_address: Address,
}

impl BlockHeader {
    pub fn hash(&self) -> Hash {
        sha256(&encode_block_header(self))
    }
}

/// A precommit that made it into the commit for a block. `None` in the
/// enclosing commit's list marks a validator whose precommit was absent.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoteInfo {
    pub validator_address: Address,
    pub time_ms: u64,
    pub signature: Vec<u8>,
}

/// The +2/3 precommits that committed the previous block.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitInfo {
    pub block_id: BlockId,
    pub precommits: Vec<Option<VoteInfo>>,
}

impl CommitInfo {
    pub fn hash(&self) -> Hash {
        let leaves: Vec<Vec<u8>> = self
            .precommits
            .iter()
            .map(|p| match p {
                Some(v) => {
                    let mut buf = Vec::with_capacity(20 + 8 + v.signature.len());
                    buf.extend_from_slice(&v.validator_address.0);
                    buf.extend_from_slice(&v.time_ms.to_be_bytes());
                    buf.extend_from_slice(&v.signature);
                    buf
                }
                None => Vec::new(),
            })
            .collect();
        merkle_root(&leaves)
    }

    /// Indices of validators (into the set that signed the previous block)
    /// whose precommits are missing.
    pub fn absent_indices(&self) -> Vec<u32> {
        self.precommits
            .iter()
            .enumerate()
            .filter(|(_, p)| p.is_none())
            .map(|(i, _)| i as u32)
            .collect()
    }
}

/// Proof of validator misbehavior at a height.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Evidence {
    pub address: Address,
    pub height: u64,
}

impl Evidence {
    pub fn hash(&self) -> Hash {
        let mut buf = Vec::with_capacity(28);
        buf.extend_from_slice(&self.address.0);
        buf.extend_from_slice(&self.height.to_be_bytes());
        sha256(&buf)
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    pub header: BlockHeader,
    pub txs: Vec<Tx>,
    pub last_commit: CommitInfo,
    pub evidence: Vec<Evidence>,
}

impl Block {
    pub fn hash(&self) -> Hash {
        self.header.hash()
    }
}

/// Merkle root over the hashes of the block's transactions.
pub fn compute_data_hash(txs: &[Tx]) -> Hash {
    let leaves: Vec<Vec<u8>> = txs.iter().map(|tx| tx.hash().0.to_vec()).collect();
    merkle_root(&leaves)
}

/// Merkle root over the hashes of the included evidence.
pub fn compute_evidence_hash(evidence: &[Evidence]) -> Hash {
    let leaves: Vec<Vec<u8>> = evidence.iter().map(|ev| ev.hash().0.to_vec()).collect();
    merkle_root(&leaves)
}
