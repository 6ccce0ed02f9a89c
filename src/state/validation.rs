use crate::types::{compute_data_hash, compute_evidence_hash, Block};

use super::State;

#[derive(thiserror::Error, Debug)]
pub enum ValidationError {
    #[error("wrong chain id: expected {expected}, got {got}")]
    WrongChainId { expected: String, got: String },
    #[error("wrong height: expected {expected}, got {got}")]
    WrongHeight { expected: u64, got: u64 },
    #[error("wrong last block id")]
    WrongLastBlockId,
    #[error("header declares {declared} txs, block carries {actual}")]
    WrongNumTxs { declared: u64, actual: u64 },
    #[error("wrong total txs: expected {expected}, got {got}")]
    WrongTotalTxs { expected: u64, got: u64 },
    #[error("wrong app hash")]
    WrongAppHash,
    #[error("wrong last results hash")]
    WrongLastResultsHash,
    #[error("wrong validators hash")]
    WrongValidatorsHash,
    #[error("wrong consensus params hash")]
    WrongConsensusHash,
    #[error("wrong data hash")]
    WrongDataHash,
    #[error("wrong last commit hash")]
    WrongLastCommitHash,
    #[error("wrong evidence hash")]
    WrongEvidenceHash,
    #[error("first block must carry an empty last commit")]
    NonEmptyFirstCommit,
    #[error("last commit has {got} precommits, last validator set has {expected}")]
    WrongCommitSize { expected: usize, got: usize },
    #[error("last commit is for the wrong block")]
    WrongCommitBlockId,
    #[error("evidence at height {evidence} is older than allowed ({limit})")]
    EvidenceTooOld { evidence: u64, limit: u64 },
    #[error("evidence from the future at height {0}")]
    EvidenceFromFuture(u64),
}

/// Validate a block against the current state. Pure with respect to state;
/// signature verification belongs to the consensus layer and is not redone
/// here.
pub fn validate_block(state: &State, block: &Block) -> Result<(), ValidationError> {
    let header = &block.header;

    if header.chain_id != state.chain_id {
        return Err(ValidationError::WrongChainId {
            expected: state.chain_id.clone(),
            got: header.chain_id.clone(),
        });
    }
    if header.height != state.last_block_height + 1 {
        return Err(ValidationError::WrongHeight {
            expected: state.last_block_height + 1,
            got: header.height,
        });
    }
    if header.last_block_id != state.last_block_id {
        return Err(ValidationError::WrongLastBlockId);
    }

    if header.num_txs != block.txs.len() as u64 {
        return Err(ValidationError::WrongNumTxs {
            declared: header.num_txs,
            actual: block.txs.len() as u64,
        });
    }
    let expected_total = state.last_block_total_tx + header.num_txs;
    if header.total_txs != expected_total {
        return Err(ValidationError::WrongTotalTxs {
            expected: expected_total,
            got: header.total_txs,
        });
    }

    // hashes derived from this replica's state
    if header.app_hash != state.app_hash {
        return Err(ValidationError::WrongAppHash);
    }
    if header.last_results_hash != state.last_results_hash {
        return Err(ValidationError::WrongLastResultsHash);
    }
    if header.validators_hash != state.validators.hash() {
        return Err(ValidationError::WrongValidatorsHash);
    }
    if header.consensus_hash != state.consensus_params.hash() {
        return Err(ValidationError::WrongConsensusHash);
    }

    // hashes derived from the block's own content
    if header.data_hash != compute_data_hash(&block.txs) {
        return Err(ValidationError::WrongDataHash);
    }
    if header.last_commit_hash != block.last_commit.hash() {
        return Err(ValidationError::WrongLastCommitHash);
    }
    if header.evidence_hash != compute_evidence_hash(&block.evidence) {
        return Err(ValidationError::WrongEvidenceHash);
    }

    if header.height == 1 {
        if !block.last_commit.precommits.is_empty() {
            return Err(ValidationError::NonEmptyFirstCommit);
        }
    } else {
        if block.last_commit.precommits.len() != state.last_validators.len() {
            return Err(ValidationError::WrongCommitSize {
                expected: state.last_validators.len(),
                got: block.last_commit.precommits.len(),
            });
        }
        if block.last_commit.block_id != state.last_block_id {
            return Err(ValidationError::WrongCommitBlockId);
        }
    }

    let max_age = state.consensus_params.evidence.max_age;
    for ev in &block.evidence {
        if ev.height >= header.height {
            return Err(ValidationError::EvidenceFromFuture(ev.height));
        }
        if header.height - ev.height > max_age {
            return Err(ValidationError::EvidenceTooOld {
                evidence: ev.height,
                limit: max_age,
            });
        }
    }

    Ok(())
}
