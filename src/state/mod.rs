pub mod executor;
pub mod validation;

use serde::{Deserialize, Serialize};

use crate::app::messages::{ResponseBeginBlock, ResponseDeliverTx, ResponseEndBlock};
use crate::crypto::merkle::merkle_root;
use crate::types::{Block, BlockId, ConsensusParams, GenesisDoc, Hash, ValidatorSet};

pub use executor::{exec_commit_block, BlockExecutor, ExecError};
pub use validation::{validate_block, ValidationError};

/// The replica's committed view of the chain. Mutated exclusively by the
/// block executor; persisted whole through the state store.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct State {
    pub chain_id: String,
    pub last_block_height: u64,
    pub last_block_total_tx: u64,
    pub last_block_id: BlockId,
    pub last_block_time_ms: u64,

    /// Set active at last_block_height + 1, ready to vote on the next block.
    pub validators: ValidatorSet,
    /// Set that signed last_block.
    pub last_validators: ValidatorSet,
    pub last_height_validators_changed: u64,

    pub consensus_params: ConsensusParams,
    pub last_height_consensus_params_changed: u64,

    /// Merkle root of the most recent per-tx result codes and data.
    pub last_results_hash: Hash,
    /// The application's root hash after its last commit.
    pub app_hash: Vec<u8>,
}

impl State {
    /// Genesis state: no blocks yet, validators straight from the genesis
    /// document, app hash as declared there.
    pub fn from_genesis(genesis: &GenesisDoc) -> Self {
        let validators = genesis.validator_set();
        Self {
            chain_id: genesis.chain_id.clone(),
            last_block_height: 0,
            last_block_total_tx: 0,
            last_block_id: BlockId::default(),
            last_block_time_ms: genesis.genesis_time_ms,
            validators,
            last_validators: ValidatorSet::default(),
            last_height_validators_changed: 1,
            consensus_params: genesis.consensus_params,
            last_height_consensus_params_changed: 1,
            last_results_hash: Hash::ZERO,
            app_hash: genesis.app_hash.clone(),
        }
    }
}

/// Per-height record of every application response for a block, persisted
/// before commit so a recorded-response mock can replay deterministically.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct AsuraResponses {
    pub begin_block: ResponseBeginBlock,
    pub deliver_tx: Vec<ResponseDeliverTx>,
    pub end_block: ResponseEndBlock,
}

impl AsuraResponses {
    pub fn new(block: &Block) -> Self {
        Self {
            begin_block: ResponseBeginBlock::default(),
            deliver_tx: Vec::with_capacity(block.txs.len()),
            end_block: ResponseEndBlock::default(),
        }
    }

    /// Merkle root over the deterministic encoding of each DeliverTx result.
    pub fn results_hash(&self) -> Hash {
        let leaves: Vec<Vec<u8>> = self.deliver_tx.iter().map(|r| r.result_bytes()).collect();
        merkle_root(&leaves)
    }
}
