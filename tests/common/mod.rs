//! Shared fixtures: a deterministic in-process application and block/genesis
//! builders.
#![allow(dead_code)]

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};

use asura_core::app::messages::{
    RequestEndBlock, RequestInfo, RequestInitChain, ResponseCheckTx, ResponseCommit,
    ResponseDeliverTx, ResponseEndBlock, ResponseInfo,
};
use asura_core::app::{AppConns, Application};
use asura_core::crypto::hash::sha256;
use asura_core::state::State;
use asura_core::storage::{BlockStore, StateStore};
use asura_core::types::{
    compute_data_hash, compute_evidence_hash, Block, BlockHeader, BlockId, CommitInfo,
    ConsensusParams, GenesisDoc, GenesisValidator, ParamUpdates, PartSetHeader, Tx,
    ValidatorUpdate, VoteInfo,
};

/// Deterministic test application. The app hash is a function of the commit
/// count and the number of delivered valid txs, so replaying the same blocks
/// always reproduces it.
pub struct TestApp {
    pub height: u64,
    pub app_hash: Vec<u8>,
    pub valid_txs: u64,
    /// Validator updates to report from EndBlock, keyed by height.
    pub validator_updates: HashMap<u64, Vec<ValidatorUpdate>>,
    /// Param updates to report from EndBlock, keyed by height.
    pub param_updates: HashMap<u64, ParamUpdates>,
    /// When set, deliver_tx fails txs whose first byte equals this.
    pub invalid_tx_prefix: Option<u8>,
    /// When true, every check_tx is rejected.
    pub check_tx_reject: bool,
    pub check_txs: u64,
    pub init_chain_called: bool,
    pub commits: u64,
}

impl TestApp {
    pub fn new() -> Self {
        Self {
            height: 0,
            app_hash: Vec::new(),
            valid_txs: 0,
            validator_updates: HashMap::new(),
            param_updates: HashMap::new(),
            invalid_tx_prefix: None,
            check_tx_reject: false,
            check_txs: 0,
            init_chain_called: false,
            commits: 0,
        }
    }
}

impl Application for TestApp {
    fn info(&mut self, _req: RequestInfo) -> ResponseInfo {
        ResponseInfo {
            data: "test app".to_string(),
            version: "0.1.0".to_string(),
            last_block_height: self.height as i64,
            last_block_app_hash: self.app_hash.clone(),
        }
    }

    fn init_chain(
        &mut self,
        _req: RequestInitChain,
    ) -> asura_core::app::messages::ResponseInitChain {
        self.init_chain_called = true;
        Default::default()
    }

    fn deliver_tx(&mut self, tx: &Tx) -> ResponseDeliverTx {
        let invalid = self.invalid_tx_prefix.is_some() && tx.0.first() == self.invalid_tx_prefix.as_ref();
        if invalid {
            ResponseDeliverTx {
                code: 1,
                log: "rejected by test app".to_string(),
                ..Default::default()
            }
        } else {
            self.valid_txs += 1;
            ResponseDeliverTx {
                code: 0,
                data: tx.0.clone(),
                gas_wanted: 1,
                gas_used: 1,
                ..Default::default()
            }
        }
    }

    fn end_block(&mut self, req: RequestEndBlock) -> ResponseEndBlock {
        ResponseEndBlock {
            validator_updates: self
                .validator_updates
                .get(&req.height)
                .cloned()
                .unwrap_or_default(),
            consensus_param_updates: self.param_updates.get(&req.height).copied(),
        }
    }

    fn commit(&mut self) -> ResponseCommit {
        self.height += 1;
        self.commits += 1;
        let mut seed = Vec::with_capacity(16);
        seed.extend_from_slice(&self.height.to_be_bytes());
        seed.extend_from_slice(&self.valid_txs.to_be_bytes());
        self.app_hash = sha256(&seed).0.to_vec();
        ResponseCommit {
            data: self.app_hash.clone(),
        }
    }

    fn check_tx(&mut self, _tx: &Tx) -> ResponseCheckTx {
        self.check_txs += 1;
        if self.check_tx_reject {
            ResponseCheckTx {
                code: 1,
                log: "rejected by test app".to_string(),
                ..Default::default()
            }
        } else {
            ResponseCheckTx {
                code: 0,
                gas_wanted: 1,
                ..Default::default()
            }
        }
    }
}

pub fn make_app() -> (Arc<Mutex<TestApp>>, AppConns) {
    let app = Arc::new(Mutex::new(TestApp::new()));
    let conns = AppConns::new(app.clone());
    (app, conns)
}

pub fn make_genesis(chain_id: &str) -> GenesisDoc {
    GenesisDoc {
        chain_id: chain_id.to_string(),
        genesis_time_ms: 1_500_000_000_000,
        consensus_params: ConsensusParams::default(),
        validators: vec![GenesisValidator {
            pub_key: [1u8; 32],
            power: 10,
            name: "val0".to_string(),
        }],
        app_hash: Vec::new(),
        app_state_bytes: Vec::new(),
    }
}

pub fn genesis_state(chain_id: &str) -> State {
    State::from_genesis(&make_genesis(chain_id))
}

/// Build the next block on top of `state`, with all header hashes filled in
/// so it passes validation.
pub fn make_block(state: &State, txs: Vec<Tx>) -> (Block, BlockId) {
    let height = state.last_block_height + 1;
    let last_commit = if height == 1 {
        CommitInfo::default()
    } else {
        CommitInfo {
            block_id: state.last_block_id,
            precommits: state
                .last_validators
                .validators()
                .iter()
                .map(|v| {
                    Some(VoteInfo {
                        validator_address: v.address,
                        time_ms: state.last_block_time_ms,
                        signature: vec![0u8; 64],
                    })
                })
                .collect(),
        }
    };

    let evidence = Vec::new();
    let header = BlockHeader {
        chain_id: state.chain_id.clone(),
        height,
        time_ms: state.last_block_time_ms + 1_000,
        num_txs: txs.len() as u64,
        total_txs: state.last_block_total_tx + txs.len() as u64,
        last_block_id: state.last_block_id,
        last_commit_hash: last_commit.hash(),
        data_hash: compute_data_hash(&txs),
        validators_hash: state.validators.hash(),
        next_validators_hash: state.validators.hash(),
        consensus_hash: state.consensus_params.hash(),
        app_hash: state.app_hash.clone(),
        last_results_hash: state.last_results_hash,
        evidence_hash: compute_evidence_hash(&evidence),
        proposer_address: state.validators.validators()[0].address,
    };

    let block = Block {
        header,
        txs,
        last_commit,
        evidence,
    };
    let hash = block.hash();
    let block_id = BlockId {
        hash,
        parts: PartSetHeader { total: 1, hash },
    };
    (block, block_id)
}

pub fn open_stores(dir: &Path) -> (Arc<StateStore>, Arc<BlockStore>) {
    let state_store = Arc::new(StateStore::open(&dir.join("state")).unwrap());
    let block_store = Arc::new(BlockStore::open(&dir.join("blocks")).unwrap());
    (state_store, block_store)
}
