//! Block and state store tests.

mod common;

use asura_core::state::AsuraResponses;
use asura_core::types::{CommitInfo, Tx, ValidatorUpdate};

use common::{genesis_state, make_app, make_block, open_stores};

#[test]
fn test_block_store_roundtrip() {
    let dir = tempfile::tempdir().unwrap();
    let (_state_store, block_store) = open_stores(dir.path());

    let state = genesis_state("store-chain");
    let txs = vec![Tx(b"store-tx-1".to_vec()), Tx(b"store-tx-2".to_vec())];
    let (block, block_id) = make_block(&state, txs);
    let seen_commit = CommitInfo { block_id, precommits: Vec::new() };

    assert_eq!(block_store.height().unwrap(), 0);
    block_store.save_block(&block, &block_id, &seen_commit).unwrap();
    assert_eq!(block_store.height().unwrap(), 1);

    let loaded = block_store.load_block(1).unwrap().unwrap();
    assert_eq!(loaded, block);

    let meta = block_store.load_block_meta(1).unwrap().unwrap();
    assert_eq!(meta.block_id, block_id);
    assert_eq!(meta.header, block.header);

    let commit = block_store.load_seen_commit(1).unwrap().unwrap();
    assert_eq!(commit.block_id, block_id);
}

#[test]
fn test_block_store_misses() {
    let dir = tempfile::tempdir().unwrap();
    let (_state_store, block_store) = open_stores(dir.path());

    assert!(block_store.load_block(0).unwrap().is_none());
    assert!(block_store.load_block(1).unwrap().is_none());
    assert!(block_store.load_block_meta(3).unwrap().is_none());
}

#[test]
fn test_block_store_double_save_is_harmless() {
    let dir = tempfile::tempdir().unwrap();
    let (_state_store, block_store) = open_stores(dir.path());

    let state = genesis_state("store-chain");
    let (block, block_id) = make_block(&state, vec![Tx(b"idem".to_vec())]);
    let seen_commit = CommitInfo { block_id, precommits: Vec::new() };

    block_store.save_block(&block, &block_id, &seen_commit).unwrap();
    block_store.save_block(&block, &block_id, &seen_commit).unwrap();

    assert_eq!(block_store.height().unwrap(), 1);
    assert_eq!(block_store.load_block(1).unwrap().unwrap(), block);
}

#[test]
fn test_state_store_roundtrip() {
    let dir = tempfile::tempdir().unwrap();
    let (state_store, _block_store) = open_stores(dir.path());

    assert!(state_store.load_state().unwrap().is_none());

    let state = genesis_state("store-chain");
    state_store.save_state(&state).unwrap();

    let loaded = state_store.load_state().unwrap().unwrap();
    assert_eq!(loaded, state);
}

#[test]
fn test_asura_responses_roundtrip() {
    let dir = tempfile::tempdir().unwrap();
    let (state_store, _block_store) = open_stores(dir.path());

    let state = genesis_state("store-chain");
    let (block, _) = make_block(&state, vec![Tx(b"resp".to_vec())]);
    let mut responses = AsuraResponses::new(&block);
    responses.deliver_tx.push(asura_core::app::messages::ResponseDeliverTx {
        code: 0,
        data: b"resp".to_vec(),
        gas_wanted: 1,
        gas_used: 1,
        ..Default::default()
    });

    assert!(state_store.load_asura_responses(1).unwrap().is_none());
    state_store.save_asura_responses(1, &responses).unwrap();

    let loaded = state_store.load_asura_responses(1).unwrap().unwrap();
    assert_eq!(loaded.deliver_tx.len(), 1);
    assert_eq!(loaded.results_hash(), responses.results_hash());
}

#[test]
fn test_historical_validators_walk_back() {
    let dir = tempfile::tempdir().unwrap();
    let (state_store, _block_store) = open_stores(dir.path());

    // genesis validators are snapshotted for height 1
    let genesis = genesis_state("store-chain");
    state_store.save_state(&genesis).unwrap();

    // the set changes after block 3: a second validator joins
    let mut later = genesis.clone();
    later.last_block_height = 3;
    later.validators = later
        .validators
        .apply_updates(&[ValidatorUpdate { pub_key: [7u8; 32], power: 3 }])
        .unwrap();
    later.last_height_validators_changed = 4;
    state_store.save_state(&later).unwrap();

    // heights 1..=3 see the genesis set, height 4 the enlarged one
    assert_eq!(state_store.load_validators(2).unwrap().unwrap().len(), 1);
    assert_eq!(state_store.load_validators(3).unwrap().unwrap().len(), 1);
    assert_eq!(state_store.load_validators(4).unwrap().unwrap().len(), 2);
    assert_eq!(state_store.load_validators(9).unwrap().unwrap().len(), 2);
}

#[test]
fn test_historical_params_walk_back() {
    let dir = tempfile::tempdir().unwrap();
    let (state_store, _block_store) = open_stores(dir.path());

    let genesis = genesis_state("store-chain");
    state_store.save_state(&genesis).unwrap();

    let mut later = genesis.clone();
    later.last_block_height = 2;
    later.consensus_params.block_size.max_gas = 77;
    later.last_height_consensus_params_changed = 3;
    state_store.save_state(&later).unwrap();

    assert_eq!(
        state_store.load_consensus_params(1).unwrap().unwrap().block_size.max_gas,
        genesis.consensus_params.block_size.max_gas
    );
    assert_eq!(
        state_store.load_consensus_params(5).unwrap().unwrap().block_size.max_gas,
        77
    );
}

#[test]
fn test_executed_chain_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();

    let final_height;
    {
        let (state_store, block_store) = open_stores(dir.path());
        let (_app, conns) = make_app();
        let executor = asura_core::state::BlockExecutor::new(
            state_store.clone(),
            conns.consensus().clone(),
            std::sync::Arc::new(asura_core::mempool::MockMempool::default()),
            std::sync::Arc::new(asura_core::evidence::MockEvidencePool),
            std::sync::Arc::new(asura_core::metrics::Metrics::new()),
        );

        let mut state = genesis_state("store-chain");
        for _ in 0..2 {
            let (block, block_id) = make_block(&state, vec![Tx(vec![state.last_block_height as u8])]);
            let seen_commit = CommitInfo { block_id, precommits: Vec::new() };
            block_store.save_block(&block, &block_id, &seen_commit).unwrap();
            state = executor.apply_block(state, &block_id, &block).unwrap();
        }
        final_height = state.last_block_height;
    }

    // reopen everything from disk
    let (state_store, block_store) = open_stores(dir.path());
    assert_eq!(block_store.height().unwrap(), final_height);
    let state = state_store.load_state().unwrap().unwrap();
    assert_eq!(state.last_block_height, final_height);
    assert!(state_store.load_asura_responses(final_height).unwrap().is_some());
}
