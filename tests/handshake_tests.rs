//! Handshake tests: reconciling (app, store, state) heights across the
//! crash windows of ApplyBlock.

mod common;

use std::sync::{Arc, Mutex};

use asura_core::app::AppConns;
use asura_core::consensus::{Handshaker, HandshakeError};
use asura_core::evidence::MockEvidencePool;
use asura_core::mempool::MockMempool;
use asura_core::metrics::Metrics;
use asura_core::state::executor::{exec_block_on_app, BlockExecutor};
use asura_core::state::State;
use asura_core::storage::{BlockStore, StateStore};
use asura_core::types::{CommitInfo, Tx};

use common::{genesis_state, make_app, make_block, make_genesis, open_stores, TestApp};

const CHAIN_ID: &str = "handshake-chain";

fn make_handshaker(
    state_store: &Arc<StateStore>,
    block_store: &Arc<BlockStore>,
) -> Handshaker {
    Handshaker::new(
        Arc::clone(state_store),
        Arc::clone(block_store),
        make_genesis(CHAIN_ID),
        Arc::new(Metrics::new()),
    )
}

/// Produce, store, and apply `n` blocks, two txs each.
fn advance_chain(
    state_store: &Arc<StateStore>,
    block_store: &Arc<BlockStore>,
    conns: &AppConns,
    mut state: State,
    n: u64,
) -> State {
    let executor = BlockExecutor::new(
        Arc::clone(state_store),
        conns.consensus().clone(),
        Arc::new(MockMempool::default()),
        Arc::new(MockEvidencePool),
        Arc::new(Metrics::new()),
    );
    for _ in 0..n {
        let h = state.last_block_height + 1;
        let txs = vec![Tx(vec![h as u8, 0]), Tx(vec![h as u8, 1])];
        let (block, block_id) = make_block(&state, txs);
        let seen_commit = CommitInfo {
            block_id,
            precommits: Vec::new(),
        };
        block_store.save_block(&block, &block_id, &seen_commit).unwrap();
        state = executor.apply_block(state, &block_id, &block).unwrap();
    }
    state
}

#[test]
fn test_handshake_at_genesis_seeds_the_app() {
    let dir = tempfile::tempdir().unwrap();
    let (state_store, block_store) = open_stores(dir.path());
    let (app, conns) = make_app();

    let state = genesis_state(CHAIN_ID);
    let mut handshaker = make_handshaker(&state_store, &block_store);
    let out = handshaker.handshake(state.clone(), &conns).unwrap();

    assert_eq!(out, state);
    assert_eq!(handshaker.n_blocks(), 0);
    assert!(app.lock().unwrap().init_chain_called, "app must be seeded via InitChain");
}

#[test]
fn test_handshake_when_everything_is_synced() {
    let dir = tempfile::tempdir().unwrap();
    let (state_store, block_store) = open_stores(dir.path());
    let (_app, conns) = make_app();

    let state = advance_chain(&state_store, &block_store, &conns, genesis_state(CHAIN_ID), 3);

    let mut handshaker = make_handshaker(&state_store, &block_store);
    let out = handshaker.handshake(state.clone(), &conns).unwrap();

    assert_eq!(out.last_block_height, 3);
    assert_eq!(out.app_hash, state.app_hash);
    assert_eq!(handshaker.n_blocks(), 0, "nothing to replay when synced");
}

#[test]
fn test_handshake_replays_blocks_into_a_fresh_app() {
    let dir = tempfile::tempdir().unwrap();
    let (state_store, block_store) = open_stores(dir.path());
    let (_app, conns) = make_app();

    let state = advance_chain(&state_store, &block_store, &conns, genesis_state(CHAIN_ID), 3);

    // the app lost its disk: it restarts at height 0
    let (fresh_app, fresh_conns) = make_app();
    let mut handshaker = make_handshaker(&state_store, &block_store);
    let out = handshaker.handshake(state.clone(), &fresh_conns).unwrap();

    assert_eq!(out.app_hash, state.app_hash);
    assert_eq!(handshaker.n_blocks(), 3);
    let fresh_app = fresh_app.lock().unwrap();
    assert_eq!(fresh_app.height, 3);
    assert_eq!(fresh_app.app_hash, state.app_hash, "replay must reproduce the app hash");
}

#[test]
fn test_handshake_replays_last_block_on_real_app() {
    let dir = tempfile::tempdir().unwrap();
    let (state_store, block_store) = open_stores(dir.path());
    let (app, conns) = make_app();

    let state = advance_chain(&state_store, &block_store, &conns, genesis_state(CHAIN_ID), 2);

    // crash before Commit: block 3 reached the store, but neither the app
    // nor the state saw it
    let (block3, block_id3) = make_block(&state, vec![Tx(vec![3, 0])]);
    let seen_commit = CommitInfo { block_id: block_id3, precommits: Vec::new() };
    block_store.save_block(&block3, &block_id3, &seen_commit).unwrap();

    let mut handshaker = make_handshaker(&state_store, &block_store);
    let out = handshaker.handshake(state, &conns).unwrap();

    assert_eq!(out.last_block_height, 3);
    assert_eq!(handshaker.n_blocks(), 1);
    let app = app.lock().unwrap();
    assert_eq!(app.height, 3);
    assert_eq!(out.app_hash, app.app_hash);
}

#[test]
fn test_handshake_rebuilds_state_from_recorded_responses() {
    let dir = tempfile::tempdir().unwrap();
    let (state_store, block_store) = open_stores(dir.path());
    let (app, conns) = make_app();

    let state = advance_chain(&state_store, &block_store, &conns, genesis_state(CHAIN_ID), 4);

    // crash between Commit and SaveState: block 5 is stored, the app
    // committed it, its responses were recorded, but the state stayed at 4
    let (block5, block_id5) = make_block(&state, vec![Tx(vec![5, 0]), Tx(vec![5, 1])]);
    let seen_commit = CommitInfo { block_id: block_id5, precommits: Vec::new() };
    block_store.save_block(&block5, &block_id5, &seen_commit).unwrap();

    let responses = exec_block_on_app(conns.consensus(), &block5).unwrap();
    state_store.save_asura_responses(5, &responses).unwrap();
    let app_hash5 = conns.consensus().commit_sync().unwrap().data;

    let commits_before = app.lock().unwrap().commits;

    let mut handshaker = make_handshaker(&state_store, &block_store);
    let out = handshaker.handshake(state, &conns).unwrap();

    assert_eq!(out.last_block_height, 5);
    assert_eq!(out.app_hash, app_hash5, "mock replay must adopt the recorded app hash");
    assert_eq!(handshaker.n_blocks(), 1);

    let app = app.lock().unwrap();
    assert_eq!(app.commits, commits_before, "the real app must not commit twice");
    assert_eq!(app.height, 5);

    // the regenerated state was saved
    let saved = state_store.load_state().unwrap().unwrap();
    assert_eq!(saved.last_block_height, 5);
}

#[test]
fn test_handshake_rejects_app_ahead_of_store() {
    let dir = tempfile::tempdir().unwrap();
    let (state_store, block_store) = open_stores(dir.path());

    let app = Arc::new(Mutex::new(TestApp::new()));
    app.lock().unwrap().height = 10;
    app.lock().unwrap().app_hash = vec![0xAA];
    let conns = AppConns::new(app);

    let mut handshaker = make_handshaker(&state_store, &block_store);
    match handshaker.handshake(genesis_state(CHAIN_ID), &conns) {
        Err(HandshakeError::AppBlockHeightTooHigh { store: 0, app: 10 }) => {}
        other => panic!("expected AppBlockHeightTooHigh, got {:?}", other.err()),
    }
}

#[test]
fn test_handshake_rejects_state_ahead_of_store() {
    let dir = tempfile::tempdir().unwrap();
    let (state_store, block_store) = open_stores(dir.path());
    let (_app, conns) = make_app();

    let mut state = genesis_state(CHAIN_ID);
    state.last_block_height = 2; // no such blocks in the store

    let mut handshaker = make_handshaker(&state_store, &block_store);
    match handshaker.handshake(state, &conns) {
        Err(HandshakeError::StateAheadOfStore { store: 0, state: 2 }) => {}
        other => panic!("expected StateAheadOfStore, got {:?}", other.err()),
    }
}

#[test]
fn test_handshake_detects_app_hash_divergence() {
    let dir = tempfile::tempdir().unwrap();
    let (state_store, block_store) = open_stores(dir.path());
    let (_app, conns) = make_app();

    let mut state = genesis_state(CHAIN_ID);
    state.app_hash = vec![9, 9, 9]; // claims a different genesis app hash

    let mut handshaker = make_handshaker(&state_store, &block_store);
    match handshaker.handshake(state, &conns) {
        Err(HandshakeError::AppHashMismatch { .. }) => {}
        other => panic!("expected AppHashMismatch, got {:?}", other.err()),
    }
}

#[test]
fn test_replay_is_deterministic() {
    let dir = tempfile::tempdir().unwrap();
    let (state_store, block_store) = open_stores(dir.path());
    let (_app, conns) = make_app();

    advance_chain(&state_store, &block_store, &conns, genesis_state(CHAIN_ID), 2);
    let block = block_store.load_block(1).unwrap().unwrap();

    // two fresh apps fed the same block produce identical responses
    let (_a1, conns1) = make_app();
    let (_a2, conns2) = make_app();
    let r1 = exec_block_on_app(conns1.consensus(), &block).unwrap();
    let r2 = exec_block_on_app(conns2.consensus(), &block).unwrap();
    assert_eq!(r1.deliver_tx, r2.deliver_tx);
    assert_eq!(r1.results_hash(), r2.results_hash());
}
