use std::sync::{Arc, Mutex};
use std::time::Duration;

use crossbeam_channel::Receiver;
use tracing::{error, info};

use crate::app::messages::{
    RequestEndBlock, RequestInfo, RequestInitChain, ResponseCommit, ResponseDeliverTx,
    ResponseEndBlock,
};
use crate::app::{AppClient, AppConnConsensus, AppConnError, AppConns, Application};
use crate::evidence::MockEvidencePool;
use crate::mempool::MockMempool;
use crate::metrics::Metrics;
use crate::state::{exec_commit_block, AsuraResponses, BlockExecutor, ExecError, State};
use crate::storage::{
    BlockStore, RoundStateInfo, StateStore, StoreError, TimedWalMessage, TimeoutInfo, WalError,
    WalGroup, WalMessage, WalSearchOptions,
};
use crate::types::{GenesisDoc, Tx, ValidatorUpdate};

#[derive(thiserror::Error, Debug)]
pub enum HandshakeError {
    #[error("app connection failed: {0}")]
    AppConn(#[from] AppConnError),
    #[error("app reported negative block height {0}")]
    NegativeAppHeight(i64),
    #[error("app block height {app} is higher than store height {store}")]
    AppBlockHeightTooHigh { store: u64, app: u64 },
    #[error("state height {state} is ahead of store height {store}")]
    StateAheadOfStore { store: u64, state: u64 },
    #[error("store height {store} is more than one ahead of state height {state}")]
    StoreTooFarAhead { store: u64, state: u64 },
    #[error("app hash mismatch after replay: state has {state}, app has {app}")]
    AppHashMismatch { state: String, app: String },
    #[error("block {0} missing from the store")]
    MissingBlock(u64),
    #[error("no recorded app responses for height {0}")]
    MissingResponses(u64),
    #[error("execution failed during replay: {0}")]
    Exec(#[from] ExecError),
    #[error("store failure: {0}")]
    Store(#[from] StoreError),
    #[error("wal failure: {0}")]
    Wal(#[from] WalError),
    #[error("wal already contains an end-height marker for {0}")]
    EndHeightPresent(u64),
    #[error("wal has no end-height marker for {0}")]
    EndHeightMissing(u64),
    #[error("wal corrupted in catchup window at height {height}: {reason}")]
    CorruptWal { height: u64, reason: String },
    #[error("round state mismatch during replay: expected {expected:?}, got {got:?}")]
    RoundStateMismatch {
        expected: RoundStateInfo,
        got: RoundStateInfo,
    },
    #[error("timed out waiting for the state machine to reach the replayed step")]
    RoundStateTimeout,
}

/// Reconciles the application, block store, and state store heights on
/// startup, replaying stored blocks as needed, before consensus resumes.
///
/// There are two failure windows: a crash during consensus is recovered from
/// the consensus WAL (`catchup_replay`); a crash while applying a block is
/// recovered here by comparing the three height markers.
pub struct Handshaker {
    state_store: Arc<StateStore>,
    block_store: Arc<BlockStore>,
    genesis: GenesisDoc,
    metrics: Arc<Metrics>,
    n_blocks: usize,
}

impl Handshaker {
    pub fn new(
        state_store: Arc<StateStore>,
        block_store: Arc<BlockStore>,
        genesis: GenesisDoc,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            state_store,
            block_store,
            genesis,
            metrics,
            n_blocks: 0,
        }
    }

    /// Number of blocks replayed so far.
    pub fn n_blocks(&self) -> usize {
        self.n_blocks
    }

    /// Query the app for its last committed height and bring (app, store,
    /// state) to agreement. Returns the reconciled state.
    pub fn handshake(&mut self, state: State, conns: &AppConns) -> Result<State, HandshakeError> {
        let res = conns.query().info_sync(RequestInfo {
            version: env!("CARGO_PKG_VERSION").to_string(),
        })?;
        if res.last_block_height < 0 {
            return Err(HandshakeError::NegativeAppHeight(res.last_block_height));
        }
        let app_height = res.last_block_height as u64;
        let app_hash = res.last_block_app_hash;

        info!(app_height, app_hash = %hex(&app_hash), "asura handshake");

        let state = self.replay_blocks(state, app_hash, app_height, conns)?;

        info!(
            height = state.last_block_height,
            blocks_replayed = self.n_blocks,
            "completed asura handshake, replica and app are synced"
        );
        Ok(state)
    }

    /// Replay all blocks since the app's height and check the result against
    /// the stored state.
    pub fn replay_blocks(
        &mut self,
        state: State,
        app_hash: Vec<u8>,
        app_height: u64,
        conns: &AppConns,
    ) -> Result<State, HandshakeError> {
        let store_height = self.block_store.height()?;
        let state_height = state.last_block_height;
        info!(app_height, store_height, state_height, "asura replay blocks");

        // at genesis the app must be seeded before anything is replayed
        if app_height == 0 {
            let validators: Vec<ValidatorUpdate> = state
                .validators
                .validators()
                .iter()
                .map(|v| ValidatorUpdate {
                    pub_key: v.pub_key,
                    power: v.voting_power,
                })
                .collect();
            conns.consensus().init_chain_sync(RequestInitChain {
                validators,
                app_state_bytes: self.genesis.app_state_bytes.clone(),
            })?;
        }

        // the app may never be ahead of the store, and the store may be at
        // most one block ahead of the state
        if app_height > store_height {
            return Err(HandshakeError::AppBlockHeightTooHigh {
                store: store_height,
                app: app_height,
            });
        }
        if state_height > store_height {
            return Err(HandshakeError::StateAheadOfStore {
                store: store_height,
                state: state_height,
            });
        }
        if store_height > state_height + 1 {
            return Err(HandshakeError::StoreTooFarAhead {
                store: store_height,
                state: state_height,
            });
        }

        if store_height == 0 {
            check_app_hash(&state, &app_hash)?;
            return Ok(state);
        }

        if store_height == state_height {
            // commit ran and the state was saved; either the app is asking
            // for replay or everything is already synced
            if app_height < store_height {
                let replayed = self.replay_range(conns, app_height, store_height)?;
                check_app_hash(&state, &replayed)?;
            } else {
                check_app_hash(&state, &app_hash)?;
            }
            return Ok(state);
        }

        // store == state + 1: the block was saved but the state was not
        if app_height < state_height {
            // the app is further behind; replay up to the state height
            // without touching state, then the last block for real
            self.replay_range(conns, app_height, state_height)?;
            self.replay_block(state, store_height, conns.consensus().clone())
        } else if app_height == state_height {
            // commit never ran: both app and state are one block behind
            info!(height = store_height, "replaying last block using real app");
            self.replay_block(state, store_height, conns.consensus().clone())
        } else {
            // app == store: commit ran but the state was not saved; rebuild
            // it from the recorded responses without committing twice
            let responses = self
                .state_store
                .load_asura_responses(store_height)?
                .ok_or(HandshakeError::MissingResponses(store_height))?;
            let mock = mock_proxy_app(app_hash, responses);
            info!(height = store_height, "replaying last block using mock app");
            self.replay_block(state, store_height, mock)
        }
    }

    /// Execute blocks `(app_height, final_height]` on the app without state
    /// validation or mutation. Returns the last app hash.
    fn replay_range(
        &mut self,
        conns: &AppConns,
        app_height: u64,
        final_height: u64,
    ) -> Result<Vec<u8>, HandshakeError> {
        let mut app_hash = Vec::new();
        for height in app_height + 1..=final_height {
            info!(height, "applying block");
            let block = self
                .block_store
                .load_block(height)?
                .ok_or(HandshakeError::MissingBlock(height))?;
            app_hash = exec_commit_block(conns.consensus(), &block)?;
            self.n_blocks += 1;
            self.metrics.replay_blocks.inc();
        }
        Ok(app_hash)
    }

    /// Full ApplyBlock for the final block, against the given connection
    /// (real app or recorded-response mock). Saves the resulting state.
    fn replay_block(
        &mut self,
        state: State,
        height: u64,
        proxy_app: AppConnConsensus,
    ) -> Result<State, HandshakeError> {
        let block = self
            .block_store
            .load_block(height)?
            .ok_or(HandshakeError::MissingBlock(height))?;
        let meta = self
            .block_store
            .load_block_meta(height)?
            .ok_or(HandshakeError::MissingBlock(height))?;

        let executor = BlockExecutor::new(
            Arc::clone(&self.state_store),
            proxy_app,
            Arc::new(MockMempool::default()),
            Arc::new(MockEvidencePool),
            Arc::clone(&self.metrics),
        );
        let state = executor.apply_block(state, &meta.block_id, &block)?;

        self.n_blocks += 1;
        self.metrics.replay_blocks.inc();
        Ok(state)
    }
}

/// The replica's derived state must agree with the app byte for byte; a
/// divergence here cannot be repaired by retrying.
fn check_app_hash(state: &State, app_hash: &[u8]) -> Result<(), HandshakeError> {
    if state.app_hash != app_hash {
        return Err(HandshakeError::AppHashMismatch {
            state: hex(&state.app_hash),
            app: hex(app_hash),
        });
    }
    Ok(())
}

// ---- consensus WAL catchup ----

/// Consumer of replayed consensus WAL messages. The consensus state machine
/// implements this so catchup feeds it exactly what it would have received
/// from the network.
pub trait ReplaySink {
    /// A peer message (proposal, block part, or vote) as originally received.
    fn handle_message(&mut self, peer_id: &str, msg: &[u8]);
    /// An internal timeout as originally fired.
    fn handle_timeout(&mut self, info: &TimeoutInfo);
}

/// Replay consensus messages recorded after the last committed height.
///
/// Seeks to the record following the end-height marker for `cs_height - 1`
/// and feeds everything after it into the sink. Round-state records are
/// cross-checked against `new_step` (the state machine's own step events)
/// under a two second deadline each. An end-height marker for `cs_height`
/// itself means the commit already happened and is fatal.
pub fn catchup_replay(
    wal: &WalGroup,
    cs_height: u64,
    sink: &mut dyn ReplaySink,
    new_step: Option<&Receiver<RoundStateInfo>>,
) -> Result<usize, HandshakeError> {
    let ignore = WalSearchOptions {
        ignore_data_corruption_errors: true,
    };

    if wal.search_for_end_height(cs_height, &ignore)?.is_some() {
        return Err(HandshakeError::EndHeightPresent(cs_height));
    }

    let prev = cs_height.saturating_sub(1);
    let mut reader = wal
        .search_for_end_height(prev, &ignore)?
        .ok_or(HandshakeError::EndHeightMissing(prev))?;

    info!(height = cs_height, "catchup by replaying consensus messages");

    let mut replayed = 0;
    loop {
        let msg = match reader.decode() {
            Ok(None) => break,
            Ok(Some(m)) => m,
            Err(e) if e.is_corruption() => {
                error!(height = cs_height, error = %e, "wal corrupted in the catchup window");
                return Err(HandshakeError::CorruptWal {
                    height: cs_height,
                    reason: e.to_string(),
                });
            }
            Err(e) => return Err(e.into()),
        };
        replay_message(&msg, sink, new_step)?;
        replayed += 1;
    }

    info!(replayed, "catchup replay done");
    Ok(replayed)
}

fn replay_message(
    msg: &TimedWalMessage,
    sink: &mut dyn ReplaySink,
    new_step: Option<&Receiver<RoundStateInfo>>,
) -> Result<(), HandshakeError> {
    match &msg.msg {
        // meta record, nothing to feed
        WalMessage::EndHeight { .. } => {}
        WalMessage::RoundState(expected) => {
            info!(
                height = expected.height,
                round = expected.round,
                step = %expected.step,
                "replay: new step"
            );
            if let Some(rx) = new_step {
                match rx.recv_timeout(Duration::from_secs(2)) {
                    Ok(got) if got == *expected => {}
                    Ok(got) => {
                        return Err(HandshakeError::RoundStateMismatch {
                            expected: expected.clone(),
                            got,
                        })
                    }
                    Err(_) => return Err(HandshakeError::RoundStateTimeout),
                }
            }
        }
        WalMessage::MsgInfo { peer_id, msg } => {
            let peer = if peer_id.is_empty() { "local" } else { peer_id };
            info!(peer = %peer, "replay: peer message");
            sink.handle_message(peer, msg);
        }
        WalMessage::Timeout(t) => {
            info!(
                height = t.height,
                round = t.round,
                duration_ms = t.duration_ms,
                "replay: timeout"
            );
            sink.handle_timeout(t);
        }
    }
    Ok(())
}

// ---- recorded-response mock app ----

/// Serves the recorded responses for one block so the final block can be
/// replayed without calling Commit twice on the real app.
struct MockReplayApp {
    app_hash: Vec<u8>,
    tx_index: usize,
    responses: AsuraResponses,
}

impl Application for MockReplayApp {
    fn deliver_tx(&mut self, _tx: &Tx) -> ResponseDeliverTx {
        let res = self
            .responses
            .deliver_tx
            .get(self.tx_index)
            .cloned()
            .unwrap_or_default();
        self.tx_index += 1;
        res
    }

    fn end_block(&mut self, _req: RequestEndBlock) -> ResponseEndBlock {
        self.tx_index = 0;
        self.responses.end_block.clone()
    }

    fn commit(&mut self) -> ResponseCommit {
        ResponseCommit {
            data: self.app_hash.clone(),
        }
    }
}

/// Consensus connection backed by the recorded responses for one height.
pub fn mock_proxy_app(app_hash: Vec<u8>, responses: AsuraResponses) -> AppConnConsensus {
    AppConnConsensus::new(AppClient::new(Arc::new(Mutex::new(MockReplayApp {
        app_hash,
        tx_index: 0,
        responses,
    }))))
}

fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}
