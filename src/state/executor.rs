use std::sync::{Arc, Mutex};
use std::time::Instant;

use tracing::{debug, error, info};

use crate::app::messages::{RequestBeginBlock, RequestEndBlock, Response};
use crate::app::{AppConnConsensus, AppConnError};
use crate::evidence::EvidencePool;
use crate::mempool::{PoolError, TxPool};
use crate::metrics::Metrics;
use crate::storage::{StateStore, StoreError};
use crate::types::{
    Block, BlockEventPublisher, BlockHeader, BlockId, EventNewBlock, EventNewBlockHeader, EventTx,
    EventValidatorSetUpdates, NopEventBus, ParamsError, TxEventBuffer, TxResult,
    ValidatorSetError,
};

use super::{validate_block, AsuraResponses, State, ValidationError};

#[derive(thiserror::Error, Debug)]
pub enum ExecError {
    #[error("invalid block: {0}")]
    InvalidBlock(#[from] ValidationError),
    #[error("app connection failed: {0}")]
    AppConn(#[from] AppConnError),
    #[error("bad consensus params update: {0}")]
    BadParamsUpdate(#[from] ParamsError),
    #[error("bad validator updates: {0}")]
    Validators(#[from] ValidatorSetError),
    #[error("store failure: {0}")]
    Store(#[from] StoreError),
    #[error("mempool update failed: {0}")]
    Mempool(#[from] PoolError),
}

/// Executes decided blocks against the application and derives the next
/// state. ApplyBlock is the only mutation path for State; its internal
/// ordering (exec, save responses, derive, commit, save state, events) is
/// what makes crash recovery possible.
pub struct BlockExecutor {
    store: Arc<StateStore>,
    proxy_app: AppConnConsensus,
    event_bus: Box<dyn BlockEventPublisher>,
    mempool: Arc<dyn TxPool>,
    evpool: Arc<dyn EvidencePool>,
    metrics: Arc<Metrics>,
}

impl BlockExecutor {
    /// New executor publishing into a no-op bus. Call `set_event_bus` to
    /// wire a real one.
    pub fn new(
        store: Arc<StateStore>,
        proxy_app: AppConnConsensus,
        mempool: Arc<dyn TxPool>,
        evpool: Arc<dyn EvidencePool>,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            store,
            proxy_app,
            event_bus: Box::new(NopEventBus),
            mempool,
            evpool,
            metrics,
        }
    }

    pub fn set_event_bus(&mut self, bus: Box<dyn BlockEventPublisher>) {
        self.event_bus = bus;
    }

    pub fn validate_block(&self, state: &State, block: &Block) -> Result<(), ValidationError> {
        validate_block(state, block)
    }

    /// Validate the block against the state, execute it against the app,
    /// commit, and save the new state and responses. The only entry point
    /// for processing a decided block.
    pub fn apply_block(
        &self,
        state: State,
        block_id: &BlockId,
        block: &Block,
    ) -> Result<State, ExecError> {
        let started = Instant::now();

        self.validate_block(&state, block)?;

        let responses = exec_block_on_app(&self.proxy_app, block)?;

        // save the results before we commit
        self.store
            .save_asura_responses(block.header.height, &responses)?;

        let mut new_state = update_state(&state, block_id, &block.header, &responses)?;

        // lock mempool, commit app state, update mempool
        let app_hash = self.commit(block)?;

        new_state.app_hash = app_hash;
        self.store.save_state(&new_state)?;

        // state is saved; evidence included in this block is now settled
        self.evpool.update(block);

        // events fire after everything else; a crash between commit and save
        // means some may be published again on replay
        fire_events(self.event_bus.as_ref(), block, &responses);

        self.metrics
            .state_block_processing_duration
            .observe(started.elapsed().as_secs_f64());
        self.metrics.state_block_height.set(block.header.height as i64);

        Ok(new_state)
    }

    /// Commit window: hold the pool's update gate, drain in-flight CheckTx
    /// traffic, run the app's Commit, then invalidate the pool. Nothing may
    /// enter the pool while the app state is being reset.
    fn commit(&self, block: &Block) -> Result<Vec<u8>, ExecError> {
        let lock = self.mempool.lock();

        self.mempool.flush_app_conn().map_err(|e| {
            error!(error = %e, "flushing mempool connection failed");
            e
        })?;

        let res = self.proxy_app.commit_sync().map_err(|e| {
            error!(error = %e, "app commit failed");
            e
        })?;

        info!(
            height = block.header.height,
            txs = block.header.num_txs,
            app_hash = %hex(&res.data),
            "committed state"
        );

        self.mempool
            .update(&lock, block.header.height, &block.txs, None, None)?;

        Ok(res.data)
    }
}

/// Execute the block's transactions on the consensus connection. Collects
/// the BeginBlock, per-tx DeliverTx (in block order), and EndBlock responses.
pub fn exec_block_on_app(
    proxy_app: &AppConnConsensus,
    block: &Block,
) -> Result<AsuraResponses, AppConnError> {
    let mut responses = AsuraResponses::new(block);

    let deliver: Arc<Mutex<Vec<crate::app::messages::ResponseDeliverTx>>> =
        Arc::new(Mutex::new(Vec::with_capacity(block.txs.len())));
    let collected = Arc::clone(&deliver);
    proxy_app.set_response_callback(Box::new(move |_req, res| {
        if let Response::DeliverTx(r) = res {
            collected
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .push(r.clone());
        }
    }));

    let request = RequestBeginBlock {
        hash: block.hash(),
        header: block.header.clone(),
        absent_validators: block.last_commit.absent_indices(),
        byzantine_validators: block
            .evidence
            .iter()
            .map(|ev| crate::app::messages::EvidenceInfo {
                address: ev.address,
                height: ev.height,
            })
            .collect(),
    };
    responses.begin_block = proxy_app.begin_block_sync(request)?;

    for tx in &block.txs {
        proxy_app.deliver_tx_async(tx.clone())?;
        if let Some(err) = proxy_app.error() {
            return Err(err);
        }
    }

    // EndBlock is synchronous, so every DeliverTx response has been
    // collected by the time it returns
    responses.end_block = proxy_app.end_block_sync(RequestEndBlock {
        height: block.header.height,
    })?;

    responses.deliver_tx = std::mem::take(&mut *deliver.lock().unwrap_or_else(|e| e.into_inner()));

    let valid = responses.deliver_tx.iter().filter(|r| r.is_ok()).count();
    let invalid = responses.deliver_tx.len() - valid;
    info!(
        height = block.header.height,
        valid_txs = valid,
        invalid_txs = invalid,
        "executed block"
    );
    if !responses.end_block.validator_updates.is_empty() {
        info!(
            updates = responses.end_block.validator_updates.len(),
            "updates to validators"
        );
    }

    Ok(responses)
}

/// Execute and commit a block on the app without validating or mutating
/// state. Used by the handshaker to bring a lagging app up to the store.
pub fn exec_commit_block(
    proxy_app: &AppConnConsensus,
    block: &Block,
) -> Result<Vec<u8>, ExecError> {
    exec_block_on_app(proxy_app, block)?;
    let res = proxy_app.commit_sync()?;
    Ok(res.data)
}

/// Derive the next state from the block and the app's responses. Pure and
/// deterministic; the app hash is filled in after commit.
pub fn update_state(
    state: &State,
    block_id: &BlockId,
    header: &BlockHeader,
    responses: &AsuraResponses,
) -> Result<State, ExecError> {
    let mut next_validators = state.validators.clone();
    let mut last_height_validators_changed = state.last_height_validators_changed;
    if !responses.end_block.validator_updates.is_empty() {
        next_validators = next_validators.apply_updates(&responses.end_block.validator_updates)?;
        // the change lands at the next height
        last_height_validators_changed = header.height + 1;
    }
    next_validators.increment_proposer_priority(1);

    let mut next_params = state.consensus_params;
    let mut last_height_params_changed = state.last_height_consensus_params_changed;
    if let Some(updates) = &responses.end_block.consensus_param_updates {
        next_params = state.consensus_params.update(Some(updates));
        next_params.validate()?;
        last_height_params_changed = header.height + 1;
    }

    Ok(State {
        chain_id: state.chain_id.clone(),
        last_block_height: header.height,
        last_block_total_tx: state.last_block_total_tx + header.num_txs,
        last_block_id: *block_id,
        last_block_time_ms: header.time_ms,
        validators: next_validators,
        last_validators: state.validators.clone(),
        last_height_validators_changed,
        consensus_params: next_params,
        last_height_consensus_params_changed: last_height_params_changed,
        last_results_hash: responses.results_hash(),
        app_hash: Vec::new(),
    })
}

/// Publish NewBlock, NewBlockHeader, one Tx event per tx (buffered), and
/// validator set updates if any.
fn fire_events(bus: &dyn BlockEventPublisher, block: &Block, responses: &AsuraResponses) {
    let mut buffer = TxEventBuffer::new(bus, block.txs.len());
    for (i, tx) in block.txs.iter().enumerate() {
        buffer.publish_tx(EventTx {
            tx_result: TxResult {
                height: block.header.height,
                index: i as u32,
                tx: tx.clone(),
                result: responses.deliver_tx[i].clone(),
            },
        });
    }

    bus.publish_new_block(EventNewBlock { block: block.clone() });
    bus.publish_new_block_header(EventNewBlockHeader {
        header: block.header.clone(),
    });
    buffer.flush();

    if !responses.end_block.validator_updates.is_empty() {
        bus.publish_validator_set_updates(EventValidatorSetUpdates {
            updates: responses.end_block.validator_updates.clone(),
        });
    }
    debug!(height = block.header.height, "published block events");
}

fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}
