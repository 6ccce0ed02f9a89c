use std::sync::atomic::AtomicI64;
use std::sync::{Arc, Mutex};

use prometheus_client::encoding::text::encode;
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::gauge::Gauge;
use prometheus_client::metrics::histogram::{exponential_buckets, Histogram};
use prometheus_client::registry::Registry;

/// Prometheus metrics for the execution and mempool core.
#[derive(Clone)]
pub struct Metrics {
    pub registry: Arc<Mutex<Registry>>,

    // mempool
    pub mempool_size: Gauge<i64, AtomicI64>,
    pub mempool_tx_bytes: Gauge<i64, AtomicI64>,
    pub mempool_failed_txs: Counter,
    pub mempool_recheck_times: Counter,

    // block execution
    pub state_block_height: Gauge<i64, AtomicI64>,
    pub state_block_processing_duration: Histogram,

    // startup replay
    pub replay_blocks: Counter,
}

impl Metrics {
    pub fn new() -> Self {
        let mut registry = Registry::default();

        let mempool_size = Gauge::<i64, AtomicI64>::default();
        registry.register("asura_mempool_size", "Txs in the mempool", mempool_size.clone());

        let mempool_tx_bytes = Gauge::<i64, AtomicI64>::default();
        registry.register("asura_mempool_tx_bytes", "Total bytes in the mempool", mempool_tx_bytes.clone());

        let mempool_failed_txs = Counter::default();
        registry.register("asura_mempool_failed_txs_total", "Txs rejected by check-tx", mempool_failed_txs.clone());

        let mempool_recheck_times = Counter::default();
        registry.register("asura_mempool_recheck_times_total", "Recheck rounds after commit", mempool_recheck_times.clone());

        let state_block_height = Gauge::<i64, AtomicI64>::default();
        registry.register("asura_state_block_height", "Last applied block height", state_block_height.clone());

        let state_block_processing_duration = Histogram::new(exponential_buckets(0.01, 2.0, 12));
        registry.register("asura_state_block_processing_duration_seconds", "ApplyBlock wall time", state_block_processing_duration.clone());

        let replay_blocks = Counter::default();
        registry.register("asura_replay_blocks_total", "Blocks replayed during handshake", replay_blocks.clone());

        Self {
            registry: Arc::new(Mutex::new(registry)),
            mempool_size,
            mempool_tx_bytes,
            mempool_failed_txs,
            mempool_recheck_times,
            state_block_height,
            state_block_processing_duration,
            replay_blocks,
        }
    }

    /// Render the registry in the Prometheus text format.
    pub fn gather(&self) -> String {
        let registry = self.registry.lock().unwrap_or_else(|e| e.into_inner());
        let mut out = String::new();
        if encode(&mut out, &registry).is_err() {
            out.clear();
        }
        out
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}
