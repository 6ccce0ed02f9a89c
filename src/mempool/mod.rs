pub mod cache;

use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};

use crossbeam_channel::{bounded, Receiver, Sender};
use tracing::{debug, error, info, warn};

use crate::app::messages::{Request, Response, ResponseCheckTx};
use crate::app::{AppConnError, AppConnMempool};
use crate::config::MempoolSection;
use crate::metrics::Metrics;
use crate::types::{Hash, Tx};

pub use cache::TxCache;

/// Admission filter run before a tx is handed to the application.
pub type PreCheckFn = Arc<dyn Fn(&Tx) -> Result<(), anyhow::Error> + Send + Sync>;
/// Filter run against the application's CheckTx response.
pub type PostCheckFn = Arc<dyn Fn(&Tx, &ResponseCheckTx) -> Result<(), anyhow::Error> + Send + Sync>;

/// Reject any tx whose encoded form exceeds `max_bytes`.
pub fn pre_check_max_bytes(max_bytes: usize) -> PreCheckFn {
    Arc::new(move |tx: &Tx| {
        let size = tx.encoded_size();
        if size > max_bytes {
            anyhow::bail!("tx size {} exceeds max {}", size, max_bytes);
        }
        Ok(())
    })
}

/// Reject any tx wanting more gas than `max_gas`. Negative means unlimited.
pub fn post_check_max_gas(max_gas: i64) -> PostCheckFn {
    Arc::new(move |_tx: &Tx, res: &ResponseCheckTx| {
        if max_gas > -1 && res.gas_wanted > max_gas {
            anyhow::bail!("gas wanted {} exceeds max {}", res.gas_wanted, max_gas);
        }
        Ok(())
    })
}

#[derive(thiserror::Error, Debug)]
pub enum PoolError {
    #[error("tx already exists in cache")]
    InCache,
    #[error("tx too large: {size} bytes, max {max}")]
    TooLarge { size: usize, max: usize },
    #[error("mempool is full: {num_txs} txs (max {max_txs}), {txs_bytes} bytes (max {max_txs_bytes})")]
    Full {
        num_txs: usize,
        max_txs: usize,
        txs_bytes: i64,
        max_txs_bytes: i64,
    },
    #[error("tx failed pre-check: {0}")]
    PreCheck(anyhow::Error),
    #[error("tx failed post-check: {0}")]
    PostCheck(anyhow::Error),
    #[error("app connection failed: {0}")]
    AppConn(#[from] AppConnError),
}

/// Metadata accompanying a submitted tx.
#[derive(Clone, Debug, Default)]
pub struct TxInfo {
    /// Peer the tx arrived from; None for local submissions.
    pub peer_id: Option<String>,
}

/// Proof that the pool's update gate is held. Obtained from `TxPool::lock`;
/// operations that must run inside the commit window take it by reference.
pub struct PoolLock<'a> {
    _guard: MutexGuard<'a, ()>,
}

/// The executor's view of a transaction pool. The commit window holds the
/// lock across flush_app_conn, the app's Commit, and update, so no check-tx
/// traffic interleaves with the app state reset.
pub trait TxPool: Send + Sync {
    fn lock(&self) -> PoolLock<'_>;
    fn flush_app_conn(&self) -> Result<(), AppConnError>;
    fn update(
        &self,
        lock: &PoolLock<'_>,
        height: u64,
        txs: &[Tx],
        pre_check: Option<PreCheckFn>,
        post_check: Option<PostCheckFn>,
    ) -> Result<(), PoolError>;
}

/// Pool that does nothing. Stands in for the real pool during handshake
/// replay, where there is no live traffic to invalidate.
#[derive(Default)]
pub struct MockMempool {
    update_mtx: Mutex<()>,
}

impl TxPool for MockMempool {
    fn lock(&self) -> PoolLock<'_> {
        PoolLock {
            _guard: self.update_mtx.lock().unwrap_or_else(|e| e.into_inner()),
        }
    }

    fn flush_app_conn(&self) -> Result<(), AppConnError> {
        Ok(())
    }

    fn update(
        &self,
        _lock: &PoolLock<'_>,
        _height: u64,
        _txs: &[Tx],
        _pre_check: Option<PreCheckFn>,
        _post_check: Option<PostCheckFn>,
    ) -> Result<(), PoolError> {
        Ok(())
    }
}

struct PoolEntry {
    tx: Tx,
    gas_wanted: i64,
    /// Height of the chain when the tx was admitted.
    #[allow(dead_code)]
    height: u64,
    /// Peers that gossiped this tx; the broadcast path skips them.
    #[allow(dead_code)]
    senders: BTreeSet<String>,
}

struct PoolInner {
    /// FIFO by admission; reaping walks this in order.
    txs: Vec<PoolEntry>,
    /// Raw tx bytes currently accounted for, admitted plus in-flight.
    txs_bytes: i64,
    height: u64,
    notified_txs_available: bool,
    /// Hashes whose recheck responses are still expected, in request order.
    recheck_queue: VecDeque<Hash>,
    /// Admitted to the app, response not yet seen: hash -> senders.
    pending: HashMap<Hash, BTreeSet<String>>,
    pre_check: Option<PreCheckFn>,
    post_check: Option<PostCheckFn>,
}

struct Shared {
    config: MempoolSection,
    inner: Mutex<PoolInner>,
    cache: Mutex<TxCache>,
    txs_available: Mutex<Option<Sender<()>>>,
    metrics: Arc<Metrics>,
}

/// The transaction pool: admission control, dedup cache, WAL durability,
/// size/gas reaping, and commit-coupled invalidation.
pub struct Mempool {
    shared: Arc<Shared>,
    app_conn: AppConnMempool,
    update_mtx: Mutex<()>,
    wal: Mutex<Option<WalFile>>,
}

struct WalFile {
    file: File,
    path: PathBuf,
}

impl Mempool {
    pub fn new(
        config: MempoolSection,
        app_conn: AppConnMempool,
        height: u64,
        metrics: Arc<Metrics>,
    ) -> Self {
        let shared = Arc::new(Shared {
            cache: Mutex::new(TxCache::new(config.cache_size)),
            inner: Mutex::new(PoolInner {
                txs: Vec::new(),
                txs_bytes: 0,
                height,
                notified_txs_available: false,
                recheck_queue: VecDeque::new(),
                pending: HashMap::new(),
                pre_check: None,
                post_check: None,
            }),
            txs_available: Mutex::new(None),
            config,
            metrics,
        });

        let cb_shared = Arc::clone(&shared);
        app_conn.set_response_callback(Box::new(move |req, res| {
            if let (Request::CheckTx(tx), Response::CheckTx(r)) = (req, res) {
                handle_check_tx_response(&cb_shared, tx, r);
            }
        }));

        Self {
            shared,
            app_conn,
            update_mtx: Mutex::new(()),
            wal: Mutex::new(None),
        }
    }

    /// Set the admission filters. Passing None keeps the current filter.
    pub fn set_filters(&self, pre_check: Option<PreCheckFn>, post_check: Option<PostCheckFn>) {
        let mut p = self.shared.inner.lock().unwrap_or_else(|e| e.into_inner());
        if pre_check.is_some() {
            p.pre_check = pre_check;
        }
        if post_check.is_some() {
            p.post_check = post_check;
        }
    }

    /// Submit a tx for validation by the application. On success the tx is
    /// in flight; it becomes reapable once the app accepts it.
    pub fn check_tx(&self, tx: Tx, info: TxInfo) -> Result<(), PoolError> {
        let _gate = self.update_mtx.lock().unwrap_or_else(|e| e.into_inner());
        let mut p = self.shared.inner.lock().unwrap_or_else(|e| e.into_inner());

        let cfg = &self.shared.config;
        if p.txs.len() + p.pending.len() >= cfg.size
            || p.txs_bytes + tx.len() as i64 > cfg.max_txs_bytes
        {
            return Err(PoolError::Full {
                num_txs: p.txs.len() + p.pending.len(),
                max_txs: cfg.size,
                txs_bytes: p.txs_bytes,
                max_txs_bytes: cfg.max_txs_bytes,
            });
        }
        if tx.len() > cfg.max_tx_size {
            return Err(PoolError::TooLarge {
                size: tx.len(),
                max: cfg.max_tx_size,
            });
        }
        if let Some(pre) = p.pre_check.clone() {
            pre(&tx).map_err(PoolError::PreCheck)?;
        }

        {
            let mut cache = self.shared.cache.lock().unwrap_or_else(|e| e.into_inner());
            if !cache.push(&tx) {
                // already seen: just record the extra sender
                if let Some(peer) = info.peer_id {
                    let hash = tx.hash();
                    if let Some(pos) = p.txs.iter().position(|e| e.tx == tx) {
                        p.txs[pos].senders.insert(peer);
                    } else if let Some(s) = p.pending.get_mut(&hash) {
                        s.insert(peer);
                    }
                }
                return Err(PoolError::InCache);
            }
        }

        self.write_wal(&tx);

        let mut senders = BTreeSet::new();
        if let Some(peer) = info.peer_id {
            senders.insert(peer);
        }
        p.txs_bytes += tx.len() as i64;
        p.pending.insert(tx.hash(), senders);

        if let Err(e) = self.app_conn.check_tx_async(tx.clone()) {
            // the tx never reached the app; undo the reservation
            p.pending.remove(&tx.hash());
            p.txs_bytes -= tx.len() as i64;
            self.shared
                .cache
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .remove(&tx);
            return Err(PoolError::AppConn(e));
        }
        Ok(())
    }

    /// Longest FIFO prefix within the byte and gas bounds. Negative bounds
    /// mean unlimited. Stops at the first entry that would exceed either
    /// bound; later entries are not considered.
    pub fn reap_max_bytes_max_gas(&self, max_bytes: i64, max_gas: i64) -> Vec<Tx> {
        let _gate = self.update_mtx.lock().unwrap_or_else(|e| e.into_inner());
        let p = self.shared.inner.lock().unwrap_or_else(|e| e.into_inner());

        let mut total_bytes: i64 = 0;
        let mut total_gas: i64 = 0;
        let mut out = Vec::new();
        for e in &p.txs {
            let size = e.tx.encoded_size() as i64;
            if max_bytes > -1 && total_bytes + size > max_bytes {
                break;
            }
            if max_gas > -1 && total_gas + e.gas_wanted > max_gas {
                break;
            }
            total_bytes += size;
            total_gas += e.gas_wanted;
            out.push(e.tx.clone());
        }
        out
    }

    /// Remove the committed txs, cache their hashes, and re-check whatever
    /// remains under the (possibly replaced) filters.
    ///
    /// Runs inside the commit window: the caller holds the update gate and
    /// has flushed the app connection, so every earlier check-tx response
    /// has been processed.
    pub fn update(
        &self,
        _lock: &PoolLock<'_>,
        height: u64,
        txs: &[Tx],
        pre_check: Option<PreCheckFn>,
        post_check: Option<PostCheckFn>,
    ) -> Result<(), PoolError> {
        let mut p = self.shared.inner.lock().unwrap_or_else(|e| e.into_inner());

        p.height = height;
        p.notified_txs_available = false;
        if pre_check.is_some() {
            p.pre_check = pre_check;
        }
        if post_check.is_some() {
            p.post_check = post_check;
        }

        // committed hashes go to the cache first so re-broadcasts are
        // rejected from here on
        {
            let mut cache = self.shared.cache.lock().unwrap_or_else(|e| e.into_inner());
            for tx in txs {
                cache.push(tx);
            }
        }

        let committed: HashSet<Hash> = txs.iter().map(|t| t.hash()).collect();
        let mut kept = Vec::with_capacity(p.txs.len());
        for e in std::mem::take(&mut p.txs) {
            if committed.contains(&e.tx.hash()) {
                p.txs_bytes -= e.tx.len() as i64;
            } else {
                kept.push(e);
            }
        }
        p.txs = kept;
        for tx in txs {
            if p.pending.remove(&tx.hash()).is_some() {
                p.txs_bytes -= tx.len() as i64;
            }
        }

        if !p.txs.is_empty() {
            if self.shared.config.recheck {
                debug!(txs = p.txs.len(), height, "rechecking txs");
                let hashes: VecDeque<Hash> = p.txs.iter().map(|e| e.tx.hash()).collect();
                p.recheck_queue = hashes;
                self.shared.metrics.mempool_recheck_times.inc();
                for i in 0..p.txs.len() {
                    let tx = p.txs[i].tx.clone();
                    self.app_conn.check_tx_async(tx)?;
                }
            } else {
                notify_txs_available(&self.shared, &mut p);
            }
        }

        self.shared.metrics.mempool_size.set(p.txs.len() as i64);
        self.shared.metrics.mempool_tx_bytes.set(p.txs_bytes);
        Ok(())
    }

    /// Empty the pool and the dedup cache.
    pub fn flush(&self) {
        let _gate = self.update_mtx.lock().unwrap_or_else(|e| e.into_inner());
        let mut p = self.shared.inner.lock().unwrap_or_else(|e| e.into_inner());
        p.txs.clear();
        p.pending.clear();
        p.recheck_queue.clear();
        p.txs_bytes = 0;
        self.shared
            .cache
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .reset();
        self.shared.metrics.mempool_size.set(0);
        self.shared.metrics.mempool_tx_bytes.set(0);
    }

    pub fn size(&self) -> usize {
        self.shared
            .inner
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .txs
            .len()
    }

    /// Total raw bytes currently accounted for in the pool.
    pub fn txs_bytes(&self) -> i64 {
        self.shared
            .inner
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .txs_bytes
    }

    /// Arm the availability signal. After this, the signal fires exactly
    /// once per height when the pool becomes non-empty.
    pub fn enable_txs_available(&self) -> Receiver<()> {
        let (tx, rx) = bounded(1);
        *self
            .shared
            .txs_available
            .lock()
            .unwrap_or_else(|e| e.into_inner()) = Some(tx);
        rx
    }

    /// Open the tx WAL under the configured directory, replaying any
    /// entries left from a previous run. Returns the number of replayed txs.
    /// A no-op when no wal_dir is configured.
    pub fn init_wal(&self) -> std::io::Result<usize> {
        if self.shared.config.wal_dir.is_empty() {
            return Ok(0);
        }
        let dir = PathBuf::from(&self.shared.config.wal_dir);
        std::fs::create_dir_all(&dir)?;
        let path = dir.join("wal");

        let old = match std::fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(e) => return Err(e),
        };

        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&path)?;
        *self.wal.lock().unwrap_or_else(|e| e.into_inner()) = Some(WalFile { file, path });

        // resubmit; valid entries re-append themselves to the fresh file
        let mut replayed = 0;
        for line in old.split(|b| *b == b'\n') {
            if line.is_empty() {
                continue;
            }
            if self.check_tx(Tx(line.to_vec()), TxInfo::default()).is_ok() {
                replayed += 1;
            }
        }
        if replayed > 0 {
            info!(replayed, "replayed mempool wal");
        }
        Ok(replayed)
    }

    /// Stop persisting submissions. Later check-tx calls leave the file
    /// untouched.
    pub fn close_wal(&self) {
        *self.wal.lock().unwrap_or_else(|e| e.into_inner()) = None;
    }

    pub fn wal_path(&self) -> Option<PathBuf> {
        self.wal
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .as_ref()
            .map(|w| w.path.clone())
    }

    fn write_wal(&self, tx: &Tx) {
        let mut wal = self.wal.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(w) = wal.as_mut() {
            let res = w
                .file
                .write_all(&tx.0)
                .and_then(|_| w.file.write_all(b"\n"));
            if let Err(e) = res {
                error!(error = %e, "mempool wal write failed");
            }
        }
    }
}

impl TxPool for Mempool {
    fn lock(&self) -> PoolLock<'_> {
        PoolLock {
            _guard: self.update_mtx.lock().unwrap_or_else(|e| e.into_inner()),
        }
    }

    fn flush_app_conn(&self) -> Result<(), AppConnError> {
        self.app_conn.flush()
    }

    fn update(
        &self,
        lock: &PoolLock<'_>,
        height: u64,
        txs: &[Tx],
        pre_check: Option<PreCheckFn>,
        post_check: Option<PostCheckFn>,
    ) -> Result<(), PoolError> {
        Mempool::update(self, lock, height, txs, pre_check, post_check)
    }
}

fn handle_check_tx_response(shared: &Arc<Shared>, tx: &Tx, res: &ResponseCheckTx) {
    let mut p = shared.inner.lock().unwrap_or_else(|e| e.into_inner());

    if let Some(expected) = p.recheck_queue.pop_front() {
        if expected != tx.hash() {
            warn!("recheck response out of order, ignoring");
            return;
        }
        let keep = res.is_ok() && post_check_ok(&p.post_check, tx, res);
        if !keep {
            if let Some(pos) = p.txs.iter().position(|e| e.tx == *tx) {
                let removed = p.txs.remove(pos);
                p.txs_bytes -= removed.tx.len() as i64;
                debug!(code = res.code, "tx removed on recheck");
            }
        }
        if p.recheck_queue.is_empty() {
            debug!("done rechecking txs");
            if !p.txs.is_empty() {
                notify_txs_available(shared, &mut p);
            }
        }
    } else {
        let senders = match p.pending.remove(&tx.hash()) {
            Some(s) => s,
            // committed while in flight, or a stray response
            None => return,
        };
        let keep = res.is_ok() && post_check_ok(&p.post_check, tx, res);
        if keep {
            let entry = PoolEntry {
                tx: tx.clone(),
                gas_wanted: res.gas_wanted,
                height: p.height,
                senders,
            };
            p.txs.push(entry);
            debug!(tx = %tx.hash(), pool_size = p.txs.len(), "added valid tx");
            notify_txs_available(shared, &mut p);
        } else {
            // hash stays in the cache: the same bytes will be refused
            // without another round trip to the app
            p.txs_bytes -= tx.len() as i64;
            debug!(code = res.code, log = %res.log, "rejected invalid tx");
            shared.metrics.mempool_failed_txs.inc();
        }
    }

    shared.metrics.mempool_size.set(p.txs.len() as i64);
    shared.metrics.mempool_tx_bytes.set(p.txs_bytes);
}

fn post_check_ok(post_check: &Option<PostCheckFn>, tx: &Tx, res: &ResponseCheckTx) -> bool {
    match post_check {
        Some(f) => f(tx, res).is_ok(),
        None => true,
    }
}

fn notify_txs_available(shared: &Shared, p: &mut PoolInner) {
    if p.notified_txs_available {
        return;
    }
    let slot = shared
        .txs_available
        .lock()
        .unwrap_or_else(|e| e.into_inner());
    if let Some(tx) = slot.as_ref() {
        p.notified_txs_available = true;
        let _ = tx.try_send(());
    }
}
