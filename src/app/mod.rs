pub mod client;
pub mod messages;

use std::sync::{Arc, Mutex};

pub use client::{AppClient, AppConnError, ReqRes, ResponseCallback};
use messages::*;

use crate::types::Tx;

/// The application state machine behind the app connections. Implementations
/// only override the requests they care about; everything else answers with
/// an empty success.
pub trait Application: Send {
    fn info(&mut self, _req: RequestInfo) -> ResponseInfo {
        ResponseInfo::default()
    }

    fn init_chain(&mut self, _req: RequestInitChain) -> ResponseInitChain {
        ResponseInitChain::default()
    }

    fn begin_block(&mut self, _req: RequestBeginBlock) -> ResponseBeginBlock {
        ResponseBeginBlock::default()
    }

    fn deliver_tx(&mut self, _tx: &Tx) -> ResponseDeliverTx {
        ResponseDeliverTx::default()
    }

    fn end_block(&mut self, _req: RequestEndBlock) -> ResponseEndBlock {
        ResponseEndBlock::default()
    }

    fn commit(&mut self) -> ResponseCommit {
        ResponseCommit::default()
    }

    fn check_tx(&mut self, _tx: &Tx) -> ResponseCheckTx {
        ResponseCheckTx::default()
    }

    fn query(&mut self, _req: RequestQuery) -> ResponseQuery {
        ResponseQuery::default()
    }
}

/// Consensus connection: the sole driver of application state transitions,
/// strictly ordered BeginBlock, DeliverTx*, EndBlock, Commit.
#[derive(Clone)]
pub struct AppConnConsensus {
    client: AppClient,
}

impl AppConnConsensus {
    pub fn new(client: AppClient) -> Self {
        Self { client }
    }

    pub fn set_response_callback(&self, cb: ResponseCallback) {
        self.client.set_response_callback(cb);
    }

    pub fn error(&self) -> Option<AppConnError> {
        self.client.error()
    }

    pub fn init_chain_sync(&self, req: RequestInitChain) -> Result<ResponseInitChain, AppConnError> {
        match self.client.call_sync(Request::InitChain(req))? {
            Response::InitChain(r) => Ok(r),
            other => Err(unexpected("init_chain", &other)),
        }
    }

    pub fn begin_block_sync(&self, req: RequestBeginBlock) -> Result<ResponseBeginBlock, AppConnError> {
        match self.client.call_sync(Request::BeginBlock(req))? {
            Response::BeginBlock(r) => Ok(r),
            other => Err(unexpected("begin_block", &other)),
        }
    }

    pub fn deliver_tx_async(&self, tx: Tx) -> Result<ReqRes, AppConnError> {
        self.client.call_async(Request::DeliverTx(tx))
    }

    pub fn end_block_sync(&self, req: RequestEndBlock) -> Result<ResponseEndBlock, AppConnError> {
        match self.client.call_sync(Request::EndBlock(req))? {
            Response::EndBlock(r) => Ok(r),
            other => Err(unexpected("end_block", &other)),
        }
    }

    pub fn commit_sync(&self) -> Result<ResponseCommit, AppConnError> {
        match self.client.call_sync(Request::Commit)? {
            Response::Commit(r) => Ok(r),
            other => Err(unexpected("commit", &other)),
        }
    }

    pub fn flush(&self) -> Result<(), AppConnError> {
        self.client.flush()
    }
}

/// Mempool connection: carries CheckTx only.
#[derive(Clone)]
pub struct AppConnMempool {
    client: AppClient,
}

impl AppConnMempool {
    pub fn new(client: AppClient) -> Self {
        Self { client }
    }

    pub fn set_response_callback(&self, cb: ResponseCallback) {
        self.client.set_response_callback(cb);
    }

    pub fn error(&self) -> Option<AppConnError> {
        self.client.error()
    }

    pub fn check_tx_async(&self, tx: Tx) -> Result<ReqRes, AppConnError> {
        self.client.call_async(Request::CheckTx(tx))
    }

    pub fn flush(&self) -> Result<(), AppConnError> {
        self.client.flush()
    }
}

/// Query connection: Info and Query.
#[derive(Clone)]
pub struct AppConnQuery {
    client: AppClient,
}

impl AppConnQuery {
    pub fn new(client: AppClient) -> Self {
        Self { client }
    }

    pub fn error(&self) -> Option<AppConnError> {
        self.client.error()
    }

    pub fn info_sync(&self, req: RequestInfo) -> Result<ResponseInfo, AppConnError> {
        match self.client.call_sync(Request::Info(req))? {
            Response::Info(r) => Ok(r),
            other => Err(unexpected("info", &other)),
        }
    }

    pub fn query_sync(&self, req: RequestQuery) -> Result<ResponseQuery, AppConnError> {
        match self.client.call_sync(Request::Query(req))? {
            Response::Query(r) => Ok(r),
            other => Err(unexpected("query", &other)),
        }
    }
}

/// Snapshot connection. Reserved: the app surface defines no snapshot
/// requests yet, but the channel exists so state sync can attach without a
/// protocol change.
#[derive(Clone)]
pub struct AppConnSnapshot {
    client: AppClient,
}

impl AppConnSnapshot {
    pub fn new(client: AppClient) -> Self {
        Self { client }
    }

    pub fn error(&self) -> Option<AppConnError> {
        self.client.error()
    }

    pub fn flush(&self) -> Result<(), AppConnError> {
        self.client.flush()
    }
}

/// The four logically independent connections to one application.
#[derive(Clone)]
pub struct AppConns {
    consensus: AppConnConsensus,
    mempool: AppConnMempool,
    query: AppConnQuery,
    snapshot: AppConnSnapshot,
}

impl AppConns {
    pub fn new(app: Arc<Mutex<dyn Application>>) -> Self {
        Self {
            consensus: AppConnConsensus::new(AppClient::new(Arc::clone(&app))),
            mempool: AppConnMempool::new(AppClient::new(Arc::clone(&app))),
            query: AppConnQuery::new(AppClient::new(Arc::clone(&app))),
            snapshot: AppConnSnapshot::new(AppClient::new(app)),
        }
    }

    pub fn consensus(&self) -> &AppConnConsensus {
        &self.consensus
    }

    pub fn mempool(&self) -> &AppConnMempool {
        &self.mempool
    }

    pub fn query(&self) -> &AppConnQuery {
        &self.query
    }

    pub fn snapshot(&self) -> &AppConnSnapshot {
        &self.snapshot
    }
}

fn unexpected(expected: &'static str, got: &Response) -> AppConnError {
    AppConnError::UnexpectedResponse {
        expected,
        got: got.kind(),
    }
}
