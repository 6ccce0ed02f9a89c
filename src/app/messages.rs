use serde::{Deserialize, Serialize};

use crate::types::{Address, BlockHeader, Hash, ParamUpdates, Tx, ValidatorUpdate};

/// Response code meaning success; any other code marks the tx invalid
/// without aborting the block.
pub const CODE_TYPE_OK: u32 = 0;

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct RequestInfo {
    pub version: String,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ResponseInfo {
    pub data: String,
    pub version: String,
    /// Signed so a misbehaving application reporting a negative height can
    /// be rejected during handshake.
    pub last_block_height: i64,
    pub last_block_app_hash: Vec<u8>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct RequestInitChain {
    pub validators: Vec<ValidatorUpdate>,
    pub app_state_bytes: Vec<u8>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ResponseInitChain {}

/// Evidence of misbehavior handed to the app at BeginBlock.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EvidenceInfo {
    pub address: Address,
    pub height: u64,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct RequestBeginBlock {
    pub hash: Hash,
    pub header: BlockHeader,
    /// Indices into the validator set that signed the previous block whose
    /// precommits are missing from this block's last commit.
    pub absent_validators: Vec<u32>,
    pub byzantine_validators: Vec<EvidenceInfo>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ResponseBeginBlock {
    pub tags: Vec<KvPair>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KvPair {
    pub key: Vec<u8>,
    pub value: Vec<u8>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponseDeliverTx {
    pub code: u32,
    pub data: Vec<u8>,
    pub log: String,
    pub gas_wanted: i64,
    pub gas_used: i64,
    pub tags: Vec<KvPair>,
}

impl ResponseDeliverTx {
    pub fn is_ok(&self) -> bool {
        self.code == CODE_TYPE_OK
    }

    /// Deterministic encoding used for the last-results Merkle root.
    pub fn result_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(4 + self.data.len());
        buf.extend_from_slice(&self.code.to_be_bytes());
        buf.extend_from_slice(&self.data);
        buf
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct RequestEndBlock {
    pub height: u64,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ResponseEndBlock {
    pub validator_updates: Vec<ValidatorUpdate>,
    pub consensus_param_updates: Option<ParamUpdates>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ResponseCommit {
    pub data: Vec<u8>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponseCheckTx {
    pub code: u32,
    pub data: Vec<u8>,
    pub log: String,
    pub gas_wanted: i64,
}

impl ResponseCheckTx {
    pub fn is_ok(&self) -> bool {
        self.code == CODE_TYPE_OK
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct RequestQuery {
    pub path: String,
    pub data: Vec<u8>,
    pub height: u64,
    pub prove: bool,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ResponseQuery {
    pub code: u32,
    pub key: Vec<u8>,
    pub value: Vec<u8>,
    pub height: u64,
    pub log: String,
    pub proof: Option<Vec<u8>>,
}

/// One request on an app connection.
#[derive(Clone, Debug)]
pub enum Request {
    Info(RequestInfo),
    InitChain(RequestInitChain),
    BeginBlock(RequestBeginBlock),
    DeliverTx(Tx),
    EndBlock(RequestEndBlock),
    Commit,
    CheckTx(Tx),
    Query(RequestQuery),
}

impl Request {
    pub fn kind(&self) -> &'static str {
        match self {
            Request::Info(_) => "info",
            Request::InitChain(_) => "init_chain",
            Request::BeginBlock(_) => "begin_block",
            Request::DeliverTx(_) => "deliver_tx",
            Request::EndBlock(_) => "end_block",
            Request::Commit => "commit",
            Request::CheckTx(_) => "check_tx",
            Request::Query(_) => "query",
        }
    }
}

#[derive(Clone, Debug)]
pub enum Response {
    Info(ResponseInfo),
    InitChain(ResponseInitChain),
    BeginBlock(ResponseBeginBlock),
    DeliverTx(ResponseDeliverTx),
    EndBlock(ResponseEndBlock),
    Commit(ResponseCommit),
    CheckTx(ResponseCheckTx),
    Query(ResponseQuery),
}

impl Response {
    pub fn kind(&self) -> &'static str {
        match self {
            Response::Info(_) => "info",
            Response::InitChain(_) => "init_chain",
            Response::BeginBlock(_) => "begin_block",
            Response::DeliverTx(_) => "deliver_tx",
            Response::EndBlock(_) => "end_block",
            Response::Commit(_) => "commit",
            Response::CheckTx(_) => "check_tx",
            Response::Query(_) => "query",
        }
    }
}
