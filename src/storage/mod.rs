pub mod block_store;
pub mod state_store;
pub mod wal;

pub use block_store::{BlockMeta, BlockStore};
pub use state_store::StateStore;
pub use wal::{
    RoundStateInfo, TimedWalMessage, TimeoutInfo, WalDecoder, WalError, WalGroup, WalMessage,
    WalReader, WalSearchOptions,
};

#[derive(thiserror::Error, Debug)]
pub enum StoreError {
    #[error("db error: {0}")]
    Db(#[from] rocksdb::Error),
    #[error("codec error: {0}")]
    Codec(#[from] crate::types::serialization::CodecError),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}
