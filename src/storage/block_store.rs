use std::path::Path;

use rocksdb::{ColumnFamilyDescriptor, Options, DB};
use serde::{Deserialize, Serialize};

use crate::types::serialization::{decode_block, encode_block};
use crate::types::{Block, BlockHeader, BlockId, CommitInfo};

use super::StoreError;

const CF_BLOCKS: &str = "blocks"; // key: height (u64 BE) -> encoded Block
const CF_BLOCK_META: &str = "block_meta"; // key: height (u64 BE) -> JSON BlockMeta
const CF_SEEN_COMMITS: &str = "seen_commits"; // key: height (u64 BE) -> JSON CommitInfo
const CF_META: &str = "meta"; // key: "last_height" -> u64 BE

fn height_key(h: u64) -> [u8; 8] {
    h.to_be_bytes()
}

/// Header and identity of a stored block, loadable without the block body.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BlockMeta {
    pub block_id: BlockId,
    pub header: BlockHeader,
}

/// Append-only store of finalized blocks, addressable by height.
pub struct BlockStore {
    db: DB,
}

impl BlockStore {
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let cfs = vec![
            ColumnFamilyDescriptor::new(CF_BLOCKS, Options::default()),
            ColumnFamilyDescriptor::new(CF_BLOCK_META, Options::default()),
            ColumnFamilyDescriptor::new(CF_SEEN_COMMITS, Options::default()),
            ColumnFamilyDescriptor::new(CF_META, Options::default()),
        ];

        let db = DB::open_cf_descriptors(&opts, path, cfs)?;
        Ok(Self { db })
    }

    /// Persist a finalized block with its identity and the +2/3 commit seen
    /// for it. Atomic; saving the same (height, block) twice is harmless.
    pub fn save_block(
        &self,
        block: &Block,
        block_id: &BlockId,
        seen_commit: &CommitInfo,
    ) -> Result<(), StoreError> {
        let height = block.header.height;
        let key = height_key(height);

        let block_bytes = encode_block(block)?;
        let meta = BlockMeta {
            block_id: *block_id,
            header: block.header.clone(),
        };

        let cf_blocks = self.db.cf_handle(CF_BLOCKS).unwrap();
        let cf_meta = self.db.cf_handle(CF_BLOCK_META).unwrap();
        let cf_sc = self.db.cf_handle(CF_SEEN_COMMITS).unwrap();
        let cf_last = self.db.cf_handle(CF_META).unwrap();

        let mut batch = rocksdb::WriteBatch::default();
        batch.put_cf(&cf_blocks, key, &block_bytes);
        batch.put_cf(&cf_meta, key, serde_json::to_vec(&meta)?);
        batch.put_cf(&cf_sc, key, serde_json::to_vec(seen_commit)?);
        if height > self.height()? {
            batch.put_cf(&cf_last, b"last_height", key);
        }

        self.db.write(batch)?;
        Ok(())
    }

    /// Height of the newest stored block, 0 when empty.
    pub fn height(&self) -> Result<u64, StoreError> {
        let cf = self.db.cf_handle(CF_META).unwrap();
        match self.db.get_cf(&cf, b"last_height")? {
            Some(bytes) if bytes.len() == 8 => Ok(u64::from_be_bytes([
                bytes[0], bytes[1], bytes[2], bytes[3], bytes[4], bytes[5], bytes[6], bytes[7],
            ])),
            _ => Ok(0),
        }
    }

    /// Load a block by height. `None` when the height is 0 or past the store.
    pub fn load_block(&self, height: u64) -> Result<Option<Block>, StoreError> {
        if height == 0 {
            return Ok(None);
        }
        let cf = self.db.cf_handle(CF_BLOCKS).unwrap();
        match self.db.get_cf(&cf, height_key(height))? {
            None => Ok(None),
            Some(bytes) => Ok(Some(decode_block(&bytes)?)),
        }
    }

    pub fn load_block_meta(&self, height: u64) -> Result<Option<BlockMeta>, StoreError> {
        if height == 0 {
            return Ok(None);
        }
        let cf = self.db.cf_handle(CF_BLOCK_META).unwrap();
        match self.db.get_cf(&cf, height_key(height))? {
            None => Ok(None),
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
        }
    }

    pub fn load_seen_commit(&self, height: u64) -> Result<Option<CommitInfo>, StoreError> {
        let cf = self.db.cf_handle(CF_SEEN_COMMITS).unwrap();
        match self.db.get_cf(&cf, height_key(height))? {
            None => Ok(None),
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
        }
    }
}
