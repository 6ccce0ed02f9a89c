use serde::{Deserialize, Serialize};

use crate::crypto::hash::sha256;
use crate::types::Hash;

/// Ceiling for `block_size.max_bytes`; no sane chain exceeds this.
pub const MAX_BLOCK_SIZE_BYTES: i64 = 100 * 1024 * 1024;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockSizeParams {
    pub max_bytes: i64,
    /// -1 means unlimited.
    pub max_gas: i64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvidenceParams {
    /// Evidence older than this many blocks is rejected.
    pub max_age: u64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsensusParams {
    pub block_size: BlockSizeParams,
    pub evidence: EvidenceParams,
}

/// Partial update to the consensus params, as reported by the application
/// at EndBlock. Absent fields keep their current value.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParamUpdates {
    pub block_size: Option<BlockSizeParams>,
    pub evidence: Option<EvidenceParams>,
}

#[derive(thiserror::Error, Debug)]
pub enum ParamsError {
    #[error("block_size.max_bytes must be in (0, {MAX_BLOCK_SIZE_BYTES}], got {0}")]
    BadMaxBytes(i64),
    #[error("block_size.max_gas must be >= -1, got {0}")]
    BadMaxGas(i64),
    #[error("evidence.max_age must be positive")]
    BadEvidenceMaxAge,
}

impl Default for ConsensusParams {
    fn default() -> Self {
        Self {
            block_size: BlockSizeParams {
                max_bytes: 22_020_096, // 21 MiB
                max_gas: -1,
            },
            evidence: EvidenceParams { max_age: 100_000 },
        }
    }
}

impl ConsensusParams {
    pub fn validate(&self) -> Result<(), ParamsError> {
        if self.block_size.max_bytes <= 0 || self.block_size.max_bytes > MAX_BLOCK_SIZE_BYTES {
            return Err(ParamsError::BadMaxBytes(self.block_size.max_bytes));
        }
        if self.block_size.max_gas < -1 {
            return Err(ParamsError::BadMaxGas(self.block_size.max_gas));
        }
        if self.evidence.max_age == 0 {
            return Err(ParamsError::BadEvidenceMaxAge);
        }
        Ok(())
    }

    /// Return a copy with the given updates folded in. Does not validate.
    pub fn update(&self, updates: Option<&ParamUpdates>) -> ConsensusParams {
        let mut next = *self;
        if let Some(u) = updates {
            if let Some(bs) = u.block_size {
                next.block_size = bs;
            }
            if let Some(ev) = u.evidence {
                next.evidence = ev;
            }
        }
        next
    }

    pub fn hash(&self) -> Hash {
        let mut buf = Vec::with_capacity(24);
        buf.extend_from_slice(&self.block_size.max_bytes.to_be_bytes());
        buf.extend_from_slice(&self.block_size.max_gas.to_be_bytes());
        buf.extend_from_slice(&self.evidence.max_age.to_be_bytes());
        sha256(&buf)
    }
}
