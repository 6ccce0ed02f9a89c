use serde::{Deserialize, Serialize};

use crate::crypto::hash::sha256;
use crate::types::Hash;

/// An opaque transaction: arbitrary bytes the application interprets.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Tx(pub Vec<u8>);

impl Tx {
    pub fn hash(&self) -> Hash {
        sha256(&self.0)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Size of the tx as it appears inside an encoded block:
    /// a varint length prefix followed by the raw bytes.
    pub fn encoded_size(&self) -> usize {
        uvarint_len(self.0.len() as u64) + self.0.len()
    }
}

impl From<Vec<u8>> for Tx {
    fn from(bytes: Vec<u8>) -> Self {
        Tx(bytes)
    }
}

impl From<&[u8]> for Tx {
    fn from(bytes: &[u8]) -> Self {
        Tx(bytes.to_vec())
    }
}

/// Number of bytes the unsigned varint encoding of `v` occupies.
pub fn uvarint_len(v: u64) -> usize {
    let mut n = 1;
    let mut v = v;
    while v >= 0x80 {
        v >>= 7;
        n += 1;
    }
    n
}

/// Per-transaction execution result, paired with its block position.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TxResult {
    pub height: u64,
    pub index: u32,
    pub tx: Tx,
    pub result: crate::app::messages::ResponseDeliverTx,
}
