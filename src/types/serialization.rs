use crate::types::{
    block::{Block, BlockHeader, BlockId, CommitInfo, Evidence, PartSetHeader},
    hash::Hash,
    transaction::Tx,
    Address,
};

#[derive(thiserror::Error, Debug)]
pub enum CodecError {
    #[error("unexpected eof")]
    Eof,
    #[error("invalid data: {0}")]
    Invalid(&'static str),
    #[error("bad json sub-record: {0}")]
    Json(#[from] serde_json::Error),
}

pub struct Encoder {
    buf: Vec<u8>,
}

impl Encoder {
    pub fn new() -> Self {
        Self { buf: Vec::new() }
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }

    pub fn put_u32(&mut self, v: u32) {
        self.buf.extend_from_slice(&v.to_be_bytes());
    }

    pub fn put_u64(&mut self, v: u64) {
        self.buf.extend_from_slice(&v.to_be_bytes());
    }

    pub fn put_uvarint(&mut self, mut v: u64) {
        while v >= 0x80 {
            self.buf.push((v as u8) | 0x80);
            v >>= 7;
        }
        self.buf.push(v as u8);
    }

    pub fn put_bytes20(&mut self, v: &[u8; 20]) {
        self.buf.extend_from_slice(v);
    }

    pub fn put_bytes32(&mut self, v: &[u8; 32]) {
        self.buf.extend_from_slice(v);
    }

    pub fn put_vec(&mut self, data: &[u8]) {
        self.put_u32(data.len() as u32);
        self.buf.extend_from_slice(data);
    }

    /// Varint-length-prefixed bytes; this framing defines `Tx::encoded_size`.
    pub fn put_tx(&mut self, tx: &Tx) {
        self.put_uvarint(tx.0.len() as u64);
        self.buf.extend_from_slice(&tx.0);
    }
}

pub struct Decoder<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Decoder<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], CodecError> {
        if self.pos + n > self.data.len() {
            return Err(CodecError::Eof);
        }
        let out = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Ok(out)
    }

    pub fn get_u32(&mut self) -> Result<u32, CodecError> {
        let b = self.take(4)?;
        Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    pub fn get_u64(&mut self) -> Result<u64, CodecError> {
        let b = self.take(8)?;
        Ok(u64::from_be_bytes([
            b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7],
        ]))
    }

    pub fn get_uvarint(&mut self) -> Result<u64, CodecError> {
        let mut out: u64 = 0;
        let mut shift = 0;
        loop {
            let b = self.take(1)?[0];
            if shift >= 64 {
                return Err(CodecError::Invalid("varint overflow"));
            }
            out |= u64::from(b & 0x7f) << shift;
            if b & 0x80 == 0 {
                return Ok(out);
            }
            shift += 7;
        }
    }

    pub fn get_bytes20(&mut self) -> Result<[u8; 20], CodecError> {
        let b = self.take(20)?;
        let mut out = [0u8; 20];
        out.copy_from_slice(b);
        Ok(out)
    }

    pub fn get_bytes32(&mut self) -> Result<[u8; 32], CodecError> {
        let b = self.take(32)?;
        let mut out = [0u8; 32];
        out.copy_from_slice(b);
        Ok(out)
    }

    pub fn get_vec(&mut self) -> Result<Vec<u8>, CodecError> {
        let n = self.get_u32()? as usize;
        let b = self.take(n)?;
        Ok(b.to_vec())
    }

    pub fn get_tx(&mut self) -> Result<Tx, CodecError> {
        let n = self.get_uvarint()? as usize;
        let b = self.take(n)?;
        Ok(Tx(b.to_vec()))
    }
}

// ---- Block ----

pub fn encode_block(b: &Block) -> Result<Vec<u8>, CodecError> {
    let mut e = Encoder::new();
    e.put_vec(&encode_block_header(&b.header));

    e.put_u32(b.txs.len() as u32);
    for tx in &b.txs {
        e.put_tx(tx);
    }

    // commit and evidence are low-volume; a json sub-record keeps the codec
    // small without freezing their layout into the binary format
    e.put_vec(&serde_json::to_vec(&b.last_commit)?);
    e.put_vec(&serde_json::to_vec(&b.evidence)?);
    Ok(e.into_bytes())
}

pub fn decode_block(data: &[u8]) -> Result<Block, CodecError> {
    let mut d = Decoder::new(data);

    let header_bytes = d.get_vec()?;
    let header = decode_block_header(&header_bytes)?;

    let n = d.get_u32()? as usize;
    let mut txs = Vec::with_capacity(n);
    for _ in 0..n {
        txs.push(d.get_tx()?);
    }

    let last_commit: CommitInfo = serde_json::from_slice(&d.get_vec()?)?;
    let evidence: Vec<Evidence> = serde_json::from_slice(&d.get_vec()?)?;

    Ok(Block { header, txs, last_commit, evidence })
}

// ---- BlockHeader ----

pub fn encode_block_header(h: &BlockHeader) -> Vec<u8> {
    let mut e = Encoder::new();
    e.put_vec(h.chain_id.as_bytes());
    e.put_u64(h.height);
    e.put_u64(h.time_ms);
    e.put_u64(h.num_txs);
    e.put_u64(h.total_txs);
    encode_block_id(&mut e, &h.last_block_id);
    e.put_bytes32(&h.last_commit_hash.0);
    e.put_bytes32(&h.data_hash.0);
    e.put_bytes32(&h.validators_hash.0);
    e.put_bytes32(&h.next_validators_hash.0);
    e.put_bytes32(&h.consensus_hash.0);
    e.put_vec(&h.app_hash);
    e.put_bytes32(&h.last_results_hash.0);
    e.put_bytes32(&h.evidence_hash.0);
    e.put_bytes20(&h.proposer_address.0);
    e.into_bytes()
}

pub fn decode_block_header(data: &[u8]) -> Result<BlockHeader, CodecError> {
    let mut d = Decoder::new(data);
    let chain_id = String::from_utf8(d.get_vec()?)
        .map_err(|_| CodecError::Invalid("chain_id is not utf-8"))?;
    Ok(BlockHeader {
        chain_id,
        height: d.get_u64()?,
        time_ms: d.get_u64()?,
        num_txs: d.get_u64()?,
        total_txs: d.get_u64()?,
        last_block_id: decode_block_id(&mut d)?,
        last_commit_hash: Hash(d.get_bytes32()?),
        data_hash: Hash(d.get_bytes32()?),
        validators_hash: Hash(d.get_bytes32()?),
        next_validators_hash: Hash(d.get_bytes32()?),
        consensus_hash: Hash(d.get_bytes32()?),
        app_hash: d.get_vec()?,
        last_results_hash: Hash(d.get_bytes32()?),
        evidence_hash: Hash(d.get_bytes32()?),
        proposer_address: Address(d.get_bytes20()?),
    })
}

fn encode_block_id(e: &mut Encoder, id: &BlockId) {
    e.put_bytes32(&id.hash.0);
    e.put_u32(id.parts.total);
    e.put_bytes32(&id.parts.hash.0);
}

fn decode_block_id(d: &mut Decoder<'_>) -> Result<BlockId, CodecError> {
    Ok(BlockId {
        hash: Hash(d.get_bytes32()?),
        parts: PartSetHeader {
            total: d.get_u32()?,
            hash: Hash(d.get_bytes32()?),
        },
    })
}
