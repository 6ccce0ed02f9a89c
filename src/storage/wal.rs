use std::fs::{File, OpenOptions};
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// Largest payload the decoder will accept. Anything bigger is treated as a
/// corrupt length prefix rather than an allocation request.
const MAX_WAL_MSG_SIZE: u32 = 10 * 1024 * 1024;

const HEAD_NAME: &str = "wal";

#[derive(thiserror::Error, Debug)]
pub enum WalError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("wal data corrupted: {0}")]
    Corrupt(String),
    #[error("unknown wal message kind: {0}")]
    UnknownMessage(String),
    #[error("malformed wal message: {0}")]
    Malformed(#[from] serde_json::Error),
}

impl WalError {
    pub fn is_corruption(&self) -> bool {
        matches!(self, WalError::Corrupt(_))
    }
}

/// Step of the consensus state machine a replayed round-state record refers
/// to. Opaque to the WAL; the consensus layer names its own steps.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoundStateInfo {
    pub height: u64,
    pub round: u32,
    pub step: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeoutInfo {
    pub duration_ms: u64,
    pub height: u64,
    pub round: u32,
    pub step: String,
}

/// A consensus message as logged. Peer messages stay opaque bytes; the
/// consensus layer owns their encoding.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value")]
pub enum WalMessage {
    #[serde(rename = "end_height")]
    EndHeight { height: u64 },
    #[serde(rename = "round_state")]
    RoundState(RoundStateInfo),
    #[serde(rename = "msg_info")]
    MsgInfo { peer_id: String, msg: Vec<u8> },
    #[serde(rename = "timeout")]
    Timeout(TimeoutInfo),
}

const KNOWN_KINDS: [&str; 4] = ["end_height", "round_state", "msg_info", "timeout"];

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimedWalMessage {
    pub time_ms: u64,
    pub msg: WalMessage,
}

#[derive(Clone, Copy, Debug, Default)]
pub struct WalSearchOptions {
    /// Skip records whose checksum fails instead of propagating the error.
    pub ignore_data_corruption_errors: bool,
}

/// Encode one record: length, crc32c of the payload, payload.
fn encode_record(msg: &TimedWalMessage) -> Result<Vec<u8>, WalError> {
    let payload = serde_json::to_vec(msg)?;
    let mut buf = Vec::with_capacity(8 + payload.len());
    buf.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    buf.extend_from_slice(&crc32c::crc32c(&payload).to_le_bytes());
    buf.extend_from_slice(&payload);
    Ok(buf)
}

fn decode_payload(payload: &[u8]) -> Result<TimedWalMessage, WalError> {
    let value: serde_json::Value = serde_json::from_slice(payload)?;
    let kind = value
        .get("msg")
        .and_then(|m| m.get("type"))
        .and_then(|t| t.as_str())
        .unwrap_or("");
    if !KNOWN_KINDS.contains(&kind) {
        return Err(WalError::UnknownMessage(kind.to_string()));
    }
    Ok(serde_json::from_value(value)?)
}

/// Streaming decoder over one reader. `decode` returns `Ok(None)` at a clean
/// end of stream.
pub struct WalDecoder<R: Read> {
    r: R,
}

impl<R: Read> WalDecoder<R> {
    pub fn new(r: R) -> Self {
        Self { r }
    }

    pub fn decode(&mut self) -> Result<Option<TimedWalMessage>, WalError> {
        let mut len_buf = [0u8; 4];
        if !read_exact_or_eof(&mut self.r, &mut len_buf)? {
            return Ok(None);
        }
        let len = u32::from_le_bytes(len_buf);
        if len == 0 || len > MAX_WAL_MSG_SIZE {
            return Err(WalError::Corrupt(format!("record length {}", len)));
        }

        let mut crc_buf = [0u8; 4];
        self.r.read_exact(&mut crc_buf).map_err(map_truncation)?;
        let expected_crc = u32::from_le_bytes(crc_buf);

        let mut payload = vec![0u8; len as usize];
        self.r.read_exact(&mut payload).map_err(map_truncation)?;

        let actual_crc = crc32c::crc32c(&payload);
        if actual_crc != expected_crc {
            return Err(WalError::Corrupt(format!(
                "crc mismatch: expected {:08x}, got {:08x}",
                expected_crc, actual_crc
            )));
        }

        decode_payload(&payload).map(Some)
    }
}

/// A record cut short by a crash during write reads as corruption, not as a
/// plain io error, so tolerant readers can skip it.
fn map_truncation(e: std::io::Error) -> WalError {
    if e.kind() == std::io::ErrorKind::UnexpectedEof {
        WalError::Corrupt("truncated record".to_string())
    } else {
        WalError::Io(e)
    }
}

/// True if the buffer was filled, false on EOF at the record boundary.
fn read_exact_or_eof<R: Read>(r: &mut R, buf: &mut [u8]) -> Result<bool, WalError> {
    let mut filled = 0;
    while filled < buf.len() {
        let n = r.read(&mut buf[filled..])?;
        if n == 0 {
            if filled == 0 {
                return Ok(false);
            }
            return Err(WalError::Corrupt("truncated record header".to_string()));
        }
        filled += n;
    }
    Ok(true)
}

/// Reader positioned inside the group; continues across file boundaries.
pub struct WalReader {
    current: Option<WalDecoder<BufReader<File>>>,
    remaining: Vec<PathBuf>, // newest last; popped from the front via reverse
}

impl WalReader {
    fn new(current: WalDecoder<BufReader<File>>, mut remaining: Vec<PathBuf>) -> Self {
        remaining.reverse();
        Self { current: Some(current), remaining }
    }

    pub fn decode(&mut self) -> Result<Option<TimedWalMessage>, WalError> {
        loop {
            let dec = match self.current.as_mut() {
                None => return Ok(None),
                Some(dec) => dec,
            };
            match dec.decode()? {
                Some(msg) => return Ok(Some(msg)),
                None => match self.remaining.pop() {
                    None => {
                        self.current = None;
                        return Ok(None);
                    }
                    Some(path) => {
                        self.current = Some(WalDecoder::new(BufReader::new(File::open(path)?)));
                    }
                },
            }
        }
    }
}

/// Size-rotated write-ahead log of consensus messages.
///
/// Records land in a head file; once the head passes `max_file_size` it is
/// rolled to `wal.NNN` and a fresh head is started. An end-height record is
/// written right after the block at that height is committed and serves as
/// the seek anchor for catchup replay.
pub struct WalGroup {
    dir: PathBuf,
    max_file_size: u64,
    head: BufWriter<File>,
    head_size: u64,
    next_index: u64,
}

impl WalGroup {
    pub fn open(dir: &Path, max_file_size: u64) -> Result<Self, WalError> {
        std::fs::create_dir_all(dir)?;

        let head_path = dir.join(HEAD_NAME);
        let file = OpenOptions::new().create(true).append(true).open(&head_path)?;
        let head_size = file.metadata()?.len();

        let rolled = rolled_files(dir)?;
        let next_index = rolled.last().map(|(i, _)| i + 1).unwrap_or(0);

        let mut group = Self {
            dir: dir.to_path_buf(),
            max_file_size,
            head: BufWriter::new(file),
            head_size,
            next_index,
        };

        // a fresh log gets an initial marker so catchup for height 1 has an
        // anchor to seek past
        if head_size == 0 && rolled.is_empty() {
            group.write_end_height(0)?;
        }

        Ok(group)
    }

    pub fn write(&mut self, msg: WalMessage) -> Result<(), WalError> {
        let timed = TimedWalMessage { time_ms: now_ms(), msg };
        let record = encode_record(&timed)?;
        self.head.write_all(&record)?;
        self.head_size += record.len() as u64;
        if self.head_size > self.max_file_size {
            self.rotate()?;
        }
        Ok(())
    }

    /// Log the end-height marker for `height` and force it to disk. Written
    /// immediately after the block at that height is committed.
    pub fn write_end_height(&mut self, height: u64) -> Result<(), WalError> {
        self.write(WalMessage::EndHeight { height })?;
        self.flush()?;
        debug!(height, "wrote wal end-height marker");
        Ok(())
    }

    pub fn flush(&mut self) -> Result<(), WalError> {
        self.head.flush()?;
        self.head.get_ref().sync_data()?;
        Ok(())
    }

    fn rotate(&mut self) -> Result<(), WalError> {
        self.head.flush()?;
        let rolled_path = self.dir.join(format!("{}.{:03}", HEAD_NAME, self.next_index));
        std::fs::rename(self.dir.join(HEAD_NAME), &rolled_path)?;
        self.next_index += 1;

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.dir.join(HEAD_NAME))?;
        self.head = BufWriter::new(file);
        self.head_size = 0;
        info!(rolled = %rolled_path.display(), "rotated wal head");
        Ok(())
    }

    /// All group files, oldest first, head last.
    pub fn files(&self) -> Result<Vec<PathBuf>, WalError> {
        let mut files: Vec<PathBuf> = rolled_files(&self.dir)?
            .into_iter()
            .map(|(_, p)| p)
            .collect();
        let head = self.dir.join(HEAD_NAME);
        if head.exists() {
            files.push(head);
        }
        Ok(files)
    }

    /// Seek to the record immediately following the end-height marker for
    /// `height`. Returns `None` when no such marker exists.
    pub fn search_for_end_height(
        &self,
        height: u64,
        options: &WalSearchOptions,
    ) -> Result<Option<WalReader>, WalError> {
        let files = self.files()?;

        for (file_idx, path) in files.iter().enumerate() {
            let mut dec = WalDecoder::new(BufReader::new(File::open(path)?));
            loop {
                match dec.decode() {
                    Ok(None) => break,
                    Ok(Some(TimedWalMessage {
                        msg: WalMessage::EndHeight { height: h },
                        ..
                    })) if h == height => {
                        let remaining = files[file_idx + 1..].to_vec();
                        return Ok(Some(WalReader::new(dec, remaining)));
                    }
                    Ok(Some(_)) => {}
                    Err(e) if e.is_corruption() && options.ignore_data_corruption_errors => {
                        // framing is unreliable past a bad checksum; skip the
                        // rest of this file
                        debug!(file = %path.display(), error = %e, "skipping corrupt wal file tail");
                        break;
                    }
                    Err(e) => return Err(e),
                }
            }
        }

        Ok(None)
    }
}

fn rolled_files(dir: &Path) -> Result<Vec<(u64, PathBuf)>, WalError> {
    let mut out = Vec::new();
    if !dir.exists() {
        return Ok(out);
    }
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name();
        let name = name.to_string_lossy();
        if let Some(suffix) = name.strip_prefix("wal.") {
            if let Ok(index) = suffix.parse::<u64>() {
                out.push((index, entry.path()));
            }
        }
    }
    out.sort_by_key(|(i, _)| *i);
    Ok(out)
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
