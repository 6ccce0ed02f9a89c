//! Consensus WAL tests: framing, corruption handling, end-height search,
//! rotation, and catchup replay.

use std::io::Write;

use crossbeam_channel::bounded;

use asura_core::consensus::{catchup_replay, HandshakeError, ReplaySink};
use asura_core::storage::{
    RoundStateInfo, TimeoutInfo, WalDecoder, WalError, WalGroup, WalMessage, WalSearchOptions,
};

#[derive(Default)]
struct RecordingSink {
    messages: Vec<(String, Vec<u8>)>,
    timeouts: Vec<TimeoutInfo>,
}

impl ReplaySink for RecordingSink {
    fn handle_message(&mut self, peer_id: &str, msg: &[u8]) {
        self.messages.push((peer_id.to_string(), msg.to_vec()));
    }

    fn handle_timeout(&mut self, info: &TimeoutInfo) {
        self.timeouts.push(info.clone());
    }
}

fn msg_info(peer: &str, payload: &[u8]) -> WalMessage {
    WalMessage::MsgInfo {
        peer_id: peer.to_string(),
        msg: payload.to_vec(),
    }
}

fn timeout(height: u64, round: u32) -> WalMessage {
    WalMessage::Timeout(TimeoutInfo {
        duration_ms: 1000,
        height,
        round,
        step: "propose".to_string(),
    })
}

#[test]
fn test_write_and_read_back_in_order() {
    let dir = tempfile::tempdir().unwrap();
    let mut wal = WalGroup::open(dir.path(), 1 << 20).unwrap();

    wal.write(msg_info("peer-1", b"proposal")).unwrap();
    wal.write(timeout(1, 0)).unwrap();
    wal.flush().unwrap();

    // a fresh group starts with the end-height 0 anchor
    let mut reader = wal
        .search_for_end_height(0, &WalSearchOptions::default())
        .unwrap()
        .expect("anchor must exist");

    let first = reader.decode().unwrap().unwrap();
    assert_eq!(first.msg, msg_info("peer-1", b"proposal"));
    let second = reader.decode().unwrap().unwrap();
    assert_eq!(second.msg, timeout(1, 0));
    assert!(reader.decode().unwrap().is_none());
}

#[test]
fn test_search_positions_after_the_marker() {
    let dir = tempfile::tempdir().unwrap();
    let mut wal = WalGroup::open(dir.path(), 1 << 20).unwrap();

    wal.write(msg_info("", b"height-1-traffic")).unwrap();
    wal.write_end_height(1).unwrap();
    wal.write(msg_info("peer-2", b"height-2-traffic")).unwrap();
    wal.flush().unwrap();

    let mut reader = wal
        .search_for_end_height(1, &WalSearchOptions::default())
        .unwrap()
        .expect("marker for height 1 must be found");
    let msg = reader.decode().unwrap().unwrap();
    assert_eq!(msg.msg, msg_info("peer-2", b"height-2-traffic"));
    assert!(reader.decode().unwrap().is_none());

    assert!(
        wal.search_for_end_height(7, &WalSearchOptions::default())
            .unwrap()
            .is_none(),
        "absent marker must report not found"
    );
}

#[test]
fn test_rotation_keeps_older_records_searchable() {
    let dir = tempfile::tempdir().unwrap();
    // tiny head size: every few records roll the file
    let mut wal = WalGroup::open(dir.path(), 256).unwrap();

    for h in 1..=5u64 {
        wal.write(msg_info("peer", format!("traffic-{}", h).as_bytes()))
            .unwrap();
        wal.write_end_height(h).unwrap();
    }

    assert!(wal.files().unwrap().len() > 1, "head must have rotated");

    // a marker in a rolled file is still found, and reading continues
    // across the file boundary
    let mut reader = wal
        .search_for_end_height(3, &WalSearchOptions::default())
        .unwrap()
        .expect("marker in rolled file");
    let next = reader.decode().unwrap().unwrap();
    assert_eq!(next.msg, msg_info("peer", b"traffic-4"));
}

#[test]
fn test_corrupt_record_fails_decode() {
    let dir = tempfile::tempdir().unwrap();
    let mut wal = WalGroup::open(dir.path(), 1 << 20).unwrap();
    wal.write(msg_info("peer", b"will-be-corrupted")).unwrap();
    wal.flush().unwrap();

    // flip a byte well inside the payload of the last record
    let path = dir.path().join("wal");
    let mut bytes = std::fs::read(&path).unwrap();
    let len = bytes.len();
    bytes[len - 2] ^= 0xFF;
    std::fs::write(&path, &bytes).unwrap();

    let file = std::fs::File::open(&path).unwrap();
    let mut dec = WalDecoder::new(std::io::BufReader::new(file));
    // first record is the end-height anchor
    dec.decode().unwrap().unwrap();
    match dec.decode() {
        Err(WalError::Corrupt(_)) => {}
        other => panic!("expected Corrupt, got {:?}", other),
    }
}

#[test]
fn test_search_propagates_or_ignores_corruption() {
    let dir = tempfile::tempdir().unwrap();
    let mut wal = WalGroup::open(dir.path(), 1 << 20).unwrap();
    wal.write(msg_info("peer", b"early-record")).unwrap();
    wal.write_end_height(1).unwrap();

    // corrupt the early record, before the marker
    let path = dir.path().join("wal");
    let mut bytes = std::fs::read(&path).unwrap();
    // skip the anchor record, then damage the payload of the next one
    let mut dec_off = 0usize;
    let first_len = u32::from_le_bytes(bytes[0..4].try_into().unwrap()) as usize;
    dec_off += 8 + first_len;
    bytes[dec_off + 12] ^= 0xFF;
    std::fs::write(&path, &bytes).unwrap();

    match wal.search_for_end_height(1, &WalSearchOptions::default()) {
        Err(WalError::Corrupt(_)) => {}
        other => panic!("strict search must propagate corruption, got {:?}", other.map(|r| r.is_some())),
    }

    // the tolerant search skips the damaged tail of the file, losing the
    // marker that sits behind it
    let found = wal
        .search_for_end_height(
            1,
            &WalSearchOptions {
                ignore_data_corruption_errors: true,
            },
        )
        .unwrap();
    assert!(found.is_none());
}

#[test]
fn test_unknown_message_kind_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::create_dir_all(dir.path()).unwrap();
    let path = dir.path().join("wal");

    let payload = br#"{"time_ms":0,"msg":{"type":"hieroglyph","value":{}}}"#;
    let mut bytes = Vec::new();
    bytes.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    bytes.extend_from_slice(&crc32c::crc32c(payload).to_le_bytes());
    bytes.extend_from_slice(payload);
    std::fs::File::create(&path)
        .unwrap()
        .write_all(&bytes)
        .unwrap();

    let file = std::fs::File::open(&path).unwrap();
    let mut dec = WalDecoder::new(std::io::BufReader::new(file));
    match dec.decode() {
        Err(WalError::UnknownMessage(kind)) => assert_eq!(kind, "hieroglyph"),
        other => panic!("expected UnknownMessage, got {:?}", other),
    }
}

#[test]
fn test_catchup_replays_messages_after_last_commit() {
    let dir = tempfile::tempdir().unwrap();
    let mut wal = WalGroup::open(dir.path(), 1 << 20).unwrap();

    wal.write(msg_info("peer-a", b"old-vote")).unwrap();
    wal.write_end_height(1).unwrap();
    wal.write(msg_info("peer-b", b"proposal-h2")).unwrap();
    wal.write(timeout(2, 0)).unwrap();
    wal.write(msg_info("", b"own-vote-h2")).unwrap();
    wal.flush().unwrap();

    let mut sink = RecordingSink::default();
    let replayed = catchup_replay(&wal, 2, &mut sink, None).unwrap();

    assert_eq!(replayed, 3);
    assert_eq!(
        sink.messages,
        vec![
            ("peer-b".to_string(), b"proposal-h2".to_vec()),
            // an empty peer id marks a locally generated message
            ("local".to_string(), b"own-vote-h2".to_vec()),
        ]
    );
    assert_eq!(sink.timeouts.len(), 1);
    assert_eq!(sink.timeouts[0].height, 2);
}

#[test]
fn test_catchup_refuses_already_committed_height() {
    let dir = tempfile::tempdir().unwrap();
    let mut wal = WalGroup::open(dir.path(), 1 << 20).unwrap();
    for h in 1..=7u64 {
        wal.write_end_height(h).unwrap();
    }

    let mut sink = RecordingSink::default();
    match catchup_replay(&wal, 7, &mut sink, None) {
        Err(HandshakeError::EndHeightPresent(7)) => {}
        other => panic!("expected EndHeightPresent, got {:?}", other.err()),
    }
}

#[test]
fn test_catchup_requires_the_previous_marker() {
    let dir = tempfile::tempdir().unwrap();
    let wal = WalGroup::open(dir.path(), 1 << 20).unwrap();

    let mut sink = RecordingSink::default();
    match catchup_replay(&wal, 5, &mut sink, None) {
        Err(HandshakeError::EndHeightMissing(4)) => {}
        other => panic!("expected EndHeightMissing, got {:?}", other.err()),
    }
}

#[test]
fn test_catchup_cross_checks_round_state() {
    let dir = tempfile::tempdir().unwrap();
    let mut wal = WalGroup::open(dir.path(), 1 << 20).unwrap();

    let step = RoundStateInfo {
        height: 1,
        round: 0,
        step: "prevote".to_string(),
    };
    wal.write(WalMessage::RoundState(step.clone())).unwrap();
    wal.flush().unwrap();

    // the live state machine reports the same step: replay proceeds
    let (tx, rx) = bounded(1);
    tx.send(step.clone()).unwrap();
    let mut sink = RecordingSink::default();
    assert_eq!(catchup_replay(&wal, 1, &mut sink, Some(&rx)).unwrap(), 1);

    // a diverging step is fatal
    let (tx, rx) = bounded(1);
    tx.send(RoundStateInfo {
        height: 1,
        round: 3,
        step: "precommit".to_string(),
    })
    .unwrap();
    let mut sink = RecordingSink::default();
    match catchup_replay(&wal, 1, &mut sink, Some(&rx)) {
        Err(HandshakeError::RoundStateMismatch { .. }) => {}
        other => panic!("expected RoundStateMismatch, got {:?}", other.err()),
    }

    // no step within the deadline is fatal too
    let (_tx, rx) = bounded::<RoundStateInfo>(1);
    let mut sink = RecordingSink::default();
    match catchup_replay(&wal, 1, &mut sink, Some(&rx)) {
        Err(HandshakeError::RoundStateTimeout) => {}
        other => panic!("expected RoundStateTimeout, got {:?}", other.err()),
    }
}
