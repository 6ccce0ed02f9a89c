use std::sync::Mutex;

use tracing::{debug, info};

use crate::types::{Block, Evidence};

/// The executor's view of an evidence pool: committed blocks settle the
/// evidence they carry.
pub trait EvidencePool: Send + Sync {
    fn update(&self, block: &Block);
}

/// Pool that ignores everything. Used during handshake replay.
#[derive(Default)]
pub struct MockEvidencePool;

impl EvidencePool for MockEvidencePool {
    fn update(&self, _block: &Block) {}
}

/// Accumulates proofs of validator misbehavior until they are included in a
/// block, then drops them. Evidence that ages past `max_age` is pruned.
pub struct MemoryEvidencePool {
    pending: Mutex<Vec<Evidence>>,
    max_age: u64,
}

impl MemoryEvidencePool {
    pub fn new(max_age: u64) -> Self {
        Self {
            pending: Mutex::new(Vec::new()),
            max_age,
        }
    }

    /// Queue evidence for inclusion in a future block. Duplicates are
    /// dropped silently.
    pub fn add_evidence(&self, evidence: Evidence) {
        let mut pending = self.pending.lock().unwrap_or_else(|e| e.into_inner());
        if pending.contains(&evidence) {
            return;
        }
        info!(address = %evidence.address, height = evidence.height, "new evidence");
        pending.push(evidence);
    }

    /// Evidence not yet included in a block, oldest first.
    pub fn pending_evidence(&self) -> Vec<Evidence> {
        self.pending
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

impl EvidencePool for MemoryEvidencePool {
    fn update(&self, block: &Block) {
        let mut pending = self.pending.lock().unwrap_or_else(|e| e.into_inner());
        let before = pending.len();
        let height = block.header.height;
        let max_age = self.max_age;
        pending.retain(|ev| {
            !block.evidence.contains(ev) && height.saturating_sub(ev.height) <= max_age
        });
        if pending.len() != before {
            debug!(
                settled = before - pending.len(),
                height, "evidence settled or expired"
            );
        }
    }
}
