use std::sync::Mutex;

use crossbeam_channel::{unbounded, Receiver, Sender};

use crate::types::{Block, BlockHeader, TxResult, ValidatorUpdate};

#[derive(Clone, Debug)]
pub struct EventNewBlock {
    pub block: Block,
}

#[derive(Clone, Debug)]
pub struct EventNewBlockHeader {
    pub header: BlockHeader,
}

#[derive(Clone, Debug)]
pub struct EventTx {
    pub tx_result: TxResult,
}

#[derive(Clone, Debug)]
pub struct EventValidatorSetUpdates {
    pub updates: Vec<ValidatorUpdate>,
}

#[derive(Clone, Debug)]
pub enum Event {
    NewBlock(EventNewBlock),
    NewBlockHeader(EventNewBlockHeader),
    Tx(EventTx),
    ValidatorSetUpdates(EventValidatorSetUpdates),
}

/// Sink for block-related events. The executor publishes into this after a
/// block is committed and its state saved.
pub trait BlockEventPublisher: Send + Sync {
    fn publish_new_block(&self, event: EventNewBlock);
    fn publish_new_block_header(&self, event: EventNewBlockHeader);
    fn publish_tx(&self, event: EventTx);
    fn publish_validator_set_updates(&self, event: EventValidatorSetUpdates);
}

/// Default publisher: drops everything. Lets the executor run without any
/// event wiring, e.g. during handshake replay and in tests.
#[derive(Clone, Copy, Debug, Default)]
pub struct NopEventBus;

impl BlockEventPublisher for NopEventBus {
    fn publish_new_block(&self, _event: EventNewBlock) {}
    fn publish_new_block_header(&self, _event: EventNewBlockHeader) {}
    fn publish_tx(&self, _event: EventTx) {}
    fn publish_validator_set_updates(&self, _event: EventValidatorSetUpdates) {}
}

/// Fan-out bus over crossbeam channels. Subscribers that fall away (receiver
/// dropped) are pruned on the next publish.
#[derive(Default)]
pub struct EventBus {
    subscribers: Mutex<Vec<Sender<Event>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self) -> Receiver<Event> {
        let (tx, rx) = unbounded();
        self.subscribers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(tx);
        rx
    }

    fn publish(&self, event: Event) {
        let mut subs = self.subscribers.lock().unwrap_or_else(|e| e.into_inner());
        subs.retain(|s| s.send(event.clone()).is_ok());
    }
}

impl BlockEventPublisher for EventBus {
    fn publish_new_block(&self, event: EventNewBlock) {
        self.publish(Event::NewBlock(event));
    }

    fn publish_new_block_header(&self, event: EventNewBlockHeader) {
        self.publish(Event::NewBlockHeader(event));
    }

    fn publish_tx(&self, event: EventTx) {
        self.publish(Event::Tx(event));
    }

    fn publish_validator_set_updates(&self, event: EventValidatorSetUpdates) {
        self.publish(Event::ValidatorSetUpdates(event));
    }
}

/// Buffers per-tx events so they are published in one burst after the block
/// level events.
pub struct TxEventBuffer<'a> {
    bus: &'a dyn BlockEventPublisher,
    events: Vec<EventTx>,
}

impl<'a> TxEventBuffer<'a> {
    pub fn new(bus: &'a dyn BlockEventPublisher, capacity: usize) -> Self {
        Self { bus, events: Vec::with_capacity(capacity) }
    }

    pub fn publish_tx(&mut self, event: EventTx) {
        self.events.push(event);
    }

    pub fn flush(&mut self) {
        for ev in self.events.drain(..) {
            self.bus.publish_tx(ev);
        }
    }
}
