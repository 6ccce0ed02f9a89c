pub mod address;
pub mod block;
pub mod events;
pub mod genesis;
pub mod hash;
pub mod params;
pub mod serialization;
pub mod transaction;
pub mod validator;

pub use address::Address;
pub use block::{
    compute_data_hash, compute_evidence_hash, Block, BlockHeader, BlockId, CommitInfo, Evidence,
    PartSetHeader, VoteInfo,
};
pub use events::{
    BlockEventPublisher, Event, EventBus, EventNewBlock, EventNewBlockHeader, EventTx,
    EventValidatorSetUpdates, NopEventBus, TxEventBuffer,
};
pub use genesis::{GenesisDoc, GenesisValidator};
pub use hash::Hash;
pub use params::{BlockSizeParams, ConsensusParams, EvidenceParams, ParamUpdates, ParamsError};
pub use transaction::{Tx, TxResult};
pub use validator::{Validator, ValidatorSet, ValidatorSetError, ValidatorUpdate};
