use std::path::Path;

use rocksdb::{ColumnFamilyDescriptor, Options, DB};

use crate::state::{AsuraResponses, State};
use crate::types::{ConsensusParams, ValidatorSet};

use super::StoreError;

const CF_STATE: &str = "state"; // key: "state" -> JSON State
const CF_ASURA_RESPONSES: &str = "asura_responses"; // key: height (u64 BE) -> JSON AsuraResponses
const CF_VALIDATORS: &str = "validators"; // key: height (u64 BE) -> JSON ValidatorSet
const CF_CONSENSUS_PARAMS: &str = "consensus_params"; // key: height (u64 BE) -> JSON ConsensusParams

const STATE_KEY: &[u8] = b"state";

fn height_key(h: u64) -> [u8; 8] {
    h.to_be_bytes()
}

/// Persists the canonical State, per-height application responses, and
/// historical validator/params snapshots at the heights they changed.
pub struct StateStore {
    db: DB,
}

impl StateStore {
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let cfs = vec![
            ColumnFamilyDescriptor::new(CF_STATE, Options::default()),
            ColumnFamilyDescriptor::new(CF_ASURA_RESPONSES, Options::default()),
            ColumnFamilyDescriptor::new(CF_VALIDATORS, Options::default()),
            ColumnFamilyDescriptor::new(CF_CONSENSUS_PARAMS, Options::default()),
        ];

        let db = DB::open_cf_descriptors(&opts, path, cfs)?;
        Ok(Self { db })
    }

    /// Save the canonical state, snapshotting the validator set that votes
    /// at the next height and, when they just changed, the consensus params.
    pub fn save_state(&self, state: &State) -> Result<(), StoreError> {
        let cf_state = self.db.cf_handle(CF_STATE).unwrap();
        let cf_vals = self.db.cf_handle(CF_VALIDATORS).unwrap();
        let cf_params = self.db.cf_handle(CF_CONSENSUS_PARAMS).unwrap();

        let next_height = state.last_block_height + 1;

        let mut batch = rocksdb::WriteBatch::default();
        batch.put_cf(&cf_state, STATE_KEY, serde_json::to_vec(state)?);
        batch.put_cf(
            &cf_vals,
            height_key(next_height),
            serde_json::to_vec(&state.validators)?,
        );
        if state.last_height_consensus_params_changed == next_height || next_height == 1 {
            batch.put_cf(
                &cf_params,
                height_key(next_height),
                serde_json::to_vec(&state.consensus_params)?,
            );
        }

        self.db.write(batch)?;
        Ok(())
    }

    pub fn load_state(&self) -> Result<Option<State>, StoreError> {
        let cf = self.db.cf_handle(CF_STATE).unwrap();
        match self.db.get_cf(&cf, STATE_KEY)? {
            None => Ok(None),
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
        }
    }

    /// Persist the application's responses for a block so a recorded-response
    /// mock can replay it after a crash between Commit and SaveState.
    pub fn save_asura_responses(
        &self,
        height: u64,
        responses: &AsuraResponses,
    ) -> Result<(), StoreError> {
        let cf = self.db.cf_handle(CF_ASURA_RESPONSES).unwrap();
        self.db
            .put_cf(&cf, height_key(height), serde_json::to_vec(responses)?)?;
        Ok(())
    }

    pub fn load_asura_responses(&self, height: u64) -> Result<Option<AsuraResponses>, StoreError> {
        let cf = self.db.cf_handle(CF_ASURA_RESPONSES).unwrap();
        match self.db.get_cf(&cf, height_key(height))? {
            None => Ok(None),
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
        }
    }

    /// Validator set active at a height. Walks back to the snapshot written
    /// when the set last changed before `height`.
    pub fn load_validators(&self, height: u64) -> Result<Option<ValidatorSet>, StoreError> {
        let cf = self.db.cf_handle(CF_VALIDATORS).unwrap();
        let mut h = height;
        while h >= 1 {
            if let Some(bytes) = self.db.get_cf(&cf, height_key(h))? {
                return Ok(Some(serde_json::from_slice(&bytes)?));
            }
            h -= 1;
        }
        Ok(None)
    }

    /// Consensus params active at a height; same walk-back as validators.
    pub fn load_consensus_params(&self, height: u64) -> Result<Option<ConsensusParams>, StoreError> {
        let cf = self.db.cf_handle(CF_CONSENSUS_PARAMS).unwrap();
        let mut h = height;
        while h >= 1 {
            if let Some(bytes) = self.db.get_cf(&cf, height_key(h))? {
                return Ok(Some(serde_json::from_slice(&bytes)?));
            }
            h -= 1;
        }
        Ok(None)
    }
}
