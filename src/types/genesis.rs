use serde::{Deserialize, Serialize};

use crate::types::{ConsensusParams, Validator, ValidatorSet};

/// Initial conditions of a chain. The app_state bytes are handed verbatim to
/// the application via InitChain when it starts at height 0.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GenesisDoc {
    pub chain_id: String,
    pub genesis_time_ms: u64,
    #[serde(default)]
    pub consensus_params: ConsensusParams,
    pub validators: Vec<GenesisValidator>,
    #[serde(default)]
    pub app_hash: Vec<u8>,
    #[serde(default)]
    pub app_state_bytes: Vec<u8>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GenesisValidator {
    pub pub_key: [u8; 32],
    pub power: i64,
    #[serde(default)]
    pub name: String,
}

impl GenesisDoc {
    pub fn validator_set(&self) -> ValidatorSet {
        ValidatorSet::new(
            self.validators
                .iter()
                .map(|v| Validator::new(v.pub_key, v.power))
                .collect(),
        )
    }
}
