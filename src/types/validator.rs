use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::crypto::merkle::merkle_root;
use crate::types::{Address, Hash};

/// Hard cap on the aggregate voting power of a set. Leaves headroom so
/// proposer priority arithmetic cannot overflow an i64.
pub const MAX_TOTAL_VOTING_POWER: i64 = i64::MAX / 8;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Validator {
    pub address: Address,
    pub pub_key: [u8; 32],
    pub voting_power: i64,
    pub proposer_priority: i64,
}

impl Validator {
    pub fn new(pub_key: [u8; 32], voting_power: i64) -> Self {
        Self {
            address: Address::from_pub_key(&pub_key),
            pub_key,
            voting_power,
            proposer_priority: 0,
        }
    }

    fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(20 + 32 + 8);
        buf.extend_from_slice(&self.address.0);
        buf.extend_from_slice(&self.pub_key);
        buf.extend_from_slice(&self.voting_power.to_be_bytes());
        buf
    }
}

/// A change to the validator set reported by the application at EndBlock.
/// Zero power removes the validator, an unknown key adds one, anything else
/// replaces the voting power.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidatorUpdate {
    pub pub_key: [u8; 32],
    pub power: i64,
}

#[derive(thiserror::Error, Debug)]
pub enum ValidatorSetError {
    #[error("negative voting power {power} for validator {address}")]
    NegativePower { address: Address, power: i64 },
    #[error("cannot remove unknown validator {0}")]
    RemoveUnknown(Address),
    #[error("total voting power would exceed {MAX_TOTAL_VOTING_POWER}")]
    TotalPowerOverflow,
    #[error("validator set cannot be empty")]
    Empty,
}

/// Ordered validator set with total-power and proposer-priority accounting.
/// Kept sorted by address so iteration and hashing are deterministic.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ValidatorSet {
    validators: Vec<Validator>,
    total_power: i64,
}

impl ValidatorSet {
    pub fn new(mut validators: Vec<Validator>) -> Self {
        validators.sort_by(|a, b| a.address.cmp(&b.address));
        let total_power = validators
            .iter()
            .fold(0i64, |acc, v| acc.saturating_add(v.voting_power));
        Self { validators, total_power }
    }

    pub fn len(&self) -> usize {
        self.validators.len()
    }

    pub fn is_empty(&self) -> bool {
        self.validators.is_empty()
    }

    pub fn total_power(&self) -> i64 {
        self.total_power
    }

    pub fn validators(&self) -> &[Validator] {
        &self.validators
    }

    pub fn get_by_address(&self, address: &Address) -> Option<&Validator> {
        self.validators.iter().find(|v| &v.address == address)
    }

    pub fn has_address(&self, address: &Address) -> bool {
        self.get_by_address(address).is_some()
    }

    /// Deterministic hash of the set: Merkle root over the encoded members.
    pub fn hash(&self) -> Hash {
        let leaves: Vec<Vec<u8>> = self.validators.iter().map(|v| v.encode()).collect();
        merkle_root(&leaves)
    }

    /// Advance proposer priorities by `times` rounds: every member gains its
    /// own voting power, then the member with the highest priority (the
    /// proposer; ties resolved by lowest address) is charged the total power.
    pub fn increment_proposer_priority(&mut self, times: u32) {
        for _ in 0..times {
            for v in &mut self.validators {
                v.proposer_priority = v.proposer_priority.saturating_add(v.voting_power);
            }
            if let Some(idx) = self.proposer_index() {
                let total = self.total_power;
                self.validators[idx].proposer_priority =
                    self.validators[idx].proposer_priority.saturating_sub(total);
            }
        }
    }

    /// The member that would propose next: highest priority, lowest address
    /// breaking ties.
    pub fn proposer(&self) -> Option<&Validator> {
        self.proposer_index().map(|i| &self.validators[i])
    }

    fn proposer_index(&self) -> Option<usize> {
        // validators are address-sorted, so max_by on priority alone picks
        // the lowest address among ties as long as we use a strict compare
        self.validators
            .iter()
            .enumerate()
            .max_by(|(_, a), (_, b)| {
                a.proposer_priority
                    .cmp(&b.proposer_priority)
                    .then_with(|| b.address.cmp(&a.address))
            })
            .map(|(i, _)| i)
    }

    /// Apply EndBlock validator updates, returning the next set.
    ///
    /// Zero power removes, an unknown key adds (priority 0), otherwise the
    /// power is replaced. Negative power and total-power overflow are hard
    /// errors. A power swing of one third or more of the previous total in a
    /// single block is tolerated but logged, since light clients cannot
    /// follow such a transition.
    pub fn apply_updates(&self, updates: &[ValidatorUpdate]) -> Result<ValidatorSet, ValidatorSetError> {
        let mut next = self.clone();
        let mut changed_power: i64 = 0;

        for u in updates {
            let address = Address::from_pub_key(&u.pub_key);
            if u.power < 0 {
                return Err(ValidatorSetError::NegativePower { address, power: u.power });
            }

            let existing = next.validators.iter().position(|v| v.address == address);
            match existing {
                None if u.power == 0 => return Err(ValidatorSetError::RemoveUnknown(address)),
                None => {
                    changed_power = changed_power.saturating_add(u.power);
                    let pos = next
                        .validators
                        .partition_point(|v| v.address < address);
                    next.validators.insert(pos, Validator::new(u.pub_key, u.power));
                }
                Some(i) if u.power == 0 => {
                    changed_power = changed_power.saturating_add(next.validators[i].voting_power);
                    next.validators.remove(i);
                }
                Some(i) => {
                    let delta = (next.validators[i].voting_power - u.power).abs();
                    changed_power = changed_power.saturating_add(delta);
                    next.validators[i].voting_power = u.power;
                }
            }
        }

        if next.validators.is_empty() {
            return Err(ValidatorSetError::Empty);
        }

        let mut total: i64 = 0;
        for v in &next.validators {
            total = total
                .checked_add(v.voting_power)
                .filter(|t| *t <= MAX_TOTAL_VOTING_POWER)
                .ok_or(ValidatorSetError::TotalPowerOverflow)?;
        }
        next.total_power = total;

        if self.total_power > 0 && changed_power >= self.total_power / 3 {
            warn!(
                changed = changed_power,
                total = self.total_power,
                "validator power changed by a third or more in one block"
            );
        }

        Ok(next)
    }
}
