use serde::{Deserialize, Serialize};

use crate::crypto::hash::sha256;

/// Validator address: first 20 bytes of the sha256 of the public key.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Address(pub [u8; 20]);

impl Address {
    pub fn from_pub_key(pub_key: &[u8; 32]) -> Self {
        let h = sha256(pub_key);
        let mut out = [0u8; 20];
        out.copy_from_slice(&h.0[..20]);
        Address(out)
    }
}

impl std::fmt::Display for Address {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for b in &self.0 {
            write!(f, "{:02x}", b)?;
        }
        Ok(())
    }
}
