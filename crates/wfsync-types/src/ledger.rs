//! Ledger-side records: heads, DON membership and allowlisted requests

use serde::{Deserialize, Serialize};

/// Ledger position a read was served from
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Head {
    pub height: String,

    #[serde(default)]
    pub hash: String,

    #[serde(default)]
    pub timestamp: u64,
}

impl Head {
    /// Placeholder head used when no read has happened yet.
    pub fn genesis() -> Self {
        Self {
            height: "0".to_string(),
            ..Default::default()
        }
    }
}

/// DON assignment of the local node
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Don {
    pub id: u32,

    /// Families this node reconciles workflows for
    pub families: Vec<String>,
}

/// Pre-approved request digest with a wall-clock expiry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllowlistedRequest {
    #[serde(with = "crate::serde_hex")]
    pub request_digest: Vec<u8>,

    #[serde(with = "crate::serde_hex")]
    pub owner: Vec<u8>,

    /// Expiry, seconds since the epoch
    pub expiry_timestamp: u32,
}

impl AllowlistedRequest {
    /// An entry is expired once the clock reaches its expiry second.
    pub fn is_expired_at(&self, now_secs: i64) -> bool {
        i64::from(self.expiry_timestamp) <= now_secs
    }
}
