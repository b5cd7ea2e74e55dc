//! Workflow identifiers

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Version byte stamped into the first byte of every derived workflow ID.
pub const WORKFLOW_ID_VERSION: u8 = 0;

/// Errors parsing a workflow ID from text
#[derive(Debug, Error, PartialEq, Eq)]
pub enum IdParseError {
    #[error("invalid hex in workflow id: {0}")]
    InvalidHex(String),

    #[error("workflow id must be 32 bytes, got {0}")]
    InvalidLength(usize),
}

/// 32-byte identifier of a workflow.
///
/// Derived from the workflow's owner, name, binary, config and secrets URL,
/// so any change to the content produces a new ID.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct WorkflowId([u8; 32]);

impl WorkflowId {
    pub const fn new(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Derive the ID for a workflow's content.
    ///
    /// Each field is length-prefixed before hashing so that adjacent fields
    /// cannot be shifted into one another.
    pub fn generate(
        owner: &[u8],
        name: &str,
        binary: &[u8],
        config: &[u8],
        secrets_url: &str,
    ) -> Self {
        let mut hasher = Sha256::new();
        for field in [
            owner,
            name.as_bytes(),
            binary,
            config,
            secrets_url.as_bytes(),
        ] {
            hasher.update((field.len() as u64).to_be_bytes());
            hasher.update(field);
        }

        let mut bytes: [u8; 32] = hasher.finalize().into();
        bytes[0] = WORKFLOW_ID_VERSION;
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Whether every byte is zero (an unset ID on the ledger).
    pub fn is_zero(&self) -> bool {
        self.0.iter().all(|b| *b == 0)
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn from_hex(s: &str) -> Result<Self, IdParseError> {
        let raw = crate::serde_hex::decode(s).map_err(|e| IdParseError::InvalidHex(e.to_string()))?;
        let bytes: [u8; 32] = raw
            .as_slice()
            .try_into()
            .map_err(|_| IdParseError::InvalidLength(raw.len()))?;
        Ok(Self(bytes))
    }
}

impl From<[u8; 32]> for WorkflowId {
    fn from(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }
}

impl FromStr for WorkflowId {
    type Err = IdParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_hex(s)
    }
}

impl fmt::Display for WorkflowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for WorkflowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "WorkflowId({})", self.to_hex())
    }
}

impl Serialize for WorkflowId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for WorkflowId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::from_hex(&s).map_err(serde::de::Error::custom)
    }
}
