//! Workflow state as declared on the ledger and as persisted locally

use crate::ids::WorkflowId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Ledger status code that maps to no known workflow status
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
#[error("unknown workflow status code: {0}")]
pub struct UnknownStatus(pub u8);

/// Desired status of a workflow as declared on the ledger
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkflowStatus {
    Active,
    Paused,
}

impl WorkflowStatus {
    /// Ledger encoding of the status.
    pub fn code(&self) -> u8 {
        match self {
            WorkflowStatus::Active => 0,
            WorkflowStatus::Paused => 1,
        }
    }

    pub fn from_code(code: u8) -> Result<Self, UnknownStatus> {
        match code {
            0 => Ok(WorkflowStatus::Active),
            1 => Ok(WorkflowStatus::Paused),
            other => Err(UnknownStatus(other)),
        }
    }
}

impl fmt::Display for WorkflowStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            WorkflowStatus::Active => "active",
            WorkflowStatus::Paused => "paused",
        })
    }
}

/// Ledger-declared desired state of one workflow.
///
/// Read-only from the controller's point of view: only the ledger mutates it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowMetadataView {
    pub workflow_id: WorkflowId,

    #[serde(with = "crate::serde_hex")]
    pub owner: Vec<u8>,

    /// Ledger creation time, seconds since the epoch
    #[serde(default)]
    pub created_at: u64,

    pub status: WorkflowStatus,

    pub workflow_name: String,

    #[serde(default)]
    pub tag: String,

    #[serde(default)]
    pub binary_url: String,

    #[serde(default)]
    pub config_url: String,

    #[serde(default, with = "crate::serde_hex")]
    pub attributes: Vec<u8>,

    #[serde(default)]
    pub don_family: String,
}

impl WorkflowMetadataView {
    pub fn owner_hex(&self) -> String {
        hex::encode(&self.owner)
    }
}

/// Status of the persisted workflow spec
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SpecStatus {
    Active,
    Paused,
}

impl From<WorkflowStatus> for SpecStatus {
    fn from(status: WorkflowStatus) -> Self {
        match status {
            WorkflowStatus::Active => SpecStatus::Active,
            WorkflowStatus::Paused => SpecStatus::Paused,
        }
    }
}

impl fmt::Display for SpecStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SpecStatus::Active => "active",
            SpecStatus::Paused => "paused",
        })
    }
}

/// Persisted projection of a workflow with its materialized artifacts.
///
/// Created on the first successful activation, updated in place on status
/// changes or when a new ID supersedes the old one, deleted on pause/delete.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowSpec {
    pub workflow_id: WorkflowId,

    /// Owner address, hex without prefix
    pub workflow_owner: String,

    pub workflow_name: String,

    pub workflow_tag: String,

    pub status: SpecStatus,

    pub binary: Vec<u8>,

    pub config: Vec<u8>,

    pub binary_url: String,

    pub config_url: String,

    pub spec_type: String,

    pub created_at: DateTime<Utc>,

    pub updated_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        assert_eq!(WorkflowStatus::from_code(0), Ok(WorkflowStatus::Active));
        assert_eq!(WorkflowStatus::from_code(1), Ok(WorkflowStatus::Paused));
        assert_eq!(WorkflowStatus::from_code(9), Err(UnknownStatus(9)));
        assert_eq!(WorkflowStatus::Paused.code(), 1);
    }

    #[test]
    fn test_metadata_from_json() {
        let json = format!(
            r#"{{
                "workflow_id": "{}",
                "owner": "0xabcd",
                "status": "active",
                "workflow_name": "price-feed",
                "binary_url": "file:///bin.wasm"
            }}"#,
            "11".repeat(32)
        );
        let view: WorkflowMetadataView = serde_json::from_str(&json).unwrap();
        assert_eq!(view.owner, vec![0xab, 0xcd]);
        assert_eq!(view.owner_hex(), "abcd");
        assert_eq!(view.status, WorkflowStatus::Active);
        assert!(view.config_url.is_empty());
        assert!(view.attributes.is_empty());
    }

    #[test]
    fn test_spec_status_from_workflow_status() {
        assert_eq!(SpecStatus::from(WorkflowStatus::Active), SpecStatus::Active);
        assert_eq!(SpecStatus::from(WorkflowStatus::Paused), SpecStatus::Paused);
    }
}
