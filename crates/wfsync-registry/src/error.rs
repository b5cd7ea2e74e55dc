//! Registry error types

use thiserror::Error;
use wfsync_types::WorkflowId;

/// Registry errors
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("engine not found: {0}")]
    NotFound(WorkflowId),

    #[error("engine already exists: {0}")]
    AlreadyExists(WorkflowId),

    #[error("Lock error")]
    Lock,
}

impl RegistryError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, RegistryError::NotFound(_))
    }

    pub fn is_already_exists(&self) -> bool {
        matches!(self, RegistryError::AlreadyExists(_))
    }
}

/// Result type for registry operations
pub type Result<T> = std::result::Result<T, RegistryError>;
