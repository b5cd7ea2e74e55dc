//! Error types for the reconciliation controller and event handler

use thiserror::Error;
use wfsync_fetcher::FetchError;
use wfsync_registry::{EngineError, RegistryError};
use wfsync_types::WorkflowId;

/// Errors from the ledger reader collaborator
#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("ledger reader unavailable: {0}")]
    Unavailable(String),

    #[error("ledger query {identifier} failed: {reason}")]
    Query { identifier: String, reason: String },

    #[error("failed to decode ledger response for {identifier}: {source}")]
    Decode {
        identifier: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to encode ledger query parameters: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("context canceled")]
    Cancelled,
}

/// Errors from the artifact store collaborator
#[derive(Debug, Error)]
pub enum ArtifactError {
    #[error("failed to fetch artifact: {0}")]
    Fetch(#[from] FetchError),

    #[error("failed to decode binary: {0}")]
    Decode(String),

    #[error("{artifact} of {size} bytes exceeds the {limit} byte limit")]
    TooLarge {
        artifact: &'static str,
        size: usize,
        limit: u32,
    },

    #[error("spec store error: {0}")]
    Store(String),
}

impl ArtifactError {
    pub fn is_cancellation(&self) -> bool {
        matches!(self, ArtifactError::Fetch(e) if e.is_cancellation())
    }
}

/// Errors raised while applying one workflow event
#[derive(Debug, Error)]
pub enum HandlerError {
    #[error("failed to get workflow artifacts: {0}")]
    Artifacts(ArtifactError),

    #[error("failed to close workflow engine: {0}")]
    EngineClose(EngineError),

    #[error("failed to create workflow engine: {0}")]
    EngineCreate(EngineError),

    #[error("failed to start workflow engine: {0}")]
    EngineStart(EngineError),

    #[error("engine registry error: {0}")]
    Registry(#[from] RegistryError),

    #[error("failed to decode owner: {0}")]
    InvalidOwner(String),

    #[error("invalid workflow name: {0:?}")]
    InvalidWorkflowName(String),

    #[error("workflowID mismatch: computed {computed}, expected {expected}")]
    WorkflowIdMismatch {
        computed: WorkflowId,
        expected: WorkflowId,
    },

    #[error("invariant violation: {0}")]
    InvariantViolation(String),

    #[error("context canceled")]
    Cancelled,

    #[error("context deadline exceeded")]
    DeadlineExceeded,
}

impl HandlerError {
    pub fn is_cancellation(&self) -> bool {
        matches!(self, HandlerError::Cancelled | HandlerError::DeadlineExceeded)
    }
}

impl From<ArtifactError> for HandlerError {
    fn from(err: ArtifactError) -> Self {
        match err {
            ArtifactError::Fetch(FetchError::Cancelled) => HandlerError::Cancelled,
            ArtifactError::Fetch(FetchError::DeadlineExceeded) => HandlerError::DeadlineExceeded,
            other => HandlerError::Artifacts(other),
        }
    }
}

/// Errors from deriving the events of one tick
#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("engine registry error: {0}")]
    Registry(#[from] RegistryError),

    #[error("invariant violation: {0}")]
    InvariantViolation(String),
}

/// Errors from constructing or running the controller
#[derive(Debug, Error)]
pub enum SyncerError {
    #[error("missing required dependency: {0}")]
    MissingDependency(&'static str),

    #[error("WorkflowRegistrySyncer only supports sync strategy {expected:?}, got {actual:?}")]
    UnsupportedSyncStrategy { expected: String, actual: String },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("{0} already started")]
    AlreadyStarted(&'static str),

    #[error("{0} already closed")]
    AlreadyClosed(&'static str),

    #[error("failed to wait for DON: {0}")]
    DonUnavailable(String),

    #[error("failed to get workflow metadata: {0}")]
    Ledger(#[from] LedgerError),

    #[error(transparent)]
    Reconcile(#[from] ReconcileError),

    #[error(transparent)]
    Handler(#[from] HandlerError),

    #[error("background task failed: {0}")]
    Join(String),

    #[error("context canceled")]
    Cancelled,
}

impl SyncerError {
    pub fn is_cancellation(&self) -> bool {
        match self {
            SyncerError::Cancelled | SyncerError::Ledger(LedgerError::Cancelled) => true,
            SyncerError::Handler(e) => e.is_cancellation(),
            _ => false,
        }
    }
}

/// Result type for controller operations
pub type Result<T> = std::result::Result<T, SyncerError>;
