//! wfsync Types - Core types for workflow registry synchronization
//!
//! The workflow registry lives on an append-only ledger and declares which
//! workflows a DON should be running. These types describe that declared
//! state, the locally persisted projection of it, and the transitions the
//! reconciliation controller derives between the two.
//!
//! ## Key Concepts
//!
//! - **WorkflowId**: 32-byte content-derived identifier, the only key used
//!   by the engine registry, the spec store and event de-duplication
//! - **WorkflowMetadataView**: ledger-declared desired state
//! - **WorkflowSpec**: persisted projection with materialized artifacts
//! - **WorkflowEvent**: typed transition (registered, activated, paused, deleted)
//! - **AllowlistedRequest**: pre-approved request digest with an expiry

#![deny(unsafe_code)]
#![cfg_attr(feature = "strict-docs", warn(missing_docs))]
#![cfg_attr(not(feature = "strict-docs"), allow(missing_docs))]

pub mod events;
pub mod ids;
pub mod ledger;
pub mod serde_hex;
pub mod workflow;

// Re-export main types
pub use events::{
    EventKind, RegistryEvent, WorkflowActivatedEvent, WorkflowDeletedEvent, WorkflowEvent,
    WorkflowPausedEvent, WorkflowRegisteredEvent,
};
pub use ids::{IdParseError, WorkflowId, WORKFLOW_ID_VERSION};
pub use ledger::{AllowlistedRequest, Don, Head};
pub use workflow::{SpecStatus, UnknownStatus, WorkflowMetadataView, WorkflowSpec, WorkflowStatus};
