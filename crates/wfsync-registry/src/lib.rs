//! wfsync Registry - Ownership directory of running workflow engines
//!
//! The [`EngineRegistry`] maps a [`WorkflowId`](wfsync_types::WorkflowId) to
//! the handle of the engine running it. It holds no engine logic: it only
//! guarantees that at most one engine is registered per workflow ID, and that
//! snapshots handed out to callers are independent of later mutation.

#![deny(unsafe_code)]
#![cfg_attr(feature = "strict-docs", warn(missing_docs))]
#![cfg_attr(not(feature = "strict-docs"), allow(missing_docs))]

pub mod engine;
pub mod error;
pub mod registry;

// Re-exports
pub use engine::{close_all, Engine, EngineError, HealthReport};
pub use error::{RegistryError, Result};
pub use registry::{EngineEntry, EngineRegistry};
