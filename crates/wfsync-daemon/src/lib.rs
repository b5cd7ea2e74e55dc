//! wfsync Daemon library
//!
//! Runs the workflow registry syncer against local collaborators:
//! - a JSON ledger snapshot standing in for the workflow registry contract
//! - direct `file://` or `http(s)://` artifact fetching
//! - engines that log their lifecycle instead of executing workflows

pub mod config;
pub mod daemon;
pub mod error;
pub mod local;

pub use config::DaemonConfig;
pub use daemon::{shutdown_signal, Daemon};
pub use error::{DaemonError, DaemonResult};
pub use local::{
    FileLedgerReader, FileLedgerReaderFactory, LedgerSnapshot, LocalCapabilityRegistry,
    LoggingEngine, LoggingEngineFactory,
};
