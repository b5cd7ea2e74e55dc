//! wfsync Syncer - Workflow registry reconciliation controller
//!
//! Keeps the set of running workflow engines converged on what the on-ledger
//! workflow registry declares for this node's DON.
//!
//! ## Architecture
//!
//! ```text
//! LedgerReader ──► Reconciler ──► EventSink (EventHandler) ──► EngineRegistry
//!                     │                 │
//!               PendingEvents      ArtifactStore ──► ArtifactFetcher
//!             (retry + backoff)    (spec store)
//! ```
//!
//! - [`WorkflowRegistrySyncer`] owns the background tasks: ledger reader
//!   initialization, the reconciliation loop and the allowlist refresher.
//! - [`generate_reconciliation_events`] diffs declared metadata against the
//!   engine registry and orders teardowns ahead of activations.
//! - [`EventHandler`] applies one transition idempotently: spec first, then
//!   engine on activation; engine, spec, registry entry on teardown.
//!
//! Every collaborator the core does not own (ledger access, DON membership,
//! engine construction, capability registry, organization lookup) is a trait
//! so the controller can run against fakes.

#![deny(unsafe_code)]
#![cfg_attr(feature = "strict-docs", warn(missing_docs))]
#![cfg_attr(not(feature = "strict-docs"), allow(missing_docs))]

pub mod allowlist;
pub mod artifacts;
pub mod clock;
pub mod config;
pub mod don;
pub mod error;
pub mod handler;
pub mod ledger;
pub mod reconcile;
pub mod report;
pub mod retry;
pub mod syncer;

// Re-exports
pub use allowlist::AllowlistCache;
pub use artifacts::{ArtifactLimits, ArtifactStore, FetchingArtifactStore, UrlRetriever};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{HandlerConfig, SyncStrategy, SyncerConfig};
pub use don::{DonNotifier, WatchDonNotifier};
pub use error::{
    ArtifactError, HandlerError, LedgerError, ReconcileError, Result, SyncerError,
};
pub use handler::{
    CapabilityRegistry, EngineFactory, EngineRequest, EventHandler, EventSink, LocalNode,
    NotReady, OrgResolveError, OrgResolver,
};
pub use ledger::{
    fetch_allowlisted_requests_delta, fetch_workflow_metadata, AllowlistDelta, Confidence,
    ContractBinding, LedgerReader, LedgerReaderFactory, ReadIdentifier,
};
pub use reconcile::generate_reconciliation_events;
pub use report::ReconcileReport;
pub use retry::{PendingEvents, ReconciliationEvent, RetryState};
pub use syncer::{
    Reconciler, StartFailureHook, WorkflowRegistrySyncer, WorkflowRegistrySyncerBuilder,
    SYNCER_NAME,
};
