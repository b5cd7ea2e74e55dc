//! Controller and handler configuration

use crate::error::{Result, SyncerError};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Name of the on-ledger workflow registry contract
pub const WORKFLOW_REGISTRY_CONTRACT: &str = "WorkflowRegistry";

/// Ledger method listing the workflows declared for a DON family
pub const GET_WORKFLOW_LIST_BY_DON: &str = "getWorkflowListByDON";

/// Ledger method reading allowlisted requests in reverse index order
pub const GET_ACTIVE_ALLOWLISTED_REQUESTS_REVERSE: &str = "getActiveAllowlistedRequestsReverse";

/// Ledger method returning the total number of allowlisted requests ever added
pub const TOTAL_ALLOWLISTED_REQUESTS: &str = "totalAllowlistedRequests";

/// How desired state is obtained from the ledger
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncStrategy {
    /// Poll the full declared state and diff it against running engines
    #[default]
    Reconciliation,
    /// Follow individual ledger events (not supported by this controller)
    Event,
}

impl SyncStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncStrategy::Reconciliation => "reconciliation",
            SyncStrategy::Event => "event",
        }
    }
}

impl fmt::Display for SyncStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Reconciliation controller configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncerConfig {
    /// Interval between reconciliation ticks
    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,

    /// Base of the per-event exponential backoff
    #[serde(default = "default_retry_interval_ms")]
    pub retry_interval_ms: u64,

    /// Upper bound of the per-event backoff
    #[serde(default = "default_max_retry_interval_ms")]
    pub max_retry_interval_ms: u64,

    /// Interval between allowlist refreshes
    #[serde(default = "default_allowlist_tick_interval_ms")]
    pub allowlist_tick_interval_ms: u64,

    /// Interval between ledger reader construction attempts
    #[serde(default = "default_reader_init_interval_ms")]
    pub reader_init_interval_ms: u64,

    /// Page size of every paginated ledger read
    #[serde(default = "default_max_results_per_query")]
    pub max_results_per_query: u64,

    #[serde(default)]
    pub sync_strategy: SyncStrategy,

    /// Address of the workflow registry contract
    #[serde(default)]
    pub workflow_registry_address: String,

    /// Chain the workflow registry lives on
    #[serde(default)]
    pub chain_selector: u64,
}

fn default_tick_interval_ms() -> u64 {
    12_000
}

fn default_retry_interval_ms() -> u64 {
    12_000
}

fn default_max_retry_interval_ms() -> u64 {
    5 * 60 * 1000
}

fn default_allowlist_tick_interval_ms() -> u64 {
    5_000
}

fn default_reader_init_interval_ms() -> u64 {
    12_000
}

fn default_max_results_per_query() -> u64 {
    1_000
}

impl Default for SyncerConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: default_tick_interval_ms(),
            retry_interval_ms: default_retry_interval_ms(),
            max_retry_interval_ms: default_max_retry_interval_ms(),
            allowlist_tick_interval_ms: default_allowlist_tick_interval_ms(),
            reader_init_interval_ms: default_reader_init_interval_ms(),
            max_results_per_query: default_max_results_per_query(),
            sync_strategy: SyncStrategy::default(),
            workflow_registry_address: String::new(),
            chain_selector: 0,
        }
    }
}

impl SyncerConfig {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    pub fn retry_interval(&self) -> Duration {
        Duration::from_millis(self.retry_interval_ms)
    }

    pub fn max_retry_interval(&self) -> Duration {
        Duration::from_millis(self.max_retry_interval_ms)
    }

    pub fn allowlist_tick_interval(&self) -> Duration {
        Duration::from_millis(self.allowlist_tick_interval_ms)
    }

    pub fn reader_init_interval(&self) -> Duration {
        Duration::from_millis(self.reader_init_interval_ms)
    }

    /// Reject settings the controller cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.sync_strategy != SyncStrategy::Reconciliation {
            return Err(SyncerError::UnsupportedSyncStrategy {
                expected: SyncStrategy::Reconciliation.to_string(),
                actual: self.sync_strategy.to_string(),
            });
        }
        for (name, value) in [
            ("tick_interval_ms", self.tick_interval_ms),
            ("allowlist_tick_interval_ms", self.allowlist_tick_interval_ms),
            ("reader_init_interval_ms", self.reader_init_interval_ms),
            ("max_results_per_query", self.max_results_per_query),
        ] {
            if value == 0 {
                return Err(SyncerError::InvalidConfig(format!("{name} must be positive")));
            }
        }
        Ok(())
    }
}

/// Event handler configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HandlerConfig {
    /// Poll interval while waiting for the capability registry
    #[serde(default = "default_readiness_poll_interval_ms")]
    pub readiness_poll_interval_ms: u64,

    /// Registry address attached to event labels
    #[serde(default)]
    pub workflow_registry_address: String,

    /// Chain selector attached to event labels
    #[serde(default)]
    pub chain_selector: u64,
}

fn default_readiness_poll_interval_ms() -> u64 {
    500
}

impl Default for HandlerConfig {
    fn default() -> Self {
        Self {
            readiness_poll_interval_ms: default_readiness_poll_interval_ms(),
            workflow_registry_address: String::new(),
            chain_selector: 0,
        }
    }
}

impl HandlerConfig {
    pub fn readiness_poll_interval(&self) -> Duration {
        Duration::from_millis(self.readiness_poll_interval_ms)
    }
}
