//! Per-tick summary of the reconciliation loop

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use wfsync_types::{EventKind, WorkflowId};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileReport {
    /// Events seen this tick, by kind
    pub num_events_by_type: BTreeMap<String, usize>,

    /// Workflows waiting on backoff, with the earliest time they may retry
    pub backoffs: BTreeMap<String, DateTime<Utc>>,
}

impl ReconcileReport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_event(&mut self, kind: EventKind) {
        *self
            .num_events_by_type
            .entry(kind.as_str().to_string())
            .or_default() += 1;
    }

    pub fn record_backoff(&mut self, workflow_id: &WorkflowId, next_retry_at: DateTime<Utc>) {
        self.backoffs.insert(workflow_id.to_hex(), next_retry_at);
    }

    pub fn total_events(&self) -> usize {
        self.num_events_by_type.values().sum()
    }

    pub fn is_empty(&self) -> bool {
        self.num_events_by_type.is_empty() && self.backoffs.is_empty()
    }
}
