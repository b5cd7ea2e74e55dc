//! Pending reconciliation events and their backoff bookkeeping

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::time::Duration;
use wfsync_types::{EventKind, Head, RegistryEvent, SpecStatus, WorkflowEvent, WorkflowId};

/// Unresolved events carried from one tick to the next, keyed by workflow.
pub type PendingEvents = HashMap<WorkflowId, ReconciliationEvent>;

/// Per-event exponential backoff state
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryState {
    pub retry_count: u32,
    pub next_retry_at: DateTime<Utc>,
}

impl Default for RetryState {
    fn default() -> Self {
        Self {
            retry_count: 0,
            next_retry_at: DateTime::<Utc>::MIN_UTC,
        }
    }
}

impl RetryState {
    /// A fresh event is always eligible; a failed one once its backoff has elapsed.
    pub fn is_eligible(&self, now: DateTime<Utc>) -> bool {
        self.retry_count == 0 || now > self.next_retry_at
    }

    /// Record a failure at `now`.
    ///
    /// The wait is `min(max_interval, interval * 2^retry_count)` using the
    /// already incremented count.
    pub fn record_failure(
        &mut self,
        now: DateTime<Utc>,
        interval: Duration,
        max_interval: Duration,
    ) {
        self.retry_count = self.retry_count.saturating_add(1);
        let wait = 2u32
            .checked_pow(self.retry_count)
            .and_then(|factor| interval.checked_mul(factor))
            .map_or(max_interval, |wait| wait.min(max_interval));
        self.next_retry_at = chrono::Duration::from_std(wait)
            .ok()
            .and_then(|wait| now.checked_add_signed(wait))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
    }
}

/// A transition derived by one tick, kept until it is applied successfully
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconciliationEvent {
    pub event: RegistryEvent,
    /// Identifies the desired transition across ticks
    pub signature: String,
    pub id: WorkflowId,
    pub retry: RetryState,
}

impl ReconciliationEvent {
    pub fn new(event: WorkflowEvent, head: Head, signature: String) -> Self {
        let id = event.workflow_id();
        Self {
            event: RegistryEvent::new(event, head),
            signature,
            id,
            retry: RetryState::default(),
        }
    }

    pub fn kind(&self) -> EventKind {
        self.event.kind()
    }

    pub fn retry_count(&self) -> u32 {
        self.retry.retry_count
    }

    pub fn next_retry_at(&self) -> DateTime<Utc> {
        self.retry.next_retry_at
    }
}

/// Signature of a transition towards `status` for `id`.
pub fn signature(kind: EventKind, id: &WorkflowId, status: SpecStatus) -> String {
    format!("{kind}-{id}-{status}")
}

/// Signature of a deletion, which carries no status.
pub fn deleted_signature(id: &WorkflowId) -> String {
    format!("{}-{id}", EventKind::WorkflowDeleted)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(secs: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(secs, 0).unwrap()
    }

    #[test]
    fn test_fresh_state_is_eligible() {
        let state = RetryState::default();
        assert!(state.is_eligible(at(0)));
    }

    #[test]
    fn test_first_failure_waits_twice_the_interval() {
        let mut state = RetryState::default();
        state.record_failure(at(100), Duration::from_secs(1), Duration::from_secs(300));

        assert_eq!(state.retry_count, 1);
        assert_eq!(state.next_retry_at, at(102));
        assert!(!state.is_eligible(at(102)));
        assert!(state.is_eligible(at(103)));
    }

    #[test]
    fn test_backoff_clamps_to_max_after_ten_failures() {
        let now = at(1_000);
        let mut state = RetryState::default();
        for _ in 0..10 {
            state.record_failure(now, Duration::from_secs(1), Duration::from_secs(300));
        }

        assert_eq!(state.retry_count, 10);
        assert_eq!(state.next_retry_at - now, chrono::Duration::minutes(5));
    }

    #[test]
    fn test_backoff_grows_until_cap() {
        let now = at(0);
        let mut state = RetryState::default();
        let mut waits = Vec::new();
        for _ in 0..6 {
            state.record_failure(now, Duration::from_secs(10), Duration::from_secs(300));
            waits.push((state.next_retry_at - now).num_seconds());
        }
        assert_eq!(waits, vec![20, 40, 80, 160, 300, 300]);
    }

    #[test]
    fn test_huge_retry_count_does_not_overflow() {
        let now = at(0);
        let mut state = RetryState {
            retry_count: u32::MAX - 1,
            next_retry_at: now,
        };
        state.record_failure(now, Duration::from_secs(12), Duration::from_secs(300));
        assert_eq!(state.next_retry_at - now, chrono::Duration::minutes(5));
    }

    #[test]
    fn test_signatures() {
        let id = WorkflowId::new([1; 32]);
        let activated = signature(EventKind::WorkflowActivated, &id, SpecStatus::Active);
        assert_eq!(activated, format!("WorkflowActivated-{id}-active"));

        let paused = signature(EventKind::WorkflowPaused, &id, SpecStatus::Paused);
        assert_ne!(activated, paused);

        assert_eq!(deleted_signature(&id), format!("WorkflowDeleted-{id}"));
    }

    #[test]
    fn test_new_event_starts_without_retries() {
        let id = WorkflowId::new([2; 32]);
        let event = ReconciliationEvent::new(
            WorkflowEvent::deleted(id),
            Head::genesis(),
            deleted_signature(&id),
        );
        assert_eq!(event.id, id);
        assert_eq!(event.kind(), EventKind::WorkflowDeleted);
        assert_eq!(event.retry_count(), 0);
    }
}
