//! Diff of declared workflow state against running engines
//!
//! One call derives the ordered transitions of a tick. Events still pending
//! from earlier ticks are reused when they describe the same transition, so
//! their backoff survives; pending events whose transition no longer applies
//! are dropped.
//!
//! Paused and Deleted events are placed ahead of Activated ones, so an ID
//! rotation tears the old engine down before the new one is built.

use crate::error::ReconcileError;
use crate::retry::{deleted_signature, signature, PendingEvents, ReconciliationEvent};
use std::collections::{HashSet, VecDeque};
use wfsync_registry::EngineRegistry;
use wfsync_types::{
    EventKind, Head, SpecStatus, WorkflowEvent, WorkflowId, WorkflowMetadataView, WorkflowStatus,
};

/// Derive this tick's events, consuming `pending`.
///
/// On success `pending` is empty: every entry was either reused in the
/// returned list or discarded as stale.
pub fn generate_reconciliation_events(
    registry: &EngineRegistry,
    pending: &mut PendingEvents,
    metadata: &[WorkflowMetadataView],
    head: &Head,
) -> Result<Vec<ReconciliationEvent>, ReconcileError> {
    let mut events = VecDeque::new();
    let mut seen: HashSet<WorkflowId> = HashSet::new();
    let mut processed: HashSet<WorkflowId> = HashSet::new();

    for workflow in metadata {
        let id = workflow.workflow_id;
        // Listed under more than one family.
        if !processed.insert(id) {
            continue;
        }
        let engine_found = registry.contains(&id)?;
        let status = SpecStatus::from(workflow.status);

        match (workflow.status, engine_found) {
            (WorkflowStatus::Active, false) => {
                let sig = signature(EventKind::WorkflowActivated, &id, status);
                let event = take_matching(pending, &id, &sig).unwrap_or_else(|| {
                    ReconciliationEvent::new(
                        WorkflowEvent::activated(workflow.clone()),
                        head.clone(),
                        sig,
                    )
                });
                events.push_back(event);
                seen.insert(id);
            }
            (WorkflowStatus::Active, true) => {
                // Steady state.
                pending.remove(&id);
                seen.insert(id);
            }
            (WorkflowStatus::Paused, false) => {
                // Nothing is running, so nothing is left to tear down.
                pending.remove(&id);
            }
            (WorkflowStatus::Paused, true) => {
                seen.insert(id);
                let sig = signature(EventKind::WorkflowPaused, &id, status);
                let event = take_matching(pending, &id, &sig).unwrap_or_else(|| {
                    ReconciliationEvent::new(
                        WorkflowEvent::paused(workflow.clone()),
                        head.clone(),
                        sig,
                    )
                });
                events.push_front(event);
            }
        }
    }

    for entry in registry.get_all()? {
        let id = entry.workflow_id;
        if seen.contains(&id) {
            continue;
        }
        let sig = deleted_signature(&id);
        let event = take_matching(pending, &id, &sig).unwrap_or_else(|| {
            ReconciliationEvent::new(WorkflowEvent::deleted(id), head.clone(), sig)
        });
        events.push_front(event);
    }

    // Activations abandoned before they were ever applied.
    pending.retain(|id, event| {
        !(event.kind() == EventKind::WorkflowActivated && !processed.contains(id))
    });

    if !pending.is_empty() {
        let ids: Vec<String> = pending.keys().map(WorkflowId::to_hex).collect();
        return Err(ReconcileError::InvariantViolation(format!(
            "some pending events were not handled: {}",
            ids.join(", ")
        )));
    }

    Ok(events.into())
}

/// Remove the pending event for `id`, returning it only if it describes the same transition.
fn take_matching(
    pending: &mut PendingEvents,
    id: &WorkflowId,
    sig: &str,
) -> Option<ReconciliationEvent> {
    pending.remove(id).filter(|event| event.signature == sig)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::{DateTime, Utc};
    use std::sync::Arc;
    use std::time::Duration;
    use wfsync_registry::{Engine, EngineError, HealthReport};

    struct IdleEngine;

    #[async_trait]
    impl Engine for IdleEngine {
        fn name(&self) -> String {
            "idle".to_string()
        }

        async fn start(&self) -> Result<(), EngineError> {
            Ok(())
        }

        async fn close(&self) -> Result<(), EngineError> {
            Ok(())
        }

        fn ready(&self) -> Result<(), EngineError> {
            Ok(())
        }

        fn health_report(&self) -> HealthReport {
            HealthReport::new()
        }
    }

    fn wid(n: u8) -> WorkflowId {
        WorkflowId::new([n; 32])
    }

    fn metadata(n: u8, status: WorkflowStatus) -> WorkflowMetadataView {
        WorkflowMetadataView {
            workflow_id: wid(n),
            owner: vec![0xaa; 20],
            created_at: 0,
            status,
            workflow_name: format!("wf-{n}"),
            tag: String::new(),
            binary_url: "file:///bin".to_string(),
            config_url: "file:///cfg".to_string(),
            attributes: Vec::new(),
            don_family: "family-a".to_string(),
        }
    }

    fn registry_with(ids: &[u8]) -> EngineRegistry {
        let registry = EngineRegistry::new();
        for n in ids {
            registry.add(wid(*n), Arc::new(IdleEngine)).unwrap();
        }
        registry
    }

    fn kinds(events: &[ReconciliationEvent]) -> Vec<(EventKind, WorkflowId)> {
        events.iter().map(|e| (e.kind(), e.id)).collect()
    }

    fn failed(mut event: ReconciliationEvent, failures: u32) -> ReconciliationEvent {
        let now = DateTime::<Utc>::from_timestamp(1_000, 0).unwrap();
        for _ in 0..failures {
            event
                .retry
                .record_failure(now, Duration::from_secs(1), Duration::from_secs(300));
        }
        event
    }

    #[test]
    fn test_new_active_workflow_then_steady_state() {
        let registry = registry_with(&[]);
        let mut pending = PendingEvents::new();
        let declared = vec![metadata(1, WorkflowStatus::Active)];

        let events =
            generate_reconciliation_events(&registry, &mut pending, &declared, &Head::genesis())
                .unwrap();
        assert_eq!(kinds(&events), vec![(EventKind::WorkflowActivated, wid(1))]);
        assert!(pending.is_empty());

        registry.add(wid(1), Arc::new(IdleEngine)).unwrap();
        let events =
            generate_reconciliation_events(&registry, &mut pending, &declared, &Head::genesis())
                .unwrap();
        assert!(events.is_empty());
    }

    #[test]
    fn test_paused_workflow_with_engine() {
        let registry = registry_with(&[1]);
        let mut pending = PendingEvents::new();
        let declared = vec![metadata(1, WorkflowStatus::Paused)];

        let events =
            generate_reconciliation_events(&registry, &mut pending, &declared, &Head::genesis())
                .unwrap();
        assert_eq!(kinds(&events), vec![(EventKind::WorkflowPaused, wid(1))]);
    }

    #[test]
    fn test_deletes_precede_activations() {
        let registry = registry_with(&[2]);
        let mut pending = PendingEvents::new();
        let declared = vec![metadata(3, WorkflowStatus::Active)];

        let events =
            generate_reconciliation_events(&registry, &mut pending, &declared, &Head::genesis())
                .unwrap();
        assert_eq!(
            kinds(&events),
            vec![
                (EventKind::WorkflowDeleted, wid(2)),
                (EventKind::WorkflowActivated, wid(3)),
            ]
        );
    }

    #[test]
    fn test_id_rotation_orders_pause_before_activation() {
        // Old ID paused out, new ID activated in within one tick.
        let registry = registry_with(&[1]);
        let mut pending = PendingEvents::new();
        let declared = vec![
            metadata(2, WorkflowStatus::Active),
            metadata(1, WorkflowStatus::Paused),
        ];

        let events =
            generate_reconciliation_events(&registry, &mut pending, &declared, &Head::genesis())
                .unwrap();
        assert_eq!(
            kinds(&events),
            vec![
                (EventKind::WorkflowPaused, wid(1)),
                (EventKind::WorkflowActivated, wid(2)),
            ]
        );
    }

    #[test]
    fn test_matching_pending_event_is_reused() {
        let registry = registry_with(&[]);
        let declared = vec![metadata(1, WorkflowStatus::Active)];

        let mut pending = PendingEvents::new();
        let first =
            generate_reconciliation_events(&registry, &mut pending, &declared, &Head::genesis())
                .unwrap();
        let carried = failed(first[0].clone(), 3);
        pending.insert(carried.id, carried.clone());

        let head = Head {
            height: "42".to_string(),
            ..Default::default()
        };
        let events = generate_reconciliation_events(&registry, &mut pending, &declared, &head)
            .unwrap();

        assert_eq!(events.len(), 1);
        assert_eq!(events[0], carried);
        assert_eq!(events[0].retry_count(), 3);
        assert_eq!(events[0].event.head, Head::genesis());
        assert!(pending.is_empty());
    }

    #[test]
    fn test_pending_event_with_other_signature_is_replaced() {
        let registry = registry_with(&[1]);
        let mut pending = PendingEvents::new();
        // A failed deletion for a workflow that is now declared paused.
        let stale = failed(
            ReconciliationEvent::new(
                WorkflowEvent::deleted(wid(1)),
                Head::genesis(),
                deleted_signature(&wid(1)),
            ),
            2,
        );
        pending.insert(wid(1), stale);

        let declared = vec![metadata(1, WorkflowStatus::Paused)];
        let events =
            generate_reconciliation_events(&registry, &mut pending, &declared, &Head::genesis())
                .unwrap();

        assert_eq!(kinds(&events), vec![(EventKind::WorkflowPaused, wid(1))]);
        assert_eq!(events[0].retry_count(), 0);
        assert!(pending.is_empty());
    }

    #[test]
    fn test_reused_deletion_keeps_backoff_and_leads() {
        let registry = registry_with(&[1]);
        let mut pending = PendingEvents::new();
        let carried = failed(
            ReconciliationEvent::new(
                WorkflowEvent::deleted(wid(1)),
                Head::genesis(),
                deleted_signature(&wid(1)),
            ),
            1,
        );
        pending.insert(wid(1), carried.clone());

        let declared = vec![metadata(2, WorkflowStatus::Active)];
        let events =
            generate_reconciliation_events(&registry, &mut pending, &declared, &Head::genesis())
                .unwrap();

        assert_eq!(events[0], carried);
        assert_eq!(events[1].kind(), EventKind::WorkflowActivated);
    }

    #[test]
    fn test_pausing_a_failed_activation_clears_it() {
        let registry = registry_with(&[]);
        let mut pending = PendingEvents::new();
        let active = vec![metadata(1, WorkflowStatus::Active)];
        let events =
            generate_reconciliation_events(&registry, &mut pending, &active, &Head::genesis())
                .unwrap();
        pending.insert(wid(1), failed(events[0].clone(), 1));

        let paused = vec![metadata(1, WorkflowStatus::Paused)];
        let events =
            generate_reconciliation_events(&registry, &mut pending, &paused, &Head::genesis())
                .unwrap();

        assert!(events.is_empty());
        assert!(pending.is_empty());
    }

    #[test]
    fn test_abandoned_activation_is_dropped() {
        let registry = registry_with(&[]);
        let mut pending = PendingEvents::new();
        let active = vec![metadata(1, WorkflowStatus::Active)];
        let events =
            generate_reconciliation_events(&registry, &mut pending, &active, &Head::genesis())
                .unwrap();
        pending.insert(wid(1), failed(events[0].clone(), 1));

        let events =
            generate_reconciliation_events(&registry, &mut pending, &[], &Head::genesis())
                .unwrap();

        assert!(events.is_empty());
        assert!(pending.is_empty());
    }

    #[test]
    fn test_recovered_workflow_discards_pending_deletion() {
        let registry = registry_with(&[1]);
        let mut pending = PendingEvents::new();
        pending.insert(
            wid(1),
            ReconciliationEvent::new(
                WorkflowEvent::deleted(wid(1)),
                Head::genesis(),
                deleted_signature(&wid(1)),
            ),
        );

        let declared = vec![metadata(1, WorkflowStatus::Active)];
        let events =
            generate_reconciliation_events(&registry, &mut pending, &declared, &Head::genesis())
                .unwrap();

        assert!(events.is_empty());
        assert!(pending.is_empty());
    }

    #[test]
    fn test_unhandled_pending_residue_is_an_invariant_violation() {
        let registry = registry_with(&[]);
        let mut pending = PendingEvents::new();
        pending.insert(
            wid(9),
            ReconciliationEvent::new(
                WorkflowEvent::deleted(wid(9)),
                Head::genesis(),
                deleted_signature(&wid(9)),
            ),
        );

        let err = generate_reconciliation_events(&registry, &mut pending, &[], &Head::genesis())
            .unwrap_err();
        assert!(matches!(err, ReconcileError::InvariantViolation(_)));
        assert!(err.to_string().contains(&wid(9).to_hex()));
    }

    #[test]
    fn test_duplicate_metadata_yields_one_event() {
        let registry = registry_with(&[]);
        let mut pending = PendingEvents::new();
        let mut second = metadata(1, WorkflowStatus::Active);
        second.don_family = "family-b".to_string();
        let declared = vec![metadata(1, WorkflowStatus::Active), second];

        let events =
            generate_reconciliation_events(&registry, &mut pending, &declared, &Head::genesis())
                .unwrap();
        assert_eq!(events.len(), 1);
    }

    #[test]
    fn test_events_carry_the_read_head() {
        let registry = registry_with(&[]);
        let mut pending = PendingEvents::new();
        let head = Head {
            height: "77".to_string(),
            hash: "0xbeef".to_string(),
            timestamp: 5,
        };
        let events = generate_reconciliation_events(
            &registry,
            &mut pending,
            &[metadata(1, WorkflowStatus::Active)],
            &head,
        )
        .unwrap();
        assert_eq!(events[0].event.head, head);
    }
}
