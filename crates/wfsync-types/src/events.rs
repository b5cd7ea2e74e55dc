//! Workflow lifecycle transitions

use crate::ids::WorkflowId;
use crate::ledger::Head;
use crate::workflow::WorkflowMetadataView;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Kind of a workflow transition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventKind {
    WorkflowRegistered,
    WorkflowActivated,
    WorkflowPaused,
    WorkflowDeleted,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::WorkflowRegistered => "WorkflowRegistered",
            EventKind::WorkflowActivated => "WorkflowActivated",
            EventKind::WorkflowPaused => "WorkflowPaused",
            EventKind::WorkflowDeleted => "WorkflowDeleted",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A workflow appeared on the ledger
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowRegisteredEvent {
    pub workflow: WorkflowMetadataView,
}

/// A workflow should be running on this node
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowActivatedEvent {
    pub workflow: WorkflowMetadataView,
}

/// A running workflow was paused on the ledger
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowPausedEvent {
    pub workflow: WorkflowMetadataView,
}

/// A running workflow is no longer declared for this node
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowDeletedEvent {
    pub workflow_id: WorkflowId,
}

/// Typed workflow transition
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "payload")]
pub enum WorkflowEvent {
    Registered(WorkflowRegisteredEvent),
    Activated(WorkflowActivatedEvent),
    Paused(WorkflowPausedEvent),
    Deleted(WorkflowDeletedEvent),
}

impl WorkflowEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            WorkflowEvent::Registered(_) => EventKind::WorkflowRegistered,
            WorkflowEvent::Activated(_) => EventKind::WorkflowActivated,
            WorkflowEvent::Paused(_) => EventKind::WorkflowPaused,
            WorkflowEvent::Deleted(_) => EventKind::WorkflowDeleted,
        }
    }

    pub fn workflow_id(&self) -> WorkflowId {
        match self {
            WorkflowEvent::Registered(e) => e.workflow.workflow_id,
            WorkflowEvent::Activated(e) => e.workflow.workflow_id,
            WorkflowEvent::Paused(e) => e.workflow.workflow_id,
            WorkflowEvent::Deleted(e) => e.workflow_id,
        }
    }

    pub fn activated(workflow: WorkflowMetadataView) -> Self {
        WorkflowEvent::Activated(WorkflowActivatedEvent { workflow })
    }

    pub fn paused(workflow: WorkflowMetadataView) -> Self {
        WorkflowEvent::Paused(WorkflowPausedEvent { workflow })
    }

    pub fn deleted(workflow_id: WorkflowId) -> Self {
        WorkflowEvent::Deleted(WorkflowDeletedEvent { workflow_id })
    }
}

/// A transition together with the ledger head it was derived at
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryEvent {
    pub head: Head,
    pub event: WorkflowEvent,
}

impl RegistryEvent {
    pub fn new(event: WorkflowEvent, head: Head) -> Self {
        Self { head, event }
    }

    pub fn kind(&self) -> EventKind {
        self.event.kind()
    }

    pub fn workflow_id(&self) -> WorkflowId {
        self.event.workflow_id()
    }
}
