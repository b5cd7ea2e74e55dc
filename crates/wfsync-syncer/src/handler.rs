//! Applies workflow transitions to the spec store and the engine registry
//!
//! Every path is idempotent: handling the same event again after a partial
//! failure converges to the same state. Activation syncs the persisted spec
//! first and the running engine second; teardown closes the engine, then
//! deletes the spec, then releases the registry entry, so an interrupted
//! teardown can always be retried.

use crate::artifacts::ArtifactStore;
use crate::clock::{Clock, SystemClock};
use crate::config::HandlerConfig;
use crate::error::HandlerError;
use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;
use wfsync_registry::{close_all, Engine, EngineError, EngineRegistry};
use wfsync_types::{
    RegistryEvent, SpecStatus, WorkflowEvent, WorkflowId, WorkflowMetadataView, WorkflowSpec,
};

type Result<T> = std::result::Result<T, HandlerError>;

/// Spec type recorded for every workflow handled here
pub const SPEC_TYPE_WASM: &str = "wasm";

/// What the controller needs from an event consumer.
#[async_trait]
pub trait EventSink: Send + Sync {
    async fn handle(&self, cancel: &CancellationToken, event: &RegistryEvent) -> Result<()>;

    async fn close(&self) -> Result<()>;
}

/// Everything an engine is built from
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineRequest {
    pub workflow_id: WorkflowId,
    /// Owner address, hex without prefix
    pub owner: String,
    pub name: String,
    pub tag: String,
    pub config: Vec<u8>,
    pub binary: Vec<u8>,
}

/// Builds engines; what an engine runs is up to the implementation.
#[async_trait]
pub trait EngineFactory: Send + Sync {
    async fn create(
        &self,
        cancel: &CancellationToken,
        request: EngineRequest,
    ) -> std::result::Result<Arc<dyn Engine>, EngineError>;
}

/// The local node as seen by the capability registry
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LocalNode {
    pub peer_id: String,
}

#[derive(Debug, Error)]
#[error("capabilities registry not ready: {0}")]
pub struct NotReady(pub String);

#[async_trait]
pub trait CapabilityRegistry: Send + Sync {
    /// Succeeds once the registry has synced the local node.
    async fn local_node(&self) -> std::result::Result<LocalNode, NotReady>;
}

#[derive(Debug, Error)]
#[error("failed to resolve organization: {0}")]
pub struct OrgResolveError(pub String);

/// Maps a workflow owner to the organization it belongs to.
#[async_trait]
pub trait OrgResolver: Send + Sync {
    async fn get(&self, owner: &str) -> std::result::Result<String, OrgResolveError>;
}

/// The production [`EventSink`].
pub struct EventHandler {
    config: HandlerConfig,
    registry: Arc<EngineRegistry>,
    artifacts: Arc<dyn ArtifactStore>,
    engine_factory: Arc<dyn EngineFactory>,
    cap_registry: Arc<dyn CapabilityRegistry>,
    org_resolver: Option<Arc<dyn OrgResolver>>,
    clock: Arc<dyn Clock>,
}

impl EventHandler {
    pub fn new(
        config: HandlerConfig,
        registry: Arc<EngineRegistry>,
        artifacts: Arc<dyn ArtifactStore>,
        engine_factory: Arc<dyn EngineFactory>,
        cap_registry: Arc<dyn CapabilityRegistry>,
    ) -> Self {
        Self {
            config,
            registry,
            artifacts,
            engine_factory,
            cap_registry,
            org_resolver: None,
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_org_resolver(mut self, resolver: Arc<dyn OrgResolver>) -> Self {
        self.org_resolver = Some(resolver);
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn engine_registry(&self) -> &Arc<EngineRegistry> {
        &self.registry
    }

    /// Organization of `owner`, or empty when it cannot be resolved.
    async fn fetch_organization_id(&self, owner: &str) -> String {
        let Some(resolver) = &self.org_resolver else {
            return String::new();
        };
        match resolver.get(owner).await {
            Ok(org_id) if !org_id.is_empty() => org_id,
            Ok(_) => {
                tracing::warn!(workflow_owner = %owner, "No organization ID returned from org resolver");
                String::new()
            }
            Err(e) => {
                tracing::warn!(
                    workflow_owner = %owner,
                    error = %e,
                    "Failed to get organization from linking service"
                );
                String::new()
            }
        }
    }

    async fn labels(&self, event: &RegistryEvent) -> EventLabels {
        let (name, owner, tag) = match &event.event {
            WorkflowEvent::Registered(e) => workflow_labels(&e.workflow),
            WorkflowEvent::Activated(e) => workflow_labels(&e.workflow),
            WorkflowEvent::Paused(e) => workflow_labels(&e.workflow),
            WorkflowEvent::Deleted(e) => match self.artifacts.get_spec(&e.workflow_id).await {
                Ok(Some(spec)) => (spec.workflow_name, spec.workflow_owner, spec.workflow_tag),
                Ok(None) | Err(_) => {
                    tracing::warn!(
                        workflow_id = %e.workflow_id,
                        "Workflow spec not found during deletion, proceeding without org info"
                    );
                    Default::default()
                }
            },
        };
        let org_id = if owner.is_empty() {
            String::new()
        } else {
            self.fetch_organization_id(&owner).await
        };
        EventLabels {
            name,
            owner,
            tag,
            org_id,
        }
    }

    async fn dispatch(&self, cancel: &CancellationToken, event: &RegistryEvent) -> Result<()> {
        match &event.event {
            WorkflowEvent::Registered(e) => self.workflow_registered(cancel, &e.workflow).await,
            WorkflowEvent::Activated(e) => self.workflow_registered(cancel, &e.workflow).await,
            WorkflowEvent::Paused(e) => self.workflow_deleted(&e.workflow.workflow_id).await,
            WorkflowEvent::Deleted(e) => self.workflow_deleted(&e.workflow_id).await,
        }
    }

    /// Sync the spec, then make the engine match its status.
    async fn workflow_registered(
        &self,
        cancel: &CancellationToken,
        workflow: &WorkflowMetadataView,
    ) -> Result<()> {
        let id = workflow.workflow_id;
        let status = SpecStatus::from(workflow.status);

        let spec = match self.artifacts.get_spec(&id).await? {
            Some(mut spec) if spec.workflow_id == id => {
                if spec.status != status {
                    spec.status = status;
                    spec.updated_at = self.clock.now();
                    self.artifacts.upsert_spec(spec.clone()).await?;
                }
                spec
            }
            _ => self.create_workflow_spec(cancel, workflow).await?,
        };

        if spec.status != SpecStatus::Active {
            return self.try_engine_cleanup(&id).await;
        }

        if let Some(engine) = self.registry.get(&id)? {
            if engine.ready().is_ok() {
                return Ok(());
            }
        }

        self.try_engine_cleanup(&id).await?;
        self.try_engine_create(cancel, &spec).await
    }

    async fn create_workflow_spec(
        &self,
        cancel: &CancellationToken,
        workflow: &WorkflowMetadataView,
    ) -> Result<WorkflowSpec> {
        let (binary, config) = self
            .artifacts
            .fetch_artifacts(
                cancel,
                &workflow.workflow_id,
                &workflow.binary_url,
                &workflow.config_url,
            )
            .await?;

        let now = self.clock.now();
        let spec = WorkflowSpec {
            workflow_id: workflow.workflow_id,
            workflow_owner: workflow.owner_hex(),
            workflow_name: workflow.workflow_name.clone(),
            workflow_tag: workflow.tag.clone(),
            status: SpecStatus::from(workflow.status),
            binary,
            config,
            binary_url: workflow.binary_url.clone(),
            config_url: workflow.config_url.clone(),
            spec_type: SPEC_TYPE_WASM.to_string(),
            created_at: now,
            updated_at: now,
        };
        self.artifacts.upsert_spec(spec.clone()).await?;
        Ok(spec)
    }

    /// Close the engine, delete the spec, release the registry entry.
    async fn workflow_deleted(&self, id: &WorkflowId) -> Result<()> {
        // The spec must outlive the engine's shutdown.
        if let Some(engine) = self.registry.get(id)? {
            engine.close().await.map_err(HandlerError::EngineClose)?;
        }

        self.artifacts.delete_spec(id).await?;

        match self.registry.pop(id) {
            Ok(_) => Ok(()),
            Err(e) if e.is_not_found() => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Stop and forget the engine for `id`, if any.
    async fn try_engine_cleanup(&self, id: &WorkflowId) -> Result<()> {
        if let Some(engine) = self.registry.get(id)? {
            engine.close().await.map_err(HandlerError::EngineClose)?;
            self.registry.pop(id)?;
        }
        Ok(())
    }

    async fn try_engine_create(&self, cancel: &CancellationToken, spec: &WorkflowSpec) -> Result<()> {
        self.ensure_cap_registry_ready(cancel).await?;

        let owner = hex::decode(spec.workflow_owner.trim_start_matches("0x"))
            .map_err(|e| HandlerError::InvalidOwner(e.to_string()))?;
        let computed = WorkflowId::generate(
            &owner,
            &spec.workflow_name,
            &spec.binary,
            &spec.config,
            "",
        );
        if computed != spec.workflow_id {
            return Err(HandlerError::WorkflowIdMismatch {
                computed,
                expected: spec.workflow_id,
            });
        }
        if spec.workflow_name.is_empty() {
            return Err(HandlerError::InvalidWorkflowName(spec.workflow_name.clone()));
        }

        let request = EngineRequest {
            workflow_id: spec.workflow_id,
            owner: spec.workflow_owner.clone(),
            name: spec.workflow_name.clone(),
            tag: spec.workflow_tag.clone(),
            config: spec.config.clone(),
            binary: spec.binary.clone(),
        };
        let engine = self
            .engine_factory
            .create(cancel, request)
            .await
            .map_err(HandlerError::EngineCreate)?;

        engine.start().await.map_err(HandlerError::EngineStart)?;

        if let Err(add_err) = self.registry.add(spec.workflow_id, engine.clone()) {
            // Events for one workflow are dispatched serially, so this is a bug.
            tracing::error!(workflow_id = %spec.workflow_id, error = %add_err, "Engine registry add failed");
            if let Err(close_err) = engine.close().await {
                return Err(HandlerError::InvariantViolation(format!(
                    "failed to close workflow engine: {close_err} during {add_err}"
                )));
            }
            return Err(HandlerError::InvariantViolation(add_err.to_string()));
        }

        tracing::info!(
            workflow_id = %spec.workflow_id,
            workflow_name = %spec.workflow_name,
            "Workflow engine started"
        );
        Ok(())
    }

    /// Poll the capability registry until it answers or `cancel` fires.
    async fn ensure_cap_registry_ready(&self, cancel: &CancellationToken) -> Result<()> {
        let poll_interval = self.config.readiness_poll_interval();
        loop {
            if cancel.is_cancelled() {
                return Err(HandlerError::Cancelled);
            }
            match self.cap_registry.local_node().await {
                Ok(_) => return Ok(()),
                Err(e) => {
                    tracing::debug!(error = %e, "Waiting for capabilities registry");
                }
            }
            tokio::select! {
                _ = cancel.cancelled() => return Err(HandlerError::Cancelled),
                _ = tokio::time::sleep(poll_interval) => {}
            }
        }
    }
}

#[async_trait]
impl EventSink for EventHandler {
    async fn handle(&self, cancel: &CancellationToken, event: &RegistryEvent) -> Result<()> {
        let workflow_id = event.workflow_id();
        let labels = self.labels(event).await;
        let span = tracing::info_span!(
            "workflow_event",
            kind = %event.kind(),
            workflow_id = %workflow_id,
            workflow_name = %labels.name,
            workflow_owner = %labels.owner,
            workflow_tag = %labels.tag,
            org_id = %labels.org_id,
            registry_address = %self.config.workflow_registry_address,
            chain_selector = self.config.chain_selector,
            height = %event.head.height,
        );

        async {
            self.dispatch(cancel, event).await?;
            tracing::debug!("Handled event");
            Ok(())
        }
        .instrument(span)
        .await
    }

    async fn close(&self) -> Result<()> {
        let entries = self.registry.pop_all()?;
        close_all(entries.into_iter().map(|entry| entry.engine))
            .await
            .map_err(HandlerError::EngineClose)
    }
}

struct EventLabels {
    name: String,
    owner: String,
    tag: String,
    org_id: String,
}

fn workflow_labels(workflow: &WorkflowMetadataView) -> (String, String, String) {
    (
        workflow.workflow_name.clone(),
        workflow.owner_hex(),
        workflow.tag.clone(),
    )
}
