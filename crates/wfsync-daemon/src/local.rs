//! Local stand-ins for the collaborators a production node provides
//!
//! - [`FileLedgerReader`] answers registry reads from a JSON snapshot on disk
//! - [`LoggingEngineFactory`] builds engines that only log their lifecycle
//! - [`LocalCapabilityRegistry`] is ready immediately

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use wfsync_registry::{Engine, EngineError, HealthReport};
use wfsync_syncer::config::{
    GET_ACTIVE_ALLOWLISTED_REQUESTS_REVERSE, GET_WORKFLOW_LIST_BY_DON, TOTAL_ALLOWLISTED_REQUESTS,
};
use wfsync_syncer::ledger::{
    AllowlistedRequestsParams, AllowlistedRequestsResponse, GetWorkflowListParams,
    WorkflowListResponse,
};
use wfsync_syncer::{
    CapabilityRegistry, Confidence, ContractBinding, EngineFactory, EngineRequest, LedgerError,
    LedgerReader, LedgerReaderFactory, LocalNode, NotReady, ReadIdentifier,
};
use wfsync_types::{AllowlistedRequest, Head, WorkflowId, WorkflowMetadataView};

/// Contents of the ledger snapshot file
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerSnapshot {
    #[serde(default)]
    pub height: u64,

    #[serde(default)]
    pub workflows: Vec<WorkflowMetadataView>,

    /// Indexed by insertion order, oldest first
    #[serde(default)]
    pub allowlisted_requests: Vec<AllowlistedRequest>,
}

/// Serves workflow registry reads from a snapshot file re-read on every query.
#[derive(Debug, Clone)]
pub struct FileLedgerReader {
    path: PathBuf,
}

impl FileLedgerReader {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn snapshot(&self) -> Result<LedgerSnapshot, LedgerError> {
        let data = tokio::fs::read(&self.path).await.map_err(|e| {
            LedgerError::Unavailable(format!("{}: {e}", self.path.display()))
        })?;
        serde_json::from_slice(&data).map_err(|source| LedgerError::Decode {
            identifier: self.path.display().to_string(),
            source,
        })
    }
}

#[async_trait]
impl LedgerReader for FileLedgerReader {
    async fn query(
        &self,
        identifier: &ReadIdentifier,
        _confidence: Confidence,
        params: serde_json::Value,
    ) -> Result<(serde_json::Value, Head), LedgerError> {
        let snapshot = self.snapshot().await?;
        let head = Head {
            height: snapshot.height.to_string(),
            ..Default::default()
        };

        let value = match identifier.method.as_str() {
            GET_WORKFLOW_LIST_BY_DON => {
                let params: GetWorkflowListParams = serde_json::from_value(params)?;
                let list = snapshot
                    .workflows
                    .into_iter()
                    .filter(|wf| wf.don_family == params.don_family)
                    .skip(usize::try_from(params.start).unwrap_or(usize::MAX))
                    .take(usize::try_from(params.limit).unwrap_or(usize::MAX))
                    .collect();
                serde_json::to_value(WorkflowListResponse { list })?
            }
            TOTAL_ALLOWLISTED_REQUESTS => {
                serde_json::to_value(snapshot.allowlisted_requests.len() as u64)?
            }
            GET_ACTIVE_ALLOWLISTED_REQUESTS_REVERSE => {
                let params: AllowlistedRequestsParams = serde_json::from_value(params)?;
                let allowlisted_requests = snapshot
                    .allowlisted_requests
                    .into_iter()
                    .enumerate()
                    .filter(|(index, _)| {
                        let index = *index as u64;
                        index >= params.start_index && index <= params.end_index
                    })
                    .map(|(_, request)| request)
                    .collect();
                serde_json::to_value(AllowlistedRequestsResponse {
                    allowlisted_requests,
                    search_complete: params.start_index == 0,
                })?
            }
            other => {
                return Err(LedgerError::Query {
                    identifier: identifier.to_string(),
                    reason: format!("method {other} is not served by the file ledger"),
                })
            }
        };

        Ok((value, head))
    }
}

/// Hands out a [`FileLedgerReader`] once the snapshot file exists.
#[derive(Debug, Clone)]
pub struct FileLedgerReaderFactory {
    path: PathBuf,
}

impl FileLedgerReaderFactory {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl LedgerReaderFactory for FileLedgerReaderFactory {
    async fn new_reader(
        &self,
        binding: &ContractBinding,
    ) -> Result<Arc<dyn LedgerReader>, LedgerError> {
        let exists = tokio::fs::try_exists(&self.path)
            .await
            .map_err(|e| LedgerError::Unavailable(e.to_string()))?;
        if !exists {
            return Err(LedgerError::Unavailable(format!(
                "ledger snapshot {} does not exist",
                self.path.display()
            )));
        }

        tracing::info!(
            path = %self.path.display(),
            contract = %binding.name,
            address = %binding.address,
            "Serving workflow registry from file"
        );
        Ok(Arc::new(FileLedgerReader::new(self.path.clone())))
    }
}

/// Engine that logs instead of executing anything
#[derive(Debug)]
pub struct LoggingEngine {
    workflow_id: WorkflowId,
    name: String,
    binary_len: usize,
    running: AtomicBool,
}

#[async_trait]
impl Engine for LoggingEngine {
    fn name(&self) -> String {
        format!("{}-{}", self.name, self.workflow_id)
    }

    async fn start(&self) -> Result<(), EngineError> {
        self.running.store(true, Ordering::SeqCst);
        tracing::info!(
            workflow_id = %self.workflow_id,
            workflow_name = %self.name,
            binary_len = self.binary_len,
            "Engine started"
        );
        Ok(())
    }

    async fn close(&self) -> Result<(), EngineError> {
        self.running.store(false, Ordering::SeqCst);
        tracing::info!(workflow_id = %self.workflow_id, "Engine closed");
        Ok(())
    }

    fn ready(&self) -> Result<(), EngineError> {
        if self.running.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(EngineError::NotReady(format!("{} is not running", self.name())))
        }
    }

    fn health_report(&self) -> HealthReport {
        let status = match self.ready() {
            Ok(()) => "ok".to_string(),
            Err(e) => e.to_string(),
        };
        HealthReport::from([(self.name(), status)])
    }
}

/// Builds [`LoggingEngine`]s
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingEngineFactory;

#[async_trait]
impl EngineFactory for LoggingEngineFactory {
    async fn create(
        &self,
        _cancel: &CancellationToken,
        request: EngineRequest,
    ) -> Result<Arc<dyn Engine>, EngineError> {
        if request.binary.is_empty() {
            return Err(EngineError::Create("workflow binary is empty".into()));
        }
        Ok(Arc::new(LoggingEngine {
            workflow_id: request.workflow_id,
            name: request.name,
            binary_len: request.binary.len(),
            running: AtomicBool::new(false),
        }))
    }
}

/// Capability registry of a single local node
#[derive(Debug, Clone)]
pub struct LocalCapabilityRegistry {
    peer_id: String,
}

impl LocalCapabilityRegistry {
    pub fn new(peer_id: impl Into<String>) -> Self {
        Self {
            peer_id: peer_id.into(),
        }
    }
}

#[async_trait]
impl CapabilityRegistry for LocalCapabilityRegistry {
    async fn local_node(&self) -> Result<LocalNode, NotReady> {
        Ok(LocalNode {
            peer_id: self.peer_id.clone(),
        })
    }
}
