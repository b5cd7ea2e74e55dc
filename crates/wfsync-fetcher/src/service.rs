//! Gateway-mediated fetcher service

use crate::config::{FetcherConfig, METHOD_WORKFLOW_SYNCER};
use crate::connector_handler::OutgoingConnectorHandler;
use crate::error::{FetchError, FetchResult};
use crate::fetcher::ArtifactFetcher;
use crate::gateway::{GatewayConnector, GatewayRequest, GatewayResponse};
use crate::storage::{DownloadArtifactRequest, StorageClient};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ServiceState {
    New,
    Started,
    Stopped,
}

/// Fetches workflow artifacts through the gateway network and resolves
/// storage-service download URLs.
pub struct FetcherService {
    connector: Option<Arc<dyn GatewayConnector>>,
    storage: Option<Arc<dyn StorageClient>>,
    config: FetcherConfig,
    handler: Mutex<Option<Arc<OutgoingConnectorHandler>>>,
    state: Mutex<ServiceState>,
}

impl FetcherService {
    pub fn new(
        connector: Option<Arc<dyn GatewayConnector>>,
        storage: Option<Arc<dyn StorageClient>>,
        config: FetcherConfig,
    ) -> Self {
        Self {
            connector,
            storage,
            config,
            handler: Mutex::new(None),
            state: Mutex::new(ServiceState::New),
        }
    }

    pub fn name(&self) -> &'static str {
        "FetcherService"
    }

    /// Start once: build the outgoing connector handler and register it.
    pub async fn start(&self) -> FetchResult<()> {
        {
            let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
            if *state != ServiceState::New {
                return Err(FetchError::AlreadyStarted);
            }
        }

        let connector = self.connector.clone().ok_or(FetchError::NoGatewayConnector)?;
        if self.storage.is_none() {
            return Err(FetchError::NoStorageClient);
        }

        let handler = Arc::new(
            OutgoingConnectorHandler::new(connector, &self.config, METHOD_WORKFLOW_SYNCER).await?,
        );
        handler.start().await?;

        *self.handler.lock().unwrap_or_else(|e| e.into_inner()) = Some(handler);
        *self.state.lock().unwrap_or_else(|e| e.into_inner()) = ServiceState::Started;
        tracing::info!(service = self.name(), "Fetcher service started");
        Ok(())
    }

    pub fn close(&self) -> FetchResult<()> {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if *state != ServiceState::Started {
            return Err(FetchError::NotStarted);
        }
        if let Some(handler) = self.handler.lock().unwrap_or_else(|e| e.into_inner()).take() {
            handler.close();
        }
        *state = ServiceState::Stopped;
        Ok(())
    }

    pub fn ready(&self) -> FetchResult<()> {
        match *self.state.lock().unwrap_or_else(|e| e.into_inner()) {
            ServiceState::Started => Ok(()),
            _ => Err(FetchError::NotStarted),
        }
    }

    pub fn health_report(&self) -> HashMap<String, String> {
        let mut report = HashMap::new();
        if let Err(e) = self.ready() {
            report.insert(self.name().to_string(), e.to_string());
        }
        report
    }

    /// The running handler, for connectors that route inbound messages.
    pub fn connector_handler(&self) -> Option<Arc<OutgoingConnectorHandler>> {
        self.handler
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Ask the storage service for an ephemeral download URL.
    pub async fn retrieve_url(
        &self,
        cancel: &CancellationToken,
        request: &DownloadArtifactRequest,
    ) -> FetchResult<String> {
        if request.id.is_empty() {
            return Err(FetchError::EmptyStorageRequest);
        }
        let storage = self.storage.as_ref().ok_or(FetchError::NoStorageClient)?;

        let response = tokio::select! {
            _ = cancel.cancelled() => return Err(FetchError::Cancelled),
            response = storage.download_artifact(request) => response?,
        };

        tracing::debug!(
            id = %request.id,
            artifact_type = %request.artifact_type,
            expiry = ?response.expiry,
            "Received response from storage service"
        );
        Ok(response.url)
    }

    /// Relay `request` through a gateway and return the response body.
    ///
    /// A non-2xx status is an error that still carries the body.
    pub async fn fetch(
        &self,
        cancel: &CancellationToken,
        message_id: &str,
        request: &GatewayRequest,
    ) -> FetchResult<Vec<u8>> {
        if request.workflow_id.is_empty() {
            return Err(FetchError::MissingWorkflowId);
        }
        let handler = self.connector_handler().ok_or(FetchError::NotStarted)?;

        let message = handler
            .handle_single_node_request(cancel, message_id, request)
            .await?;
        message.validate()?;

        tracing::debug!(
            don_id = %message.body.don_id,
            message_id = %message.body.message_id,
            receiver = %message.body.receiver,
            sender = %message.body.sender,
            "Received gateway response"
        );

        let payload: GatewayResponse = serde_json::from_value(message.body.payload)
            .map_err(|e| FetchError::InvalidPayload(e.to_string()))?;
        payload.validate()?;

        if payload.execution_error {
            return Err(FetchError::Execution(payload.error_message));
        }

        if !(200..300).contains(&payload.status_code) {
            // Redirects are not followed.
            return Err(FetchError::RequestFailed {
                status: payload.status_code,
                body: payload.body,
            });
        }

        Ok(payload.body)
    }
}

#[async_trait]
impl ArtifactFetcher for FetcherService {
    async fn fetch(
        &self,
        cancel: &CancellationToken,
        message_id: &str,
        request: &GatewayRequest,
    ) -> FetchResult<Vec<u8>> {
        FetcherService::fetch(self, cancel, message_id, request).await
    }
}
