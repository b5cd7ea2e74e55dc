//! Workflow artifacts and the persisted spec projection

use crate::error::ArtifactError;
use async_trait::async_trait;
use base64::Engine as _;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use url::Url;
use wfsync_fetcher::{
    ArtifactFetcher, ArtifactType, DownloadArtifactRequest, FetchResult, FetcherService,
    GatewayRequest,
};
use wfsync_types::{WorkflowId, WorkflowSpec};

/// Artifact materialization plus the spec store the handler owns.
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    /// Download and decode a workflow's binary and config.
    async fn fetch_artifacts(
        &self,
        cancel: &CancellationToken,
        workflow_id: &WorkflowId,
        binary_url: &str,
        config_url: &str,
    ) -> Result<(Vec<u8>, Vec<u8>), ArtifactError>;

    async fn get_spec(&self, workflow_id: &WorkflowId)
        -> Result<Option<WorkflowSpec>, ArtifactError>;

    async fn upsert_spec(&self, spec: WorkflowSpec) -> Result<(), ArtifactError>;

    /// Deleting a missing spec is not an error.
    async fn delete_spec(&self, workflow_id: &WorkflowId) -> Result<(), ArtifactError>;
}

/// Source of ephemeral download URLs for artifacts kept by the storage service.
#[async_trait]
pub trait UrlRetriever: Send + Sync {
    async fn retrieve_url(
        &self,
        cancel: &CancellationToken,
        request: &DownloadArtifactRequest,
    ) -> FetchResult<String>;
}

#[async_trait]
impl UrlRetriever for FetcherService {
    async fn retrieve_url(
        &self,
        cancel: &CancellationToken,
        request: &DownloadArtifactRequest,
    ) -> FetchResult<String> {
        FetcherService::retrieve_url(self, cancel, request).await
    }
}

/// Size limits applied to downloaded artifacts
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArtifactLimits {
    #[serde(default = "default_max_binary_size_bytes")]
    pub max_binary_size_bytes: u32,

    #[serde(default = "default_max_config_size_bytes")]
    pub max_config_size_bytes: u32,
}

fn default_max_binary_size_bytes() -> u32 {
    20 * 1024 * 1024
}

fn default_max_config_size_bytes() -> u32 {
    1024 * 1024
}

impl Default for ArtifactLimits {
    fn default() -> Self {
        Self {
            max_binary_size_bytes: default_max_binary_size_bytes(),
            max_config_size_bytes: default_max_config_size_bytes(),
        }
    }
}

struct StorageRoute {
    retriever: Arc<dyn UrlRetriever>,
    host: String,
}

/// [`ArtifactStore`] backed by an [`ArtifactFetcher`] and an in-memory spec table.
///
/// URLs pointing at the storage service host are exchanged for signed
/// download URLs first; any other URL is fetched as is. Binaries arrive
/// base64-encoded.
pub struct FetchingArtifactStore {
    fetcher: Arc<dyn ArtifactFetcher>,
    storage: Option<StorageRoute>,
    limits: ArtifactLimits,
    specs: DashMap<WorkflowId, WorkflowSpec>,
}

impl FetchingArtifactStore {
    pub fn new(fetcher: Arc<dyn ArtifactFetcher>) -> Self {
        Self {
            fetcher,
            storage: None,
            limits: ArtifactLimits::default(),
            specs: DashMap::new(),
        }
    }

    /// Route URLs on `host` through the storage service.
    pub fn with_storage(
        mut self,
        retriever: Arc<dyn UrlRetriever>,
        host: impl Into<String>,
    ) -> Self {
        self.storage = Some(StorageRoute {
            retriever,
            host: host.into(),
        });
        self
    }

    pub fn with_limits(mut self, limits: ArtifactLimits) -> Self {
        self.limits = limits;
        self
    }

    pub fn spec_count(&self) -> usize {
        self.specs.len()
    }

    async fn resolve_url(
        &self,
        cancel: &CancellationToken,
        workflow_id: &WorkflowId,
        url: &str,
        artifact_type: ArtifactType,
    ) -> Result<String, ArtifactError> {
        let Some(route) = &self.storage else {
            return Ok(url.to_string());
        };
        let on_storage_host = Url::parse(url)
            .ok()
            .and_then(|parsed| parsed.host_str().map(|host| host == route.host))
            .unwrap_or(false);
        if !on_storage_host {
            return Ok(url.to_string());
        }

        let request = DownloadArtifactRequest {
            id: workflow_id.to_hex(),
            artifact_type,
        };
        Ok(route.retriever.retrieve_url(cancel, &request).await?)
    }

    async fn download(
        &self,
        cancel: &CancellationToken,
        workflow_id: &WorkflowId,
        url: &str,
        artifact: &'static str,
        limit: u32,
    ) -> Result<Vec<u8>, ArtifactError> {
        let request = GatewayRequest {
            max_response_bytes: limit,
            ..GatewayRequest::get(url, workflow_id.to_hex())
        };
        let data = self
            .fetcher
            .fetch(cancel, &message_id(url, workflow_id), &request)
            .await?;
        if data.len() > limit as usize {
            return Err(ArtifactError::TooLarge {
                artifact,
                size: data.len(),
                limit,
            });
        }
        Ok(data)
    }
}

#[async_trait]
impl ArtifactStore for FetchingArtifactStore {
    async fn fetch_artifacts(
        &self,
        cancel: &CancellationToken,
        workflow_id: &WorkflowId,
        binary_url: &str,
        config_url: &str,
    ) -> Result<(Vec<u8>, Vec<u8>), ArtifactError> {
        if let Some(spec) = self.specs.get(workflow_id) {
            return Ok((spec.binary.clone(), spec.config.clone()));
        }

        let url = self
            .resolve_url(cancel, workflow_id, binary_url, ArtifactType::Binary)
            .await?;
        let encoded = self
            .download(
                cancel,
                workflow_id,
                &url,
                "binary",
                self.limits.max_binary_size_bytes,
            )
            .await?;
        let binary = base64::engine::general_purpose::STANDARD
            .decode(String::from_utf8_lossy(&encoded).trim())
            .map_err(|e| ArtifactError::Decode(e.to_string()))?;

        let config = if config_url.is_empty() {
            Vec::new()
        } else {
            let url = self
                .resolve_url(cancel, workflow_id, config_url, ArtifactType::Config)
                .await?;
            self.download(
                cancel,
                workflow_id,
                &url,
                "config",
                self.limits.max_config_size_bytes,
            )
            .await?
        };

        tracing::debug!(
            workflow_id = %workflow_id,
            binary_len = binary.len(),
            config_len = config.len(),
            "Fetched workflow artifacts"
        );
        Ok((binary, config))
    }

    async fn get_spec(
        &self,
        workflow_id: &WorkflowId,
    ) -> Result<Option<WorkflowSpec>, ArtifactError> {
        Ok(self.specs.get(workflow_id).map(|spec| spec.value().clone()))
    }

    async fn upsert_spec(&self, spec: WorkflowSpec) -> Result<(), ArtifactError> {
        self.specs.insert(spec.workflow_id, spec);
        Ok(())
    }

    async fn delete_spec(&self, workflow_id: &WorkflowId) -> Result<(), ArtifactError> {
        if self.specs.remove(workflow_id).is_none() {
            tracing::warn!(workflow_id = %workflow_id, "Workflow spec to delete not found");
        }
        Ok(())
    }
}

/// Stable message ID for fetching `url` on behalf of `workflow_id`.
fn message_id(url: &str, workflow_id: &WorkflowId) -> String {
    let mut hasher = Sha256::new();
    hasher.update(url.as_bytes());
    hasher.update(workflow_id.to_hex().as_bytes());
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::collections::HashMap;
    use std::sync::Mutex;
    use wfsync_fetcher::FetchError;
    use wfsync_types::SpecStatus;

    #[derive(Default)]
    struct MapFetcher {
        content: HashMap<String, Vec<u8>>,
        requests: Mutex<Vec<GatewayRequest>>,
    }

    impl MapFetcher {
        fn with(entries: Vec<(&str, Vec<u8>)>) -> Self {
            Self {
                content: entries
                    .into_iter()
                    .map(|(url, data)| (url.to_string(), data))
                    .collect(),
                requests: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl ArtifactFetcher for MapFetcher {
        async fn fetch(
            &self,
            cancel: &CancellationToken,
            _message_id: &str,
            request: &GatewayRequest,
        ) -> FetchResult<Vec<u8>> {
            if cancel.is_cancelled() {
                return Err(FetchError::Cancelled);
            }
            self.requests.lock().unwrap().push(request.clone());
            self.content
                .get(&request.url)
                .cloned()
                .ok_or(FetchError::HttpStatus(404))
        }
    }

    struct SigningRetriever;

    #[async_trait]
    impl UrlRetriever for SigningRetriever {
        async fn retrieve_url(
            &self,
            _cancel: &CancellationToken,
            request: &DownloadArtifactRequest,
        ) -> FetchResult<String> {
            Ok(format!(
                "https://signed.example/{}/{}",
                request.artifact_type, request.id
            ))
        }
    }

    fn wid() -> WorkflowId {
        WorkflowId::new([7; 32])
    }

    fn encoded(data: &[u8]) -> Vec<u8> {
        base64::engine::general_purpose::STANDARD
            .encode(data)
            .into_bytes()
    }

    fn spec(id: WorkflowId) -> WorkflowSpec {
        WorkflowSpec {
            workflow_id: id,
            workflow_owner: "aa".to_string(),
            workflow_name: "wf".to_string(),
            workflow_tag: String::new(),
            status: SpecStatus::Active,
            binary: b"stored".to_vec(),
            config: b"stored-config".to_vec(),
            binary_url: String::new(),
            config_url: String::new(),
            spec_type: "wasm".to_string(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_direct_urls_are_fetched_and_binary_decoded() {
        let binary = encoded(b"\0asm");
        let fetcher = Arc::new(MapFetcher::with(vec![
            ("file:///wf/bin", binary),
            ("file:///wf/cfg", b"threshold: 3".to_vec()),
        ]));
        let store = FetchingArtifactStore::new(fetcher.clone());

        let (binary, config) = store
            .fetch_artifacts(&CancellationToken::new(), &wid(), "file:///wf/bin", "file:///wf/cfg")
            .await
            .unwrap();

        assert_eq!(binary, b"\0asm");
        assert_eq!(config, b"threshold: 3");
        let requests = fetcher.requests.lock().unwrap();
        assert_eq!(requests[0].workflow_id, wid().to_hex());
        assert_eq!(requests[0].max_response_bytes, default_max_binary_size_bytes());
        assert_eq!(requests[1].max_response_bytes, default_max_config_size_bytes());
    }

    #[tokio::test]
    async fn test_empty_config_url_yields_empty_config() {
        let binary = encoded(b"bin");
        let fetcher = Arc::new(MapFetcher::with(vec![("file:///wf/bin", binary)]));
        let store = FetchingArtifactStore::new(fetcher.clone());

        let (_, config) = store
            .fetch_artifacts(&CancellationToken::new(), &wid(), "file:///wf/bin", "")
            .await
            .unwrap();

        assert!(config.is_empty());
        assert_eq!(fetcher.requests.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_storage_host_urls_are_signed_first() {
        let signed_binary = format!("https://signed.example/binary/{}", wid().to_hex());
        let signed_config = format!("https://signed.example/config/{}", wid().to_hex());
        let binary = encoded(b"bin");
        let fetcher = Arc::new(MapFetcher::with(vec![
            (signed_binary.as_str(), binary),
            (signed_config.as_str(), b"cfg".to_vec()),
        ]));
        let store = FetchingArtifactStore::new(fetcher.clone())
            .with_storage(Arc::new(SigningRetriever), "storage.example");

        let (binary, config) = store
            .fetch_artifacts(
                &CancellationToken::new(),
                &wid(),
                "https://storage.example/artifacts/bin",
                "https://storage.example/artifacts/cfg",
            )
            .await
            .unwrap();

        assert_eq!(binary, b"bin");
        assert_eq!(config, b"cfg");
    }

    #[tokio::test]
    async fn test_other_hosts_bypass_storage() {
        let binary = encoded(b"bin");
        let fetcher = Arc::new(MapFetcher::with(vec![("https://cdn.example/bin", binary)]));
        let store = FetchingArtifactStore::new(fetcher)
            .with_storage(Arc::new(SigningRetriever), "storage.example");

        let (binary, _) = store
            .fetch_artifacts(&CancellationToken::new(), &wid(), "https://cdn.example/bin", "")
            .await
            .unwrap();
        assert_eq!(binary, b"bin");
    }

    #[tokio::test]
    async fn test_invalid_base64_is_a_decode_error() {
        let fetcher = Arc::new(MapFetcher::with(vec![(
            "file:///wf/bin",
            b"not base64!".to_vec(),
        )]));
        let store = FetchingArtifactStore::new(fetcher);

        let err = store
            .fetch_artifacts(&CancellationToken::new(), &wid(), "file:///wf/bin", "")
            .await
            .unwrap_err();
        assert!(matches!(err, ArtifactError::Decode(_)));
    }

    #[tokio::test]
    async fn test_oversized_config_is_rejected() {
        let binary = encoded(b"bin");
        let fetcher = Arc::new(MapFetcher::with(vec![
            ("file:///wf/bin", binary),
            ("file:///wf/cfg", vec![0u8; 16]),
        ]));
        let store = FetchingArtifactStore::new(fetcher).with_limits(ArtifactLimits {
            max_binary_size_bytes: 1024,
            max_config_size_bytes: 8,
        });

        let err = store
            .fetch_artifacts(&CancellationToken::new(), &wid(), "file:///wf/bin", "file:///wf/cfg")
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ArtifactError::TooLarge {
                artifact: "config",
                size: 16,
                limit: 8
            }
        ));
    }

    #[tokio::test]
    async fn test_fetch_failure_and_cancellation_are_reported() {
        let store = FetchingArtifactStore::new(Arc::new(MapFetcher::default()));

        let err = store
            .fetch_artifacts(&CancellationToken::new(), &wid(), "file:///missing", "")
            .await
            .unwrap_err();
        assert!(matches!(err, ArtifactError::Fetch(FetchError::HttpStatus(404))));
        assert!(!err.is_cancellation());

        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = store
            .fetch_artifacts(&cancel, &wid(), "file:///missing", "")
            .await
            .unwrap_err();
        assert!(err.is_cancellation());
    }

    #[tokio::test]
    async fn test_stored_spec_short_circuits_fetch() {
        let fetcher = Arc::new(MapFetcher::default());
        let store = FetchingArtifactStore::new(fetcher.clone());
        store.upsert_spec(spec(wid())).await.unwrap();

        let (binary, config) = store
            .fetch_artifacts(&CancellationToken::new(), &wid(), "file:///wf/bin", "")
            .await
            .unwrap();

        assert_eq!(binary, b"stored");
        assert_eq!(config, b"stored-config");
        assert!(fetcher.requests.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_spec_crud() {
        let store = FetchingArtifactStore::new(Arc::new(MapFetcher::default()));
        assert!(store.get_spec(&wid()).await.unwrap().is_none());

        store.upsert_spec(spec(wid())).await.unwrap();
        let mut stored = store.get_spec(&wid()).await.unwrap().unwrap();
        assert_eq!(stored.status, SpecStatus::Active);

        stored.status = SpecStatus::Paused;
        store.upsert_spec(stored).await.unwrap();
        assert_eq!(
            store.get_spec(&wid()).await.unwrap().unwrap().status,
            SpecStatus::Paused
        );
        assert_eq!(store.spec_count(), 1);

        store.delete_spec(&wid()).await.unwrap();
        assert!(store.get_spec(&wid()).await.unwrap().is_none());
        // Deleting again is fine.
        store.delete_spec(&wid()).await.unwrap();
    }

    #[test]
    fn test_message_id_is_stable_per_url_and_workflow() {
        let a = message_id("file:///a", &wid());
        assert_eq!(a, message_id("file:///a", &wid()));
        assert_ne!(a, message_id("file:///b", &wid()));
        assert_eq!(a.len(), 64);
    }
}
