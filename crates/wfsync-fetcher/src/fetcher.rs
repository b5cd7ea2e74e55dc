//! Common fetch surface shared by the gateway and direct fetchers

use crate::error::FetchResult;
use crate::gateway::GatewayRequest;
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

/// Retrieves the content behind a request URL.
#[async_trait]
pub trait ArtifactFetcher: Send + Sync {
    async fn fetch(
        &self,
        cancel: &CancellationToken,
        message_id: &str,
        request: &GatewayRequest,
    ) -> FetchResult<Vec<u8>>;
}
