//! Request/response correlation over the gateway channel.

use crate::config::FetcherConfig;
use crate::error::{FetchError, FetchResult};
use crate::gateway::{
    GatewayConnector, GatewayMessage, GatewayMessageHandler, GatewayRequest, MessageBody,
    RoundRobinSelector,
};
use crate::rate_limit::RateLimiter;
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

/// Sends single-node requests through the next reachable gateway and waits
/// for the matching response to be routed back by message ID.
pub struct OutgoingConnectorHandler {
    connector: Arc<dyn GatewayConnector>,
    selector: RoundRobinSelector,
    method: String,
    outgoing_limiter: RateLimiter,
    incoming_limiter: RateLimiter,
    pending: DashMap<String, oneshot::Sender<GatewayMessage>>,
    default_timeout: Duration,
    retry_delay: Duration,
}

/// Drops the pending slot for a message however the request ends.
struct PendingGuard<'a> {
    pending: &'a DashMap<String, oneshot::Sender<GatewayMessage>>,
    message_id: String,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.pending.remove(&self.message_id);
    }
}

impl OutgoingConnectorHandler {
    /// Resolve the gateway set and build the handler.
    pub async fn new(
        connector: Arc<dyn GatewayConnector>,
        config: &FetcherConfig,
        method: impl Into<String>,
    ) -> FetchResult<Self> {
        let gateways = connector.gateway_ids().await?;
        let selector = if config.fixed_gateway_start {
            RoundRobinSelector::with_fixed_start(gateways)
        } else {
            RoundRobinSelector::new(gateways)
        };

        Ok(Self {
            connector,
            selector,
            method: method.into(),
            outgoing_limiter: RateLimiter::new(config.outgoing_rate_limit.clone()),
            incoming_limiter: RateLimiter::new(config.incoming_rate_limit.clone()),
            pending: DashMap::new(),
            default_timeout: Duration::from_millis(config.request_timeout_ms),
            retry_delay: Duration::from_millis(config.gateway_retry_delay_ms),
        })
    }

    /// Register with the connector for this handler's method.
    pub async fn start(self: &Arc<Self>) -> FetchResult<()> {
        let handler: Arc<dyn GatewayMessageHandler> = self.clone();
        self.connector
            .add_handler(vec![self.method.clone()], handler)
            .await
    }

    /// Abandon every in-flight request.
    pub fn close(&self) {
        self.pending.clear();
    }

    pub fn pending_requests(&self) -> usize {
        self.pending.len()
    }

    /// Send `request` to one gateway and wait for its response.
    ///
    /// Gateways whose connection cannot be established are skipped in
    /// round-robin order until one accepts the message or the deadline
    /// passes.
    pub async fn handle_single_node_request(
        &self,
        cancel: &CancellationToken,
        message_id: &str,
        request: &GatewayRequest,
    ) -> FetchResult<GatewayMessage> {
        if !self.outgoing_limiter.allow(&request.workflow_id) {
            return Err(FetchError::RateLimited(request.workflow_id.clone()));
        }

        let timeout = if request.timeout_ms > 0 {
            Duration::from_millis(u64::from(request.timeout_ms))
        } else {
            self.default_timeout
        };

        tokio::select! {
            _ = cancel.cancelled() => Err(FetchError::Cancelled),
            result = tokio::time::timeout(timeout, self.send_and_wait(message_id, request)) => {
                result.map_err(|_| FetchError::DeadlineExceeded)?
            }
        }
    }

    async fn send_and_wait(
        &self,
        message_id: &str,
        request: &GatewayRequest,
    ) -> FetchResult<GatewayMessage> {
        let don_id = self.connector.don_id().await?;
        let message = GatewayMessage {
            body: MessageBody {
                message_id: message_id.to_string(),
                method: self.method.clone(),
                don_id,
                payload: serde_json::to_value(request)?,
                ..Default::default()
            },
            signature: String::new(),
        };

        let (tx, rx) = oneshot::channel();
        self.pending.insert(message_id.to_string(), tx);
        let _guard = PendingGuard {
            pending: &self.pending,
            message_id: message_id.to_string(),
        };

        self.send_to_any_gateway(message).await?;

        // The sender is only dropped without a value when the handler closes.
        rx.await.map_err(|_| FetchError::Cancelled)
    }

    async fn send_to_any_gateway(&self, message: GatewayMessage) -> FetchResult<()> {
        let mut attempts = 0usize;
        loop {
            let gateway_id = self.selector.next_gateway()?;
            attempts += 1;

            match self.connector.await_connection(&gateway_id).await {
                Ok(()) => match self
                    .connector
                    .send_to_gateway(&gateway_id, message.clone())
                    .await
                {
                    Ok(()) => {
                        tracing::debug!(
                            gateway = %gateway_id,
                            message_id = %message.body.message_id,
                            "Sent request to gateway"
                        );
                        return Ok(());
                    }
                    Err(e) => {
                        tracing::warn!(gateway = %gateway_id, error = %e, "Failed to send to gateway");
                    }
                },
                Err(e) => {
                    tracing::warn!(gateway = %gateway_id, error = %e, "Gateway connection unavailable");
                }
            }

            if attempts % self.selector.len() == 0 {
                tokio::time::sleep(self.retry_delay).await;
            }
        }
    }
}

#[async_trait]
impl GatewayMessageHandler for OutgoingConnectorHandler {
    async fn handle_gateway_message(
        &self,
        gateway_id: &str,
        message: GatewayMessage,
    ) -> FetchResult<()> {
        if let Err(e) = message.validate() {
            tracing::warn!(gateway = %gateway_id, error = %e, "Dropping invalid gateway message");
            return Ok(());
        }

        if !self.incoming_limiter.allow(&message.body.sender) {
            tracing::warn!(
                gateway = %gateway_id,
                sender = %message.body.sender,
                "Dropping rate-limited gateway message"
            );
            return Ok(());
        }

        match self.pending.remove(&message.body.message_id) {
            Some((_, tx)) => {
                // The waiter may have timed out in the meantime.
                let _ = tx.send(message);
            }
            None => {
                tracing::debug!(
                    gateway = %gateway_id,
                    message_id = %message.body.message_id,
                    "No pending request for gateway message"
                );
            }
        }
        Ok(())
    }
}
