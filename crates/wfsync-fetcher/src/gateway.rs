//! Gateway channel abstractions
//!
//! The wire protocol and message signing belong to the gateway connector;
//! this module only models the envelope the fetcher exchanges with it and
//! the order in which gateways are tried.

use crate::error::{FetchError, FetchResult};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Routing data of a gateway message
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MessageBody {
    pub message_id: String,
    pub method: String,
    pub don_id: String,
    #[serde(default)]
    pub receiver: String,
    #[serde(default)]
    pub sender: String,
    #[serde(default)]
    pub payload: serde_json::Value,
}

/// Envelope exchanged with a gateway
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GatewayMessage {
    pub body: MessageBody,
    /// Set by the connector when signing; required on inbound messages
    #[serde(default)]
    pub signature: String,
}

impl GatewayMessage {
    /// Structural checks on an inbound message.
    pub fn validate(&self) -> FetchResult<()> {
        if self.body.message_id.is_empty() {
            return Err(FetchError::InvalidResponse("message id is empty".to_string()));
        }
        if self.body.method.is_empty() {
            return Err(FetchError::InvalidResponse("method is empty".to_string()));
        }
        if self.signature.is_empty() {
            return Err(FetchError::InvalidResponse("message is not signed".to_string()));
        }
        if self.body.receiver.is_empty() {
            return Err(FetchError::InvalidResponse("receiver is empty".to_string()));
        }
        Ok(())
    }
}

/// HTTP request relayed by a gateway on behalf of a workflow
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GatewayRequest {
    pub url: String,
    #[serde(default)]
    pub method: String,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    #[serde(default)]
    pub body: Vec<u8>,
    /// Zero means the gateway's own limit
    #[serde(default)]
    pub max_response_bytes: u32,
    #[serde(default)]
    pub workflow_id: String,
    /// Zero means the caller's configured default
    #[serde(default)]
    pub timeout_ms: u32,
}

impl GatewayRequest {
    pub fn get(url: impl Into<String>, workflow_id: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            method: "GET".to_string(),
            workflow_id: workflow_id.into(),
            ..Default::default()
        }
    }
}

/// Result of a relayed HTTP request
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GatewayResponse {
    #[serde(default)]
    pub execution_error: bool,
    #[serde(default)]
    pub error_message: String,
    #[serde(default)]
    pub status_code: u16,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    #[serde(default)]
    pub body: Vec<u8>,
}

impl GatewayResponse {
    pub fn validate(&self) -> FetchResult<()> {
        if self.execution_error {
            if self.error_message.is_empty() {
                return Err(FetchError::InvalidPayload(
                    "execution error without error message".to_string(),
                ));
            }
        } else if self.status_code == 0 {
            return Err(FetchError::InvalidPayload("missing status code".to_string()));
        }
        Ok(())
    }
}

/// Receiver of inbound gateway messages for the methods it registered.
#[async_trait]
pub trait GatewayMessageHandler: Send + Sync {
    async fn handle_gateway_message(&self, gateway_id: &str, message: GatewayMessage)
        -> FetchResult<()>;
}

/// Connection to the set of gateways serving this node's DON.
#[async_trait]
pub trait GatewayConnector: Send + Sync {
    async fn gateway_ids(&self) -> FetchResult<Vec<String>>;

    async fn don_id(&self) -> FetchResult<String>;

    /// Route inbound messages for `methods` to `handler`.
    async fn add_handler(
        &self,
        methods: Vec<String>,
        handler: Arc<dyn GatewayMessageHandler>,
    ) -> FetchResult<()>;

    /// Resolve once a connection to the gateway is established.
    async fn await_connection(&self, gateway_id: &str) -> FetchResult<()>;

    /// Sign and send a message. The answer arrives through the handler.
    async fn send_to_gateway(&self, gateway_id: &str, message: GatewayMessage)
        -> FetchResult<()>;
}

/// Cycles through gateway IDs, one step per call.
#[derive(Debug)]
pub struct RoundRobinSelector {
    items: Vec<String>,
    next: AtomicUsize,
}

impl RoundRobinSelector {
    /// Starts at a time-seeded position so nodes spread across gateways.
    pub fn new(items: Vec<String>) -> Self {
        let start = if items.is_empty() {
            0
        } else {
            chrono::Utc::now().timestamp_subsec_nanos() as usize % items.len()
        };
        Self {
            items,
            next: AtomicUsize::new(start),
        }
    }

    pub fn with_fixed_start(items: Vec<String>) -> Self {
        Self {
            items,
            next: AtomicUsize::new(0),
        }
    }

    pub fn next_gateway(&self) -> FetchResult<String> {
        if self.items.is_empty() {
            return Err(FetchError::NoGateways);
        }
        let index = self.next.fetch_add(1, Ordering::Relaxed) % self.items.len();
        Ok(self.items[index].clone())
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}
