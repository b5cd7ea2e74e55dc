//! Fetcher error types

use thiserror::Error;

/// Fetcher errors
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("failed to start fetcher service: gateway connector is not configured")]
    NoGatewayConnector,

    #[error("failed to start fetcher service: storage client is not configured")]
    NoStorageClient,

    #[error("fetcher service has already been started")]
    AlreadyStarted,

    #[error("fetcher service is not running")]
    NotStarted,

    #[error("storage service request must not be empty")]
    EmptyStorageRequest,

    #[error("storage service error: {0}")]
    Storage(String),

    #[error("invalid call to fetch, must provide workflow ID")]
    MissingWorkflowId,

    #[error("baseURL cannot be empty")]
    EmptyBaseUrl,

    #[error("request URL cannot be empty")]
    EmptyRequestUrl,

    #[error("invalid URL: {0}")]
    InvalidUrl(String),

    #[error("unsupported URL scheme: {0}")]
    UnsupportedScheme(String),

    #[error("basePath must be an absolute path, got: {0}")]
    RelativeBasePath(String),

    #[error("request URL {path} is not within the basePath {base}")]
    OutsideBasePath { path: String, base: String },

    #[error("failed to read file: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("HTTP request failed with status code: {0}")]
    HttpStatus(u16),

    #[error("no gateways available")]
    NoGateways,

    #[error("rate limit exceeded for sender {0}")]
    RateLimited(String),

    #[error("gateway {gateway} error: {reason}")]
    Gateway { gateway: String, reason: String },

    #[error("invalid response from gateway: {0}")]
    InvalidResponse(String),

    #[error("invalid payload received from gateway message: {0}")]
    InvalidPayload(String),

    #[error("failed to encode or decode gateway payload: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("execution error from gateway: {0}")]
    Execution(String),

    /// Non-2xx answer relayed by the gateway; the body is kept for diagnostics.
    #[error("request failed with status code: {status}")]
    RequestFailed { status: u16, body: Vec<u8> },

    #[error("context deadline exceeded")]
    DeadlineExceeded,

    #[error("context canceled")]
    Cancelled,
}

impl FetchError {
    /// Whether the error stems from cancellation or an expired deadline.
    pub fn is_cancellation(&self) -> bool {
        matches!(self, FetchError::Cancelled | FetchError::DeadlineExceeded)
    }
}

/// Result type for fetch operations
pub type FetchResult<T> = std::result::Result<T, FetchError>;
