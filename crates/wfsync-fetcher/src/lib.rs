//! wfsync Fetcher - Workflow artifact retrieval
//!
//! Two ways to materialize a workflow's binary and config:
//!
//! - **Gateway-mediated** ([`FetcherService`]): requests are relayed by one of
//!   the DON's gateways, tried in round-robin order with failover, under
//!   global and per-workflow rate limits. Download URLs are resolved through
//!   a [`StorageClient`].
//! - **Direct** ([`new_fetcher`]): `file://` reads confined to a base
//!   directory, or `http(s)://` reads against a base URL.
//!
//! Both implement [`ArtifactFetcher`].

#![deny(unsafe_code)]
#![cfg_attr(feature = "strict-docs", warn(missing_docs))]
#![cfg_attr(not(feature = "strict-docs"), allow(missing_docs))]

pub mod config;
pub mod connector_handler;
pub mod direct;
pub mod error;
pub mod fetcher;
pub mod gateway;
pub mod rate_limit;
pub mod service;
pub mod storage;

// Re-exports
pub use config::{FetcherConfig, RateLimiterConfig, METHOD_WORKFLOW_SYNCER};
pub use connector_handler::OutgoingConnectorHandler;
pub use direct::{clean_path, new_fetcher, FileFetcher, HttpFetcher};
pub use error::{FetchError, FetchResult};
pub use fetcher::ArtifactFetcher;
pub use gateway::{
    GatewayConnector, GatewayMessage, GatewayMessageHandler, GatewayRequest, GatewayResponse,
    MessageBody, RoundRobinSelector,
};
pub use rate_limit::{RateLimiter, TokenBucket};
pub use service::FetcherService;
pub use storage::{ArtifactType, DownloadArtifactRequest, DownloadArtifactResponse, StorageClient};
