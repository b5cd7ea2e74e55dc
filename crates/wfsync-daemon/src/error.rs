//! Daemon error types

use thiserror::Error;
use wfsync_fetcher::FetchError;
use wfsync_syncer::SyncerError;

#[derive(Debug, Error)]
pub enum DaemonError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("artifact fetcher error: {0}")]
    Fetcher(#[from] FetchError),

    #[error("syncer error: {0}")]
    Syncer(#[from] SyncerError),
}

pub type DaemonResult<T> = Result<T, DaemonError>;
