//! Handle to a running workflow engine

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

/// Errors reported by an engine's lifecycle
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum EngineError {
    #[error("engine could not be created: {0}")]
    Create(String),

    #[error("engine failed to start: {0}")]
    Start(String),

    #[error("engine failed to close: {0}")]
    Close(String),

    #[error("engine not ready: {0}")]
    NotReady(String),
}

/// Component name to failure description; an empty map means healthy.
pub type HealthReport = HashMap<String, String>;

/// Lifecycle surface every managed workflow engine exposes.
///
/// What the engine executes is opaque to the registry and to the controller.
#[async_trait]
pub trait Engine: Send + Sync {
    fn name(&self) -> String;

    async fn start(&self) -> Result<(), EngineError>;

    async fn close(&self) -> Result<(), EngineError>;

    /// `Ok` once the engine is serving.
    fn ready(&self) -> Result<(), EngineError>;

    fn health_report(&self) -> HealthReport;
}

/// Close every engine, attempting all of them and returning the first failure.
pub async fn close_all<I>(engines: I) -> Result<(), EngineError>
where
    I: IntoIterator<Item = Arc<dyn Engine>>,
{
    let mut first_err = None;
    for engine in engines {
        if let Err(e) = engine.close().await {
            tracing::error!(engine = %engine.name(), error = %e, "Failed to close engine");
            first_err.get_or_insert(e);
        }
    }
    match first_err {
        Some(e) => Err(e),
        None => Ok(()),
    }
}
