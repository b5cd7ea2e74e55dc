//! Wires the syncer to the local collaborators and runs it until shutdown

use crate::config::DaemonConfig;
use crate::error::DaemonResult;
use crate::local::{FileLedgerReaderFactory, LocalCapabilityRegistry, LoggingEngineFactory};
use std::future::Future;
use std::sync::Arc;
use wfsync_fetcher::new_fetcher;
use wfsync_registry::EngineRegistry;
use wfsync_syncer::{
    EventHandler, FetchingArtifactStore, SyncerError, WatchDonNotifier, WorkflowRegistrySyncer,
};

/// A fully wired syncer plus the DON it announces once started
pub struct Daemon {
    config: DaemonConfig,
    syncer: WorkflowRegistrySyncer,
    don_notifier: Arc<WatchDonNotifier>,
    registry: Arc<EngineRegistry>,
}

impl Daemon {
    pub fn new(config: DaemonConfig) -> DaemonResult<Self> {
        let registry = Arc::new(EngineRegistry::new());
        let fetcher = new_fetcher(&config.artifacts.base_url)?;
        let store = FetchingArtifactStore::new(fetcher).with_limits(config.artifacts.limits.clone());

        let mut handler_config = config.handler.clone();
        if handler_config.workflow_registry_address.is_empty() {
            handler_config.workflow_registry_address =
                config.syncer.workflow_registry_address.clone();
        }
        if handler_config.chain_selector == 0 {
            handler_config.chain_selector = config.syncer.chain_selector;
        }

        let handler = EventHandler::new(
            handler_config,
            registry.clone(),
            Arc::new(store),
            Arc::new(LoggingEngineFactory),
            Arc::new(LocalCapabilityRegistry::new(config.don.peer_id.clone())),
        );

        let don_notifier = Arc::new(WatchDonNotifier::new());
        let syncer = WorkflowRegistrySyncer::builder()
            .with_config(config.syncer.clone())
            .with_reader_factory(Arc::new(FileLedgerReaderFactory::new(
                config.ledger.snapshot_path.clone(),
            )))
            .with_don_notifier(don_notifier.clone())
            .with_handler(Arc::new(handler))
            .with_engine_registry(registry.clone())
            .with_start_failure_hook(Arc::new(|err: &SyncerError| {
                tracing::error!(error = %err, "Workflow registry syncer failed to start");
            }))
            .build()?;

        Ok(Self {
            config,
            syncer,
            don_notifier,
            registry,
        })
    }

    pub fn engine_registry(&self) -> Arc<EngineRegistry> {
        self.registry.clone()
    }

    pub fn syncer(&self) -> &WorkflowRegistrySyncer {
        &self.syncer
    }

    /// Run until Ctrl-C or SIGTERM.
    pub async fn run(self) -> DaemonResult<()> {
        self.run_until(shutdown_signal()).await
    }

    /// Run until `shutdown` resolves, then close the syncer and every engine.
    pub async fn run_until<F>(self, shutdown: F) -> DaemonResult<()>
    where
        F: Future<Output = ()>,
    {
        self.syncer.start().await?;
        self.don_notifier.notify_don_set(self.config.don.to_don());
        tracing::info!(
            don_id = self.config.don.id,
            families = ?self.config.don.families,
            ledger = %self.config.ledger.snapshot_path.display(),
            "wfsync daemon running"
        );

        shutdown.await;

        tracing::info!("wfsync daemon shutting down");
        self.syncer.close().await?;
        Ok(())
    }
}

/// Graceful shutdown signal handler
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install signal handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating graceful shutdown");
        }
        _ = terminate => {
            tracing::info!("Received terminate signal, initiating graceful shutdown");
        }
    }
}
