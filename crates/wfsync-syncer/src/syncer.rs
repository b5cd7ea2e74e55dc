//! Workflow registry reconciliation controller
//!
//! [`WorkflowRegistrySyncer`] runs three background tasks that share one
//! cancellation token:
//!
//! 1. ledger reader initialization, retried on an interval until the
//!    configured chain is reachable
//! 2. the reconciliation loop, which waits for the reader and the DON
//!    assignment, then diffs declared state against running engines every tick
//! 3. the allowlist refresher, which pulls new allowlisted requests on its
//!    own ticker
//!
//! The loop and refresher tasks cancel the shared token when they exit, so
//! the service never runs half-alive.

use crate::allowlist::AllowlistCache;
use crate::clock::{Clock, SystemClock};
use crate::config::SyncerConfig;
use crate::don::DonNotifier;
use crate::error::{Result, SyncerError};
use crate::handler::EventSink;
use crate::ledger::{
    fetch_allowlisted_requests_delta, fetch_workflow_metadata, ContractBinding, LedgerReader,
    LedgerReaderFactory,
};
use crate::reconcile::generate_reconciliation_events;
use crate::report::ReconcileReport;
use crate::retry::{PendingEvents, ReconciliationEvent};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use wfsync_registry::{EngineRegistry, HealthReport};
use wfsync_types::{AllowlistedRequest, Don, Head, WorkflowMetadataView};

/// Service name used in logs and health reports
pub const SYNCER_NAME: &str = "WorkflowRegistrySyncer";

/// Called once if the reconciliation loop cannot start.
pub type StartFailureHook = Arc<dyn Fn(&SyncerError) + Send + Sync>;

/// One reconciliation pass: read, diff, apply.
pub struct Reconciler {
    registry: Arc<EngineRegistry>,
    sink: Arc<dyn EventSink>,
    clock: Arc<dyn Clock>,
    binding: ContractBinding,
    retry_interval: Duration,
    max_retry_interval: Duration,
    page_size: u64,
}

impl Reconciler {
    pub fn new(
        config: &SyncerConfig,
        registry: Arc<EngineRegistry>,
        sink: Arc<dyn EventSink>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            registry,
            sink,
            clock,
            binding: ContractBinding::workflow_registry(config.workflow_registry_address.clone()),
            retry_interval: config.retry_interval(),
            max_retry_interval: config.max_retry_interval(),
            page_size: config.max_results_per_query,
        }
    }

    /// Read the DON's declared workflows and reconcile against them.
    pub async fn tick(
        &self,
        cancel: &CancellationToken,
        reader: &dyn LedgerReader,
        don: &Don,
        pending: &mut PendingEvents,
    ) -> Result<ReconcileReport> {
        tracing::debug!(families = ?don.families, "Fetching workflow registry metadata");
        let (metadata, head) = tokio::select! {
            _ = cancel.cancelled() => return Err(SyncerError::Cancelled),
            read = fetch_workflow_metadata(reader, &self.binding, don, self.page_size) => read?,
        };
        self.reconcile(cancel, &metadata, &head, pending).await
    }

    /// Derive this tick's events from `metadata` and apply them in order.
    ///
    /// On return `pending` holds exactly the events that failed or are still
    /// backing off.
    pub async fn reconcile(
        &self,
        cancel: &CancellationToken,
        metadata: &[WorkflowMetadataView],
        head: &Head,
        pending: &mut PendingEvents,
    ) -> Result<ReconcileReport> {
        tracing::debug!(
            num_workflows = metadata.len(),
            height = %head.height,
            num_pending_events = pending.len(),
            "Preparing events to reconcile"
        );

        let events = generate_reconciliation_events(&self.registry, pending, metadata, head)?;
        tracing::debug!(num = events.len(), "Generated events to reconcile");
        pending.clear();

        let mut report = ReconcileReport::new();
        for event in events {
            if cancel.is_cancelled() {
                tracing::debug!("Reconciliation stopped during processing");
                return Err(SyncerError::Cancelled);
            }
            report.record_event(event.kind());
            self.dispatch(cancel, event, pending, &mut report).await;
        }

        Ok(report)
    }

    async fn dispatch(
        &self,
        cancel: &CancellationToken,
        mut event: ReconciliationEvent,
        pending: &mut PendingEvents,
        report: &mut ReconcileReport,
    ) {
        let now = self.clock.now();
        if !event.retry.is_eligible(now) {
            tracing::debug!(
                workflow_id = %event.id,
                kind = %event.kind(),
                signature = %event.signature,
                next_retry_at = %event.next_retry_at(),
                "Skipping event, still in backoff"
            );
            report.record_backoff(&event.id, event.next_retry_at());
            pending.insert(event.id, event);
            return;
        }

        if let Err(e) = self.sink.handle(cancel, &event.event).await {
            event
                .retry
                .record_failure(self.clock.now(), self.retry_interval, self.max_retry_interval);
            tracing::error!(
                workflow_id = %event.id,
                kind = %event.kind(),
                error = %e,
                retry_count = event.retry_count(),
                next_retry_at = %event.next_retry_at(),
                "Failed to handle event, backing off"
            );
            report.record_backoff(&event.id, event.next_retry_at());
            pending.insert(event.id, event);
        }
    }
}

/// Polls the workflow registry and keeps the engine registry converged on it.
pub struct WorkflowRegistrySyncer {
    inner: Arc<SyncerInner>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    started: AtomicBool,
    closed: AtomicBool,
}

struct SyncerInner {
    config: SyncerConfig,
    binding: ContractBinding,
    reader_factory: Arc<dyn LedgerReaderFactory>,
    don_notifier: Arc<dyn DonNotifier>,
    handler: Arc<dyn EventSink>,
    engine_registry: Arc<EngineRegistry>,
    reconciler: Reconciler,
    allowlist: AllowlistCache,
    clock: Arc<dyn Clock>,
    on_start_failure: Option<StartFailureHook>,
    reader: watch::Sender<Option<Arc<dyn LedgerReader>>>,
    cancel: CancellationToken,
}

impl WorkflowRegistrySyncer {
    pub fn builder() -> WorkflowRegistrySyncerBuilder {
        WorkflowRegistrySyncerBuilder::default()
    }

    pub fn name(&self) -> &'static str {
        SYNCER_NAME
    }

    /// Spawn the background tasks. May be called once.
    pub async fn start(&self) -> Result<()> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(SyncerError::AlreadyStarted(SYNCER_NAME));
        }
        if self.closed.load(Ordering::SeqCst) {
            return Err(SyncerError::AlreadyClosed(SYNCER_NAME));
        }

        let handles = vec![
            tokio::spawn(self.inner.clone().init_reader()),
            tokio::spawn(self.inner.clone().reconcile_loop()),
            tokio::spawn(self.inner.clone().allowlist_loop()),
        ];
        self.tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .extend(handles);

        tracing::info!(
            registry_address = %self.inner.config.workflow_registry_address,
            chain_selector = self.inner.config.chain_selector,
            "Workflow registry syncer started"
        );
        Ok(())
    }

    /// Stop every task, then close the event handler and with it every engine.
    ///
    /// May be called once.
    pub async fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Err(SyncerError::AlreadyClosed(SYNCER_NAME));
        }
        self.inner.cancel.cancel();

        let handles: Vec<_> = self
            .tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain(..)
            .collect();

        let mut join_error = None;
        for handle in handles {
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "Syncer task failed");
                join_error.get_or_insert(SyncerError::Join(e.to_string()));
            }
        }

        self.inner.handler.close().await?;
        tracing::info!("Workflow registry syncer closed");

        match join_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    pub fn ready(&self) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(SyncerError::AlreadyClosed(SYNCER_NAME));
        }
        Ok(())
    }

    pub fn health_report(&self) -> HealthReport {
        let status = match self.ready() {
            Ok(()) => "ok".to_string(),
            Err(e) => e.to_string(),
        };
        HealthReport::from([(SYNCER_NAME.to_string(), status)])
    }

    /// Snapshot of the active allowlisted requests
    pub fn get_allowlisted_requests(&self) -> Vec<AllowlistedRequest> {
        self.inner.allowlist.requests()
    }

    /// Ledger total the allowlist cache was last refreshed up to
    pub fn last_seen_allowlisted_requests_count(&self) -> u64 {
        self.inner.allowlist.last_seen_total()
    }

    pub fn engine_registry(&self) -> &Arc<EngineRegistry> {
        &self.inner.engine_registry
    }

    pub fn config(&self) -> &SyncerConfig {
        &self.inner.config
    }
}

impl Drop for WorkflowRegistrySyncer {
    fn drop(&mut self) {
        self.inner.cancel.cancel();
    }
}

impl SyncerInner {
    async fn init_reader(self: Arc<Self>) {
        let mut ticker = tokio::time::interval(self.config.reader_init_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    tracing::debug!("Shutting down ledger reader initialization");
                    return;
                }
                _ = ticker.tick() => {
                    match self.reader_factory.new_reader(&self.binding).await {
                        Ok(reader) => {
                            self.reader.send_replace(Some(reader));
                            tracing::debug!("Successfully set ledger reader");
                            return;
                        }
                        Err(e) => {
                            tracing::info!(error = %e, "Ledger reader unavailable");
                        }
                    }
                }
            }
        }
    }

    async fn wait_for_reader(&self) -> Option<Arc<dyn LedgerReader>> {
        let mut rx = self.reader.subscribe();
        tokio::select! {
            _ = self.cancel.cancelled() => None,
            reader = rx.wait_for(Option::is_some) => reader.ok().and_then(|r| r.clone()),
        }
    }

    async fn reconcile_loop(self: Arc<Self>) {
        let _guard = self.cancel.clone().drop_guard();
        let Some(reader) = self.wait_for_reader().await else {
            return;
        };

        tracing::debug!("Waiting for DON assignment before starting reconciliation");
        let don = match self.don_notifier.wait_for_don(&self.cancel).await {
            Ok(don) => don,
            Err(e) if e.is_cancellation() => return,
            Err(e) => {
                let err = SyncerError::DonUnavailable(format!(
                    "failed to start workflow sync strategy: {e}"
                ));
                tracing::error!(error = %err, "Reconciliation loop failed to start");
                if let Some(hook) = &self.on_start_failure {
                    hook(&err);
                }
                return;
            }
        };

        let mut ticker = tokio::time::interval(self.config.tick_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut pending = PendingEvents::new();
        tracing::debug!(don_id = don.id, families = ?don.families, "Running reconciliation loop");

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    tracing::debug!("Shutting down reconciliation loop");
                    return;
                }
                _ = ticker.tick() => {
                    match self.reconciler.tick(&self.cancel, reader.as_ref(), &don, &mut pending).await {
                        Ok(report) => {
                            let running = self.engine_registry.len().unwrap_or_default();
                            tracing::debug!(report = ?report, running_workflows = running, "Reconciled events");
                        }
                        Err(e) if e.is_cancellation() && self.cancel.is_cancelled() => return,
                        Err(e) => {
                            tracing::error!(error = %e, "Failed to reconcile workflow registry state");
                        }
                    }
                }
            }
        }
    }

    async fn allowlist_loop(self: Arc<Self>) {
        let _guard = self.cancel.clone().drop_guard();
        let Some(reader) = self.wait_for_reader().await else {
            return;
        };

        let mut ticker = tokio::time::interval(self.config.allowlist_tick_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tracing::debug!("Starting allowlisted requests sync");

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    tracing::debug!("Shutting down allowlisted requests sync");
                    return;
                }
                _ = ticker.tick() => self.sync_allowlisted_requests(reader.as_ref()).await,
            }
        }
    }

    async fn sync_allowlisted_requests(&self, reader: &dyn LedgerReader) {
        let delta = tokio::select! {
            _ = self.cancel.cancelled() => return,
            delta = fetch_allowlisted_requests_delta(
                reader,
                &self.binding,
                self.allowlist.last_seen_total(),
                self.config.max_results_per_query,
            ) => delta,
        };

        match delta {
            Ok(delta) => {
                let new_requests = delta.requests.len();
                let expired = self.allowlist.apply(
                    delta.requests,
                    delta.total,
                    self.clock.now().timestamp(),
                );
                tracing::debug!(
                    new_requests,
                    expired_requests = expired,
                    active_requests = self.allowlist.len(),
                    last_seen_total = delta.total,
                    height = %delta.head.height,
                    "Synced allowlisted requests"
                );
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to sync allowlisted requests");
            }
        }
    }
}

/// Builder for [`WorkflowRegistrySyncer`]
#[derive(Default)]
pub struct WorkflowRegistrySyncerBuilder {
    config: SyncerConfig,
    reader_factory: Option<Arc<dyn LedgerReaderFactory>>,
    don_notifier: Option<Arc<dyn DonNotifier>>,
    handler: Option<Arc<dyn EventSink>>,
    engine_registry: Option<Arc<EngineRegistry>>,
    clock: Option<Arc<dyn Clock>>,
    on_start_failure: Option<StartFailureHook>,
}

impl WorkflowRegistrySyncerBuilder {
    pub fn with_config(mut self, config: SyncerConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_reader_factory(mut self, factory: Arc<dyn LedgerReaderFactory>) -> Self {
        self.reader_factory = Some(factory);
        self
    }

    pub fn with_don_notifier(mut self, notifier: Arc<dyn DonNotifier>) -> Self {
        self.don_notifier = Some(notifier);
        self
    }

    /// Consumer of derived events; must share the engine registry given here.
    pub fn with_handler(mut self, handler: Arc<dyn EventSink>) -> Self {
        self.handler = Some(handler);
        self
    }

    pub fn with_engine_registry(mut self, registry: Arc<EngineRegistry>) -> Self {
        self.engine_registry = Some(registry);
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn with_start_failure_hook(mut self, hook: StartFailureHook) -> Self {
        self.on_start_failure = Some(hook);
        self
    }

    pub fn build(self) -> Result<WorkflowRegistrySyncer> {
        self.config.validate()?;

        let reader_factory = self
            .reader_factory
            .ok_or(SyncerError::MissingDependency("ledger reader factory"))?;
        let don_notifier = self
            .don_notifier
            .ok_or(SyncerError::MissingDependency("DON notifier"))?;
        let handler = self
            .handler
            .ok_or(SyncerError::MissingDependency("event handler"))?;
        let engine_registry = self
            .engine_registry
            .ok_or(SyncerError::MissingDependency("engine registry"))?;
        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock));

        let reconciler = Reconciler::new(
            &self.config,
            engine_registry.clone(),
            handler.clone(),
            clock.clone(),
        );
        let (reader, _) = watch::channel(None);

        let inner = SyncerInner {
            binding: ContractBinding::workflow_registry(
                self.config.workflow_registry_address.clone(),
            ),
            config: self.config,
            reader_factory,
            don_notifier,
            handler,
            engine_registry,
            reconciler,
            allowlist: AllowlistCache::new(),
            clock,
            on_start_failure: self.on_start_failure,
            reader,
            cancel: CancellationToken::new(),
        };

        Ok(WorkflowRegistrySyncer {
            inner: Arc::new(inner),
            tasks: Mutex::new(Vec::new()),
            started: AtomicBool::new(false),
            closed: AtomicBool::new(false),
        })
    }
}
