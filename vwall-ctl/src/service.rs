//! Engine wiring for the CLI and the `serve` daemon.
//!
//! Builds the registry, dispatcher and status view from a [`CtlConfig`];
//! the scheduler and health monitor are started on demand.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use vwall_core::{
    CommandDispatcher, DeploymentScheduler, DisplayId, FleetRegistry, HealthMonitor, JobStore,
    JsonDirJobStore, MemoryJobStore, StatusAggregator, StatusEvent, WallError,
};

use crate::config::CtlConfig;

// ── FleetService ─────────────────────────────────────────────────

pub struct FleetService {
    config: CtlConfig,
    status: StatusAggregator,
    registry: Arc<FleetRegistry>,
    dispatcher: Arc<CommandDispatcher>,
}

impl FleetService {
    /// Register every configured display. Invalid descriptors fail here.
    pub async fn new(config: CtlConfig) -> Result<Self, WallError> {
        let engine = config.engine();
        let status = StatusAggregator::new();
        let registry = Arc::new(FleetRegistry::new(&engine, status.clone()));
        let summary = registry.reload(config.displays.clone()).await?;
        info!(displays = summary.added.len(), "fleet loaded");
        let dispatcher = Arc::new(CommandDispatcher::new(Arc::clone(&registry), engine.retry));
        Ok(Self {
            config,
            status,
            registry,
            dispatcher,
        })
    }

    pub fn registry(&self) -> &Arc<FleetRegistry> {
        &self.registry
    }

    pub fn dispatcher(&self) -> &Arc<CommandDispatcher> {
        &self.dispatcher
    }

    pub fn status(&self) -> &StatusAggregator {
        &self.status
    }

    /// The ids given, or every display when none are.
    pub fn resolve_targets(&self, ids: &[String]) -> Vec<DisplayId> {
        if ids.is_empty() {
            self.registry.ids()
        } else {
            ids.iter().map(|id| DisplayId::from(id.as_str())).collect()
        }
    }

    /// JSON directory store when `[scheduler].state_dir` is set.
    pub async fn job_store(&self) -> Result<Arc<dyn JobStore>, WallError> {
        match self.config.scheduler.state_dir() {
            Some(dir) => Ok(Arc::new(JsonDirJobStore::open(dir).await?)),
            None => Ok(Arc::new(MemoryJobStore::new())),
        }
    }

    pub async fn start_scheduler(&self) -> Result<DeploymentScheduler, WallError> {
        let store = self.job_store().await?;
        Ok(DeploymentScheduler::start(
            Arc::clone(&self.dispatcher),
            store,
            &self.config.scheduler,
        ))
    }

    /// Run until `shutdown` fires: restore jobs, poll health, log status.
    pub async fn run(&self, shutdown: CancellationToken) -> Result<(), WallError> {
        let created = self.registry.warm_up();
        info!(sessions = created, "sessions created");

        let scheduler = self.start_scheduler().await?;
        scheduler.restore().await?;

        let monitor = match self.config.monitor.interval() {
            Some(interval) => {
                let monitor = HealthMonitor::new(Arc::clone(&self.dispatcher), interval);
                Some(monitor.spawn(shutdown.child_token()))
            }
            None => {
                info!("health monitor disabled");
                None
            }
        };

        let (subscription, mut events) = self.status.subscribe();
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                event = events.recv() => match event {
                    Some(event) => log_event(&event),
                    None => break,
                },
            }
        }
        self.status.unsubscribe(subscription);

        if let Some(handle) = monitor {
            if let Err(e) = handle.await {
                warn!("health monitor task failed: {e}");
            }
        }
        scheduler.shutdown().await;
        self.registry.teardown_all().await;
        info!("fleet service stopped");
        Ok(())
    }
}

fn log_event(event: &StatusEvent) {
    match event {
        StatusEvent::Link {
            display: id,
            previous,
            state,
            failures,
        } if previous != state => {
            info!(display = %id, from = %previous, to = %state, failures, "link state changed");
        }
        StatusEvent::Link { .. } => {}
        StatusEvent::Contact { display: id, values, .. } => {
            tracing::debug!(display = %id, ?values, "display contact");
        }
        StatusEvent::Removed { display: id } => info!(display = %id, "display removed"),
    }
}
