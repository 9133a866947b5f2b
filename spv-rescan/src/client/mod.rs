//! Lifecycle supervision of a synchronize-then-rescan run.
//!
//! The [`Supervisor`] opens the store, builds and starts the chain service,
//! waits for the chain to reach the sync threshold, optionally runs one rescan
//! and then reports the best block until cancelled. Once the chain service has
//! started it is stopped exactly once, whatever path the run takes.

pub mod config;
pub mod events;
pub mod lifecycle;
mod signals;

#[cfg(test)]
mod config_test;

use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::chain::ChainService;
use crate::error::{ChainResult, Result, SpvError};
use crate::event_bus::{EventBus, EventReceiver};
use crate::rescan::{LoggingHandler, Rescan, RescanOutcome};
use crate::storage::Store;
use crate::sync::{SyncMonitor, SyncOutcome};
use crate::types::BlockStamp;

pub use config::{Config, RescanConfig, RpcAuth, RpcConfig};
pub use events::LifecycleEvent;
pub use lifecycle::LifecycleState;

use lifecycle::Lifecycle;

/// What a completed run went through.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSummary {
    /// Best block that satisfied the sync threshold, if it was reached.
    pub synced: Option<BlockStamp>,
    /// Outcome of the rescan, if one ran and did not fail.
    pub rescan: Option<RescanOutcome>,
    /// Number of steady-state best block reports.
    pub status_reports: u64,
    pub final_state: LifecycleState,
}

impl RunSummary {
    fn new() -> Self {
        Self {
            synced: None,
            rescan: None,
            status_reports: 0,
            final_state: LifecycleState::Starting,
        }
    }
}

/// Owns the cancellation token and the lifecycle of one run.
pub struct Supervisor {
    config: Config,
    token: CancellationToken,
    events: EventBus<LifecycleEvent>,
    lifecycle: Lifecycle,
}

impl Supervisor {
    pub fn new(config: Config) -> Self {
        let events = EventBus::new(config.event_capacity);
        Self {
            config,
            token: CancellationToken::new(),
            events,
            lifecycle: Lifecycle::new(),
        }
    }

    /// Token that ends the run when cancelled.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.token.clone()
    }

    pub fn subscribe(&self) -> EventReceiver<LifecycleEvent> {
        self.events.subscribe()
    }

    pub fn state(&self) -> LifecycleState {
        self.lifecycle.state()
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Run until cancelled or a fatal error occurs.
    ///
    /// `build` constructs the chain service from the configuration and the
    /// opened store. Cancellation is a normal exit.
    pub async fn run<S, F>(&mut self, build: F) -> Result<RunSummary>
    where
        S: ChainService,
        F: FnOnce(&Config, Arc<Store>) -> ChainResult<S>,
    {
        if self.lifecycle.state() != LifecycleState::Starting {
            return Err(SpvError::General(format!(
                "supervisor already ran (state {})",
                self.lifecycle.state()
            )));
        }

        let signals = self
            .config
            .handle_signals
            .then(|| signals::spawn_signal_listener(self.token.clone()));

        let (service, store) = match self.start_service(build).await {
            Ok(Some(started)) => started,
            Ok(None) => {
                tracing::info!("Cancelled before the chain service started");
                release_listener(signals);
                self.transition(LifecycleState::Stopped)?;
                let mut summary = RunSummary::new();
                summary.final_state = self.lifecycle.state();
                return Ok(summary);
            }
            Err(e) => {
                tracing::error!("Fatal startup error: {}", e);
                release_listener(signals);
                self.transition(LifecycleState::Stopped)?;
                return Err(e);
            }
        };

        let result = self.drive(&service).await;
        if let Err(e) = &result {
            tracing::error!("Run failed: {}", e);
        }

        let shutdown = self.transition(LifecycleState::ShuttingDown);
        tracing::info!("Stopping chain service...");
        service.stop().await;
        tracing::info!("Chain service stopped.");
        if let Err(e) = store.flush() {
            tracing::error!("Failed to flush store: {}", e);
        }
        let stopped = self.transition(LifecycleState::Stopped);
        release_listener(signals);

        let mut summary = result?;
        shutdown?;
        stopped?;
        summary.final_state = self.lifecycle.state();
        Ok(summary)
    }

    /// Open the store, then build and start the service. `None` when the
    /// token fired before the service was started.
    async fn start_service<S, F>(&mut self, build: F) -> Result<Option<(Arc<S>, Arc<Store>)>>
    where
        S: ChainService,
        F: FnOnce(&Config, Arc<Store>) -> ChainResult<S>,
    {
        self.config.validate().map_err(SpvError::Config)?;

        let store_path = self.config.store_path();
        tracing::info!("Opening store at {:?}", store_path);
        let store = tokio::select! {
            biased;
            _ = self.token.cancelled() => return Ok(None),
            store = Store::open(store_path, self.config.store_open_timeout) => Arc::new(store?),
        };

        tracing::info!("Creating chain service...");
        let service = Arc::new(build(&self.config, store.clone())?);

        tracing::info!("Starting chain service...");
        service.start().await?;

        Ok(Some((service, store)))
    }

    async fn drive<S: ChainService>(&mut self, service: &Arc<S>) -> Result<RunSummary> {
        let mut summary = RunSummary::new();

        self.transition(LifecycleState::Syncing)?;
        let monitor = SyncMonitor::new(self.config.sync_height, self.config.poll_interval);
        match monitor.wait_until_synced(service.as_ref(), &self.token).await? {
            SyncOutcome::Synced(best) => {
                summary.synced = Some(best);
                self.events.emit(LifecycleEvent::Synced(best));
            }
            SyncOutcome::Canceled => return Ok(summary),
        }

        if let Some(rescan_config) = self.config.rescan.clone() {
            self.transition(LifecycleState::Rescanning)?;

            let mut rescan = Rescan::new(rescan_config.watch, rescan_config.start)
                .with_event_buffer(self.config.rescan_buffer);
            let outcome = rescan.run(service.clone(), &mut LoggingHandler, &self.token).await?;

            self.events.emit(LifecycleEvent::RescanFinished(outcome.clone()));
            summary.rescan = Some(outcome);
        }

        if self.token.is_cancelled() {
            return Ok(summary);
        }

        self.transition(LifecycleState::SteadyState)?;
        loop {
            tokio::select! {
                biased;
                _ = self.token.cancelled() => break,
                _ = tokio::time::sleep(self.config.status_interval) => {}
            }

            let best = tokio::select! {
                biased;
                _ = self.token.cancelled() => break,
                best = service.best_block() => best,
            };

            match best {
                Ok(best) => {
                    tracing::info!("Current best block: {}, hash: {}", best.height, best.hash);
                    summary.status_reports += 1;
                    self.events.emit(LifecycleEvent::BestBlock(best));
                }
                Err(e) => tracing::debug!("Best block unavailable: {}", e),
            }
        }

        Ok(summary)
    }

    fn transition(&mut self, next: LifecycleState) -> Result<()> {
        let from = self.lifecycle.transition(next)?;
        self.events.emit(LifecycleEvent::StateChanged {
            from,
            to: next,
        });
        Ok(())
    }
}

fn release_listener(listener: Option<JoinHandle<()>>) {
    if let Some(listener) = listener {
        listener.abort();
    }
}
