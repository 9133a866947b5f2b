//! Waiting for the chain service to reach a target height.

use std::time::Duration;

use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::chain::ChainService;
use crate::error::{SyncError, SyncResult};
use crate::types::BlockStamp;

/// Default spacing between best-block queries.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(10);

/// Result of [`SyncMonitor::wait_until_synced`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
    /// The best block reached the threshold.
    Synced(BlockStamp),
    /// The cancellation token fired first.
    Canceled,
}

/// Polls the chain service's best block until it reaches a fixed height.
#[derive(Debug, Clone)]
pub struct SyncMonitor {
    threshold: u32,
    poll_interval: Duration,
}

impl SyncMonitor {
    pub fn new(threshold: u32, poll_interval: Duration) -> Self {
        Self {
            threshold,
            poll_interval,
        }
    }

    pub fn threshold(&self) -> u32 {
        self.threshold
    }

    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    /// Poll until `best_block().height >= threshold` or the token fires.
    ///
    /// The first query happens immediately, later ones once per interval.
    /// Query errors are logged and retried on the next tick.
    pub async fn wait_until_synced<S>(
        &self,
        service: &S,
        token: &CancellationToken,
    ) -> SyncResult<SyncOutcome>
    where
        S: ChainService + ?Sized,
    {
        if self.poll_interval.is_zero() {
            return Err(SyncError::InvalidConfig("poll interval must be non-zero".to_string()));
        }

        tracing::info!("Waiting for chain to reach height {}", self.threshold);

        let mut interval = tokio::time::interval(self.poll_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = token.cancelled() => return Ok(self.canceled()),
                _ = interval.tick() => {}
            }

            let best = tokio::select! {
                biased;
                _ = token.cancelled() => return Ok(self.canceled()),
                best = service.best_block() => best,
            };

            match best {
                Ok(best) if best.height >= self.threshold => {
                    tracing::info!("Chain is synchronized enough to begin scanning at {}", best);
                    return Ok(SyncOutcome::Synced(best));
                }
                Ok(best) => {
                    tracing::debug!(
                        "Best block {}, {} blocks below threshold {}",
                        best.height,
                        self.threshold - best.height,
                        self.threshold
                    );
                }
                Err(e) => {
                    tracing::warn!("Error getting best block: {}", e);
                }
            }
        }
    }

    fn canceled(&self) -> SyncOutcome {
        tracing::info!("Sync wait canceled before reaching height {}", self.threshold);
        SyncOutcome::Canceled
    }
}
