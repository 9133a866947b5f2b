//! Rescan coordination.
//!
//! A [`Rescan`] resolves the block range for one watch target, launches the
//! chain service's rescan primitive on its own task and relays the events it
//! produces to a [`RescanEventHandler`], racing the whole run against the
//! cancellation token. Events are dispatched from the coordinating task only,
//! so no callback runs once cancellation has been observed.

pub mod events;

use std::fmt;
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

use crate::chain::{ChainService, RescanRequest};
use crate::error::{RescanError, RescanResult};
use crate::types::{BlockStamp, ScanRange, StartBound, WatchTarget};

pub use events::{LoggingHandler, RescanEvent, RescanEventHandler, TxMatch};

/// Default capacity of the channel between the rescan task and the coordinator.
pub const DEFAULT_EVENT_BUFFER: usize = 64;

/// Progress of one rescan instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RescanState {
    Idle,
    RangeResolved,
    Running,
    Completed,
    Failed,
    Canceled,
}

impl RescanState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, RescanState::Completed | RescanState::Failed | RescanState::Canceled)
    }
}

impl fmt::Display for RescanState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RescanState::Idle => "idle",
            RescanState::RangeResolved => "range resolved",
            RescanState::Running => "running",
            RescanState::Completed => "completed",
            RescanState::Failed => "failed",
            RescanState::Canceled => "canceled",
        };
        f.write_str(name)
    }
}

/// Counts of the events delivered during a rescan.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RescanSummary {
    pub blocks_connected: u64,
    pub blocks_disconnected: u64,
    pub received: u64,
    pub redeemed: u64,
    /// Last block reported connected.
    pub last_block: Option<BlockStamp>,
}

impl RescanSummary {
    fn record(&mut self, event: &RescanEvent) {
        match event {
            RescanEvent::BlockConnected {
                block,
                ..
            } => {
                self.blocks_connected += 1;
                self.last_block = Some(*block);
            }
            RescanEvent::BlockDisconnected {
                ..
            } => self.blocks_disconnected += 1,
            RescanEvent::MatchReceived(_) => self.received += 1,
            RescanEvent::MatchRedeeming(_) => self.redeemed += 1,
        }
    }
}

/// How a rescan ended when it did not fail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RescanOutcome {
    /// Every block in range was examined.
    Completed(RescanSummary),
    /// The cancellation token fired first.
    Canceled,
}

/// A single, non-reusable rescan of one watch target.
#[derive(Debug)]
pub struct Rescan {
    watch: WatchTarget,
    start: StartBound,
    state: RescanState,
    range: Option<ScanRange>,
    event_buffer: usize,
}

impl Rescan {
    pub fn new(watch: WatchTarget, start: StartBound) -> Self {
        Self {
            watch,
            start,
            state: RescanState::Idle,
            range: None,
            event_buffer: DEFAULT_EVENT_BUFFER,
        }
    }

    /// Set the capacity of the event channel.
    pub fn with_event_buffer(mut self, capacity: usize) -> Self {
        self.event_buffer = capacity.max(1);
        self
    }

    pub fn state(&self) -> RescanState {
        self.state
    }

    /// The resolved range, once known.
    pub fn range(&self) -> Option<&ScanRange> {
        self.range.as_ref()
    }

    pub fn watch(&self) -> &WatchTarget {
        &self.watch
    }

    /// Resolve `[start bound, current best block]` against the chain service.
    pub async fn resolve_range<S>(&self, service: &S) -> RescanResult<ScanRange>
    where
        S: ChainService + ?Sized,
    {
        let start_height = self.start.height();
        let start_hash = service.get_block_hash(start_height).await.map_err(|e| {
            RescanError::Range(format!(
                "cannot resolve hash of start block {}: {}",
                start_height, e
            ))
        })?;

        if let StartBound::Checkpoint(checkpoint) = &self.start {
            if checkpoint.hash != start_hash {
                return Err(RescanError::Range(format!(
                    "checkpoint {} does not match chain hash {}",
                    checkpoint, start_hash
                )));
            }
        }

        let end = service
            .best_block()
            .await
            .map_err(|e| RescanError::Range(format!("cannot resolve end block: {}", e)))?;

        ScanRange::new(BlockStamp::new(start_height, start_hash), end)
    }

    /// Run the rescan to completion, failure or cancellation.
    pub async fn run<S, H>(
        &mut self,
        service: Arc<S>,
        handler: &mut H,
        token: &CancellationToken,
    ) -> RescanResult<RescanOutcome>
    where
        S: ChainService + ?Sized,
        H: RescanEventHandler + ?Sized,
    {
        if self.state != RescanState::Idle {
            return Err(RescanError::InvalidState(format!(
                "rescan already {}, create a new instance",
                self.state
            )));
        }

        let resolved = tokio::select! {
            biased;
            _ = token.cancelled() => None,
            range = self.resolve_range(service.as_ref()) => Some(range),
        };
        let range = match resolved {
            None => return Ok(self.cancel(None)),
            Some(Ok(range)) => range,
            Some(Err(e)) => {
                self.state = RescanState::Failed;
                tracing::error!("Rescan range error: {}", e);
                return Err(e);
            }
        };

        self.range = Some(range.clone());
        self.state = RescanState::RangeResolved;
        tracing::info!(
            "Starting rescan of blocks {} ({} blocks) for script {}",
            range,
            range.len(),
            self.watch
        );

        if token.is_cancelled() {
            return Ok(self.cancel(None));
        }

        let (event_tx, mut event_rx) = mpsc::channel(self.event_buffer);
        let (done_tx, mut done_rx) = oneshot::channel();
        let request = RescanRequest {
            range: range.clone(),
            watch: self.watch.clone(),
        };
        let task_service = service.clone();
        let task = tokio::spawn(async move {
            let result = task_service.rescan(request, event_tx).await;
            let _ = done_tx.send(result);
        });
        self.state = RescanState::Running;

        let mut summary = RescanSummary::default();
        loop {
            tokio::select! {
                biased;
                _ = token.cancelled() => return Ok(self.cancel(Some(task))),
                event = event_rx.recv() => match event {
                    Some(event) => {
                        summary.record(&event);
                        handler.dispatch(&event);
                    }
                    None => break,
                },
            }
        }

        let completion = tokio::select! {
            biased;
            _ = token.cancelled() => None,
            result = &mut done_rx => Some(result),
        };

        match completion {
            None => Ok(self.cancel(Some(task))),
            Some(Ok(Ok(()))) => {
                self.state = RescanState::Completed;
                tracing::info!(
                    "Rescan of blocks {} completed: {} blocks, {} received, {} redeemed",
                    range,
                    summary.blocks_connected,
                    summary.received,
                    summary.redeemed
                );
                Ok(RescanOutcome::Completed(summary))
            }
            Some(Ok(Err(source))) => {
                self.state = RescanState::Failed;
                let err = RescanError::Primitive {
                    start: range.start().height,
                    end: range.end().height,
                    source,
                };
                tracing::error!("{}", err);
                Err(err)
            }
            Some(Err(_)) => {
                self.state = RescanState::Failed;
                Err(RescanError::TaskFailed(
                    "rescan task ended without reporting completion".to_string(),
                ))
            }
        }
    }

    fn cancel(&mut self, task: Option<tokio::task::JoinHandle<()>>) -> RescanOutcome {
        if let Some(task) = task {
            task.abort();
        }
        self.state = RescanState::Canceled;
        tracing::info!("Rescan was canceled");
        RescanOutcome::Canceled
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_states() {
        assert!(!RescanState::Idle.is_terminal());
        assert!(!RescanState::Running.is_terminal());
        assert!(RescanState::Completed.is_terminal());
        assert!(RescanState::Failed.is_terminal());
        assert!(RescanState::Canceled.is_terminal());
    }

    #[test]
    fn test_summary_counts_events() {
        use bitcoin::hashes::Hash;
        use bitcoin::{BlockHash, Txid};

        let block = BlockStamp::new(3, BlockHash::from_byte_array([3u8; 32]));
        let tx = TxMatch {
            txid: Txid::from_byte_array([0u8; 32]),
            block,
            index: 0,
        };

        let mut summary = RescanSummary::default();
        summary.record(&RescanEvent::MatchReceived(tx.clone()));
        summary.record(&RescanEvent::MatchRedeeming(tx));
        summary.record(&RescanEvent::BlockConnected {
            block,
            matched: 2,
        });

        assert_eq!(summary.blocks_connected, 1);
        assert_eq!(summary.received, 1);
        assert_eq!(summary.redeemed, 1);
        assert_eq!(summary.last_block, Some(block));
    }
}
