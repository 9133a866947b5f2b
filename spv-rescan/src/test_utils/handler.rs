use tokio_util::sync::CancellationToken;

use crate::rescan::{RescanEvent, RescanEventHandler, TxMatch};
use crate::types::BlockStamp;

/// Handler that records every event, optionally cancelling a token after the n-th one.
#[derive(Debug, Default)]
pub struct RecordingHandler {
    pub events: Vec<RescanEvent>,
    cancel_after: Option<(usize, CancellationToken)>,
}

impl RecordingHandler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cancel `token` right after the `count`-th event has been recorded.
    pub fn cancelling_after(count: usize, token: CancellationToken) -> Self {
        Self {
            events: Vec::new(),
            cancel_after: Some((count, token)),
        }
    }

    pub fn received(&self) -> Vec<&TxMatch> {
        self.events
            .iter()
            .filter_map(|e| match e {
                RescanEvent::MatchReceived(tx) => Some(tx),
                _ => None,
            })
            .collect()
    }

    pub fn redeemed(&self) -> Vec<&TxMatch> {
        self.events
            .iter()
            .filter_map(|e| match e {
                RescanEvent::MatchRedeeming(tx) => Some(tx),
                _ => None,
            })
            .collect()
    }

    pub fn connected_heights(&self) -> Vec<u32> {
        self.events
            .iter()
            .filter_map(|e| match e {
                RescanEvent::BlockConnected {
                    block,
                    ..
                } => Some(block.height),
                _ => None,
            })
            .collect()
    }

    fn record(&mut self, event: RescanEvent) {
        self.events.push(event);
        if let Some((count, token)) = &self.cancel_after {
            if self.events.len() == *count {
                token.cancel();
            }
        }
    }
}

impl RescanEventHandler for RecordingHandler {
    fn on_block_connected(&mut self, block: &BlockStamp, matched: usize) {
        self.record(RescanEvent::BlockConnected {
            block: *block,
            matched,
        });
    }

    fn on_block_disconnected(&mut self, block: &BlockStamp) {
        self.record(RescanEvent::BlockDisconnected {
            block: *block,
        });
    }

    fn on_receive(&mut self, tx: &TxMatch) {
        self.record(RescanEvent::MatchReceived(tx.clone()));
    }

    fn on_redeem(&mut self, tx: &TxMatch) {
        self.record(RescanEvent::MatchRedeeming(tx.clone()));
    }
}
