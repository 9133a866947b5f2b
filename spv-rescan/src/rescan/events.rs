//! Rescan notifications and the handler that receives them.

use bitcoin::Txid;

use crate::types::BlockStamp;

/// A transaction that touched the watched script.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxMatch {
    pub txid: Txid,
    /// Block containing the transaction.
    pub block: BlockStamp,
    /// Position of the transaction inside the block.
    pub index: usize,
}

/// Notifications produced by the rescan primitive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RescanEvent {
    /// A block in range was examined. `matched` counts the match events sent for it.
    BlockConnected {
        block: BlockStamp,
        matched: usize,
    },
    /// A previously connected block left the main chain.
    BlockDisconnected {
        block: BlockStamp,
    },
    /// A transaction paying to the watched script.
    MatchReceived(TxMatch),
    /// A transaction spending an output previously paid to the watched script.
    MatchRedeeming(TxMatch),
}

impl RescanEvent {
    pub fn block(&self) -> &BlockStamp {
        match self {
            RescanEvent::BlockConnected {
                block,
                ..
            }
            | RescanEvent::BlockDisconnected {
                block,
            } => block,
            RescanEvent::MatchReceived(tx) | RescanEvent::MatchRedeeming(tx) => &tx.block,
        }
    }
}

/// Receives rescan notifications. Every method defaults to a no-op.
pub trait RescanEventHandler: Send {
    fn on_block_connected(&mut self, _block: &BlockStamp, _matched: usize) {}

    fn on_block_disconnected(&mut self, _block: &BlockStamp) {}

    fn on_receive(&mut self, _tx: &TxMatch) {}

    fn on_redeem(&mut self, _tx: &TxMatch) {}

    /// Route one event to the matching callback.
    fn dispatch(&mut self, event: &RescanEvent) {
        match event {
            RescanEvent::BlockConnected {
                block,
                matched,
            } => self.on_block_connected(block, *matched),
            RescanEvent::BlockDisconnected {
                block,
            } => self.on_block_disconnected(block),
            RescanEvent::MatchReceived(tx) => self.on_receive(tx),
            RescanEvent::MatchRedeeming(tx) => self.on_redeem(tx),
        }
    }
}

/// Handler that reports matches through `tracing`.
#[derive(Debug, Default)]
pub struct LoggingHandler;

impl RescanEventHandler for LoggingHandler {
    fn on_block_connected(&mut self, block: &BlockStamp, matched: usize) {
        if matched > 0 {
            tracing::info!("Block {} connected with {} matches", block, matched);
        } else {
            tracing::trace!("Block {} connected", block);
        }
    }

    fn on_block_disconnected(&mut self, block: &BlockStamp) {
        tracing::warn!("Block {} disconnected", block);
    }

    fn on_receive(&mut self, tx: &TxMatch) {
        tracing::info!("Received: tx {} at block {} (index {})", tx.txid, tx.block, tx.index);
    }

    fn on_redeem(&mut self, tx: &TxMatch) {
        tracing::info!("Redeemed: tx {} at block {} (index {})", tx.txid, tx.block, tx.index);
    }
}
