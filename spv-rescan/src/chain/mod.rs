//! Chain service abstraction.
//!
//! The coordinator never talks to peers or validates headers itself. It drives
//! a [`ChainService`], which keeps the header chain and compact filter index and
//! exposes a rescan primitive. [`NodeChainService`] implements it on top of a
//! Bitcoin Core node reached over JSON-RPC.

pub mod filters;
pub mod index;
pub mod matching;
pub mod node;

use std::sync::Arc;

use async_trait::async_trait;
use bitcoin::BlockHash;
use tokio::sync::mpsc;

use crate::error::ChainResult;
use crate::rescan::RescanEvent;
use crate::types::{BlockStamp, ScanRange, WatchTarget};

pub use filters::{FilterCache, FILTER_STORE};
pub use index::{HeaderIndex, HEADER_INDEX};
pub use node::NodeChainService;

/// Parameters of one invocation of the rescan primitive.
#[derive(Debug, Clone)]
pub struct RescanRequest {
    /// Blocks to examine, both bounds included.
    pub range: ScanRange,
    /// Script matched against every block in the range.
    pub watch: WatchTarget,
}

/// Chain service trait for abstracting the header/filter backend.
#[async_trait]
pub trait ChainService: Send + Sync + 'static {
    /// Start background synchronization.
    async fn start(&self) -> ChainResult<()>;

    /// Stop background synchronization. Safe to call more than once.
    async fn stop(&self);

    /// Highest block synchronized so far.
    async fn best_block(&self) -> ChainResult<BlockStamp>;

    /// Hash of the block at `height` on the synchronized chain.
    async fn get_block_hash(&self, height: u32) -> ChainResult<BlockHash>;

    /// Examine every block of `request.range` and report what was found on `events`.
    ///
    /// Within one forward pass events are sent in ascending height order, with
    /// the matches of a block sent before its `BlockConnected` event. Returns
    /// `Ok(())` only once every block in the range has been examined.
    async fn rescan(
        &self,
        request: RescanRequest,
        events: mpsc::Sender<RescanEvent>,
    ) -> ChainResult<()>;
}

#[async_trait]
impl<T: ChainService + ?Sized> ChainService for Arc<T> {
    async fn start(&self) -> ChainResult<()> {
        (**self).start().await
    }

    async fn stop(&self) {
        (**self).stop().await
    }

    async fn best_block(&self) -> ChainResult<BlockStamp> {
        (**self).best_block().await
    }

    async fn get_block_hash(&self, height: u32) -> ChainResult<BlockHash> {
        (**self).get_block_hash(height).await
    }

    async fn rescan(
        &self,
        request: RescanRequest,
        events: mpsc::Sender<RescanEvent>,
    ) -> ChainResult<()> {
        (**self).rescan(request, events).await
    }
}
