use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use bitcoin::hashes::Hash;
use bitcoin::{BlockHash, Txid};
use tokio::sync::mpsc;

use crate::chain::{ChainService, RescanRequest};
use crate::error::{ChainError, ChainResult};
use crate::rescan::{RescanEvent, TxMatch};
use crate::types::BlockStamp;

/// Deterministic hash for the stub block at `height`.
pub fn stub_hash(height: u32) -> BlockHash {
    let mut bytes = [0xb1u8; 32];
    bytes[..4].copy_from_slice(&height.to_le_bytes());
    BlockHash::from_byte_array(bytes)
}

/// Deterministic txid for the `index`-th stub transaction of block `height`.
pub fn stub_txid(height: u32, index: usize) -> Txid {
    let mut bytes = [0x7au8; 32];
    bytes[..4].copy_from_slice(&height.to_le_bytes());
    bytes[4..12].copy_from_slice(&(index as u64).to_le_bytes());
    Txid::from_byte_array(bytes)
}

/// Scripted chain service for tests.
///
/// `best_block` replays a list of replies (`None` is a query error) and keeps
/// returning the last one once the list is exhausted. `rescan` walks the
/// requested range and reports the scripted matches.
pub struct StubChainService {
    replies: Mutex<VecDeque<Option<u32>>>,
    receive_at: Vec<u32>,
    redeem_at: Vec<u32>,
    missing_hashes: HashSet<u32>,
    fail_start: bool,
    fail_rescan_at: Option<u32>,
    pause_after: Option<u32>,
    start_calls: AtomicUsize,
    stop_calls: AtomicUsize,
    best_block_calls: AtomicUsize,
    rescan_calls: AtomicUsize,
}

impl StubChainService {
    /// Best block heights returned by successive queries.
    pub fn with_heights(heights: impl IntoIterator<Item = u32>) -> Self {
        Self::with_replies(heights.into_iter().map(Some))
    }

    /// Best block replies, `None` meaning the query fails.
    pub fn with_replies(replies: impl IntoIterator<Item = Option<u32>>) -> Self {
        Self {
            replies: Mutex::new(replies.into_iter().collect()),
            receive_at: Vec::new(),
            redeem_at: Vec::new(),
            missing_hashes: HashSet::new(),
            fail_start: false,
            fail_rescan_at: None,
            pause_after: None,
            start_calls: AtomicUsize::new(0),
            stop_calls: AtomicUsize::new(0),
            best_block_calls: AtomicUsize::new(0),
            rescan_calls: AtomicUsize::new(0),
        }
    }

    /// Report one receiving transaction per entry, at that height.
    pub fn receive_at(mut self, heights: impl IntoIterator<Item = u32>) -> Self {
        self.receive_at.extend(heights);
        self
    }

    /// Report one redeeming transaction per entry, at that height.
    pub fn redeem_at(mut self, heights: impl IntoIterator<Item = u32>) -> Self {
        self.redeem_at.extend(heights);
        self
    }

    /// Make `get_block_hash` fail for `height`.
    pub fn without_hash_at(mut self, height: u32) -> Self {
        self.missing_hashes.insert(height);
        self
    }

    pub fn failing_start(mut self) -> Self {
        self.fail_start = true;
        self
    }

    /// Make the rescan primitive fail when it reaches `height`.
    pub fn failing_rescan_at(mut self, height: u32) -> Self {
        self.fail_rescan_at = Some(height);
        self
    }

    /// Make the rescan primitive hang after connecting `height`.
    pub fn pausing_after(mut self, height: u32) -> Self {
        self.pause_after = Some(height);
        self
    }

    pub fn start_calls(&self) -> usize {
        self.start_calls.load(Ordering::SeqCst)
    }

    pub fn stop_calls(&self) -> usize {
        self.stop_calls.load(Ordering::SeqCst)
    }

    pub fn best_block_calls(&self) -> usize {
        self.best_block_calls.load(Ordering::SeqCst)
    }

    pub fn rescan_calls(&self) -> usize {
        self.rescan_calls.load(Ordering::SeqCst)
    }

    fn next_reply(&self) -> Option<u32> {
        let mut replies = self.replies.lock().unwrap_or_else(|e| e.into_inner());
        if replies.len() > 1 {
            replies.pop_front().flatten()
        } else {
            replies.front().copied().flatten()
        }
    }

    async fn send(events: &mpsc::Sender<RescanEvent>, event: RescanEvent) -> ChainResult<()> {
        events.send(event).await.map_err(|_| ChainError::ReceiverDropped)
    }
}

#[async_trait]
impl ChainService for StubChainService {
    async fn start(&self) -> ChainResult<()> {
        self.start_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_start {
            return Err(ChainError::Rpc {
                operation: "getblockcount".to_string(),
                message: "connection refused".to_string(),
            });
        }
        Ok(())
    }

    async fn stop(&self) {
        self.stop_calls.fetch_add(1, Ordering::SeqCst);
    }

    async fn best_block(&self) -> ChainResult<BlockStamp> {
        self.best_block_calls.fetch_add(1, Ordering::SeqCst);
        match self.next_reply() {
            Some(height) => Ok(BlockStamp::new(height, stub_hash(height))),
            None => Err(ChainError::NotSynced),
        }
    }

    async fn get_block_hash(&self, height: u32) -> ChainResult<BlockHash> {
        if self.missing_hashes.contains(&height) {
            return Err(ChainError::UnknownHeight(height));
        }
        Ok(stub_hash(height))
    }

    async fn rescan(
        &self,
        request: RescanRequest,
        events: mpsc::Sender<RescanEvent>,
    ) -> ChainResult<()> {
        self.rescan_calls.fetch_add(1, Ordering::SeqCst);

        for height in request.range.heights() {
            if self.fail_rescan_at == Some(height) {
                return Err(ChainError::Rpc {
                    operation: "getblock".to_string(),
                    message: format!("block {} unavailable", height),
                });
            }

            let block = BlockStamp::new(height, stub_hash(height));
            let mut index = 0;
            for _ in self.redeem_at.iter().filter(|h| **h == height) {
                let tx = TxMatch {
                    txid: stub_txid(height, index),
                    block,
                    index,
                };
                Self::send(&events, RescanEvent::MatchRedeeming(tx)).await?;
                index += 1;
            }
            for _ in self.receive_at.iter().filter(|h| **h == height) {
                let tx = TxMatch {
                    txid: stub_txid(height, index),
                    block,
                    index,
                };
                Self::send(&events, RescanEvent::MatchReceived(tx)).await?;
                index += 1;
            }
            Self::send(
                &events,
                RescanEvent::BlockConnected {
                    block,
                    matched: index,
                },
            )
            .await?;

            if self.pause_after == Some(height) {
                std::future::pending::<()>().await;
            }
        }

        Ok(())
    }
}
