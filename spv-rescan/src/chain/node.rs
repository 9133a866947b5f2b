//! Chain service backed by a Bitcoin Core node over JSON-RPC.
//!
//! A background task mirrors the node's header chain into the [`HeaderIndex`]
//! and, when filters are persisted, fetches the BIP158 basic filter of every
//! block. Rescans then run against the local index and only fetch full blocks
//! whose filter matches.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bitcoin::{Block, BlockHash, OutPoint};
use bitcoincore_rpc::{Auth, Client, RpcApi};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::filters::{filter_matches_script, FilterCache};
use super::index::HeaderIndex;
use super::matching::{disconnected_blocks, match_block};
use super::{ChainService, RescanRequest};
use crate::client::{Config, RpcAuth};
use crate::error::{ChainError, ChainResult};
use crate::rescan::RescanEvent;
use crate::storage::Store;
use crate::types::BlockStamp;

/// Blocking JSON-RPC client, driven from `spawn_blocking`.
struct RpcNode {
    client: Arc<Client>,
}

impl RpcNode {
    /// Run `f` on the blocking pool. `operation` names the call and its
    /// parameters in errors.
    async fn call<T, F>(&self, operation: String, f: F) -> ChainResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&Client) -> bitcoincore_rpc::Result<T> + Send + 'static,
    {
        let client = self.client.clone();
        match tokio::task::spawn_blocking(move || f(&client)).await {
            Ok(result) => result.map_err(|e| rpc_error(operation, e)),
            Err(e) => Err(ChainError::TaskFailed(format!("{} task failed: {}", operation, e))),
        }
    }

    async fn block_count(&self) -> ChainResult<u32> {
        let count = self.call("getblockcount".to_string(), |c| c.get_block_count()).await?;
        u32::try_from(count).map_err(|_| ChainError::Rpc {
            operation: "getblockcount".to_string(),
            message: format!("height {} out of range", count),
        })
    }

    async fn block_hash(&self, height: u32) -> ChainResult<BlockHash> {
        let operation = format!("getblockhash {}", height);
        self.call(operation, move |c| c.get_block_hash(u64::from(height))).await
    }

    async fn block_filter(&self, hash: BlockHash) -> ChainResult<Vec<u8>> {
        let operation = format!("getblockfilter {}", hash);
        let result = self.call(operation, move |c| c.get_block_filter(&hash)).await?;
        Ok(result.filter)
    }

    async fn block(&self, hash: BlockHash) -> ChainResult<Block> {
        self.call(format!("getblock {}", hash), move |c| c.get_block(&hash)).await
    }
}

/// State shared between the service and its sync task.
struct Shared {
    node: RpcNode,
    store: Arc<Store>,
    index: HeaderIndex,
    filters: FilterCache,
    batch_size: u32,
}

impl Shared {
    /// Bring the index up to the node's tip. Returns the new tip, if any.
    async fn sync_once(&self, token: &CancellationToken) -> ChainResult<Option<BlockStamp>> {
        let node_height = self.node.block_count().await?;

        if let Some(tip) = self.index.tip()? {
            self.rewind_if_reorganized(tip, node_height).await?;
        }

        let mut next = self.index.tip()?.map_or(0, |tip| tip.height + 1);
        while next <= node_height {
            if token.is_cancelled() {
                break;
            }

            let last = node_height.min(next.saturating_add(self.batch_size - 1));
            let mut batch = Vec::with_capacity((last - next + 1) as usize);
            for height in next..=last {
                let block = BlockStamp::new(height, self.node.block_hash(height).await?);
                // In-memory filters are fetched when a rescan needs them.
                if self.filters.is_persistent() {
                    let filter = self.node.block_filter(block.hash).await?;
                    self.filters.insert(&block, filter)?;
                }
                batch.push(block);
            }

            self.index.connect(&batch)?;
            self.store.flush()?;
            tracing::info!("Synchronized headers up to height {}", last);

            next = last + 1;
        }

        Ok(self.index.tip()?)
    }

    async fn rewind_if_reorganized(&self, tip: BlockStamp, node_height: u32) -> ChainResult<()> {
        let mut height = tip.height.min(node_height);
        let fork_point = loop {
            let stored = self.index.hash_at(height)?;
            if stored.is_some() && stored == Some(self.node.block_hash(height).await?) {
                break Some(height);
            }
            if height == 0 {
                break None;
            }
            height -= 1;
        };

        if fork_point == Some(tip.height) {
            return Ok(());
        }

        let removed = self.index.rollback(fork_point)?;
        for block in &removed {
            self.filters.remove(block)?;
        }
        self.store.flush()?;
        tracing::warn!(
            "Chain reorganization: dropped {} blocks above {:?} (old tip {})",
            removed.len(),
            fork_point,
            tip
        );
        Ok(())
    }

    async fn filter_for(&self, block: &BlockStamp) -> ChainResult<Vec<u8>> {
        if let Some(filter) = self.filters.get(block)? {
            return Ok(filter);
        }
        let filter = self.node.block_filter(block.hash).await?;
        self.filters.insert(block, filter.clone())?;
        Ok(filter)
    }
}

struct SyncWorker {
    token: CancellationToken,
    handle: JoinHandle<()>,
}

/// [`ChainService`] implementation talking to a Bitcoin Core node.
pub struct NodeChainService {
    shared: Arc<Shared>,
    poll_interval: Duration,
    worker: Mutex<Option<SyncWorker>>,
}

impl NodeChainService {
    /// Build the service from the configuration and the opened store.
    pub fn new(config: &Config, store: Arc<Store>) -> ChainResult<Self> {
        let auth = match &config.rpc.auth {
            RpcAuth::None => Auth::None,
            RpcAuth::UserPass {
                user,
                password,
            } => Auth::UserPass(user.clone(), password.clone()),
            RpcAuth::CookieFile(path) => Auth::CookieFile(path.clone()),
        };
        let client = Client::new(&config.rpc.url, auth).map_err(|e| ChainError::Rpc {
            operation: "connect".to_string(),
            message: e.to_string(),
        })?;

        let index = HeaderIndex::new(store.clone())?;
        let filters = FilterCache::new(store.clone(), config.persist_to_disk)?;

        tracing::info!(
            "Chain service using node at {} (filters {})",
            config.rpc.url,
            if filters.is_persistent() {
                "persisted to disk"
            } else {
                "kept in memory"
            }
        );

        Ok(Self {
            shared: Arc::new(Shared {
                node: RpcNode {
                    client: Arc::new(client),
                },
                store,
                index,
                filters,
                batch_size: config.rpc.batch_size.max(1),
            }),
            poll_interval: config.rpc.poll_interval,
            worker: Mutex::new(None),
        })
    }
}

#[async_trait]
impl ChainService for NodeChainService {
    async fn start(&self) -> ChainResult<()> {
        let mut worker = self.worker.lock().await;
        if worker.is_some() {
            return Err(ChainError::AlreadyRunning);
        }

        // Fail the start when the node is unreachable.
        let node_height = self.shared.node.block_count().await?;
        tracing::info!("Node reports height {}", node_height);

        let token = CancellationToken::new();
        let shared = self.shared.clone();
        let task_token = token.clone();
        let poll_interval = self.poll_interval;

        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(poll_interval);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    biased;
                    _ = task_token.cancelled() => break,
                    _ = interval.tick() => {}
                }

                tokio::select! {
                    biased;
                    _ = task_token.cancelled() => break,
                    result = shared.sync_once(&task_token) => {
                        if let Err(e) = result {
                            tracing::warn!("Header sync pass failed: {}", e);
                        }
                    }
                }
            }
            tracing::debug!("Header sync task exiting");
        });

        *worker = Some(SyncWorker {
            token,
            handle,
        });
        Ok(())
    }

    async fn stop(&self) {
        let Some(worker) = self.worker.lock().await.take() else {
            return;
        };

        worker.token.cancel();
        if let Err(e) = worker.handle.await {
            tracing::warn!("Header sync task ended abnormally: {}", e);
        }
        if let Err(e) = self.shared.store.flush() {
            tracing::error!("Failed to flush store on stop: {}", e);
        }
        tracing::info!("Chain service stopped");
    }

    async fn best_block(&self) -> ChainResult<BlockStamp> {
        self.shared.index.tip()?.ok_or(ChainError::NotSynced)
    }

    async fn get_block_hash(&self, height: u32) -> ChainResult<BlockHash> {
        self.shared.index.hash_at(height)?.ok_or(ChainError::UnknownHeight(height))
    }

    async fn rescan(
        &self,
        request: RescanRequest,
        events: mpsc::Sender<RescanEvent>,
    ) -> ChainResult<()> {
        let shared = &self.shared;
        let script = request.watch.script();
        let mut watched_outpoints: HashSet<OutPoint> = HashSet::new();
        let mut connected = Vec::with_capacity(request.range.len().min(1 << 16) as usize);

        let send = |event: RescanEvent| {
            let events = events.clone();
            async move { events.send(event).await.map_err(|_| ChainError::ReceiverDropped) }
        };

        for height in request.range.heights() {
            let hash = shared.index.hash_at(height)?.ok_or(ChainError::UnknownHeight(height))?;
            let stamp = BlockStamp::new(height, hash);
            let filter = shared.filter_for(&stamp).await?;

            if filter_matches_script(&filter, hash, script)? {
                let block = shared.node.block(hash).await?;
                for event in match_block(&block, stamp, script, &mut watched_outpoints) {
                    send(event).await?;
                }
            } else {
                send(RescanEvent::BlockConnected {
                    block: stamp,
                    matched: 0,
                })
                .await?;
            }
            connected.push(stamp);
        }

        // The node may have reorganized past the end of the range while scanning.
        let disconnected =
            disconnected_blocks(&connected, move |height| shared.node.block_hash(height)).await?;
        for block in disconnected {
            send(RescanEvent::BlockDisconnected {
                block,
            })
            .await?;
        }

        Ok(())
    }
}

fn rpc_error(operation: String, error: bitcoincore_rpc::Error) -> ChainError {
    ChainError::Rpc {
        operation,
        message: error.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bitcoin::hashes::Hash;

    #[test]
    fn test_rpc_error_names_the_parameters() {
        let hash = BlockHash::from_byte_array([0x11; 32]);
        let error = rpc_error(
            format!("getblockfilter {}", hash),
            bitcoincore_rpc::Error::ReturnedError("Filter not found".to_string()),
        );

        let message = error.to_string();
        assert!(message.starts_with(&format!("RPC call getblockfilter {} failed: ", hash)));
        assert!(message.ends_with("Filter not found"));

        let error = rpc_error(
            format!("getblockhash {}", 812_000),
            bitcoincore_rpc::Error::ReturnedError("Block height out of range".to_string()),
        );
        assert!(matches!(
            error,
            ChainError::Rpc { ref operation, .. } if operation == "getblockhash 812000"
        ));
    }
}
