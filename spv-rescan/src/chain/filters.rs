//! BIP158 filter cache and script matching.
//!
//! Persisted filters live in the `filter-store` top-level bucket, nested
//! bucket `basic`, keyed by the big-endian block height followed by the block
//! hash so that they sort in chain order.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};

use bitcoin::bip158::BlockFilter;
use bitcoin::hashes::Hash;
use bitcoin::{BlockHash, Script};

use crate::error::{ChainError, ChainResult, StorageError, StorageResult};
use crate::storage::Store;
use crate::types::BlockStamp;

pub const FILTER_STORE: &str = "filter-store";

/// How many filters the in-memory cache keeps before dropping the oldest.
pub const TRANSIENT_FILTER_CAPACITY: usize = 1_000;

const BASIC_FILTERS: &[u8] = b"basic";

/// Where filters are kept.
#[derive(Debug)]
pub enum FilterCache {
    /// Written to the `filter-store` bucket and flushed with the store.
    Persistent(Arc<Store>),
    /// The most recently used filters, in memory only.
    Transient(Mutex<RecentFilters>),
}

impl FilterCache {
    pub fn new(store: Arc<Store>, persist_to_disk: bool) -> StorageResult<Self> {
        if persist_to_disk {
            store.create_bucket(FILTER_STORE, BASIC_FILTERS)?;
            Ok(FilterCache::Persistent(store))
        } else {
            Ok(Self::transient(TRANSIENT_FILTER_CAPACITY))
        }
    }

    pub fn transient(capacity: usize) -> Self {
        FilterCache::Transient(Mutex::new(RecentFilters::new(capacity)))
    }

    pub fn get(&self, block: &BlockStamp) -> StorageResult<Option<Vec<u8>>> {
        match self {
            FilterCache::Persistent(store) => {
                store.get(FILTER_STORE, BASIC_FILTERS, &filter_key(block))
            }
            FilterCache::Transient(recent) => Ok(lock(recent)?.get(&block.hash).cloned()),
        }
    }

    pub fn insert(&self, block: &BlockStamp, filter: Vec<u8>) -> StorageResult<()> {
        match self {
            FilterCache::Persistent(store) => {
                store.put(FILTER_STORE, BASIC_FILTERS, &filter_key(block), &filter)
            }
            FilterCache::Transient(recent) => {
                lock(recent)?.insert(block.hash, filter);
                Ok(())
            }
        }
    }

    pub fn remove(&self, block: &BlockStamp) -> StorageResult<()> {
        match self {
            FilterCache::Persistent(store) => {
                store.delete(FILTER_STORE, BASIC_FILTERS, &filter_key(block))?;
            }
            FilterCache::Transient(recent) => lock(recent)?.remove(&block.hash),
        }
        Ok(())
    }

    pub fn is_persistent(&self) -> bool {
        matches!(self, FilterCache::Persistent(_))
    }
}

/// Store key of a persisted filter.
pub fn filter_key(block: &BlockStamp) -> Vec<u8> {
    let mut key = Vec::with_capacity(36);
    key.extend_from_slice(&block.height.to_be_bytes());
    key.extend_from_slice(block.hash.as_byte_array());
    key
}

fn lock(recent: &Mutex<RecentFilters>) -> StorageResult<MutexGuard<'_, RecentFilters>> {
    recent.lock().map_err(|e| StorageError::LockPoisoned(e.to_string()))
}

/// Bounded filter map that forgets the oldest insertion first.
#[derive(Debug)]
pub struct RecentFilters {
    capacity: usize,
    order: VecDeque<BlockHash>,
    filters: HashMap<BlockHash, Vec<u8>>,
}

impl RecentFilters {
    fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            order: VecDeque::new(),
            filters: HashMap::new(),
        }
    }

    fn get(&self, block: &BlockHash) -> Option<&Vec<u8>> {
        self.filters.get(block)
    }

    fn insert(&mut self, block: BlockHash, filter: Vec<u8>) {
        if self.filters.insert(block, filter).is_none() {
            self.order.push_back(block);
        }
        while self.filters.len() > self.capacity {
            let Some(oldest) = self.order.pop_front() else {
                break;
            };
            self.filters.remove(&oldest);
        }
    }

    fn remove(&mut self, block: &BlockHash) {
        if self.filters.remove(block).is_some() {
            self.order.retain(|hash| hash != block);
        }
    }

    pub fn len(&self) -> usize {
        self.filters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
    }
}

/// Check a raw BIP158 basic filter for `script`.
pub fn filter_matches_script(
    filter_data: &[u8],
    block_hash: BlockHash,
    script: &Script,
) -> ChainResult<bool> {
    if filter_data.is_empty() {
        tracing::debug!("Empty filter data for block {}, no matches possible", block_hash);
        return Ok(false);
    }

    let filter = BlockFilter::new(filter_data);
    let matches =
        filter.match_any(&block_hash, std::iter::once(script.as_bytes())).map_err(|e| {
            ChainError::Filter {
                block: block_hash,
                message: e.to_string(),
            }
        })?;

    if matches {
        tracing::debug!("BIP158 filter match for block {}", block_hash);
    } else {
        tracing::trace!("No BIP158 filter match for block {}", block_hash);
    }
    Ok(matches)
}
