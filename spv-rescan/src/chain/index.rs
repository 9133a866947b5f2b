//! Height/hash index of the synchronized header chain.
//!
//! Layout inside the `header-index` top-level bucket:
//! - `heights`: big-endian height -> 32-byte block hash
//! - `meta`: `tip` -> big-endian height followed by the tip hash

use std::sync::Arc;

use bitcoin::hashes::Hash;
use bitcoin::BlockHash;

use crate::error::{StorageError, StorageResult};
use crate::storage::Store;
use crate::types::BlockStamp;

pub const HEADER_INDEX: &str = "header-index";

const HEIGHTS: &[u8] = b"heights";
const META: &[u8] = b"meta";
const TIP_KEY: &[u8] = b"tip";

/// Store-backed header index.
#[derive(Debug, Clone)]
pub struct HeaderIndex {
    store: Arc<Store>,
}

impl HeaderIndex {
    /// Create the index buckets if they do not exist yet.
    pub fn new(store: Arc<Store>) -> StorageResult<Self> {
        for sub in [HEIGHTS, META] {
            store.create_bucket(HEADER_INDEX, sub)?;
        }
        Ok(Self {
            store,
        })
    }

    /// The highest indexed block, if any.
    pub fn tip(&self) -> StorageResult<Option<BlockStamp>> {
        let Some(raw) = self.store.get(HEADER_INDEX, META, TIP_KEY)? else {
            return Ok(None);
        };
        if raw.len() != 36 {
            return Err(StorageError::Corruption(format!(
                "tip record has {} bytes, expected 36",
                raw.len()
            )));
        }
        let mut height = [0u8; 4];
        height.copy_from_slice(&raw[..4]);
        Ok(Some(BlockStamp::new(u32::from_be_bytes(height), decode_hash(&raw[4..])?)))
    }

    pub fn hash_at(&self, height: u32) -> StorageResult<Option<BlockHash>> {
        self.store
            .get(HEADER_INDEX, HEIGHTS, &height.to_be_bytes())?
            .map(|raw| decode_hash(&raw))
            .transpose()
    }

    /// Append consecutive blocks on top of the current tip.
    pub fn connect(&self, blocks: &[BlockStamp]) -> StorageResult<()> {
        let Some(last) = blocks.last() else {
            return Ok(());
        };

        let expected = match self.tip()? {
            Some(tip) => tip.height + 1,
            None => 0,
        };
        if blocks[0].height != expected
            || blocks.windows(2).any(|pair| pair[1].height != pair[0].height + 1)
        {
            return Err(StorageError::Corruption(format!(
                "blocks starting at {} do not extend the index at {}",
                blocks[0].height, expected
            )));
        }

        let by_height = blocks
            .iter()
            .map(|b| (b.height.to_be_bytes().to_vec(), b.hash.to_byte_array().to_vec()));
        self.store.put_many(HEADER_INDEX, HEIGHTS, by_height)?;
        self.set_tip(Some(last))
    }

    /// Drop every block above `keep` (everything when `None`).
    ///
    /// Returns the removed blocks, highest first.
    pub fn rollback(&self, keep: Option<u32>) -> StorageResult<Vec<BlockStamp>> {
        let Some(tip) = self.tip()? else {
            return Ok(Vec::new());
        };
        let lowest_removed = keep.map_or(0, |h| h + 1);
        if lowest_removed > tip.height {
            return Ok(Vec::new());
        }

        let mut removed = Vec::new();
        for height in (lowest_removed..=tip.height).rev() {
            if let Some(hash) = self.hash_at(height)? {
                self.store.delete(HEADER_INDEX, HEIGHTS, &height.to_be_bytes())?;
                removed.push(BlockStamp::new(height, hash));
            }
        }

        let new_tip = match keep {
            Some(height) => self.hash_at(height)?.map(|hash| BlockStamp::new(height, hash)),
            None => None,
        };
        self.set_tip(new_tip.as_ref())?;

        Ok(removed)
    }

    fn set_tip(&self, tip: Option<&BlockStamp>) -> StorageResult<()> {
        match tip {
            Some(tip) => {
                let mut raw = Vec::with_capacity(36);
                raw.extend_from_slice(&tip.height.to_be_bytes());
                raw.extend_from_slice(tip.hash.as_byte_array());
                self.store.put(HEADER_INDEX, META, TIP_KEY, &raw)
            }
            None => {
                self.store.delete(HEADER_INDEX, META, TIP_KEY)?;
                Ok(())
            }
        }
    }
}

fn decode_hash(raw: &[u8]) -> StorageResult<BlockHash> {
    let bytes: [u8; 32] = raw
        .try_into()
        .map_err(|_| StorageError::Corruption(format!("block hash has {} bytes", raw.len())))?;
    Ok(BlockHash::from_byte_array(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::DEFAULT_OPEN_TIMEOUT;
    use tempfile::TempDir;

    fn stamp(height: u32, fork: u8) -> BlockStamp {
        let mut bytes = [fork; 32];
        bytes[..4].copy_from_slice(&height.to_le_bytes());
        BlockStamp::new(height, BlockHash::from_byte_array(bytes))
    }

    fn chain(range: std::ops::RangeInclusive<u32>, fork: u8) -> Vec<BlockStamp> {
        range.map(|h| stamp(h, fork)).collect()
    }

    #[tokio::test]
    async fn test_connect_and_lookup() {
        let temp_dir = TempDir::new().unwrap();
        let store = Arc::new(Store::open(temp_dir.path(), DEFAULT_OPEN_TIMEOUT).await.unwrap());
        let index = HeaderIndex::new(store).unwrap();

        assert_eq!(index.tip().unwrap(), None);
        index.connect(&chain(0..=9, 0)).unwrap();
        index.connect(&chain(10..=14, 0)).unwrap();

        assert_eq!(index.tip().unwrap(), Some(stamp(14, 0)));
        assert_eq!(index.hash_at(3).unwrap(), Some(stamp(3, 0).hash));
        assert_eq!(index.hash_at(7).unwrap(), Some(stamp(7, 0).hash));
        assert_eq!(index.hash_at(15).unwrap(), None);
    }

    #[tokio::test]
    async fn test_connect_rejects_gaps() {
        let temp_dir = TempDir::new().unwrap();
        let store = Arc::new(Store::open(temp_dir.path(), DEFAULT_OPEN_TIMEOUT).await.unwrap());
        let index = HeaderIndex::new(store).unwrap();

        assert!(index.connect(&chain(1..=3, 0)).is_err());
        index.connect(&chain(0..=3, 0)).unwrap();
        assert!(index.connect(&chain(5..=6, 0)).is_err());
        assert_eq!(index.tip().unwrap(), Some(stamp(3, 0)));
    }

    #[tokio::test]
    async fn test_rollback_to_fork_point() {
        let temp_dir = TempDir::new().unwrap();
        let store = Arc::new(Store::open(temp_dir.path(), DEFAULT_OPEN_TIMEOUT).await.unwrap());
        let index = HeaderIndex::new(store).unwrap();
        index.connect(&chain(0..=10, 0)).unwrap();

        let removed = index.rollback(Some(7)).unwrap();
        assert_eq!(removed, vec![stamp(10, 0), stamp(9, 0), stamp(8, 0)]);
        assert_eq!(index.tip().unwrap(), Some(stamp(7, 0)));
        assert_eq!(index.hash_at(9).unwrap(), None);

        index.connect(&chain(8..=12, 1)).unwrap();
        assert_eq!(index.tip().unwrap(), Some(stamp(12, 1)));

        index.rollback(None).unwrap();
        assert_eq!(index.tip().unwrap(), None);
    }

    #[tokio::test]
    async fn test_index_survives_reopen() {
        let temp_dir = TempDir::new().unwrap();
        {
            let store =
                Arc::new(Store::open(temp_dir.path(), DEFAULT_OPEN_TIMEOUT).await.unwrap());
            let index = HeaderIndex::new(store.clone()).unwrap();
            index.connect(&chain(0..=4, 0)).unwrap();
            store.flush().unwrap();
        }

        let store = Arc::new(Store::open(temp_dir.path(), DEFAULT_OPEN_TIMEOUT).await.unwrap());
        let index = HeaderIndex::new(store).unwrap();
        assert_eq!(index.tip().unwrap(), Some(stamp(4, 0)));
    }
}
