//! Tests for editing a coordinator store the way the `spv-store` tool does.

use std::sync::Arc;

use bitcoin::hashes::Hash;
use tempfile::TempDir;

use spv_rescan::chain::filters::filter_key;
use spv_rescan::chain::{FilterCache, HeaderIndex, FILTER_STORE, HEADER_INDEX};
use spv_rescan::storage::{inspect, Store, DEFAULT_OPEN_TIMEOUT};
use spv_rescan::test_utils::stub_hash;
use spv_rescan::{BlockStamp, StorageError};

fn blocks(range: std::ops::RangeInclusive<u32>) -> Vec<BlockStamp> {
    range.map(|h| BlockStamp::new(h, stub_hash(h))).collect()
}

async fn open(dir: &TempDir) -> Arc<Store> {
    Arc::new(Store::open(dir.path().join("filters.db"), DEFAULT_OPEN_TIMEOUT).await.unwrap())
}

#[tokio::test]
async fn test_list_header_heights_in_order() {
    let temp_dir = TempDir::new().unwrap();
    {
        let store = open(&temp_dir).await;
        HeaderIndex::new(store.clone()).unwrap().connect(&blocks(0..=4)).unwrap();
        store.flush().unwrap();
    }

    let store = open(&temp_dir).await;
    let sub = inspect::parse_bucket_arg("heights").unwrap();
    let entries = inspect::list(&store, HEADER_INDEX, &sub).unwrap();

    let heights: Vec<u32> = entries
        .iter()
        .map(|e| u32::from_be_bytes(e.key.as_slice().try_into().unwrap()))
        .collect();
    assert_eq!(heights, vec![0, 1, 2, 3, 4]);
    assert_eq!(entries[3].value, stub_hash(3).to_byte_array().to_vec());
    assert_eq!(
        entries[0].to_string(),
        format!("Key: 00000000  Value: {}", hex::encode(stub_hash(0).to_byte_array()))
    );
}

#[tokio::test]
async fn test_overwrite_tip_is_seen_after_reopen() {
    let temp_dir = TempDir::new().unwrap();
    {
        let store = open(&temp_dir).await;
        HeaderIndex::new(store.clone()).unwrap().connect(&blocks(0..=9)).unwrap();
        store.flush().unwrap();
    }

    {
        let store = open(&temp_dir).await;
        let mut tip = 6u32.to_be_bytes().to_vec();
        tip.extend_from_slice(&stub_hash(6).to_byte_array());
        inspect::overwrite(&store, HEADER_INDEX, b"meta", b"tip", &tip).unwrap();
    }

    let store = open(&temp_dir).await;
    let index = HeaderIndex::new(store).unwrap();
    assert_eq!(index.tip().unwrap(), Some(BlockStamp::new(6, stub_hash(6))));
}

#[tokio::test]
async fn test_delete_persisted_filter() {
    let temp_dir = TempDir::new().unwrap();
    let seven = BlockStamp::new(7, stub_hash(7));
    let eight = BlockStamp::new(8, stub_hash(8));
    let key = filter_key(&seven);
    {
        let store = open(&temp_dir).await;
        let filters = FilterCache::new(store.clone(), true).unwrap();
        filters.insert(&seven, vec![0x01, 0x02]).unwrap();
        filters.insert(&eight, vec![0x03]).unwrap();
        store.flush().unwrap();
    }

    {
        let store = open(&temp_dir).await;
        let sub = inspect::parse_bucket_arg("basic").unwrap();
        assert_eq!(inspect::get(&store, FILTER_STORE, &sub, &key).unwrap().value, vec![1, 2]);
        inspect::delete(&store, FILTER_STORE, &sub, &key).unwrap();

        let err = inspect::delete(&store, FILTER_STORE, &sub, &key).unwrap_err();
        assert!(matches!(err, StorageError::NotFound(_)));
    }

    let store = open(&temp_dir).await;
    let filters = FilterCache::new(store, true).unwrap();
    assert_eq!(filters.get(&seven).unwrap(), None);
    assert_eq!(filters.get(&eight).unwrap(), Some(vec![0x03]));
}

#[tokio::test]
async fn test_transient_filters_leave_no_bucket() {
    let temp_dir = TempDir::new().unwrap();
    {
        let store = open(&temp_dir).await;
        let filters = FilterCache::new(store.clone(), false).unwrap();
        filters.insert(&BlockStamp::new(1, stub_hash(1)), vec![0xaa]).unwrap();
        store.flush().unwrap();
    }

    let store = open(&temp_dir).await;
    assert!(!store.has_top(FILTER_STORE).unwrap());
    let err = inspect::list(&store, FILTER_STORE, b"basic").unwrap_err();
    assert!(matches!(err, StorageError::NotFound(_)));
}

#[tokio::test]
async fn test_hex_sub_bucket_addresses_binary_ids() {
    let temp_dir = TempDir::new().unwrap();
    {
        let store = open(&temp_dir).await;
        store.put("wtxmgr", &[0x59, 0x29], b"k", b"v").unwrap();
        store.flush().unwrap();
    }

    let store = open(&temp_dir).await;
    let sub = inspect::parse_bucket_arg("0x5929").unwrap();
    let entry = inspect::get(&store, "wtxmgr", &sub, b"k").unwrap();
    assert_eq!(entry.value, b"v".to_vec());
}

#[tokio::test]
async fn test_filters_list_in_chain_order_across_segments() {
    let temp_dir = TempDir::new().unwrap();
    {
        let store = open(&temp_dir).await;
        let filters = FilterCache::new(store.clone(), true).unwrap();
        for batch in 0u32..6 {
            for height in batch * 500..(batch + 1) * 500 {
                let filter = height.to_le_bytes().repeat(75);
                filters.insert(&BlockStamp::new(height, stub_hash(height)), filter).unwrap();
            }
            store.flush().unwrap();
        }
    }

    let store = open(&temp_dir).await;
    let sub = inspect::parse_bucket_arg("basic").unwrap();
    let entries = inspect::list(&store, FILTER_STORE, &sub).unwrap();

    assert_eq!(entries.len(), 3_000);
    for (height, entry) in (0u32..).zip(&entries) {
        assert_eq!(entry.key, filter_key(&BlockStamp::new(height, stub_hash(height))));
    }
    assert_eq!(entries[2_345].value.len(), 300);
}
