//! Persistent nested-bucket key/value store.
//!
//! Data is addressed by a top-level bucket name, a nested bucket id (raw
//! bytes) and a key. Each nested bucket is split into segments that are read
//! on demand; mutations stay in memory until [`Store::flush`] writes the
//! segments they touched. A lock file keeps a second process from opening the
//! same store.

mod bucket;
pub mod inspect;
mod io;
mod lockfile;

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use crate::error::{StorageError, StorageResult};

use bucket::Bucket;
use lockfile::LockFile;

/// Default bounded wait for the store lock.
pub const DEFAULT_OPEN_TIMEOUT: Duration = Duration::from_secs(5);

type BucketId = (String, Vec<u8>);

#[derive(Debug, Default)]
struct StoreState {
    buckets: BTreeMap<BucketId, Bucket>,
    tops: BTreeSet<String>,
}

/// Nested-bucket store rooted at a directory.
#[derive(Debug)]
pub struct Store {
    root: PathBuf,
    state: Mutex<StoreState>,

    // Lock file to prevent concurrent access from multiple processes.
    _lock_file: LockFile,
}

impl Store {
    /// Open the store at `root`, creating it if needed.
    ///
    /// Safe to call against an existing store. Waits at most `timeout` for
    /// another process to release the lock, then fails with
    /// [`StorageError::LockTimeout`]. Only bucket manifests are read here.
    pub async fn open(root: impl Into<PathBuf>, timeout: Duration) -> StorageResult<Self> {
        let root = root.into();

        io::create_dir(&root)?;
        let lock_file = LockFile::acquire(root.join(".lock"), timeout).await?;

        let tops = io::list_tops(&root)?.into_iter().collect();
        let mut buckets = BTreeMap::new();
        for (top, sub) in io::list_buckets(&root)? {
            let bucket = Bucket::open(io::bucket_dir(&root, &top, &sub))?;
            buckets.insert((top, sub), bucket);
        }

        tracing::debug!("Opened store at {:?} with {} nested buckets", root, buckets.len());

        Ok(Self {
            root,
            state: Mutex::new(StoreState {
                buckets,
                tops,
            }),
            _lock_file: lock_file,
        })
    }

    pub fn path(&self) -> &Path {
        &self.root
    }

    /// Create a nested bucket (and its top-level bucket) if missing.
    pub fn create_bucket(&self, top: &str, sub: &[u8]) -> StorageResult<()> {
        let mut state = self.lock_state()?;
        self.bucket_or_create(&mut state, top, sub);
        Ok(())
    }

    /// Whether the top-level bucket exists.
    pub fn has_top(&self, top: &str) -> StorageResult<bool> {
        Ok(self.lock_state()?.tops.contains(top))
    }

    /// Read one value. Missing buckets are errors, a missing key is `None`.
    pub fn get(&self, top: &str, sub: &[u8], key: &[u8]) -> StorageResult<Option<Vec<u8>>> {
        let mut state = self.lock_state()?;
        Self::bucket_mut(&mut state, top, sub)?.get(key)
    }

    /// All entries of a nested bucket in key order.
    pub fn entries(&self, top: &str, sub: &[u8]) -> StorageResult<Vec<(Vec<u8>, Vec<u8>)>> {
        let mut state = self.lock_state()?;
        Self::bucket_mut(&mut state, top, sub)?.entries()
    }

    /// Insert or replace a value, creating the buckets as needed.
    pub fn put(&self, top: &str, sub: &[u8], key: &[u8], value: &[u8]) -> StorageResult<()> {
        self.put_many(top, sub, std::iter::once((key.to_vec(), value.to_vec())))
    }

    /// Insert or replace several values in one nested bucket.
    pub fn put_many<I>(&self, top: &str, sub: &[u8], items: I) -> StorageResult<()>
    where
        I: IntoIterator<Item = (Vec<u8>, Vec<u8>)>,
    {
        let mut state = self.lock_state()?;
        let bucket = self.bucket_or_create(&mut state, top, sub);
        for (key, value) in items {
            bucket.insert(key, value)?;
        }
        Ok(())
    }

    /// Replace the value of an existing key. Fails if any part of the address is missing.
    pub fn overwrite(&self, top: &str, sub: &[u8], key: &[u8], value: &[u8]) -> StorageResult<()> {
        let mut state = self.lock_state()?;
        let bucket = Self::bucket_mut(&mut state, top, sub)?;
        if bucket.get(key)?.is_none() {
            return Err(StorageError::NotFound("key not found".to_string()));
        }
        bucket.insert(key.to_vec(), value.to_vec())
    }

    /// Delete a key. Returns whether it was present.
    pub fn delete(&self, top: &str, sub: &[u8], key: &[u8]) -> StorageResult<bool> {
        let mut state = self.lock_state()?;
        Self::bucket_mut(&mut state, top, sub)?.remove(key)
    }

    /// Write every modified segment to disk.
    pub fn flush(&self) -> StorageResult<()> {
        let mut state = self.lock_state()?;

        for top in &state.tops {
            io::create_dir(&io::top_dir(&self.root, top))?;
        }

        let mut written = 0;
        for bucket in state.buckets.values_mut() {
            written += bucket.flush()?;
        }

        if written > 0 {
            tracing::trace!("Flushed {} segments to {:?}", written, self.root);
        }

        Ok(())
    }

    fn bucket_or_create<'a>(
        &self,
        state: &'a mut StoreState,
        top: &str,
        sub: &[u8],
    ) -> &'a mut Bucket {
        state.tops.insert(top.to_string());
        state
            .buckets
            .entry((top.to_string(), sub.to_vec()))
            .or_insert_with(|| Bucket::create(io::bucket_dir(&self.root, top, sub)))
    }

    fn bucket_mut<'a>(
        state: &'a mut StoreState,
        top: &str,
        sub: &[u8],
    ) -> StorageResult<&'a mut Bucket> {
        if !state.tops.contains(top) {
            return Err(StorageError::NotFound(format!("bucket {} not found", top)));
        }
        state.buckets.get_mut(&(top.to_string(), sub.to_vec())).ok_or_else(|| {
            StorageError::NotFound(format!("sub-bucket not found in {}", top))
        })
    }

    fn lock_state(&self) -> StorageResult<MutexGuard<'_, StoreState>> {
        self.state.lock().map_err(|e| StorageError::LockPoisoned(e.to_string()))
    }
}
