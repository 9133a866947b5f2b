//! Segmented storage of one nested bucket.
//!
//! A bucket directory holds a `manifest` and `segment_NNNN.dat` files. Each
//! segment covers the keys from its lower bound (recorded in the manifest) up
//! to the next segment's bound, so keys written in ascending order always land
//! in the last segment. A segment that grows past [`MAX_SEGMENT_ENTRIES`] is
//! split in two. Segments are read on first access, at most
//! [`MAX_RESIDENT_SEGMENTS`] clean ones stay in memory, and a flush writes only
//! the segments that changed.

use std::collections::{BTreeMap, HashMap};
use std::ops::Bound;
use std::path::{Path, PathBuf};
use std::time::Instant;

use serde::{Deserialize, Serialize};

use super::io;
use crate::error::{StorageError, StorageResult};

const FORMAT_VERSION: u16 = 1;
const MANIFEST_FILE: &str = "manifest";

pub(super) const MAX_SEGMENT_ENTRIES: usize = 1024;
pub(super) const MAX_RESIDENT_SEGMENTS: usize = 8;

type Entries = BTreeMap<Vec<u8>, Vec<u8>>;

#[derive(Debug, Serialize, Deserialize)]
struct Manifest {
    version: u16,
    next_id: u32,
    /// Lower bound key and id of every segment, in key order.
    segments: Vec<(Vec<u8>, u32)>,
}

#[derive(Debug, Serialize, Deserialize)]
struct SegmentFile<E> {
    version: u16,
    entries: E,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SegmentState {
    Clean,
    Dirty,
}

#[derive(Debug)]
struct Segment {
    entries: Entries,
    state: SegmentState,
    last_accessed: Instant,
}

impl Segment {
    fn new(entries: Entries, state: SegmentState) -> Self {
        Self {
            entries,
            state,
            last_accessed: Instant::now(),
        }
    }
}

#[derive(Debug)]
pub(super) struct Bucket {
    dir: PathBuf,
    // The first bound is always the empty key and maps to segment 0.
    bounds: BTreeMap<Vec<u8>, u32>,
    next_id: u32,
    resident: HashMap<u32, Segment>,
    retired: Vec<u32>,
    manifest_dirty: bool,
}

impl Bucket {
    /// A new, empty bucket. Nothing is written until [`Bucket::flush`].
    pub(super) fn create(dir: PathBuf) -> Self {
        let mut resident = HashMap::new();
        resident.insert(0, Segment::new(Entries::new(), SegmentState::Dirty));
        Self {
            dir,
            bounds: BTreeMap::from([(Vec::new(), 0)]),
            next_id: 1,
            resident,
            retired: Vec::new(),
            manifest_dirty: true,
        }
    }

    /// Open an existing bucket. Only the manifest is read.
    pub(super) fn open(dir: PathBuf) -> StorageResult<Self> {
        io::sweep_temp_files(&dir)?;

        let manifest: Manifest = io::read_file(&dir.join(MANIFEST_FILE))?
            .ok_or_else(|| StorageError::Corruption(format!("Bucket {:?} has no manifest", dir)))?;
        check_version(manifest.version, &dir)?;

        let bounds: BTreeMap<Vec<u8>, u32> = manifest.segments.into_iter().collect();
        if bounds.iter().next() != Some((&Vec::new(), &0)) {
            return Err(StorageError::Corruption(format!(
                "Bucket {:?} manifest does not start at the empty key",
                dir
            )));
        }

        Ok(Self {
            dir,
            bounds,
            next_id: manifest.next_id,
            resident: HashMap::new(),
            retired: Vec::new(),
            manifest_dirty: false,
        })
    }

    pub(super) fn get(&mut self, key: &[u8]) -> StorageResult<Option<Vec<u8>>> {
        let id = self.segment_for(key);
        Ok(self.segment_mut(id)?.entries.get(key).cloned())
    }

    pub(super) fn insert(&mut self, key: Vec<u8>, value: Vec<u8>) -> StorageResult<()> {
        let id = self.segment_for(&key);
        let segment = self.segment_mut(id)?;
        segment.entries.insert(key, value);
        segment.state = SegmentState::Dirty;

        if segment.entries.len() > MAX_SEGMENT_ENTRIES {
            self.split(id);
        }
        Ok(())
    }

    /// Remove a key. Returns whether it was present.
    pub(super) fn remove(&mut self, key: &[u8]) -> StorageResult<bool> {
        let id = self.segment_for(key);
        let segment = self.segment_mut(id)?;
        if segment.entries.remove(key).is_none() {
            return Ok(false);
        }
        segment.state = SegmentState::Dirty;

        if segment.entries.is_empty() {
            self.retire(id);
        }
        Ok(true)
    }

    /// Every entry in key order. Segments that are not resident are read
    /// from disk without being kept.
    pub(super) fn entries(&self) -> StorageResult<Vec<(Vec<u8>, Vec<u8>)>> {
        let mut all = Vec::new();
        for id in self.bounds.values() {
            match self.resident.get(id) {
                Some(segment) => {
                    all.extend(segment.entries.iter().map(|(k, v)| (k.clone(), v.clone())))
                }
                None => all.extend(read_segment(&self.dir, *id)?),
            }
        }
        Ok(all)
    }

    /// Write the changed segments and the manifest. Returns how many segment
    /// files were written.
    pub(super) fn flush(&mut self) -> StorageResult<usize> {
        if !self.manifest_dirty
            && self.retired.is_empty()
            && self.resident.values().all(|s| s.state == SegmentState::Clean)
        {
            return Ok(0);
        }

        io::create_dir(&self.dir)?;

        let mut written = 0;
        for (id, segment) in self.resident.iter_mut() {
            if segment.state == SegmentState::Dirty {
                let file = SegmentFile {
                    version: FORMAT_VERSION,
                    entries: &segment.entries,
                };
                io::write_file(&segment_path(&self.dir, *id), &file)?;
                segment.state = SegmentState::Clean;
                written += 1;
            }
        }

        if self.manifest_dirty {
            let manifest = Manifest {
                version: FORMAT_VERSION,
                next_id: self.next_id,
                segments: self.bounds.iter().map(|(bound, id)| (bound.clone(), *id)).collect(),
            };
            io::write_file(&self.dir.join(MANIFEST_FILE), &manifest)?;
            self.manifest_dirty = false;
        }

        for id in self.retired.drain(..) {
            io::remove_file(&segment_path(&self.dir, id))?;
        }

        Ok(written)
    }

    fn segment_for(&self, key: &[u8]) -> u32 {
        self.bounds
            .range::<[u8], _>((Bound::Unbounded, Bound::Included(key)))
            .next_back()
            .map_or(0, |(_, id)| *id)
    }

    fn segment_mut(&mut self, id: u32) -> StorageResult<&mut Segment> {
        if !self.resident.contains_key(&id) {
            let entries = read_segment(&self.dir, id)?;
            self.evict_clean();
            self.resident.insert(id, Segment::new(entries, SegmentState::Clean));
        }

        match self.resident.get_mut(&id) {
            Some(segment) => {
                segment.last_accessed = Instant::now();
                Ok(segment)
            }
            None => Err(StorageError::Corruption(format!("segment {} is not loaded", id))),
        }
    }

    /// Drop the least recently used clean segment once the resident set is full.
    fn evict_clean(&mut self) {
        if self.resident.len() < MAX_RESIDENT_SEGMENTS {
            return;
        }
        let oldest = self
            .resident
            .iter()
            .filter(|(_, segment)| segment.state == SegmentState::Clean)
            .min_by_key(|(_, segment)| segment.last_accessed)
            .map(|(id, _)| *id);
        if let Some(id) = oldest {
            self.resident.remove(&id);
        }
    }

    /// Move the upper half of segment `id` into a new segment.
    fn split(&mut self, id: u32) {
        let Some(segment) = self.resident.get_mut(&id) else {
            return;
        };
        let Some(middle) = segment.entries.keys().nth(segment.entries.len() / 2).cloned() else {
            return;
        };
        let upper = segment.entries.split_off(&middle);

        let new_id = self.next_id;
        self.next_id += 1;
        self.bounds.insert(middle, new_id);
        self.resident.insert(new_id, Segment::new(upper, SegmentState::Dirty));
        self.manifest_dirty = true;
    }

    /// Forget an emptied segment. The first segment always stays.
    fn retire(&mut self, id: u32) {
        if id == 0 {
            return;
        }
        self.bounds.retain(|_, segment| *segment != id);
        self.resident.remove(&id);
        self.retired.push(id);
        self.manifest_dirty = true;
    }

    #[cfg(test)]
    fn resident_segments(&self) -> usize {
        self.resident.len()
    }

    #[cfg(test)]
    fn segment_count(&self) -> usize {
        self.bounds.len()
    }
}

fn segment_path(dir: &Path, id: u32) -> PathBuf {
    dir.join(format!("segment_{:04}.dat", id))
}

/// Entries of a segment on disk. A segment never written yet is empty.
fn read_segment(dir: &Path, id: u32) -> StorageResult<Entries> {
    let path = segment_path(dir, id);
    match io::read_file::<SegmentFile<Entries>>(&path)? {
        Some(file) => {
            check_version(file.version, &path)?;
            Ok(file.entries)
        }
        None => Ok(Entries::new()),
    }
}

fn check_version(version: u16, path: &Path) -> StorageResult<()> {
    if version != FORMAT_VERSION {
        return Err(StorageError::Corruption(format!(
            "{:?} has unsupported format version {}",
            path, version
        )));
    }
    Ok(())
}
