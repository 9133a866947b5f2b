//! File-level helpers for the store layout.
//!
//! A top-level bucket is a directory named by the hex of its name; each of its
//! nested buckets is a `<hex(sub)>.bucket` directory inside it. Files are
//! written to a `.tmp` sibling and renamed into place.

use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{StorageError, StorageResult};

const BUCKET_EXTENSION: &str = "bucket";
const TEMP_EXTENSION: &str = "tmp";

/// Directory holding the nested buckets of a top-level bucket.
pub(super) fn top_dir(root: &Path, top: &str) -> PathBuf {
    root.join(hex::encode(top.as_bytes()))
}

/// Directory holding one nested bucket.
pub(super) fn bucket_dir(root: &Path, top: &str, sub: &[u8]) -> PathBuf {
    top_dir(root, top).join(format!("{}.{}", hex::encode(sub), BUCKET_EXTENSION))
}

pub(super) fn create_dir(path: &Path) -> StorageResult<()> {
    fs::create_dir_all(path).map_err(|e| {
        StorageError::WriteFailed(format!("Failed to create directory {:?}: {}", path, e))
    })
}

/// Names of the top-level buckets present on disk.
pub(super) fn list_tops(root: &Path) -> StorageResult<Vec<String>> {
    let mut tops = Vec::new();
    for entry in fs::read_dir(root)? {
        let entry = entry?;
        if !entry.file_type()?.is_dir() {
            continue;
        }
        match decode_top_name(&entry.file_name().to_string_lossy()) {
            Some(top) => tops.push(top),
            None => tracing::warn!("Skipping unrecognized directory in store: {:?}", entry.path()),
        }
    }
    tops.sort();
    Ok(tops)
}

/// Every (top, sub) nested bucket present on disk.
pub(super) fn list_buckets(root: &Path) -> StorageResult<Vec<(String, Vec<u8>)>> {
    let mut buckets = Vec::new();
    for top in list_tops(root)? {
        for entry in fs::read_dir(top_dir(root, &top))? {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().to_string();
            let Some(stem) = name.strip_suffix(&format!(".{}", BUCKET_EXTENSION)) else {
                continue;
            };
            let sub = hex::decode(stem).map_err(|e| {
                StorageError::Corruption(format!("Bad bucket name {:?}: {}", entry.path(), e))
            })?;
            buckets.push((top.clone(), sub));
        }
    }
    Ok(buckets)
}

fn decode_top_name(name: &str) -> Option<String> {
    hex::decode(name).ok().and_then(|bytes| String::from_utf8(bytes).ok())
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(".");
    name.push(TEMP_EXTENSION);
    PathBuf::from(name)
}

/// Serialize `value` with bincode and atomically replace `path` with it.
pub(super) fn write_file<T: Serialize>(path: &Path, value: &T) -> StorageResult<()> {
    let data = bincode::serialize(value).map_err(|e| {
        StorageError::Serialization(format!("Failed to serialize {:?}: {}", path, e))
    })?;

    let temp_path = temp_path(path);
    fs::write(&temp_path, data)
        .map_err(|e| StorageError::WriteFailed(format!("Failed to write {:?}: {}", temp_path, e)))?;
    fs::rename(&temp_path, path)
        .map_err(|e| StorageError::WriteFailed(format!("Failed to replace {:?}: {}", path, e)))?;

    Ok(())
}

/// Read a bincode file. A missing file is `None`.
pub(super) fn read_file<T: DeserializeOwned>(path: &Path) -> StorageResult<Option<T>> {
    let content = match fs::read(path) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => {
            return Err(StorageError::ReadFailed(format!("Failed to read {:?}: {}", path, e)));
        }
    };
    bincode::deserialize(&content).map(Some).map_err(|e| {
        StorageError::Corruption(format!("Failed to deserialize {:?}: {}", path, e))
    })
}

pub(super) fn remove_file(path: &Path) -> StorageResult<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(StorageError::WriteFailed(format!("Failed to remove {:?}: {}", path, e))),
    }
}

/// Delete leftovers of writes interrupted before their rename.
pub(super) fn sweep_temp_files(dir: &Path) -> StorageResult<()> {
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.extension().is_some_and(|ext| ext == TEMP_EXTENSION) {
            tracing::warn!("Removing interrupted write {:?}", path);
            remove_file(&path)?;
        }
    }
    Ok(())
}
