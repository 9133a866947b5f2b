//! Direct store inspection helpers backing the `spv-store` tool.
//!
//! These mutate the store without any coordination beyond the store lock, so
//! they must never run against a store owned by a live coordinator.

use std::fmt;

use crate::error::{ParseError, StorageError, StorageResult};

use super::Store;

/// A nested bucket argument: `0x`/`0X` prefixed hex, otherwise the raw bytes of the string.
pub fn parse_bucket_arg(arg: &str) -> Result<Vec<u8>, ParseError> {
    match arg.strip_prefix("0x").or_else(|| arg.strip_prefix("0X")) {
        Some(digits) => hex::decode(digits)
            .map_err(|e| ParseError::InvalidHex("sub-bucket".to_string(), e.to_string())),
        None => Ok(arg.as_bytes().to_vec()),
    }
}

/// A hex argument with an optional `0x` prefix.
pub fn parse_hex_arg(name: &str, arg: &str) -> Result<Vec<u8>, ParseError> {
    let digits = arg.strip_prefix("0x").or_else(|| arg.strip_prefix("0X")).unwrap_or(arg);
    hex::decode(digits).map_err(|e| ParseError::InvalidHex(name.to_string(), e.to_string()))
}

/// One key/value pair, rendered as hex.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    pub key: Vec<u8>,
    pub value: Vec<u8>,
}

impl fmt::Display for Entry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Key: {}  Value: {}", hex::encode(&self.key), hex::encode(&self.value))
    }
}

/// Every entry of a nested bucket.
pub fn list(store: &Store, top: &str, sub: &[u8]) -> StorageResult<Vec<Entry>> {
    Ok(store
        .entries(top, sub)?
        .into_iter()
        .map(|(key, value)| Entry {
            key,
            value,
        })
        .collect())
}

/// A single entry. A missing key is an error.
pub fn get(store: &Store, top: &str, sub: &[u8], key: &[u8]) -> StorageResult<Entry> {
    match store.get(top, sub, key)? {
        Some(value) => Ok(Entry {
            key: key.to_vec(),
            value,
        }),
        None => Err(key_not_found()),
    }
}

/// Delete an existing key and persist the change.
pub fn delete(store: &Store, top: &str, sub: &[u8], key: &[u8]) -> StorageResult<()> {
    if !store.delete(top, sub, key)? {
        return Err(key_not_found());
    }
    store.flush()
}

/// Replace the value of an existing key and persist the change.
pub fn overwrite(
    store: &Store,
    top: &str,
    sub: &[u8],
    key: &[u8],
    value: &[u8],
) -> StorageResult<()> {
    store.overwrite(top, sub, key, value)?;
    store.flush()
}

fn key_not_found() -> StorageError {
    StorageError::NotFound("key not found".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::DEFAULT_OPEN_TIMEOUT;
    use tempfile::TempDir;

    #[test]
    fn test_parse_bucket_arg() {
        assert_eq!(parse_bucket_arg("0x5929").unwrap(), vec![0x59, 0x29]);
        assert_eq!(parse_bucket_arg("0X5929").unwrap(), vec![0x59, 0x29]);
        assert_eq!(parse_bucket_arg("heights").unwrap(), b"heights".to_vec());
        assert!(matches!(parse_bucket_arg("0xzz"), Err(ParseError::InvalidHex(_, _))));
    }

    #[test]
    fn test_parse_hex_arg() {
        assert_eq!(parse_hex_arg("key", "0xabcd").unwrap(), vec![0xab, 0xcd]);
        assert_eq!(parse_hex_arg("key", "abcd").unwrap(), vec![0xab, 0xcd]);
        assert!(parse_hex_arg("key", "abc").is_err());
    }

    #[test]
    fn test_entry_display() {
        let entry = Entry {
            key: vec![0x00, 0x01],
            value: vec![0xff],
        };
        assert_eq!(entry.to_string(), "Key: 0001  Value: ff");
    }

    #[tokio::test]
    async fn test_edit_persists_across_reopen() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path().join("filters.db");
        {
            let store = Store::open(&root, DEFAULT_OPEN_TIMEOUT).await.unwrap();
            store.put("header-index", &[0x59, 0x29], b"a", b"1").unwrap();
            store.put("header-index", &[0x59, 0x29], b"b", b"2").unwrap();
            store.flush().unwrap();
        }

        {
            let store = Store::open(&root, DEFAULT_OPEN_TIMEOUT).await.unwrap();
            overwrite(&store, "header-index", &[0x59, 0x29], b"a", b"9").unwrap();
            delete(&store, "header-index", &[0x59, 0x29], b"b").unwrap();
        }

        let store = Store::open(&root, DEFAULT_OPEN_TIMEOUT).await.unwrap();
        let entries = list(&store, "header-index", &[0x59, 0x29]).unwrap();
        assert_eq!(
            entries,
            vec![Entry {
                key: b"a".to_vec(),
                value: b"9".to_vec(),
            }]
        );
    }

    #[tokio::test]
    async fn test_missing_addresses_are_errors() {
        let temp_dir = TempDir::new().unwrap();
        let store = Store::open(temp_dir.path(), DEFAULT_OPEN_TIMEOUT).await.unwrap();
        store.put("header-index", b"meta", b"tip", b"x").unwrap();

        let missing_top = get(&store, "nope", b"meta", b"tip").unwrap_err();
        assert_eq!(missing_top.to_string(), "Data not found: bucket nope not found");

        assert!(matches!(list(&store, "header-index", b"other"), Err(StorageError::NotFound(_))));
        assert!(matches!(
            delete(&store, "header-index", b"meta", b"absent"),
            Err(StorageError::NotFound(_))
        ));
        assert!(matches!(
            overwrite(&store, "header-index", b"meta", b"absent", b"y"),
            Err(StorageError::NotFound(_))
        ));
    }
}
