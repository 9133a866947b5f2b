//! Common type definitions for the rescan coordinator.

use std::fmt;
use std::ops::RangeInclusive;

use bitcoin::{BlockHash, ScriptBuf};

use crate::error::{ParseError, RescanError, RescanResult};

/// A point on the header chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlockStamp {
    /// Height of the block, genesis is 0.
    pub height: u32,
    /// Hash of the block header.
    pub hash: BlockHash,
}

impl BlockStamp {
    pub fn new(height: u32, hash: BlockHash) -> Self {
        Self {
            height,
            hash,
        }
    }
}

impl fmt::Display for BlockStamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.height, self.hash)
    }
}

/// The output script a rescan looks for.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct WatchTarget {
    script: ScriptBuf,
}

impl WatchTarget {
    pub fn new(script: ScriptBuf) -> Self {
        Self {
            script,
        }
    }

    /// Parse a hex-encoded script pubkey, with or without a `0x` prefix.
    pub fn from_hex(input: &str) -> Result<Self, ParseError> {
        let trimmed = input.trim();
        let digits = trimmed
            .strip_prefix("0x")
            .or_else(|| trimmed.strip_prefix("0X"))
            .unwrap_or(trimmed);

        if digits.is_empty() {
            return Err(ParseError::MissingArgument("scriptpubkey".to_string()));
        }

        let bytes = hex::decode(digits)
            .map_err(|e| ParseError::InvalidHex("scriptpubkey".to_string(), e.to_string()))?;

        Ok(Self::new(ScriptBuf::from_bytes(bytes)))
    }

    pub fn script(&self) -> &ScriptBuf {
        &self.script
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.script.as_bytes())
    }
}

impl fmt::Display for WatchTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

/// Inclusive block range examined by one rescan.
///
/// The only way to build one is [`ScanRange::new`], which rejects ranges whose
/// start lies above their end.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanRange {
    start: BlockStamp,
    end: BlockStamp,
}

impl ScanRange {
    pub fn new(start: BlockStamp, end: BlockStamp) -> RescanResult<Self> {
        if start.height > end.height {
            return Err(RescanError::Range(format!(
                "start height {} is above end height {}",
                start.height, end.height
            )));
        }

        Ok(Self {
            start,
            end,
        })
    }

    pub fn start(&self) -> &BlockStamp {
        &self.start
    }

    pub fn end(&self) -> &BlockStamp {
        &self.end
    }

    pub fn heights(&self) -> RangeInclusive<u32> {
        self.start.height..=self.end.height
    }

    pub fn contains(&self, height: u32) -> bool {
        self.heights().contains(&height)
    }

    /// Number of blocks in the range, both bounds included.
    pub fn len(&self) -> u64 {
        u64::from(self.end.height - self.start.height) + 1
    }

    pub fn is_empty(&self) -> bool {
        false
    }
}

impl fmt::Display for ScanRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {}]", self.start.height, self.end.height)
    }
}

/// Where a rescan begins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StartBound {
    /// The genesis block at height 0.
    #[default]
    Genesis,
    /// A height whose hash is resolved through the chain service.
    Height(u32),
    /// A known-good height/hash pair. The chain service must agree on the hash.
    Checkpoint(BlockStamp),
}

impl StartBound {
    pub fn height(&self) -> u32 {
        match self {
            StartBound::Genesis => 0,
            StartBound::Height(height) => *height,
            StartBound::Checkpoint(stamp) => stamp.height,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bitcoin::hashes::Hash;

    fn stamp(height: u32) -> BlockStamp {
        let mut bytes = [0u8; 32];
        bytes[..4].copy_from_slice(&height.to_le_bytes());
        BlockStamp::new(height, BlockHash::from_byte_array(bytes))
    }

    #[test]
    fn test_watch_target_from_hex() {
        let target = WatchTarget::from_hex("6a1400112233445566778899aabbccddeeff00112233").unwrap();
        assert_eq!(target.script().len(), 22);
        assert_eq!(target.to_hex(), "6a1400112233445566778899aabbccddeeff00112233");

        let prefixed = WatchTarget::from_hex("0x0014abcd").unwrap();
        assert_eq!(prefixed.script().as_bytes(), &[0x00, 0x14, 0xab, 0xcd]);
    }

    #[test]
    fn test_watch_target_rejects_bad_input() {
        assert!(matches!(WatchTarget::from_hex(""), Err(ParseError::MissingArgument(_))));
        assert!(matches!(WatchTarget::from_hex("0x"), Err(ParseError::MissingArgument(_))));
        assert!(matches!(WatchTarget::from_hex("6a1"), Err(ParseError::InvalidHex(_, _))));
        assert!(matches!(WatchTarget::from_hex("zz"), Err(ParseError::InvalidHex(_, _))));
    }

    #[test]
    fn test_scan_range_bounds() {
        let range = ScanRange::new(stamp(0), stamp(100)).unwrap();
        assert_eq!(range.len(), 101);
        assert!(range.contains(0));
        assert!(range.contains(100));
        assert!(!range.contains(101));

        let single = ScanRange::new(stamp(7), stamp(7)).unwrap();
        assert_eq!(single.len(), 1);
    }

    #[test]
    fn test_scan_range_rejects_inverted_bounds() {
        let err = ScanRange::new(stamp(10), stamp(9)).unwrap_err();
        assert!(matches!(err, RescanError::Range(_)));
    }

    #[test]
    fn test_start_bound_height() {
        assert_eq!(StartBound::default().height(), 0);
        assert_eq!(StartBound::Height(42).height(), 42);
        assert_eq!(StartBound::Checkpoint(stamp(9)).height(), 9);
    }
}
