//! Matching of downloaded blocks against a watched script.

use std::collections::HashSet;
use std::future::Future;

use bitcoin::{Block, BlockHash, OutPoint, Script};

use crate::error::ChainResult;
use crate::rescan::{RescanEvent, TxMatch};
use crate::types::BlockStamp;

/// Events for one scanned block: its matches followed by `BlockConnected`.
///
/// A transaction spending an outpoint in `watched` is reported as redeeming
/// before its own outputs are examined; every output paying to `script` is
/// added to `watched`, so later transactions (in this block or a later one)
/// spending it are reported too.
pub fn match_block(
    block: &Block,
    stamp: BlockStamp,
    script: &Script,
    watched: &mut HashSet<OutPoint>,
) -> Vec<RescanEvent> {
    let mut events = Vec::new();

    for (index, tx) in block.txdata.iter().enumerate() {
        let txid = tx.compute_txid();
        let tx_match = TxMatch {
            txid,
            block: stamp,
            index,
        };

        if tx.input.iter().any(|txin| watched.contains(&txin.previous_output)) {
            events.push(RescanEvent::MatchRedeeming(tx_match.clone()));
        }

        let mut pays_script = false;
        for (vout, output) in tx.output.iter().enumerate() {
            if output.script_pubkey.as_script() == script {
                watched.insert(OutPoint::new(txid, vout as u32));
                pays_script = true;
            }
        }
        if pays_script {
            events.push(RescanEvent::MatchReceived(tx_match));
        }
    }

    let matched = events.len();
    events.push(RescanEvent::BlockConnected {
        block: stamp,
        matched,
    });
    events
}

/// Scanned blocks that are no longer on the node's main chain, highest first.
///
/// `main_chain_hash` returns the node's current hash at a height. Nothing is
/// reported while the last scanned block is still on the main chain; otherwise
/// blocks are reported from the top down to the highest one still in place.
pub async fn disconnected_blocks<F, Fut>(
    connected: &[BlockStamp],
    mut main_chain_hash: F,
) -> ChainResult<Vec<BlockStamp>>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = ChainResult<BlockHash>>,
{
    let Some(last) = connected.last() else {
        return Ok(Vec::new());
    };
    if main_chain_hash(last.height).await? == last.hash {
        return Ok(Vec::new());
    }

    let mut disconnected = Vec::new();
    for block in connected.iter().rev() {
        if main_chain_hash(block.height).await? == block.hash {
            break;
        }
        disconnected.push(*block);
    }
    Ok(disconnected)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    use bitcoin::block::{Header, Version};
    use bitcoin::hashes::Hash;
    use bitcoin::{
        absolute, transaction, Amount, CompactTarget, ScriptBuf, Sequence, Transaction, TxIn,
        TxMerkleNode, TxOut, Txid, Witness,
    };

    use crate::error::ChainError;

    const WATCHED: &str = "0014751e76e8199196d454941c45d1b3a323f1433bd6";
    const OTHER: &str = "00140102030405060708090a0b0c0d0e0f1011121314";

    fn script(hex_script: &str) -> ScriptBuf {
        ScriptBuf::from_bytes(hex::decode(hex_script).unwrap())
    }

    fn stamp(height: u32) -> BlockStamp {
        let mut bytes = [0x5cu8; 32];
        bytes[..4].copy_from_slice(&height.to_le_bytes());
        BlockStamp::new(height, BlockHash::from_byte_array(bytes))
    }

    fn tx(spends: &[OutPoint], pays_to: &[&str]) -> Transaction {
        Transaction {
            version: transaction::Version::TWO,
            lock_time: absolute::LockTime::ZERO,
            input: spends
                .iter()
                .map(|outpoint| TxIn {
                    previous_output: *outpoint,
                    script_sig: ScriptBuf::new(),
                    sequence: Sequence::MAX,
                    witness: Witness::new(),
                })
                .collect(),
            output: pays_to
                .iter()
                .map(|hex_script| TxOut {
                    value: Amount::from_sat(10_000),
                    script_pubkey: script(hex_script),
                })
                .collect(),
        }
    }

    fn block(txdata: Vec<Transaction>) -> Block {
        Block {
            header: Header {
                version: Version::ONE,
                prev_blockhash: BlockHash::all_zeros(),
                merkle_root: TxMerkleNode::all_zeros(),
                time: 1_700_000_000,
                bits: CompactTarget::from_consensus(0x207fffff),
                nonce: 0,
            },
            txdata,
        }
    }

    fn unrelated_outpoint(byte: u8) -> OutPoint {
        OutPoint::new(Txid::from_byte_array([byte; 32]), 0)
    }

    #[test]
    fn test_receive_is_reported_once_per_transaction() {
        let paying = tx(&[unrelated_outpoint(1)], &[OTHER, WATCHED, WATCHED]);
        let txid = paying.compute_txid();
        let scanned = block(vec![tx(&[unrelated_outpoint(2)], &[OTHER]), paying]);
        let mut watched = HashSet::new();

        let events = match_block(&scanned, stamp(7), &script(WATCHED), &mut watched);

        assert_eq!(
            events,
            vec![
                RescanEvent::MatchReceived(TxMatch {
                    txid,
                    block: stamp(7),
                    index: 1,
                }),
                RescanEvent::BlockConnected {
                    block: stamp(7),
                    matched: 1,
                },
            ]
        );
        assert_eq!(
            watched,
            HashSet::from([OutPoint::new(txid, 1), OutPoint::new(txid, 2)])
        );
    }

    #[test]
    fn test_spend_in_a_later_block_is_redeeming() {
        let paying = tx(&[unrelated_outpoint(1)], &[WATCHED]);
        let received = OutPoint::new(paying.compute_txid(), 0);
        let mut watched = HashSet::new();
        match_block(&block(vec![paying]), stamp(10), &script(WATCHED), &mut watched);

        let spending = tx(&[unrelated_outpoint(3), received], &[OTHER]);
        let spend_txid = spending.compute_txid();
        let events = match_block(
            &block(vec![tx(&[unrelated_outpoint(4)], &[OTHER]), spending]),
            stamp(11),
            &script(WATCHED),
            &mut watched,
        );

        assert_eq!(
            events,
            vec![
                RescanEvent::MatchRedeeming(TxMatch {
                    txid: spend_txid,
                    block: stamp(11),
                    index: 1,
                }),
                RescanEvent::BlockConnected {
                    block: stamp(11),
                    matched: 1,
                },
            ]
        );
    }

    #[test]
    fn test_receive_and_spend_in_the_same_block() {
        let paying = tx(&[unrelated_outpoint(1)], &[WATCHED]);
        let paying_txid = paying.compute_txid();
        // Spends the fresh output and sends change back to the watched script.
        let spending = tx(&[OutPoint::new(paying_txid, 0)], &[OTHER, WATCHED]);
        let spending_txid = spending.compute_txid();
        let mut watched = HashSet::new();

        let events =
            match_block(&block(vec![paying, spending]), stamp(20), &script(WATCHED), &mut watched);

        let kinds: Vec<(&str, Txid)> = events
            .iter()
            .filter_map(|event| match event {
                RescanEvent::MatchReceived(tx) => Some(("received", tx.txid)),
                RescanEvent::MatchRedeeming(tx) => Some(("redeeming", tx.txid)),
                _ => None,
            })
            .collect();
        assert_eq!(
            kinds,
            vec![
                ("received", paying_txid),
                ("redeeming", spending_txid),
                ("received", spending_txid),
            ]
        );
        assert_eq!(
            events.last(),
            Some(&RescanEvent::BlockConnected {
                block: stamp(20),
                matched: 3,
            })
        );
        assert!(watched.contains(&OutPoint::new(spending_txid, 1)));
    }

    #[test]
    fn test_false_positive_block_connects_without_matches() {
        let scanned = block(vec![tx(&[unrelated_outpoint(1)], &[OTHER])]);
        let mut watched = HashSet::from([unrelated_outpoint(9)]);

        let events = match_block(&scanned, stamp(3), &script(WATCHED), &mut watched);

        assert_eq!(
            events,
            vec![RescanEvent::BlockConnected {
                block: stamp(3),
                matched: 0,
            }]
        );
        assert_eq!(watched.len(), 1);
    }

    fn node_chain(
        entries: impl IntoIterator<Item = BlockStamp>,
    ) -> impl FnMut(u32) -> std::future::Ready<ChainResult<BlockHash>> {
        let chain: HashMap<u32, BlockHash> =
            entries.into_iter().map(|block| (block.height, block.hash)).collect();
        move |height| {
            std::future::ready(chain.get(&height).copied().ok_or(ChainError::UnknownHeight(height)))
        }
    }

    fn reorganized(height: u32) -> BlockStamp {
        let mut block = stamp(height);
        block.hash = BlockHash::from_byte_array([0xee; 32]);
        block
    }

    #[tokio::test]
    async fn test_nothing_disconnected_while_end_is_on_main_chain() {
        let connected: Vec<_> = (0..=5).map(stamp).collect();

        let disconnected =
            disconnected_blocks(&connected, node_chain((0..=8).map(stamp))).await.unwrap();

        assert!(disconnected.is_empty());
    }

    #[tokio::test]
    async fn test_blocks_above_fork_are_disconnected_highest_first() {
        let connected: Vec<_> = (0..=5).map(stamp).collect();
        let node = (0..=2).map(stamp).chain((3..=6).map(reorganized));

        let disconnected = disconnected_blocks(&connected, node_chain(node)).await.unwrap();

        assert_eq!(disconnected, vec![stamp(5), stamp(4), stamp(3)]);
    }

    #[tokio::test]
    async fn test_lookup_failure_is_returned() {
        let connected: Vec<_> = (0..=5).map(stamp).collect();

        let result = disconnected_blocks(&connected, node_chain((0..=4).map(stamp))).await;

        assert!(matches!(result, Err(ChainError::UnknownHeight(5))));
    }
}
