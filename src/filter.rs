// src/filter.rs
use tracing::debug;

use crate::models::{Block, TransactionRecord};
use crate::watchlist::Watchlist;

/// Records for every transaction in `block` sent to a watched address, in on-chain order.
///
/// Contract creations (no destination) never match.
pub fn select_watched(block: &Block, watchlist: &Watchlist) -> Vec<TransactionRecord> {
    block
        .transactions
        .iter()
        .filter(|tx| tx.to.is_some_and(|to| watchlist.contains(&to)))
        .filter_map(|tx| {
            let record =
                TransactionRecord::from_chain(tx, block.header.timestamp, block.base_fee_per_gas)?;
            debug!(
                block = block.header.number,
                hash = %record.hash,
                target = tx.to.and_then(|to| watchlist.label(&to)).unwrap_or("watched"),
                "Matched transaction"
            );
            Some(record)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ChainHeader, ChainTransaction};
    use alloy::primitives::{Address, Bytes, B256, U256};

    fn tx(n: u8, to: Option<Address>) -> ChainTransaction {
        ChainTransaction {
            hash: B256::repeat_byte(n),
            from: Address::repeat_byte(0xee),
            to,
            nonce: n as u64,
            gas_price: U256::from(1u64),
            gas_limit: 21_000,
            value: U256::from(1000u64),
            input: Bytes::new(),
        }
    }

    fn block(transactions: Vec<ChainTransaction>) -> Block {
        Block {
            header: ChainHeader {
                number: 100,
                hash: B256::ZERO,
                timestamp: 1_700_000_000,
            },
            transactions,
            base_fee_per_gas: Some(U256::from(7u64)),
        }
    }

    #[test]
    fn keeps_only_watched_destinations_in_order() {
        let watched = Address::repeat_byte(0xaa);
        let list = Watchlist::new([(watched, None)]);
        let block = block(vec![
            tx(1, Some(watched)),
            tx(2, Some(Address::repeat_byte(0xbb))),
            tx(3, None),
            tx(4, Some(watched)),
        ]);

        let matched = select_watched(&block, &list);
        let nonces: Vec<u64> = matched.iter().map(|r| r.nonce).collect();
        assert_eq!(nonces, vec![1, 4]);
        assert!(matched.iter().all(|r| r.block_timestamp == 1_700_000_000));
        assert!(matched.iter().all(|r| r.base_fee_per_gas == "7"));
    }

    #[test]
    fn unwatched_and_creations_produce_nothing() {
        let list = Watchlist::new([(Address::repeat_byte(0xaa), None)]);
        let block = block(vec![
            tx(1, Some(Address::repeat_byte(0xbb))),
            tx(2, Some(Address::repeat_byte(0xcc))),
            tx(3, None),
        ]);
        assert!(select_watched(&block, &list).is_empty());
    }

    #[test]
    fn creations_excluded_even_when_zero_address_is_watched() {
        let list = Watchlist::new([(Address::ZERO, None)]);
        assert!(select_watched(&block(vec![tx(1, None)]), &list).is_empty());
    }
}
