//! In-process store used by tests and local dry runs
//!
//! Behaves like the trade table with deduplication never having run: every
//! insert is kept, scans are ordered by `(exchange_timestamp, trade_id)`.
//! Trade and log writes can be made to fail independently.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use types::log::LogEvent;
use types::trade::TradeEvent;

use crate::store::{StoreError, TradeBlock, TradeBlockStream, TradeQuery, TradeStore};

#[derive(Debug, Default)]
pub struct MemoryStore {
    trades: Mutex<Vec<TradeEvent>>,
    logs: Mutex<Vec<LogEvent>>,
    fail_trade_writes: AtomicBool,
    fail_log_writes: AtomicBool,
    trade_write_calls: AtomicU64,
}

/// A panicked holder cannot leave a `Vec` half-pushed, so poison is ignored.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store pre-populated with trades, bypassing failure injection.
    pub fn seeded(trades: impl IntoIterator<Item = TradeEvent>) -> Self {
        let store = Self::new();
        lock(&store.trades).extend(trades);
        store
    }

    pub fn set_trade_writes_failing(&self, failing: bool) {
        self.fail_trade_writes.store(failing, Ordering::SeqCst);
    }

    pub fn set_log_writes_failing(&self, failing: bool) {
        self.fail_log_writes.store(failing, Ordering::SeqCst);
    }

    /// Number of `insert_trades` calls, failed ones included.
    pub fn trade_write_calls(&self) -> u64 {
        self.trade_write_calls.load(Ordering::SeqCst)
    }

    /// Every stored trade in insertion order.
    pub fn trades(&self) -> Vec<TradeEvent> {
        lock(&self.trades).clone()
    }

    pub fn logs(&self) -> Vec<LogEvent> {
        lock(&self.logs).clone()
    }
}

#[async_trait]
impl TradeStore for MemoryStore {
    async fn insert_trades(&self, trades: &[TradeEvent]) -> Result<(), StoreError> {
        self.trade_write_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_trade_writes.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("trade writes disabled".to_string()));
        }
        lock(&self.trades).extend_from_slice(trades);
        Ok(())
    }

    async fn insert_logs(&self, events: &[LogEvent]) -> Result<(), StoreError> {
        if self.fail_log_writes.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("log writes disabled".to_string()));
        }
        lock(&self.logs).extend_from_slice(events);
        Ok(())
    }

    async fn query_trades(&self, query: &TradeQuery) -> Result<TradeBlockStream, StoreError> {
        // Snapshot at call time; later inserts are not observed.
        let mut matching: Vec<TradeEvent> = lock(&self.trades)
            .iter()
            .filter(|t| {
                t.symbol_id().matches(query.symbol())
                    && t.exchange_timestamp() >= query.from_exchange_timestamp()
            })
            .cloned()
            .collect();
        matching.sort_by_key(|t| (t.exchange_timestamp(), t.trade_id()));

        let blocks: Vec<Result<TradeBlock, StoreError>> = match query.block_size() {
            None => vec![Ok(matching)],
            Some(size) => matching
                .chunks(size.get())
                .map(|chunk| Ok(chunk.to_vec()))
                .collect(),
        };
        Ok(stream::iter(blocks).boxed())
    }

    async fn distinct_symbols(&self) -> Result<Vec<String>, StoreError> {
        let mut symbols: Vec<String> = lock(&self.trades)
            .iter()
            .map(|t| t.symbol_id().to_string())
            .collect();
        symbols.sort();
        symbols.dedup();
        Ok(symbols)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::TryStreamExt;
    use std::num::NonZeroUsize;
    use types::ids::{SymbolId, TradeId};
    use types::trade::TakerSide;

    fn trade(symbol: &str, ts: u64, id: u64) -> TradeEvent {
        TradeEvent::new(
            ts,
            ts + 3,
            SymbolId::parse(symbol).unwrap(),
            TradeId::new(id),
            "100.5".parse().unwrap(),
            "2".parse().unwrap(),
            TakerSide::Buy,
        )
    }

    async fn scan(store: &MemoryStore, query: TradeQuery) -> Vec<TradeBlock> {
        store.query_trades(&query).await.unwrap().try_collect().await.unwrap()
    }

    #[tokio::test]
    async fn test_scan_filters_and_orders() {
        let store = MemoryStore::seeded([
            trade("BTCUSDT", 30, 3),
            trade("ETHUSDT", 15, 9),
            trade("BTCUSDT", 10, 1),
            trade("BTCUSDT", 20, 5),
            trade("BTCUSDT", 20, 4),
        ]);

        let blocks = scan(&store, TradeQuery::new("btcusdt", 15)).await;
        assert_eq!(blocks.len(), 1);
        let ids: Vec<u64> = blocks[0].iter().map(|t| t.trade_id().get()).collect();
        assert_eq!(ids, vec![4, 5, 3]);
    }

    #[tokio::test]
    async fn test_empty_scan_yields_single_empty_block() {
        let store = MemoryStore::new();
        let blocks = scan(&store, TradeQuery::new("BTCUSDT", 0)).await;
        assert_eq!(blocks, vec![Vec::<TradeEvent>::new()]);

        let paged = scan(
            &store,
            TradeQuery::new("BTCUSDT", 0).with_block_size(NonZeroUsize::new(4)),
        )
        .await;
        assert!(paged.is_empty());
    }

    #[tokio::test]
    async fn test_paged_scan_chunks() {
        let store = MemoryStore::seeded((0..5).map(|i| trade("USD_F_ETHUSDT", i, i)));
        let blocks = scan(
            &store,
            TradeQuery::new("USD_F_ETHUSDT", 0).with_block_size(NonZeroUsize::new(2)),
        )
        .await;
        let sizes: Vec<usize> = blocks.iter().map(Vec::len).collect();
        assert_eq!(sizes, vec![2, 2, 1]);
    }

    #[tokio::test]
    async fn test_independent_failure_injection() {
        let store = MemoryStore::new();
        store.set_trade_writes_failing(true);

        assert!(store.insert_trades(&[trade("BTCUSDT", 1, 1)]).await.is_err());
        store
            .insert_logs(&[LogEvent::new("still writable", types::log::LogLevel::Info, "")])
            .await
            .unwrap();

        assert!(store.trades().is_empty());
        assert_eq!(store.logs().len(), 1);
        assert_eq!(store.trade_write_calls(), 1);

        store.set_trade_writes_failing(false);
        store.insert_trades(&[trade("BTCUSDT", 1, 1)]).await.unwrap();
        assert_eq!(store.trades().len(), 1);
        assert_eq!(store.trade_write_calls(), 2);
    }

    #[tokio::test]
    async fn test_distinct_symbols_sorted() {
        let store = MemoryStore::seeded([
            trade("ETHUSDT", 1, 1),
            trade("BTCUSDT", 2, 2),
            trade("ETHUSDT", 3, 3),
            trade("COIN_F_BTCUSD_PERP", 4, 4),
        ]);
        assert_eq!(
            store.distinct_symbols().await.unwrap(),
            vec!["BTCUSDT", "COIN_F_BTCUSD_PERP", "ETHUSDT"]
        );
    }
}
