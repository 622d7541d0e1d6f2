//! Replay of archived trades
//!
//! A replay is a lazy, forward-only stream over one symbol's history from a
//! watermark. Nothing is queried until the stream is first polled; a new
//! call issues a new query.

use std::collections::{HashSet, VecDeque};
use std::num::NonZeroUsize;
use std::sync::Arc;

use futures::stream::{self, BoxStream, StreamExt, TryStreamExt};
use persistence::{StoreError, TradeQuery, TradeStore};
use tracing::debug;
use types::ids::{SymbolId, TradeId};
use types::trade::TradeEvent;

pub type TradeStream = BoxStream<'static, Result<TradeEvent, StoreError>>;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReplayOptions {
    /// Skip a `(symbol, trade_id)` already seen among this many recently
    /// yielded records. Off by default: duplicates the store has not merged
    /// away yet are passed through.
    pub dedup_window: Option<NonZeroUsize>,
}

pub struct TradeReplayer {
    store: Arc<dyn TradeStore>,
    options: ReplayOptions,
}

impl TradeReplayer {
    pub fn new(store: Arc<dyn TradeStore>) -> Self {
        Self::with_options(store, ReplayOptions::default())
    }

    pub fn with_options(store: Arc<dyn TradeStore>, options: ReplayOptions) -> Self {
        Self { store, options }
    }

    /// Trades for `symbol` (case-insensitive) with exchange timestamp at or
    /// after `from_exchange_timestamp`, ascending.
    ///
    /// `block_size` only controls how many rows the store client holds at a
    /// time; the yielded sequence is the same with or without it.
    pub fn replay(
        &self,
        symbol: &str,
        from_exchange_timestamp: u64,
        block_size: Option<NonZeroUsize>,
    ) -> TradeStream {
        let store = Arc::clone(&self.store);
        let query = TradeQuery::new(symbol, from_exchange_timestamp).with_block_size(block_size);

        let blocks = stream::once(async move {
            debug!(
                symbol = %query.symbol(),
                from = query.from_exchange_timestamp(),
                block_size = ?query.block_size(),
                "Replay query issued"
            );
            store.query_trades(&query).await
        })
        .try_flatten();

        let trades = blocks
            .map_ok(|block| stream::iter(block.into_iter().map(Ok::<_, StoreError>)))
            .try_flatten();

        match self.options.dedup_window {
            None => trades.boxed(),
            Some(window) => {
                let mut recent = RecentKeys::new(window.get());
                trades
                    .try_filter(move |trade| futures::future::ready(recent.admit(trade)))
                    .boxed()
            }
        }
    }

    /// Distinct archived symbols, sorted.
    pub async fn symbols(&self) -> Result<Vec<String>, StoreError> {
        self.store.distinct_symbols().await
    }
}

/// Sliding window of the most recently admitted trade keys.
struct RecentKeys {
    order: VecDeque<(SymbolId, TradeId)>,
    members: HashSet<(SymbolId, TradeId)>,
    capacity: usize,
}

impl RecentKeys {
    fn new(capacity: usize) -> Self {
        Self {
            order: VecDeque::with_capacity(capacity),
            members: HashSet::with_capacity(capacity),
            capacity,
        }
    }

    /// `false` if the trade's key is already in the window.
    fn admit(&mut self, trade: &TradeEvent) -> bool {
        let (symbol, id) = trade.dedup_key();
        let key = (symbol.clone(), id);
        if self.members.contains(&key) {
            return false;
        }
        if self.order.len() == self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.members.remove(&oldest);
            }
        }
        self.members.insert(key.clone());
        self.order.push_back(key);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use persistence::MemoryStore;
    use types::trade::TakerSide;

    fn trade(symbol: &str, ts: u64, id: u64) -> TradeEvent {
        TradeEvent::new(
            ts,
            ts + 1,
            SymbolId::parse(symbol).unwrap(),
            TradeId::new(id),
            "1.25".parse().unwrap(),
            "3".parse().unwrap(),
            TakerSide::Sell,
        )
    }

    async fn collect(stream: TradeStream) -> Vec<TradeEvent> {
        stream.try_collect().await.unwrap()
    }

    #[tokio::test]
    async fn test_paged_replay_matches_unpaged() {
        let t0 = 1_700_000_000_000;
        let store = Arc::new(MemoryStore::seeded(
            (0..5).rev().map(|i| trade("BTCUSDT", t0 + i, 100 + i)),
        ));
        let replayer = TradeReplayer::new(store);

        let whole = collect(replayer.replay("BTCUSDT", t0, None)).await;
        let paged = collect(replayer.replay("BTCUSDT", t0, NonZeroUsize::new(2))).await;

        assert_eq!(whole.len(), 5);
        assert_eq!(whole, paged);
        let timestamps: Vec<u64> = whole.iter().map(|t| t.exchange_timestamp()).collect();
        assert_eq!(timestamps, (0..5).map(|i| t0 + i).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn test_replay_is_case_insensitive_and_filtered() {
        let store = Arc::new(MemoryStore::seeded([
            trade("USD_F_ETHUSDT", 5, 1),
            trade("USD_F_ETHUSDT", 10, 2),
            trade("ETHUSDT", 10, 3),
        ]));
        let replayer = TradeReplayer::new(store);

        let trades = collect(replayer.replay("usd_f_ethusdt", 6, None)).await;
        assert_eq!(trades.len(), 1);
        assert_eq!(trades[0].trade_id(), TradeId::new(2));
    }

    #[tokio::test]
    async fn test_empty_replay_is_not_an_error() {
        let replayer = TradeReplayer::new(Arc::new(MemoryStore::new()));
        assert!(collect(replayer.replay("BTCUSDT", 0, None)).await.is_empty());
        assert!(collect(replayer.replay("BTCUSDT", 0, NonZeroUsize::new(3)))
            .await
            .is_empty());
    }

    #[tokio::test]
    async fn test_replay_is_lazy_snapshot_at_first_poll() {
        let store = Arc::new(MemoryStore::new());
        let replayer = TradeReplayer::new(store.clone());

        let stream = replayer.replay("BTCUSDT", 0, None);
        store.insert_trades(&[trade("BTCUSDT", 1, 1)]).await.unwrap();
        assert_eq!(collect(stream).await.len(), 1);
    }

    #[tokio::test]
    async fn test_dedup_window_drops_repeats() {
        let store = Arc::new(MemoryStore::seeded([
            trade("BTCUSDT", 1, 1),
            trade("BTCUSDT", 1, 1),
            trade("BTCUSDT", 2, 2),
            trade("BTCUSDT", 3, 3),
        ]));

        let plain = TradeReplayer::new(store.clone());
        assert_eq!(collect(plain.replay("BTCUSDT", 0, None)).await.len(), 4);

        let deduped = TradeReplayer::with_options(
            store,
            ReplayOptions {
                dedup_window: NonZeroUsize::new(16),
            },
        );
        let ids: Vec<u64> = collect(deduped.replay("BTCUSDT", 0, NonZeroUsize::new(1)))
            .await
            .iter()
            .map(|t| t.trade_id().get())
            .collect();
        assert_eq!(ids, vec![1, 2, 3]);
    }

    #[test]
    fn test_recent_keys_window_evicts() {
        let mut recent = RecentKeys::new(2);
        let a = trade("BTCUSDT", 1, 1);
        let b = trade("BTCUSDT", 2, 2);
        let c = trade("BTCUSDT", 3, 3);
        assert!(recent.admit(&a));
        assert!(!recent.admit(&a));
        assert!(recent.admit(&b));
        assert!(recent.admit(&c));
        // `a` fell out of the window
        assert!(recent.admit(&a));
    }

    #[tokio::test]
    async fn test_symbols() {
        let store = Arc::new(MemoryStore::seeded([
            trade("ETHUSDT", 1, 1),
            trade("BTCUSDT", 1, 2),
        ]));
        let replayer = TradeReplayer::new(store);
        assert_eq!(replayer.symbols().await.unwrap(), vec!["BTCUSDT", "ETHUSDT"]);
    }
}
