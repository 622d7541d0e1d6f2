//! Batching dispatcher
//!
//! Accumulates trades from every connector and writes them as bulk inserts.
//! The buffer is only cleared by a confirmed write; a failed write keeps
//! every record for the next attempt (at-least-once).
//!
//! `insert` and `flush` hold the buffer lock for the whole append or write, so
//! connectors on different worker threads can never interleave with a flush.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use persistence::{StoreError, TradeStore};
use serde::Deserialize;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};
use types::log::LogLevel;
use types::trade::TradeEvent;

use crate::logger::DiagnosticLogger;

/// Default flush threshold, sized to stay under the store's per-insert
/// partition limit.
pub const DEFAULT_FLUSH_THRESHOLD: usize = 90;

/// What to do with an insert once `max_buffered` records are pending.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverflowPolicy {
    /// Evict the oldest buffered record to make room.
    #[default]
    DropOldest,
    /// Refuse the incoming record.
    RejectNewest,
}

#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// Buffer length that triggers a flush from within `insert`. Must be > 0.
    pub flush_threshold: usize,
    /// Upper bound on pending records; `None` buffers without limit. Never
    /// below `flush_threshold`.
    pub max_buffered: Option<usize>,
    pub overflow_policy: OverflowPolicy,
    /// Bound on a single bulk insert.
    pub write_timeout: Duration,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            flush_threshold: DEFAULT_FLUSH_THRESHOLD,
            max_buffered: None,
            overflow_policy: OverflowPolicy::default(),
            write_timeout: Duration::from_secs(10),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushOutcome {
    /// Nothing was buffered; no write issued.
    Empty,
    /// This many records were written and cleared.
    Flushed(usize),
    /// The write failed; this many records remain buffered.
    Failed(usize),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    /// Appended, threshold not reached.
    Buffered,
    /// Appended and the threshold triggered exactly one flush.
    Flush(FlushOutcome),
    /// Refused by `OverflowPolicy::RejectNewest`.
    Rejected,
}

/// Point-in-time copy of the dispatcher counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatcherStats {
    pub accepted: u64,
    pub persisted: u64,
    pub flushes: u64,
    pub failed_flushes: u64,
    pub dropped: u64,
}

#[derive(Debug, Default)]
struct Counters {
    accepted: AtomicU64,
    persisted: AtomicU64,
    flushes: AtomicU64,
    failed_flushes: AtomicU64,
    dropped: AtomicU64,
}

enum FlushAttempt {
    Empty,
    Written(usize),
    Failed { pending: usize, error: StoreError },
}

pub struct Dispatcher {
    store: Arc<dyn TradeStore>,
    logger: Arc<DiagnosticLogger>,
    config: DispatcherConfig,
    buffer: Mutex<VecDeque<TradeEvent>>,
    counters: Counters,
}

impl Dispatcher {
    pub fn new(
        store: Arc<dyn TradeStore>,
        logger: Arc<DiagnosticLogger>,
        mut config: DispatcherConfig,
    ) -> Self {
        config.flush_threshold = config.flush_threshold.max(1);
        // A cap below the threshold would stop `insert` from ever flushing.
        if let Some(cap) = config.max_buffered {
            if cap < config.flush_threshold {
                warn!(
                    max_buffered = cap,
                    flush_threshold = config.flush_threshold,
                    "Buffer cap below flush threshold, raising it to the threshold"
                );
                config.max_buffered = Some(config.flush_threshold);
            }
        }

        info!(
            flush_threshold = config.flush_threshold,
            max_buffered = ?config.max_buffered,
            overflow_policy = ?config.overflow_policy,
            "Dispatcher initialized"
        );

        Self {
            store,
            logger,
            buffer: Mutex::new(VecDeque::with_capacity(config.flush_threshold)),
            config,
            counters: Counters::default(),
        }
    }

    pub fn config(&self) -> &DispatcherConfig {
        &self.config
    }

    /// Append one record; flush once if the buffer reaches the threshold.
    pub async fn insert(&self, record: TradeEvent) -> InsertOutcome {
        let attempt = {
            let mut buffer = self.buffer.lock().await;

            if let Some(cap) = self.config.max_buffered {
                if buffer.len() >= cap {
                    match self.config.overflow_policy {
                        OverflowPolicy::RejectNewest => {
                            self.counters.dropped.fetch_add(1, Ordering::Relaxed);
                            warn!(
                                symbol = %record.symbol_id(),
                                trade_id = %record.trade_id(),
                                max_buffered = cap,
                                "Buffer full, rejecting trade"
                            );
                            return InsertOutcome::Rejected;
                        }
                        OverflowPolicy::DropOldest => {
                            if let Some(evicted) = buffer.pop_front() {
                                self.counters.dropped.fetch_add(1, Ordering::Relaxed);
                                warn!(
                                    symbol = %evicted.symbol_id(),
                                    trade_id = %evicted.trade_id(),
                                    max_buffered = cap,
                                    "Buffer full, dropping oldest trade"
                                );
                            }
                        }
                    }
                }
            }

            trace!(
                symbol = %record.symbol_id(),
                trade_id = %record.trade_id(),
                "Trade buffered"
            );
            buffer.push_back(record);
            self.counters.accepted.fetch_add(1, Ordering::Relaxed);

            if buffer.len() >= self.config.flush_threshold {
                Some(self.write_locked(&mut buffer).await)
            } else {
                None
            }
        };

        match attempt {
            Some(attempt) => InsertOutcome::Flush(self.report(attempt).await),
            None => InsertOutcome::Buffered,
        }
    }

    /// Write the whole buffer as one bulk insert.
    pub async fn flush(&self) -> FlushOutcome {
        let attempt = {
            let mut buffer = self.buffer.lock().await;
            self.write_locked(&mut buffer).await
        };
        self.report(attempt).await
    }

    pub async fn len(&self) -> usize {
        self.buffer.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.buffer.lock().await.is_empty()
    }

    pub fn stats(&self) -> DispatcherStats {
        DispatcherStats {
            accepted: self.counters.accepted.load(Ordering::Relaxed),
            persisted: self.counters.persisted.load(Ordering::Relaxed),
            flushes: self.counters.flushes.load(Ordering::Relaxed),
            failed_flushes: self.counters.failed_flushes.load(Ordering::Relaxed),
            dropped: self.counters.dropped.load(Ordering::Relaxed),
        }
    }

    /// Flush a non-empty buffer every `period` until `cancel` fires, then
    /// flush once more before returning.
    pub fn spawn_flush_ticker(
        self: &Arc<Self>,
        period: Duration,
        cancel: CancellationToken,
    ) -> JoinHandle<FlushOutcome> {
        let dispatcher = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately.
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        if !dispatcher.is_empty().await {
                            dispatcher.flush().await;
                        }
                    }
                }
            }

            let outcome = dispatcher.flush().await;
            info!(?outcome, "Final flush on shutdown");
            outcome
        })
    }

    async fn write_locked(&self, buffer: &mut VecDeque<TradeEvent>) -> FlushAttempt {
        if buffer.is_empty() {
            return FlushAttempt::Empty;
        }

        let pending = buffer.len();
        let batch = buffer.make_contiguous();
        let write = tokio::time::timeout(self.config.write_timeout, self.store.insert_trades(batch))
            .await
            .unwrap_or(Err(StoreError::Timeout(self.config.write_timeout)));

        match write {
            Ok(()) => {
                buffer.clear();
                FlushAttempt::Written(pending)
            }
            Err(error) => FlushAttempt::Failed { pending, error },
        }
    }

    /// Update counters and emit diagnostics once the buffer lock is released.
    async fn report(&self, attempt: FlushAttempt) -> FlushOutcome {
        match attempt {
            FlushAttempt::Empty => FlushOutcome::Empty,
            FlushAttempt::Written(n) => {
                self.counters.flushes.fetch_add(1, Ordering::Relaxed);
                self.counters.persisted.fetch_add(n as u64, Ordering::Relaxed);
                debug!(records = n, "Flushed trades");
                FlushOutcome::Flushed(n)
            }
            FlushAttempt::Failed { pending, error } => {
                self.counters.failed_flushes.fetch_add(1, Ordering::Relaxed);
                warn!(pending, error = %error, "Trade flush failed, keeping buffer");
                self.logger
                    .log_msg_with(
                        "Trade flush failed, buffer kept for retry",
                        LogLevel::Warning,
                        error.to_string(),
                        Some(false),
                    )
                    .await;
                FlushOutcome::Failed(pending)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use persistence::MemoryStore;
    use proptest::prelude::*;
    use types::ids::{SymbolId, TradeId};
    use types::trade::TakerSide;

    fn trade(id: u64) -> TradeEvent {
        TradeEvent::new(
            1_700_000_000_000 + id,
            1_700_000_000_005 + id,
            SymbolId::parse("BTCUSDT").unwrap(),
            TradeId::new(id),
            "42000.10".parse().unwrap(),
            "0.001".parse().unwrap(),
            TakerSide::Buy,
        )
    }

    fn dispatcher(store: &Arc<MemoryStore>, config: DispatcherConfig) -> Arc<Dispatcher> {
        let logger = Arc::new(DiagnosticLogger::new(
            store.clone(),
            false,
            Duration::from_secs(1),
        ));
        Arc::new(Dispatcher::new(store.clone(), logger, config))
    }

    fn threshold(n: usize) -> DispatcherConfig {
        DispatcherConfig {
            flush_threshold: n,
            ..DispatcherConfig::default()
        }
    }

    #[tokio::test]
    async fn test_threshold_triggers_single_flush() {
        let store = Arc::new(MemoryStore::new());
        let dispatcher = dispatcher(&store, DispatcherConfig::default());

        for id in 0..89 {
            assert_eq!(dispatcher.insert(trade(id)).await, InsertOutcome::Buffered);
        }
        assert_eq!(dispatcher.len().await, 89);
        assert_eq!(store.trade_write_calls(), 0);

        let outcome = dispatcher.insert(trade(89)).await;
        assert_eq!(outcome, InsertOutcome::Flush(FlushOutcome::Flushed(90)));
        assert_eq!(dispatcher.len().await, 0);
        assert_eq!(store.trade_write_calls(), 1);
        assert_eq!(store.trades().len(), 90);
    }

    #[tokio::test]
    async fn test_failed_flush_keeps_buffer_and_warns() {
        let store = Arc::new(MemoryStore::new());
        store.set_trade_writes_failing(true);
        let dispatcher = dispatcher(&store, DispatcherConfig::default());

        for id in 0..89 {
            dispatcher.insert(trade(id)).await;
        }
        let outcome = dispatcher.insert(trade(89)).await;
        assert_eq!(outcome, InsertOutcome::Flush(FlushOutcome::Failed(90)));
        assert_eq!(dispatcher.len().await, 90);

        let logs = store.logs();
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].level, LogLevel::Warning);
        assert!(logs[0].payload.contains("trade writes disabled"));

        // The next insert retries with old and new records combined.
        store.set_trade_writes_failing(false);
        let outcome = dispatcher.insert(trade(90)).await;
        assert_eq!(outcome, InsertOutcome::Flush(FlushOutcome::Flushed(91)));
        assert_eq!(store.trades().len(), 91);
        assert_eq!(dispatcher.stats().failed_flushes, 1);
        assert_eq!(dispatcher.stats().persisted, 91);
    }

    #[tokio::test]
    async fn test_flush_empty_buffer_issues_no_write() {
        let store = Arc::new(MemoryStore::new());
        let dispatcher = dispatcher(&store, DispatcherConfig::default());
        assert_eq!(dispatcher.flush().await, FlushOutcome::Empty);
        assert_eq!(store.trade_write_calls(), 0);
    }

    #[tokio::test]
    async fn test_drop_oldest_keeps_newest_during_outage() {
        let store = Arc::new(MemoryStore::new());
        store.set_trade_writes_failing(true);
        let dispatcher = dispatcher(
            &store,
            DispatcherConfig {
                flush_threshold: 3,
                max_buffered: Some(3),
                ..DispatcherConfig::default()
            },
        );
        for id in 0..5 {
            dispatcher.insert(trade(id)).await;
        }
        assert_eq!(dispatcher.len().await, 3);
        assert_eq!(dispatcher.stats().dropped, 2);
        // Every insert at the threshold retried the write.
        assert_eq!(store.trade_write_calls(), 3);

        store.set_trade_writes_failing(false);
        assert_eq!(dispatcher.flush().await, FlushOutcome::Flushed(3));
        let ids: Vec<u64> = store.trades().iter().map(|t| t.trade_id().get()).collect();
        assert_eq!(ids, vec![2, 3, 4]);
    }

    #[tokio::test]
    async fn test_reject_newest_keeps_oldest_during_outage() {
        let store = Arc::new(MemoryStore::new());
        store.set_trade_writes_failing(true);
        let dispatcher = dispatcher(
            &store,
            DispatcherConfig {
                flush_threshold: 2,
                max_buffered: Some(2),
                overflow_policy: OverflowPolicy::RejectNewest,
                ..DispatcherConfig::default()
            },
        );
        assert_eq!(dispatcher.insert(trade(0)).await, InsertOutcome::Buffered);
        assert_eq!(
            dispatcher.insert(trade(1)).await,
            InsertOutcome::Flush(FlushOutcome::Failed(2))
        );
        assert_eq!(dispatcher.insert(trade(2)).await, InsertOutcome::Rejected);

        store.set_trade_writes_failing(false);
        dispatcher.flush().await;
        let ids: Vec<u64> = store.trades().iter().map(|t| t.trade_id().get()).collect();
        assert_eq!(ids, vec![0, 1]);
    }

    #[tokio::test]
    async fn test_cap_below_threshold_is_raised_and_healthy_store_loses_nothing() {
        let store = Arc::new(MemoryStore::new());
        let dispatcher = dispatcher(
            &store,
            DispatcherConfig {
                max_buffered: Some(10),
                ..DispatcherConfig::default()
            },
        );
        assert_eq!(dispatcher.config().max_buffered, Some(DEFAULT_FLUSH_THRESHOLD));

        for id in 0..200 {
            dispatcher.insert(trade(id)).await;
        }
        assert_eq!(store.trade_write_calls(), 2);
        assert_eq!(store.trades().len(), 180);
        assert_eq!(dispatcher.len().await, 20);
        assert_eq!(dispatcher.stats().dropped, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ticker_flushes_and_final_flush_on_cancel() {
        let store = Arc::new(MemoryStore::new());
        let dispatcher = dispatcher(&store, threshold(1_000));
        let cancel = CancellationToken::new();
        let ticker = dispatcher.spawn_flush_ticker(Duration::from_millis(500), cancel.clone());

        dispatcher.insert(trade(1)).await;
        tokio::time::sleep(Duration::from_millis(600)).await;
        assert_eq!(store.trades().len(), 1);

        dispatcher.insert(trade(2)).await;
        cancel.cancel();
        assert_eq!(ticker.await.unwrap(), FlushOutcome::Flushed(1));
        assert_eq!(store.trades().len(), 2);
        assert!(dispatcher.is_empty().await);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_inserts_lose_nothing() {
        let store = Arc::new(MemoryStore::new());
        let dispatcher = dispatcher(&store, threshold(7));

        let tasks: Vec<_> = (0..8u64)
            .map(|task| {
                let dispatcher = Arc::clone(&dispatcher);
                tokio::spawn(async move {
                    for i in 0..50 {
                        dispatcher.insert(trade(task * 1_000 + i)).await;
                    }
                })
            })
            .collect();
        for task in tasks {
            task.await.unwrap();
        }
        dispatcher.flush().await;

        let mut ids: Vec<u64> = store.trades().iter().map(|t| t.trade_id().get()).collect();
        ids.sort_unstable();
        ids.dedup();
        assert_eq!(ids.len(), 400);
        assert_eq!(store.trades().len(), 400);
    }

    proptest! {
        #[test]
        fn prop_buffer_len_tracks_inserts_below_threshold(n in 0usize..60, extra in 1usize..20) {
            let rt = tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap();
            rt.block_on(async {
                let store = Arc::new(MemoryStore::new());
                let dispatcher = dispatcher(&store, threshold(n + extra));
                for id in 0..n {
                    assert_eq!(dispatcher.insert(trade(id as u64)).await, InsertOutcome::Buffered);
                }
                assert_eq!(dispatcher.len().await, n);
                assert_eq!(store.trade_write_calls(), 0);
            });
        }

        #[test]
        fn prop_at_most_one_flush_per_insert(threshold_n in 1usize..10, inserts in 1usize..40) {
            let rt = tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap();
            rt.block_on(async {
                let store = Arc::new(MemoryStore::new());
                let dispatcher = dispatcher(&store, threshold(threshold_n));
                for id in 0..inserts {
                    let before = store.trade_write_calls();
                    let outcome = dispatcher.insert(trade(id as u64)).await;
                    let calls = store.trade_write_calls() - before;
                    assert!(calls <= 1);
                    assert_eq!(calls == 1, matches!(outcome, InsertOutcome::Flush(_)));
                }
                assert_eq!(dispatcher.len().await, inserts % threshold_n);
            });
        }
    }
}
