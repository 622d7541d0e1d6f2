//! Store interface: the narrow insert/query surface the archiver depends on
//!
//! Two append-only tables sit behind it: trades and diagnostic logs. The
//! trade table deduplicates in the background (merge-time), so readers may
//! see transient duplicates.

use std::num::NonZeroUsize;
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::BoxStream;
use thiserror::Error;
use types::log::LogEvent;
use types::trade::TradeEvent;

// ── Errors ──────────────────────────────────────────────────────────

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Store request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Store rejected request (HTTP {status}): {body}")]
    Rejected { status: u16, body: String },

    #[error("Undecodable store row {line:?}: {reason}")]
    Decode { line: String, reason: String },

    #[error("Failed to encode row: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("Store operation timed out after {0:?}")]
    Timeout(Duration),

    #[error("Store unavailable: {0}")]
    Unavailable(String),

    #[error("Invalid store configuration: {0}")]
    InvalidConfig(String),
}

// ── Queries ─────────────────────────────────────────────────────────

/// Filter for a trade history scan.
///
/// The symbol is stored upper-cased so the match against the canonical form
/// is case-insensitive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TradeQuery {
    symbol: String,
    from_exchange_timestamp: u64,
    block_size: Option<NonZeroUsize>,
}

impl TradeQuery {
    pub fn new(symbol: &str, from_exchange_timestamp: u64) -> Self {
        Self {
            symbol: symbol.trim().to_ascii_uppercase(),
            from_exchange_timestamp,
            block_size: None,
        }
    }

    /// Page the scan in blocks of at most `block_size` rows. Pagination only
    /// bounds client memory; it never changes order or contents.
    pub fn with_block_size(mut self, block_size: Option<NonZeroUsize>) -> Self {
        self.block_size = block_size;
        self
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    pub fn from_exchange_timestamp(&self) -> u64 {
        self.from_exchange_timestamp
    }

    pub fn block_size(&self) -> Option<NonZeroUsize> {
        self.block_size
    }
}

/// Rows delivered together by one store round trip.
pub type TradeBlock = Vec<TradeEvent>;

/// Ordered blocks of a single trade scan.
///
/// Unpaginated scans yield exactly one block (possibly empty); paginated
/// scans yield only non-empty blocks of at most `block_size` rows.
pub type TradeBlockStream = BoxStream<'static, Result<TradeBlock, StoreError>>;

// ── Store trait ─────────────────────────────────────────────────────

#[async_trait]
pub trait TradeStore: Send + Sync {
    /// Bulk-append trades as one write. All or nothing from the caller's view.
    async fn insert_trades(&self, trades: &[TradeEvent]) -> Result<(), StoreError>;

    /// Append diagnostic log events.
    async fn insert_logs(&self, events: &[LogEvent]) -> Result<(), StoreError>;

    /// Scan trades for one symbol at or after a watermark, ascending by
    /// exchange timestamp (ties broken by trade id). The scan sees the store
    /// as of the call.
    async fn query_trades(&self, query: &TradeQuery) -> Result<TradeBlockStream, StoreError>;

    /// Distinct canonical symbols present in the trade table, sorted.
    async fn distinct_symbols(&self) -> Result<Vec<String>, StoreError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_query_normalizes_symbol() {
        let query = TradeQuery::new(" usd_f_btcusdt ", 42);
        assert_eq!(query.symbol(), "USD_F_BTCUSDT");
        assert_eq!(query.from_exchange_timestamp(), 42);
        assert_eq!(query.block_size(), None);
    }

    #[test]
    fn test_query_block_size() {
        let query = TradeQuery::new("BTCUSDT", 0).with_block_size(NonZeroUsize::new(5_000));
        assert_eq!(query.block_size().map(NonZeroUsize::get), Some(5_000));
    }

    #[test]
    fn test_rejected_error_display() {
        let err = StoreError::Rejected {
            status: 500,
            body: "Code: 252. Too many partitions".to_string(),
        };
        assert!(err.to_string().contains("HTTP 500"));
        assert!(err.to_string().contains("Too many partitions"));
    }
}
