//! Wire rows for the ClickHouse tables
//!
//! Inserts use `JSONEachRow` (one object per line). Trade scans use
//! `JSONCompactEachRow`, one array per line with columns in the order
//! time_exchange, time_coinapi, uuid, price, size, taker_side, symbol_id.

use std::collections::VecDeque;

use futures::stream::{self, Stream, StreamExt};
use serde::Serialize;
use types::ids::{SymbolId, TradeId};
use types::log::LogEvent;
use types::trade::TradeEvent;

use crate::store::{StoreError, TradeBlock, TradeBlockStream};

/// Column layout of one trade table row as returned by a scan.
type CompactTradeRow = (u64, u64, u64, String, String, String, String);

/// Insert shape of the trade table.
#[derive(Debug, Serialize)]
pub struct TradeRow {
    pub time_exchange: u64,
    pub time_coinapi: u64,
    pub uuid: u64,
    pub price: String,
    pub size: String,
    pub taker_side: &'static str,
    pub symbol_id: String,
}

impl From<&TradeEvent> for TradeRow {
    fn from(event: &TradeEvent) -> Self {
        Self {
            time_exchange: event.exchange_timestamp(),
            time_coinapi: event.ingest_timestamp(),
            uuid: event.trade_id().get(),
            price: event.price().to_string(),
            size: event.size().to_string(),
            taker_side: event.taker_side().as_str(),
            symbol_id: event.symbol_id().to_string(),
        }
    }
}

/// Insert shape of the log table.
#[derive(Debug, Serialize)]
pub struct LogRow<'a> {
    pub timestamp: String,
    pub msg: &'a str,
    pub level: u8,
    pub payload: &'a str,
}

impl<'a> From<&'a LogEvent> for LogRow<'a> {
    fn from(event: &'a LogEvent) -> Self {
        Self {
            // DateTime64(3) text form
            timestamp: event.timestamp.format("%Y-%m-%d %H:%M:%S%.3f").to_string(),
            msg: &event.message,
            level: event.level.code(),
            payload: &event.payload,
        }
    }
}

/// Serialize rows as newline-delimited JSON objects.
pub fn encode_json_each_row<T, I>(rows: I) -> Result<Vec<u8>, StoreError>
where
    T: Serialize,
    I: IntoIterator<Item = T>,
{
    let mut body = Vec::new();
    for row in rows {
        serde_json::to_writer(&mut body, &row)?;
        body.push(b'\n');
    }
    Ok(body)
}

/// Decode one `JSONCompactEachRow` line of a trade scan.
pub fn decode_trade_row(line: &str) -> Result<TradeEvent, StoreError> {
    let decode_err = |reason: String| StoreError::Decode {
        line: line.to_string(),
        reason,
    };

    let (time_exchange, time_coinapi, uuid, price, size, taker_side, symbol_id): CompactTradeRow =
        serde_json::from_str(line).map_err(|e| decode_err(e.to_string()))?;

    let symbol_id = SymbolId::parse(&symbol_id).map_err(|e| decode_err(e.to_string()))?;
    let price = price.parse().map_err(|e: types::errors::TypesError| decode_err(e.to_string()))?;
    let size = size.parse().map_err(|e: types::errors::TypesError| decode_err(e.to_string()))?;
    let taker_side = taker_side
        .parse()
        .map_err(|e: types::errors::TypesError| decode_err(e.to_string()))?;

    Ok(TradeEvent::new(
        time_exchange,
        time_coinapi,
        symbol_id,
        TradeId::new(uuid),
        price,
        size,
        taker_side,
    ))
}

/// Decode every non-empty line of a fully buffered response body.
pub fn decode_trade_rows(body: &str) -> Result<TradeBlock, StoreError> {
    body.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(decode_trade_row)
        .collect()
}

// ── Streaming re-chunking ───────────────────────────────────────────

/// Cuts newline-terminated rows out of arbitrary byte chunks and groups the
/// decoded trades into blocks of a fixed maximum size.
#[derive(Debug)]
pub struct RowBlocker {
    partial: Vec<u8>,
    ready: VecDeque<TradeEvent>,
    block_size: usize,
}

impl RowBlocker {
    pub fn new(block_size: usize) -> Self {
        Self {
            partial: Vec::new(),
            ready: VecDeque::new(),
            block_size: block_size.max(1),
        }
    }

    /// Feed one body chunk; complete lines are decoded immediately.
    pub fn push_bytes(&mut self, chunk: &[u8]) -> Result<(), StoreError> {
        let scan_from = self.partial.len();
        self.partial.extend_from_slice(chunk);

        let mut start = 0;
        let mut search = scan_from;
        while let Some(offset) = self.partial[search..].iter().position(|b| *b == b'\n') {
            let end = search + offset;
            let line = self.partial[start..end].to_vec();
            self.push_line(&line)?;
            start = end + 1;
            search = start;
        }
        self.partial.drain(..start);
        Ok(())
    }

    /// Decode whatever trails the last newline once the body has ended.
    pub fn finish(&mut self) -> Result<(), StoreError> {
        let line = std::mem::take(&mut self.partial);
        self.push_line(&line)
    }

    /// Take the next block: a full one, or with `force` the non-empty rest.
    pub fn take_block(&mut self, force: bool) -> Option<TradeBlock> {
        if self.ready.len() >= self.block_size || (force && !self.ready.is_empty()) {
            let n = self.ready.len().min(self.block_size);
            Some(self.ready.drain(..n).collect())
        } else {
            None
        }
    }

    fn push_line(&mut self, raw: &[u8]) -> Result<(), StoreError> {
        let text = std::str::from_utf8(raw).map_err(|e| StoreError::Decode {
            line: String::from_utf8_lossy(raw).into_owned(),
            reason: e.to_string(),
        })?;
        let text = text.trim();
        if !text.is_empty() {
            self.ready.push_back(decode_trade_row(text)?);
        }
        Ok(())
    }
}

struct BlockState<S> {
    body: S,
    blocker: RowBlocker,
    exhausted: bool,
    failed: bool,
}

/// Turn a streamed response body into blocks of at most `block_size` trades.
///
/// Stops after the first error.
pub fn block_stream<S, E>(body: S, block_size: usize) -> TradeBlockStream
where
    S: Stream<Item = Result<Vec<u8>, E>> + Send + Unpin + 'static,
    E: Into<StoreError> + Send + 'static,
{
    let state = BlockState {
        body,
        blocker: RowBlocker::new(block_size),
        exhausted: false,
        failed: false,
    };

    stream::unfold(state, |mut st| async move {
        loop {
            if st.failed {
                return None;
            }
            if let Some(block) = st.blocker.take_block(st.exhausted) {
                return Some((Ok(block), st));
            }
            if st.exhausted {
                return None;
            }
            match st.body.next().await {
                Some(Ok(chunk)) => {
                    if let Err(err) = st.blocker.push_bytes(&chunk) {
                        st.failed = true;
                        return Some((Err(err), st));
                    }
                }
                Some(Err(err)) => {
                    st.failed = true;
                    return Some((Err(err.into()), st));
                }
                None => {
                    st.exhausted = true;
                    if let Err(err) = st.blocker.finish() {
                        st.failed = true;
                        return Some((Err(err), st));
                    }
                }
            }
        }
    })
    .boxed()
}
