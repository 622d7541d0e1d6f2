//! Canonical trade record
//!
//! One `TradeEvent` per aggregate-trade print received from a feed. Built by
//! the stream connector, moved into the dispatcher, written to the store, and
//! rebuilt from store rows on replay.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::errors::TypesError;
use crate::ids::{SymbolId, TradeId};
use crate::numeric::{Price, Quantity};

/// Side that initiated the trade (was not resting on the book)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TakerSide {
    Buy,
    Sell,
}

impl TakerSide {
    /// Venue convention: when the buyer is the maker, the seller took.
    pub fn from_buyer_is_maker(buyer_is_maker: bool) -> Self {
        if buyer_is_maker {
            TakerSide::Sell
        } else {
            TakerSide::Buy
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TakerSide::Buy => "BUY",
            TakerSide::Sell => "SELL",
        }
    }
}

impl fmt::Display for TakerSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TakerSide {
    type Err = TypesError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.eq_ignore_ascii_case("BUY") {
            Ok(TakerSide::Buy)
        } else if s.eq_ignore_ascii_case("SELL") {
            Ok(TakerSide::Sell)
        } else {
            Err(TypesError::InvalidTakerSide(s.to_string()))
        }
    }
}

/// Canonical aggregate trade
///
/// Timestamps are epoch milliseconds. `exchange_timestamp` is authoritative
/// event time; `ingest_timestamp` is when this process observed the event.
/// No ordering between the two is assumed: feeds may rewind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TradeEvent {
    exchange_timestamp: u64,
    ingest_timestamp: u64,
    symbol_id: SymbolId,
    trade_id: TradeId,
    price: Price,
    size: Quantity,
    taker_side: TakerSide,
}

impl TradeEvent {
    pub fn new(
        exchange_timestamp: u64,
        ingest_timestamp: u64,
        symbol_id: SymbolId,
        trade_id: TradeId,
        price: Price,
        size: Quantity,
        taker_side: TakerSide,
    ) -> Self {
        Self {
            exchange_timestamp,
            ingest_timestamp,
            symbol_id,
            trade_id,
            price,
            size,
            taker_side,
        }
    }

    pub fn exchange_timestamp(&self) -> u64 {
        self.exchange_timestamp
    }

    pub fn ingest_timestamp(&self) -> u64 {
        self.ingest_timestamp
    }

    pub fn symbol_id(&self) -> &SymbolId {
        &self.symbol_id
    }

    pub fn trade_id(&self) -> TradeId {
        self.trade_id
    }

    pub fn price(&self) -> Price {
        self.price
    }

    pub fn size(&self) -> Quantity {
        self.size
    }

    pub fn taker_side(&self) -> TakerSide {
        self.taker_side
    }

    /// Identity used for application-level dedup. Trade ids only repeat
    /// across symbols, so the pair is unique.
    pub fn dedup_key(&self) -> (&SymbolId, TradeId) {
        (&self.symbol_id, self.trade_id)
    }
}
