//! Identifier types for archived records
//!
//! `TradeId` is the venue's aggregate trade id. `SymbolId` is the canonical,
//! fully qualified symbol used as the store key.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::asset::AssetClass;
use crate::errors::TypesError;

/// Aggregate trade identifier assigned by the venue
///
/// Unique within one symbol's stream only: two symbols can carry the same id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TradeId(u64);

impl TradeId {
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    pub const fn get(self) -> u64 {
        self.0
    }
}

impl From<u64> for TradeId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

impl fmt::Display for TradeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Canonical symbol: asset-class prefix plus upper-cased venue market name
///
/// `USD_F_BTCUSDT` is the linear perpetual on `BTCUSDT`, `BTCUSDT` alone is
/// spot. Serialized as its canonical string.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SymbolId {
    asset_class: AssetClass,
    market: String,
}

impl SymbolId {
    /// Build from an explicit asset class and a bare venue market name.
    pub fn new(asset_class: AssetClass, market: &str) -> Result<Self, TypesError> {
        if market.is_empty() {
            return Err(TypesError::InvalidSymbol {
                symbol: market.to_string(),
                reason: "empty market name",
            });
        }
        if !market
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_')
        {
            return Err(TypesError::InvalidSymbol {
                symbol: market.to_string(),
                reason: "market name must be ASCII alphanumeric or '_'",
            });
        }

        Ok(Self {
            asset_class,
            market: market.to_ascii_uppercase(),
        })
    }

    /// Parse a canonical symbol string, deriving the asset class from its prefix.
    pub fn parse(symbol: &str) -> Result<Self, TypesError> {
        let trimmed = symbol.trim();
        let (asset_class, market) = AssetClass::classify(trimmed);
        Self::new(asset_class, market).map_err(|err| match err {
            TypesError::InvalidSymbol { reason, .. } => TypesError::InvalidSymbol {
                symbol: symbol.to_string(),
                reason,
            },
            other => other,
        })
    }

    pub fn asset_class(&self) -> AssetClass {
        self.asset_class
    }

    /// Venue market name without the asset-class prefix.
    pub fn market(&self) -> &str {
        &self.market
    }

    /// Raw venue subscription name, e.g. `btcusdt@aggTrade`.
    pub fn stream_name(&self) -> String {
        format!("{}@aggTrade", self.market.to_ascii_lowercase())
    }

    /// Case-insensitive comparison against a canonical string.
    pub fn matches(&self, other: &str) -> bool {
        self.to_string().eq_ignore_ascii_case(other.trim())
    }
}

impl fmt::Display for SymbolId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.asset_class.symbol_prefix(), self.market)
    }
}

impl FromStr for SymbolId {
    type Err = TypesError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for SymbolId {
    type Error = TypesError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<SymbolId> for String {
    fn from(symbol: SymbolId) -> Self {
        symbol.to_string()
    }
}
