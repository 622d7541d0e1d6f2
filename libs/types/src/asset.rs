//! Asset classes and feed sampling intervals
//!
//! Each asset class maps to one venue stream endpoint and one canonical
//! symbol prefix. The mapping lives in a single table so adding a class is a
//! one-line change.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::errors::TypesError;

/// Market segment a symbol trades in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AssetClass {
    /// Spot market; canonical symbols carry no prefix
    Spot,
    /// Linear (USD-margined) perpetuals and futures
    UsdMarginedFutures,
    /// Inverse (coin-margined) perpetuals and futures
    CoinMarginedFutures,
}

/// Static properties of one asset class.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AssetClassInfo {
    pub class: AssetClass,
    /// Prefix prepended to the venue market name to form the canonical symbol
    pub symbol_prefix: &'static str,
    /// Base websocket endpoint; the stream name is appended after a `/`
    pub stream_endpoint: &'static str,
}

/// Ordered by declaration of `AssetClass`; `AssetClass as usize` indexes it.
const ASSET_CLASSES: [AssetClassInfo; 3] = [
    AssetClassInfo {
        class: AssetClass::Spot,
        symbol_prefix: "",
        stream_endpoint: "wss://stream.binance.com:9443/ws",
    },
    AssetClassInfo {
        class: AssetClass::UsdMarginedFutures,
        symbol_prefix: "USD_F_",
        stream_endpoint: "wss://fstream.binance.com/ws",
    },
    AssetClassInfo {
        class: AssetClass::CoinMarginedFutures,
        symbol_prefix: "COIN_F_",
        stream_endpoint: "wss://dstream.binance.com/ws",
    },
];

impl AssetClass {
    pub const ALL: [AssetClass; 3] = [
        AssetClass::Spot,
        AssetClass::UsdMarginedFutures,
        AssetClass::CoinMarginedFutures,
    ];

    pub fn info(self) -> &'static AssetClassInfo {
        &ASSET_CLASSES[self as usize]
    }

    pub fn symbol_prefix(self) -> &'static str {
        self.info().symbol_prefix
    }

    pub fn default_stream_endpoint(self) -> &'static str {
        self.info().stream_endpoint
    }

    /// Split a canonical symbol into its asset class and venue market name.
    ///
    /// Prefixed classes are tried longest prefix first; anything without a
    /// known prefix is spot. Case-insensitive on the prefix.
    pub fn classify(symbol: &str) -> (AssetClass, &str) {
        let mut prefixed: Vec<&AssetClassInfo> = ASSET_CLASSES
            .iter()
            .filter(|info| !info.symbol_prefix.is_empty())
            .collect();
        prefixed.sort_by_key(|info| std::cmp::Reverse(info.symbol_prefix.len()));

        for info in prefixed {
            let prefix = info.symbol_prefix;
            if symbol.len() >= prefix.len()
                && symbol.is_char_boundary(prefix.len())
                && symbol[..prefix.len()].eq_ignore_ascii_case(prefix)
            {
                return (info.class, &symbol[prefix.len()..]);
            }
        }
        (AssetClass::Spot, symbol)
    }
}

impl fmt::Display for AssetClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            AssetClass::Spot => "spot",
            AssetClass::UsdMarginedFutures => "usd-m",
            AssetClass::CoinMarginedFutures => "coin-m",
        };
        f.write_str(label)
    }
}

/// Push rate of the venue stream. The venue supports exactly two.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u64", into = "u64")]
pub enum SamplingInterval {
    Ms100,
    Ms1000,
}

impl SamplingInterval {
    pub fn as_millis(self) -> u64 {
        match self {
            SamplingInterval::Ms100 => 100,
            SamplingInterval::Ms1000 => 1000,
        }
    }
}

impl TryFrom<u64> for SamplingInterval {
    type Error = TypesError;

    fn try_from(millis: u64) -> Result<Self, Self::Error> {
        match millis {
            100 => Ok(SamplingInterval::Ms100),
            1000 => Ok(SamplingInterval::Ms1000),
            other => Err(TypesError::InvalidSamplingInterval(other)),
        }
    }
}

impl From<SamplingInterval> for u64 {
    fn from(interval: SamplingInterval) -> Self {
        interval.as_millis()
    }
}
