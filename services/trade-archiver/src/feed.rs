//! Venue aggregate-trade feed: endpoints and raw message schema

use std::collections::BTreeMap;

use serde::Deserialize;
use thiserror::Error;
use types::asset::AssetClass;
use types::errors::TypesError;
use types::ids::{SymbolId, TradeId};
use types::numeric::{Price, Quantity};
use types::trade::{TakerSide, TradeEvent};

/// Event type carried in the `e` field of every aggregate-trade message.
pub const AGG_TRADE_EVENT: &str = "aggTrade";

#[derive(Error, Debug)]
pub enum FeedError {
    #[error("Malformed feed message: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("Unexpected event type {0:?}")]
    UnexpectedEvent(String),

    #[error("Invalid field in feed message: {0}")]
    InvalidField(#[from] TypesError),
}

/// Raw aggregate-trade message as pushed by the venue.
///
/// Single-letter field names are the venue's; unknown fields are ignored.
#[derive(Debug, Clone, Deserialize)]
pub struct AggTradeMessage {
    #[serde(rename = "e")]
    pub event_type: String,
    #[serde(rename = "E")]
    pub event_time: u64,
    #[serde(rename = "s")]
    pub symbol: String,
    #[serde(rename = "a")]
    pub agg_trade_id: u64,
    #[serde(rename = "p")]
    pub price: String,
    #[serde(rename = "q")]
    pub quantity: String,
    #[serde(rename = "f")]
    pub first_trade_id: u64,
    #[serde(rename = "l")]
    pub last_trade_id: u64,
    #[serde(rename = "T")]
    pub trade_time: u64,
    #[serde(rename = "m")]
    pub buyer_is_maker: bool,
}

impl AggTradeMessage {
    pub fn parse(text: &str) -> Result<Self, FeedError> {
        let message: AggTradeMessage = serde_json::from_str(text)?;
        if message.event_type != AGG_TRADE_EVENT {
            return Err(FeedError::UnexpectedEvent(message.event_type));
        }
        Ok(message)
    }

    /// Map onto the canonical record for `symbol_id`.
    ///
    /// The exchange timestamp is the event time `E`; the venue's symbol field
    /// is not trusted over the subscription's own symbol.
    pub fn into_trade_event(
        self,
        symbol_id: SymbolId,
        ingest_timestamp: u64,
    ) -> Result<TradeEvent, FeedError> {
        let price: Price = self.price.parse()?;
        let size: Quantity = self.quantity.parse()?;

        Ok(TradeEvent::new(
            self.event_time,
            ingest_timestamp,
            symbol_id,
            TradeId::new(self.agg_trade_id),
            price,
            size,
            TakerSide::from_buyer_is_maker(self.buyer_is_maker),
        ))
    }
}

/// Local wall clock in epoch milliseconds.
pub fn wall_clock_millis() -> u64 {
    u64::try_from(chrono::Utc::now().timestamp_millis()).unwrap_or(0)
}

/// Base stream endpoint per asset class, defaulting to the venue's own.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FeedEndpoints {
    overrides: BTreeMap<AssetClass, String>,
}

impl FeedEndpoints {
    pub fn with_override(mut self, class: AssetClass, base: impl Into<String>) -> Self {
        self.overrides.insert(class, base.into());
        self
    }

    pub fn base(&self, class: AssetClass) -> &str {
        self.overrides
            .get(&class)
            .map(String::as_str)
            .unwrap_or_else(|| class.default_stream_endpoint())
    }

    /// `{base}/{market lowercased}@aggTrade`; the class prefix never appears.
    pub fn subscription_url(&self, symbol: &SymbolId) -> String {
        format!(
            "{}/{}",
            self.base(symbol.asset_class()).trim_end_matches('/'),
            symbol.stream_name()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const SAMPLE: &str = r#"{"e":"aggTrade","E":1672515782136,"s":"BNBBTC","a":26129,"p":"0.01633102","q":"4.70443515","f":27781,"l":27781,"T":1672515782136,"m":true,"M":true}"#;

    #[test]
    fn test_parse_sample_message() {
        let message = AggTradeMessage::parse(SAMPLE).unwrap();
        assert_eq!(message.event_time, 1672515782136);
        assert_eq!(message.symbol, "BNBBTC");
        assert_eq!(message.agg_trade_id, 26129);
        assert!(message.buyer_is_maker);

        let event = message
            .into_trade_event(SymbolId::parse("BNBBTC").unwrap(), 1672515782200)
            .unwrap();
        assert_eq!(event.exchange_timestamp(), 1672515782136);
        assert_eq!(event.ingest_timestamp(), 1672515782200);
        assert_eq!(event.trade_id(), TradeId::new(26129));
        assert_eq!(event.price().to_string(), "0.01633102");
        assert_eq!(event.size().to_string(), "4.70443515");
        assert_eq!(event.taker_side(), TakerSide::Sell);
    }

    #[test]
    fn test_missing_field_is_malformed() {
        let text = r#"{"e":"aggTrade","E":1,"s":"BTCUSDT","a":1,"p":"1","q":"1","f":1,"l":1,"T":1}"#;
        assert!(matches!(
            AggTradeMessage::parse(text),
            Err(FeedError::Malformed(_))
        ));
        assert!(matches!(
            AggTradeMessage::parse("not json"),
            Err(FeedError::Malformed(_))
        ));
    }

    #[test]
    fn test_wrong_event_type_rejected() {
        let text = SAMPLE.replace("\"aggTrade\"", "\"trade\"");
        assert!(matches!(
            AggTradeMessage::parse(&text),
            Err(FeedError::UnexpectedEvent(e)) if e == "trade"
        ));
    }

    #[test]
    fn test_bad_price_is_invalid_field() {
        let message = AggTradeMessage::parse(&SAMPLE.replace("0.01633102", "-1")).unwrap();
        assert!(matches!(
            message.into_trade_event(SymbolId::parse("BNBBTC").unwrap(), 0),
            Err(FeedError::InvalidField(_))
        ));
    }

    #[test]
    fn test_subscription_urls() {
        let endpoints = FeedEndpoints::default();
        assert_eq!(
            endpoints.subscription_url(&SymbolId::parse("BTCUSDT").unwrap()),
            "wss://stream.binance.com:9443/ws/btcusdt@aggTrade"
        );
        assert_eq!(
            endpoints.subscription_url(&SymbolId::parse("USD_F_ETHUSDT").unwrap()),
            "wss://fstream.binance.com/ws/ethusdt@aggTrade"
        );
        assert_eq!(
            endpoints.subscription_url(&SymbolId::parse("COIN_F_BTCUSD_PERP").unwrap()),
            "wss://dstream.binance.com/ws/btcusd_perp@aggTrade"
        );
    }

    #[test]
    fn test_endpoint_override() {
        let endpoints =
            FeedEndpoints::default().with_override(AssetClass::Spot, "ws://127.0.0.1:9001/ws/");
        assert_eq!(
            endpoints.subscription_url(&SymbolId::parse("btcusdt").unwrap()),
            "ws://127.0.0.1:9001/ws/btcusdt@aggTrade"
        );
        assert_eq!(
            endpoints.base(AssetClass::UsdMarginedFutures),
            "wss://fstream.binance.com/ws"
        );
    }

    proptest! {
        #[test]
        fn prop_taker_side_follows_maker_flag(maker in any::<bool>(), id in 0u64..1_000_000) {
            let text = format!(
                r#"{{"e":"aggTrade","E":1,"s":"BTCUSDT","a":{id},"p":"1.5","q":"2","f":1,"l":1,"T":1,"m":{maker}}}"#
            );
            let event = AggTradeMessage::parse(&text)
                .unwrap()
                .into_trade_event(SymbolId::parse("BTCUSDT").unwrap(), 2)
                .unwrap();
            let expected = if maker { TakerSide::Sell } else { TakerSide::Buy };
            prop_assert_eq!(event.taker_side(), expected);
        }
    }
}
