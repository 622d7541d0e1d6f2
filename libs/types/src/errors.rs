//! Error types for the record model
//!
//! Every constructor that accepts feed or store text returns one of these
//! instead of panicking, so callers decide whether bad input is fatal.

use thiserror::Error;

/// Validation errors raised while building canonical records
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TypesError {
    #[error("Invalid symbol: {symbol:?} ({reason})")]
    InvalidSymbol { symbol: String, reason: &'static str },

    #[error("Invalid decimal {value:?} for {field}")]
    InvalidDecimal { field: &'static str, value: String },

    #[error("Invalid taker side: {0:?}")]
    InvalidTakerSide(String),

    #[error("Invalid sampling interval {0}ms: must be 100 or 1000")]
    InvalidSamplingInterval(u64),

    #[error("Invalid log level code: {0}")]
    InvalidLogLevel(u8),
}
