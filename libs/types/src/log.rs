//! Operational log records
//!
//! Append-only. Persisted one at a time by the diagnostic logger, never
//! batched with trades.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::errors::TypesError;

/// Severity scale; the numeric codes are what the store persists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
#[repr(u8)]
pub enum LogLevel {
    NotSet = 0,
    Debug = 10,
    Info = 20,
    Warning = 30,
    Error = 40,
    Critical = 50,
}

impl LogLevel {
    pub fn code(self) -> u8 {
        self as u8
    }

    pub fn label(self) -> &'static str {
        match self {
            LogLevel::NotSet => "NOTSET",
            LogLevel::Debug => "DEBUG",
            LogLevel::Info => "INFO",
            LogLevel::Warning => "WARNING",
            LogLevel::Error => "ERROR",
            LogLevel::Critical => "CRITICAL",
        }
    }
}

impl TryFrom<u8> for LogLevel {
    type Error = TypesError;

    fn try_from(code: u8) -> Result<Self, TypesError> {
        match code {
            0 => Ok(LogLevel::NotSet),
            10 => Ok(LogLevel::Debug),
            20 => Ok(LogLevel::Info),
            30 => Ok(LogLevel::Warning),
            40 => Ok(LogLevel::Error),
            50 => Ok(LogLevel::Critical),
            other => Err(TypesError::InvalidLogLevel(other)),
        }
    }
}

impl From<LogLevel> for u8 {
    fn from(level: LogLevel) -> Self {
        level.code()
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// One persisted diagnostic event
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEvent {
    pub timestamp: DateTime<Utc>,
    pub message: String,
    pub level: LogLevel,
    /// Free-form context, e.g. the symbol or a raw feed payload; may be empty
    pub payload: String,
}

impl LogEvent {
    /// Stamp a new event with the current wall clock.
    pub fn new(message: impl Into<String>, level: LogLevel, payload: impl Into<String>) -> Self {
        Self::at(Utc::now(), message, level, payload)
    }

    pub fn at(
        timestamp: DateTime<Utc>,
        message: impl Into<String>,
        level: LogLevel,
        payload: impl Into<String>,
    ) -> Self {
        Self {
            timestamp,
            message: message.into(),
            level,
            payload: payload.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_levels_are_ordered() {
        assert!(LogLevel::NotSet < LogLevel::Debug);
        assert!(LogLevel::Warning < LogLevel::Error);
        assert!(LogLevel::Error < LogLevel::Critical);
    }

    #[test]
    fn test_level_codes_round_trip() {
        assert_eq!(LogLevel::Warning.code(), 30);
        assert_eq!(LogLevel::try_from(50), Ok(LogLevel::Critical));
        assert_eq!(LogLevel::try_from(15), Err(TypesError::InvalidLogLevel(15)));
    }

    #[test]
    fn test_log_event_serializes_level_as_code() {
        let event = LogEvent::new("Connecting to BTCUSDT stream", LogLevel::Info, "BTCUSDT");
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["level"], 20);
        assert_eq!(json["payload"], "BTCUSDT");
    }
}
