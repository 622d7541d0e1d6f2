//! Aggregate-trade archiver
//!
//! Streams venue aggregate trades for a universe of symbols, batches them
//! into bulk store writes, records diagnostics alongside, and replays the
//! archive as ordered streams.
//!
//! # Architecture
//!
//! ```text
//!  venue feeds (one per symbol)
//!        │
//!  ┌─────▼──────┐   ┌──────────────┐
//!  │ Connectors │──▶│  Dispatcher  │──┐ bulk insert
//!  └─────┬──────┘   └──────┬───────┘  │
//!        │                 │          ▼
//!  ┌─────▼─────────────────▼──┐   ┌────────┐   ┌──────────┐
//!  │    Diagnostic logger     │──▶│ store  │──▶│ Replayer │
//!  └──────────────────────────┘   └────────┘   └──────────┘
//! ```

pub mod config;
pub mod connector;
pub mod dispatcher;
pub mod feed;
pub mod logger;
pub mod replay;
pub mod transport;

pub const SERVICE_VERSION: &str = "0.1.0";
