//! Persistence for the aggregate-trade archive
//!
//! A narrow store interface over two append-only tables (trades and
//! diagnostic logs), a ClickHouse implementation speaking the HTTP
//! interface, and an in-process implementation for tests.
//!
//! # Modules
//! - `store`: `TradeStore` trait, queries, errors
//! - `schema`: DDL and statement text
//! - `rows`: wire row encoding/decoding and streamed block re-chunking
//! - `clickhouse`: HTTP-backed store
//! - `memory`: in-process store with failure injection

pub mod clickhouse;
pub mod memory;
pub mod rows;
pub mod schema;
pub mod store;

pub use clickhouse::{ClickHouseConfig, ClickHouseStore};
pub use memory::MemoryStore;
pub use store::{StoreError, TradeBlock, TradeBlockStream, TradeQuery, TradeStore};
