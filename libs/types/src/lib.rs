//! Types library for the aggregate-trade archive
//!
//! Data contracts shared by the ingestion service and the store adapter.
//! No I/O and no behavior beyond validation.
//!
//! # Modules
//! - `asset`: Asset classes, their endpoints and symbol prefixes, sampling intervals
//! - `ids`: Trade and symbol identifiers
//! - `numeric`: Exact decimal price and size
//! - `trade`: Canonical trade record
//! - `log`: Diagnostic log record and severity scale
//! - `errors`: Error taxonomy

pub mod asset;
pub mod errors;
pub mod ids;
pub mod log;
pub mod numeric;
pub mod trade;

// Library version constant
pub const LIB_VERSION: &str = "1.0.0";

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::asset::*;
    pub use crate::errors::*;
    pub use crate::ids::*;
    pub use crate::log::*;
    pub use crate::numeric::*;
    pub use crate::trade::*;
}
