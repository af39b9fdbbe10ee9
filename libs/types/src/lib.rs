//! Types library for the market-state services
//!
//! Value types shared by every stage of the market-state pipeline: symbol
//! and event identifiers, fixed-point prices and sizes, the nanosecond
//! clock abstraction, and the validation error taxonomy used at the
//! ingestion boundary.
//!
//! # Modules
//! - `ids`: Identifiers (Symbol, EventId)
//! - `numeric`: Fixed-point decimal types (Price, Quantity)
//! - `time`: Unix-nanosecond clock (SystemClock, ManualClock)
//! - `errors`: Boundary validation errors

// Public modules
pub mod ids;
pub mod numeric;
pub mod time;
pub mod errors;

// Library version constant
pub const LIB_VERSION: &str = "1.0.0";

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::ids::*;
    pub use crate::numeric::*;
    pub use crate::time::*;
    pub use crate::errors::*;
}
