//! TxnCoord Common Types
//!
//! This crate contains shared types used across the transaction coordinator,
//! including transaction and participant identifiers, commit timestamps,
//! deadlines, and the shared error type.

pub mod identifiers;
pub mod error;
pub mod time;

pub use identifiers::*;
pub use error::*;
pub use time::*;
