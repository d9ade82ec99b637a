//! TxnCoord Protocol Messages
//!
//! Commands the coordinator issues to transaction participants once a
//! commit decision has been fixed.

pub mod messages;

pub use messages::*;
