//! TxnCoord Participant Library
//!
//! The coordinator talks to participant shards only through the
//! [`ParticipantClient`] trait defined here. The crate also ships a fully
//! in-memory [`SimulatedParticipantClient`] with scripted responses and
//! fault injection for tests and the simulator.

pub mod client;
pub mod config;
pub mod simulated;

pub use client::{CommandOutcome, ParticipantClient, TimeoutClient};
pub use config::ClientConfig;
pub use simulated::{Fault, SentCommand, SimulatedParticipantClient};
