//! Configuration types for Argus consensus.
//!
//! This crate contains configuration structures used by the consensus engine,
//! including `ConsensusConfig`, `TimeoutsConfig` and `SyncConfig`.

pub mod config;

// Re-export the main types for convenience
pub use config::{ConsensusConfig, SyncConfig, Timeout, TimeoutsConfig};
