//! Configuration for the consensus engine: per-step timeouts, the sync loop
//! cadence, and the bounds the driver places on cached future messages.

#[cfg(test)]
#[path = "config_test.rs"]
mod config_test;

use std::time::Duration;

use serde::{Deserialize, Serialize};
use validator::Validate;

/// A single timeout definition with a base duration and a per-round delta.
///
/// The timeout for round `r` is `base + r * delta`, so later rounds wait
/// longer, which lets slow-but-honest proposers make progress eventually.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct Timeout {
    /// The timeout for round 0.
    base: Duration,
    /// The per-round delta added to the timeout.
    delta: Duration,
}

impl Timeout {
    pub fn new(base: Duration, delta: Duration) -> Self {
        Self { base, delta }
    }

    /// Compute the timeout for the given round: `base + round * delta`.
    pub fn get_timeout(&self, round: u32) -> Duration {
        self.base + round * self.delta
    }
}

/// Configuration for consensus timeouts, one per step.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct TimeoutsConfig {
    /// Propose timeout configuration.
    proposal: Timeout,
    /// Prevote timeout configuration.
    prevote: Timeout,
    /// Precommit timeout configuration.
    precommit: Timeout,
}

impl Default for TimeoutsConfig {
    fn default() -> Self {
        Self {
            proposal: Timeout {
                base: Duration::from_millis(3000),
                delta: Duration::from_millis(500),
            },
            prevote: Timeout {
                base: Duration::from_millis(1000),
                delta: Duration::from_millis(500),
            },
            precommit: Timeout {
                base: Duration::from_millis(1000),
                delta: Duration::from_millis(500),
            },
        }
    }
}

impl TimeoutsConfig {
    pub fn new(proposal: Timeout, prevote: Timeout, precommit: Timeout) -> Self {
        Self { proposal, prevote, precommit }
    }

    pub fn get_proposal_timeout(&self, round: u32) -> Duration {
        self.proposal.get_timeout(round)
    }

    pub fn get_prevote_timeout(&self, round: u32) -> Duration {
        self.prevote.get_timeout(round)
    }

    pub fn get_precommit_timeout(&self, round: u32) -> Duration {
        self.precommit.get_timeout(round)
    }
}

/// Configuration for the sync loop.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Validate)]
pub struct SyncConfig {
    /// The interval between sync requests while the height has not advanced.
    pub retry_interval: Duration,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self { retry_interval: Duration::from_secs(20) }
    }
}

/// Top level configuration for the consensus engine.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Validate)]
pub struct ConsensusConfig {
    /// Timeouts configuration for the three consensus steps.
    pub timeouts: TimeoutsConfig,
    /// Sync loop configuration.
    #[validate(nested)]
    pub sync: SyncConfig,
    /// The delay before starting consensus, allowing the network to connect to peers.
    pub startup_delay: Duration,
    /// How many heights ahead of the current one messages are still cached.
    pub future_height_limit: u64,
}

impl Default for ConsensusConfig {
    fn default() -> Self {
        Self {
            timeouts: TimeoutsConfig::default(),
            sync: SyncConfig::default(),
            startup_delay: Duration::from_secs(5),
            future_height_limit: 10,
        }
    }
}
