#![warn(missing_docs)]
//! A Byzantine fault tolerant consensus engine for an Argus permissioned
//! chain. The algorithm is [Tendermint](https://arxiv.org/pdf/1807.04938):
//! for a fixed committee of validators at every height, a round-based voting
//! protocol decides exactly one block value per height, tolerating up to f
//! arbitrarily faulty validators out of 3f+1 total voting power.
//!
//! The engine is built from:
//! 1. A pure state machine that turns consensus messages and timeouts into
//!    results: broadcast a vote, arm a timer, or change round.
//! 2. A message cache that deduplicates signed wire messages, binds proposal
//!    values to their block bodies, and preserves equivocation evidence.
//! 3. A single-task driver that owns all consensus state, executes results,
//!    and talks to the node through the [`types::ConsensusContext`] and
//!    [`types::Gossip`] ports.
//!
//! Consensus is an active component, it doesn't follow the server/client
//! model: outbound messages are not responses to inbound ones, and the
//! engine generates and consumes its own events (timeouts, looped-back
//! broadcasts). Everything the process sends arrives back to it through the
//! normal inbound path, which keeps all state transitions driven by a single
//! ordered input stream.
//!
//! Nothing is persisted here. Durability is the block store's concern; a
//! restart begins a fresh height at the last committed height plus one.

#[allow(missing_docs)]
pub mod committee;
#[allow(missing_docs)]
pub mod types;
#[allow(missing_docs)]
pub mod wire;
pub use driver::{ConsensusDriver, ConsensusHandle};
pub mod oracle;

mod algorithm;
mod driver;
mod message_cache;
mod sync;
mod timeout;

#[cfg(test)]
pub(crate) mod test_utils;

#[cfg(test)]
#[path = "simulation_test.rs"]
mod simulation_test;
