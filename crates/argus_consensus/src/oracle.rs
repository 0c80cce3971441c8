//! Read-only view of the node consumed by the algorithm.

use std::time::Duration;

use crate::committee::Committee;
use crate::types::{Height, Round, ValidatorId, ValueId};

/// The algorithm's only window onto the rest of the system. Keeping this
/// surface read-only is what makes the algorithm deterministic under replay:
/// feeding the same ordered inputs against the same oracle yields the same
/// results.
pub trait Oracle {
    /// This node's validator address.
    fn self_id(&self) -> ValidatorId;

    /// The height currently being decided.
    fn height(&self) -> Height;

    /// The committee for the current height.
    fn committee(&self) -> &Committee;

    /// The quorum voting power for the current height.
    fn quorum(&self) -> u64 {
        self.committee().quorum()
    }

    /// The tolerated faulty voting power for the current height.
    fn f(&self) -> u64 {
        self.committee().f()
    }

    /// The proposer for the given round of the current height.
    fn proposer(&self, round: Round) -> ValidatorId;

    /// Whether the block behind `value` passed verification. Nil never does.
    fn valid_value(&self, value: ValueId) -> bool;

    /// How long to wait for a proposal in the given round.
    fn timeout_propose(&self, round: Round) -> Duration;
    /// How long to wait after a mixed prevote quorum in the given round.
    fn timeout_prevote(&self, round: Round) -> Duration;
    /// How long to wait after a mixed precommit quorum in the given round.
    fn timeout_precommit(&self, round: Round) -> Duration;
}
