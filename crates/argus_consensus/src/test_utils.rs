use std::collections::HashSet;
use std::time::Duration;

use crate::committee::{Committee, CommitteeMember};
use crate::oracle::Oracle;
use crate::types::{ConsensusMessage, Height, Round, Step, ValidatorId, ValueId};

pub(crate) fn validator(n: u8) -> ValidatorId {
    ValidatorId::new([n; 20])
}

pub(crate) fn value(n: u8) -> ValueId {
    ValueId::new([n; 32])
}

/// A committee where every validator has power 1.
pub(crate) fn equal_committee(ids: &[ValidatorId]) -> Committee {
    Committee::new(ids.iter().map(|&id| CommitteeMember { id, voting_power: 1 }))
}

/// Fixed oracle for driving the algorithm directly in tests. Proposer
/// selection follows the committee's own policy with no previous proposer,
/// and every non-nil value is valid unless explicitly marked otherwise.
pub(crate) struct StaticOracle {
    pub self_id: ValidatorId,
    pub height: Height,
    pub committee: Committee,
    pub prev_proposer: Option<ValidatorId>,
    pub invalid_values: HashSet<ValueId>,
}

impl StaticOracle {
    pub(crate) fn new(self_id: ValidatorId, committee: Committee) -> Self {
        Self { self_id, height: 1, committee, prev_proposer: None, invalid_values: HashSet::new() }
    }
}

impl Oracle for StaticOracle {
    fn self_id(&self) -> ValidatorId {
        self.self_id
    }

    fn height(&self) -> Height {
        self.height
    }

    fn committee(&self) -> &Committee {
        &self.committee
    }

    fn proposer(&self, round: Round) -> ValidatorId {
        self.committee.proposer(round, self.prev_proposer).id
    }

    fn valid_value(&self, value: ValueId) -> bool {
        !value.is_nil() && !self.invalid_values.contains(&value)
    }

    fn timeout_propose(&self, round: Round) -> Duration {
        Duration::from_millis(1000 + 100 * u64::from(round))
    }

    fn timeout_prevote(&self, round: Round) -> Duration {
        Duration::from_millis(100 + 100 * u64::from(round))
    }

    fn timeout_precommit(&self, round: Round) -> Duration {
        Duration::from_millis(100 + 100 * u64::from(round))
    }
}

pub(crate) fn proposal(
    height: Height,
    round: Round,
    sender: ValidatorId,
    value: ValueId,
    valid_round: Option<Round>,
) -> ConsensusMessage {
    ConsensusMessage { kind: Step::Propose, height, round, sender, value, valid_round }
}

pub(crate) fn prevote(
    height: Height,
    round: Round,
    sender: ValidatorId,
    value: ValueId,
) -> ConsensusMessage {
    ConsensusMessage { kind: Step::Prevote, height, round, sender, value, valid_round: None }
}

pub(crate) fn precommit(
    height: Height,
    round: Round,
    sender: ValidatorId,
    value: ValueId,
) -> ConsensusMessage {
    ConsensusMessage { kind: Step::Precommit, height, round, sender, value, valid_round: None }
}
