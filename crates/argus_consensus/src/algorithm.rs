//! The Tendermint state machine.
//!
//! LOC refers to the line of code from Algorithm 1 (page 6) of the tendermint
//! [paper](https://arxiv.org/pdf/1807.04938).
//!
//! The machine is pure: inputs are consensus messages and timeouts, outputs
//! are [`ConsensusResult`]s, and no I/O happens here. Each input produces at
//! most one result; our own broadcasts are looped back through the driver
//! inbox, so a cascade of rule firings plays out as a chain of inputs rather
//! than a batched reply. Rules fire at most once per (height, round), either
//! because the step they require is left behind or through an explicit
//! first-time guard.

#[cfg(test)]
#[path = "algorithm_test.rs"]
mod algorithm_test;

use std::collections::{BTreeMap, HashMap, HashSet};
use std::time::Duration;

use tracing::{debug, info, trace, warn};

use crate::oracle::Oracle;
use crate::types::{ConsensusMessage, Height, Round, Step, ValidatorId, ValueId};

/// A vote's value accompanied by the voter's power.
type WeightedVote = (ValueId, u64);

/// A map of votes, keyed by round and voter.
type VotesMap = HashMap<(Round, ValidatorId), WeightedVote>;

/// Request to arm a one-shot timer for the given step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Schedule {
    pub step: Step,
    pub height: Height,
    pub round: Round,
    pub delay: Duration,
}

/// Round (and possibly height) change instruction for the driver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct RoundChange {
    pub height: Height,
    pub round: Round,
    /// The decided proposal when the change crosses a height boundary.
    pub decision: Option<ConsensusMessage>,
}

/// The single side effect produced by one algorithm step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum ConsensusResult {
    /// Sign and send this message; it must arrive back through the inbox.
    Broadcast(ConsensusMessage),
    /// Arm a one-shot timer.
    Schedule(Schedule),
    /// Enter a new round, committing the decision first if one is carried.
    StartRound(RoundChange),
}

pub(crate) struct Algorithm {
    height: Height,
    round: Round,
    step: Step,
    /// First proposal accepted per round. Ordered so rule scans across
    /// rounds are deterministic.
    proposals: BTreeMap<Round, ConsensusMessage>,
    prevotes: VotesMap,
    precommits: VotesMap,
    locked: Option<(ValueId, Round)>,
    valid: Option<(ValueId, Round)>,
    decision: Option<ConsensusMessage>,
    // First-time guards, per round.
    prevote_quorum: HashSet<Round>,
    mixed_prevote_quorum: HashSet<Round>,
    mixed_precommit_quorum: HashSet<Round>,
}

impl Algorithm {
    pub(crate) fn new() -> Self {
        Self {
            height: 0,
            round: 0,
            step: Step::Propose,
            proposals: BTreeMap::new(),
            prevotes: HashMap::new(),
            precommits: HashMap::new(),
            locked: None,
            valid: None,
            decision: None,
            prevote_quorum: HashSet::new(),
            mixed_prevote_quorum: HashSet::new(),
            mixed_precommit_quorum: HashSet::new(),
        }
    }

    pub(crate) fn height(&self) -> Height {
        self.height
    }

    pub(crate) fn round(&self) -> Round {
        self.round
    }

    pub(crate) fn step(&self) -> Step {
        self.step
    }

    pub(crate) fn decision(&self) -> Option<&ConsensusMessage> {
        self.decision.as_ref()
    }

    /// Enter a round. On a height change all per-height state is reset
    /// first. `proposal_value` is the candidate this node would propose when
    /// it is the round's proposer and no valid value is held.
    ///
    /// LOC 11-21 in the paper.
    pub(crate) fn start_round<O: Oracle>(
        &mut self,
        height: Height,
        round: Round,
        proposal_value: Option<ValueId>,
        oracle: &O,
    ) -> Option<ConsensusResult> {
        if height != self.height {
            self.reset_for_height(height);
        }
        self.round = round;
        self.step = Step::Propose;
        if oracle.proposer(round) == oracle.self_id() {
            info!("START_ROUND_PROPOSER: Starting round {round} as Proposer");
            // LOC 15-16: propose the valid value if one is set, else our own
            // candidate.
            let (value, valid_round) = match self.valid {
                Some((value, valid_round)) => (value, Some(valid_round)),
                None => {
                    let value = proposal_value
                        .expect("proposer entered a round without a candidate value");
                    (value, None)
                }
            };
            let message = ConsensusMessage {
                kind: Step::Propose,
                height,
                round,
                sender: oracle.self_id(),
                value,
                valid_round,
            };
            return Some(ConsensusResult::Broadcast(message));
        }
        info!("START_ROUND_VALIDATOR: Starting round {round} as Validator");
        // Messages received through a round skip may already enable a rule
        // for this round; only arm the propose timeout when none fires.
        self.evaluate_rules(oracle).or_else(|| {
            Some(ConsensusResult::Schedule(Schedule {
                step: Step::Propose,
                height,
                round,
                delay: oracle.timeout_propose(round),
            }))
        })
    }

    /// Process one consensus message for the current height. The driver has
    /// already authenticated the sender, deduplicated the message, and for
    /// proposals checked that it came from the round's proposer.
    pub(crate) fn receive_message<O: Oracle>(
        &mut self,
        message: ConsensusMessage,
        oracle: &O,
    ) -> Option<ConsensusResult> {
        trace!("Processing {message}");
        if message.height != self.height {
            debug!("Ignoring {message}: current height is {}", self.height);
            return None;
        }
        if self.decision.is_some() {
            // Height already decided; the driver is about to move on.
            return None;
        }
        match message.kind {
            Step::Propose => {
                // A second proposal for the round is equivocation; the first
                // stays authoritative.
                if self.proposals.contains_key(&message.round) {
                    trace!("Ignoring proposal for round {}: already have one", message.round);
                    return None;
                }
                self.proposals.insert(message.round, message);
            }
            Step::Prevote | Step::Precommit => {
                let Some(power) = oracle.committee().power_of(message.sender) else {
                    debug!("Ignoring vote from non committee member {}", message.sender);
                    return None;
                };
                let votes = match message.kind {
                    Step::Prevote => &mut self.prevotes,
                    _ => &mut self.precommits,
                };
                let key = (message.round, message.sender);
                if votes.contains_key(&key) {
                    trace!("Ignoring repeated vote: {message}");
                    return None;
                }
                votes.insert(key, (message.value, power));
            }
        }
        self.evaluate_rules(oracle)
    }

    /// LOC 57 in the paper.
    pub(crate) fn on_timeout_propose<O: Oracle>(
        &mut self,
        height: Height,
        round: Round,
        oracle: &O,
    ) -> Option<ConsensusResult> {
        if height != self.height || round != self.round || self.step != Step::Propose {
            return None;
        }
        warn!("PROPOSAL_FAILED: no proposal arrived in time, prevoting nil for round={round}");
        self.advance_to_step(Step::Prevote);
        Some(ConsensusResult::Broadcast(self.own_vote(Step::Prevote, ValueId::NIL, oracle)))
    }

    /// LOC 61 in the paper.
    pub(crate) fn on_timeout_prevote<O: Oracle>(
        &mut self,
        height: Height,
        round: Round,
        oracle: &O,
    ) -> Option<ConsensusResult> {
        if height != self.height || round != self.round || self.step != Step::Prevote {
            return None;
        }
        debug!("Applying TimeoutPrevote for round={round}");
        self.advance_to_step(Step::Precommit);
        Some(ConsensusResult::Broadcast(self.own_vote(Step::Precommit, ValueId::NIL, oracle)))
    }

    /// LOC 65 in the paper.
    pub(crate) fn on_timeout_precommit(
        &mut self,
        height: Height,
        round: Round,
    ) -> Option<ConsensusResult> {
        if height != self.height || round != self.round {
            return None;
        }
        debug!("Applying TimeoutPrecommit for round={round}");
        Some(ConsensusResult::StartRound(RoundChange {
            height,
            round: round + 1,
            decision: None,
        }))
    }

    /// Evaluate every rule in order and return the first firing. Rules whose
    /// preconditions became true together re-fire on the next input; the
    /// loopback of our own broadcasts guarantees one arrives. Value-quorum
    /// rules are checked before mixed-quorum schedules so a precommit or a
    /// decision is never displaced by a timeout.
    fn evaluate_rules<O: Oracle>(&mut self, oracle: &O) -> Option<ConsensusResult> {
        self.upon_new_proposal(oracle)
            .or_else(|| self.upon_old_proposal(oracle))
            .or_else(|| self.upon_prevote_quorum(oracle))
            .or_else(|| self.upon_nil_prevote_quorum(oracle))
            .or_else(|| self.upon_decision(oracle))
            .or_else(|| self.upon_mixed_prevote_quorum(oracle))
            .or_else(|| self.upon_mixed_precommit_quorum(oracle))
            .or_else(|| self.upon_round_skip(oracle))
    }

    /// LOC 22 in the paper: fresh proposal for the current round.
    fn upon_new_proposal<O: Oracle>(&mut self, oracle: &O) -> Option<ConsensusResult> {
        if self.step != Step::Propose {
            return None;
        }
        let proposal = self.proposals.get(&self.round)?;
        if proposal.valid_round.is_some() {
            return None;
        }
        let value = proposal.value;
        let accept = oracle.valid_value(value)
            && self.locked.map_or(true, |(locked_value, _)| locked_value == value);
        let vote = if accept { value } else { ValueId::NIL };
        self.advance_to_step(Step::Prevote);
        Some(ConsensusResult::Broadcast(self.own_vote(Step::Prevote, vote, oracle)))
    }

    /// LOC 28 in the paper: proposal carried over from an earlier round,
    /// backed by a prevote quorum from that round.
    fn upon_old_proposal<O: Oracle>(&mut self, oracle: &O) -> Option<ConsensusResult> {
        if self.step != Step::Propose {
            return None;
        }
        let proposal = self.proposals.get(&self.round)?;
        let valid_round = proposal.valid_round?;
        if valid_round >= self.round {
            return None;
        }
        let value = proposal.value;
        if !oracle.committee().is_quorum(value_vote_power(&self.prevotes, valid_round, value)) {
            return None;
        }
        let accept = oracle.valid_value(value)
            && self
                .locked
                .map_or(true, |(locked_value, locked_round)| {
                    locked_round <= valid_round || locked_value == value
                });
        let vote = if accept { value } else { ValueId::NIL };
        self.advance_to_step(Step::Prevote);
        Some(ConsensusResult::Broadcast(self.own_vote(Step::Prevote, vote, oracle)))
    }

    /// LOC 36 in the paper: prevote quorum for the current round's proposal
    /// value. Always records the valid value; locks and precommits only when
    /// still in the prevote step.
    fn upon_prevote_quorum<O: Oracle>(&mut self, oracle: &O) -> Option<ConsensusResult> {
        if self.step == Step::Propose {
            return None;
        }
        let proposal = self.proposals.get(&self.round)?;
        let value = proposal.value;
        if value.is_nil() {
            return None;
        }
        if !oracle.committee().is_quorum(value_vote_power(&self.prevotes, self.round, value)) {
            return None;
        }
        // Getting the prevote quorum for the first time.
        if !self.prevote_quorum.insert(self.round) {
            return None;
        }
        self.valid = Some((value, self.round));
        if self.step != Step::Prevote {
            return None;
        }
        self.locked = Some((value, self.round));
        self.advance_to_step(Step::Precommit);
        Some(ConsensusResult::Broadcast(self.own_vote(Step::Precommit, value, oracle)))
    }

    /// LOC 44 in the paper: quorum of nil prevotes.
    fn upon_nil_prevote_quorum<O: Oracle>(&mut self, oracle: &O) -> Option<ConsensusResult> {
        if self.step != Step::Prevote {
            return None;
        }
        if !oracle
            .committee()
            .is_quorum(value_vote_power(&self.prevotes, self.round, ValueId::NIL))
        {
            return None;
        }
        self.advance_to_step(Step::Precommit);
        Some(ConsensusResult::Broadcast(self.own_vote(Step::Precommit, ValueId::NIL, oracle)))
    }

    /// LOC 49 in the paper: a precommit quorum for any round's proposal
    /// decides the height. The proposal itself must be present; a quorum of
    /// precommits alone never decides.
    fn upon_decision<O: Oracle>(&mut self, oracle: &O) -> Option<ConsensusResult> {
        let decided = self.proposals.iter().find_map(|(&round, proposal)| {
            let quorum = !proposal.value.is_nil()
                && oracle.committee().is_quorum(value_vote_power(
                    &self.precommits,
                    round,
                    proposal.value,
                ));
            quorum.then(|| proposal.clone())
        })?;
        info!(
            "DECISION_REACHED: height={} round={} value={}",
            self.height, decided.round, decided.value
        );
        self.decision = Some(decided.clone());
        Some(ConsensusResult::StartRound(RoundChange {
            height: self.height + 1,
            round: 0,
            decision: Some(decided),
        }))
    }

    /// LOC 34 in the paper: mixed prevote quorum arms the prevote timeout.
    fn upon_mixed_prevote_quorum<O: Oracle>(&mut self, oracle: &O) -> Option<ConsensusResult> {
        if self.step != Step::Prevote {
            return None;
        }
        if !oracle.committee().is_quorum(round_vote_power(&self.prevotes, self.round)) {
            return None;
        }
        // Getting a mixed prevote quorum for the first time.
        if !self.mixed_prevote_quorum.insert(self.round) {
            return None;
        }
        Some(ConsensusResult::Schedule(Schedule {
            step: Step::Prevote,
            height: self.height,
            round: self.round,
            delay: oracle.timeout_prevote(self.round),
        }))
    }

    /// LOC 47 in the paper: mixed precommit quorum arms the precommit
    /// timeout, whatever the step.
    fn upon_mixed_precommit_quorum<O: Oracle>(&mut self, oracle: &O) -> Option<ConsensusResult> {
        if !oracle.committee().is_quorum(round_vote_power(&self.precommits, self.round)) {
            return None;
        }
        // Getting a mixed precommit quorum for the first time.
        if !self.mixed_precommit_quorum.insert(self.round) {
            return None;
        }
        Some(ConsensusResult::Schedule(Schedule {
            step: Step::Precommit,
            height: self.height,
            round: self.round,
            delay: oracle.timeout_precommit(self.round),
        }))
    }

    /// LOC 55 in the paper: f+1 voting power heard from a later round means
    /// the network moved on; jump to the earliest such round.
    fn upon_round_skip<O: Oracle>(&mut self, oracle: &O) -> Option<ConsensusResult> {
        let mut senders_by_round: BTreeMap<Round, HashSet<ValidatorId>> = BTreeMap::new();
        for &(round, voter) in self.prevotes.keys().chain(self.precommits.keys()) {
            if round > self.round {
                senders_by_round.entry(round).or_default().insert(voter);
            }
        }
        for (&round, proposal) in &self.proposals {
            if round > self.round {
                senders_by_round.entry(round).or_default().insert(proposal.sender);
            }
        }
        for (round, senders) in senders_by_round {
            let power: u64 =
                senders.iter().filter_map(|id| oracle.committee().power_of(*id)).sum();
            if oracle.committee().is_round_skip(power) {
                debug!("Skipping from round {} to round {round}", self.round);
                return Some(ConsensusResult::StartRound(RoundChange {
                    height: self.height,
                    round,
                    decision: None,
                }));
            }
        }
        None
    }

    fn advance_to_step(&mut self, step: Step) {
        debug_assert_ne!(step, Step::Propose, "advancing to Propose is done by advancing rounds");
        info!("Advancing step: from {} to {step} in round={}", self.step, self.round);
        self.step = step;
    }

    fn own_vote<O: Oracle>(&self, kind: Step, value: ValueId, oracle: &O) -> ConsensusMessage {
        ConsensusMessage {
            kind,
            height: self.height,
            round: self.round,
            sender: oracle.self_id(),
            value,
            valid_round: None,
        }
    }

    fn reset_for_height(&mut self, height: Height) {
        self.height = height;
        self.round = 0;
        self.step = Step::Propose;
        self.proposals.clear();
        self.prevotes.clear();
        self.precommits.clear();
        self.locked = None;
        self.valid = None;
        self.decision = None;
        self.prevote_quorum.clear();
        self.mixed_prevote_quorum.clear();
        self.mixed_precommit_quorum.clear();
    }
}

fn value_vote_power(votes: &VotesMap, round: Round, value: ValueId) -> u64 {
    votes
        .iter()
        .filter_map(|(&(r, _), &(v, power))| (r == round && v == value).then_some(power))
        .sum()
}

fn round_vote_power(votes: &VotesMap, round: Round) -> u64 {
    votes.iter().filter_map(|(&(r, _), &(_, power))| (r == round).then_some(power)).sum()
}
