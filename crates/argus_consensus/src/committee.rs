//! The validator committee for a height and the proposer selection policy.

#[cfg(test)]
#[path = "committee_test.rs"]
mod committee_test;

use serde::{Deserialize, Serialize};

use crate::types::{Round, ValidatorId};

/// A committee member with its voting power. Power is always positive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitteeMember {
    pub id: ValidatorId,
    pub voting_power: u64,
}

/// The ordered set of validators deciding a single height.
///
/// Members are kept sorted by id so that every honest node derives the same
/// virtual proposer sequence from the same governance output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Committee {
    members: Vec<CommitteeMember>,
    total_power: u64,
}

impl Committee {
    /// Build a committee from governance output. Ordering of the input does
    /// not matter; members are sorted by id.
    ///
    /// Panics on an empty member set, a zero voting power, or a duplicate id:
    /// the governance contract guarantees none of these occur.
    pub fn new(members: impl IntoIterator<Item = CommitteeMember>) -> Self {
        let mut members: Vec<CommitteeMember> = members.into_iter().collect();
        assert!(!members.is_empty(), "committee must not be empty");
        members.sort_by_key(|m| m.id);
        let mut total_power: u64 = 0;
        for pair in members.windows(2) {
            assert!(pair[0].id != pair[1].id, "duplicate committee member {}", pair[0].id);
        }
        for member in &members {
            assert!(member.voting_power > 0, "zero voting power for {}", member.id);
            total_power = total_power
                .checked_add(member.voting_power)
                .expect("total voting power overflow");
        }
        Self { members, total_power }
    }

    pub fn members(&self) -> &[CommitteeMember] {
        &self.members
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn total_power(&self) -> u64 {
        self.total_power
    }

    /// The smallest voting power strictly greater than 2/3 of the total.
    pub fn quorum(&self) -> u64 {
        self.total_power * 2 / 3 + 1
    }

    /// The maximum faulty voting power the committee tolerates.
    pub fn f(&self) -> u64 {
        (self.total_power - 1) / 3
    }

    /// Whether `power` meets the 2/3 quorum threshold.
    pub fn is_quorum(&self, power: u64) -> bool {
        power.checked_mul(3).expect("voting power overflow")
            > self.total_power.checked_mul(2).expect("voting power overflow")
    }

    /// Whether `power` is enough evidence of a live later round (> f).
    pub fn is_round_skip(&self, power: u64) -> bool {
        power > self.f()
    }

    pub fn contains(&self, id: ValidatorId) -> bool {
        self.member(id).is_some()
    }

    pub fn member(&self, id: ValidatorId) -> Option<&CommitteeMember> {
        self.members.binary_search_by_key(&id, |m| m.id).ok().map(|i| &self.members[i])
    }

    pub fn power_of(&self, id: ValidatorId) -> Option<u64> {
        self.member(id).map(|m| m.voting_power)
    }

    /// Deterministic proposer selection: power-weighted round robin.
    ///
    /// Conceptually each member occupies `voting_power` contiguous slots, in
    /// committee order, of a virtual sequence of length `total_power`. The
    /// seed for a height is the slot following the previous block proposer's
    /// first slot (0 when no previous proposer is known, e.g. at genesis or
    /// after a committee rotation); round `r` picks the member at virtual
    /// slot `(seed + r) mod total_power`. The seed is index-derived, not
    /// address-derived; this is part of the chain's consensus rules.
    pub fn proposer(&self, round: Round, prev_proposer: Option<ValidatorId>) -> &CommitteeMember {
        let seed = match prev_proposer.and_then(|id| self.first_slot_of(id)) {
            Some(slot) => (slot + 1) % self.total_power,
            None => 0,
        };
        let slot = (seed + u64::from(round)) % self.total_power;
        self.member_at_slot(slot)
    }

    /// The first virtual slot occupied by `id`, if a member.
    fn first_slot_of(&self, id: ValidatorId) -> Option<u64> {
        let mut slot = 0;
        for member in &self.members {
            if member.id == id {
                return Some(slot);
            }
            slot += member.voting_power;
        }
        None
    }

    fn member_at_slot(&self, slot: u64) -> &CommitteeMember {
        debug_assert!(slot < self.total_power);
        let mut remaining = slot;
        for member in &self.members {
            if remaining < member.voting_power {
                return member;
            }
            remaining -= member.voting_power;
        }
        unreachable!("slot {slot} out of range for total power {}", self.total_power)
    }
}
