use test_case::test_case;

use crate::committee::{Committee, CommitteeMember};
use crate::test_utils::{equal_committee, validator};

fn weighted_committee(powers: &[(u8, u64)]) -> Committee {
    Committee::new(
        powers.iter().map(|&(n, voting_power)| CommitteeMember { id: validator(n), voting_power }),
    )
}

#[test_case(1 ; "single validator")]
#[test_case(2 ; "two validators")]
#[test_case(4 ; "four validators")]
#[test_case(7 ; "seven validators")]
#[test_case(10 ; "ten validators")]
fn quorum_arithmetic(n: u64) {
    let ids: Vec<_> = (0..n).map(|i| validator(u8::try_from(i).unwrap())).collect();
    let committee = equal_committee(&ids);
    let total = committee.total_power();
    assert_eq!(total, n);
    // Quorum is the smallest power strictly greater than 2/3 of the total.
    assert!(committee.quorum() * 3 > total * 2);
    assert!((committee.quorum() - 1) * 3 <= total * 2);
    assert_eq!(committee.f(), (total - 1) / 3);
    assert!(committee.is_quorum(committee.quorum()));
    assert!(!committee.is_quorum(committee.quorum() - 1));
    assert!(committee.is_round_skip(committee.f() + 1));
    assert!(!committee.is_round_skip(committee.f()));
}

#[test]
fn known_quorums() {
    assert_eq!(equal_committee(&[validator(1), validator(2)]).quorum(), 2);
    let four: Vec<_> = (1..=4).map(validator).collect();
    assert_eq!(equal_committee(&four).quorum(), 3);
    let seven: Vec<_> = (1..=7).map(validator).collect();
    let seven = equal_committee(&seven);
    assert_eq!(seven.quorum(), 5);
    assert_eq!(seven.f(), 2);
}

#[test]
fn members_are_ordered_by_id() {
    let committee = weighted_committee(&[(3, 1), (1, 2), (2, 5)]);
    let ids: Vec<_> = committee.members().iter().map(|m| m.id).collect();
    assert_eq!(ids, vec![validator(1), validator(2), validator(3)]);
    assert_eq!(committee.total_power(), 8);
    assert_eq!(committee.power_of(validator(2)), Some(5));
    assert!(committee.contains(validator(3)));
    assert!(!committee.contains(validator(4)));
}

#[test]
fn round_robin_is_fair_with_equal_power() {
    let ids: Vec<_> = (1..=4).map(validator).collect();
    let committee = equal_committee(&ids);
    // Over committee_size consecutive rounds every validator proposes once.
    let proposers: Vec<_> = (0..4).map(|r| committee.proposer(r, None).id).collect();
    for id in &ids {
        assert_eq!(proposers.iter().filter(|p| *p == id).count(), 1);
    }
    // The same holds when seeded by a previous proposer, shifted by one.
    let seeded: Vec<_> = (0..4).map(|r| committee.proposer(r, Some(validator(2))).id).collect();
    assert_eq!(seeded[0], validator(3));
    for id in &ids {
        assert_eq!(seeded.iter().filter(|p| *p == id).count(), 1);
    }
}

#[test]
fn proposer_weight_gives_proportional_slots() {
    // validator 1 holds slots 0..3, validator 2 holds slot 3.
    let committee = weighted_committee(&[(1, 3), (2, 1)]);
    assert_eq!(committee.proposer(0, None).id, validator(1));
    assert_eq!(committee.proposer(1, None).id, validator(1));
    assert_eq!(committee.proposer(2, None).id, validator(1));
    assert_eq!(committee.proposer(3, None).id, validator(2));
    assert_eq!(committee.proposer(4, None).id, validator(1));
}

#[test]
fn proposer_seed_is_index_derived() {
    let committee = weighted_committee(&[(1, 3), (2, 1)]);
    // Previous proposer was validator 1 (first slot 0), so the seed is 1.
    assert_eq!(committee.proposer(0, Some(validator(1))).id, validator(1));
    assert_eq!(committee.proposer(2, Some(validator(1))).id, validator(2));
    // Previous proposer was validator 2 (first slot 3); seed wraps to 0.
    assert_eq!(committee.proposer(0, Some(validator(2))).id, validator(1));
    // An unknown previous proposer falls back to seed 0.
    assert_eq!(committee.proposer(0, Some(validator(9))).id, validator(1));
}

#[test]
fn proposer_is_deterministic() {
    let ids: Vec<_> = (1..=7).map(validator).collect();
    let committee = equal_committee(&ids);
    let replay = equal_committee(&ids);
    for round in 0..20 {
        assert_eq!(
            committee.proposer(round, Some(validator(3))).id,
            replay.proposer(round, Some(validator(3))).id
        );
    }
}
