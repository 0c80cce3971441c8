use parity_scale_codec::Encode;

use crate::test_utils::{validator, value};
use crate::types::{MessageError, Step};
use crate::wire::{
    committed_seal_bytes,
    payload_hash,
    ProposePayload,
    VotePayload,
    WireMessage,
};

fn vote_wire(code: Step) -> WireMessage {
    let payload = VotePayload { height: 7, round: 2, value: value(0xaa) }.encode();
    WireMessage {
        code,
        payload,
        sender: validator(3),
        signature: vec![0x51; 4],
        committed_seal: Vec::new(),
        hash: Default::default(),
    }
}

#[test]
fn envelope_roundtrips_and_is_hash_stamped() {
    let wire = vote_wire(Step::Prevote);
    let raw = wire.encode();
    let decoded = WireMessage::from_bytes(&raw).unwrap();
    assert_eq!(decoded.code, Step::Prevote);
    assert_eq!(decoded.sender, validator(3));
    assert_eq!(decoded.hash, payload_hash(&raw));
    // Re-encoding a decoded envelope reproduces the original bytes, so a
    // cached message can be streamed to a syncing peer verbatim.
    assert_eq!(decoded.encode(), raw);
}

#[test]
fn message_codes_are_stable_on_the_wire() {
    assert_eq!(vote_wire(Step::Propose).encode()[0], 0xC0);
    assert_eq!(vote_wire(Step::Prevote).encode()[0], 0xC1);
    assert_eq!(vote_wire(Step::Precommit).encode()[0], 0xC2);
}

#[test]
fn propose_payload_carries_the_block() {
    let block: Vec<u8> = vec![1, 2, 3, 4];
    let payload = ProposePayload {
        height: 9,
        round: 1,
        value: value(0xbb),
        valid_round: Some(0),
        block: block.clone(),
    };
    let encoded = payload.encode();
    let decoded: ProposePayload<Vec<u8>> =
        parity_scale_codec::Decode::decode(&mut &encoded[..]).unwrap();
    assert_eq!(decoded.block, block);
    assert_eq!(decoded.valid_round, Some(0));
}

#[test]
fn garbage_does_not_decode() {
    assert!(matches!(
        WireMessage::from_bytes(&[0xff, 0x00, 0x01]),
        Err(MessageError::Decode(_))
    ));
}

#[test]
fn signature_is_not_covered_by_the_signing_payload() {
    let mut signed = vote_wire(Step::Prevote);
    let unsigned_payload = signed.signing_payload();
    signed.signature = vec![9; 65];
    assert_eq!(signed.signing_payload(), unsigned_payload);
}

#[test]
fn committed_seal_binds_value_round_and_height() {
    let seal = committed_seal_bytes(value(0xaa), 1, 5);
    assert_eq!(seal, committed_seal_bytes(value(0xaa), 1, 5));
    assert_ne!(seal, committed_seal_bytes(value(0xaa), 2, 5));
    assert_ne!(seal, committed_seal_bytes(value(0xaa), 1, 6));
    assert_ne!(seal, committed_seal_bytes(value(0xbb), 1, 5));
}

#[test]
fn distinct_payloads_hash_differently() {
    let first = vote_wire(Step::Prevote).encode();
    let second = vote_wire(Step::Precommit).encode();
    assert_ne!(payload_hash(&first), payload_hash(&second));
    assert_eq!(payload_hash(&first), payload_hash(&first));
}
