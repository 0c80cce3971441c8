//! Wire framing for consensus messages.
//!
//! A message travels as a signed envelope ([`WireMessage`]) whose `payload`
//! is itself an encoded [`VotePayload`] or [`ProposePayload`]. Encoding is
//! SCALE, which is deterministic: equal messages produce equal bytes, so the
//! Keccak-256 digest of the envelope can index the message cache and a
//! cached envelope can be re-encoded verbatim for gossip and sync.

#[cfg(test)]
#[path = "wire_test.rs"]
mod wire_test;

use parity_scale_codec::{Decode, Encode};
use sha3::{Digest, Keccak256};

use crate::types::{Height, MessageError, MessageHash, Round, Step, ValidatorId, ValueId};

/// The signed envelope carried by the gossip layer.
///
/// `committed_seal` is only non-empty for Precommit messages, where it binds
/// the sender's signature to (value, round, height) so that a commit proof
/// can be assembled from the precommits alone.
#[derive(Debug, Clone, PartialEq, Eq, Encode, Decode)]
pub struct WireMessage {
    pub code: Step,
    pub payload: Vec<u8>,
    pub sender: ValidatorId,
    pub signature: Vec<u8>,
    pub committed_seal: Vec<u8>,
    /// Digest of the encoded envelope; computed on reception, not carried on
    /// the wire.
    #[codec(skip)]
    pub hash: MessageHash,
}

impl WireMessage {
    /// Decode an envelope and stamp it with the digest of the raw bytes.
    pub fn from_bytes(raw: &[u8]) -> Result<Self, MessageError> {
        let mut message = WireMessage::decode(&mut &raw[..])
            .map_err(|e| MessageError::Decode(e.to_string()))?;
        message.hash = payload_hash(raw);
        Ok(message)
    }

    /// The bytes covered by `signature`: everything except the signature and
    /// the seal.
    pub fn signing_payload(&self) -> Vec<u8> {
        (self.code, &self.payload, self.sender).encode()
    }
}

/// Payload of a Prevote or Precommit.
#[derive(Debug, Clone, PartialEq, Eq, Encode, Decode)]
pub struct VotePayload {
    #[codec(compact)]
    pub height: Height,
    pub round: Round,
    pub value: ValueId,
}

/// Payload of a Propose; carries the full block so validators can verify the
/// value they vote on.
#[derive(Debug, Clone, PartialEq, Eq, Encode, Decode)]
pub struct ProposePayload<B> {
    #[codec(compact)]
    pub height: Height,
    pub round: Round,
    pub value: ValueId,
    pub valid_round: Option<Round>,
    pub block: B,
}

/// Keccak-256 digest of a raw wire payload.
pub fn payload_hash(bytes: &[u8]) -> MessageHash {
    let mut hasher = Keccak256::new();
    hasher.update(bytes);
    MessageHash(hasher.finalize().into())
}

/// The bytes a committed seal signs over: the binding of a precommit to its
/// (value, round, height).
pub fn committed_seal_bytes(value: ValueId, round: Round, height: Height) -> Vec<u8> {
    (value, round, height).encode()
}
