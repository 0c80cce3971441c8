//! Types for interfacing between consensus and the node.
use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use parity_scale_codec::{Decode, Encode};
use serde::{Deserialize, Serialize};

use crate::committee::Committee;

/// Attempt number within a height; increments on timeout or failed quorum.
pub type Round = u32;

/// Monotonic block number being decided.
pub type Height = u64;

/// The address of a validator, as registered with the governance contract.
///
/// We must be able to derive the public key associated with this address for
/// the sake of validating signatures; see [`ConsensusContext::recover`].
#[derive(
    Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Encode,
    Decode,
)]
pub struct ValidatorId([u8; 20]);

impl ValidatorId {
    pub const fn new(bytes: [u8; 20]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }
}

impl fmt::Display for ValidatorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl fmt::Debug for ValidatorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

/// The 32-byte content hash of a block. The algorithm only ever manipulates
/// value ids; full blocks are materialized through the message cache.
#[derive(
    Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Encode,
    Decode,
)]
pub struct ValueId([u8; 32]);

impl ValueId {
    /// The `nil` value votes carry when voting against the round's proposal.
    pub const NIL: ValueId = ValueId([0u8; 32]);

    pub const fn new(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn is_nil(&self) -> bool {
        *self == Self::NIL
    }
}

impl fmt::Display for ValueId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl fmt::Debug for ValueId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

/// Keccak-256 digest of a wire payload, used to index the message cache.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash, Encode, Decode)]
pub struct MessageHash(pub [u8; 32]);

impl fmt::Display for MessageHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl fmt::Debug for MessageHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

/// Position within a round. Doubles as the message kind on the wire, using the
/// codes peers agree on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Encode, Decode)]
pub enum Step {
    #[codec(index = 0xC0)]
    Propose,
    #[codec(index = 0xC1)]
    Prevote,
    #[codec(index = 0xC2)]
    Precommit,
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Step::Propose => write!(f, "Propose"),
            Step::Prevote => write!(f, "Prevote"),
            Step::Precommit => write!(f, "Precommit"),
        }
    }
}

/// A single decoded consensus message, as consumed by the algorithm.
///
/// The sender is authenticated by the driver against the wire envelope's
/// signature before the message is built, so the algorithm can attribute
/// votes without touching crypto.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsensusMessage {
    pub kind: Step,
    pub height: Height,
    pub round: Round,
    pub sender: ValidatorId,
    /// The value voted for; [`ValueId::NIL`] for nil votes.
    pub value: ValueId,
    /// Propose only: the round the proposer claims the value gathered a
    /// prevote quorum in. `None` for fresh proposals.
    pub valid_round: Option<Round>,
}

impl fmt::Display for ConsensusMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} h={} r={} from={} value={}",
            self.kind, self.height, self.round, self.sender, self.value
        )
    }
}

/// A timeout that fired, posted back into the driver inbox by the scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeoutEvent {
    pub step: Step,
    pub height: Height,
    pub round: Round,
}

/// Events consumed by the driver, drained from a single inbox in arrival
/// order. This is the only path by which consensus state may change.
#[derive(Debug)]
pub enum ConsensusEvent {
    /// A raw signed payload received from a peer.
    Message { payload: Vec<u8> },
    /// A message we broadcast ourselves, looped back so that it flows through
    /// the same algorithm path as peer messages.
    SelfMessage(ConsensusMessage),
    /// A scheduled timeout fired.
    Timeout(TimeoutEvent),
    /// The block store committed a block through another path (e.g. sync
    /// import); the driver re-reads the last committed height.
    Commit,
    /// A peer asked for the messages we hold at our current height.
    SyncRequest { peer: ValidatorId },
    /// A cached proposal whose header was in the near future is due for
    /// another verification pass.
    Revalidate { hash: MessageHash },
}

/// Transient, per-message errors. The driver logs these and drops the
/// offending message; they never propagate.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum MessageError {
    #[error("failed to decode payload: {0}")]
    Decode(String),
    #[error("message from non committee member {0}")]
    UnknownSender(ValidatorId),
    #[error("signature does not recover to sender {0}")]
    BadSignature(ValidatorId),
    #[error("committed seal does not bind sender to (value, round, height)")]
    SealMismatch,
    #[error("message already cached")]
    Duplicate,
    #[error("conflicting message from {0} at height {1} round {2}")]
    Equivocation(ValidatorId, Height, Round),
    #[error("proposal from non-proposer {0}")]
    NotFromProposer(ValidatorId),
    #[error("proposal block is in the near future, retry after {0:?}")]
    FutureBlock(Duration),
    #[error("proposal block failed verification: {0}")]
    InvalidBlock(String),
    #[error("message for height {0} is too far ahead of {1}")]
    FutureHeight(Height, Height),
    #[error("message for past height {0} while at {1}")]
    PastHeight(Height, Height),
}

/// Errors that abort consensus. An error of this kind implies consensus
/// cannot continue, not just that the current height failed.
#[derive(thiserror::Error, Debug)]
pub enum ConsensusError {
    #[error("failed to commit decided block: {0}")]
    CommitFailed(String),
    #[error("internal inconsistency: {0}")]
    InternalInconsistency(String),
    #[error("driver inbox closed")]
    InboxClosed,
}

/// Interface for consensus to call out to the node: block store, crypto and
/// committee source. Signing and recovery are pure with respect to chain
/// state so the driver may apply them to messages of any height.
#[async_trait]
pub trait ConsensusContext: Send {
    /// The full block type the chain decides on. The algorithm only ever sees
    /// the block's [`ValueId`].
    type Block: Clone + fmt::Debug + Encode + Decode + Send + Sync + 'static;

    /// Content hash of a block: the identifier consensus decides on.
    fn value_id(&self, block: &Self::Block) -> ValueId;

    /// The most recently committed block and its height.
    async fn last_committed(&mut self) -> (Self::Block, Height);

    /// Commit a decided block to the block store. Failure is fatal: the
    /// decision is irrevocable and the store refusing it is an external
    /// invariant violation.
    async fn commit(&mut self, block: Self::Block) -> Result<(), ConsensusError>;

    /// Full verification of a proposal block under block store rules.
    async fn verify_proposal(&mut self, block: &Self::Block) -> Result<(), MessageError>;

    /// Header-only verification. [`MessageError::FutureBlock`] carries the
    /// hint for how long to wait before handling the proposal again.
    fn verify_proposal_header(&self, block: &Self::Block) -> Result<(), MessageError>;

    /// The ordered committee (with voting powers) deciding the height that
    /// follows `block`.
    fn committee_for(&self, block: &Self::Block) -> Committee;

    /// The validator that proposed `block`, seeding proposer selection for
    /// the next height. `None` for the genesis block.
    fn proposer_of(&self, block: &Self::Block) -> Option<ValidatorId>;

    /// Sign a payload with this node's validator key.
    fn sign(&self, payload: &[u8]) -> Vec<u8>;

    /// Recover the signer of `payload` from `signature`.
    fn recover(&self, payload: &[u8], signature: &[u8]) -> Result<ValidatorId, MessageError>;

    /// Check that `seal` is `sender`'s signature over the commit binding of
    /// (value, round, height).
    fn verify_committed_seal(
        &self,
        sender: ValidatorId,
        seal: &[u8],
        value: ValueId,
        round: Round,
        height: Height,
    ) -> Result<(), MessageError>;
}

/// The gossip layer. Sends are fire-and-forget: failures are swallowed and
/// peers recover through the sync loop.
#[async_trait]
pub trait Gossip: Send + Sync {
    /// Broadcast a payload to the whole network.
    async fn broadcast(&self, payload: Vec<u8>);

    /// Forward a received payload to the committee.
    async fn gossip(&self, committee: &Committee, payload: Vec<u8>);

    /// Ask peers to resend consensus messages, given our last known height.
    async fn ask_sync(&self, height: Height);

    /// Stream cached payloads to a peer that requested sync.
    async fn sync_peer(&self, peer: ValidatorId, payloads: Vec<Vec<u8>>);
}
