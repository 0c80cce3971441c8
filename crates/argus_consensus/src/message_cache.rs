//! Cache correlating wire messages, their decoded consensus form, and the
//! proposal values they reference.
//!
//! The cache is the dedup point of the whole engine: a payload whose hash is
//! already present never reaches the algorithm again, and a second message
//! from the same (sender, height, round, step) slot with a different hash is
//! equivocation: it is retained as evidence but signalled so the algorithm
//! only ever counts the first.
//!
//! The cache is owned by the driver and touched by no other task, so it needs
//! no internal locking.

#[cfg(test)]
#[path = "message_cache_test.rs"]
mod message_cache_test;

use std::collections::{BTreeMap, HashMap, HashSet};

use tracing::debug;

use crate::types::{
    ConsensusMessage,
    Height,
    MessageError,
    MessageHash,
    Round,
    Step,
    ValidatorId,
    ValueId,
};
use crate::wire::WireMessage;

/// One slot per (sender, height, round, step); a second distinct message in
/// the same slot is equivocation.
type MessageKey = (ValidatorId, Height, Round, Step);

/// A cached message in both its wire and decoded forms.
#[derive(Debug, Clone)]
pub(crate) struct CacheEntry {
    pub wire: WireMessage,
    pub consensus: ConsensusMessage,
    /// Set once the driver has fully validated the message at its height.
    pub valid: bool,
}

#[derive(Debug)]
pub(crate) struct MessageCache<B> {
    /// Hash-indexed entries; holds equivocating messages too.
    messages: HashMap<MessageHash, CacheEntry>,
    /// The first accepted message per slot; equivocations never replace it.
    first_by_key: HashMap<MessageKey, MessageHash>,
    /// Hashes per height, in insertion order.
    by_height: BTreeMap<Height, Vec<MessageHash>>,
    /// At most one live block body per value id.
    values: HashMap<ValueId, B>,
    /// Values whose blocks passed block-store verification.
    valid_values: HashSet<ValueId>,
}

impl<B> Default for MessageCache<B> {
    fn default() -> Self {
        Self {
            messages: HashMap::new(),
            first_by_key: HashMap::new(),
            by_height: BTreeMap::new(),
            values: HashMap::new(),
            valid_values: HashSet::new(),
        }
    }
}

impl<B> MessageCache<B> {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn contains(&self, hash: MessageHash) -> bool {
        self.messages.contains_key(&hash)
    }

    /// Store a message.
    ///
    /// Returns [`MessageError::Duplicate`] when the exact message (same hash)
    /// is already present, and [`MessageError::Equivocation`] when the slot
    /// is taken by a different message; the equivocating message is still
    /// stored, reachable by hash and by height, so it can serve as evidence.
    pub(crate) fn add_message(
        &mut self,
        wire: WireMessage,
        consensus: ConsensusMessage,
    ) -> Result<(), MessageError> {
        let hash = wire.hash;
        if self.messages.contains_key(&hash) {
            return Err(MessageError::Duplicate);
        }
        let key = (consensus.sender, consensus.height, consensus.round, consensus.kind);
        let conflict = match self.first_by_key.get(&key) {
            Some(first) => {
                debug_assert!(*first != hash);
                Some(consensus.clone())
            }
            None => {
                self.first_by_key.insert(key, hash);
                None
            }
        };
        self.by_height.entry(consensus.height).or_default().push(hash);
        self.messages.insert(hash, CacheEntry { wire, consensus, valid: false });
        match conflict {
            Some(message) => {
                Err(MessageError::Equivocation(message.sender, message.height, message.round))
            }
            None => Ok(()),
        }
    }

    /// Store a block body. The first body for a value id wins; a value only
    /// ever has one block behind it since the id is its content hash.
    pub(crate) fn add_value(&mut self, value_id: ValueId, block: B) {
        self.values.entry(value_id).or_insert(block);
    }

    pub(crate) fn get_message(&self, hash: MessageHash) -> Option<&CacheEntry> {
        self.messages.get(&hash)
    }

    pub(crate) fn get_value(&self, value_id: ValueId) -> Option<&B> {
        self.values.get(&value_id)
    }

    pub(crate) fn set_valid_message(&mut self, hash: MessageHash) {
        if let Some(entry) = self.messages.get_mut(&hash) {
            entry.valid = true;
        }
    }

    pub(crate) fn set_valid_value(&mut self, value_id: ValueId) {
        self.valid_values.insert(value_id);
    }

    /// Whether the block behind `value_id` passed verification. This is the
    /// signal the algorithm's validity oracle reads.
    pub(crate) fn is_valid_value(&self, value_id: ValueId) -> bool {
        self.valid_values.contains(&value_id)
    }

    /// All currently cached messages for `height`, in insertion order.
    pub(crate) fn messages_at(&self, height: Height) -> impl Iterator<Item = &CacheEntry> {
        self.by_height
            .get(&height)
            .into_iter()
            .flat_map(|hashes| hashes.iter())
            .filter_map(|hash| self.messages.get(hash))
    }

    /// Drop everything below `height`, then drop block bodies no cached
    /// message references anymore.
    pub(crate) fn purge_below(&mut self, height: Height) {
        // split_off returns the entries at or above `height`; keep those.
        let kept = self.by_height.split_off(&height);
        let purged = std::mem::replace(&mut self.by_height, kept);
        for hashes in purged.values() {
            for hash in hashes {
                if let Some(entry) = self.messages.remove(hash) {
                    debug!("Purged {} from cache", entry.consensus);
                    let key = (
                        entry.consensus.sender,
                        entry.consensus.height,
                        entry.consensus.round,
                        entry.consensus.kind,
                    );
                    if self.first_by_key.get(&key) == Some(hash) {
                        self.first_by_key.remove(&key);
                    }
                }
            }
        }
        let referenced: HashSet<ValueId> = self
            .messages
            .values()
            .map(|entry| entry.consensus.value)
            .filter(|value| !value.is_nil())
            .collect();
        self.values.retain(|value_id, _| referenced.contains(value_id));
        self.valid_values.retain(|value_id| referenced.contains(value_id));
    }
}
