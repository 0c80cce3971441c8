//! The event loop that owns all consensus state.
//!
//! One driver task owns the algorithm, the message cache and the committee,
//! and processes every event sequentially from a single inbox: wire payloads,
//! looped-back self messages, timeouts, commit notifications and peer sync
//! requests. Auxiliary tasks (timers, the sync loop, broadcast sends, the
//! candidate-block intake) never touch consensus state; they only post events
//! or update the single-slot rendezvous.
//!
//! The only suspension points while consensus is live are the inbox itself
//! and the wait for a candidate value in the new-height procedure; every
//! algorithm step runs to completion, so each result is handled atomically
//! with respect to external events.

#[cfg(test)]
#[path = "driver_test.rs"]
mod driver_test;

use std::ops::ControlFlow;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use argus_consensus_config::{ConsensusConfig, TimeoutsConfig};
use parity_scale_codec::{Decode, Encode};
use tokio::sync::{mpsc, Notify};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::algorithm::{Algorithm, ConsensusResult};
use crate::committee::Committee;
use crate::message_cache::MessageCache;
use crate::oracle::Oracle;
use crate::sync::spawn_sync_loop;
use crate::timeout::TimeoutScheduler;
use crate::types::{
    ConsensusContext,
    ConsensusError,
    ConsensusEvent,
    ConsensusMessage,
    Gossip,
    Height,
    MessageError,
    MessageHash,
    Round,
    Step,
    TimeoutEvent,
    ValidatorId,
    ValueId,
};
use crate::wire::{committed_seal_bytes, payload_hash, ProposePayload, VotePayload, WireMessage};

/// Single-slot rendezvous for the next candidate block. Block assembly is
/// asynchronous to consensus, so the intake side overwrites (take the
/// latest) and the driver waits during the new-height procedure.
struct ValueSlot<B> {
    slot: Mutex<Option<(Height, B)>>,
    notify: Notify,
}

impl<B> ValueSlot<B> {
    fn new() -> Self {
        Self { slot: Mutex::new(None), notify: Notify::new() }
    }

    fn set(&self, height: Height, block: B) {
        *self.slot.lock().expect("value slot poisoned") = Some((height, block));
        self.notify.notify_waiters();
    }

    /// Wait until a candidate for `height` is available. Candidates for
    /// earlier heights are discarded; `None` means shutdown.
    async fn await_value(&self, height: Height, cancel: &CancellationToken) -> Option<B> {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            // Register before checking the slot so an update between the
            // check and the await is not missed.
            notified.as_mut().enable();
            {
                let mut slot = self.slot.lock().expect("value slot poisoned");
                match slot.take() {
                    Some((h, block)) if h == height => return Some(block),
                    Some((h, block)) if h > height => *slot = Some((h, block)),
                    Some((h, _)) => debug!("Discarding stale candidate for height {h}"),
                    None => {}
                }
            }
            tokio::select! {
                _ = notified.as_mut() => {}
                _ = cancel.cancelled() => return None,
            }
        }
    }
}

/// Handle the embedding node uses to feed the driver. All inputs funnel into
/// the driver's single inbox, except candidate blocks, which go through the
/// value slot.
pub struct ConsensusHandle<B> {
    events: mpsc::UnboundedSender<ConsensusEvent>,
    value_slot: Arc<ValueSlot<B>>,
    height: Arc<AtomicU64>,
}

impl<B> Clone for ConsensusHandle<B> {
    fn clone(&self) -> Self {
        Self {
            events: self.events.clone(),
            value_slot: self.value_slot.clone(),
            height: self.height.clone(),
        }
    }
}

impl<B> ConsensusHandle<B> {
    /// Feed a raw signed payload received from a peer.
    pub fn post_payload(&self, payload: Vec<u8>) {
        let _ = self.events.send(ConsensusEvent::Message { payload });
    }

    /// Tell the driver the block store committed a block through another
    /// path; it re-reads the last committed height.
    pub fn notify_commit(&self) {
        let _ = self.events.send(ConsensusEvent::Commit);
    }

    /// A peer asked for the messages we hold at our current height.
    pub fn request_sync(&self, peer: ValidatorId) {
        let _ = self.events.send(ConsensusEvent::SyncRequest { peer });
    }

    /// Register the next candidate block this node may propose. Overwrites
    /// any previous candidate.
    pub fn set_unmined_block(&self, height: Height, block: B) {
        self.value_slot.set(height, block);
    }

    /// Snapshot of the height currently being decided.
    pub fn current_height(&self) -> Height {
        self.height.load(Ordering::Acquire)
    }
}

/// The algorithm's read-only view, assembled from the driver's state for the
/// duration of one algorithm step.
struct DriverOracle<'a, B> {
    self_id: ValidatorId,
    height: Height,
    committee: &'a Committee,
    prev_proposer: Option<ValidatorId>,
    timeouts: &'a TimeoutsConfig,
    cache: &'a MessageCache<B>,
}

impl<B> Oracle for DriverOracle<'_, B> {
    fn self_id(&self) -> ValidatorId {
        self.self_id
    }

    fn height(&self) -> Height {
        self.height
    }

    fn committee(&self) -> &Committee {
        self.committee
    }

    fn proposer(&self, round: Round) -> ValidatorId {
        self.committee.proposer(round, self.prev_proposer).id
    }

    fn valid_value(&self, value: ValueId) -> bool {
        !value.is_nil() && self.cache.is_valid_value(value)
    }

    fn timeout_propose(&self, round: Round) -> std::time::Duration {
        self.timeouts.get_proposal_timeout(round)
    }

    fn timeout_prevote(&self, round: Round) -> std::time::Duration {
        self.timeouts.get_prevote_timeout(round)
    }

    fn timeout_precommit(&self, round: Round) -> std::time::Duration {
        self.timeouts.get_precommit_timeout(round)
    }
}

/// The consensus engine's driver. Create one with [`ConsensusDriver::new`]
/// and run it to completion with [`ConsensusDriver::run`].
pub struct ConsensusDriver<C: ConsensusContext, G: Gossip + 'static> {
    config: ConsensusConfig,
    self_id: ValidatorId,
    context: C,
    gossip: Arc<G>,
    inbox: mpsc::UnboundedReceiver<ConsensusEvent>,
    inbox_tx: mpsc::UnboundedSender<ConsensusEvent>,
    algorithm: Algorithm,
    cache: MessageCache<C::Block>,
    /// Set on entering the first height.
    committee: Option<Committee>,
    prev_proposer: Option<ValidatorId>,
    timeouts: TimeoutScheduler,
    value_slot: Arc<ValueSlot<C::Block>>,
    /// The candidate block for the current height, proposed when this node
    /// is the round's proposer.
    current_value: Option<C::Block>,
    height: Arc<AtomicU64>,
    cancel: CancellationToken,
}

impl<C: ConsensusContext, G: Gossip + 'static> ConsensusDriver<C, G> {
    /// Assemble a driver and the handle the node feeds it through.
    pub fn new(
        config: ConsensusConfig,
        validator_id: ValidatorId,
        context: C,
        gossip: Arc<G>,
        cancel: CancellationToken,
    ) -> (Self, ConsensusHandle<C::Block>) {
        let (inbox_tx, inbox) = mpsc::unbounded_channel();
        let value_slot = Arc::new(ValueSlot::new());
        let height = Arc::new(AtomicU64::new(0));
        let handle = ConsensusHandle {
            events: inbox_tx.clone(),
            value_slot: value_slot.clone(),
            height: height.clone(),
        };
        let timeouts = TimeoutScheduler::new(inbox_tx.clone());
        let driver = Self {
            config,
            self_id: validator_id,
            context,
            gossip,
            inbox,
            inbox_tx,
            algorithm: Algorithm::new(),
            cache: MessageCache::new(),
            committee: None,
            prev_proposer: None,
            timeouts,
            value_slot,
            current_value: None,
            height,
            cancel,
        };
        (driver, handle)
    }

    /// Run consensus until shutdown. Returns an error only when consensus
    /// cannot continue (commit failure, internal inconsistency).
    pub async fn run(mut self) -> Result<(), ConsensusError> {
        info!("Starting consensus as {}", self.self_id);
        // Give the network time to connect to peers.
        tokio::select! {
            _ = tokio::time::sleep(self.config.startup_delay) => {}
            _ = self.cancel.cancelled() => return Ok(()),
        }
        let _sync_loop = spawn_sync_loop(
            self.gossip.clone(),
            self.height.clone(),
            self.config.sync.retry_interval,
            self.cancel.child_token(),
        );
        let result = self.event_loop().await;
        // Stop auxiliary tasks on any exit, error or shutdown alike.
        self.cancel.cancel();
        self.timeouts.reset_all();
        info!("Consensus stopped");
        result
    }

    async fn event_loop(&mut self) -> Result<(), ConsensusError> {
        let (_, last_height) = self.context.last_committed().await;
        if self.new_height(last_height + 1).await?.is_break() {
            return Ok(());
        }
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => return Ok(()),
                event = self.inbox.recv() => {
                    let Some(event) = event else {
                        return Err(ConsensusError::InboxClosed);
                    };
                    if self.handle_event(event).await?.is_break() {
                        return Ok(());
                    }
                }
            }
        }
    }

    fn current_height(&self) -> Height {
        self.height.load(Ordering::Acquire)
    }

    fn committee(&self) -> &Committee {
        self.committee.as_ref().expect("consensus height not initialized")
    }

    /// Run one algorithm step against a freshly assembled oracle view.
    fn step<R>(&mut self, f: impl FnOnce(&mut Algorithm, &DriverOracle<'_, C::Block>) -> R) -> R {
        let ConsensusDriver {
            algorithm, cache, committee, prev_proposer, self_id, height, config, ..
        } = self;
        let oracle = DriverOracle {
            self_id: *self_id,
            height: height.load(Ordering::Acquire),
            committee: committee.as_ref().expect("consensus height not initialized"),
            prev_proposer: *prev_proposer,
            timeouts: &config.timeouts,
            cache: &*cache,
        };
        f(algorithm, &oracle)
    }

    async fn handle_event(
        &mut self,
        event: ConsensusEvent,
    ) -> Result<ControlFlow<()>, ConsensusError> {
        match event {
            ConsensusEvent::Message { payload } => self.handle_wire_payload(payload).await,
            ConsensusEvent::SelfMessage(message) => self.handle_self_message(message).await,
            ConsensusEvent::Timeout(timeout) => self.handle_timeout(timeout).await,
            ConsensusEvent::Commit => self.handle_commit_notification().await,
            ConsensusEvent::SyncRequest { peer } => {
                self.handle_sync_request(peer);
                Ok(ControlFlow::Continue(()))
            }
            ConsensusEvent::Revalidate { hash } => self.handle_revalidate(hash).await,
        }
    }

    /// Validate, decode and cache a raw payload, then hand it to the
    /// algorithm if it is for the current height.
    async fn handle_wire_payload(
        &mut self,
        raw: Vec<u8>,
    ) -> Result<ControlFlow<()>, ConsensusError> {
        let hash = payload_hash(&raw);
        if self.cache.contains(hash) {
            // Gossip echo of a message we already hold.
            return Ok(ControlFlow::Continue(()));
        }
        let (wire, consensus, block) = match self.decode_payload(&raw) {
            Ok(decoded) => decoded,
            Err(error) => {
                debug!("Dropping payload: {error}");
                return Ok(ControlFlow::Continue(()));
            }
        };
        let current = self.current_height();
        if consensus.height > current + self.config.future_height_limit {
            warn!(
                "{}",
                MessageError::FutureHeight(consensus.height, current)
            );
            return Ok(ControlFlow::Continue(()));
        }
        if let Some(block) = block {
            self.cache.add_value(consensus.value, block);
        }
        match self.cache.add_message(wire, consensus.clone()) {
            Ok(()) => {}
            Err(MessageError::Duplicate) => return Ok(ControlFlow::Continue(())),
            Err(error) => {
                // Equivocation: the message is retained as evidence but the
                // algorithm only ever counts the first.
                warn!("{error}");
                return Ok(ControlFlow::Continue(()));
            }
        }
        if consensus.height < current {
            // Kept in the cache long enough to seed gossip of the previous
            // decision; never handed to the algorithm.
            debug!("{}", MessageError::PastHeight(consensus.height, current));
            return Ok(ControlFlow::Continue(()));
        }
        if consensus.height > current {
            // Replayed from the cache when the driver reaches that height.
            debug!("Retaining {consensus} while at height {current}");
            return Ok(ControlFlow::Continue(()));
        }
        if !self.committee().contains(consensus.sender) {
            debug!("{}", MessageError::UnknownSender(consensus.sender));
            return Ok(ControlFlow::Continue(()));
        }
        // Forward the payload to the committee before consuming it.
        let gossip = self.gossip.clone();
        let committee = self.committee().clone();
        tokio::spawn(async move { gossip.gossip(&committee, raw).await });
        self.handle_current_height_message(consensus, hash).await
    }

    /// Decode and authenticate an envelope. Signature recovery and the
    /// committed-seal check are pure crypto, so they apply to messages of
    /// any height; committee membership is checked only once the message's
    /// height is current.
    fn decode_payload(
        &self,
        raw: &[u8],
    ) -> Result<(WireMessage, ConsensusMessage, Option<C::Block>), MessageError> {
        let wire = WireMessage::from_bytes(raw)?;
        let signer = self.context.recover(&wire.signing_payload(), &wire.signature)?;
        if signer != wire.sender {
            return Err(MessageError::BadSignature(wire.sender));
        }
        match wire.code {
            Step::Propose => {
                let payload: ProposePayload<C::Block> = Decode::decode(&mut &wire.payload[..])
                    .map_err(|e| MessageError::Decode(e.to_string()))?;
                let value = self.context.value_id(&payload.block);
                if value != payload.value {
                    return Err(MessageError::Decode(
                        "proposal value id does not match block".to_string(),
                    ));
                }
                let consensus = ConsensusMessage {
                    kind: Step::Propose,
                    height: payload.height,
                    round: payload.round,
                    sender: wire.sender,
                    value,
                    valid_round: payload.valid_round,
                };
                Ok((wire, consensus, Some(payload.block)))
            }
            Step::Prevote | Step::Precommit => {
                let payload: VotePayload = Decode::decode(&mut &wire.payload[..])
                    .map_err(|e| MessageError::Decode(e.to_string()))?;
                if wire.code == Step::Precommit {
                    self.context.verify_committed_seal(
                        wire.sender,
                        &wire.committed_seal,
                        payload.value,
                        payload.round,
                        payload.height,
                    )?;
                }
                let consensus = ConsensusMessage {
                    kind: wire.code,
                    height: payload.height,
                    round: payload.round,
                    sender: wire.sender,
                    value: payload.value,
                    valid_round: None,
                };
                Ok((wire, consensus, None))
            }
        }
    }

    /// Domain checks that need the current height's committee, then one
    /// algorithm step.
    async fn handle_current_height_message(
        &mut self,
        consensus: ConsensusMessage,
        hash: MessageHash,
    ) -> Result<ControlFlow<()>, ConsensusError> {
        debug!("Received {consensus}");
        if !self.committee().contains(consensus.sender) {
            debug!("{}", MessageError::UnknownSender(consensus.sender));
            return Ok(ControlFlow::Continue(()));
        }
        match consensus.kind {
            Step::Propose => {
                let expected = self.committee().proposer(consensus.round, self.prev_proposer).id;
                if consensus.sender != expected {
                    warn!(
                        "{} (expected {expected} for round {})",
                        MessageError::NotFromProposer(consensus.sender),
                        consensus.round
                    );
                    return Ok(ControlFlow::Continue(()));
                }
                let Some(block) = self.cache.get_value(consensus.value).cloned() else {
                    return Err(ConsensusError::InternalInconsistency(format!(
                        "no block body cached for proposed value {}",
                        consensus.value
                    )));
                };
                match self.context.verify_proposal_header(&block) {
                    Err(MessageError::FutureBlock(wait)) => {
                        // The proposal claims a timestamp slightly ahead of
                        // us; try again once the hint elapses.
                        debug!("Proposal for round {} is in the near future, retrying after {wait:?}", consensus.round);
                        let inbox = self.inbox_tx.clone();
                        tokio::spawn(async move {
                            tokio::time::sleep(wait).await;
                            let _ = inbox.send(ConsensusEvent::Revalidate { hash });
                        });
                        return Ok(ControlFlow::Continue(()));
                    }
                    Err(error) => {
                        // Proposals are allowed to be invalid: the value
                        // simply never becomes valid and we prevote nil.
                        debug!("Proposal header rejected: {error}");
                    }
                    Ok(()) => {
                        if let Err(error) = self.context.verify_proposal(&block).await {
                            debug!("Proposal block rejected: {error}");
                        } else {
                            self.cache.set_valid_value(consensus.value);
                        }
                    }
                }
            }
            Step::Prevote | Step::Precommit => self.cache.set_valid_message(hash),
        }
        let result = self.step(|algorithm, oracle| algorithm.receive_message(consensus, oracle));
        self.handle_result(result).await
    }

    /// A message we broadcast ourselves, arriving back through the inbox.
    async fn handle_self_message(
        &mut self,
        message: ConsensusMessage,
    ) -> Result<ControlFlow<()>, ConsensusError> {
        if message.height != self.current_height() {
            debug!("Dropping own {message}: height moved on");
            return Ok(ControlFlow::Continue(()));
        }
        let result = self.step(|algorithm, oracle| algorithm.receive_message(message, oracle));
        self.handle_result(result).await
    }

    async fn handle_timeout(
        &mut self,
        timeout: TimeoutEvent,
    ) -> Result<ControlFlow<()>, ConsensusError> {
        debug!("Timeout fired: {} height={} round={}", timeout.step, timeout.height, timeout.round);
        let result = self.step(|algorithm, oracle| match timeout.step {
            Step::Propose => algorithm.on_timeout_propose(timeout.height, timeout.round, oracle),
            Step::Prevote => algorithm.on_timeout_prevote(timeout.height, timeout.round, oracle),
            Step::Precommit => algorithm.on_timeout_precommit(timeout.height, timeout.round),
        });
        self.handle_result(result).await
    }

    /// The block store committed a block through another path (e.g. sync
    /// import). If it is ahead of us, abandon the current height.
    async fn handle_commit_notification(&mut self) -> Result<ControlFlow<()>, ConsensusError> {
        let (_, last_committed) = self.context.last_committed().await;
        let current = self.current_height();
        if last_committed + 1 <= current {
            debug!("Discarding commit notification; already at height {current}");
            return Ok(ControlFlow::Continue(()));
        }
        info!(
            "Block store is ahead (committed height {last_committed}); moving to height {}",
            last_committed + 1
        );
        self.new_height(last_committed + 1).await
    }

    fn handle_sync_request(&mut self, peer: ValidatorId) {
        let current = self.current_height();
        let payloads: Vec<Vec<u8>> =
            self.cache.messages_at(current).map(|entry| entry.wire.encode()).collect();
        if payloads.is_empty() {
            return;
        }
        info!("Streaming {} cached messages at height {current} to {peer}", payloads.len());
        let gossip = self.gossip.clone();
        tokio::spawn(async move { gossip.sync_peer(peer, payloads).await });
    }

    /// A proposal whose header was in the near future is due another pass.
    async fn handle_revalidate(
        &mut self,
        hash: MessageHash,
    ) -> Result<ControlFlow<()>, ConsensusError> {
        let Some(entry) = self.cache.get_message(hash) else {
            return Ok(ControlFlow::Continue(()));
        };
        let consensus = entry.consensus.clone();
        if consensus.height != self.current_height() {
            return Ok(ControlFlow::Continue(()));
        }
        self.handle_current_height_message(consensus, hash).await
    }

    /// Execute algorithm results until none remain. Broadcasts and schedules
    /// are single side effects; round changes re-enter the algorithm and
    /// decisions commit and move to the next height.
    async fn handle_result(
        &mut self,
        mut result: Option<ConsensusResult>,
    ) -> Result<ControlFlow<()>, ConsensusError> {
        loop {
            match result.take() {
                None => return Ok(ControlFlow::Continue(())),
                Some(ConsensusResult::Broadcast(message)) => {
                    self.broadcast(message)?;
                    return Ok(ControlFlow::Continue(()));
                }
                Some(ConsensusResult::Schedule(schedule)) => {
                    self.timeouts.schedule(
                        schedule.step,
                        schedule.height,
                        schedule.round,
                        schedule.delay,
                    );
                    return Ok(ControlFlow::Continue(()));
                }
                Some(ConsensusResult::StartRound(change)) => match change.decision {
                    Some(decided) => {
                        self.commit_decision(decided).await?;
                        return Box::pin(self.new_height(change.height)).await;
                    }
                    None => {
                        let value =
                            self.current_value.as_ref().map(|b| self.context.value_id(b));
                        result = self.step(|algorithm, oracle| {
                            algorithm.start_round(change.height, change.round, value, oracle)
                        });
                    }
                },
            }
        }
    }

    /// Sign and send one of our own messages. The message enters the cache
    /// like any peer message (so echoes deduplicate and sync can serve it)
    /// and is looped back through the inbox so the algorithm observes it on
    /// the normal path.
    fn broadcast(&mut self, message: ConsensusMessage) -> Result<(), ConsensusError> {
        info!("Broadcasting {message}");
        if message.kind == Step::Propose {
            // Make sure our candidate's body is in the cache before the
            // proposal is built from it.
            if self.cache.get_value(message.value).is_none() {
                if let Some(candidate) = &self.current_value {
                    if self.context.value_id(candidate) == message.value {
                        self.cache.add_value(message.value, candidate.clone());
                    }
                }
            }
            // Blocks we propose are valid by construction; re-proposed
            // values were already verified when first received.
            self.cache.set_valid_value(message.value);
        }
        let wire = self.build_wire_message(&message)?;
        let raw = wire.encode();
        if let Err(error) = self.cache.add_message(wire, message.clone()) {
            debug!("Own message already cached: {error}");
        }
        let _ = self.inbox_tx.send(ConsensusEvent::SelfMessage(message));
        let gossip = self.gossip.clone();
        tokio::spawn(async move { gossip.broadcast(raw).await });
        Ok(())
    }

    fn build_wire_message(&self, message: &ConsensusMessage) -> Result<WireMessage, ConsensusError> {
        let payload = match message.kind {
            Step::Propose => {
                let block = self.cache.get_value(message.value).cloned().ok_or_else(|| {
                    ConsensusError::InternalInconsistency(format!(
                        "no block body for proposed value {}",
                        message.value
                    ))
                })?;
                ProposePayload {
                    height: message.height,
                    round: message.round,
                    value: message.value,
                    valid_round: message.valid_round,
                    block,
                }
                .encode()
            }
            Step::Prevote | Step::Precommit => VotePayload {
                height: message.height,
                round: message.round,
                value: message.value,
            }
            .encode(),
        };
        let committed_seal = match message.kind {
            Step::Precommit => self.context.sign(&committed_seal_bytes(
                message.value,
                message.round,
                message.height,
            )),
            _ => Vec::new(),
        };
        let mut wire = WireMessage {
            code: message.kind,
            payload,
            sender: self.self_id,
            signature: Vec::new(),
            committed_seal,
            hash: MessageHash::default(),
        };
        wire.signature = self.context.sign(&wire.signing_payload());
        wire.hash = payload_hash(&wire.encode());
        Ok(wire)
    }

    async fn commit_decision(&mut self, decided: ConsensusMessage) -> Result<(), ConsensusError> {
        let block = self.cache.get_value(decided.value).cloned().ok_or_else(|| {
            ConsensusError::InternalInconsistency(format!(
                "no block body for decided value {}",
                decided.value
            ))
        })?;
        info!(
            "COMMIT: height={} round={} value={}",
            decided.height, decided.round, decided.value
        );
        // A store that refuses a decided block violates our invariants
        // externally; this error aborts consensus.
        self.context.commit(block).await
    }

    /// Enter a height: wait for a candidate value, rebuild the committee
    /// from the committed chain, reset per-height state, start round 0 and
    /// replay any messages already cached for this height.
    async fn new_height(&mut self, height: Height) -> Result<ControlFlow<()>, ConsensusError> {
        self.timeouts.reset_all();
        self.height.store(height, Ordering::Release);
        info!("NEW_HEIGHT: waiting for a candidate value for height {height}");
        let Some(candidate) = self.value_slot.await_value(height, &self.cancel).await else {
            // Shutdown while waiting; unwind without further side effects.
            return Ok(ControlFlow::Break(()));
        };
        let (last_block, last_height) = self.context.last_committed().await;
        if last_height + 1 != height {
            return Err(ConsensusError::InternalInconsistency(format!(
                "block store at height {last_height} out of sync with consensus height {height}"
            )));
        }
        self.committee = Some(self.context.committee_for(&last_block));
        self.prev_proposer = self.context.proposer_of(&last_block);
        self.cache.purge_below(height);
        let value_id = self.context.value_id(&candidate);
        self.current_value = Some(candidate);
        info!(
            "START_HEIGHT: running consensus for height {height} with a committee of {}",
            self.committee().len()
        );
        let result =
            self.step(|algorithm, oracle| algorithm.start_round(height, 0, Some(value_id), oracle));
        if self.handle_result(result).await?.is_break() {
            return Ok(ControlFlow::Break(()));
        }
        // Replay messages already received for this height, in the order
        // they originally arrived.
        let cached: Vec<(ConsensusMessage, MessageHash)> = self
            .cache
            .messages_at(height)
            .map(|entry| (entry.consensus.clone(), entry.wire.hash))
            .collect();
        for (consensus, hash) in cached {
            if self.handle_current_height_message(consensus, hash).await?.is_break() {
                return Ok(ControlFlow::Break(()));
            }
        }
        Ok(ControlFlow::Continue(()))
    }
}
