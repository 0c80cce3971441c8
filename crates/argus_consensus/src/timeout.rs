//! One-shot timers that post timeout events back into the driver inbox.

#[cfg(test)]
#[path = "timeout_test.rs"]
mod timeout_test;

use std::collections::HashMap;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::trace;

use crate::types::{ConsensusEvent, Height, Round, Step, TimeoutEvent};

/// Arms at most one live timer per step. Timer tasks never touch consensus
/// state: firing just posts an event into the inbox.
pub(crate) struct TimeoutScheduler {
    inbox: mpsc::UnboundedSender<ConsensusEvent>,
    timers: HashMap<Step, JoinHandle<()>>,
}

impl TimeoutScheduler {
    pub(crate) fn new(inbox: mpsc::UnboundedSender<ConsensusEvent>) -> Self {
        Self { inbox, timers: HashMap::new() }
    }

    /// Arm the timer for `step`, replacing any live one. A timer that fired
    /// before being replaced leaves a stale event in the inbox; the
    /// algorithm's (height, round, step) guard ignores it.
    pub(crate) fn schedule(&mut self, step: Step, height: Height, round: Round, delay: Duration) {
        self.reset(step);
        trace!("Arming {step} timeout for height={height} round={round}: {delay:?}");
        let inbox = self.inbox.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            // The driver may have shut down; a closed inbox is fine.
            let _ = inbox.send(ConsensusEvent::Timeout(TimeoutEvent { step, height, round }));
        });
        self.timers.insert(step, handle);
    }

    /// Cancel the live timer for `step`, if any. Cancelling a timer that
    /// already fired is a no-op.
    pub(crate) fn reset(&mut self, step: Step) {
        if let Some(handle) = self.timers.remove(&step) {
            handle.abort();
        }
    }

    pub(crate) fn reset_all(&mut self) {
        for step in [Step::Propose, Step::Prevote, Step::Precommit] {
            self.reset(step);
        }
    }
}

impl Drop for TimeoutScheduler {
    fn drop(&mut self) {
        self.reset_all();
    }
}
