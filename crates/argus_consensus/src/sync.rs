//! Periodic sync: ask peers to resend consensus messages while the height
//! has not advanced.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::types::Gossip;

/// Spawn the sync loop. It reads the driver's height snapshot and owns no
/// consensus state; peer sync *requests* are answered by the driver, which
/// owns the cache.
///
/// One sync request is issued immediately at startup; afterwards a request
/// goes out on every tick on which the height has not moved.
pub(crate) fn spawn_sync_loop<G: Gossip + 'static>(
    gossip: Arc<G>,
    height: Arc<AtomicU64>,
    interval: Duration,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut last_seen = height.load(Ordering::Acquire);
        // Ask for sync when the engine starts.
        gossip.ask_sync(last_seen).await;
        let mut ticker = tokio::time::interval(interval);
        // The first tick completes immediately; skip it.
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("Sync loop stopped");
                    return;
                }
                _ = ticker.tick() => {
                    let current = height.load(Ordering::Acquire);
                    if current == last_seen {
                        debug!("Height {current} has not advanced, asking peers for sync");
                        gossip.ask_sync(current).await;
                    }
                    last_seen = current;
                }
            }
        }
    })
}
