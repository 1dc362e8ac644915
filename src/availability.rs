//! Startup availability gate: poll the store until it answers or the window closes.

use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::catalog::Connector;

/// One reachability probe: connect, ping, close. No retry of its own.
pub async fn probe(connector: &dyn Connector) -> bool {
    match connector.connect().await {
        Ok(mut conn) => {
            let ok = conn.ping().await;
            conn.close().await;
            ok
        }
        Err(e) => {
            debug!(target: "startup", "availability probe failed: {}", e);
            false
        }
    }
}

/// Poll every `poll_interval` until the store is reachable (true) or `max_wait` has
/// elapsed (false). At least one probe is always made; each probe and the last sleep
/// are clipped to whatever is left of the window, so a store that accepts and then
/// stalls cannot hold the gate open.
pub async fn wait_until_reachable(connector: &dyn Connector, max_wait: Duration, poll_interval: Duration) -> bool {
    let started = Instant::now();
    let deadline = started + max_wait;
    let mut polls: u32 = 0;
    loop {
        polls += 1;
        let remaining = deadline.saturating_duration_since(Instant::now());
        let reachable = match tokio::time::timeout(remaining, probe(connector)).await {
            Ok(ok) => ok,
            Err(_) => {
                debug!(target: "startup", "availability probe did not finish within the window");
                false
            }
        };
        if reachable {
            info!(target: "startup", polls, elapsed_ms = started.elapsed().as_millis() as u64, "database reachable at {}", connector.describe());
            return true;
        }
        let now = Instant::now();
        if now >= deadline {
            warn!(target: "startup", polls, "database not reachable within {:?}", max_wait);
            return false;
        }
        tokio::time::sleep(poll_interval.min(deadline - now)).await;
    }
}
