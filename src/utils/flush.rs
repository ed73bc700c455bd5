use tokio::time::{self, Duration, MissedTickBehavior};
use tracing::debug;

use crate::hub::Hub;

/// Periodically writes changed rooms to sqlite and evicts idle ones.
pub async fn task(hub: Hub, every: Duration) {
    let mut tick = time::interval(every);
    tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tick.tick().await;
        let saved = hub.flush_dirty().await;
        if saved > 0 {
            debug!(rooms = saved, "flushed room snapshots");
        }
    }
}
