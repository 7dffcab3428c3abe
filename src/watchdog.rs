use crate::config::MIN_TIMER;
use crate::connection::ConnectionManager;
use std::sync::Weak;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

/// Start the liveness supervisor.
///
/// Each tick sends a heartbeat unless a reconnect is running or the
/// connection is mid-transition. A failed heartbeat triggers a reconnect. The
/// probe and the reconnect it triggers are awaited inline, so ticks that fall
/// inside them are skipped and there is never more than one of either.
///
/// The task ends on its own once the connection manager is dropped.
pub(crate) fn spawn(manager: Weak<ConnectionManager>, period: Duration) -> JoinHandle<()> {
    // The config fields are public, so a zero period can still get here
    let period = period.max(MIN_TIMER);
    tokio::spawn(async move {
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            ticker.tick().await;
            let Some(manager) = manager.upgrade() else {
                break;
            };
            if !manager.ready_for_probe().await {
                continue;
            }

            if let Err(e) = manager.probe().await {
                tracing::warn!("Watchdog probe failed: {}", e);
                if let Err(e) = manager.reconnect().await {
                    tracing::warn!("Watchdog reconnect failed: {}", e);
                }
            }
        }
    })
}
