//! Ping/pong liveness monitoring.

use std::sync::Arc;
use std::time::Duration;

use roomcast_hub::Connection;
use tokio::time;
use tokio_util::sync::CancellationToken;

const MIN_INTERVAL: Duration = Duration::from_millis(1);

/// Why the heartbeat loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeartbeatResult {
    /// The client stopped answering within the timeout window.
    TimedOut,
    /// A send to the client failed; it has been dropped from its room.
    SendFailed,
    /// The session ended first.
    Cancelled,
}

/// Watch a connection's alive flag.
///
/// Each `interval` tick reads and clears the flag; pongs and inbound frames
/// set it again. `timeout / interval` consecutive silent ticks (at least one)
/// end the loop with [`HeartbeatResult::TimedOut`]. A zero `interval` is
/// treated as 1ms.
pub async fn run_heartbeat(
    connection: Arc<Connection>,
    interval: Duration,
    timeout: Duration,
    cancel: CancellationToken,
) -> HeartbeatResult {
    let interval = interval.max(MIN_INTERVAL);
    let mut ticker = time::interval(interval);
    ticker.set_missed_tick_behavior(time::MissedTickBehavior::Delay);
    let max_missed = (timeout.as_millis() / interval.as_millis()).max(1);
    let mut missed: u128 = 0;

    loop {
        tokio::select! {
            () = cancel.cancelled() => return HeartbeatResult::Cancelled,
            _ = ticker.tick() => {
                if connection.is_dead() {
                    return HeartbeatResult::SendFailed;
                }
                if connection.check_alive() {
                    missed = 0;
                } else {
                    missed += 1;
                    if missed >= max_missed {
                        return HeartbeatResult::TimedOut;
                    }
                }
            }
        }
    }
}
