//! Lifecycle supervisor: broker reconnection and dead-connection sweeping.

use std::time::Duration;

use futures::future::join_all;
use rand::Rng;
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::backplane::ListenExit;
use crate::coordinator::Coordinator;

/// A link that stays up this long resets the reconnect backoff.
pub const STABLE_LINK: Duration = Duration::from_secs(5);

/// Shortest tick period for the sweep loop.
const MIN_SWEEP_PERIOD: Duration = Duration::from_millis(1);

/// Hub timing knobs.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct HubConfig {
    /// Upper bound on one member send during fan-out.
    #[serde(with = "millis")]
    pub send_timeout: Duration,
    /// How often dead connections are swept.
    #[serde(with = "millis")]
    pub sweep_interval: Duration,
    /// First reconnect delay.
    #[serde(with = "millis")]
    pub reconnect_base: Duration,
    /// Reconnect delay cap.
    #[serde(with = "millis")]
    pub reconnect_max: Duration,
    /// Relative jitter applied to each reconnect delay (0.0 to 1.0).
    pub jitter: f64,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            send_timeout: Duration::from_secs(2),
            sweep_interval: Duration::from_secs(30),
            reconnect_base: Duration::from_millis(250),
            reconnect_max: Duration::from_secs(30),
            jitter: 0.2,
        }
    }
}

mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}

/// Exponential reconnect backoff with a cap and jitter.
#[derive(Clone, Debug)]
pub struct Backoff {
    base: Duration,
    max: Duration,
    jitter: f64,
    attempt: u32,
}

impl Backoff {
    /// Backoff starting at `base`, never exceeding `max` before jitter.
    pub fn new(base: Duration, max: Duration, jitter: f64) -> Self {
        Self {
            base,
            max,
            jitter: jitter.clamp(0.0, 1.0),
            attempt: 0,
        }
    }

    /// Failed attempts since the last reset.
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Delay for the next attempt, given `random` in `[0.0, 1.0)`.
    #[allow(
        clippy::cast_precision_loss,
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss
    )]
    pub fn delay_with_random(&self, random: f64) -> Duration {
        let base_ms = u64::try_from(self.base.as_millis()).unwrap_or(u64::MAX);
        let max_ms = u64::try_from(self.max.as_millis()).unwrap_or(u64::MAX);
        let capped = base_ms
            .saturating_mul(1u64 << self.attempt.min(31))
            .min(max_ms);
        let factor = 1.0 + (random * 2.0 - 1.0) * self.jitter;
        Duration::from_millis(((capped as f64) * factor).round().max(0.0) as u64)
    }

    /// Delay for the next attempt, then count the attempt.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.delay_with_random(rand::rng().random::<f64>());
        self.attempt = self.attempt.saturating_add(1);
        delay
    }

    /// Back to the base delay after a successful connect.
    pub fn reset(&mut self) {
        self.attempt = 0;
    }
}

/// Handle to the running listener and sweep tasks.
pub struct SupervisorHandle {
    cancel: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
    coordinator: Coordinator,
}

impl SupervisorHandle {
    /// Token cancelled when the supervisor stops.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Stop both loops, wait for them, and move the backplane to `Stopped`.
    pub async fn stop(self) {
        self.cancel.cancel();
        for result in join_all(self.tasks).await {
            if let Err(e) = result {
                warn!(error = %e, "supervisor task ended abnormally");
            }
        }
        self.coordinator.backplane().stop().await;
    }
}

pub(crate) fn spawn(coordinator: Coordinator) -> SupervisorHandle {
    let cancel = CancellationToken::new();
    let link = tokio::spawn(run_link(coordinator.clone(), cancel.clone()));
    let sweep = tokio::spawn(run_sweep(coordinator.clone(), cancel.clone()));
    info!(instance = %coordinator.instance_id(), "supervisor started");
    SupervisorHandle {
        cancel,
        tasks: vec![link, sweep],
        coordinator,
    }
}

/// Keep the backplane connected and listening until cancelled.
async fn run_link(coordinator: Coordinator, cancel: CancellationToken) {
    let config = coordinator.config().clone();
    let mut backoff = Backoff::new(config.reconnect_base, config.reconnect_max, config.jitter);
    let backplane = std::sync::Arc::clone(coordinator.backplane());

    while !cancel.is_cancelled() {
        let connected = tokio::select! {
            () = cancel.cancelled() => break,
            result = backplane.connect() => result,
        };
        match connected {
            Ok(inbox) => {
                if backoff.attempt() > 0 {
                    info!(attempts = backoff.attempt(), "broker link restored");
                }
                let since = tokio::time::Instant::now();
                let exit = backplane.listen(inbox, &coordinator, &cancel).await;
                backplane.disconnect().await;
                if exit == ListenExit::Stopped {
                    break;
                }
                if since.elapsed() >= STABLE_LINK {
                    backoff.reset();
                }
                let delay = backoff.next_delay();
                warn!(
                    attempt = backoff.attempt(),
                    delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                    "broker link lost, reconnecting"
                );
                tokio::select! {
                    () = cancel.cancelled() => break,
                    () = tokio::time::sleep(delay) => {}
                }
            }
            Err(e) => {
                let delay = backoff.next_delay();
                warn!(
                    error = %e,
                    kind = e.error_kind(),
                    attempt = backoff.attempt(),
                    delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                    "broker connect failed, retrying"
                );
                tokio::select! {
                    () = cancel.cancelled() => break,
                    () = tokio::time::sleep(delay) => {}
                }
            }
        }
    }
    debug!("link loop exited");
}

/// Periodically prune dead connections until cancelled.
async fn run_sweep(coordinator: Coordinator, cancel: CancellationToken) {
    let period = coordinator.config().sweep_interval.max(MIN_SWEEP_PERIOD);
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    let _ = ticker.tick().await;
    loop {
        tokio::select! {
            () = cancel.cancelled() => break,
            _ = ticker.tick() => {
                let _ = coordinator.sweep().await;
            }
        }
    }
    debug!("sweep loop exited");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use async_trait::async_trait;
    use bytes::Bytes;
    use roomcast_broker::{Broker, BrokerError, BrokerLink, BrokerSession, Inbox};

    struct NullLink;

    #[async_trait]
    impl BrokerLink for NullLink {
        async fn publish(&self, _channel: &str, _payload: Bytes) -> Result<(), BrokerError> {
            Ok(())
        }

        async fn subscribe(&self, _channel: &str) -> Result<(), BrokerError> {
            Ok(())
        }

        async fn unsubscribe(&self, _channel: &str) -> Result<(), BrokerError> {
            Ok(())
        }
    }

    /// Accepts every connect and ends the session at once.
    #[derive(Default)]
    struct FlappingBroker {
        connects: AtomicUsize,
    }

    #[async_trait]
    impl Broker for FlappingBroker {
        fn name(&self) -> &str {
            "flapping"
        }

        async fn connect(&self) -> Result<BrokerSession, BrokerError> {
            let _ = self.connects.fetch_add(1, Ordering::SeqCst);
            let (tx, inbox) = Inbox::channel();
            drop(tx);
            Ok(BrokerSession {
                link: Arc::new(NullLink),
                inbox,
            })
        }
    }

    fn flapping_config() -> HubConfig {
        HubConfig {
            reconnect_base: Duration::from_millis(100),
            reconnect_max: Duration::from_secs(10),
            jitter: 0.0,
            ..HubConfig::default()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn flapping_link_reconnects_with_backoff() {
        let broker = Arc::new(FlappingBroker::default());
        let coordinator = Coordinator::new(Arc::clone(&broker) as Arc<dyn Broker>, flapping_config());
        let supervisor = coordinator.start();

        // Delays of 100ms then 200ms put the third connect at 300ms.
        tokio::time::sleep(Duration::from_millis(250)).await;
        assert_eq!(broker.connects.load(Ordering::SeqCst), 2);
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(broker.connects.load(Ordering::SeqCst), 3);

        supervisor.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn stop_interrupts_reconnect_delay() {
        let broker = Arc::new(FlappingBroker::default());
        let config = HubConfig {
            reconnect_base: Duration::from_secs(60),
            reconnect_max: Duration::from_secs(60),
            ..flapping_config()
        };
        let coordinator = Coordinator::new(Arc::clone(&broker) as Arc<dyn Broker>, config);
        let supervisor = coordinator.start();
        tokio::time::sleep(Duration::from_millis(10)).await;

        let started = tokio::time::Instant::now();
        supervisor.stop().await;
        assert!(started.elapsed() < Duration::from_secs(1));
        assert_eq!(broker.connects.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn zero_sweep_interval_does_not_panic() {
        let broker = roomcast_broker::MemoryBroker::new();
        let config = HubConfig {
            sweep_interval: Duration::ZERO,
            ..HubConfig::default()
        };
        let coordinator = Coordinator::new(Arc::new(broker), config);
        let supervisor = coordinator.start();
        tokio::time::sleep(Duration::from_millis(20)).await;
        supervisor.stop().await;
    }

    #[test]
    fn delay_doubles_until_cap() {
        let mut b = Backoff::new(Duration::from_millis(100), Duration::from_millis(1000), 0.0);
        let delays: Vec<_> = (0..6).map(|_| b.next_delay().as_millis()).collect();
        assert_eq!(delays, vec![100, 200, 400, 800, 1000, 1000]);
    }

    #[test]
    fn jitter_bounds() {
        let b = Backoff::new(Duration::from_millis(1000), Duration::from_secs(10), 0.2);
        assert_eq!(b.delay_with_random(0.0), Duration::from_millis(800));
        assert_eq!(b.delay_with_random(0.5), Duration::from_millis(1000));
        assert!(b.delay_with_random(0.999_999) <= Duration::from_millis(1200));
    }

    #[test]
    fn reset_returns_to_base() {
        let mut b = Backoff::new(Duration::from_millis(50), Duration::from_secs(1), 0.0);
        let _ = b.next_delay();
        let _ = b.next_delay();
        b.reset();
        assert_eq!(b.attempt(), 0);
        assert_eq!(b.next_delay(), Duration::from_millis(50));
    }

    #[test]
    fn large_attempt_does_not_overflow() {
        let mut b = Backoff::new(Duration::from_secs(1), Duration::from_secs(60), 0.0);
        for _ in 0..100 {
            let _ = b.next_delay();
        }
        assert_eq!(b.next_delay(), Duration::from_secs(60));
    }

    #[test]
    fn config_serde_uses_millis() {
        let json = serde_json::to_value(HubConfig::default()).unwrap();
        assert_eq!(json["sendTimeout"], 2000);
        assert_eq!(json["reconnectMax"], 30_000);

        let parsed: HubConfig = serde_json::from_str(r#"{"sweepInterval": 500}"#).unwrap();
        assert_eq!(parsed.sweep_interval, Duration::from_millis(500));
        assert_eq!(parsed.send_timeout, HubConfig::default().send_timeout);
    }
}
