//! Background eviction of idle usage records.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::backend::RateLimiterBackend;
use super::clock::Clock;
use super::window::span_from_std;
use crate::error::Result;

/// Configuration for the idle-record sweeper.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SweeperSettings {
    /// How often to sweep
    pub interval: Duration,
    /// How long past its last window a record must sit before it is dropped
    pub idle_grace: chrono::Duration,
}

impl SweeperSettings {
    /// Build settings from whole seconds.
    ///
    /// Fails if the grace is longer than [`max_span`](super::max_span).
    pub fn from_secs(interval_secs: u64, idle_grace_secs: u64) -> Result<Self> {
        Ok(Self {
            interval: Duration::from_secs(interval_secs),
            idle_grace: span_from_std(Duration::from_secs(idle_grace_secs), "idle_grace")?,
        })
    }
}

impl Default for SweeperSettings {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(300),
            idle_grace: chrono::Duration::hours(1),
        }
    }
}

/// Periodically removes identities that have gone quiet, keeping the
/// limiter's memory proportional to recently active users.
pub struct Sweeper;

impl Sweeper {
    /// Start sweeping `limiter` on the current tokio runtime.
    pub fn spawn(
        limiter: Arc<dyn RateLimiterBackend>,
        clock: Arc<dyn Clock>,
        settings: SweeperSettings,
    ) -> SweeperHandle {
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let grace = settings.idle_grace;

        info!(
            interval = ?settings.interval,
            idle_grace = ?settings.idle_grace,
            "Starting idle record sweeper"
        );

        let task = tokio::spawn(async move {
            let period = settings.interval.max(Duration::from_millis(1));
            let mut ticker = tokio::time::interval(period);
            // The first tick completes immediately.
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let removed = limiter.evict_idle(clock.now(), grace);
                        if removed > 0 {
                            info!(
                                removed = removed,
                                remaining = limiter.tracked(),
                                "Evicted idle usage records"
                            );
                        } else {
                            debug!(remaining = limiter.tracked(), "Sweep found no idle records");
                        }
                    }
                    _ = shutdown_rx.changed() => {
                        debug!("Sweeper received shutdown");
                        break;
                    }
                }
            }
        });

        SweeperHandle {
            shutdown: shutdown_tx,
            task,
        }
    }
}

/// Handle to a running sweeper.
pub struct SweeperHandle {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl SweeperHandle {
    /// Stop the sweeper and wait for its task to finish.
    pub async fn shutdown(self) {
        if self.shutdown.send(true).is_err() {
            warn!("Idle record sweeper exited before shutdown was requested");
        }

        match self.task.await {
            Ok(()) => info!("Idle record sweeper stopped"),
            Err(e) if e.is_panic() => {
                error!(error = %e, "Idle record sweeper panicked, idle records were not evicted")
            }
            Err(e) => warn!(error = %e, "Idle record sweeper was cancelled"),
        }
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ratelimit::{Decision, Identity, LimiterSettings, ManualClock, RateLimiter};
    use chrono::{DateTime, TimeZone, Utc};

    /// Backend whose eviction always fails.
    struct BrokenEviction;

    impl RateLimiterBackend for BrokenEviction {
        fn check(&self, _identity: &Identity, _now: DateTime<Utc>) -> Decision {
            Decision {
                admitted: true,
                windows: Vec::new(),
            }
        }

        fn evict_idle(&self, _now: DateTime<Utc>, _grace: chrono::Duration) -> usize {
            panic!("eviction failed");
        }

        fn tracked(&self) -> usize {
            0
        }
    }

    #[tokio::test]
    async fn test_sweeper_evicts_idle_records() {
        let start = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
        let clock = Arc::new(ManualClock::new(start));
        let limiter = Arc::new(RateLimiter::new(LimiterSettings::default()).unwrap());

        limiter.admit(&Identity::new("u1").unwrap(), start);
        limiter.admit(&Identity::new("u2").unwrap(), start);
        assert_eq!(limiter.tracked(), 2);

        let handle = Sweeper::spawn(
            limiter.clone(),
            clock.clone(),
            SweeperSettings {
                interval: Duration::from_millis(10),
                idle_grace: chrono::Duration::seconds(60),
            },
        );

        // Nothing is idle yet.
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(limiter.tracked(), 2);

        clock.advance(chrono::Duration::days(1) + chrono::Duration::seconds(60));
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(limiter.tracked(), 0);

        handle.shutdown().await;
    }

    #[tokio::test]
    async fn test_sweeper_shutdown() {
        let limiter = Arc::new(RateLimiter::new(LimiterSettings::default()).unwrap());
        let handle = Sweeper::spawn(
            limiter,
            Arc::new(crate::ratelimit::SystemClock),
            SweeperSettings::default(),
        );

        assert!(!handle.is_finished());
        tokio::time::timeout(Duration::from_secs(1), handle.shutdown())
            .await
            .expect("sweeper should stop promptly");
    }

    #[tokio::test]
    async fn test_shutdown_after_sweeper_panicked() {
        let handle = Sweeper::spawn(
            Arc::new(BrokenEviction),
            Arc::new(crate::ratelimit::SystemClock),
            SweeperSettings {
                interval: Duration::from_millis(10),
                ..SweeperSettings::default()
            },
        );

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(handle.is_finished());

        tokio::time::timeout(Duration::from_secs(1), handle.shutdown())
            .await
            .expect("shutdown should complete after the task panicked");
    }

    #[test]
    fn test_settings_from_secs() {
        let settings = SweeperSettings::from_secs(300, 3600).unwrap();
        assert_eq!(settings, SweeperSettings::default());

        assert!(SweeperSettings::from_secs(300, 0).is_ok());
        assert!(matches!(
            SweeperSettings::from_secs(300, 10_000_000_000_000),
            Err(crate::error::QuotaError::Config(_))
        ));
    }
}
