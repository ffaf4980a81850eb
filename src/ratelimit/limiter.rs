//! Core rate limiter implementation.

use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use tracing::{debug, trace, warn};

use super::backend::RateLimiterBackend;
use super::identity::Identity;
use super::record::{UsageRecord, UsageSnapshot};
use super::window::{period_from_std, Decision, ResetPolicy, WindowKind};
use crate::error::Result;

/// Default number of admissions per short window.
const DEFAULT_SHORT_WINDOW_LIMIT: u64 = 60;
/// Default short window length.
const DEFAULT_SHORT_WINDOW: StdDuration = StdDuration::from_secs(60);
/// Default number of admissions per day.
const DEFAULT_DAILY_LIMIT: u64 = 250;
/// Default daily window length.
const DEFAULT_DAILY_WINDOW: StdDuration = StdDuration::from_secs(24 * 60 * 60);

/// Limits and window lengths for a [`RateLimiter`].
///
/// A limit of zero is accepted and rejects every request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LimiterSettings {
    /// Maximum admissions within one short window
    pub short_window_limit: u64,
    /// Length of the short window
    pub short_window: StdDuration,
    /// Maximum admissions within one daily window
    pub daily_limit: u64,
    /// Length of the daily window
    pub daily_window: StdDuration,
    /// How expired windows pick their next deadline
    pub reset_policy: ResetPolicy,
}

impl Default for LimiterSettings {
    fn default() -> Self {
        Self {
            short_window_limit: DEFAULT_SHORT_WINDOW_LIMIT,
            short_window: DEFAULT_SHORT_WINDOW,
            daily_limit: DEFAULT_DAILY_LIMIT,
            daily_window: DEFAULT_DAILY_WINDOW,
            reset_policy: ResetPolicy::default(),
        }
    }
}

/// Per-identity admission control with a short burst window and a daily window.
///
/// Records are created lazily on first use. Each check runs under the
/// record's exclusive lock, so concurrent callers for the same identity never
/// both see stale counts. The limiter is thread-safe and meant to be shared
/// behind an `Arc` for the lifetime of the process.
pub struct RateLimiter {
    /// Usage records indexed by identity
    records: DashMap<Identity, UsageRecord>,
    settings: LimiterSettings,
    short_period: Duration,
    daily_period: Duration,
}

impl RateLimiter {
    /// Create a new rate limiter, validating the settings up front.
    pub fn new(settings: LimiterSettings) -> Result<Self> {
        let short_period = period_from_std(settings.short_window, "short_window")?;
        let daily_period = period_from_std(settings.daily_window, "daily_window")?;

        if short_period > daily_period {
            warn!(
                short_window = ?settings.short_window,
                daily_window = ?settings.daily_window,
                "Short window is longer than the daily window"
            );
        }

        Ok(Self {
            records: DashMap::new(),
            settings,
            short_period,
            daily_period,
        })
    }

    /// Check whether `identity` may perform an operation at `now`.
    ///
    /// Returns `true` and records the admission, or returns `false` and leaves
    /// the counts untouched.
    pub fn admit(&self, identity: &Identity, now: DateTime<Utc>) -> bool {
        self.check(identity, now).admitted
    }

    /// Like [`RateLimiter::admit`], but reports the state of both windows.
    pub fn check(&self, identity: &Identity, now: DateTime<Utc>) -> Decision {
        trace!(identity = %identity, "Checking rate limit");

        let decision = {
            let mut record = self.records.entry(identity.clone()).or_insert_with(|| {
                debug!(
                    identity = %identity,
                    short_limit = self.settings.short_window_limit,
                    daily_limit = self.settings.daily_limit,
                    "Creating new usage record"
                );
                UsageRecord::new(now, self.short_period, self.daily_period)
            });

            record.roll_over(
                now,
                self.short_period,
                self.daily_period,
                self.settings.reset_policy,
            );

            let admitted = !record.short.is_exhausted(self.settings.short_window_limit)
                && !record.daily.is_exhausted(self.settings.daily_limit);

            if admitted {
                record.short.increment();
                record.daily.increment();
            }

            Decision {
                admitted,
                windows: vec![
                    record
                        .short
                        .status(WindowKind::Short, self.settings.short_window_limit),
                    record
                        .daily
                        .status(WindowKind::Daily, self.settings.daily_limit),
                ],
            }
        };

        if !decision.admitted {
            debug!(
                identity = %identity,
                retry_after = ?decision.retry_after(now),
                "Rate limit exceeded"
            );
        }

        decision
    }

    /// Get a copy of the usage record for `identity`.
    ///
    /// The copy reflects the last decision; expired windows are not rolled
    /// over by reading. Returns `None` if the identity has never been seen.
    pub fn usage(&self, identity: &Identity) -> Option<UsageSnapshot> {
        self.records
            .get(identity.as_str())
            .map(|record| record.snapshot(identity))
    }

    /// Remove records whose daily window ended at least `grace` ago.
    pub fn evict_idle(&self, now: DateTime<Utc>, grace: Duration) -> usize {
        let mut removed = 0;
        self.records.retain(|_, record| {
            let keep = !record.is_idle(now, grace);
            if !keep {
                removed += 1;
            }
            keep
        });
        removed
    }

    /// Get the number of tracked identities.
    pub fn tracked(&self) -> usize {
        self.records.len()
    }

    /// Clear all records.
    pub fn clear(&self) {
        self.records.clear();
    }

    pub fn settings(&self) -> &LimiterSettings {
        &self.settings
    }
}

impl RateLimiterBackend for RateLimiter {
    fn check(&self, identity: &Identity, now: DateTime<Utc>) -> Decision {
        RateLimiter::check(self, identity, now)
    }

    fn evict_idle(&self, now: DateTime<Utc>, grace: Duration) -> usize {
        RateLimiter::evict_idle(self, now, grace)
    }

    fn tracked(&self) -> usize {
        RateLimiter::tracked(self)
    }
}
