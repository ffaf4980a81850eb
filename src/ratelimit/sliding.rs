//! Sliding request-log limiter.
//!
//! Keeps the timestamps of recent admissions per key and allows at most
//! `max_requests` of them inside any rolling window. This is the policy the
//! request middleware applies per client address.

use std::collections::VecDeque;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use tracing::{debug, trace};

use super::backend::RateLimiterBackend;
use super::identity::Identity;
use super::window::{period_from_std, saturating_add, Decision, WindowKind, WindowStatus};
use crate::error::Result;

/// Settings for a [`SlidingWindowLimiter`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlidingWindowSettings {
    /// Maximum admissions inside any rolling window
    pub max_requests: u64,
    /// Length of the rolling window
    pub window: StdDuration,
}

impl Default for SlidingWindowSettings {
    fn default() -> Self {
        Self {
            max_requests: 100,
            window: StdDuration::from_secs(60),
        }
    }
}

/// Per-key sliding-window limiter backed by a log of admission times.
pub struct SlidingWindowLimiter {
    logs: DashMap<Identity, VecDeque<DateTime<Utc>>>,
    max_requests: u64,
    window: Duration,
}

impl SlidingWindowLimiter {
    pub fn new(settings: SlidingWindowSettings) -> Result<Self> {
        let window = period_from_std(settings.window, "window")?;
        Ok(Self {
            logs: DashMap::new(),
            max_requests: settings.max_requests,
            window,
        })
    }

    /// Check whether `identity` may make another request at `now`.
    pub fn check(&self, identity: &Identity, now: DateTime<Utc>) -> Decision {
        trace!(identity = %identity, "Checking sliding window");

        let mut log = self.logs.entry(identity.clone()).or_default();

        // Entries exactly one window old have expired.
        while log.front().is_some_and(|&t| now - t >= self.window) {
            log.pop_front();
        }

        let admitted = (log.len() as u64) < self.max_requests;
        if admitted {
            log.push_back(now);
        }

        let oldest = log.front().copied().unwrap_or(now);
        let reset_at = saturating_add(oldest, self.window);
        let decision = Decision {
            admitted,
            windows: vec![WindowStatus {
                kind: WindowKind::Sliding,
                limit: self.max_requests,
                used: log.len() as u64,
                reset_at,
            }],
        };
        drop(log);

        if !admitted {
            debug!(identity = %identity, "Sliding window limit exceeded");
        }

        decision
    }

    /// Number of admissions currently inside the window for `identity`.
    pub fn in_window(&self, identity: &Identity, now: DateTime<Utc>) -> u64 {
        self.logs
            .get(identity.as_str())
            .map(|log| log.iter().filter(|&&t| now - t < self.window).count() as u64)
            .unwrap_or(0)
    }

    /// Drop keys whose newest entry left the window at least `grace` ago.
    pub fn evict_idle(&self, now: DateTime<Utc>, grace: Duration) -> usize {
        let mut removed = 0;
        self.logs.retain(|_, log| {
            let keep = log.back().is_some_and(|&newest| {
                saturating_add(saturating_add(newest, self.window), grace) > now
            });
            if !keep {
                removed += 1;
            }
            keep
        });
        removed
    }

    pub fn tracked(&self) -> usize {
        self.logs.len()
    }
}

impl RateLimiterBackend for SlidingWindowLimiter {
    fn check(&self, identity: &Identity, now: DateTime<Utc>) -> Decision {
        SlidingWindowLimiter::check(self, identity, now)
    }

    fn evict_idle(&self, now: DateTime<Utc>, grace: Duration) -> usize {
        SlidingWindowLimiter::evict_idle(self, now, grace)
    }

    fn tracked(&self) -> usize {
        SlidingWindowLimiter::tracked(self)
    }
}
