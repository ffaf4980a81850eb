//! Per-identity usage state.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

use super::identity::Identity;
use super::window::{ResetPolicy, Window};

/// Usage counters for one identity: a short burst window and a daily window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UsageRecord {
    pub(crate) short: Window,
    pub(crate) daily: Window,
}

impl UsageRecord {
    /// Create a record with both windows empty and starting at `now`.
    pub fn new(now: DateTime<Utc>, short_period: Duration, daily_period: Duration) -> Self {
        Self {
            short: Window::new(now, short_period),
            daily: Window::new(now, daily_period),
        }
    }

    /// Roll over whichever windows have expired.
    ///
    /// A daily rollover clears the short count too, but keeps the short
    /// deadline if it has not passed yet.
    pub fn roll_over(
        &mut self,
        now: DateTime<Utc>,
        short_period: Duration,
        daily_period: Duration,
        policy: ResetPolicy,
    ) {
        self.short.roll_if_due(now, short_period, policy);
        if self.daily.roll_if_due(now, daily_period, policy) {
            self.short.clear();
        }
    }

    /// Whether this record has been idle long enough to forget.
    pub fn is_idle(&self, now: DateTime<Utc>, grace: Duration) -> bool {
        self.daily
            .reset_at()
            .checked_add_signed(grace)
            .is_some_and(|idle_from| idle_from <= now)
    }

    pub fn snapshot(&self, identity: &Identity) -> UsageSnapshot {
        UsageSnapshot {
            identity: identity.clone(),
            short_window_count: self.short.count(),
            short_window_reset_at: self.short.reset_at(),
            daily_count: self.daily.count(),
            daily_reset_at: self.daily.reset_at(),
        }
    }
}

/// A point-in-time copy of a [`UsageRecord`], for diagnostics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UsageSnapshot {
    pub identity: Identity,
    pub short_window_count: u64,
    pub short_window_reset_at: DateTime<Utc>,
    pub daily_count: u64,
    pub daily_reset_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    #[test]
    fn test_daily_rollover_clears_short_count() {
        let short = Duration::seconds(60);
        let daily = Duration::seconds(600);
        let mut record = UsageRecord::new(at(0), short, daily);

        // Short window rolled at 590, so its deadline (650) outlives the daily one (600).
        record.roll_over(at(590), short, daily, ResetPolicy::Rebase);
        record.short.increment();
        record.daily.increment();

        record.roll_over(at(600), short, daily, ResetPolicy::Rebase);
        assert_eq!(record.short.count(), 0);
        assert_eq!(record.short.reset_at(), at(650));
        assert_eq!(record.daily.count(), 0);
        assert_eq!(record.daily.reset_at(), at(1200));
    }

    #[test]
    fn test_idle_after_grace() {
        let record = UsageRecord::new(at(0), Duration::seconds(60), Duration::seconds(600));

        assert!(!record.is_idle(at(600), Duration::seconds(60)));
        assert!(record.is_idle(at(660), Duration::seconds(60)));
    }

    #[test]
    fn test_record_near_max_instant_never_idle() {
        let end = DateTime::<Utc>::MAX_UTC;
        let record = UsageRecord::new(
            end - Duration::seconds(10),
            Duration::seconds(60),
            Duration::days(1),
        );

        assert_eq!(record.daily.reset_at(), end);
        assert!(!record.is_idle(end, Duration::hours(1)));
    }
}
