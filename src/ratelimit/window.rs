//! Counting windows and admission decisions.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{QuotaError, Result};

/// How a window picks its next deadline once the current one has passed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResetPolicy {
    /// Advance the old deadline by whole periods until it lies after `now`.
    #[default]
    Anchored,
    /// Start a fresh period at `now`.
    Rebase,
}

impl ResetPolicy {
    /// Compute the deadline that follows `previous`, given that `now >= previous`.
    pub fn next_deadline(
        &self,
        previous: DateTime<Utc>,
        now: DateTime<Utc>,
        period: Duration,
    ) -> DateTime<Utc> {
        match self {
            ResetPolicy::Rebase => saturating_add(now, period),
            ResetPolicy::Anchored => {
                let period_ms = period.num_milliseconds().max(1);
                let elapsed_ms = (now - previous).num_milliseconds().max(0);
                let periods = elapsed_ms / period_ms + 1;
                period_ms
                    .checked_mul(periods)
                    .and_then(Duration::try_milliseconds)
                    .map_or(DateTime::<Utc>::MAX_UTC, |advance| {
                        saturating_add(previous, advance)
                    })
            }
        }
    }
}

/// Longest window period or idle grace, in days.
pub const MAX_SPAN_DAYS: i64 = 365 * 1000;

/// Longest window period or idle grace a limiter accepts.
///
/// Deadlines are request times plus one of these spans, so any request time
/// at least this far below `DateTime::<Utc>::MAX_UTC` yields a representable
/// deadline.
pub fn max_span() -> Duration {
    Duration::days(MAX_SPAN_DAYS)
}

/// `start + span`, saturating at the latest representable instant.
pub(crate) fn saturating_add(start: DateTime<Utc>, span: Duration) -> DateTime<Utc> {
    start
        .checked_add_signed(span)
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// Convert a configured duration, rejecting spans longer than [`max_span`].
pub(crate) fn span_from_std(duration: std::time::Duration, name: &str) -> Result<Duration> {
    let span = Duration::from_std(duration).map_err(|e| {
        QuotaError::Config(format!("{} of {:?} is out of range: {}", name, duration, e))
    })?;

    if span > max_span() {
        return Err(QuotaError::Config(format!(
            "{} of {:?} exceeds the maximum of {} days",
            name, duration, MAX_SPAN_DAYS
        )));
    }

    Ok(span)
}

/// Convert a configured duration into a window period.
///
/// Periods must be at least one millisecond long.
pub(crate) fn period_from_std(duration: std::time::Duration, name: &str) -> Result<Duration> {
    let period = span_from_std(duration, name)?;

    if period.num_milliseconds() < 1 {
        return Err(QuotaError::Config(format!(
            "{} must be at least 1ms, got {:?}",
            name, duration
        )));
    }

    Ok(period)
}

/// A fixed counting window: a count plus the instant at which it resets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Window {
    count: u64,
    reset_at: DateTime<Utc>,
}

impl Window {
    /// Open an empty window that resets one period after `now`.
    pub fn new(now: DateTime<Utc>, period: Duration) -> Self {
        Self {
            count: 0,
            reset_at: saturating_add(now, period),
        }
    }

    /// Number of admissions recorded in this window.
    pub fn count(&self) -> u64 {
        self.count
    }

    /// When the window resets.
    pub fn reset_at(&self) -> DateTime<Utc> {
        self.reset_at
    }

    /// A request arriving exactly at the deadline belongs to the next window.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        now >= self.reset_at
    }

    /// Roll the window over if its deadline has passed.
    ///
    /// Returns `true` if a rollover happened.
    pub fn roll_if_due(&mut self, now: DateTime<Utc>, period: Duration, policy: ResetPolicy) -> bool {
        if !self.is_due(now) {
            return false;
        }
        self.count = 0;
        self.reset_at = policy.next_deadline(self.reset_at, now, period);
        true
    }

    /// Zero the count, keeping the deadline.
    pub fn clear(&mut self) {
        self.count = 0;
    }

    pub fn is_exhausted(&self, limit: u64) -> bool {
        self.count >= limit
    }

    pub fn increment(&mut self) {
        self.count += 1;
    }

    pub(crate) fn status(&self, kind: WindowKind, limit: u64) -> WindowStatus {
        WindowStatus {
            kind,
            limit,
            used: self.count,
            reset_at: self.reset_at,
        }
    }
}

/// Which window a status line describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WindowKind {
    /// Minute-scale burst window
    Short,
    /// Day-scale allowance
    Daily,
    /// Rolling request log
    Sliding,
}

/// State of a single window as seen by one admission decision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WindowStatus {
    pub kind: WindowKind,
    pub limit: u64,
    pub used: u64,
    pub reset_at: DateTime<Utc>,
}

impl WindowStatus {
    pub fn remaining(&self) -> u64 {
        self.limit.saturating_sub(self.used)
    }

    pub fn is_exhausted(&self) -> bool {
        self.used >= self.limit
    }
}

/// The outcome of a single admission check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Decision {
    /// Whether the operation may proceed (and was counted)
    pub admitted: bool,
    /// Window states after the decision was applied
    pub windows: Vec<WindowStatus>,
}

impl Decision {
    /// Look up the status of one window.
    pub fn window(&self, kind: WindowKind) -> Option<&WindowStatus> {
        self.windows.iter().find(|w| w.kind == kind)
    }

    /// Smallest remaining allowance across all windows.
    pub fn remaining(&self) -> u64 {
        self.windows
            .iter()
            .map(WindowStatus::remaining)
            .min()
            .unwrap_or(0)
    }

    /// How long the caller has to wait before a retry can succeed.
    ///
    /// Every exhausted window must reset, so this is measured to the latest
    /// of their deadlines. `None` for admitted decisions.
    pub fn retry_after(&self, now: DateTime<Utc>) -> Option<Duration> {
        if self.admitted {
            return None;
        }

        self.windows
            .iter()
            .filter(|w| w.is_exhausted())
            .map(|w| w.reset_at)
            .max()
            .map(|reset_at| (reset_at - now).max(Duration::zero()))
    }

    /// [`Decision::retry_after`] rounded up to whole seconds.
    pub fn retry_after_secs(&self, now: DateTime<Utc>) -> Option<u64> {
        self.retry_after(now).map(|wait| {
            let millis = wait.num_milliseconds().max(0) as u64;
            millis.div_ceil(1000)
        })
    }
}
