//! Replay of recorded request logs through a limiter.
//!
//! Each input line names an identity and, optionally, the time of the
//! request (RFC 3339 or unix seconds):
//!
//! ```text
//! # identity  timestamp
//! u1          2024-05-01T12:00:00Z
//! u1          1714564860
//! u2
//! ```
//!
//! Lines without a timestamp are stamped with the wall clock.

use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};
use serde::Serialize;
use tracing::{debug, warn};

use crate::error::{QuotaError, Result};
use crate::ratelimit::{
    max_span, Clock, Identity, ManualClock, RateLimiterBackend, WindowStatus,
};

/// One parsed request line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplayLine {
    pub identity: Identity,
    pub at: Option<DateTime<Utc>>,
}

/// Parse a request line. Blank lines and `#` comments yield `None`.
pub fn parse_line(raw: &str) -> Result<Option<ReplayLine>> {
    let line = raw.trim();
    if line.is_empty() || line.starts_with('#') {
        return Ok(None);
    }

    let mut fields = line.split_whitespace();
    let identity = match fields.next() {
        Some(key) => Identity::new(key)?,
        None => return Ok(None),
    };
    let at = fields.next().map(parse_timestamp).transpose()?;

    if fields.next().is_some() {
        return Err(QuotaError::Input(format!(
            "expected `<identity> [timestamp]`, got {:?}",
            line
        )));
    }

    Ok(Some(ReplayLine { identity, at }))
}

/// Parse a timestamp, rejecting instants so late that a window opened at
/// them would end past the last representable time.
fn parse_timestamp(field: &str) -> Result<DateTime<Utc>> {
    let at = match field.parse::<i64>() {
        Ok(secs) => Utc
            .timestamp_opt(secs, 0)
            .single()
            .ok_or_else(|| QuotaError::Input(format!("timestamp out of range: {}", secs)))?,
        Err(_) => DateTime::parse_from_rfc3339(field)
            .map(|t| t.with_timezone(&Utc))
            .map_err(|e| QuotaError::Input(format!("invalid timestamp {:?}: {}", field, e)))?,
    };

    if at.checked_add_signed(max_span()).is_none() {
        return Err(QuotaError::Input(format!("timestamp too far in the future: {}", field)));
    }

    Ok(at)
}

/// The decision for one replayed request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReplayOutcome {
    pub identity: Identity,
    pub at: DateTime<Utc>,
    pub admitted: bool,
    pub retry_after_secs: Option<u64>,
    pub windows: Vec<WindowStatus>,
}

/// Totals over a replay run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReplaySummary {
    pub admitted: u64,
    pub rejected: u64,
    pub malformed: u64,
}

/// Feeds request lines to a limiter, tracking replay time on a manual clock.
///
/// The clock follows the latest request time seen, so a sweeper sharing it
/// evicts records against the log's timeline rather than the wall clock.
pub struct Replayer {
    limiter: Arc<dyn RateLimiterBackend>,
    clock: Arc<ManualClock>,
    summary: ReplaySummary,
}

impl Replayer {
    pub fn new(limiter: Arc<dyn RateLimiterBackend>) -> Self {
        Self {
            limiter,
            clock: Arc::new(ManualClock::new(Utc::now())),
            summary: ReplaySummary::default(),
        }
    }

    /// The replay's clock.
    pub fn clock(&self) -> Arc<ManualClock> {
        self.clock.clone()
    }

    /// Process one raw line. Returns `None` for skipped or malformed lines.
    pub fn process(&mut self, raw: &str) -> Option<ReplayOutcome> {
        let line = match parse_line(raw) {
            Ok(Some(line)) => line,
            Ok(None) => return None,
            Err(e) => {
                warn!(error = %e, "Skipping malformed line");
                self.summary.malformed += 1;
                return None;
            }
        };

        let at = line.at.unwrap_or_else(Utc::now);
        if at > self.clock.now() {
            self.clock.set(at);
        }

        let decision = self.limiter.check(&line.identity, at);
        if decision.admitted {
            self.summary.admitted += 1;
        } else {
            self.summary.rejected += 1;
        }

        debug!(
            identity = %line.identity,
            admitted = decision.admitted,
            "Replayed request"
        );

        Some(ReplayOutcome {
            retry_after_secs: decision.retry_after_secs(at),
            identity: line.identity,
            at,
            admitted: decision.admitted,
            windows: decision.windows,
        })
    }

    pub fn summary(&self) -> ReplaySummary {
        self.summary
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ratelimit::{LimiterSettings, RateLimiter};

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    #[test]
    fn test_parse_line_variants() {
        assert_eq!(parse_line("").unwrap(), None);
        assert_eq!(parse_line("   # comment").unwrap(), None);

        let line = parse_line("u1").unwrap().unwrap();
        assert_eq!(line.identity.as_str(), "u1");
        assert_eq!(line.at, None);

        let line = parse_line("u1 1700000000").unwrap().unwrap();
        assert_eq!(line.at, Some(at(1_700_000_000)));

        let line = parse_line("u1\t2023-11-14T22:13:20Z").unwrap().unwrap();
        assert_eq!(line.at, Some(at(1_700_000_000)));
    }

    #[test]
    fn test_parse_line_errors() {
        assert!(matches!(parse_line("u1 yesterday"), Err(QuotaError::Input(_))));
        assert!(matches!(parse_line("u1 1 2"), Err(QuotaError::Input(_))));

        let last = format!("u1 {}", DateTime::<Utc>::MAX_UTC.timestamp());
        assert!(matches!(parse_line(&last), Err(QuotaError::Input(_))));
    }

    #[test]
    fn test_replay_skips_unrepresentable_timestamps() {
        let limiter = Arc::new(RateLimiter::new(LimiterSettings::default()).unwrap());
        let mut replayer = Replayer::new(limiter.clone());
        let clock = replayer.clock();
        let before = clock.now();

        let line = format!("u1 {}", DateTime::<Utc>::MAX_UTC.timestamp());
        assert!(replayer.process(&line).is_none());
        assert_eq!(replayer.summary().malformed, 1);
        assert_eq!(clock.now(), before);
        assert_eq!(limiter.tracked(), 0);

        // The latest accepted instant still leaves room for the longest window.
        let edge = DateTime::<Utc>::MAX_UTC - max_span();
        let outcome = replayer.process(&format!("u1 {}", edge.timestamp())).unwrap();
        assert!(outcome.admitted);
    }

    #[test]
    fn test_replay_counts_decisions() {
        let limiter = Arc::new(
            RateLimiter::new(LimiterSettings {
                short_window_limit: 2,
                ..LimiterSettings::default()
            })
            .unwrap(),
        );
        let mut replayer = Replayer::new(limiter);

        let outcomes: Vec<_> = [
            "u1 1700000000",
            "u1 1700000001",
            "# throttled",
            "u1 1700000002",
            "u1 not-a-time",
            "u1 1700000060",
        ]
        .iter()
        .filter_map(|line| replayer.process(line))
        .collect();

        let admitted: Vec<bool> = outcomes.iter().map(|o| o.admitted).collect();
        assert_eq!(admitted, vec![true, true, false, true]);
        assert_eq!(outcomes[2].retry_after_secs, Some(58));
        assert_eq!(
            replayer.summary(),
            ReplaySummary {
                admitted: 3,
                rejected: 1,
                malformed: 1,
            }
        );
    }

    #[test]
    fn test_replay_clock_follows_latest_request() {
        let limiter = Arc::new(RateLimiter::new(LimiterSettings::default()).unwrap());
        let mut replayer = Replayer::new(limiter);
        let clock = replayer.clock();

        let far_future = Utc::now() + chrono::Duration::days(365);
        let line = format!("u1 {}", far_future.timestamp());
        replayer.process(&line);
        assert_eq!(clock.now().timestamp(), far_future.timestamp());

        // Older timestamps do not move the clock backwards.
        replayer.process("u1 1700000000");
        assert_eq!(clock.now().timestamp(), far_future.timestamp());
    }

    #[test]
    fn test_outcome_serializes() {
        let limiter = Arc::new(RateLimiter::new(LimiterSettings::default()).unwrap());
        let mut replayer = Replayer::new(limiter);

        let outcome = replayer.process("u1 1700000000").unwrap();
        let json = serde_json::to_value(&outcome).unwrap();
        assert_eq!(json["identity"], "u1");
        assert_eq!(json["admitted"], true);
        assert_eq!(json["windows"][0]["kind"], "short");
        assert_eq!(json["windows"][1]["kind"], "daily");
    }
}
