//! Rate limiter trait for abstracting over limiting strategies.

use chrono::{DateTime, Duration, Utc};

use super::identity::Identity;
use super::window::Decision;

/// Trait for rate limiter implementations.
///
/// This trait abstracts over the two-window `RateLimiter` and the
/// `SlidingWindowLimiter` so the chat gateway, the sweeper and the CLI can
/// work with either. Checks run inside a short critical section and never
/// block on I/O, so the trait is synchronous.
pub trait RateLimiterBackend: Send + Sync {
    /// Decide whether `identity` may perform one more operation at `now`,
    /// recording the admission if so.
    fn check(&self, identity: &Identity, now: DateTime<Utc>) -> Decision;

    /// Like [`RateLimiterBackend::check`], but only reports the verdict.
    fn admit(&self, identity: &Identity, now: DateTime<Utc>) -> bool {
        self.check(identity, now).admitted
    }

    /// Forget identities that have been idle for at least `grace` past their
    /// last window. Returns the number removed.
    fn evict_idle(&self, now: DateTime<Utc>, grace: Duration) -> usize;

    /// Number of identities currently tracked.
    fn tracked(&self) -> usize;
}
