//! Rate limiting logic and state management.

mod backend;
mod clock;
mod identity;
mod limiter;
mod record;
mod sliding;
mod sweeper;
mod window;

pub use backend::RateLimiterBackend;
pub use clock::{Clock, ManualClock, SystemClock};
pub use identity::Identity;
pub use limiter::{LimiterSettings, RateLimiter};
pub use record::{UsageRecord, UsageSnapshot};
pub use sliding::{SlidingWindowLimiter, SlidingWindowSettings};
pub use sweeper::{Sweeper, SweeperHandle, SweeperSettings};
pub use window::{
    max_span, Decision, ResetPolicy, Window, WindowKind, WindowStatus, MAX_SPAN_DAYS,
};
