//! GCRA (Generic Cell Rate Algorithm) rate limiter.
//!
//! The limiter tracks a single "theoretical arrival time" (TAT) in an atomic
//! counter and admits a request of cost `n` when admitting it would not push
//! the TAT more than the configured delay tolerance into the future. This
//! gives smooth, nanosecond-precision rate limiting with burst support and a
//! lock-free hot path.
//!
//! Time is abstracted behind the [`Clock`] trait so that the same limiter can
//! run against the monotonic system clock in production and against a
//! manually advanced [`MockClock`] in tests.
//!
//! ```
//! use std::sync::Arc;
//! use throttle::{Quota, RateLimiter, SystemClock, Outcome};
//!
//! // 1 MiB/s with a 64 KiB burst.
//! let quota = Quota::new(1 << 20, 64 << 10).unwrap();
//! let limiter = RateLimiter::new(quota, Arc::new(SystemClock));
//! assert!(matches!(limiter.try_acquire_immediate(4096), Outcome::Admitted));
//! ```

#[macro_use]
extern crate lazy_static;

mod clock;
mod limiter;
mod quota;

pub use clock::{Clock, MockClock, SystemClock, TimePoint};
pub use limiter::{AcquireResult, Outcome, RateLimiter, SharedRateLimiter, WaitInfo};
pub use quota::{Quota, QuotaError};
