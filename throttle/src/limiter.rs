use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tracing::trace;

use crate::clock::{Clock, TimePoint};
use crate::quota::Quota;

/// The limiter's only mutable state: the theoretical arrival time (TAT) in
/// nanoseconds since the clock's epoch.
///
/// The TAT only moves forward, and only when an admission succeeds. A
/// request that would need to wait never publishes a new value, so pending
/// callers reserve no capacity.
#[derive(Debug)]
struct LimiterState {
    tat_nanos: AtomicI64,
}

impl LimiterState {
    fn new() -> Self {
        LimiterState {
            tat_nanos: AtomicI64::new(0),
        }
    }

    fn load(&self) -> i64 {
        self.tat_nanos.load(Ordering::Acquire)
    }

    fn compare_exchange(&self, current: i64, new: i64) -> Result<i64, i64> {
        self.tat_nanos
            .compare_exchange_weak(current, new, Ordering::Release, Ordering::Relaxed)
    }
}

/// When a delayed request becomes admissible.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaitInfo {
    /// Time point at which the request can be retried.
    pub ready_at: TimePoint,
    /// Duration to wait from now.
    pub wait: Duration,
}

/// Result of a non-blocking admission attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// The request may proceed immediately.
    Admitted,
    /// The request must wait for capacity.
    Wait(WaitInfo),
    /// The request is larger than the burst and can never be admitted.
    Exceeds,
}

impl Outcome {
    pub fn is_admitted(&self) -> bool {
        matches!(self, Outcome::Admitted)
    }
}

/// Result of a blocking acquisition. Waiting is handled internally, so only
/// the terminal states remain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquireResult {
    Admitted,
    Exceeds,
}

/// Thread-safe GCRA rate limiter.
///
/// Admission of a cost-`n` request advances the TAT by `n` emission
/// intervals; the request is admissible when the advanced TAT stays within
/// the delay tolerance of the current time. The update is a CAS on a single
/// atomic, so concurrent admissions linearize to the CAS success order
/// without locks.
///
/// See <https://en.wikipedia.org/wiki/Generic_cell_rate_algorithm>.
#[derive(Debug)]
pub struct RateLimiter {
    quota: Quota,
    clock: Arc<dyn Clock>,
    state: LimiterState,
}

/// Shared handle to a limiter. Callers that fetched the handle before a
/// reconfiguration keep using it until their call returns.
pub type SharedRateLimiter = Arc<RateLimiter>;

impl RateLimiter {
    pub fn new(quota: Quota, clock: Arc<dyn Clock>) -> Self {
        RateLimiter {
            quota,
            clock,
            state: LimiterState::new(),
        }
    }

    pub fn shared(quota: Quota, clock: Arc<dyn Clock>) -> SharedRateLimiter {
        Arc::new(RateLimiter::new(quota, clock))
    }

    pub fn quota(&self) -> &Quota {
        &self.quota
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// One admission attempt for `n` units, without waiting.
    ///
    /// A cost of zero is always admitted and never touches state. A `Wait`
    /// outcome does not touch state either: sleeping for the reported
    /// duration and retrying will succeed on an otherwise idle limiter.
    pub fn try_acquire_immediate(&self, n: u64) -> Outcome {
        if n == 0 {
            return Outcome::Admitted;
        }
        if self.quota.limits_burst() && n > self.quota.burst() {
            return Outcome::Exceeds;
        }
        if !self.quota.limits_rate() {
            return Outcome::Admitted;
        }
        match self.attempt(self.clock.now(), n) {
            Ok(()) => Outcome::Admitted,
            Err(wait) => Outcome::Wait(wait),
        }
    }

    /// Acquire `n` units, sleeping on the limiter's clock until capacity is
    /// available. Only a request larger than the burst fails.
    pub fn acquire_blocking(&self, n: u64) -> AcquireResult {
        if n == 0 {
            return AcquireResult::Admitted;
        }
        if self.quota.limits_burst() && n > self.quota.burst() {
            return AcquireResult::Exceeds;
        }
        if !self.quota.limits_rate() {
            return AcquireResult::Admitted;
        }
        loop {
            match self.attempt(self.clock.now(), n) {
                Ok(()) => return AcquireResult::Admitted,
                Err(wait) => {
                    trace!("acquire of {} units delayed {:?}", n, wait.wait);
                    self.clock.sleep_until(wait.ready_at);
                }
            }
        }
    }

    // One GCRA admission attempt at time `now`. Publishes the advanced TAT
    // only on success; a CAS loss reloads the TAT and retries locally.
    fn attempt(&self, now: TimePoint, n: u64) -> Result<(), WaitInfo> {
        let now_nanos = now.as_nanos();
        let increment = self
            .quota
            .emission_interval_nanos()
            .saturating_mul(n.min(i64::MAX as u64) as i64);
        // With no burst cap any request size is accepted, but only once the
        // limiter has drained back to the present: the tolerance window is
        // the request's own increment.
        let tolerance = if self.quota.limits_burst() {
            self.quota.delay_tolerance_nanos()
        } else {
            increment
        };

        let mut tat = self.state.load();
        loop {
            // max() clamps clock regressions so the TAT never moves backwards
            let new_tat = tat.max(now_nanos).saturating_add(increment);
            let earliest = new_tat.saturating_sub(tolerance);
            if earliest > now_nanos {
                return Err(WaitInfo {
                    ready_at: TimePoint::from_nanos(earliest),
                    wait: Duration::from_nanos((earliest - now_nanos) as u64),
                });
            }
            match self.state.compare_exchange(tat, new_tat) {
                Ok(_) => return Ok(()),
                Err(current) => tat = current,
            }
        }
    }

    #[cfg(test)]
    fn tat_nanos(&self) -> i64 {
        self.state.load()
    }
}
