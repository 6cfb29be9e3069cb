use std::time::Duration;

const NANOS_PER_SEC: i64 = 1_000_000_000;

/// Raised when a quota would limit nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("at least one of rate or burst must be greater than 0")]
pub struct QuotaError;

/// Rate limiting policy: a steady-state rate (units per second) and a burst
/// size (maximum units admissible in a single request).
///
/// A zero rate disables rate limiting (requests pass timing checks
/// instantly) and a zero burst disables the burst cap (any request size is
/// accepted). Constructing a quota with both set to zero fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Quota {
    rate: u64,
    burst: u64,
}

impl Quota {
    pub fn new(rate: u64, burst: u64) -> Result<Self, QuotaError> {
        if rate == 0 && burst == 0 {
            return Err(QuotaError);
        }
        Ok(Quota { rate, burst })
    }

    /// Units per second, 0 meaning unlimited.
    pub fn rate(&self) -> u64 {
        self.rate
    }

    /// Maximum units per request, 0 meaning uncapped.
    pub fn burst(&self) -> u64 {
        self.burst
    }

    pub fn limits_rate(&self) -> bool {
        self.rate > 0
    }

    pub fn limits_burst(&self) -> bool {
        self.burst > 0
    }

    /// Nominal time per unit of cost.
    pub fn emission_interval(&self) -> Duration {
        Duration::from_nanos(self.emission_interval_nanos() as u64)
    }

    /// The window of future credit GCRA tolerates before delaying a request.
    ///
    /// With either limit disabled there is no fixed window and this returns
    /// `Duration::MAX`; an uncapped-burst limiter instead tolerates each
    /// request's own increment, so any size passes once it has drained.
    pub fn delay_tolerance(&self) -> Duration {
        if !self.limits_rate() || !self.limits_burst() {
            return Duration::MAX;
        }
        Duration::from_nanos(self.delay_tolerance_nanos() as u64)
    }

    pub(crate) fn emission_interval_nanos(&self) -> i64 {
        if self.rate == 0 {
            return 0;
        }
        // Integer division: rates above 1e9 units/sec collapse to a zero
        // interval, which admits everything, same as an unlimited rate.
        NANOS_PER_SEC / self.rate.min(i64::MAX as u64) as i64
    }

    pub(crate) fn delay_tolerance_nanos(&self) -> i64 {
        if !self.limits_rate() || !self.limits_burst() {
            return i64::MAX;
        }
        self.emission_interval_nanos()
            .saturating_mul(self.burst.min(i64::MAX as u64) as i64)
    }
}
