use std::fmt;
use std::ops::{Add, Sub};
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::{Duration, Instant};

lazy_static! {
    // Anchor for SystemClock. All TimePoints produced by SystemClock are
    // nanoseconds elapsed since the first use of the clock in this process.
    static ref CLOCK_EPOCH: Instant = Instant::now();
}

/// A monotonic instant, stored as nanoseconds since the owning clock's epoch.
///
/// Signed 64-bit nanoseconds cover roughly 292 years of monotonic operation,
/// which is plenty for a process-lifetime clock.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TimePoint(i64);

impl TimePoint {
    pub const EPOCH: TimePoint = TimePoint(0);
    pub const MAX: TimePoint = TimePoint(i64::MAX);

    pub const fn from_nanos(nanos: i64) -> Self {
        TimePoint(nanos)
    }

    pub const fn as_nanos(self) -> i64 {
        self.0
    }

    /// Time elapsed since `earlier`, saturating to zero if `earlier` is in
    /// the future.
    pub fn duration_since(self, earlier: TimePoint) -> Duration {
        if self.0 <= earlier.0 {
            return Duration::ZERO;
        }
        Duration::from_nanos((self.0 - earlier.0) as u64)
    }

    pub fn saturating_add(self, duration: Duration) -> Self {
        let nanos = duration.as_nanos().min(i64::MAX as u128) as i64;
        TimePoint(self.0.saturating_add(nanos))
    }
}

impl Add<Duration> for TimePoint {
    type Output = TimePoint;

    fn add(self, duration: Duration) -> TimePoint {
        self.saturating_add(duration)
    }
}

impl Sub<TimePoint> for TimePoint {
    type Output = Duration;

    fn sub(self, earlier: TimePoint) -> Duration {
        self.duration_since(earlier)
    }
}

impl fmt::Display for TimePoint {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}ns", self.0)
    }
}

/// Virtualized time source used by the rate limiter.
///
/// `sleep_until` is the limiter's only suspension point, so swapping the
/// clock swaps the blocking behavior: the system clock parks the calling
/// thread, the mock clock just moves its stored time forward.
pub trait Clock: fmt::Debug + Send + Sync {
    fn now(&self) -> TimePoint;

    fn sleep_for(&self, duration: Duration);

    fn sleep_until(&self, deadline: TimePoint);
}

/// Monotonic wall clock. Sleeping parks the OS thread.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> TimePoint {
        let elapsed = CLOCK_EPOCH.elapsed().as_nanos();
        TimePoint::from_nanos(elapsed.min(i64::MAX as u128) as i64)
    }

    fn sleep_for(&self, duration: Duration) {
        std::thread::sleep(duration);
    }

    fn sleep_until(&self, deadline: TimePoint) {
        let now = self.now();
        if deadline > now {
            std::thread::sleep(deadline.duration_since(now));
        }
    }
}

/// Manually driven clock for tests.
///
/// Sleeping advances the stored time instead of suspending the caller, so
/// blocking acquisition can be exercised without real waiting. The stored
/// time is atomic only so the clock can be shared as `Arc<dyn Clock>`;
/// intended for single-threaded test scenarios.
#[derive(Debug, Default)]
pub struct MockClock {
    now_nanos: AtomicI64,
}

impl MockClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn starting_at(start: TimePoint) -> Self {
        MockClock {
            now_nanos: AtomicI64::new(start.as_nanos()),
        }
    }

    pub fn advance(&self, duration: Duration) {
        let nanos = duration.as_nanos().min(i64::MAX as u128) as i64;
        self.now_nanos.fetch_add(nanos, Ordering::Relaxed);
    }

    pub fn set(&self, time: TimePoint) {
        self.now_nanos.store(time.as_nanos(), Ordering::Relaxed);
    }
}

impl Clock for MockClock {
    fn now(&self) -> TimePoint {
        TimePoint::from_nanos(self.now_nanos.load(Ordering::Relaxed))
    }

    fn sleep_for(&self, duration: Duration) {
        self.advance(duration);
    }

    fn sleep_until(&self, deadline: TimePoint) {
        // Never move time backwards.
        self.now_nanos
            .fetch_max(deadline.as_nanos(), Ordering::Relaxed);
    }
}
