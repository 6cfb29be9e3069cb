use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, Mutex, PoisonError};

use serde::{Deserialize, Serialize};
use throttle::{Clock, Quota, RateLimiter, SharedRateLimiter, SystemClock};
use tracing::debug;

use crate::errors::{Error, Result};
use crate::operation::OperationClass;

/// What happens when a request cannot be admitted immediately.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    /// Wait until the limiter allows the operation to proceed.
    Blocking,
    /// Fail immediately instead of waiting.
    NonBlocking,
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Mode::Blocking => f.write_str("blocking"),
            Mode::NonBlocking => f.write_str("non_blocking"),
        }
    }
}

impl FromStr for Mode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "blocking" | "block" => Ok(Mode::Blocking),
            "non_blocking" | "non-blocking" | "nonblocking" => Ok(Mode::NonBlocking),
            _ => Err(Error::invalid_config(format!(
                "invalid rate limit mode '{}': use 'blocking' or 'non_blocking'",
                s
            ))),
        }
    }
}

/// Declared policy for one (backend, operation) key, as seen by callers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationConfig {
    pub backend: String,
    pub operation: OperationClass,
    pub quota: u64,
    pub mode: Mode,
    pub burst: u64,
}

#[derive(Debug, Clone)]
struct Entry {
    quota: u64,
    mode: Mode,
    burst: u64,
    limiter: Option<SharedRateLimiter>,
}

impl Entry {
    // Rebuild the limiter from the declared policy. An entry with nothing
    // left to limit loses its limiter (and is erased by the caller).
    fn rebuild(&mut self, clock: &Arc<dyn Clock>) {
        self.limiter = Quota::new(self.quota, self.burst)
            .ok()
            .map(|quota| RateLimiter::shared(quota, Arc::clone(clock)));
    }
}

#[derive(Debug)]
struct ConfigState {
    entries: HashMap<(String, OperationClass), Entry>,
    clock: Arc<dyn Clock>,
}

impl ConfigState {
    // Insert-or-update one entry. A key left with neither quota nor burst
    // is erased; anything else gets a freshly built limiter.
    fn apply(&mut self, backend: &str, operation: OperationClass, f: impl FnOnce(&mut Entry)) {
        let key = (backend.to_string(), operation);
        let mut entry = self.entries.remove(&key).unwrap_or(Entry {
            quota: 0,
            mode: Mode::Blocking,
            burst: 0,
            limiter: None,
        });
        f(&mut entry);
        if entry.quota == 0 && entry.burst == 0 {
            return;
        }
        entry.rebuild(&self.clock);
        self.entries.insert(key, entry);
    }
}

/// Thread-safe store of rate limit policies keyed by (backend, operation).
///
/// The mutex guards only map updates and lookups; limiter execution happens
/// on the limiter's own atomics after the handle has been fetched. Callers
/// holding a limiter handle across a reconfiguration keep using the old
/// limiter until their call returns; new lookups see the new one.
#[derive(Debug)]
pub struct RateLimitConfig {
    state: Mutex<ConfigState>,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        RateLimitConfig {
            state: Mutex::new(ConfigState {
                entries: HashMap::new(),
                clock: Arc::new(SystemClock),
            }),
        }
    }
}

impl RateLimitConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Set the quota (units per second) for one key. A zero quota on an
    /// unknown key is a no-op; a key left with neither quota nor burst is
    /// erased.
    pub fn set_quota(&self, backend: &str, operation: OperationClass, value: u64, mode: Mode) {
        let mut state = self.lock();
        state.apply(backend, operation, |entry| {
            entry.quota = value;
            entry.mode = mode;
        });
        debug!(
            "set quota for ({}, {}) to {} ({})",
            backend, operation, value, mode
        );
    }

    /// Set the burst (maximum cost of a single request) for one key. Only
    /// byte-bearing operations support a burst.
    pub fn set_burst(&self, backend: &str, operation: OperationClass, value: u64) -> Result<()> {
        if !operation.supports_burst() {
            return Err(Error::invalid_config(format!(
                "burst can only be configured for 'read' and 'write' operations, got '{}'",
                operation
            )));
        }
        let mut state = self.lock();
        state.apply(backend, operation, |entry| {
            entry.burst = value;
        });
        debug!("set burst for ({}, {}) to {}", backend, operation, value);
        Ok(())
    }

    /// Snapshot of the declared policy for one key.
    pub fn get(&self, backend: &str, operation: OperationClass) -> Option<OperationConfig> {
        let state = self.lock();
        state
            .entries
            .get(&(backend.to_string(), operation))
            .map(|entry| OperationConfig {
                backend: backend.to_string(),
                operation,
                quota: entry.quota,
                mode: entry.mode,
                burst: entry.burst,
            })
    }

    /// The current limiter for one key, or None when the key is not
    /// configured.
    pub fn limiter(&self, backend: &str, operation: OperationClass) -> Option<SharedRateLimiter> {
        self.lookup(backend, operation).map(|(limiter, _)| limiter)
    }

    /// Limiter and mode in a single lookup, for the interception hot path.
    pub fn lookup(
        &self,
        backend: &str,
        operation: OperationClass,
    ) -> Option<(SharedRateLimiter, Mode)> {
        let mut state = self.lock();
        let clock = Arc::clone(&state.clock);
        let entry = state.entries.get_mut(&(backend.to_string(), operation))?;
        if entry.limiter.is_none() {
            entry.rebuild(&clock);
        }
        entry
            .limiter
            .as_ref()
            .map(|limiter| (Arc::clone(limiter), entry.mode))
    }

    pub fn clear(&self, backend: &str, operation: OperationClass) {
        let mut state = self.lock();
        state.entries.remove(&(backend.to_string(), operation));
    }

    pub fn clear_backend(&self, backend: &str) {
        let mut state = self.lock();
        state.entries.retain(|(name, _), _| name != backend);
    }

    pub fn clear_all(&self) {
        let mut state = self.lock();
        state.entries.clear();
    }

    /// Snapshot of every configured key, sorted by backend then operation.
    pub fn configs(&self) -> Vec<OperationConfig> {
        let state = self.lock();
        let mut rows: Vec<_> = state
            .entries
            .iter()
            .map(|((backend, operation), entry)| OperationConfig {
                backend: backend.clone(),
                operation: *operation,
                quota: entry.quota,
                mode: entry.mode,
                burst: entry.burst,
            })
            .collect();
        rows.sort_by(|a, b| (&a.backend, a.operation).cmp(&(&b.backend, b.operation)));
        rows
    }

    /// Replace the clock handed to limiters and rebuild every existing
    /// limiter against it.
    pub fn set_clock(&self, clock: Arc<dyn Clock>) {
        let mut state = self.lock();
        state.clock = Arc::clone(&clock);
        for entry in state.entries.values_mut() {
            entry.rebuild(&clock);
        }
        debug!("replaced rate limiter clock, rebuilt all limiters");
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ConfigState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
