use std::sync::Arc;

use tracing::debug;

use crate::config::{Mode, OperationConfig, RateLimitConfig};
use crate::errors::{Error, Result};
use crate::facade::RateLimitFs;
use crate::filesystem::FileSystem;
use crate::operation::OperationClass;
use crate::registry::BackendRegistry;

/// Per-host state: the named backend registry plus the rate limit
/// configuration, with the stringly-typed operations a host exposes.
///
/// Values arrive as they do from a host integration (operation and mode as
/// strings, quantities as signed integers) and are validated here before
/// they reach the typed registries. Rate limits may be configured before or
/// after the backend they name is wrapped; they take effect as soon as a
/// facade with that backend name consults them.
#[derive(Debug, Default)]
pub struct Instance {
    backends: BackendRegistry,
    config: Arc<RateLimitConfig>,
}

impl Instance {
    pub fn new() -> Self {
        Self::default()
    }

    /// The shared rate limit configuration, for direct typed access.
    pub fn config(&self) -> &Arc<RateLimitConfig> {
        &self.config
    }

    pub fn register_backend(&self, fs: Arc<dyn FileSystem>) -> Result<()> {
        self.backends.register(fs)
    }

    pub fn backend(&self, name: &str) -> Option<Arc<dyn FileSystem>> {
        self.backends.get(name)
    }

    /// Names of every registered backend, sorted.
    pub fn backend_names(&self) -> Vec<String> {
        self.backends.names()
    }

    /// Set the quota for `(backend, operation)`. A value of 0 means no rate
    /// limit on this key.
    pub fn set_quota(&self, backend: &str, operation: &str, value: i64, mode: &str) -> Result<()> {
        let operation: OperationClass = operation.parse()?;
        let mode: Mode = mode.parse()?;
        if value < 0 {
            return Err(Error::invalid_config(format!(
                "quota value must be non-negative, got {}",
                value
            )));
        }
        self.config
            .set_quota(backend, operation, value as u64, mode);
        Ok(())
    }

    /// Set the burst for `(backend, operation)`; read and write only.
    pub fn set_burst(&self, backend: &str, operation: &str, value: i64) -> Result<()> {
        let operation: OperationClass = operation.parse()?;
        if value < 0 {
            return Err(Error::invalid_config(format!(
                "burst value must be non-negative, got {}",
                value
            )));
        }
        self.config.set_burst(backend, operation, value as u64)
    }

    /// Clear configuration. `backend == "*"` clears everything;
    /// `operation == "*"` clears all operations for one backend.
    pub fn clear(&self, backend: &str, operation: &str) -> Result<()> {
        if backend == "*" {
            self.config.clear_all();
            return Ok(());
        }
        if operation == "*" {
            self.config.clear_backend(backend);
            return Ok(());
        }
        let operation: OperationClass = operation.parse()?;
        self.config.clear(backend, operation);
        Ok(())
    }

    /// Extract the named backend, wrap it in a rate-limiting facade and
    /// register the facade back under the derived name. Returns the name
    /// the facade was registered under.
    pub fn wrap(&self, backend: &str) -> Result<String> {
        let inner = self.backends.extract(backend).ok_or_else(|| {
            Error::invalid_config(format!(
                "filesystem '{}' not found or cannot be extracted; \
                 use backend_names() to see available filesystems",
                backend
            ))
        })?;
        let facade = Arc::new(RateLimitFs::new(inner, Arc::clone(&self.config)));
        let wrapped_name = facade.name();
        self.backends.register(facade)?;
        debug!(
            "wrapped filesystem {} with rate limit filesystem (registered as {})",
            backend, wrapped_name
        );
        Ok(wrapped_name)
    }

    /// Snapshot of every configured (backend, operation) policy.
    pub fn configs(&self) -> Vec<OperationConfig> {
        self.config.configs()
    }
}
