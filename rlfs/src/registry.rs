use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use crate::errors::{Error, Result};
use crate::filesystem::FileSystem;

/// Named store of filesystem backends, keyed by each backend's `name()`.
///
/// Wrapping a backend extracts it from here and re-registers the facade
/// under its derived name, so at any time a name resolves to exactly one
/// filesystem.
#[derive(Debug, Default)]
pub struct BackendRegistry {
    backends: Mutex<HashMap<String, Arc<dyn FileSystem>>>,
}

impl BackendRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, fs: Arc<dyn FileSystem>) -> Result<()> {
        let name = fs.name();
        let mut backends = self.lock();
        if backends.contains_key(&name) {
            return Err(Error::invalid_config(format!(
                "filesystem '{}' is already registered",
                name
            )));
        }
        backends.insert(name, fs);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn FileSystem>> {
        self.lock().get(name).cloned()
    }

    /// Remove and return the named backend.
    pub fn extract(&self, name: &str) -> Option<Arc<dyn FileSystem>> {
        self.lock().remove(name)
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<_> = self.lock().keys().cloned().collect();
        names.sort();
        names
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, Arc<dyn FileSystem>>> {
        self.backends.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
