//! Rate-limiting layer over pluggable filesystems.
//!
//! A backend filesystem is wrapped in a facade that intercepts every call,
//! derives an operation class and a cost (bytes for byte-bearing calls,
//! 1 for metadata calls) and asks a GCRA rate limiter for admission before
//! delegating to the inner backend. Limits are configured per
//! `(backend, operation)` key and can be changed at any time, including
//! while operations are in flight.
//!
//! # Operation classes
//!
//! | Class | Gated calls | Cost |
//! |---|---|---|
//! | `stat` | open, existence checks, size/time/type lookups | 1 |
//! | `read` | read, positional read | byte count |
//! | `write` | write, positional write (byte count); truncate, create-directory, move (1) | |
//! | `list` | glob, directory listing | 1 |
//! | `delete` | file and directory removal | 1 |
//!
//! Seek, sync, close and the other position-keeping calls are never gated.
//!
//! # Example
//!
//! ```no_run
//! use std::path::Path;
//! use std::sync::Arc;
//! use rlfs::{Instance, LocalFileSystem, OpenFlags};
//!
//! let instance = Instance::new();
//! instance.register_backend(Arc::new(LocalFileSystem::new()))?;
//!
//! // 1 MiB/s reads with a 256 KiB burst; writers fail fast instead of waiting
//! instance.set_quota("local", "read", 1 << 20, "blocking")?;
//! instance.set_burst("local", "read", 256 << 10)?;
//! instance.set_quota("local", "write", 1 << 20, "non_blocking")?;
//!
//! let name = instance.wrap("local")?;
//! let fs = instance.backend(&name).unwrap();
//! let mut handle = fs.open(Path::new("/var/data/input.bin"), OpenFlags::read_only())?;
//! let mut buffer = vec![0u8; 64 << 10];
//! let n = fs.read(handle.as_mut(), &mut buffer)?;
//! # let _ = n;
//! # Ok::<(), rlfs::Error>(())
//! ```
//!
//! Blocking mode parks the calling thread on the limiter's clock;
//! non-blocking mode fails with [`Error::RateLimited`] carrying the
//! required wait. A request larger than the configured burst fails with
//! [`Error::ExceedsBurst`] in either mode.

mod config;
mod control;
mod errors;
mod facade;
mod filesystem;
mod local;
mod memory;
mod operation;
mod registry;
#[cfg(test)]
pub(crate) mod testutils;

pub use config::{Mode, OperationConfig, RateLimitConfig};
pub use control::Instance;
pub use errors::{Error, Result};
pub use facade::{RateLimitFileHandle, RateLimitFs};
pub use filesystem::{FileHandle, FileKind, FileSystem, OpenFlags};
pub use local::LocalFileSystem;
pub use memory::MemoryFileSystem;
pub use operation::OperationClass;
pub use registry::BackendRegistry;

// Re-exported so hosts can inject clocks and inspect limiter outcomes
// without depending on the engine crate directly.
pub use throttle::{Clock, MockClock, Quota, RateLimiter, SystemClock};
