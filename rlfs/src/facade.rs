use std::any::Any;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;

use throttle::{AcquireResult, Outcome};
use tracing::trace;

use crate::config::{Mode, RateLimitConfig};
use crate::errors::{Error, Result};
use crate::filesystem::{FileHandle, FileKind, FileSystem, OpenFlags};
use crate::operation::OperationClass;

/// Handle issued by [`RateLimitFs`]: the inner handle by containment, no
/// synchronization of its own.
pub struct RateLimitFileHandle {
    path: PathBuf,
    flags: OpenFlags,
    inner: Option<Box<dyn FileHandle>>,
}

impl std::fmt::Debug for RateLimitFileHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_struct("RateLimitFileHandle")
            .field("path", &self.path)
            .field("closed", &self.inner.is_none())
            .finish()
    }
}

impl FileHandle for RateLimitFileHandle {
    fn path(&self) -> &Path {
        &self.path
    }

    fn flags(&self) -> OpenFlags {
        self.flags
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }

    fn close(&mut self) -> Result<()> {
        // forward to the inner close once; closing twice is a no-op
        match self.inner.take() {
            Some(mut inner) => inner.close(),
            None => Ok(()),
        }
    }
}

/// Rate-limiting facade over an inner filesystem.
///
/// Every intercepted call is translated into an operation class and a cost
/// (bytes for byte-bearing calls, 1 otherwise), checked against the limiter
/// configured for `(backend_name, class)`, and then forwarded to the inner
/// backend. Calls with no configured limiter pass straight through, as do
/// the calls that carry no quota at all (seek, sync, close and friends).
#[derive(Debug)]
pub struct RateLimitFs {
    inner: Arc<dyn FileSystem>,
    config: Arc<RateLimitConfig>,
    backend_name: String,
}

impl RateLimitFs {
    /// Wrap `inner`, keying rate limits under the inner backend's name.
    pub fn new(inner: Arc<dyn FileSystem>, config: Arc<RateLimitConfig>) -> Self {
        let backend_name = inner.name();
        RateLimitFs {
            inner,
            config,
            backend_name,
        }
    }

    /// The name rate limits for this facade are keyed under.
    pub fn backend_name(&self) -> &str {
        &self.backend_name
    }

    pub fn inner(&self) -> &Arc<dyn FileSystem> {
        &self.inner
    }

    pub fn config(&self) -> &Arc<RateLimitConfig> {
        &self.config
    }

    // Gate one call. The registry lock is released before the limiter runs,
    // so a concurrent reconfiguration leaves this call on the limiter it
    // already fetched.
    fn admit(&self, operation: OperationClass, cost: u64) -> Result<()> {
        let Some((limiter, mode)) = self.config.lookup(&self.backend_name, operation) else {
            return Ok(());
        };
        match limiter.try_acquire_immediate(cost) {
            Outcome::Admitted => Ok(()),
            Outcome::Exceeds => Err(Error::ExceedsBurst {
                operation,
                bytes: cost,
            }),
            Outcome::Wait(info) => match mode {
                Mode::NonBlocking => Err(Error::RateLimited {
                    operation,
                    wait: info.wait,
                }),
                Mode::Blocking => {
                    trace!(
                        "blocking {} of cost {} on '{}' for {:?}",
                        operation,
                        cost,
                        self.backend_name,
                        info.wait
                    );
                    match limiter.acquire_blocking(cost) {
                        AcquireResult::Admitted => Ok(()),
                        AcquireResult::Exceeds => Err(Error::ExceedsBurst {
                            operation,
                            bytes: cost,
                        }),
                    }
                }
            },
        }
    }

    // Recover the inner handle from a handle this facade issued. Foreign
    // handles pass through untouched.
    fn unwrap_handle<'a>(&self, handle: &'a mut dyn FileHandle) -> Result<&'a mut dyn FileHandle> {
        if !handle.as_any_mut().is::<RateLimitFileHandle>() {
            return Ok(handle);
        }
        let wrapped = match handle.as_any_mut().downcast_mut::<RateLimitFileHandle>() {
            Some(wrapped) => wrapped,
            None => return Err(Error::internal("handle downcast failed")),
        };
        match wrapped.inner.as_deref_mut() {
            Some(inner) => Ok(inner),
            None => Err(Error::internal("file handle used after close")),
        }
    }
}

impl FileSystem for RateLimitFs {
    fn open(&self, path: &Path, flags: OpenFlags) -> Result<Box<dyn FileHandle>> {
        self.admit(OperationClass::Stat, 1)?;
        let inner = self.inner.open(path, flags)?;
        Ok(Box::new(RateLimitFileHandle {
            path: path.to_owned(),
            flags,
            inner: Some(inner),
        }))
    }

    fn read(&self, handle: &mut dyn FileHandle, buffer: &mut [u8]) -> Result<usize> {
        self.admit(OperationClass::Read, buffer.len() as u64)?;
        self.inner.read(self.unwrap_handle(handle)?, buffer)
    }

    fn read_at(&self, handle: &mut dyn FileHandle, buffer: &mut [u8], offset: u64) -> Result<()> {
        self.admit(OperationClass::Read, buffer.len() as u64)?;
        self.inner
            .read_at(self.unwrap_handle(handle)?, buffer, offset)
    }

    fn write(&self, handle: &mut dyn FileHandle, buffer: &[u8]) -> Result<usize> {
        self.admit(OperationClass::Write, buffer.len() as u64)?;
        self.inner.write(self.unwrap_handle(handle)?, buffer)
    }

    fn write_at(&self, handle: &mut dyn FileHandle, buffer: &[u8], offset: u64) -> Result<()> {
        self.admit(OperationClass::Write, buffer.len() as u64)?;
        self.inner
            .write_at(self.unwrap_handle(handle)?, buffer, offset)
    }

    fn file_size(&self, handle: &mut dyn FileHandle) -> Result<u64> {
        self.admit(OperationClass::Stat, 1)?;
        self.inner.file_size(self.unwrap_handle(handle)?)
    }

    fn modified_time(&self, handle: &mut dyn FileHandle) -> Result<SystemTime> {
        self.admit(OperationClass::Stat, 1)?;
        self.inner.modified_time(self.unwrap_handle(handle)?)
    }

    fn file_type(&self, handle: &mut dyn FileHandle) -> Result<FileKind> {
        self.admit(OperationClass::Stat, 1)?;
        self.inner.file_type(self.unwrap_handle(handle)?)
    }

    fn truncate(&self, handle: &mut dyn FileHandle, new_size: u64) -> Result<()> {
        self.admit(OperationClass::Write, 1)?;
        self.inner.truncate(self.unwrap_handle(handle)?, new_size)
    }

    fn sync(&self, handle: &mut dyn FileHandle) -> Result<()> {
        self.inner.sync(self.unwrap_handle(handle)?)
    }

    fn seek(&self, handle: &mut dyn FileHandle, position: u64) -> Result<()> {
        self.inner.seek(self.unwrap_handle(handle)?, position)
    }

    fn reset(&self, handle: &mut dyn FileHandle) -> Result<()> {
        self.inner.reset(self.unwrap_handle(handle)?)
    }

    fn seek_position(&self, handle: &mut dyn FileHandle) -> Result<u64> {
        self.inner.seek_position(self.unwrap_handle(handle)?)
    }

    fn can_seek(&self) -> bool {
        self.inner.can_seek()
    }

    fn on_disk_file(&self, handle: &mut dyn FileHandle) -> bool {
        match self.unwrap_handle(handle) {
            Ok(inner) => self.inner.on_disk_file(inner),
            Err(_) => false,
        }
    }

    fn file_exists(&self, path: &Path) -> Result<bool> {
        self.admit(OperationClass::Stat, 1)?;
        self.inner.file_exists(path)
    }

    fn is_pipe(&self, path: &Path) -> Result<bool> {
        self.admit(OperationClass::Stat, 1)?;
        self.inner.is_pipe(path)
    }

    fn remove_file(&self, path: &Path) -> Result<()> {
        self.admit(OperationClass::Delete, 1)?;
        self.inner.remove_file(path)
    }

    fn try_remove_file(&self, path: &Path) -> Result<bool> {
        self.admit(OperationClass::Delete, 1)?;
        self.inner.try_remove_file(path)
    }

    fn directory_exists(&self, path: &Path) -> Result<bool> {
        self.admit(OperationClass::Stat, 1)?;
        self.inner.directory_exists(path)
    }

    fn create_directory(&self, path: &Path) -> Result<()> {
        self.admit(OperationClass::Write, 1)?;
        self.inner.create_directory(path)
    }

    fn remove_directory(&self, path: &Path) -> Result<()> {
        self.admit(OperationClass::Delete, 1)?;
        self.inner.remove_directory(path)
    }

    fn move_file(&self, source: &Path, target: &Path) -> Result<()> {
        self.admit(OperationClass::Write, 1)?;
        self.inner.move_file(source, target)
    }

    fn glob(&self, pattern: &str) -> Result<Vec<PathBuf>> {
        self.admit(OperationClass::List, 1)?;
        self.inner.glob(pattern)
    }

    fn list_files(
        &self,
        directory: &Path,
        callback: &mut dyn FnMut(&Path, bool),
    ) -> Result<bool> {
        self.admit(OperationClass::List, 1)?;
        self.inner.list_files(directory, callback)
    }

    fn name(&self) -> String {
        format!("RateLimited({})", self.backend_name)
    }

    fn path_separator(&self) -> &'static str {
        self.inner.path_separator()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutils::RecordingFs;
    use std::sync::Arc;
    use std::time::Duration;
    use test_log::test;
    use throttle::{Clock, MockClock};

    struct Fixture {
        clock: Arc<MockClock>,
        config: Arc<RateLimitConfig>,
        recorder: Arc<RecordingFs>,
        facade: RateLimitFs,
    }

    fn fixture() -> Fixture {
        let clock = Arc::new(MockClock::new());
        let config = RateLimitConfig::shared();
        config.set_clock(Arc::clone(&clock) as Arc<dyn Clock>);
        let recorder = Arc::new(RecordingFs::new("mock"));
        let facade = RateLimitFs::new(
            Arc::clone(&recorder) as Arc<dyn FileSystem>,
            Arc::clone(&config),
        );
        Fixture {
            clock,
            config,
            recorder,
            facade,
        }
    }

    #[test]
    fn unconfigured_keys_pass_straight_through() {
        let f = fixture();
        let mut handle = f.facade.open(Path::new("/x"), OpenFlags::read_only()).unwrap();
        let mut buffer = [0u8; 64];
        f.facade.read(handle.as_mut(), &mut buffer).unwrap();
        f.facade.write(handle.as_mut(), &buffer).unwrap();
        f.facade.remove_file(Path::new("/x")).unwrap();
        assert_eq!(
            f.recorder.calls(),
            vec!["open /x", "read 64", "write 64", "remove_file /x"]
        );
    }

    #[test]
    fn facade_name_derives_from_the_inner_backend() {
        let f = fixture();
        assert_eq!(f.facade.backend_name(), "mock");
        assert_eq!(f.facade.name(), "RateLimited(mock)");
    }

    #[test]
    fn non_blocking_burst_exhaustion() {
        // rate=10/s, burst=20, non-blocking reads
        let f = fixture();
        f.config
            .set_quota("mock", OperationClass::Read, 10, Mode::NonBlocking);
        f.config.set_burst("mock", OperationClass::Read, 20).unwrap();

        let mut handle = f.facade.open(Path::new("/x"), OpenFlags::read_only()).unwrap();
        let mut buffer = vec![0u8; 20];
        f.facade.read(handle.as_mut(), &mut buffer).unwrap();

        let mut one = [0u8; 1];
        let error = f.facade.read(handle.as_mut(), &mut one).unwrap_err();
        assert!(error.is_rate_limited(), "got {:?}", error);

        f.clock.advance(Duration::from_secs(1));
        let mut ten = [0u8; 10];
        f.facade.read(handle.as_mut(), &mut ten).unwrap();
    }

    #[test]
    fn partial_refill() {
        // rate=10/s, burst=10
        let f = fixture();
        f.config
            .set_quota("mock", OperationClass::Read, 10, Mode::NonBlocking);
        f.config.set_burst("mock", OperationClass::Read, 10).unwrap();

        let mut handle = f.facade.open(Path::new("/x"), OpenFlags::read_only()).unwrap();
        let mut ten = [0u8; 10];
        f.facade.read(handle.as_mut(), &mut ten).unwrap();

        f.clock.advance(Duration::from_millis(500));
        let mut five = [0u8; 5];
        f.facade.read(handle.as_mut(), &mut five).unwrap();

        let mut one = [0u8; 1];
        let error = f.facade.read(handle.as_mut(), &mut one).unwrap_err();
        assert!(error.is_rate_limited(), "got {:?}", error);
    }

    #[test]
    fn blocking_mode_waits_on_the_clock_and_succeeds() {
        let f = fixture();
        f.config
            .set_quota("mock", OperationClass::Read, 100, Mode::Blocking);
        f.config
            .set_burst("mock", OperationClass::Read, 100)
            .unwrap();

        let mut handle = f.facade.open(Path::new("/x"), OpenFlags::read_only()).unwrap();
        let start = f.clock.now();
        let mut buffer = vec![0u8; 100];
        for _ in 0..3 {
            f.facade.read(handle.as_mut(), &mut buffer).unwrap();
        }
        // first burst free, the next two wait a second each on the mock clock
        assert!(f.clock.now().duration_since(start) >= Duration::from_secs(2));
    }

    #[test]
    fn request_exceeding_burst_fails_in_any_mode() {
        for mode in [Mode::Blocking, Mode::NonBlocking] {
            let f = fixture();
            f.config.set_quota("mock", OperationClass::Read, 1000, mode);
            f.config
                .set_burst("mock", OperationClass::Read, 100)
                .unwrap();

            let mut handle = f.facade.open(Path::new("/x"), OpenFlags::read_only()).unwrap();
            let mut buffer = vec![0u8; 101];
            let error = f.facade.read(handle.as_mut(), &mut buffer).unwrap_err();
            assert!(error.is_exceeds_burst(), "mode {:?} got {:?}", mode, error);

            // state unchanged: a request within burst still admits
            let mut ok = vec![0u8; 100];
            f.facade.read(handle.as_mut(), &mut ok).unwrap();
        }
    }

    #[test]
    fn zero_rate_burst_only_never_delays() {
        let f = fixture();
        f.config.set_burst("mock", OperationClass::Read, 100).unwrap();

        let mut handle = f.facade.open(Path::new("/x"), OpenFlags::read_only()).unwrap();
        let start = f.clock.now();
        let mut buffer = vec![0u8; 50];
        for _ in 0..1000 {
            f.facade.read(handle.as_mut(), &mut buffer).unwrap();
        }
        assert_eq!(f.clock.now(), start);

        let mut too_big = vec![0u8; 101];
        let error = f.facade.read(handle.as_mut(), &mut too_big).unwrap_err();
        assert!(error.is_exceeds_burst(), "got {:?}", error);
    }

    #[test]
    fn keys_are_isolated_per_backend() {
        let clock = Arc::new(MockClock::new());
        let config = RateLimitConfig::shared();
        config.set_clock(Arc::clone(&clock) as Arc<dyn Clock>);
        config.set_quota("fsA", OperationClass::Read, 1, Mode::NonBlocking);

        let fs_a = RateLimitFs::new(
            Arc::new(RecordingFs::new("fsA")) as Arc<dyn FileSystem>,
            Arc::clone(&config),
        );
        let fs_b = RateLimitFs::new(
            Arc::new(RecordingFs::new("fsB")) as Arc<dyn FileSystem>,
            Arc::clone(&config),
        );

        let mut handle_a = fs_a.open(Path::new("/x"), OpenFlags::read_only()).unwrap();
        let mut handle_b = fs_b.open(Path::new("/x"), OpenFlags::read_only()).unwrap();
        let mut buffer = [0u8; 1];

        fs_a.read(handle_a.as_mut(), &mut buffer).unwrap();
        assert!(fs_a
            .read(handle_a.as_mut(), &mut buffer)
            .unwrap_err()
            .is_rate_limited());

        for _ in 0..10 {
            fs_b.read(handle_b.as_mut(), &mut buffer).unwrap();
        }
    }

    #[test]
    fn costs_follow_the_operation_table() {
        let f = fixture();
        // cost 1 per call for stat: 10/s with no burst tolerance shaping
        f.config
            .set_quota("mock", OperationClass::Stat, 1, Mode::NonBlocking);

        assert!(f.facade.file_exists(Path::new("/x")).is_ok());
        // second metadata call within the same second is rejected
        let error = f.facade.directory_exists(Path::new("/y")).unwrap_err();
        assert!(error.is_rate_limited(), "got {:?}", error);
    }

    #[test]
    fn open_is_gated_as_stat() {
        let f = fixture();
        f.config
            .set_quota("mock", OperationClass::Stat, 1, Mode::NonBlocking);

        f.facade.open(Path::new("/x"), OpenFlags::read_only()).unwrap();
        let error = f
            .facade
            .open(Path::new("/y"), OpenFlags::read_only())
            .unwrap_err();
        assert!(error.is_rate_limited(), "got {:?}", error);
    }

    #[test]
    fn metadata_writes_and_deletes_cost_one() {
        let f = fixture();
        f.config
            .set_quota("mock", OperationClass::Write, 1, Mode::NonBlocking);
        f.config
            .set_quota("mock", OperationClass::Delete, 1, Mode::NonBlocking);
        f.config
            .set_quota("mock", OperationClass::List, 1, Mode::NonBlocking);

        f.facade.create_directory(Path::new("/d")).unwrap();
        assert!(f
            .facade
            .move_file(Path::new("/a"), Path::new("/b"))
            .unwrap_err()
            .is_rate_limited());

        f.facade.remove_file(Path::new("/x")).unwrap();
        assert!(f
            .facade
            .remove_directory(Path::new("/d"))
            .unwrap_err()
            .is_rate_limited());

        f.facade.glob("*.csv").unwrap();
        assert!(f
            .facade
            .list_files(Path::new("/d"), &mut |_, _| {})
            .unwrap_err()
            .is_rate_limited());
    }

    #[test]
    fn truncate_is_a_metadata_write() {
        let f = fixture();
        f.config
            .set_quota("mock", OperationClass::Write, 1, Mode::NonBlocking);

        let mut handle = f.facade.open(Path::new("/x"), OpenFlags::read_write()).unwrap();
        f.facade.truncate(handle.as_mut(), 0).unwrap();
        let error = f.facade.truncate(handle.as_mut(), 0).unwrap_err();
        assert!(error.is_rate_limited(), "got {:?}", error);
    }

    #[test]
    fn ungated_calls_never_consult_the_limiter() {
        let f = fixture();
        // exhaust stat so any gated call would fail
        f.config
            .set_quota("mock", OperationClass::Stat, 1, Mode::NonBlocking);
        f.config
            .set_quota("mock", OperationClass::Read, 1, Mode::NonBlocking);
        f.config
            .set_quota("mock", OperationClass::Write, 1, Mode::NonBlocking);
        let mut handle = f.facade.open(Path::new("/x"), OpenFlags::read_write()).unwrap();

        f.facade.seek(handle.as_mut(), 10).unwrap();
        f.facade.reset(handle.as_mut()).unwrap();
        f.facade.seek_position(handle.as_mut()).unwrap();
        f.facade.sync(handle.as_mut()).unwrap();
        assert!(f.facade.can_seek());
        // the recording backend reports not-on-disk; the call reaches it
        assert!(!f.facade.on_disk_file(handle.as_mut()));
        handle.close().unwrap();
    }

    #[test]
    fn zero_length_reads_are_always_admitted() {
        let f = fixture();
        f.config
            .set_quota("mock", OperationClass::Read, 1, Mode::NonBlocking);
        f.config.set_burst("mock", OperationClass::Read, 1).unwrap();

        let mut handle = f.facade.open(Path::new("/x"), OpenFlags::read_only()).unwrap();
        let mut empty = [0u8; 0];
        for _ in 0..100 {
            f.facade.read(handle.as_mut(), &mut empty).unwrap();
        }
    }

    #[test]
    fn close_forwards_once_and_is_idempotent() {
        let f = fixture();
        let mut handle = f.facade.open(Path::new("/x"), OpenFlags::read_only()).unwrap();
        handle.close().unwrap();
        handle.close().unwrap();
        let closes = f
            .recorder
            .calls()
            .iter()
            .filter(|call| call.as_str() == "close /x")
            .count();
        assert_eq!(closes, 1);

        // using a closed handle is an internal error, not a panic
        let mut buffer = [0u8; 1];
        let error = f.facade.read(handle.as_mut(), &mut buffer).unwrap_err();
        assert!(matches!(error, Error::Internal(_)));
    }

    #[test]
    fn inner_errors_pass_through_unchanged() {
        let f = fixture();
        f.recorder.fail_next("read failed");
        let mut handle = f.facade.open(Path::new("/x"), OpenFlags::read_only()).unwrap();
        let mut buffer = [0u8; 4];
        let error = f.facade.read(handle.as_mut(), &mut buffer).unwrap_err();
        assert!(matches!(error, Error::Io { .. }), "got {:?}", error);
        assert!(error.to_string().contains("read failed"));
    }

    #[test]
    fn reconfiguring_mid_stream_takes_effect_for_new_calls() {
        let f = fixture();
        f.config
            .set_quota("mock", OperationClass::Read, 10, Mode::NonBlocking);
        f.config.set_burst("mock", OperationClass::Read, 10).unwrap();

        let mut handle = f.facade.open(Path::new("/x"), OpenFlags::read_only()).unwrap();
        let mut ten = [0u8; 10];
        f.facade.read(handle.as_mut(), &mut ten).unwrap();
        assert!(f
            .facade
            .read(handle.as_mut(), &mut ten)
            .unwrap_err()
            .is_rate_limited());

        // raising the quota rebuilds the limiter with fresh state
        f.config
            .set_quota("mock", OperationClass::Read, 1000, Mode::NonBlocking);
        f.config
            .set_burst("mock", OperationClass::Read, 1000)
            .unwrap();
        f.facade.read(handle.as_mut(), &mut ten).unwrap();
    }
}
