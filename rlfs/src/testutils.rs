use std::any::Any;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::SystemTime;

use crate::errors::{Error, Result};
use crate::filesystem::{FileHandle, FileKind, FileSystem, OpenFlags};

/// In-memory backend that records every call it receives, for asserting
/// what the facade forwards and with which costs.
#[derive(Debug)]
pub struct RecordingFs {
    name: String,
    calls: Arc<Mutex<Vec<String>>>,
    fail_next: Mutex<Option<String>>,
}

impl RecordingFs {
    pub fn new(name: &str) -> Self {
        RecordingFs {
            name: name.to_string(),
            calls: Arc::new(Mutex::new(vec![])),
            fail_next: Mutex::new(None),
        }
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Make the next byte-level call fail with an I/O error.
    pub fn fail_next(&self, message: &str) {
        *self.fail_next.lock().unwrap_or_else(PoisonError::into_inner) = Some(message.to_string());
    }

    fn record(&self, call: String) {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(call);
    }

    fn take_failure(&self) -> Option<String> {
        self.fail_next
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }
}

#[derive(Debug)]
struct RecordingHandle {
    path: PathBuf,
    flags: OpenFlags,
    calls: Arc<Mutex<Vec<String>>>,
    closed: bool,
}

impl FileHandle for RecordingHandle {
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
        if !self.closed {
            self.closed = true;
            self.calls
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(format!("close {}", self.path.display()));
        }
        Ok(())
    }
}

impl FileSystem for RecordingFs {
    fn open(&self, path: &Path, flags: OpenFlags) -> Result<Box<dyn FileHandle>> {
        self.record(format!("open {}", path.display()));
        Ok(Box::new(RecordingHandle {
            path: path.to_owned(),
            flags,
            calls: Arc::clone(&self.calls),
            closed: false,
        }))
    }

    fn read(&self, _handle: &mut dyn FileHandle, buffer: &mut [u8]) -> Result<usize> {
        if let Some(message) = self.take_failure() {
            return Err(Error::io(
                message,
                std::io::Error::new(std::io::ErrorKind::Other, "injected"),
            ));
        }
        self.record(format!("read {}", buffer.len()));
        Ok(buffer.len())
    }

    fn read_at(&self, _handle: &mut dyn FileHandle, buffer: &mut [u8], offset: u64) -> Result<()> {
        self.record(format!("read_at {} {}", buffer.len(), offset));
        Ok(())
    }

    fn write(&self, _handle: &mut dyn FileHandle, buffer: &[u8]) -> Result<usize> {
        if let Some(message) = self.take_failure() {
            return Err(Error::io(
                message,
                std::io::Error::new(std::io::ErrorKind::Other, "injected"),
            ));
        }
        self.record(format!("write {}", buffer.len()));
        Ok(buffer.len())
    }

    fn write_at(&self, _handle: &mut dyn FileHandle, buffer: &[u8], offset: u64) -> Result<()> {
        self.record(format!("write_at {} {}", buffer.len(), offset));
        Ok(())
    }

    fn file_size(&self, _handle: &mut dyn FileHandle) -> Result<u64> {
        self.record("file_size".to_string());
        Ok(0)
    }

    fn modified_time(&self, _handle: &mut dyn FileHandle) -> Result<SystemTime> {
        self.record("modified_time".to_string());
        Ok(SystemTime::UNIX_EPOCH)
    }

    fn file_type(&self, _handle: &mut dyn FileHandle) -> Result<FileKind> {
        self.record("file_type".to_string());
        Ok(FileKind::File)
    }

    fn truncate(&self, _handle: &mut dyn FileHandle, new_size: u64) -> Result<()> {
        self.record(format!("truncate {}", new_size));
        Ok(())
    }

    fn sync(&self, _handle: &mut dyn FileHandle) -> Result<()> {
        self.record("sync".to_string());
        Ok(())
    }

    fn seek(&self, _handle: &mut dyn FileHandle, position: u64) -> Result<()> {
        self.record(format!("seek {}", position));
        Ok(())
    }

    fn reset(&self, _handle: &mut dyn FileHandle) -> Result<()> {
        self.record("reset".to_string());
        Ok(())
    }

    fn seek_position(&self, _handle: &mut dyn FileHandle) -> Result<u64> {
        self.record("seek_position".to_string());
        Ok(0)
    }

    fn can_seek(&self) -> bool {
        true
    }

    fn on_disk_file(&self, _handle: &mut dyn FileHandle) -> bool {
        false
    }

    fn file_exists(&self, path: &Path) -> Result<bool> {
        self.record(format!("file_exists {}", path.display()));
        Ok(true)
    }

    fn is_pipe(&self, path: &Path) -> Result<bool> {
        self.record(format!("is_pipe {}", path.display()));
        Ok(false)
    }

    fn remove_file(&self, path: &Path) -> Result<()> {
        self.record(format!("remove_file {}", path.display()));
        Ok(())
    }

    fn try_remove_file(&self, path: &Path) -> Result<bool> {
        self.record(format!("try_remove_file {}", path.display()));
        Ok(true)
    }

    fn directory_exists(&self, path: &Path) -> Result<bool> {
        self.record(format!("directory_exists {}", path.display()));
        Ok(false)
    }

    fn create_directory(&self, path: &Path) -> Result<()> {
        self.record(format!("create_directory {}", path.display()));
        Ok(())
    }

    fn remove_directory(&self, path: &Path) -> Result<()> {
        self.record(format!("remove_directory {}", path.display()));
        Ok(())
    }

    fn move_file(&self, source: &Path, target: &Path) -> Result<()> {
        self.record(format!("move_file {} {}", source.display(), target.display()));
        Ok(())
    }

    fn glob(&self, pattern: &str) -> Result<Vec<PathBuf>> {
        self.record(format!("glob {}", pattern));
        Ok(vec![])
    }

    fn list_files(
        &self,
        directory: &Path,
        _callback: &mut dyn FnMut(&Path, bool),
    ) -> Result<bool> {
        self.record(format!("list_files {}", directory.display()));
        Ok(true)
    }

    fn name(&self) -> String {
        self.name.clone()
    }
}
