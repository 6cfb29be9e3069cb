use std::any::Any;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};
use std::time::SystemTime;

use crate::errors::{Error, Result};
use crate::filesystem::{FileHandle, FileKind, FileSystem, OpenFlags};

/// In-memory backend. Useful as a second named backend in tests and for
/// hosts that stage data without touching disk.
///
/// File contents live in the filesystem object; handles only carry a
/// cursor. Several instances can coexist under different names.
#[derive(Debug)]
pub struct MemoryFileSystem {
    name: String,
    state: Mutex<MemState>,
}

#[derive(Debug, Default)]
struct MemState {
    files: HashMap<PathBuf, FileData>,
    directories: HashSet<PathBuf>,
}

#[derive(Debug, Clone)]
struct FileData {
    bytes: Vec<u8>,
    modified: SystemTime,
}

impl FileData {
    fn empty() -> Self {
        FileData {
            bytes: vec![],
            modified: SystemTime::now(),
        }
    }
}

fn not_found(path: &Path) -> Error {
    Error::io(
        format!("cannot open {:?}", path),
        std::io::Error::new(std::io::ErrorKind::NotFound, "no such file"),
    )
}

impl MemoryFileSystem {
    pub fn new(name: &str) -> Self {
        let mut state = MemState::default();
        state.directories.insert(PathBuf::from("/"));
        MemoryFileSystem {
            name: name.to_string(),
            state: Mutex::new(state),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MemState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn handle_mut<'a>(&self, handle: &'a mut dyn FileHandle) -> Result<&'a mut MemoryFileHandle> {
        let memory = handle
            .as_any_mut()
            .downcast_mut::<MemoryFileHandle>()
            .ok_or_else(|| Error::internal("file handle was not issued by this filesystem"))?;
        if memory.closed {
            return Err(Error::internal("file handle used after close"));
        }
        Ok(memory)
    }
}

#[derive(Debug)]
pub struct MemoryFileHandle {
    path: PathBuf,
    flags: OpenFlags,
    position: u64,
    closed: bool,
}

impl FileHandle for MemoryFileHandle {
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
        self.closed = true;
        Ok(())
    }
}

impl FileSystem for MemoryFileSystem {
    fn open(&self, path: &Path, flags: OpenFlags) -> Result<Box<dyn FileHandle>> {
        let mut state = self.lock();
        match state.files.get_mut(path) {
            Some(data) => {
                if flags.truncate {
                    data.bytes.clear();
                    data.modified = SystemTime::now();
                }
            }
            None => {
                if !flags.create {
                    return Err(not_found(path));
                }
                state.files.insert(path.to_owned(), FileData::empty());
            }
        }
        let position = if flags.append {
            state.files[path].bytes.len() as u64
        } else {
            0
        };
        Ok(Box::new(MemoryFileHandle {
            path: path.to_owned(),
            flags,
            position,
            closed: false,
        }))
    }

    fn read(&self, handle: &mut dyn FileHandle, buffer: &mut [u8]) -> Result<usize> {
        let memory = self.handle_mut(handle)?;
        let path = memory.path.clone();
        let position = memory.position as usize;
        let state = self.lock();
        let data = state.files.get(&path).ok_or_else(|| not_found(&path))?;
        let available = data.bytes.len().saturating_sub(position);
        let n = available.min(buffer.len());
        buffer[..n].copy_from_slice(&data.bytes[position..position + n]);
        drop(state);
        memory.position += n as u64;
        Ok(n)
    }

    fn read_at(&self, handle: &mut dyn FileHandle, buffer: &mut [u8], offset: u64) -> Result<()> {
        let memory = self.handle_mut(handle)?;
        let path = memory.path.clone();
        let state = self.lock();
        let data = state.files.get(&path).ok_or_else(|| not_found(&path))?;
        let offset = offset as usize;
        if offset + buffer.len() > data.bytes.len() {
            return Err(Error::io(
                format!("cannot read from {:?} at offset {}", path, offset),
                std::io::Error::new(std::io::ErrorKind::UnexpectedEof, "past end of file"),
            ));
        }
        buffer.copy_from_slice(&data.bytes[offset..offset + buffer.len()]);
        Ok(())
    }

    fn write(&self, handle: &mut dyn FileHandle, buffer: &[u8]) -> Result<usize> {
        let memory = self.handle_mut(handle)?;
        let path = memory.path.clone();
        let position = memory.position as usize;
        let mut state = self.lock();
        let data = state.files.get_mut(&path).ok_or_else(|| not_found(&path))?;
        if data.bytes.len() < position + buffer.len() {
            data.bytes.resize(position + buffer.len(), 0);
        }
        data.bytes[position..position + buffer.len()].copy_from_slice(buffer);
        data.modified = SystemTime::now();
        drop(state);
        memory.position += buffer.len() as u64;
        Ok(buffer.len())
    }

    fn write_at(&self, handle: &mut dyn FileHandle, buffer: &[u8], offset: u64) -> Result<()> {
        let memory = self.handle_mut(handle)?;
        let path = memory.path.clone();
        let offset = offset as usize;
        let mut state = self.lock();
        let data = state.files.get_mut(&path).ok_or_else(|| not_found(&path))?;
        if data.bytes.len() < offset + buffer.len() {
            data.bytes.resize(offset + buffer.len(), 0);
        }
        data.bytes[offset..offset + buffer.len()].copy_from_slice(buffer);
        data.modified = SystemTime::now();
        Ok(())
    }

    fn file_size(&self, handle: &mut dyn FileHandle) -> Result<u64> {
        let memory = self.handle_mut(handle)?;
        let path = memory.path.clone();
        let state = self.lock();
        let data = state.files.get(&path).ok_or_else(|| not_found(&path))?;
        Ok(data.bytes.len() as u64)
    }

    fn modified_time(&self, handle: &mut dyn FileHandle) -> Result<SystemTime> {
        let memory = self.handle_mut(handle)?;
        let path = memory.path.clone();
        let state = self.lock();
        let data = state.files.get(&path).ok_or_else(|| not_found(&path))?;
        Ok(data.modified)
    }

    fn file_type(&self, handle: &mut dyn FileHandle) -> Result<FileKind> {
        self.handle_mut(handle)?;
        Ok(FileKind::File)
    }

    fn truncate(&self, handle: &mut dyn FileHandle, new_size: u64) -> Result<()> {
        let memory = self.handle_mut(handle)?;
        let path = memory.path.clone();
        let mut state = self.lock();
        let data = state.files.get_mut(&path).ok_or_else(|| not_found(&path))?;
        data.bytes.resize(new_size as usize, 0);
        data.modified = SystemTime::now();
        Ok(())
    }

    fn sync(&self, handle: &mut dyn FileHandle) -> Result<()> {
        self.handle_mut(handle)?;
        Ok(())
    }

    fn seek(&self, handle: &mut dyn FileHandle, position: u64) -> Result<()> {
        self.handle_mut(handle)?.position = position;
        Ok(())
    }

    fn reset(&self, handle: &mut dyn FileHandle) -> Result<()> {
        self.seek(handle, 0)
    }

    fn seek_position(&self, handle: &mut dyn FileHandle) -> Result<u64> {
        Ok(self.handle_mut(handle)?.position)
    }

    fn can_seek(&self) -> bool {
        true
    }

    fn on_disk_file(&self, _handle: &mut dyn FileHandle) -> bool {
        false
    }

    fn file_exists(&self, path: &Path) -> Result<bool> {
        Ok(self.lock().files.contains_key(path))
    }

    fn is_pipe(&self, _path: &Path) -> Result<bool> {
        Ok(false)
    }

    fn remove_file(&self, path: &Path) -> Result<()> {
        match self.lock().files.remove(path) {
            Some(_) => Ok(()),
            None => Err(Error::io(
                format!("failed removing {:?}", path),
                std::io::Error::new(std::io::ErrorKind::NotFound, "no such file"),
            )),
        }
    }

    fn try_remove_file(&self, path: &Path) -> Result<bool> {
        Ok(self.lock().files.remove(path).is_some())
    }

    fn directory_exists(&self, path: &Path) -> Result<bool> {
        Ok(self.lock().directories.contains(path))
    }

    fn create_directory(&self, path: &Path) -> Result<()> {
        let mut state = self.lock();
        if !state.directories.insert(path.to_owned()) {
            return Err(Error::io(
                format!("cannot create directory {:?}", path),
                std::io::Error::new(std::io::ErrorKind::AlreadyExists, "directory exists"),
            ));
        }
        Ok(())
    }

    fn remove_directory(&self, path: &Path) -> Result<()> {
        let mut state = self.lock();
        if !state.directories.remove(path) {
            return Err(Error::io(
                format!("failed removing directory {:?}", path),
                std::io::Error::new(std::io::ErrorKind::NotFound, "no such directory"),
            ));
        }
        // everything underneath goes with it
        state.files.retain(|file, _| !file.starts_with(path));
        state
            .directories
            .retain(|dir| !dir.starts_with(path));
        Ok(())
    }

    fn move_file(&self, source: &Path, target: &Path) -> Result<()> {
        let mut state = self.lock();
        match state.files.remove(source) {
            Some(data) => {
                state.files.insert(target.to_owned(), data);
                Ok(())
            }
            None => Err(Error::io(
                format!("cannot move {:?} to {:?}", source, target),
                std::io::Error::new(std::io::ErrorKind::NotFound, "no such file"),
            )),
        }
    }

    fn glob(&self, pattern: &str) -> Result<Vec<PathBuf>> {
        let glob = globset::GlobBuilder::new(pattern)
            .literal_separator(true)
            .build()
            .map_err(|e| Error::invalid_config(format!("invalid glob pattern '{}': {}", pattern, e)))?;
        let matcher = glob.compile_matcher();
        let state = self.lock();
        let mut matches: Vec<_> = state
            .files
            .keys()
            .filter(|path| matcher.is_match(path))
            .cloned()
            .collect();
        matches.sort();
        Ok(matches)
    }

    fn list_files(
        &self,
        directory: &Path,
        callback: &mut dyn FnMut(&Path, bool),
    ) -> Result<bool> {
        let state = self.lock();
        if !state.directories.contains(directory) {
            return Ok(false);
        }
        let mut entries: Vec<(PathBuf, bool)> = vec![];
        for path in state.files.keys() {
            if path.parent() == Some(directory) {
                if let Some(name) = path.file_name() {
                    entries.push((PathBuf::from(name), false));
                }
            }
        }
        for dir in &state.directories {
            if dir.parent() == Some(directory) {
                if let Some(name) = dir.file_name() {
                    entries.push((PathBuf::from(name), true));
                }
            }
        }
        entries.sort();
        for (name, is_dir) in entries {
            callback(&name, is_dir);
        }
        Ok(true)
    }

    fn name(&self) -> String {
        self.name.clone()
    }
}
