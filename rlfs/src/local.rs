use std::any::Any;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::os::unix::fs::{FileExt, FileTypeExt};
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use crate::errors::{Error, Result};
use crate::filesystem::{FileHandle, FileKind, FileSystem, OpenFlags};

/// Backend over the operating system's file system.
#[derive(Debug, Default)]
pub struct LocalFileSystem;

impl LocalFileSystem {
    pub fn new() -> Self {
        LocalFileSystem
    }

    fn file_mut<'a>(&self, handle: &'a mut dyn FileHandle) -> Result<&'a mut File> {
        let local = handle
            .as_any_mut()
            .downcast_mut::<LocalFileHandle>()
            .ok_or_else(|| Error::internal("file handle was not issued by this filesystem"))?;
        local
            .file
            .as_mut()
            .ok_or_else(|| Error::internal("file handle used after close"))
    }
}

pub struct LocalFileHandle {
    path: PathBuf,
    flags: OpenFlags,
    file: Option<File>,
}

impl std::fmt::Debug for LocalFileHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_struct("LocalFileHandle")
            .field("path", &self.path)
            .field("closed", &self.file.is_none())
            .finish()
    }
}

impl FileHandle for LocalFileHandle {
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
        // dropping the descriptor closes it; closing twice is a no-op
        self.file.take();
        Ok(())
    }
}

impl FileSystem for LocalFileSystem {
    fn open(&self, path: &Path, flags: OpenFlags) -> Result<Box<dyn FileHandle>> {
        let mut options = OpenOptions::new();
        options
            .read(flags.read)
            .write(flags.write || flags.append)
            .create(flags.create)
            .truncate(flags.truncate)
            .append(flags.append);
        let file = options
            .open(path)
            .map_err(|e| Error::io(format!("cannot open {:?}", path), e))?;
        Ok(Box::new(LocalFileHandle {
            path: path.to_owned(),
            flags,
            file: Some(file),
        }))
    }

    fn read(&self, handle: &mut dyn FileHandle, buffer: &mut [u8]) -> Result<usize> {
        let path = handle.path().to_owned();
        self.file_mut(handle)?
            .read(buffer)
            .map_err(|e| Error::io(format!("cannot read from {:?}", path), e))
    }

    fn read_at(&self, handle: &mut dyn FileHandle, buffer: &mut [u8], offset: u64) -> Result<()> {
        let path = handle.path().to_owned();
        self.file_mut(handle)?
            .read_exact_at(buffer, offset)
            .map_err(|e| Error::io(format!("cannot read from {:?} at offset {}", path, offset), e))
    }

    fn write(&self, handle: &mut dyn FileHandle, buffer: &[u8]) -> Result<usize> {
        let path = handle.path().to_owned();
        self.file_mut(handle)?
            .write(buffer)
            .map_err(|e| Error::io(format!("cannot write to {:?}", path), e))
    }

    fn write_at(&self, handle: &mut dyn FileHandle, buffer: &[u8], offset: u64) -> Result<()> {
        let path = handle.path().to_owned();
        self.file_mut(handle)?
            .write_all_at(buffer, offset)
            .map_err(|e| Error::io(format!("cannot write to {:?} at offset {}", path, offset), e))
    }

    fn file_size(&self, handle: &mut dyn FileHandle) -> Result<u64> {
        let path = handle.path().to_owned();
        let metadata = self
            .file_mut(handle)?
            .metadata()
            .map_err(|e| Error::io(format!("failed reading metadata from {:?}", path), e))?;
        Ok(metadata.len())
    }

    fn modified_time(&self, handle: &mut dyn FileHandle) -> Result<SystemTime> {
        let path = handle.path().to_owned();
        let metadata = self
            .file_mut(handle)?
            .metadata()
            .map_err(|e| Error::io(format!("failed reading metadata from {:?}", path), e))?;
        metadata
            .modified()
            .map_err(|e| Error::io(format!("failed reading mtime from {:?}", path), e))
    }

    fn file_type(&self, handle: &mut dyn FileHandle) -> Result<FileKind> {
        let path = handle.path().to_owned();
        let metadata = self
            .file_mut(handle)?
            .metadata()
            .map_err(|e| Error::io(format!("failed reading metadata from {:?}", path), e))?;
        Ok(kind_of(&metadata.file_type()))
    }

    fn truncate(&self, handle: &mut dyn FileHandle, new_size: u64) -> Result<()> {
        let path = handle.path().to_owned();
        self.file_mut(handle)?
            .set_len(new_size)
            .map_err(|e| Error::io(format!("cannot truncate {:?} to {}", path, new_size), e))
    }

    fn sync(&self, handle: &mut dyn FileHandle) -> Result<()> {
        let path = handle.path().to_owned();
        self.file_mut(handle)?
            .sync_all()
            .map_err(|e| Error::io(format!("cannot sync {:?}", path), e))
    }

    fn seek(&self, handle: &mut dyn FileHandle, position: u64) -> Result<()> {
        let path = handle.path().to_owned();
        self.file_mut(handle)?
            .seek(SeekFrom::Start(position))
            .map(|_| ())
            .map_err(|e| Error::io(format!("cannot seek in {:?}", path), e))
    }

    fn reset(&self, handle: &mut dyn FileHandle) -> Result<()> {
        self.seek(handle, 0)
    }

    fn seek_position(&self, handle: &mut dyn FileHandle) -> Result<u64> {
        let path = handle.path().to_owned();
        self.file_mut(handle)?
            .stream_position()
            .map_err(|e| Error::io(format!("cannot query position in {:?}", path), e))
    }

    fn can_seek(&self) -> bool {
        true
    }

    fn on_disk_file(&self, _handle: &mut dyn FileHandle) -> bool {
        true
    }

    fn file_exists(&self, path: &Path) -> Result<bool> {
        match std::fs::metadata(path) {
            Ok(metadata) => Ok(metadata.is_file()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(Error::io(format!("failed reading metadata from {:?}", path), e)),
        }
    }

    fn is_pipe(&self, path: &Path) -> Result<bool> {
        match std::fs::metadata(path) {
            Ok(metadata) => Ok(metadata.file_type().is_fifo()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(Error::io(format!("failed reading metadata from {:?}", path), e)),
        }
    }

    fn remove_file(&self, path: &Path) -> Result<()> {
        std::fs::remove_file(path).map_err(|e| Error::io(format!("failed removing {:?}", path), e))
    }

    fn try_remove_file(&self, path: &Path) -> Result<bool> {
        match std::fs::remove_file(path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(Error::io(format!("failed removing {:?}", path), e)),
        }
    }

    fn directory_exists(&self, path: &Path) -> Result<bool> {
        match std::fs::metadata(path) {
            Ok(metadata) => Ok(metadata.is_dir()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(Error::io(format!("failed reading metadata from {:?}", path), e)),
        }
    }

    fn create_directory(&self, path: &Path) -> Result<()> {
        std::fs::create_dir(path)
            .map_err(|e| Error::io(format!("cannot create directory {:?}", path), e))
    }

    fn remove_directory(&self, path: &Path) -> Result<()> {
        std::fs::remove_dir_all(path)
            .map_err(|e| Error::io(format!("failed removing directory {:?}", path), e))
    }

    fn move_file(&self, source: &Path, target: &Path) -> Result<()> {
        std::fs::rename(source, target)
            .map_err(|e| Error::io(format!("cannot move {:?} to {:?}", source, target), e))
    }

    fn glob(&self, pattern: &str) -> Result<Vec<PathBuf>> {
        let glob = globset::GlobBuilder::new(pattern)
            .literal_separator(true)
            .build()
            .map_err(|e| Error::invalid_config(format!("invalid glob pattern '{}': {}", pattern, e)))?;
        let matcher = glob.compile_matcher();

        let root = glob_root(pattern);
        let mut matches = vec![];
        let mut pending = vec![root];
        while let Some(dir) = pending.pop() {
            let entries = match std::fs::read_dir(&dir) {
                Ok(entries) => entries,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => {
                    return Err(Error::io(format!("cannot open directory {:?} for reading", dir), e))
                }
            };
            for entry in entries {
                let entry = entry
                    .map_err(|e| Error::io(format!("failed traversing directory {:?}", dir), e))?;
                let path = entry.path();
                let file_type = entry
                    .file_type()
                    .map_err(|e| Error::io(format!("failed reading metadata from {:?}", path), e))?;
                if file_type.is_dir() {
                    pending.push(path.clone());
                }
                if matcher.is_match(&path) {
                    matches.push(path);
                }
            }
        }
        matches.sort();
        Ok(matches)
    }

    fn list_files(
        &self,
        directory: &Path,
        callback: &mut dyn FnMut(&Path, bool),
    ) -> Result<bool> {
        let entries = match std::fs::read_dir(directory) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(false),
            Err(e) => {
                return Err(Error::io(
                    format!("cannot open directory {:?} for reading", directory),
                    e,
                ))
            }
        };
        for entry in entries {
            let entry = entry
                .map_err(|e| Error::io(format!("failed traversing directory {:?}", directory), e))?;
            let file_type = entry.file_type().map_err(|e| {
                Error::io(format!("failed reading metadata from {:?}", entry.path()), e)
            })?;
            callback(Path::new(&entry.file_name()), file_type.is_dir());
        }
        Ok(true)
    }

    fn name(&self) -> String {
        "local".to_string()
    }
}

fn kind_of(file_type: &std::fs::FileType) -> FileKind {
    if file_type.is_dir() {
        FileKind::Directory
    } else if file_type.is_symlink() {
        FileKind::Symlink
    } else if file_type.is_fifo() {
        FileKind::Pipe
    } else if file_type.is_file() {
        FileKind::File
    } else {
        FileKind::Other
    }
}

// The directory to start a glob walk from: everything before the first
// wildcard, trimmed to a complete path component.
fn glob_root(pattern: &str) -> PathBuf {
    let wildcard = pattern.find(['*', '?', '[']).unwrap_or(pattern.len());
    let prefix = &pattern[..wildcard];
    match prefix.rfind('/') {
        Some(0) => PathBuf::from("/"),
        Some(pos) => PathBuf::from(&pattern[..pos]),
        None => PathBuf::from("."),
    }
}
