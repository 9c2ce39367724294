//! Byte-level file backends.
//!
//! A backend is an opaque sink/source of bytes underneath a file store. The
//! plain variant writes bytes as given and reads back newline-separated
//! records; the framed variant prefixes every record with a little-endian
//! `u32` length so records with embedded delimiters survive readback.

use std::fs::{self, File, OpenOptions};
use std::io::{self, BufRead, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use bytes::BufMut;

/// Default read/write buffer capacity.
const DEFAULT_BUFFER_CAPACITY: usize = 64 * 1024;

/// Upper bound on a framed record; anything larger is treated as a corrupt
/// frame rather than an allocation request.
const MAX_FRAME_LEN: u32 = 256 * 1024 * 1024;

/// Opaque byte sink/source with create/open/write/read/close semantics.
pub trait FileBackend: Send + Sync {
    /// Path this backend reads and writes.
    fn path(&self) -> &Path;

    /// Open for appending, creating the file if needed.
    fn open_write(&mut self) -> io::Result<()>;

    /// Open for writing, discarding existing contents.
    fn open_truncate(&mut self) -> io::Result<()>;

    /// Open for reading from the start.
    fn open_read(&mut self) -> io::Result<()>;

    fn is_open(&self) -> bool;

    fn close(&mut self);

    /// Append raw bytes.
    fn write(&mut self, buf: &[u8]) -> io::Result<()>;

    fn flush(&mut self) -> io::Result<()>;

    /// Read the next record, or `None` at end of stream.
    fn read_next(&mut self) -> io::Result<Option<Vec<u8>>>;

    /// Size of the file on disk; zero if it does not exist.
    fn file_size(&self) -> u64;

    /// Header bytes this backend wants in front of a record of
    /// `message_len` bytes. Empty for unframed backends.
    fn frame(&self, message_len: usize) -> Vec<u8>;
}

enum FileMode {
    Closed,
    Writing(BufWriter<File>),
    Reading(BufReader<File>),
}

/// Unframed file backend; records are newline-separated on readback.
pub struct PlainFile {
    path: PathBuf,
    mode: FileMode,
    capacity: usize,
}

impl PlainFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self::with_capacity(path, DEFAULT_BUFFER_CAPACITY)
    }

    pub fn with_capacity(path: impl Into<PathBuf>, capacity: usize) -> Self {
        Self {
            path: path.into(),
            mode: FileMode::Closed,
            capacity: capacity.max(1),
        }
    }
}

impl FileBackend for PlainFile {
    fn path(&self) -> &Path {
        &self.path
    }

    fn open_write(&mut self) -> io::Result<()> {
        let file = OpenOptions::new().create(true).append(true).open(&self.path)?;
        self.mode = FileMode::Writing(BufWriter::with_capacity(self.capacity, file));
        Ok(())
    }

    fn open_truncate(&mut self) -> io::Result<()> {
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&self.path)?;
        self.mode = FileMode::Writing(BufWriter::with_capacity(self.capacity, file));
        Ok(())
    }

    fn open_read(&mut self) -> io::Result<()> {
        let file = File::open(&self.path)?;
        self.mode = FileMode::Reading(BufReader::with_capacity(self.capacity, file));
        Ok(())
    }

    fn is_open(&self) -> bool {
        !matches!(self.mode, FileMode::Closed)
    }

    fn close(&mut self) {
        if let FileMode::Writing(writer) = &mut self.mode {
            let _ = writer.flush();
        }
        self.mode = FileMode::Closed;
    }

    fn write(&mut self, buf: &[u8]) -> io::Result<()> {
        match &mut self.mode {
            FileMode::Writing(writer) => writer.write_all(buf),
            _ => Err(io::Error::new(io::ErrorKind::NotConnected, "file not open for writing")),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match &mut self.mode {
            FileMode::Writing(writer) => writer.flush(),
            _ => Ok(()),
        }
    }

    fn read_next(&mut self) -> io::Result<Option<Vec<u8>>> {
        let FileMode::Reading(reader) = &mut self.mode else {
            return Err(io::Error::new(io::ErrorKind::NotConnected, "file not open for reading"));
        };
        let mut line = Vec::new();
        let n = reader.read_until(b'\n', &mut line)?;
        if n == 0 {
            return Ok(None);
        }
        if line.last() == Some(&b'\n') {
            line.pop();
        }
        Ok(Some(line))
    }

    fn file_size(&self) -> u64 {
        fs::metadata(&self.path).map(|m| m.len()).unwrap_or(0)
    }

    fn frame(&self, _message_len: usize) -> Vec<u8> {
        Vec::new()
    }
}

/// Length-prefixed file backend: every record is a little-endian `u32`
/// length followed by the payload.
pub struct FramedFile {
    inner: PlainFile,
}

impl FramedFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self::with_capacity(path, DEFAULT_BUFFER_CAPACITY)
    }

    pub fn with_capacity(path: impl Into<PathBuf>, capacity: usize) -> Self {
        Self {
            inner: PlainFile::with_capacity(path, capacity),
        }
    }
}

impl FileBackend for FramedFile {
    fn path(&self) -> &Path {
        self.inner.path()
    }

    fn open_write(&mut self) -> io::Result<()> {
        self.inner.open_write()
    }

    fn open_truncate(&mut self) -> io::Result<()> {
        self.inner.open_truncate()
    }

    fn open_read(&mut self) -> io::Result<()> {
        self.inner.open_read()
    }

    fn is_open(&self) -> bool {
        self.inner.is_open()
    }

    fn close(&mut self) {
        self.inner.close();
    }

    fn write(&mut self, buf: &[u8]) -> io::Result<()> {
        self.inner.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }

    fn read_next(&mut self) -> io::Result<Option<Vec<u8>>> {
        let FileMode::Reading(reader) = &mut self.inner.mode else {
            return Err(io::Error::new(io::ErrorKind::NotConnected, "file not open for reading"));
        };

        let mut len_buf = [0u8; 4];
        match reader.read_exact(&mut len_buf) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
            Err(e) => return Err(e),
        }
        let len = u32::from_le_bytes(len_buf);
        if len > MAX_FRAME_LEN {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("frame length {} exceeds limit", len),
            ));
        }

        let mut payload = vec![0u8; len as usize];
        reader.read_exact(&mut payload)?;
        Ok(Some(payload))
    }

    fn file_size(&self) -> u64 {
        self.inner.file_size()
    }

    fn frame(&self, message_len: usize) -> Vec<u8> {
        let mut header = Vec::with_capacity(4);
        header.put_u32_le(message_len as u32);
        header
    }
}

/// Construct a backend for the configured filesystem type. Only the local
/// filesystem (`std`) is supported.
pub fn create_backend(fs_type: &str, path: &Path, framed: bool) -> Option<Box<dyn FileBackend>> {
    match fs_type {
        "" | "std" => {
            if framed {
                Some(Box::new(FramedFile::new(path)))
            } else {
                Some(Box::new(PlainFile::new(path)))
            }
        }
        other => {
            tracing::error!(fs_type = other, path = %path.display(), "unsupported filesystem type");
            None
        }
    }
}

/// File names in a directory; empty when the directory cannot be read.
pub(crate) fn list_dir(path: &Path) -> Vec<String> {
    let Ok(entries) = fs::read_dir(path) else {
        return Vec::new();
    };
    entries
        .filter_map(|e| e.ok())
        .filter_map(|e| e.file_name().into_string().ok())
        .collect()
}

/// Remove a file, ignoring a missing target.
pub(crate) fn delete_file(path: &Path) -> io::Result<()> {
    match fs::remove_file(path) {
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        other => other,
    }
}

/// Point `link` at `target`, replacing any existing link.
pub(crate) fn replace_symlink(target: &Path, link: &Path) -> io::Result<()> {
    let _ = delete_file(link);
    #[cfg(unix)]
    {
        std::os::unix::fs::symlink(target, link)
    }
    #[cfg(not(unix))]
    {
        let _ = target;
        Ok(())
    }
}

#[cfg(test)]
#[path = "file_backend_test.rs"]
mod file_backend_test;
