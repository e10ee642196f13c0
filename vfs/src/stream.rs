//! Seekable byte streams over ranges of an underlying resource.
//!
//! A [`ByteSource`] is positioned random access to some bytes (a host file,
//! an in-memory blob). A [`SubStream`] is a session over an `(offset, length)`
//! window of a source with its own cursor, so any number of sessions over
//! the same source never interfere. [`open`] composes a window with an
//! optional [`StreamTransform`](crate::transform::StreamTransform).

use std::fs::File;
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::VfsError;
use crate::transform::{StreamTransform, TransformReader, TransformWriter};

/// How a stream is opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum OpenMode {
    /// Read from the start.
    #[default]
    Read,
    /// Write from the start, replacing previous content.
    Write,
    /// Write after existing content.
    Append,
}

impl OpenMode {
    pub fn is_write(self) -> bool {
        matches!(self, Self::Write | Self::Append)
    }
}

/// A read/write session with its own cursor.
///
/// Only [`read`](Stream::read) and [`seek`](Stream::seek) are required;
/// writing defaults to [`VfsError::Unsupported`].
pub trait Stream: Send {
    /// Read up to `buf.len()` bytes. Returns 0 at end of stream.
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, VfsError>;

    /// Write bytes, returning how many were accepted.
    fn write(&mut self, _data: &[u8]) -> Result<usize, VfsError> {
        Err(VfsError::Unsupported("stream is read-only".into()))
    }

    /// Move the cursor. Returns the new position.
    fn seek(&mut self, pos: SeekFrom) -> Result<u64, VfsError>;

    /// Current cursor position.
    fn position(&self) -> u64;

    /// Total logical size, if known.
    fn size(&self) -> Option<u64>;

    fn is_writable(&self) -> bool {
        false
    }

    /// Flush trailing state. Further use after close is undefined for raw
    /// streams; [`VfsStream`](crate::VfsStream) turns it into an error.
    fn close(&mut self) -> Result<(), VfsError> {
        Ok(())
    }

    /// Read everything from the cursor to the end.
    fn read_to_end(&mut self, out: &mut Vec<u8>) -> Result<usize, VfsError> {
        let start = out.len();
        let mut chunk = [0u8; 8192];
        loop {
            let n = self.read(&mut chunk)?;
            if n == 0 {
                break;
            }
            out.extend_from_slice(&chunk[..n]);
        }
        Ok(out.len() - start)
    }
}

/// Write every byte of `data` or fail.
pub(crate) fn write_all(stream: &mut dyn Stream, mut data: &[u8]) -> Result<(), VfsError> {
    while !data.is_empty() {
        let n = stream.write(data)?;
        if n == 0 {
            return Err(VfsError::Unsupported("stream accepted no more bytes".into()));
        }
        data = &data[n..];
    }
    Ok(())
}

/// Positioned random access to a resource's bytes.
pub trait ByteSource: Send + Sync {
    /// Read into `buf` starting at `offset`. Returns 0 past the end.
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<usize, VfsError>;

    /// Current length in bytes.
    fn size(&self) -> Result<u64, VfsError>;

    fn is_writable(&self) -> bool {
        false
    }

    /// Write `data` at `offset`, extending the resource if needed.
    fn write_at(&self, _offset: u64, _data: &[u8]) -> Result<usize, VfsError> {
        Err(VfsError::Unsupported("resource is read-only".into()))
    }
}

/// A host file as a [`ByteSource`].
///
/// Seek-then-read happens under a lock, so sessions sharing one handle see
/// positioned reads and never a shared cursor.
pub struct FileSource {
    file: Mutex<File>,
    path: PathBuf,
    writable: bool,
}

impl FileSource {
    /// Open an existing file for reading.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, VfsError> {
        let path = path.into();
        let file = File::open(&path).map_err(|e| VfsError::from_io(e, &path.to_string_lossy()))?;
        Ok(Self {
            file: Mutex::new(file),
            path,
            writable: false,
        })
    }

    /// Open (or create) a file for reading and writing.
    pub fn open_rw(path: impl Into<PathBuf>) -> Result<Self, VfsError> {
        let path = path.into();
        let file = File::options()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)
            .map_err(|e| VfsError::from_io(e, &path.to_string_lossy()))?;
        Ok(Self {
            file: Mutex::new(file),
            path,
            writable: true,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ByteSource for FileSource {
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<usize, VfsError> {
        let mut file = self.file.lock();
        file.seek(SeekFrom::Start(offset))?;
        let mut total = 0;
        while total < buf.len() {
            match file.read(&mut buf[total..]) {
                Ok(0) => break,
                Ok(n) => total += n,
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(total)
    }

    fn size(&self) -> Result<u64, VfsError> {
        Ok(self.file.lock().metadata()?.len())
    }

    fn is_writable(&self) -> bool {
        self.writable
    }

    fn write_at(&self, offset: u64, data: &[u8]) -> Result<usize, VfsError> {
        if !self.writable {
            return Err(VfsError::Unsupported(format!(
                "{} opened read-only",
                self.path.display()
            )));
        }
        let mut file = self.file.lock();
        file.seek(SeekFrom::Start(offset))?;
        file.write_all(data)?;
        Ok(data.len())
    }
}

/// An immutable in-memory blob as a [`ByteSource`].
#[derive(Debug, Clone)]
pub struct MemorySource {
    data: Arc<[u8]>,
}

impl MemorySource {
    pub fn new(data: impl Into<Arc<[u8]>>) -> Self {
        Self { data: data.into() }
    }

    pub fn bytes(&self) -> &[u8] {
        &self.data
    }
}

impl ByteSource for MemorySource {
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<usize, VfsError> {
        let len = self.data.len() as u64;
        if offset >= len {
            return Ok(0);
        }
        let start = offset as usize;
        let n = buf.len().min(self.data.len() - start);
        buf[..n].copy_from_slice(&self.data[start..start + n]);
        Ok(n)
    }

    fn size(&self) -> Result<u64, VfsError> {
        Ok(self.data.len() as u64)
    }
}

/// Resolve a [`SeekFrom`] against a current position and an optional end.
pub(crate) fn seek_target(pos: SeekFrom, current: u64, end: Option<u64>) -> Result<u64, VfsError> {
    let target = match pos {
        SeekFrom::Start(offset) => return Ok(offset),
        SeekFrom::Current(delta) => current as i128 + delta as i128,
        SeekFrom::End(delta) => match end {
            Some(end) => end as i128 + delta as i128,
            None => return Err(VfsError::StreamNotSeekable),
        },
    };
    if target < 0 {
        return Err(VfsError::Unsupported("seek before start of stream".into()));
    }
    Ok(target as u64)
}

/// A window of `length` bytes starting at `start` within a [`ByteSource`].
pub struct SubStream {
    source: Arc<dyn ByteSource>,
    start: u64,
    length: u64,
    pos: u64,
    writable: bool,
}

impl SubStream {
    /// A read-only window.
    pub fn new(source: Arc<dyn ByteSource>, start: u64, length: u64) -> Self {
        Self {
            source,
            start,
            length,
            pos: 0,
            writable: false,
        }
    }

    /// A writable window. Fails if the source is not writable.
    pub fn writable(source: Arc<dyn ByteSource>, start: u64, length: u64) -> Result<Self, VfsError> {
        if !source.is_writable() {
            return Err(VfsError::Unsupported("resource is read-only".into()));
        }
        Ok(Self {
            source,
            start,
            length,
            pos: 0,
            writable: true,
        })
    }
}

impl Stream for SubStream {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, VfsError> {
        if self.pos >= self.length || buf.is_empty() {
            return Ok(0);
        }
        let remaining = self.length - self.pos;
        let want = (buf.len() as u64).min(remaining) as usize;
        let n = self.source.read_at(self.start + self.pos, &mut buf[..want])?;
        self.pos += n as u64;
        Ok(n)
    }

    fn write(&mut self, data: &[u8]) -> Result<usize, VfsError> {
        if !self.writable {
            return Err(VfsError::Unsupported("stream is read-only".into()));
        }
        if data.is_empty() {
            return Ok(0);
        }
        let remaining = self.length.saturating_sub(self.pos);
        if remaining == 0 {
            return Err(VfsError::Unsupported("write past end of stream window".into()));
        }
        let n = (data.len() as u64).min(remaining) as usize;
        let written = self.source.write_at(self.start + self.pos, &data[..n])?;
        self.pos += written as u64;
        Ok(written)
    }

    fn seek(&mut self, pos: SeekFrom) -> Result<u64, VfsError> {
        self.pos = seek_target(pos, self.pos, Some(self.length))?;
        Ok(self.pos)
    }

    fn position(&self) -> u64 {
        self.pos
    }

    fn size(&self) -> Option<u64> {
        Some(self.length)
    }

    fn is_writable(&self) -> bool {
        self.writable
    }
}

/// Open a session over `length` bytes of `resource` starting at `offset`.
///
/// Read mode optionally decodes through `transform`; the result then only
/// supports forward seeks. Write modes require a writable resource and push
/// bytes through `transform` (an encoder) when one is given.
pub fn open(
    resource: Arc<dyn ByteSource>,
    offset: u64,
    length: u64,
    mode: OpenMode,
    transform: Option<Box<dyn StreamTransform>>,
) -> Result<Box<dyn Stream>, VfsError> {
    match mode {
        OpenMode::Read => {
            let window = SubStream::new(resource, offset, length);
            Ok(match transform {
                Some(transform) => Box::new(TransformReader::new(Box::new(window), transform)),
                None => Box::new(window),
            })
        }
        OpenMode::Write | OpenMode::Append => {
            let mut window = SubStream::writable(resource, offset, length)?;
            if mode == OpenMode::Append {
                window.seek(SeekFrom::End(0))?;
            }
            Ok(match transform {
                Some(transform) => Box::new(TransformWriter::new(Box::new(window), transform)),
                None => Box::new(window),
            })
        }
    }
}

/// A growable in-memory stream, used to stage writes.
#[derive(Debug, Default)]
pub struct BufferStream {
    data: Vec<u8>,
    pos: u64,
}

impl BufferStream {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_data(data: Vec<u8>) -> Self {
        Self { data, pos: 0 }
    }

    pub fn into_inner(self) -> Vec<u8> {
        self.data
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub(crate) fn take(&mut self) -> Vec<u8> {
        self.pos = 0;
        std::mem::take(&mut self.data)
    }
}

impl Stream for BufferStream {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, VfsError> {
        let len = self.data.len() as u64;
        if self.pos >= len {
            return Ok(0);
        }
        let start = self.pos as usize;
        let n = buf.len().min(self.data.len() - start);
        buf[..n].copy_from_slice(&self.data[start..start + n]);
        self.pos += n as u64;
        Ok(n)
    }

    fn write(&mut self, data: &[u8]) -> Result<usize, VfsError> {
        let start = self.pos as usize;
        if start > self.data.len() {
            self.data.resize(start, 0);
        }
        let overlap = (self.data.len() - start).min(data.len());
        self.data[start..start + overlap].copy_from_slice(&data[..overlap]);
        self.data.extend_from_slice(&data[overlap..]);
        self.pos += data.len() as u64;
        Ok(data.len())
    }

    fn seek(&mut self, pos: SeekFrom) -> Result<u64, VfsError> {
        self.pos = seek_target(pos, self.pos, Some(self.data.len() as u64))?;
        Ok(self.pos)
    }

    fn position(&self) -> u64 {
        self.pos
    }

    fn size(&self) -> Option<u64> {
        Some(self.data.len() as u64)
    }

    fn is_writable(&self) -> bool {
        true
    }
}
