use std::io::{self, SeekFrom};
use std::sync::Arc;

use crate::VfsError;
use crate::stream::Stream;
use crate::weak::{Liveness, WeakToken};

/// Largest up-front reservation made by [`VfsStream::read_to_end`].
const READ_RESERVE_LIMIT: u64 = 64 * 1024;

/// Watches the mounts a handle was resolved from.
///
/// Shared between a [`VirtualFile`](crate::VirtualFile) and every stream
/// opened from it, so a stream keeps observing unmounts after the file
/// handle itself is dropped.
pub(crate) struct MountWatch {
    liveness: Liveness,
    _tokens: Vec<WeakToken>,
}

impl MountWatch {
    pub(crate) fn new(liveness: Liveness, tokens: Vec<WeakToken>) -> Self {
        Self {
            liveness,
            _tokens: tokens,
        }
    }

    pub(crate) fn is_alive(&self) -> bool {
        self.liveness.is_alive()
    }
}

/// Lifecycle of a [`VfsStream`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    Open,
    Closed,
    /// The backing mount was unmounted while the stream was open.
    Stale,
}

/// A stream opened through the virtual file system.
///
/// Every operation first checks that the mount(s) behind the stream are still
/// mounted; after an unmount it fails with [`VfsError::Stale`]. After
/// [`close`](VfsStream::close) operations fail with
/// [`VfsError::StreamClosed`]. Dropping an open stream closes it, which
/// commits buffered writes on mounts that stage them.
///
/// Implements [`std::io::Read`], [`std::io::Write`] and [`std::io::Seek`].
pub struct VfsStream {
    inner: Box<dyn Stream>,
    watch: Option<Arc<MountWatch>>,
    state: StreamState,
    path: String,
}

impl VfsStream {
    pub(crate) fn new(inner: Box<dyn Stream>, watch: Option<Arc<MountWatch>>, path: String) -> Self {
        Self {
            inner,
            watch,
            state: StreamState::Open,
            path,
        }
    }

    /// Wrap a raw stream that is not tied to any mount.
    pub fn detached(inner: Box<dyn Stream>, path: impl Into<String>) -> Self {
        Self::new(inner, None, path.into())
    }

    /// Virtual path this stream was opened for.
    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn state(&mut self) -> StreamState {
        if self.state == StreamState::Open && !self.watch_alive() {
            self.state = StreamState::Stale;
        }
        self.state
    }

    fn watch_alive(&self) -> bool {
        self.watch.as_ref().is_none_or(|watch| watch.is_alive())
    }

    fn check(&mut self) -> Result<(), VfsError> {
        match self.state() {
            StreamState::Open => Ok(()),
            StreamState::Closed => Err(VfsError::StreamClosed),
            StreamState::Stale => Err(VfsError::Stale(self.path.clone())),
        }
    }

    pub fn read(&mut self, buf: &mut [u8]) -> Result<usize, VfsError> {
        self.check()?;
        self.inner.read(buf)
    }

    pub fn write(&mut self, data: &[u8]) -> Result<usize, VfsError> {
        self.check()?;
        self.inner.write(data)
    }

    pub fn seek(&mut self, pos: SeekFrom) -> Result<u64, VfsError> {
        self.check()?;
        self.inner.seek(pos)
    }

    pub fn position(&self) -> u64 {
        self.inner.position()
    }

    pub fn size(&self) -> Option<u64> {
        self.inner.size()
    }

    pub fn is_writable(&self) -> bool {
        self.inner.is_writable()
    }

    /// Read from the cursor to the end.
    ///
    /// The declared size only seeds a bounded reservation; it comes from
    /// container metadata and is checked against the bytes actually read.
    pub fn read_to_end(&mut self) -> Result<Vec<u8>, VfsError> {
        self.check()?;
        let hint = self.size().unwrap_or(0).min(READ_RESERVE_LIMIT);
        let mut out = Vec::with_capacity(hint as usize);
        let mut chunk = vec![0u8; 16 * 1024];
        loop {
            let n = self.read(&mut chunk)?;
            if n == 0 {
                break;
            }
            out.extend_from_slice(&chunk[..n]);
        }
        Ok(out)
    }

    /// Write all of `data`.
    pub fn write_all(&mut self, mut data: &[u8]) -> Result<(), VfsError> {
        while !data.is_empty() {
            let n = self.write(data)?;
            if n == 0 {
                return Err(VfsError::Unsupported("stream accepted no more bytes".into()));
            }
            data = &data[n..];
        }
        Ok(())
    }

    /// Flush and close the stream. Closing twice is a no-op.
    pub fn close(&mut self) -> Result<(), VfsError> {
        match self.state() {
            StreamState::Closed => Ok(()),
            StreamState::Stale => {
                self.state = StreamState::Closed;
                Err(VfsError::Stale(self.path.clone()))
            }
            StreamState::Open => {
                self.state = StreamState::Closed;
                self.inner.close()
            }
        }
    }
}

impl Drop for VfsStream {
    fn drop(&mut self) {
        if self.state == StreamState::Open
            && self.watch_alive()
            && let Err(err) = self.inner.close()
        {
            log::warn!("VfsStream: failed to close {} on drop: {err}", self.path);
        }
    }
}

impl std::fmt::Debug for VfsStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VfsStream")
            .field("path", &self.path)
            .field("state", &self.state)
            .field("position", &self.inner.position())
            .finish()
    }
}

impl io::Read for VfsStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        VfsStream::read(self, buf).map_err(Into::into)
    }
}

impl io::Write for VfsStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        VfsStream::write(self, buf).map_err(Into::into)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.check().map_err(io::Error::from)
    }
}

impl io::Seek for VfsStream {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        VfsStream::seek(self, pos).map_err(Into::into)
    }
}
