//! Streaming transforms (decompressing reads, compressing writes).
//!
//! Neither direction buffers the whole payload: a [`TransformReader`] pulls
//! fixed-size chunks from its inner stream and hands out decoded bytes as
//! they are produced.
//!
//! # Seeking
//!
//! A transform is a one-way state machine. [`TransformReader`] supports
//! forward seeks by decoding and discarding. Seeking backwards fails with
//! [`VfsError::StreamNotSeekable`]; it is never emulated by restarting the
//! decode. [`TransformWriter`] does not seek at all.

use std::io::SeekFrom;

use crate::VfsError;
use crate::stream::{Stream, seek_target, write_all};

const CHUNK_SIZE: usize = 16 * 1024;

/// A stateful byte transform, such as a decompressor.
///
/// `transform` is called once per input chunk in order; `finish` once after
/// the last chunk to flush trailing state.
pub trait StreamTransform: Send {
    /// Feed the next chunk of input, returning whatever output is ready.
    fn transform(&mut self, input: &[u8]) -> Result<Vec<u8>, VfsError>;

    /// Signal end of input, returning the remaining output.
    fn finish(&mut self) -> Result<Vec<u8>, VfsError>;
}

/// Reads an inner stream through a transform.
pub struct TransformReader {
    inner: Box<dyn Stream>,
    transform: Box<dyn StreamTransform>,
    input: Vec<u8>,
    pending: Vec<u8>,
    pending_pos: usize,
    pos: u64,
    finished: bool,
    expected_len: Option<u64>,
}

impl TransformReader {
    pub fn new(inner: Box<dyn Stream>, transform: Box<dyn StreamTransform>) -> Self {
        Self {
            inner,
            transform,
            input: vec![0; CHUNK_SIZE],
            pending: Vec::new(),
            pending_pos: 0,
            pos: 0,
            finished: false,
            expected_len: None,
        }
    }

    /// Require the decoded output to be exactly `len` bytes.
    ///
    /// Output beyond `len`, or end of input before `len`, is reported as
    /// [`VfsError::Corrupt`].
    pub fn with_expected_len(mut self, len: u64) -> Self {
        self.expected_len = Some(len);
        self
    }

    /// Refill `pending`. Returns `false` at end of output.
    fn fill(&mut self) -> Result<bool, VfsError> {
        while self.pending_pos >= self.pending.len() {
            if self.finished {
                return Ok(false);
            }
            let n = self.inner.read(&mut self.input)?;
            self.pending = if n == 0 {
                self.finished = true;
                self.transform.finish()?
            } else {
                self.transform.transform(&self.input[..n])?
            };
            self.pending_pos = 0;

            if let Some(expected) = self.expected_len {
                let produced = self.pos + self.pending.len() as u64;
                if produced > expected {
                    return Err(VfsError::Corrupt(format!(
                        "decoded stream longer than declared {expected} bytes"
                    )));
                }
                if self.finished && produced != expected {
                    return Err(VfsError::Corrupt(format!(
                        "decoded stream is {produced} bytes, expected {expected}"
                    )));
                }
            }
        }
        Ok(true)
    }
}

impl Stream for TransformReader {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, VfsError> {
        if buf.is_empty() || !self.fill()? {
            return Ok(0);
        }
        let available = &self.pending[self.pending_pos..];
        let n = buf.len().min(available.len());
        buf[..n].copy_from_slice(&available[..n]);
        self.pending_pos += n;
        self.pos += n as u64;
        Ok(n)
    }

    fn seek(&mut self, pos: SeekFrom) -> Result<u64, VfsError> {
        let target = seek_target(pos, self.pos, self.expected_len)?;
        if target < self.pos {
            return Err(VfsError::StreamNotSeekable);
        }
        while self.pos < target {
            if !self.fill()? {
                break;
            }
            let available = (self.pending.len() - self.pending_pos) as u64;
            let skip = available.min(target - self.pos);
            self.pending_pos += skip as usize;
            self.pos += skip;
        }
        Ok(self.pos)
    }

    fn position(&self) -> u64 {
        self.pos
    }

    fn size(&self) -> Option<u64> {
        self.expected_len
    }
}

/// Writes through a transform into an inner stream.
///
/// [`close`](Stream::close) flushes the transform's trailing output and
/// closes the inner stream. Dropping an unclosed writer closes it.
pub struct TransformWriter {
    inner: Box<dyn Stream>,
    transform: Box<dyn StreamTransform>,
    pos: u64,
    closed: bool,
}

impl TransformWriter {
    pub fn new(inner: Box<dyn Stream>, transform: Box<dyn StreamTransform>) -> Self {
        Self {
            inner,
            transform,
            pos: 0,
            closed: false,
        }
    }
}

impl Stream for TransformWriter {
    fn read(&mut self, _buf: &mut [u8]) -> Result<usize, VfsError> {
        Err(VfsError::Unsupported("stream is write-only".into()))
    }

    fn write(&mut self, data: &[u8]) -> Result<usize, VfsError> {
        if self.closed {
            return Err(VfsError::StreamClosed);
        }
        let out = self.transform.transform(data)?;
        write_all(self.inner.as_mut(), &out)?;
        self.pos += data.len() as u64;
        Ok(data.len())
    }

    fn seek(&mut self, pos: SeekFrom) -> Result<u64, VfsError> {
        match seek_target(pos, self.pos, None) {
            Ok(target) if target == self.pos => Ok(self.pos),
            _ => Err(VfsError::StreamNotSeekable),
        }
    }

    fn position(&self) -> u64 {
        self.pos
    }

    fn size(&self) -> Option<u64> {
        None
    }

    fn is_writable(&self) -> bool {
        !self.closed
    }

    fn close(&mut self) -> Result<(), VfsError> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        let tail = self.transform.finish()?;
        write_all(self.inner.as_mut(), &tail)?;
        self.inner.close()
    }
}

impl Drop for TransformWriter {
    fn drop(&mut self) {
        if !self.closed
            && let Err(err) = self.close()
        {
            log::warn!("TransformWriter: failed to flush on drop: {err}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::BufferStream;

    /// Doubles every byte on the way through; emits a marker on finish.
    struct Doubler;

    impl StreamTransform for Doubler {
        fn transform(&mut self, input: &[u8]) -> Result<Vec<u8>, VfsError> {
            Ok(input.iter().flat_map(|&b| [b, b]).collect())
        }

        fn finish(&mut self) -> Result<Vec<u8>, VfsError> {
            Ok(b"!".to_vec())
        }
    }

    fn reader(input: &[u8]) -> TransformReader {
        TransformReader::new(
            Box::new(BufferStream::with_data(input.to_vec())),
            Box::new(Doubler),
        )
    }

    #[test]
    fn reads_transformed_output() {
        let mut stream = reader(b"abc");
        let mut out = Vec::new();
        stream.read_to_end(&mut out).unwrap();
        assert_eq!(out, b"aabbcc!");
    }

    #[test]
    fn forward_seek_discards() {
        let mut stream = reader(b"abc");
        assert_eq!(stream.seek(SeekFrom::Start(3)).unwrap(), 3);
        let mut out = Vec::new();
        stream.read_to_end(&mut out).unwrap();
        assert_eq!(out, b"bcc!");
    }

    #[test]
    fn backward_seek_is_not_supported() {
        let mut stream = reader(b"abc");
        let mut buf = [0u8; 4];
        stream.read(&mut buf).unwrap();
        assert!(matches!(
            stream.seek(SeekFrom::Start(0)),
            Err(VfsError::StreamNotSeekable)
        ));
        assert!(matches!(
            stream.seek(SeekFrom::Current(-1)),
            Err(VfsError::StreamNotSeekable)
        ));
    }

    #[test]
    fn seek_from_end_needs_known_length() {
        let mut stream = reader(b"abc");
        assert!(matches!(
            stream.seek(SeekFrom::End(0)),
            Err(VfsError::StreamNotSeekable)
        ));
    }

    #[test]
    fn expected_length_mismatch_is_corrupt() {
        let mut stream = reader(b"abc").with_expected_len(4);
        let mut out = Vec::new();
        assert!(matches!(
            stream.read_to_end(&mut out),
            Err(VfsError::Corrupt(_))
        ));
    }

    #[test]
    fn expected_length_match_reads_cleanly() {
        let mut stream = reader(b"abc").with_expected_len(7);
        let mut out = Vec::new();
        assert_eq!(stream.read_to_end(&mut out).unwrap(), 7);
        assert_eq!(stream.seek(SeekFrom::End(0)).unwrap(), 7);
    }

    #[test]
    fn writer_flushes_on_close_once() {
        struct Capture(std::sync::Arc<parking_lot::Mutex<Vec<u8>>>);
        impl Stream for Capture {
            fn read(&mut self, _buf: &mut [u8]) -> Result<usize, VfsError> {
                Ok(0)
            }
            fn write(&mut self, data: &[u8]) -> Result<usize, VfsError> {
                self.0.lock().extend_from_slice(data);
                Ok(data.len())
            }
            fn seek(&mut self, _pos: SeekFrom) -> Result<u64, VfsError> {
                Err(VfsError::StreamNotSeekable)
            }
            fn position(&self) -> u64 {
                0
            }
            fn size(&self) -> Option<u64> {
                None
            }
        }

        let sink = std::sync::Arc::new(parking_lot::Mutex::new(Vec::new()));
        let mut writer = TransformWriter::new(Box::new(Capture(sink.clone())), Box::new(Doubler));
        writer.write(b"xy").unwrap();
        assert!(writer.seek(SeekFrom::Start(0)).is_err());
        writer.close().unwrap();
        writer.close().unwrap();
        drop(writer);
        assert_eq!(&*sink.lock(), b"xxyy!");
    }
}
