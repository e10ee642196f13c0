//! Compression codecs as [`StreamTransform`]s.
//!
//! Backed by `flate2`'s incremental `Compress`/`Decompress` state machines, so
//! both directions work chunk by chunk.

use flate2::{Compress, Compression, Decompress, FlushCompress, FlushDecompress, Status};

use crate::VfsError;
use crate::transform::StreamTransform;

const OUTPUT_CHUNK: usize = 16 * 1024;

/// Compression method tag carried by archive entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CompressionMethod {
    /// zlib-wrapped deflate (the `.pz` format).
    Zlib,
    /// Raw deflate with no header or checksum, as stored in zip archives.
    Deflate,
}

impl CompressionMethod {
    /// On-disk tag. `0` means stored.
    pub fn tag(self) -> u8 {
        match self {
            Self::Zlib => 1,
            Self::Deflate => 2,
        }
    }

    /// Parse an on-disk tag.
    pub fn from_tag(tag: u8) -> Result<Option<Self>, VfsError> {
        match tag {
            0 => Ok(None),
            1 => Ok(Some(Self::Zlib)),
            2 => Ok(Some(Self::Deflate)),
            other => Err(VfsError::Corrupt(format!("unknown compression tag {other}"))),
        }
    }

    /// A fresh decoder for this method.
    pub fn decoder(self) -> Box<dyn StreamTransform> {
        match self {
            Self::Zlib => Box::new(Inflate::new()),
            Self::Deflate => Box::new(Inflate::raw()),
        }
    }

    /// A fresh encoder for this method.
    pub fn encoder(self) -> Box<dyn StreamTransform> {
        match self {
            Self::Zlib => Box::new(Deflate::new(Compression::default())),
            Self::Deflate => Box::new(Deflate::raw(Compression::default())),
        }
    }
}

fn reserve_output(out: &mut Vec<u8>) {
    if out.capacity() - out.len() < OUTPUT_CHUNK / 4 {
        out.reserve(OUTPUT_CHUNK);
    }
}

/// zlib or raw deflate decoder.
pub struct Inflate {
    state: Decompress,
    done: bool,
}

impl Inflate {
    /// Decoder for zlib-wrapped input.
    pub fn new() -> Self {
        Self {
            state: Decompress::new(true),
            done: false,
        }
    }

    /// Decoder for headerless deflate input.
    pub fn raw() -> Self {
        Self {
            state: Decompress::new(false),
            done: false,
        }
    }

    fn run(&mut self, mut input: &[u8], flush: FlushDecompress) -> Result<Vec<u8>, VfsError> {
        let mut out = Vec::new();
        while !self.done {
            reserve_output(&mut out);
            let (in_before, out_before) = (self.state.total_in(), self.state.total_out());
            let status = self
                .state
                .decompress_vec(input, &mut out, flush)
                .map_err(|e| VfsError::Corrupt(format!("inflate: {e}")))?;
            let consumed = (self.state.total_in() - in_before) as usize;
            let produced = self.state.total_out() - out_before;
            input = &input[consumed..];

            if status == Status::StreamEnd {
                self.done = true;
            } else if input.is_empty() && out.len() < out.capacity() {
                // Output had room left: the decoder has emitted all it can.
                break;
            } else if consumed == 0 && produced == 0 {
                break;
            }
        }
        Ok(out)
    }
}

impl Default for Inflate {
    fn default() -> Self {
        Self::new()
    }
}

impl StreamTransform for Inflate {
    fn transform(&mut self, input: &[u8]) -> Result<Vec<u8>, VfsError> {
        if self.done {
            return Ok(Vec::new());
        }
        self.run(input, FlushDecompress::None)
    }

    fn finish(&mut self) -> Result<Vec<u8>, VfsError> {
        let tail = self.run(&[], FlushDecompress::Finish)?;
        if !self.done {
            return Err(VfsError::Corrupt("truncated deflate stream".into()));
        }
        Ok(tail)
    }
}

/// zlib or raw deflate encoder.
pub struct Deflate {
    state: Compress,
    finished: bool,
}

impl Deflate {
    pub fn new(level: Compression) -> Self {
        Self {
            state: Compress::new(level, true),
            finished: false,
        }
    }

    pub fn raw(level: Compression) -> Self {
        Self {
            state: Compress::new(level, false),
            finished: false,
        }
    }
}

impl StreamTransform for Deflate {
    fn transform(&mut self, mut input: &[u8]) -> Result<Vec<u8>, VfsError> {
        if self.finished {
            return Err(VfsError::StreamClosed);
        }
        let mut out = Vec::new();
        while !input.is_empty() {
            reserve_output(&mut out);
            let in_before = self.state.total_in();
            self.state
                .compress_vec(input, &mut out, FlushCompress::None)
                .map_err(|e| VfsError::Io(std::io::Error::other(e)))?;
            let consumed = (self.state.total_in() - in_before) as usize;
            input = &input[consumed..];
        }
        Ok(out)
    }

    fn finish(&mut self) -> Result<Vec<u8>, VfsError> {
        if self.finished {
            return Ok(Vec::new());
        }
        let mut out = Vec::new();
        loop {
            reserve_output(&mut out);
            let status = self
                .state
                .compress_vec(&[], &mut out, FlushCompress::Finish)
                .map_err(|e| VfsError::Io(std::io::Error::other(e)))?;
            if status == Status::StreamEnd {
                break;
            }
        }
        self.finished = true;
        Ok(out)
    }
}

/// Compress a whole buffer.
pub fn compress(method: CompressionMethod, data: &[u8]) -> Result<Vec<u8>, VfsError> {
    let mut encoder = method.encoder();
    let mut out = encoder.transform(data)?;
    out.extend(encoder.finish()?);
    Ok(out)
}

/// Decompress a whole buffer.
pub fn decompress(method: CompressionMethod, data: &[u8]) -> Result<Vec<u8>, VfsError> {
    let mut decoder = method.decoder();
    let mut out = decoder.transform(data)?;
    out.extend(decoder.finish()?);
    Ok(out)
}
