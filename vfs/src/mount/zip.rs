use std::io::{self, SeekFrom};
use std::path::Path;
use std::sync::Arc;

use zip::ZipArchive;
use zip::result::ZipError;

use super::archive::{ArchiveCore, annotate};
use crate::VfsError;
use crate::archive::{ArchiveEntry, ArchiveToc};
use crate::codec::CompressionMethod;
use crate::mount::{Entry, Mount, MountCapabilities, MountKind};
use crate::stream::{ByteSource, FileSource, MemorySource, OpenMode, Stream, seek_target};

/// Read-only mount over a zip archive.
///
/// The central directory is parsed once at construction; after that each
/// entry is read straight out of the container like any other archive
/// entry. Stored entries are plain windows that seek freely. Deflated
/// entries stream through a raw inflater and only seek forward.
///
/// Encrypted entries and methods other than stored and deflate are
/// rejected with [`VfsError::Unsupported`] when the archive is mounted.
/// Directory records are not kept; directories are implied by file paths.
pub struct ZipArchiveMount {
    core: ArchiveCore,
}

impl ZipArchiveMount {
    /// Open a zip file on the host.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, VfsError> {
        let path = path.as_ref();
        let source: Arc<dyn ByteSource> = Arc::new(FileSource::open(path)?);
        Self::from_source(source, path.display().to_string())
    }

    /// Mount a zip archive held in memory.
    pub fn from_bytes(bytes: impl Into<Arc<[u8]>>, label: impl Into<String>) -> Result<Self, VfsError> {
        Self::from_source(Arc::new(MemorySource::new(bytes)), label)
    }

    /// Parse a zip archive from any byte source.
    pub fn from_source(source: Arc<dyn ByteSource>, label: impl Into<String>) -> Result<Self, VfsError> {
        let label = label.into();
        let toc = read_central_directory(source.clone()).map_err(|e| annotate(e, &label))?;
        log::debug!("ZipArchiveMount: {label} holds {} entries", toc.entries().len());
        Ok(Self {
            core: ArchiveCore::with_toc(source, toc, label)?,
        })
    }

    pub fn toc(&self) -> &ArchiveToc {
        self.core.toc()
    }
}

impl Mount for ZipArchiveMount {
    fn kind(&self) -> MountKind {
        MountKind::ZipArchive
    }

    fn capabilities(&self) -> MountCapabilities {
        MountCapabilities::READ_ONLY
    }

    fn resolve(&self, local: &str) -> Result<Option<Entry>, VfsError> {
        Ok(self.core.resolve(local))
    }

    fn open(&self, entry: &Entry, mode: OpenMode) -> Result<Box<dyn Stream>, VfsError> {
        let archived = self.core.lookup(entry, mode, self.kind())?;
        self.core.open_entry(archived)
    }

    fn list(&self, local_dir: &str) -> Result<Vec<Entry>, VfsError> {
        self.core.list(local_dir)
    }

    fn describe(&self) -> String {
        format!("zip archive {}", self.core.label)
    }
}

fn read_central_directory(source: Arc<dyn ByteSource>) -> Result<ArchiveToc, VfsError> {
    let container_len = source.size()?;
    let reader = SourceReader { source, pos: 0 };
    let mut archive = ZipArchive::new(reader).map_err(zip_error)?;

    let mut entries = Vec::with_capacity(archive.len());
    for i in 0..archive.len() {
        let file = archive.by_index_raw(i).map_err(zip_error)?;
        if file.is_dir() {
            continue;
        }
        if file.encrypted() {
            return Err(VfsError::Unsupported(format!(
                "encrypted zip entry {}",
                file.name()
            )));
        }
        let method = match file.compression() {
            zip::CompressionMethod::Stored => None,
            zip::CompressionMethod::Deflated => Some(CompressionMethod::Deflate),
            other => {
                return Err(VfsError::Unsupported(format!(
                    "zip entry {} uses {other:?}",
                    file.name()
                )));
            }
        };
        entries.push(ArchiveEntry {
            name: file.name().to_owned(),
            offset: file.data_start(),
            stored_len: file.compressed_size(),
            uncompressed_len: file.size(),
            method,
        });
    }
    ArchiveToc::from_entries(entries, container_len)
}

fn zip_error(err: ZipError) -> VfsError {
    match err {
        ZipError::Io(err) => VfsError::from(err),
        other => VfsError::Corrupt(format!("zip: {other}")),
    }
}

/// Sequential [`io::Read`] + [`io::Seek`] view of a [`ByteSource`] for the
/// central directory parser.
struct SourceReader {
    source: Arc<dyn ByteSource>,
    pos: u64,
}

impl io::Read for SourceReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.source.read_at(self.pos, buf)?;
        self.pos += n as u64;
        Ok(n)
    }
}

impl io::Seek for SourceReader {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let end = self.source.size()?;
        self.pos = seek_target(pos, self.pos, Some(end))?;
        Ok(self.pos)
    }
}
