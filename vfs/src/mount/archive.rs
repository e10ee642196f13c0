use std::path::Path;
use std::sync::Arc;

use crate::VfsError;
use crate::archive::{ArchiveEntry, ArchiveToc};
use crate::mount::{
    Entry, Mount, MountCapabilities, MountKind, implied_children, read_only_error, require_file,
};
use crate::stream::{self, ByteSource, FileSource, OpenMode, Stream, SubStream};
use crate::transform::TransformReader;

/// State shared by every archive variant: the container bytes and its TOC.
pub(super) struct ArchiveCore {
    source: Arc<dyn ByteSource>,
    toc: ArchiveToc,
    pub(super) label: String,
}

impl ArchiveCore {
    fn open_file(path: &Path) -> Result<Self, VfsError> {
        let source: Arc<dyn ByteSource> = Arc::new(FileSource::open(path)?);
        let toc = ArchiveToc::read(source.as_ref())
            .map_err(|e| annotate(e, &path.display().to_string()))?;
        Ok(Self {
            source,
            toc,
            label: path.display().to_string(),
        })
    }

    fn from_source(source: Arc<dyn ByteSource>, label: String) -> Result<Self, VfsError> {
        let toc = ArchiveToc::read(source.as_ref()).map_err(|e| annotate(e, &label))?;
        Ok(Self { source, toc, label })
    }

    pub(super) fn with_toc(
        source: Arc<dyn ByteSource>,
        toc: ArchiveToc,
        label: String,
    ) -> Result<Self, VfsError> {
        let len = source.size()?;
        if let Some(entry) = toc.entries().iter().find(|e| e.offset.saturating_add(e.stored_len) > len) {
            return Err(VfsError::Corrupt(format!(
                "{label}: entry {} lies outside the container",
                entry.name
            )));
        }
        Ok(Self { source, toc, label })
    }

    fn entry_for(&self, archived: &ArchiveEntry) -> Entry {
        let entry = Entry::file(archived.name.clone(), archived.uncompressed_len);
        if archived.is_compressed() {
            entry.with_stored_size(archived.stored_len)
        } else {
            entry
        }
    }

    pub(super) fn resolve(&self, local: &str) -> Option<Entry> {
        if let Some(archived) = self.toc.get(local) {
            return Some(self.entry_for(archived));
        }
        self.toc.is_directory(local).then(|| Entry::directory(local))
    }

    pub(super) fn lookup(
        &self,
        entry: &Entry,
        mode: OpenMode,
        kind: MountKind,
    ) -> Result<&ArchiveEntry, VfsError> {
        require_file(entry)?;
        if mode.is_write() {
            return Err(read_only_error(kind, &entry.path));
        }
        self.toc
            .get(&entry.path)
            .ok_or_else(|| VfsError::NotFound(entry.path.clone()))
    }

    /// Read session over one entry, decoding it when it carries a method.
    pub(super) fn open_entry(&self, archived: &ArchiveEntry) -> Result<Box<dyn Stream>, VfsError> {
        match archived.method {
            None => stream::open(
                self.source.clone(),
                archived.offset,
                archived.stored_len,
                OpenMode::Read,
                None,
            ),
            Some(method) => {
                let window = SubStream::new(self.source.clone(), archived.offset, archived.stored_len);
                let reader = TransformReader::new(Box::new(window), method.decoder())
                    .with_expected_len(archived.uncompressed_len);
                Ok(Box::new(reader))
            }
        }
    }

    pub(super) fn toc(&self) -> &ArchiveToc {
        &self.toc
    }

    pub(super) fn list(&self, local_dir: &str) -> Result<Vec<Entry>, VfsError> {
        if self.toc.get(local_dir).is_some() {
            return Err(VfsError::NotADirectory(local_dir.to_owned()));
        }
        if !self.toc.is_directory(local_dir) {
            return Err(VfsError::NotFound(local_dir.to_owned()));
        }
        Ok(implied_children(
            local_dir,
            self.toc
                .entries()
                .iter()
                .map(|e| (e.name.as_str(), Some(self.entry_for(e)))),
        ))
    }
}

pub(super) fn annotate(err: VfsError, label: &str) -> VfsError {
    match err {
        VfsError::Corrupt(msg) => VfsError::Corrupt(format!("{label}: {msg}")),
        other => other,
    }
}

/// Read-only mount over a container of stored (uncompressed) entries.
///
/// Every entry is served as a [`SubStream`] window into the container, so
/// opening an entry costs no copy and any number of sessions may read the
/// same entry at once. Containers holding compressed entries are rejected
/// with [`VfsError::Corrupt`]; mount those with [`CompressedArchiveMount`].
pub struct ArchiveMount {
    core: ArchiveCore,
}

impl ArchiveMount {
    /// Open an `LVPK` container on the host.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, VfsError> {
        Self::checked(ArchiveCore::open_file(path.as_ref())?)
    }

    /// Parse an `LVPK` container from any byte source.
    pub fn from_source(source: Arc<dyn ByteSource>, label: impl Into<String>) -> Result<Self, VfsError> {
        Self::checked(ArchiveCore::from_source(source, label.into())?)
    }

    /// Mount a container whose TOC was parsed elsewhere.
    pub fn with_toc(
        source: Arc<dyn ByteSource>,
        toc: ArchiveToc,
        label: impl Into<String>,
    ) -> Result<Self, VfsError> {
        Self::checked(ArchiveCore::with_toc(source, toc, label.into())?)
    }

    fn checked(core: ArchiveCore) -> Result<Self, VfsError> {
        if let Some(entry) = core.toc.entries().iter().find(|e| e.is_compressed()) {
            return Err(VfsError::Corrupt(format!(
                "{}: entry {} is compressed; mount it as a compressed archive",
                core.label, entry.name
            )));
        }
        Ok(Self { core })
    }

    pub fn toc(&self) -> &ArchiveToc {
        &self.core.toc
    }
}

impl Mount for ArchiveMount {
    fn kind(&self) -> MountKind {
        MountKind::ArchiveContainer
    }

    fn capabilities(&self) -> MountCapabilities {
        MountCapabilities::READ_ONLY
    }

    fn resolve(&self, local: &str) -> Result<Option<Entry>, VfsError> {
        Ok(self.core.resolve(local))
    }

    fn open(&self, entry: &Entry, mode: OpenMode) -> Result<Box<dyn Stream>, VfsError> {
        let archived = self.core.lookup(entry, mode, self.kind())?;
        Ok(Box::new(SubStream::new(
            self.core.source.clone(),
            archived.offset,
            archived.stored_len,
        )))
    }

    fn list(&self, local_dir: &str) -> Result<Vec<Entry>, VfsError> {
        self.core.list(local_dir)
    }

    fn describe(&self) -> String {
        format!("archive {}", self.core.label)
    }
}

/// Read-only mount over a container whose entries may be compressed.
///
/// Compressed entries stream through the decoder for their method tag;
/// nothing is inflated up front. The decoded length must match the TOC's
/// uncompressed length or reads fail with [`VfsError::Corrupt`]. Streams over
/// compressed entries only seek forward (see [`crate::transform`]).
pub struct CompressedArchiveMount {
    core: ArchiveCore,
}

impl CompressedArchiveMount {
    /// Open an `LVPK` container on the host.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, VfsError> {
        Ok(Self {
            core: ArchiveCore::open_file(path.as_ref())?,
        })
    }

    /// Parse an `LVPK` container from any byte source.
    pub fn from_source(source: Arc<dyn ByteSource>, label: impl Into<String>) -> Result<Self, VfsError> {
        Ok(Self {
            core: ArchiveCore::from_source(source, label.into())?,
        })
    }

    /// Mount a container whose TOC was parsed elsewhere.
    pub fn with_toc(
        source: Arc<dyn ByteSource>,
        toc: ArchiveToc,
        label: impl Into<String>,
    ) -> Result<Self, VfsError> {
        Ok(Self {
            core: ArchiveCore::with_toc(source, toc, label.into())?,
        })
    }

    pub fn toc(&self) -> &ArchiveToc {
        &self.core.toc
    }
}

impl Mount for CompressedArchiveMount {
    fn kind(&self) -> MountKind {
        MountKind::CompressedArchive
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
        format!("compressed archive {}", self.core.label)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::ArchiveWriter;
    use crate::codec::{self, CompressionMethod};
    use crate::stream::MemorySource;
    use std::io::{Cursor, SeekFrom};

    fn container(compress: bool) -> Arc<dyn ByteSource> {
        let method = compress.then_some(CompressionMethod::Zlib);
        let mut writer = ArchiveWriter::new(Cursor::new(Vec::new())).unwrap();
        writer.add("readme.txt", b"hello archive", None).unwrap();
        writer.add("models/panda.egg", &[7u8; 300], method).unwrap();
        writer.add("models/env/sky.egg", b"sky", method).unwrap();
        Arc::new(MemorySource::new(writer.finish().unwrap().into_inner()))
    }

    fn read_all(mount: &dyn Mount, path: &str) -> Vec<u8> {
        let entry = mount.resolve(path).unwrap().unwrap();
        let mut stream = mount.open(&entry, OpenMode::Read).unwrap();
        let mut out = Vec::new();
        stream.read_to_end(&mut out).unwrap();
        out
    }

    #[test]
    fn stored_archive_reads_entries() {
        let mount = ArchiveMount::from_source(container(false), "test").unwrap();
        assert_eq!(read_all(&mount, "readme.txt"), b"hello archive");
        assert_eq!(read_all(&mount, "models/panda.egg"), vec![7u8; 300]);
    }

    #[test]
    fn stored_archive_rejects_compressed_entries() {
        let result = ArchiveMount::from_source(container(true), "test");
        assert!(matches!(result, Err(VfsError::Corrupt(_))));
    }

    #[test]
    fn resolve_is_exact() {
        let mount = ArchiveMount::from_source(container(false), "test").unwrap();
        assert!(mount.resolve("models").unwrap().unwrap().is_directory());
        assert!(mount.resolve("").unwrap().unwrap().is_directory());
        assert!(mount.resolve("model").unwrap().is_none());
        assert!(mount.resolve("readme").unwrap().is_none());
    }

    #[test]
    fn list_archive_directories() {
        let mount = ArchiveMount::from_source(container(false), "test").unwrap();
        let names: Vec<_> = mount.list("models").unwrap().into_iter().map(|e| e.name).collect();
        assert_eq!(names, ["env", "panda.egg"]);
        assert!(matches!(
            mount.list("readme.txt"),
            Err(VfsError::NotADirectory(_))
        ));
        assert!(matches!(mount.list("nope"), Err(VfsError::NotFound(_))));
    }

    #[test]
    fn write_is_unsupported() {
        let mount = ArchiveMount::from_source(container(false), "test").unwrap();
        let entry = mount.resolve("readme.txt").unwrap().unwrap();
        assert!(matches!(
            mount.open(&entry, OpenMode::Write),
            Err(VfsError::Unsupported(_))
        ));
        assert!(matches!(mount.create("new.txt"), Err(VfsError::Unsupported(_))));
    }

    #[test]
    fn compressed_archive_inflates_entries() {
        let mount = CompressedArchiveMount::from_source(container(true), "test").unwrap();
        let entry = mount.resolve("models/panda.egg").unwrap().unwrap();
        assert_eq!(entry.size, Some(300));
        assert!(entry.stored_size.unwrap() < 300);
        assert_eq!(read_all(&mount, "models/panda.egg"), vec![7u8; 300]);
        assert_eq!(read_all(&mount, "readme.txt"), b"hello archive");
    }

    #[test]
    fn compressed_entry_only_seeks_forward() {
        let mount = CompressedArchiveMount::from_source(container(true), "test").unwrap();
        let entry = mount.resolve("models/panda.egg").unwrap().unwrap();
        let mut stream = mount.open(&entry, OpenMode::Read).unwrap();
        assert_eq!(stream.seek(SeekFrom::Start(100)).unwrap(), 100);
        assert!(matches!(
            stream.seek(SeekFrom::Start(10)),
            Err(VfsError::StreamNotSeekable)
        ));
    }

    #[test]
    fn fifty_stored_bytes_inflate_to_five_hundred() {
        let plain: Vec<u8> = b"0123456789".iter().copied().cycle().take(500).collect();
        let packed = codec::compress(CompressionMethod::Zlib, &plain).unwrap();
        assert!(packed.len() <= 50);

        let source: Arc<dyn ByteSource> = Arc::new(MemorySource::new(packed.clone()));
        let toc = ArchiveToc::from_entries(
            vec![ArchiveEntry {
                name: "blob.bin".into(),
                offset: 0,
                stored_len: packed.len() as u64,
                uncompressed_len: 500,
                method: Some(CompressionMethod::Zlib),
            }],
            packed.len() as u64,
        )
        .unwrap();
        let mount = CompressedArchiveMount::with_toc(source, toc, "blob").unwrap();
        let out = read_all(&mount, "blob.bin");
        assert_eq!(out.len(), 500);
        assert_eq!(out, plain);
    }

    #[test]
    fn lying_uncompressed_length_is_corrupt() {
        let plain = vec![1u8; 200];
        let packed = codec::compress(CompressionMethod::Zlib, &plain).unwrap();
        let source: Arc<dyn ByteSource> = Arc::new(MemorySource::new(packed.clone()));
        let toc = ArchiveToc::from_entries(
            vec![ArchiveEntry {
                name: "short.bin".into(),
                offset: 0,
                stored_len: packed.len() as u64,
                uncompressed_len: 100,
                method: Some(CompressionMethod::Zlib),
            }],
            packed.len() as u64,
        )
        .unwrap();
        let mount = CompressedArchiveMount::with_toc(source, toc, "short").unwrap();
        let entry = mount.resolve("short.bin").unwrap().unwrap();
        let mut stream = mount.open(&entry, OpenMode::Read).unwrap();
        let mut out = Vec::new();
        assert!(matches!(
            stream.read_to_end(&mut out),
            Err(VfsError::Corrupt(_))
        ));
    }

    #[test]
    fn concurrent_sessions_over_one_entry() {
        let mount = CompressedArchiveMount::from_source(container(true), "test").unwrap();
        let entry = mount.resolve("models/panda.egg").unwrap().unwrap();
        let mut a = mount.open(&entry, OpenMode::Read).unwrap();
        let mut b = mount.open(&entry, OpenMode::Read).unwrap();
        let mut buf = [0u8; 50];
        a.read(&mut buf).unwrap();
        a.close().unwrap();
        drop(a);
        let mut out = Vec::new();
        b.read_to_end(&mut out).unwrap();
        assert_eq!(out, vec![7u8; 300]);
    }
}
