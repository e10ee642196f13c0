//! Archive container table of contents and the built-in `LVPK` format.
//!
//! Archive mounts consume an [`ArchiveToc`]: per entry a name, start offset,
//! stored length, uncompressed length and optional compression tag. A TOC
//! can come from any container parser through [`ArchiveToc::from_entries`];
//! this module also ships one concrete format.
//!
//! # `LVPK` layout (little endian)
//!
//! ```text
//! header   "LVPK" u16 version u16 flags u32 entry_count u64 toc_offset u32 reserved
//! data     entry payloads, back to back
//! toc      per entry: u16 name_len, name (UTF-8), u64 offset,
//!          u64 stored_len, u64 uncompressed_len, u8 method tag
//! ```

use std::collections::{BTreeMap, BTreeSet};
use std::fs::File;
use std::io::{Seek, SeekFrom, Write};
use std::path::Path;

use crate::VfsError;
use crate::codec::{self, CompressionMethod};
use crate::path;
use crate::stream::ByteSource;

/// Container magic.
pub const MAGIC: [u8; 4] = *b"LVPK";
/// Current container version.
pub const VERSION: u16 = 1;
/// Size of the fixed header.
pub const HEADER_LEN: u64 = 24;
/// Largest table of contents [`ArchiveToc::read`] will load.
pub const MAX_TOC_LEN: u64 = 64 << 20;
/// Bytes of one TOC record with an empty name.
const MIN_RECORD_LEN: u64 = 2 + 8 + 8 + 8 + 1;

/// One entry of an archive's table of contents.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveEntry {
    /// Container-relative path, `/`-separated, no leading slash.
    pub name: String,
    /// Start of the payload within the container.
    pub offset: u64,
    /// Bytes the payload occupies in the container.
    pub stored_len: u64,
    /// Bytes after decompression (equal to `stored_len` when stored).
    pub uncompressed_len: u64,
    pub method: Option<CompressionMethod>,
}

impl ArchiveEntry {
    /// An uncompressed entry.
    pub fn stored(name: impl Into<String>, offset: u64, len: u64) -> Self {
        Self {
            name: name.into(),
            offset,
            stored_len: len,
            uncompressed_len: len,
            method: None,
        }
    }

    pub fn is_compressed(&self) -> bool {
        self.method.is_some()
    }
}

/// Validated table of contents with a path index.
#[derive(Debug, Clone, Default)]
pub struct ArchiveToc {
    entries: Vec<ArchiveEntry>,
    index: BTreeMap<String, usize>,
    directories: BTreeSet<String>,
}

impl ArchiveToc {
    /// Build a TOC from entries produced by an external container parser.
    ///
    /// Fails with [`VfsError::Corrupt`] if a name is malformed or repeated,
    /// a name is both a file and a directory, a payload range lies outside
    /// `container_len`, or a stored entry's lengths disagree.
    pub fn from_entries(entries: Vec<ArchiveEntry>, container_len: u64) -> Result<Self, VfsError> {
        let mut toc = Self::default();
        for (i, mut entry) in entries.into_iter().enumerate() {
            let normalized = path::normalize(&entry.name, path::ROOT)
                .map_err(|_| VfsError::Corrupt(format!("malformed entry name {:?}", entry.name)))?;
            if normalized == path::ROOT {
                return Err(VfsError::Corrupt(format!("entry {i} has an empty name")));
            }
            entry.name = normalized[1..].to_owned();

            let end = entry.offset.checked_add(entry.stored_len);
            if end.is_none_or(|end| end > container_len) {
                return Err(VfsError::Corrupt(format!(
                    "entry {} lies outside the container",
                    entry.name
                )));
            }
            if entry.method.is_none() && entry.stored_len != entry.uncompressed_len {
                return Err(VfsError::Corrupt(format!(
                    "stored entry {} declares mismatched lengths",
                    entry.name
                )));
            }
            if toc.index.insert(entry.name.clone(), i).is_some() {
                return Err(VfsError::Corrupt(format!("duplicate entry {}", entry.name)));
            }

            let mut dir = path::parent(&entry.name);
            while let Some(d) = dir.filter(|d| !d.is_empty()) {
                toc.directories.insert(d.to_owned());
                dir = path::parent(d);
            }
            toc.entries.push(entry);
        }

        if let Some(clash) = toc.directories.iter().find(|d| toc.index.contains_key(*d)) {
            return Err(VfsError::Corrupt(format!(
                "{clash} is both a file and a directory"
            )));
        }
        Ok(toc)
    }

    /// Parse an `LVPK` container.
    pub fn read(source: &dyn ByteSource) -> Result<Self, VfsError> {
        let container_len = source.size()?;
        let mut header = [0u8; HEADER_LEN as usize];
        if container_len < HEADER_LEN || source.read_at(0, &mut header)? != header.len() {
            return Err(VfsError::Corrupt("container shorter than its header".into()));
        }
        let mut cursor = Cursor::new(&header);
        if cursor.bytes(4)? != MAGIC {
            return Err(VfsError::Corrupt("bad container magic".into()));
        }
        let version = cursor.u16()?;
        if version != VERSION {
            return Err(VfsError::Corrupt(format!("unsupported container version {version}")));
        }
        let _flags = cursor.u16()?;
        let count = cursor.u32()?;
        let toc_offset = cursor.u64()?;
        if toc_offset < HEADER_LEN || toc_offset > container_len {
            return Err(VfsError::Corrupt("table of contents offset out of range".into()));
        }

        let toc_len = container_len - toc_offset;
        if toc_len > MAX_TOC_LEN {
            return Err(VfsError::Corrupt(format!(
                "table of contents is {toc_len} bytes, limit is {MAX_TOC_LEN}"
            )));
        }
        if u64::from(count) * MIN_RECORD_LEN > toc_len {
            return Err(VfsError::Corrupt(format!(
                "table of contents too short for {count} entries"
            )));
        }

        let mut raw = vec![0u8; toc_len as usize];
        if source.read_at(toc_offset, &mut raw)? != raw.len() {
            return Err(VfsError::Corrupt("truncated table of contents".into()));
        }
        let mut cursor = Cursor::new(&raw);
        let mut entries = Vec::with_capacity(count.min(1 << 16) as usize);
        for _ in 0..count {
            let name_len = cursor.u16()? as usize;
            let name = std::str::from_utf8(cursor.bytes(name_len)?)
                .map_err(|_| VfsError::Corrupt("entry name is not UTF-8".into()))?
                .to_owned();
            let offset = cursor.u64()?;
            let stored_len = cursor.u64()?;
            let uncompressed_len = cursor.u64()?;
            let method = CompressionMethod::from_tag(cursor.u8()?)?;
            entries.push(ArchiveEntry {
                name,
                offset,
                stored_len,
                uncompressed_len,
                method,
            });
        }
        // Payloads must not overlap the header or the TOC itself.
        if let Some(bad) = entries
            .iter()
            .find(|e| e.offset < HEADER_LEN || e.offset.saturating_add(e.stored_len) > toc_offset)
        {
            return Err(VfsError::Corrupt(format!("entry {} overlaps metadata", bad.name)));
        }
        Self::from_entries(entries, container_len)
    }

    pub fn entries(&self) -> &[ArchiveEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<&ArchiveEntry> {
        self.index.get(name).map(|&i| &self.entries[i])
    }

    /// Whether `name` is an implied directory. The empty name is the root.
    pub fn is_directory(&self, name: &str) -> bool {
        name.is_empty() || self.directories.contains(name)
    }

    /// Paths of every file, in name order.
    pub fn file_names(&self) -> impl Iterator<Item = &str> {
        self.index.keys().map(String::as_str)
    }
}

/// Tiny little-endian reader over a byte slice.
struct Cursor<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn bytes(&mut self, n: usize) -> Result<&'a [u8], VfsError> {
        let end = self
            .pos
            .checked_add(n)
            .filter(|&end| end <= self.data.len())
            .ok_or_else(|| VfsError::Corrupt("truncated table of contents".into()))?;
        let slice = &self.data[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn array<const N: usize>(&mut self) -> Result<[u8; N], VfsError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.bytes(N)?);
        Ok(out)
    }

    fn u8(&mut self) -> Result<u8, VfsError> {
        Ok(self.array::<1>()?[0])
    }

    fn u16(&mut self) -> Result<u16, VfsError> {
        Ok(u16::from_le_bytes(self.array()?))
    }

    fn u32(&mut self) -> Result<u32, VfsError> {
        Ok(u32::from_le_bytes(self.array()?))
    }

    fn u64(&mut self) -> Result<u64, VfsError> {
        Ok(u64::from_le_bytes(self.array()?))
    }
}

/// Packs files into an `LVPK` container.
///
/// Payloads are written as they are added; [`finish`](ArchiveWriter::finish)
/// appends the table of contents and seals the header. An unsealed container
/// has a zero header and fails to parse.
///
/// ```
/// use lilium_vfs::archive::{ArchiveToc, ArchiveWriter};
/// use lilium_vfs::codec::CompressionMethod;
/// use lilium_vfs::stream::MemorySource;
///
/// let mut writer = ArchiveWriter::new(std::io::Cursor::new(Vec::new())).unwrap();
/// writer.add("config/settings.json", b"{}", None).unwrap();
/// writer.add("shaders/basic.wgsl", &[b'x'; 512], Some(CompressionMethod::Zlib)).unwrap();
/// let bytes = writer.finish().unwrap().into_inner();
///
/// let toc = ArchiveToc::read(&MemorySource::new(bytes)).unwrap();
/// assert_eq!(toc.len(), 2);
/// ```
pub struct ArchiveWriter<W: Write + Seek> {
    out: W,
    entries: Vec<ArchiveEntry>,
    names: BTreeSet<String>,
    offset: u64,
}

impl ArchiveWriter<File> {
    /// Create (or truncate) a container file on the host.
    pub fn create(path: impl AsRef<Path>) -> Result<Self, VfsError> {
        Self::new(File::create(path)?)
    }
}

impl<W: Write + Seek> ArchiveWriter<W> {
    pub fn new(mut out: W) -> Result<Self, VfsError> {
        out.seek(SeekFrom::Start(0))?;
        out.write_all(&[0u8; HEADER_LEN as usize])?;
        Ok(Self {
            out,
            entries: Vec::new(),
            names: BTreeSet::new(),
            offset: HEADER_LEN,
        })
    }

    /// Append one file, optionally compressing it.
    pub fn add(
        &mut self,
        name: &str,
        data: &[u8],
        method: Option<CompressionMethod>,
    ) -> Result<(), VfsError> {
        let normalized = path::normalize(name, path::ROOT)?;
        if normalized == path::ROOT {
            return Err(VfsError::InvalidPath(format!("{name}: archive entry needs a name")));
        }
        let name = normalized[1..].to_owned();
        if name.len() > u16::MAX as usize {
            return Err(VfsError::InvalidPath(format!("{name}: name too long")));
        }
        if !self.names.insert(name.clone()) {
            return Err(VfsError::AlreadyExists(format!("archive entry {name}")));
        }

        let payload = match method {
            Some(method) => codec::compress(method, data)?,
            None => data.to_vec(),
        };
        self.out.write_all(&payload)?;
        log::trace!(
            "ArchiveWriter: added {name} ({} -> {} bytes)",
            data.len(),
            payload.len()
        );
        self.entries.push(ArchiveEntry {
            name,
            offset: self.offset,
            stored_len: payload.len() as u64,
            uncompressed_len: data.len() as u64,
            method,
        });
        self.offset += payload.len() as u64;
        Ok(())
    }

    /// Add every file under a host directory, named relative to `root`.
    /// Returns the number of files added.
    pub fn add_directory(
        &mut self,
        root: &Path,
        method: Option<CompressionMethod>,
    ) -> Result<usize, VfsError> {
        let mut pending = vec![root.to_path_buf()];
        let mut files = Vec::new();
        while let Some(dir) = pending.pop() {
            for entry in std::fs::read_dir(&dir)? {
                let entry = entry?;
                let path = entry.path();
                if entry.file_type()?.is_dir() {
                    pending.push(path);
                } else if let Ok(relative) = path.strip_prefix(root)
                    && let Some(name) = relative.to_str()
                {
                    files.push((name.replace('\\', "/"), path));
                }
            }
        }
        files.sort();
        for (name, path) in &files {
            let data = std::fs::read(path)?;
            self.add(name, &data, method)?;
        }
        Ok(files.len())
    }

    /// Write the table of contents and seal the header.
    pub fn finish(mut self) -> Result<W, VfsError> {
        let toc_offset = self.offset;
        let mut toc = Vec::new();
        for entry in &self.entries {
            toc.extend_from_slice(&(entry.name.len() as u16).to_le_bytes());
            toc.extend_from_slice(entry.name.as_bytes());
            toc.extend_from_slice(&entry.offset.to_le_bytes());
            toc.extend_from_slice(&entry.stored_len.to_le_bytes());
            toc.extend_from_slice(&entry.uncompressed_len.to_le_bytes());
            toc.push(entry.method.map_or(0, CompressionMethod::tag));
        }
        self.out.write_all(&toc)?;

        let mut header = Vec::with_capacity(HEADER_LEN as usize);
        header.extend_from_slice(&MAGIC);
        header.extend_from_slice(&VERSION.to_le_bytes());
        header.extend_from_slice(&0u16.to_le_bytes());
        header.extend_from_slice(&(self.entries.len() as u32).to_le_bytes());
        header.extend_from_slice(&toc_offset.to_le_bytes());
        header.extend_from_slice(&0u32.to_le_bytes());
        self.out.seek(SeekFrom::Start(0))?;
        self.out.write_all(&header)?;
        self.out.seek(SeekFrom::End(0))?;
        self.out.flush()?;
        log::debug!("ArchiveWriter: sealed {} entries", self.entries.len());
        Ok(self.out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::MemorySource;
    use std::io::Cursor as IoCursor;

    fn build(files: &[(&str, &[u8], Option<CompressionMethod>)]) -> Vec<u8> {
        let mut writer = ArchiveWriter::new(IoCursor::new(Vec::new())).unwrap();
        for (name, data, method) in files {
            writer.add(name, data, *method).unwrap();
        }
        writer.finish().unwrap().into_inner()
    }

    #[test]
    fn written_container_parses() {
        let bytes = build(&[
            ("a.txt", b"alpha", None),
            ("dir/b.txt", b"bravo", Some(CompressionMethod::Zlib)),
        ]);
        let toc = ArchiveToc::read(&MemorySource::new(bytes)).unwrap();

        let a = toc.get("a.txt").unwrap();
        assert_eq!((a.offset, a.stored_len), (HEADER_LEN, 5));
        let b = toc.get("dir/b.txt").unwrap();
        assert_eq!(b.uncompressed_len, 5);
        assert_eq!(b.method, Some(CompressionMethod::Zlib));
        assert!(toc.is_directory("dir"));
        assert!(!toc.is_directory("a.txt"));
    }

    #[test]
    fn zeroed_header_is_corrupt() {
        let bytes = vec![0u8; HEADER_LEN as usize + 5];
        assert!(matches!(
            ArchiveToc::read(&MemorySource::new(bytes)),
            Err(VfsError::Corrupt(_))
        ));
    }

    #[test]
    fn truncated_toc_is_corrupt() {
        let mut bytes = build(&[("a.txt", b"alpha", None)]);
        bytes.truncate(bytes.len() - 3);
        assert!(matches!(
            ArchiveToc::read(&MemorySource::new(bytes)),
            Err(VfsError::Corrupt(_))
        ));
    }

    #[test]
    fn out_of_range_entry_is_corrupt() {
        let entries = vec![ArchiveEntry::stored("a", 10, 100)];
        assert!(matches!(
            ArchiveToc::from_entries(entries, 50),
            Err(VfsError::Corrupt(_))
        ));
    }

    #[test]
    fn file_and_directory_clash_is_corrupt() {
        let entries = vec![ArchiveEntry::stored("a", 0, 1), ArchiveEntry::stored("a/b", 1, 1)];
        assert!(matches!(
            ArchiveToc::from_entries(entries, 2),
            Err(VfsError::Corrupt(_))
        ));
    }

    #[test]
    fn duplicate_names_rejected_by_writer() {
        let mut writer = ArchiveWriter::new(IoCursor::new(Vec::new())).unwrap();
        writer.add("a.txt", b"1", None).unwrap();
        let err = writer.add("/a.txt", b"2", None).unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::AlreadyExists);
        assert!(err.to_string().contains("a.txt"));
    }

    /// Reports a huge length but only backs the header with real bytes.
    struct HugeContainer {
        header: Vec<u8>,
        len: u64,
    }

    impl ByteSource for HugeContainer {
        fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<usize, VfsError> {
            buf.fill(0);
            if let Some(head) = self.header.get(offset as usize..) {
                let n = head.len().min(buf.len());
                buf[..n].copy_from_slice(&head[..n]);
            }
            Ok(buf.len())
        }

        fn size(&self) -> Result<u64, VfsError> {
            Ok(self.len)
        }
    }

    fn header(count: u32, toc_offset: u64) -> Vec<u8> {
        let mut header = Vec::new();
        header.extend_from_slice(&MAGIC);
        header.extend_from_slice(&VERSION.to_le_bytes());
        header.extend_from_slice(&0u16.to_le_bytes());
        header.extend_from_slice(&count.to_le_bytes());
        header.extend_from_slice(&toc_offset.to_le_bytes());
        header.extend_from_slice(&0u32.to_le_bytes());
        header
    }

    #[test]
    fn oversized_toc_is_corrupt_before_allocating() {
        let source = HugeContainer {
            header: header(1, HEADER_LEN),
            len: 1 << 40,
        };
        let err = ArchiveToc::read(&source).unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::Corrupt);
        assert!(err.to_string().contains("limit"));
    }

    #[test]
    fn entry_count_beyond_toc_is_corrupt() {
        let mut bytes = header(u32::MAX, HEADER_LEN);
        bytes.extend_from_slice(&[0u8; 40]);
        assert!(matches!(
            ArchiveToc::read(&MemorySource::new(bytes)),
            Err(VfsError::Corrupt(_))
        ));
    }

    #[test]
    fn names_are_normalized() {
        let entries = vec![ArchiveEntry::stored("/models//panda.bam", 0, 4)];
        let toc = ArchiveToc::from_entries(entries, 4).unwrap();
        assert!(toc.get("models/panda.bam").is_some());
    }
}
