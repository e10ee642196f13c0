//! Shared fixtures: build any mount variant from the same file table.

#![allow(dead_code)]

use std::io::Cursor;
use std::sync::Arc;

use lilium_vfs::archive::ArchiveWriter;
use lilium_vfs::codec::CompressionMethod;
use lilium_vfs::stream::{ByteSource, MemorySource, OpenMode, Stream};
use lilium_vfs::{
    ArchiveMount, AssetBundleMount, CompressedArchiveMount, Entry, Mount, MountCapabilities,
    MountKind, RamDiskMount, StaticAssets, SystemMount, VfsError, ZipArchiveMount,
};
use tempfile::TempDir;

/// Mount variant under test.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Store {
    Ram,
    System,
    Archive,
    CompressedArchive,
    Bundle,
    Zip,
}

impl Store {
    pub fn is_writable(self) -> bool {
        matches!(self, Store::Ram | Store::System)
    }
}

/// A mount plus whatever host state must outlive it.
pub struct Fixture {
    pub mount: Arc<dyn Mount>,
    _dir: Option<TempDir>,
}

pub fn container(files: &[(&str, &[u8])], method: Option<CompressionMethod>) -> Vec<u8> {
    let mut writer = ArchiveWriter::new(Cursor::new(Vec::new())).unwrap();
    for (name, data) in files {
        writer.add(name, data, method).unwrap();
    }
    writer.finish().unwrap().into_inner()
}

/// Zip bytes alternating stored and deflated entries.
pub fn zip_archive(files: &[(&str, &[u8])]) -> Vec<u8> {
    use std::io::Write;
    use zip::write::SimpleFileOptions;

    let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
    for (i, (name, data)) in files.iter().enumerate() {
        let method = if i % 2 == 0 {
            zip::CompressionMethod::Deflated
        } else {
            zip::CompressionMethod::Stored
        };
        let options = SimpleFileOptions::default().compression_method(method);
        writer.start_file(*name, options).unwrap();
        writer.write_all(data).unwrap();
    }
    writer.finish().unwrap().into_inner()
}

pub fn build(store: Store, files: &[(&str, &[u8])]) -> Fixture {
    match store {
        Store::Ram => {
            let disk = RamDiskMount::new();
            for (name, data) in files {
                disk.insert(name, data.to_vec()).unwrap();
            }
            Fixture {
                mount: Arc::new(disk),
                _dir: None,
            }
        }
        Store::System => {
            let dir = tempfile::tempdir().unwrap();
            for (name, data) in files {
                let host = dir.path().join(name);
                std::fs::create_dir_all(host.parent().unwrap()).unwrap();
                std::fs::write(host, data).unwrap();
            }
            Fixture {
                mount: Arc::new(SystemMount::new(dir.path())),
                _dir: Some(dir),
            }
        }
        Store::Archive => {
            let source: Arc<dyn ByteSource> = Arc::new(MemorySource::new(container(files, None)));
            Fixture {
                mount: Arc::new(ArchiveMount::from_source(source, "fixture").unwrap()),
                _dir: None,
            }
        }
        Store::CompressedArchive => {
            let bytes = container(files, Some(CompressionMethod::Zlib));
            let source: Arc<dyn ByteSource> = Arc::new(MemorySource::new(bytes));
            Fixture {
                mount: Arc::new(CompressedArchiveMount::from_source(source, "fixture").unwrap()),
                _dir: None,
            }
        }
        Store::Bundle => {
            let table: Vec<(&'static str, &'static [u8])> = files
                .iter()
                .map(|(name, data)| {
                    let name: &'static str = Box::leak(name.to_string().into_boxed_str());
                    let data: &'static [u8] = Box::leak(data.to_vec().into_boxed_slice());
                    (name, data)
                })
                .collect();
            let assets = StaticAssets::new("fixture", Box::leak(table.into_boxed_slice()));
            Fixture {
                mount: Arc::new(AssetBundleMount::new(assets)),
                _dir: None,
            }
        }
        Store::Zip => Fixture {
            mount: Arc::new(ZipArchiveMount::from_bytes(zip_archive(files), "fixture.zip").unwrap()),
            _dir: None,
        },
    }
}

/// A mount whose every lookup fails with a hard error.
pub enum BrokenMount {
    /// Structural damage, like a garbled table of contents.
    Corrupt,
    /// The host refuses access.
    Denied,
}

impl BrokenMount {
    fn fail(&self, at: &str) -> VfsError {
        match self {
            Self::Corrupt => VfsError::Corrupt(format!("broken table of contents at {at}")),
            Self::Denied => VfsError::PermissionDenied(at.to_owned()),
        }
    }
}

impl Mount for BrokenMount {
    fn kind(&self) -> MountKind {
        MountKind::ArchiveContainer
    }

    fn capabilities(&self) -> MountCapabilities {
        MountCapabilities::READ_ONLY
    }

    fn resolve(&self, local: &str) -> Result<Option<Entry>, VfsError> {
        Err(self.fail(local))
    }

    fn open(&self, entry: &Entry, _mode: OpenMode) -> Result<Box<dyn Stream>, VfsError> {
        Err(self.fail(&entry.path))
    }

    fn list(&self, local_dir: &str) -> Result<Vec<Entry>, VfsError> {
        Err(self.fail(local_dir))
    }
}

/// Serves lookups and reads from a ramdisk but cannot enumerate it.
pub struct UnlistedMount(pub RamDiskMount);

impl Mount for UnlistedMount {
    fn kind(&self) -> MountKind {
        MountKind::AssetBundle
    }

    fn capabilities(&self) -> MountCapabilities {
        MountCapabilities::READ
    }

    fn resolve(&self, local: &str) -> Result<Option<Entry>, VfsError> {
        self.0.resolve(local)
    }

    fn open(&self, entry: &Entry, mode: OpenMode) -> Result<Box<dyn Stream>, VfsError> {
        self.0.open(entry, mode)
    }

    fn list(&self, local_dir: &str) -> Result<Vec<Entry>, VfsError> {
        Err(VfsError::Unsupported(format!("cannot list {local_dir}")))
    }
}

/// `n` bytes of a repeating, highly compressible pattern.
pub fn pattern(n: usize) -> Vec<u8> {
    b"lilium ".iter().copied().cycle().take(n).collect()
}
