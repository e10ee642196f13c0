//! Backing stores that can be mounted into the virtual namespace.
//!
//! Every variant answers the same three questions for a mount-relative path:
//! does it exist ([`Mount::resolve`]), give me its bytes ([`Mount::open`]),
//! and what lives under it ([`Mount::list`]).
//!
//! # Path Contract
//!
//! Local paths are already normalized by the
//! [`VirtualFileSystem`](crate::VirtualFileSystem): forward slashes, no
//! leading or trailing slash, no `.`/`..` segments. The empty path is the
//! mount root.

mod archive;
mod bundle;
mod ramdisk;
#[cfg(all(feature = "filesystem", not(target_arch = "wasm32")))]
mod system;
mod zip;

use std::time::SystemTime;

use bitflags::bitflags;

use crate::VfsError;
use crate::stream::{OpenMode, Stream};

pub use archive::{ArchiveMount, CompressedArchiveMount};
pub use bundle::{AssetBundle, AssetBundleMount, StaticAssets};
pub use ramdisk::RamDiskMount;
#[cfg(all(feature = "filesystem", not(target_arch = "wasm32")))]
pub use system::SystemMount;
pub use self::zip::ZipArchiveMount;

bitflags! {
    /// What a mount can do.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct MountCapabilities: u32 {
        /// Entries can be opened for reading.
        const READ = 1 << 0;
        /// Entries can be created, written and deleted.
        const WRITE = 1 << 1;
        /// Directories can be listed.
        const LIST = 1 << 2;
    }
}

impl MountCapabilities {
    /// Read and list, the capabilities of every sealed store.
    pub const READ_ONLY: Self = Self::READ.union(Self::LIST);
}

/// Backing store variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MountKind {
    /// Host filesystem directory.
    System,
    /// Container of stored entries.
    ArchiveContainer,
    /// Container whose entries may be compressed.
    CompressedArchive,
    /// In-memory blobs.
    RamDisk,
    /// Platform-bundled read-only assets.
    AssetBundle,
    /// Zip archive with stored or deflated entries.
    ZipArchive,
}

impl std::fmt::Display for MountKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::System => "system",
            Self::ArchiveContainer => "archive",
            Self::CompressedArchive => "compressed archive",
            Self::RamDisk => "ramdisk",
            Self::AssetBundle => "asset bundle",
            Self::ZipArchive => "zip archive",
        };
        f.write_str(name)
    }
}

/// Kind of a resolved entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntryKind {
    File,
    Directory,
}

/// One resolved path inside a mount.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    /// Mount-relative path (empty for the mount root).
    pub path: String,
    /// Final path segment (empty for the mount root).
    pub name: String,
    pub kind: EntryKind,
    /// Logical (uncompressed) size in bytes, if known. `None` for directories.
    pub size: Option<u64>,
    /// Bytes occupied in the backing store, when it differs from `size`.
    pub stored_size: Option<u64>,
    /// Last modification time, if available.
    pub modified: Option<SystemTime>,
}

impl Entry {
    /// A file entry.
    pub fn file(path: impl Into<String>, size: u64) -> Self {
        let path = path.into();
        Self {
            name: crate::path::file_name(&path).to_owned(),
            path,
            kind: EntryKind::File,
            size: Some(size),
            stored_size: None,
            modified: None,
        }
    }

    /// A directory entry.
    pub fn directory(path: impl Into<String>) -> Self {
        let path = path.into();
        Self {
            name: crate::path::file_name(&path).to_owned(),
            path,
            kind: EntryKind::Directory,
            size: None,
            stored_size: None,
            modified: None,
        }
    }

    pub fn with_stored_size(mut self, stored: u64) -> Self {
        self.stored_size = Some(stored);
        self
    }

    pub fn with_modified(mut self, modified: Option<SystemTime>) -> Self {
        self.modified = modified;
        self
    }

    pub fn is_directory(&self) -> bool {
        self.kind == EntryKind::Directory
    }

    pub fn is_file(&self) -> bool {
        self.kind == EntryKind::File
    }
}

/// A backing store mounted into the virtual namespace.
///
/// # Read vs Write
///
/// All mounts implement `resolve`, `open` and `list`. Mutation hooks
/// (`create`, `make_directory`, `delete`, `rename`) default to
/// [`VfsError::Unsupported`]; writable variants override them and report
/// [`MountCapabilities::WRITE`].
///
/// # Errors
///
/// `resolve` returns `Ok(None)` when the path is simply absent, which lets
/// the VFS fall through to lower-priority mounts. Any `Err` is a hard
/// failure (for example [`VfsError::Corrupt`]) and stops resolution.
pub trait Mount: Send + Sync + 'static {
    fn kind(&self) -> MountKind;

    fn capabilities(&self) -> MountCapabilities;

    /// Exactly resolve `local` to a file or directory. No partial matches.
    fn resolve(&self, local: &str) -> Result<Option<Entry>, VfsError>;

    /// Open a previously resolved file entry.
    fn open(&self, entry: &Entry, mode: OpenMode) -> Result<Box<dyn Stream>, VfsError>;

    /// Immediate children of a directory, sorted by name.
    ///
    /// Fails with [`VfsError::NotADirectory`] on a file and
    /// [`VfsError::NotFound`] on an absent path.
    fn list(&self, local_dir: &str) -> Result<Vec<Entry>, VfsError>;

    /// Human-readable description used in logs and mount listings.
    fn describe(&self) -> String {
        self.kind().to_string()
    }

    fn is_read_only(&self) -> bool {
        !self.capabilities().contains(MountCapabilities::WRITE)
    }

    /// Create (or truncate) a file and return a write stream for it.
    fn create(&self, local: &str) -> Result<Box<dyn Stream>, VfsError> {
        Err(read_only_error(self.kind(), local))
    }

    /// Create a directory and any missing parents.
    fn make_directory(&self, local: &str) -> Result<(), VfsError> {
        Err(read_only_error(self.kind(), local))
    }

    /// Delete a file or an empty directory.
    fn delete(&self, local: &str) -> Result<(), VfsError> {
        Err(read_only_error(self.kind(), local))
    }

    /// Rename a file within this mount.
    fn rename(&self, from: &str, _to: &str) -> Result<(), VfsError> {
        Err(read_only_error(self.kind(), from))
    }
}

pub(crate) fn read_only_error(kind: MountKind, local: &str) -> VfsError {
    VfsError::Unsupported(format!("{kind} mount is read-only: {local}"))
}

/// Error for a directory entry passed to `open`.
pub(crate) fn require_file(entry: &Entry) -> Result<(), VfsError> {
    if entry.is_directory() {
        return Err(VfsError::IsADirectory(entry.path.clone()));
    }
    Ok(())
}

/// Sorted immediate children of `dir` from a flat set of file paths, with
/// directories implied by deeper paths. Shared by the flat-index mounts.
pub(crate) fn implied_children<'a>(
    dir: &str,
    paths: impl Iterator<Item = (&'a str, Option<Entry>)>,
) -> Vec<Entry> {
    use std::collections::BTreeMap;

    let prefix = if dir.is_empty() {
        String::new()
    } else {
        format!("{dir}/")
    };
    let mut children: BTreeMap<String, Entry> = BTreeMap::new();
    for (path, entry) in paths {
        let Some(rest) = path.strip_prefix(&prefix) else {
            continue;
        };
        match rest.find('/') {
            Some(pos) => {
                let name = &rest[..pos];
                if !name.is_empty() && !children.contains_key(name) {
                    children.insert(
                        name.to_owned(),
                        Entry::directory(crate::path::join_local(dir, name)),
                    );
                }
            }
            None if !rest.is_empty() => {
                if let Some(entry) = entry {
                    children.insert(rest.to_owned(), entry);
                }
            }
            None => {}
        }
    }
    children.into_values().collect()
}
