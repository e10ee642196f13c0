//! Overlay virtual file system for the RedLilium engine.
//!
//! One `/`-rooted namespace unifies files from heterogeneous backing
//! stores: host directories, archive containers (stored or compressed),
//! in-memory ramdisks and platform asset bundles. Stores are mounted at
//! virtual prefixes with a priority; higher priorities shadow lower ones
//! for reads while directory listings show the union.
//!
//! # Architecture
//!
//! All operations are synchronous and may be called from any thread. The
//! [`VirtualFileSystem`] is an explicitly constructed context object; clone
//! it to share the namespace.
//!
//! ```
//! use lilium_vfs::{RamDiskMount, VirtualFileSystem};
//!
//! let vfs = VirtualFileSystem::new();
//! vfs.mount("/config", RamDiskMount::new(), 0).unwrap();
//! vfs.write_file("/config/settings.toml", b"fullscreen = true").unwrap();
//! assert_eq!(
//!     vfs.read_to_string("/config/settings.toml").unwrap(),
//!     "fullscreen = true"
//! );
//! ```
//!
//! # Mounts
//!
//! - [`SystemMount`]: Host directory (read-write, native only)
//! - [`ArchiveMount`]: `LVPK` container of stored entries (read-only)
//! - [`CompressedArchiveMount`]: `LVPK` container with compressed entries (read-only)
//! - [`RamDiskMount`]: In-memory blobs for tests and scratch data (read-write)
//! - [`AssetBundleMount`]: Platform or compiled-in assets (read-only)
//! - [`ZipArchiveMount`]: Zip archive of stored or deflated entries (read-only)
//!
//! Custom stores implement the [`Mount`] trait.
//!
//! # Handles
//!
//! Resolution produces a [`VirtualFile`]; opening it yields a [`VfsStream`].
//! Neither keeps its mount alive. Unmounting turns every outstanding handle
//! and stream stale through the [`weak`] lifetime registry.

pub mod archive;
pub mod codec;
mod config;
mod error;
mod file;
mod handle;
pub mod mount;
pub mod path;
pub mod stream;
pub mod transform;
mod vfs;
pub mod weak;

pub use config::{ConfigError, MountConfig, VfsConfig, VfsSection};
pub use error::{ErrorKind, VfsError};
pub use file::{FileKind, FileStat, FileState, VirtualFile};
pub use handle::{StreamState, VfsStream};
#[cfg(all(feature = "filesystem", not(target_arch = "wasm32")))]
pub use mount::SystemMount;
pub use mount::{
    ArchiveMount, AssetBundle, AssetBundleMount, CompressedArchiveMount, Entry, EntryKind, Mount,
    MountCapabilities, MountKind, RamDiskMount, StaticAssets, ZipArchiveMount,
};
pub use path::CasePolicy;
pub use stream::OpenMode;
pub use vfs::{COMPRESSED_SUFFIX, MountId, MountInfo, VfsOptions, VirtualFileSystem};
