use std::collections::BTreeSet;
use std::fmt;
use std::sync::{Arc, Weak};
use std::time::SystemTime;

use crate::VfsError;
use crate::codec::CompressionMethod;
use crate::handle::{MountWatch, VfsStream};
use crate::mount::{Entry, Mount, MountCapabilities};
use crate::path;
use crate::stream::{OpenMode, Stream};
use crate::transform::{TransformReader, TransformWriter};
use crate::vfs::{MountId, VfsInner};

/// Shape of a resolved path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FileKind {
    /// A file served by one mount.
    Simple,
    /// A directory contributed by one or more mounts.
    Composite,
    /// A directory that exists only because mount points lie beneath it.
    Directory,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileState {
    Resolved,
    /// A contributing mount was unmounted.
    Stale,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileStat {
    /// Logical size. `None` for directories and for implicitly compressed
    /// files, whose size is only known once read.
    pub size: Option<u64>,
    pub is_directory: bool,
    /// Number of mounts contributing to this path.
    pub mount_count: usize,
    pub modified: Option<SystemTime>,
}

/// One mount's view of a resolved path.
#[derive(Clone)]
pub(crate) struct Contribution {
    pub(crate) mount_id: MountId,
    pub(crate) mount: Weak<dyn Mount>,
    pub(crate) entry: Entry,
}

/// A path resolved through a [`VirtualFileSystem`](crate::VirtualFileSystem).
///
/// The handle never keeps a mount alive. Once any contributing mount is
/// unmounted the handle is [`FileState::Stale`] and every operation fails
/// with [`VfsError::Stale`]. Streams opened from the handle share its
/// liveness and stay valid after the handle itself is dropped.
#[derive(Clone)]
pub struct VirtualFile {
    path: String,
    kind: FileKind,
    /// Highest precedence first.
    contributions: Vec<Contribution>,
    watch: Option<Arc<MountWatch>>,
    vfs: Weak<VfsInner>,
    compression: Option<CompressionMethod>,
}

impl VirtualFile {
    pub(crate) fn new(
        path: String,
        kind: FileKind,
        contributions: Vec<Contribution>,
        watch: Option<Arc<MountWatch>>,
        vfs: Weak<VfsInner>,
    ) -> Self {
        Self {
            path,
            kind,
            contributions,
            watch,
            vfs,
            compression: None,
        }
    }

    pub(crate) fn implicit_directory(path: String, vfs: Weak<VfsInner>) -> Self {
        Self::new(path, FileKind::Directory, Vec::new(), None, vfs)
    }

    /// Present a compressed sibling (`p.pz`) under the requested path.
    pub(crate) fn into_compressed(mut self, path: String, method: CompressionMethod) -> Self {
        self.path = path;
        self.compression = Some(method);
        self
    }

    /// Virtual path this handle was resolved for.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Final path segment. Empty for the root.
    pub fn name(&self) -> &str {
        path::file_name(&self.path)
    }

    pub fn kind(&self) -> FileKind {
        self.kind
    }

    pub fn is_file(&self) -> bool {
        self.kind == FileKind::Simple
    }

    pub fn is_directory(&self) -> bool {
        !self.is_file()
    }

    /// Whether reads inflate a compressed sibling on the fly.
    pub fn is_compressed(&self) -> bool {
        self.compression.is_some()
    }

    /// Contributing mounts, highest precedence first.
    pub fn mount_ids(&self) -> Vec<MountId> {
        self.contributions.iter().map(|c| c.mount_id).collect()
    }

    pub fn state(&self) -> FileState {
        match &self.watch {
            Some(watch) if !watch.is_alive() => FileState::Stale,
            _ => FileState::Resolved,
        }
    }

    /// Whether the serving mount accepts writes to this file.
    pub fn is_writable(&self) -> bool {
        self.is_file()
            && self.state() == FileState::Resolved
            && self
                .contributions
                .first()
                .and_then(|c| c.mount.upgrade())
                .is_some_and(|m| m.capabilities().contains(MountCapabilities::WRITE))
    }

    fn check(&self) -> Result<(), VfsError> {
        match self.state() {
            FileState::Resolved => Ok(()),
            FileState::Stale => Err(VfsError::Stale(self.path.clone())),
        }
    }

    fn mount(&self, contribution: &Contribution) -> Result<Arc<dyn Mount>, VfsError> {
        contribution
            .mount
            .upgrade()
            .ok_or_else(|| VfsError::Stale(self.path.clone()))
    }

    /// The serving mount and its local path, for a live file handle.
    pub(crate) fn source(&self) -> Result<(String, Arc<dyn Mount>), VfsError> {
        self.check()?;
        let Some(contribution) = self.contributions.first().filter(|_| self.is_file()) else {
            return Err(VfsError::IsADirectory(self.path.clone()));
        };
        Ok((contribution.entry.path.clone(), self.mount(contribution)?))
    }

    /// Open a stream over the file.
    ///
    /// Fails with [`VfsError::Stale`] after an unmount and
    /// [`VfsError::IsADirectory`] on directories. Write modes require a
    /// writable mount.
    pub fn open(&self, mode: OpenMode) -> Result<VfsStream, VfsError> {
        let (_, mount) = self.source()?;
        let entry = &self.contributions[0].entry;
        let inner: Box<dyn Stream> = match (self.compression, mode) {
            (None, _) => mount.open(entry, mode)?,
            (Some(method), OpenMode::Read) => Box::new(TransformReader::new(
                mount.open(entry, OpenMode::Read)?,
                method.decoder(),
            )),
            (Some(method), OpenMode::Write) => Box::new(TransformWriter::new(
                mount.open(entry, OpenMode::Write)?,
                method.encoder(),
            )),
            (Some(_), OpenMode::Append) => {
                return Err(VfsError::Unsupported(format!(
                    "cannot append to compressed {}",
                    self.path
                )));
            }
        };
        Ok(VfsStream::new(inner, self.watch.clone(), self.path.clone()))
    }

    /// Read the whole file.
    pub fn read_all(&self) -> Result<Vec<u8>, VfsError> {
        let mut stream = self.open(OpenMode::Read)?;
        let data = stream.read_to_end()?;
        stream.close()?;
        Ok(data)
    }

    pub fn stat(&self) -> Result<FileStat, VfsError> {
        self.check()?;
        let primary = self.contributions.first().map(|c| &c.entry);
        let size = if self.is_file() && !self.is_compressed() {
            primary.and_then(|e| e.size)
        } else {
            None
        };
        Ok(FileStat {
            size,
            is_directory: self.is_directory(),
            mount_count: self.contributions.len(),
            modified: primary.and_then(|e| e.modified),
        })
    }

    /// Sorted union of child names across every contributing mount, plus
    /// segments leading to mount points below this directory.
    pub fn child_names(&self) -> Result<Vec<String>, VfsError> {
        self.check()?;
        if self.is_file() {
            return Err(VfsError::NotADirectory(self.path.clone()));
        }
        let vfs = self
            .vfs
            .upgrade()
            .ok_or_else(|| VfsError::Stale(self.path.clone()))?;

        let mut names = BTreeSet::new();
        for contribution in &self.contributions {
            let mount = self.mount(contribution)?;
            if !mount.capabilities().contains(MountCapabilities::LIST) {
                log::trace!(
                    "VirtualFile: {} mount cannot list {}",
                    mount.kind(),
                    self.path
                );
                continue;
            }
            for entry in mount.list(&contribution.entry.path)? {
                names.insert(entry.name);
            }
        }
        names.extend(vfs.snapshot().children_toward(&self.path, vfs.policy()));
        Ok(names.into_iter().collect())
    }

    /// Children of this directory, each resolved through the overlay so the
    /// highest-precedence mount serves every name.
    pub fn list(&self) -> Result<Vec<VirtualFile>, VfsError> {
        let names = self.child_names()?;
        let vfs = self
            .vfs
            .upgrade()
            .ok_or_else(|| VfsError::Stale(self.path.clone()))?;
        let mut children = Vec::with_capacity(names.len());
        for name in names {
            let child = path::join(&self.path, &name);
            match vfs.resolve_normalized(&child) {
                Ok(file) => children.push(file),
                Err(err) if err.is_not_found() => {
                    log::trace!("VirtualFile: {child} vanished while listing");
                }
                Err(err) => return Err(err),
            }
        }
        Ok(children)
    }
}

impl fmt::Debug for VirtualFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VirtualFile")
            .field("path", &self.path)
            .field("kind", &self.kind)
            .field("state", &self.state())
            .field("mounts", &self.mount_ids())
            .field("compression", &self.compression)
            .finish()
    }
}
