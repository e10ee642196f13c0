use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::{Mutex, RwLock};

use crate::VfsError;
use crate::codec::CompressionMethod;
use crate::file::{Contribution, FileKind, VirtualFile};
use crate::handle::{MountWatch, VfsStream};
use crate::mount::{Entry, Mount, MountCapabilities, MountKind};
use crate::path::{self, CasePolicy};
use crate::stream::OpenMode;
use crate::weak::{LifetimeRegistry, Liveness, SubjectId};

/// Suffix tried when implicit compression is enabled.
pub const COMPRESSED_SUFFIX: &str = ".pz";

/// Behavior switches fixed at construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct VfsOptions {
    /// How mount points are matched against paths.
    pub case_policy: CasePolicy,
    /// Retry a missed `p` as `p.pz` and inflate it on read.
    pub implicit_compression: bool,
}

/// Identity of one registration. Never reused within a file system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MountId(u64);

impl MountId {
    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for MountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "mount#{}", self.0)
    }
}

/// Snapshot of one registration, as reported by [`VirtualFileSystem::mounts`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountInfo {
    pub id: MountId,
    pub point: String,
    pub kind: MountKind,
    pub priority: i32,
    pub read_only: bool,
    pub description: String,
}

pub(crate) struct MountPoint {
    id: MountId,
    point: String,
    mount: Arc<dyn Mount>,
    priority: i32,
    sequence: u64,
    subject: SubjectId,
}

/// Immutable registry state. Points are kept in precedence order:
/// priority descending, then most recently mounted first.
#[derive(Default)]
pub(crate) struct MountTable {
    points: Vec<Arc<MountPoint>>,
}

impl MountTable {
    fn sorted(mut points: Vec<Arc<MountPoint>>) -> Self {
        points.sort_by(|a, b| {
            b.priority
                .cmp(&a.priority)
                .then_with(|| b.sequence.cmp(&a.sequence))
        });
        Self { points }
    }

    /// Mount points covering `path`, with the mount-relative remainder.
    fn covering<'a>(
        &'a self,
        path: &'a str,
        policy: CasePolicy,
    ) -> impl Iterator<Item = (&'a Arc<MountPoint>, &'a str)> {
        self.points
            .iter()
            .filter_map(move |p| path::local_path(path, &p.point, policy).map(|local| (p, local)))
    }

    /// Whether some mount is attached exactly at `path`.
    fn is_mount_point(&self, path: &str, policy: CasePolicy) -> bool {
        self.points
            .iter()
            .any(|p| path::local_path(path, &p.point, policy) == Some(""))
    }

    /// Names of the segments below `dir` that lead toward a mount point.
    pub(crate) fn children_toward(&self, dir: &str, policy: CasePolicy) -> BTreeSet<String> {
        self.points
            .iter()
            .filter_map(|p| path::child_toward(dir, &p.point, policy))
            .collect()
    }
}

pub(crate) struct VfsInner {
    table: RwLock<Arc<MountTable>>,
    /// Serializes registry mutations; readers never take it.
    writer: Mutex<()>,
    registry: LifetimeRegistry,
    next_id: AtomicU64,
    options: VfsOptions,
    cwd: RwLock<String>,
}

impl VfsInner {
    pub(crate) fn snapshot(&self) -> Arc<MountTable> {
        self.table.read().clone()
    }

    pub(crate) fn policy(&self) -> CasePolicy {
        self.options.case_policy
    }

    fn normalize(&self, raw: &str) -> Result<String, VfsError> {
        let cwd = self.cwd.read();
        path::normalize(raw, &cwd)
    }

    fn publish(&self, points: Vec<Arc<MountPoint>>) {
        *self.table.write() = Arc::new(MountTable::sorted(points));
    }

    /// Invalidate every handle into a point that has left the table.
    fn retire(&self, point: Arc<MountPoint>) {
        assert!(
            self.registry.is_alive(point.subject),
            "mount registry corrupted: {} was unmounted twice",
            point.id
        );
        let notified = self.registry.notify_destroyed(point.subject);
        log::info!(
            "Vfs: unmounted {} from {} ({}, {notified} handles invalidated)",
            point.mount.describe(),
            point.point,
            point.id
        );
    }

    fn watch(&self, points: &[&MountPoint]) -> Result<Arc<MountWatch>, VfsError> {
        let liveness = Liveness::new();
        let tokens = points
            .iter()
            .map(|p| self.registry.register(p.subject, liveness.invalidator()))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Arc::new(MountWatch::new(liveness, tokens)))
    }

    fn handle(
        self: &Arc<Self>,
        path: &str,
        kind: FileKind,
        hits: Vec<(&Arc<MountPoint>, Entry)>,
    ) -> Result<VirtualFile, VfsError> {
        let points: Vec<&MountPoint> = hits.iter().map(|(p, _)| p.as_ref()).collect();
        let watch = self.watch(&points)?;
        let contributions = hits
            .into_iter()
            .map(|(point, entry)| Contribution {
                mount_id: point.id,
                mount: Arc::downgrade(&point.mount),
                entry,
            })
            .collect();
        Ok(VirtualFile::new(
            path.to_owned(),
            kind,
            contributions,
            Some(watch),
            Arc::downgrade(self),
        ))
    }

    /// One pass of overlay resolution over a table snapshot.
    ///
    /// The first file hit wins. If the first hit is a directory, every
    /// directory hit is collected instead. Absence falls through; any error
    /// stops the walk.
    fn lookup(
        self: &Arc<Self>,
        table: &MountTable,
        path: &str,
    ) -> Result<Option<VirtualFile>, VfsError> {
        let mut directories = Vec::new();
        for (point, local) in table.covering(path, self.policy()) {
            match point.mount.resolve(local) {
                Ok(None) => {
                    log::trace!("Vfs: {path} absent from {} at {}", point.id, point.point);
                }
                Ok(Some(entry)) if entry.is_file() => {
                    if directories.is_empty() {
                        return self
                            .handle(path, FileKind::Simple, vec![(point, entry)])
                            .map(Some);
                    }
                    log::trace!("Vfs: file {path} in {} is shadowed by a directory", point.id);
                }
                Ok(Some(entry)) => directories.push((point, entry)),
                Err(err) => {
                    log::debug!("Vfs: resolving {path} failed in {}: {err}", point.id);
                    return Err(err);
                }
            }
        }
        if !directories.is_empty() {
            return self
                .handle(path, FileKind::Composite, directories)
                .map(Some);
        }
        // A mount point stays a directory even when its store has no root.
        if path == path::ROOT
            || table.is_mount_point(path, self.policy())
            || !table.children_toward(path, self.policy()).is_empty()
        {
            return Ok(Some(VirtualFile::implicit_directory(
                path.to_owned(),
                Arc::downgrade(self),
            )));
        }
        Ok(None)
    }

    /// Resolve an already normalized path.
    pub(crate) fn resolve_normalized(self: &Arc<Self>, path: &str) -> Result<VirtualFile, VfsError> {
        let table = self.snapshot();
        if let Some(file) = self.lookup(&table, path)? {
            return Ok(file);
        }
        if self.options.implicit_compression && !path.ends_with(COMPRESSED_SUFFIX) {
            let packed = format!("{path}{COMPRESSED_SUFFIX}");
            if let Some(file) = self.lookup(&table, &packed)?
                && file.is_file()
            {
                log::trace!("Vfs: {path} served from {packed}");
                return Ok(file.into_compressed(path.to_owned(), CompressionMethod::Zlib));
            }
        }
        Err(VfsError::NotFound(path.to_owned()))
    }

    /// First mount covering `path` that accepts writes.
    fn writable_target(&self, path: &str) -> Result<(Arc<MountPoint>, String), VfsError> {
        let table = self.snapshot();
        let mut covered = false;
        for (point, local) in table.covering(path, self.policy()) {
            covered = true;
            if point.mount.capabilities().contains(MountCapabilities::WRITE) {
                return Ok((point.clone(), local.to_owned()));
            }
        }
        if covered {
            Err(VfsError::Unsupported(format!("no writable mount covers {path}")))
        } else {
            Err(VfsError::NotFound(path.to_owned()))
        }
    }
}

fn same_instance(a: &Arc<dyn Mount>, b: &Arc<dyn Mount>) -> bool {
    std::ptr::eq(Arc::as_ptr(a).cast::<()>(), Arc::as_ptr(b).cast::<()>())
}

/// Overlay namespace over prioritized mounts.
///
/// Each call to [`new`](Self::new) creates an independent, empty namespace;
/// there is no global instance. `Clone` is cheap and shares the namespace.
/// All operations are synchronous and safe to call from any thread.
///
/// # Resolution
///
/// Mount points are walked by descending priority and, at equal priority,
/// most recently mounted first. For reads the first mount holding a file
/// wins. A path that is a directory in the first mount that has it becomes a
/// composite of every covering mount's directory, so listings show the union
/// with higher-priority names shadowing lower ones. A mount that reports a
/// hard error (such as [`VfsError::Corrupt`]) stops resolution; it is never
/// skipped in favor of a lower mount.
///
/// # Registry updates
///
/// Mount and unmount replace an immutable table snapshot, so a concurrent
/// resolution sees either the table before or after the change. Unmounting
/// invalidates every outstanding [`VirtualFile`] and [`VfsStream`] that was
/// resolved through the mount; they fail with [`VfsError::Stale`] from then on.
///
/// # Example
///
/// ```
/// use lilium_vfs::{RamDiskMount, VirtualFileSystem};
///
/// let vfs = VirtualFileSystem::new();
/// let base = RamDiskMount::new().with_file("x.txt", "old").unwrap();
/// let patch = RamDiskMount::new().with_file("x.txt", "new").unwrap();
/// vfs.mount("/data", base, 0).unwrap();
/// let patch_id = vfs.mount("/data", patch, 1).unwrap();
///
/// assert_eq!(vfs.read_to_string("/data/x.txt").unwrap(), "new");
/// vfs.unmount(patch_id).unwrap();
/// assert_eq!(vfs.read_to_string("/data/x.txt").unwrap(), "old");
/// ```
#[derive(Clone)]
pub struct VirtualFileSystem {
    inner: Arc<VfsInner>,
}

impl VirtualFileSystem {
    /// Create an empty namespace with default options.
    pub fn new() -> Self {
        Self::with_options(VfsOptions::default())
    }

    pub fn with_options(options: VfsOptions) -> Self {
        Self {
            inner: Arc::new(VfsInner {
                table: RwLock::new(Arc::new(MountTable::default())),
                writer: Mutex::new(()),
                registry: LifetimeRegistry::new(),
                next_id: AtomicU64::new(1),
                options,
                cwd: RwLock::new(path::ROOT.to_owned()),
            }),
        }
    }

    pub fn options(&self) -> VfsOptions {
        self.inner.options
    }

    // -- Registry --

    /// Mount `mount` at `point`. Higher `priority` shadows lower.
    pub fn mount(&self, point: &str, mount: impl Mount, priority: i32) -> Result<MountId, VfsError> {
        self.mount_shared(point, Arc::new(mount), priority)
    }

    /// Mount a shared instance. The same instance cannot be mounted twice.
    pub fn mount_shared(
        &self,
        point: &str,
        mount: Arc<dyn Mount>,
        priority: i32,
    ) -> Result<MountId, VfsError> {
        let point = path::normalize_mount_point(point, self.inner.policy())?;
        let _writer = self.inner.writer.lock();
        let current = self.inner.snapshot();
        if let Some(existing) = current.points.iter().find(|p| same_instance(&p.mount, &mount)) {
            return Err(VfsError::AlreadyMounted(format!(
                "{} is already mounted at {} as {}",
                mount.describe(),
                existing.point,
                existing.id
            )));
        }

        let sequence = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let id = MountId(sequence);
        log::info!(
            "Vfs: mounted {} at {point} (priority {priority}, {id})",
            mount.describe()
        );
        let mut points = current.points.clone();
        points.push(Arc::new(MountPoint {
            id,
            point,
            mount,
            priority,
            sequence,
            subject: self.inner.registry.create_subject(),
        }));
        self.inner.publish(points);
        Ok(id)
    }

    /// Remove a mount and invalidate every handle resolved through it.
    ///
    /// Fails with [`VfsError::NotMounted`] if `id` is unknown or already
    /// unmounted.
    pub fn unmount(&self, id: MountId) -> Result<(), VfsError> {
        let removed = {
            let _writer = self.inner.writer.lock();
            let current = self.inner.snapshot();
            let Some(pos) = current.points.iter().position(|p| p.id == id) else {
                return Err(VfsError::NotMounted(id.to_string()));
            };
            let mut points = current.points.clone();
            let removed = points.remove(pos);
            self.inner.publish(points);
            removed
        };
        self.inner.retire(removed);
        Ok(())
    }

    /// Unmount everything mounted exactly at `point`. Returns how many.
    pub fn unmount_point(&self, point: &str) -> Result<usize, VfsError> {
        let point = path::normalize_mount_point(point, self.inner.policy())?;
        Ok(self.unmount_where(|p| p.point == point))
    }

    /// Unmount everything. Returns how many mounts were removed.
    pub fn unmount_all(&self) -> usize {
        self.unmount_where(|_| true)
    }

    fn unmount_where(&self, predicate: impl Fn(&MountPoint) -> bool) -> usize {
        let removed: Vec<_> = {
            let _writer = self.inner.writer.lock();
            let current = self.inner.snapshot();
            let (removed, kept): (Vec<_>, Vec<_>) =
                current.points.iter().cloned().partition(|p| predicate(p));
            if !removed.is_empty() {
                self.inner.publish(kept);
            }
            removed
        };
        let count = removed.len();
        for point in removed {
            self.inner.retire(point);
        }
        count
    }

    /// Registered mounts in precedence order.
    pub fn mounts(&self) -> Vec<MountInfo> {
        self.inner
            .snapshot()
            .points
            .iter()
            .map(|p| MountInfo {
                id: p.id,
                point: p.point.clone(),
                kind: p.mount.kind(),
                priority: p.priority,
                read_only: p.mount.is_read_only(),
                description: p.mount.describe(),
            })
            .collect()
    }

    // -- Reads --

    /// Resolve a path (absolute, or relative to [`cwd`](Self::cwd)).
    pub fn resolve(&self, path: &str) -> Result<VirtualFile, VfsError> {
        let path = self.inner.normalize(path)?;
        self.inner.resolve_normalized(&path)
    }

    /// Whether `path` resolves. Hard errors count as "no" and are logged.
    pub fn exists(&self, path: &str) -> bool {
        match self.resolve(path) {
            Ok(_) => true,
            Err(err) => {
                if !err.is_not_found() {
                    log::debug!("Vfs: exists({path}) failed: {err}");
                }
                false
            }
        }
    }

    pub fn is_directory(&self, path: &str) -> bool {
        self.resolve(path).is_ok_and(|file| file.is_directory())
    }

    pub fn is_regular_file(&self, path: &str) -> bool {
        self.resolve(path).is_ok_and(|file| file.is_file())
    }

    pub fn open_read(&self, path: &str) -> Result<VfsStream, VfsError> {
        self.resolve(path)?.open(OpenMode::Read)
    }

    pub fn read_file(&self, path: &str) -> Result<Vec<u8>, VfsError> {
        self.resolve(path)?.read_all()
    }

    /// Read a file as UTF-8. Invalid UTF-8 is [`VfsError::Corrupt`].
    pub fn read_to_string(&self, path: &str) -> Result<String, VfsError> {
        let bytes = self.read_file(path)?;
        String::from_utf8(bytes).map_err(|e| VfsError::Corrupt(format!("{path}: {e}")))
    }

    /// Children of a directory, each resolved through the overlay.
    pub fn list(&self, path: &str) -> Result<Vec<VirtualFile>, VfsError> {
        self.resolve(path)?.list()
    }

    /// Sorted, de-duplicated child names of a directory.
    pub fn list_names(&self, path: &str) -> Result<Vec<String>, VfsError> {
        self.resolve(path)?.child_names()
    }

    /// Find `name` in the first of `search_dirs` that holds it as a file.
    pub fn find_file(&self, name: &str, search_dirs: &[&str]) -> Result<Option<VirtualFile>, VfsError> {
        for dir in search_dirs {
            let dir = self.inner.normalize(dir)?;
            let candidate = path::normalize(name, &dir)?;
            match self.inner.resolve_normalized(&candidate) {
                Ok(file) if file.is_file() => return Ok(Some(file)),
                Ok(_) => {}
                Err(err) if err.is_not_found() => {}
                Err(err) => return Err(err),
            }
        }
        Ok(None)
    }

    // -- Writes --

    /// Create or truncate a file in the first writable mount covering it.
    ///
    /// Fails with [`VfsError::Unsupported`] if every covering mount is
    /// read-only, and [`VfsError::NotFound`] if no mount covers the path.
    pub fn create_file(&self, path: &str) -> Result<VfsStream, VfsError> {
        let path = self.inner.normalize(path)?;
        let (point, local) = self.inner.writable_target(&path)?;
        if local.is_empty() {
            return Err(VfsError::IsADirectory(path));
        }
        let watch = self.inner.watch(&[point.as_ref()])?;
        let stream = point.mount.create(&local)?;
        log::trace!("Vfs: created {path} in {}", point.id);
        Ok(VfsStream::new(stream, Some(watch), path))
    }

    /// Same as [`create_file`](Self::create_file).
    pub fn open_write(&self, path: &str) -> Result<VfsStream, VfsError> {
        self.create_file(path)
    }

    /// Open a file for appending, creating it if absent.
    ///
    /// A file that currently resolves to a read-only mount is copied into
    /// the first writable covering mount and appended to there.
    pub fn open_append(&self, path: &str) -> Result<VfsStream, VfsError> {
        let path = self.inner.normalize(path)?;
        match self.inner.resolve_normalized(&path) {
            Ok(file) if file.is_directory() => Err(VfsError::IsADirectory(path)),
            Ok(file) if file.is_writable() => file.open(OpenMode::Append),
            Ok(file) => {
                let existing = file.read_all()?;
                let mut stream = self.create_file(&path)?;
                stream.write_all(&existing)?;
                Ok(stream)
            }
            Err(err) if err.is_not_found() => self.create_file(&path),
            Err(err) => Err(err),
        }
    }

    /// Replace a file's contents.
    pub fn write_file(&self, path: &str, data: &[u8]) -> Result<(), VfsError> {
        let mut stream = self.create_file(path)?;
        stream.write_all(data)?;
        stream.close()
    }

    /// Create a directory (and missing parents) in the first writable mount.
    pub fn make_directory(&self, path: &str) -> Result<(), VfsError> {
        let path = self.inner.normalize(path)?;
        let (point, local) = self.inner.writable_target(&path)?;
        if local.is_empty() {
            return Ok(());
        }
        point.mount.make_directory(&local)
    }

    /// Delete the file that `path` currently resolves to.
    pub fn delete_file(&self, path: &str) -> Result<(), VfsError> {
        let file = self.resolve(path)?;
        let (local, mount) = file.source()?;
        mount.delete(&local)?;
        log::trace!("Vfs: deleted {}", file.path());
        Ok(())
    }

    /// Rename a file. Within one mount the mount renames natively; across
    /// mounts the file is copied and the source deleted.
    pub fn rename_file(&self, from: &str, to: &str) -> Result<(), VfsError> {
        let from = self.inner.normalize(from)?;
        let to = self.inner.normalize(to)?;
        let file = self.inner.resolve_normalized(&from)?;
        let (source_local, source) = file.source()?;
        if source.is_read_only() {
            return Err(crate::mount::read_only_error(source.kind(), &source_local));
        }
        let (target, target_local) = self.inner.writable_target(&to)?;
        if target_local.is_empty() {
            return Err(VfsError::IsADirectory(to));
        }
        if Some(target.id) == file.mount_ids().first().copied() && !file.is_compressed() {
            return source.rename(&source_local, &target_local);
        }
        self.copy_file(&from, &to)?;
        source.delete(&source_local)
    }

    /// Copy a file's bytes to `to`. Returns the number of bytes copied.
    ///
    /// Fails with [`VfsError::InvalidPath`] when `to` would be written to the
    /// same mount entry that `from` is read from.
    pub fn copy_file(&self, from: &str, to: &str) -> Result<u64, VfsError> {
        let from = self.inner.normalize(from)?;
        let to = self.inner.normalize(to)?;
        let file = self.inner.resolve_normalized(&from)?;
        let (source_local, _) = file.source()?;
        let (target, target_local) = self.inner.writable_target(&to)?;
        if Some(target.id) == file.mount_ids().first().copied() && source_local == target_local {
            return Err(VfsError::InvalidPath(format!(
                "{from} and {to} are the same file"
            )));
        }
        let mut reader = file.open(OpenMode::Read)?;
        let mut writer = self.create_file(&to)?;
        let copied = std::io::copy(&mut reader, &mut writer)?;
        writer.close()?;
        Ok(copied)
    }

    // -- Working directory --

    /// Change the directory relative paths resolve against.
    pub fn chdir(&self, path: &str) -> Result<(), VfsError> {
        let path = self.inner.normalize(path)?;
        let file = self.inner.resolve_normalized(&path)?;
        if !file.is_directory() {
            return Err(VfsError::NotADirectory(path));
        }
        *self.inner.cwd.write() = path;
        Ok(())
    }

    pub fn cwd(&self) -> String {
        self.inner.cwd.read().clone()
    }
}

impl Default for VirtualFileSystem {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for VirtualFileSystem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VirtualFileSystem")
            .field("mounts", &self.inner.snapshot().points.len())
            .field("options", &self.inner.options)
            .field("cwd", &*self.inner.cwd.read())
            .finish()
    }
}
