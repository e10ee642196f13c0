use std::collections::BTreeSet;
use std::sync::Arc;

use crate::VfsError;
use crate::mount::{
    Entry, Mount, MountCapabilities, MountKind, implied_children, read_only_error, require_file,
};
use crate::stream::{ByteSource, OpenMode, Stream, SubStream};

/// Platform-provided read-only asset store.
///
/// Paths are relative to the bundle root, `/`-separated without a leading
/// slash. Implement this over whatever the platform ships assets in.
pub trait AssetBundle: Send + Sync + 'static {
    /// Name used in logs and mount listings.
    fn name(&self) -> &str;

    /// Bytes of one asset, or `None` if absent.
    fn read(&self, path: &str) -> Result<Option<Arc<dyn ByteSource>>, VfsError>;

    fn contains(&self, path: &str) -> bool;

    /// Every asset path in the bundle.
    fn list(&self) -> Vec<String>;
}

/// Assets compiled into the binary:
///
/// ```
/// use lilium_vfs::{AssetBundleMount, StaticAssets, VirtualFileSystem};
///
/// static ASSETS: &[(&str, &[u8])] = &[("shaders/basic.wgsl", b"// shader")];
///
/// let vfs = VirtualFileSystem::new();
/// vfs.mount("/builtin", AssetBundleMount::new(StaticAssets::new("builtin", ASSETS)), 0)
///     .unwrap();
/// assert!(vfs.exists("/builtin/shaders/basic.wgsl"));
/// ```
pub struct StaticAssets {
    name: String,
    assets: &'static [(&'static str, &'static [u8])],
}

impl StaticAssets {
    pub fn new(name: impl Into<String>, assets: &'static [(&'static str, &'static [u8])]) -> Self {
        Self {
            name: name.into(),
            assets,
        }
    }

    fn find(&self, path: &str) -> Option<&'static [u8]> {
        self.assets
            .iter()
            .find(|(name, _)| name.trim_start_matches('/') == path)
            .map(|(_, data)| *data)
    }
}

impl AssetBundle for StaticAssets {
    fn name(&self) -> &str {
        &self.name
    }

    fn read(&self, path: &str) -> Result<Option<Arc<dyn ByteSource>>, VfsError> {
        Ok(self
            .find(path)
            .map(|data| Arc::new(StaticSource(data)) as Arc<dyn ByteSource>))
    }

    fn contains(&self, path: &str) -> bool {
        self.find(path).is_some()
    }

    fn list(&self) -> Vec<String> {
        self.assets
            .iter()
            .map(|(name, _)| name.trim_start_matches('/').to_owned())
            .collect()
    }
}

struct StaticSource(&'static [u8]);

impl ByteSource for StaticSource {
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<usize, VfsError> {
        let Some(rest) = usize::try_from(offset).ok().and_then(|o| self.0.get(o..)) else {
            return Ok(0);
        };
        let n = buf.len().min(rest.len());
        buf[..n].copy_from_slice(&rest[..n]);
        Ok(n)
    }

    fn size(&self) -> Result<u64, VfsError> {
        Ok(self.0.len() as u64)
    }
}

/// Read-only mount over an [`AssetBundle`].
///
/// The bundle's path list is taken once at construction to answer directory
/// queries; asset bytes are fetched from the bundle on every open.
pub struct AssetBundleMount<B: AssetBundle> {
    bundle: B,
    files: BTreeSet<String>,
    directories: BTreeSet<String>,
}

impl<B: AssetBundle> AssetBundleMount<B> {
    pub fn new(bundle: B) -> Self {
        let files: BTreeSet<String> = bundle.list().into_iter().collect();
        let mut directories = BTreeSet::new();
        for file in &files {
            let mut dir = crate::path::parent(file);
            while let Some(d) = dir.filter(|d| !d.is_empty()) {
                directories.insert(d.to_owned());
                dir = crate::path::parent(d);
            }
        }
        log::debug!(
            "AssetBundleMount: {} with {} assets",
            bundle.name(),
            files.len()
        );
        Self {
            bundle,
            files,
            directories,
        }
    }

    pub fn bundle(&self) -> &B {
        &self.bundle
    }

    fn file_entry(&self, path: &str) -> Result<Option<Entry>, VfsError> {
        match self.bundle.read(path)? {
            Some(source) => Ok(Some(Entry::file(path, source.size()?))),
            None => Ok(None),
        }
    }
}

impl<B: AssetBundle> Mount for AssetBundleMount<B> {
    fn kind(&self) -> MountKind {
        MountKind::AssetBundle
    }

    fn capabilities(&self) -> MountCapabilities {
        MountCapabilities::READ_ONLY
    }

    fn resolve(&self, local: &str) -> Result<Option<Entry>, VfsError> {
        if local.is_empty() || self.directories.contains(local) {
            return Ok(Some(Entry::directory(local)));
        }
        if !self.bundle.contains(local) {
            return Ok(None);
        }
        self.file_entry(local)
    }

    fn open(&self, entry: &Entry, mode: OpenMode) -> Result<Box<dyn Stream>, VfsError> {
        require_file(entry)?;
        if mode.is_write() {
            return Err(read_only_error(self.kind(), &entry.path));
        }
        let source = self
            .bundle
            .read(&entry.path)?
            .ok_or_else(|| VfsError::NotFound(entry.path.clone()))?;
        let len = source.size()?;
        Ok(Box::new(SubStream::new(source, 0, len)))
    }

    fn list(&self, local_dir: &str) -> Result<Vec<Entry>, VfsError> {
        if self.files.contains(local_dir) {
            return Err(VfsError::NotADirectory(local_dir.to_owned()));
        }
        if !local_dir.is_empty() && !self.directories.contains(local_dir) {
            return Err(VfsError::NotFound(local_dir.to_owned()));
        }
        let mut entries = Vec::new();
        for file in &self.files {
            let is_child = crate::path::parent(file) == Some(local_dir);
            let entry = if is_child { self.file_entry(file)? } else { None };
            entries.push((file.as_str(), entry));
        }
        Ok(implied_children(local_dir, entries.into_iter()))
    }

    fn describe(&self) -> String {
        format!("asset bundle {}", self.bundle.name())
    }
}
