use std::collections::BTreeMap;
use std::io::SeekFrom;
use std::sync::{Arc, Weak};
use std::time::SystemTime;

use parking_lot::RwLock;

use crate::VfsError;
use crate::mount::{Entry, Mount, MountCapabilities, MountKind, require_file};
use crate::path;
use crate::stream::{BufferStream, MemorySource, OpenMode, Stream, SubStream};

#[derive(Debug, Clone)]
enum Node {
    File {
        data: Arc<[u8]>,
        modified: SystemTime,
    },
    Directory,
}

/// Flat node table keyed by mount-relative path. The root `""` always exists.
struct RamInner {
    nodes: RwLock<BTreeMap<String, Node>>,
}

impl RamInner {
    /// Insert directories for every missing ancestor of `local`.
    fn ensure_parents(nodes: &mut BTreeMap<String, Node>, local: &str) -> Result<(), VfsError> {
        let mut missing = Vec::new();
        let mut dir = path::parent(local);
        while let Some(d) = dir.filter(|d| !d.is_empty()) {
            match nodes.get(d) {
                Some(Node::Directory) => break,
                Some(Node::File { .. }) => return Err(VfsError::NotADirectory(d.to_owned())),
                None => missing.push(d.to_owned()),
            }
            dir = path::parent(d);
        }
        for d in missing {
            nodes.insert(d, Node::Directory);
        }
        Ok(())
    }

    fn store(&self, local: &str, data: Vec<u8>) -> Result<(), VfsError> {
        let mut nodes = self.nodes.write();
        if matches!(nodes.get(local), Some(Node::Directory)) {
            return Err(VfsError::IsADirectory(local.to_owned()));
        }
        Self::ensure_parents(&mut nodes, local)?;
        nodes.insert(
            local.to_owned(),
            Node::File {
                data: data.into(),
                modified: SystemTime::now(),
            },
        );
        Ok(())
    }
}

/// In-memory mount of blobs and directories.
///
/// Cloning shares the same tree. Read streams see the blob as it was when
/// they were opened; write streams buffer and replace the blob when closed
/// (or dropped). A write stream that outlives its ramdisk fails to commit
/// with [`VfsError::Stale`].
#[derive(Clone)]
pub struct RamDiskMount {
    inner: Arc<RamInner>,
}

impl RamDiskMount {
    pub fn new() -> Self {
        let mut nodes = BTreeMap::new();
        nodes.insert(String::new(), Node::Directory);
        Self {
            inner: Arc::new(RamInner {
                nodes: RwLock::new(nodes),
            }),
        }
    }

    /// Store a blob, creating parent directories as needed.
    pub fn insert(&self, local: &str, data: impl Into<Vec<u8>>) -> Result<(), VfsError> {
        let local = Self::local(local)?;
        self.inner.store(&local, data.into())
    }

    /// Builder form of [`insert`](Self::insert).
    pub fn with_file(self, local: &str, data: impl Into<Vec<u8>>) -> Result<Self, VfsError> {
        self.insert(local, data)?;
        Ok(self)
    }

    /// Number of files (directories excluded).
    pub fn file_count(&self) -> usize {
        self.inner
            .nodes
            .read()
            .values()
            .filter(|n| matches!(n, Node::File { .. }))
            .count()
    }

    fn local(raw: &str) -> Result<String, VfsError> {
        let normalized = path::normalize(raw, path::ROOT)?;
        Ok(normalized[1..].to_owned())
    }

    fn entry(local: &str, node: &Node) -> Entry {
        match node {
            Node::File { data, modified } => {
                Entry::file(local, data.len() as u64).with_modified(Some(*modified))
            }
            Node::Directory => Entry::directory(local),
        }
    }
}

impl Default for RamDiskMount {
    fn default() -> Self {
        Self::new()
    }
}

impl Mount for RamDiskMount {
    fn kind(&self) -> MountKind {
        MountKind::RamDisk
    }

    fn capabilities(&self) -> MountCapabilities {
        MountCapabilities::all()
    }

    fn resolve(&self, local: &str) -> Result<Option<Entry>, VfsError> {
        Ok(self
            .inner
            .nodes
            .read()
            .get(local)
            .map(|node| Self::entry(local, node)))
    }

    fn open(&self, entry: &Entry, mode: OpenMode) -> Result<Box<dyn Stream>, VfsError> {
        require_file(entry)?;
        let current = match self.inner.nodes.read().get(&entry.path) {
            Some(Node::File { data, .. }) => data.clone(),
            Some(Node::Directory) => return Err(VfsError::IsADirectory(entry.path.clone())),
            None => return Err(VfsError::NotFound(entry.path.clone())),
        };
        match mode {
            OpenMode::Read => {
                let len = current.len() as u64;
                Ok(Box::new(SubStream::new(
                    Arc::new(MemorySource::new(current)),
                    0,
                    len,
                )))
            }
            OpenMode::Write => Ok(Box::new(RamWriter::new(&self.inner, &entry.path, Vec::new()))),
            OpenMode::Append => {
                let mut writer = RamWriter::new(&self.inner, &entry.path, current.to_vec());
                writer.buffer.seek(SeekFrom::End(0))?;
                Ok(Box::new(writer))
            }
        }
    }

    fn list(&self, local_dir: &str) -> Result<Vec<Entry>, VfsError> {
        let nodes = self.inner.nodes.read();
        match nodes.get(local_dir) {
            Some(Node::Directory) => {}
            Some(Node::File { .. }) => return Err(VfsError::NotADirectory(local_dir.to_owned())),
            None => return Err(VfsError::NotFound(local_dir.to_owned())),
        }
        Ok(nodes
            .iter()
            .filter(|(p, _)| !p.is_empty() && path::parent(p) == Some(local_dir))
            .map(|(p, node)| Self::entry(p, node))
            .collect())
    }

    fn describe(&self) -> String {
        format!("ramdisk ({} files)", self.file_count())
    }

    fn create(&self, local: &str) -> Result<Box<dyn Stream>, VfsError> {
        self.inner.store(local, Vec::new())?;
        Ok(Box::new(RamWriter::new(&self.inner, local, Vec::new())))
    }

    fn make_directory(&self, local: &str) -> Result<(), VfsError> {
        let mut nodes = self.inner.nodes.write();
        match nodes.get(local) {
            Some(Node::Directory) => Ok(()),
            Some(Node::File { .. }) => Err(VfsError::NotADirectory(local.to_owned())),
            None => {
                RamInner::ensure_parents(&mut nodes, local)?;
                nodes.insert(local.to_owned(), Node::Directory);
                Ok(())
            }
        }
    }

    fn delete(&self, local: &str) -> Result<(), VfsError> {
        if local.is_empty() {
            return Err(VfsError::InvalidPath("cannot delete the ramdisk root".into()));
        }
        let mut nodes = self.inner.nodes.write();
        match nodes.get(local) {
            None => return Err(VfsError::NotFound(local.to_owned())),
            Some(Node::Directory) => {
                let prefix = format!("{local}/");
                if nodes.keys().any(|k| k.starts_with(&prefix)) {
                    return Err(VfsError::Unsupported(format!("directory not empty: {local}")));
                }
            }
            Some(Node::File { .. }) => {}
        }
        nodes.remove(local);
        Ok(())
    }

    fn rename(&self, from: &str, to: &str) -> Result<(), VfsError> {
        if from.is_empty() || to.is_empty() {
            return Err(VfsError::InvalidPath("cannot rename the ramdisk root".into()));
        }
        let mut nodes = self.inner.nodes.write();
        let node = nodes
            .get(from)
            .cloned()
            .ok_or_else(|| VfsError::NotFound(from.to_owned()))?;
        if from == to {
            return Ok(());
        }
        if matches!(nodes.get(to), Some(Node::Directory)) {
            return Err(VfsError::IsADirectory(to.to_owned()));
        }
        let prefix = format!("{from}/");
        if matches!(node, Node::Directory) && to.starts_with(&prefix) {
            return Err(VfsError::InvalidPath(format!("{to}: inside {from}")));
        }
        RamInner::ensure_parents(&mut nodes, to)?;

        if let Node::Directory = node {
            let moved: Vec<String> = nodes.keys().filter(|k| k.starts_with(&prefix)).cloned().collect();
            for key in moved {
                if let Some(child) = nodes.remove(&key) {
                    nodes.insert(format!("{to}/{}", &key[prefix.len()..]), child);
                }
            }
        }
        nodes.remove(from);
        nodes.insert(to.to_owned(), node);
        Ok(())
    }
}

/// Buffers writes and replaces the blob on close.
struct RamWriter {
    disk: Weak<RamInner>,
    path: String,
    buffer: BufferStream,
    committed: bool,
}

impl RamWriter {
    fn new(disk: &Arc<RamInner>, path: &str, initial: Vec<u8>) -> Self {
        Self {
            disk: Arc::downgrade(disk),
            path: path.to_owned(),
            buffer: BufferStream::with_data(initial),
            committed: false,
        }
    }

    fn commit(&mut self) -> Result<(), VfsError> {
        if self.committed {
            return Ok(());
        }
        self.committed = true;
        let disk = self
            .disk
            .upgrade()
            .ok_or_else(|| VfsError::Stale(self.path.clone()))?;
        let data = self.buffer.take();
        log::trace!("RamDiskMount: commit {} ({} bytes)", self.path, data.len());
        disk.store(&self.path, data)
    }
}

impl Stream for RamWriter {
    fn read(&mut self, _buf: &mut [u8]) -> Result<usize, VfsError> {
        Err(VfsError::Unsupported("stream is write-only".into()))
    }

    fn write(&mut self, data: &[u8]) -> Result<usize, VfsError> {
        if self.committed {
            return Err(VfsError::StreamClosed);
        }
        self.buffer.write(data)
    }

    fn seek(&mut self, pos: SeekFrom) -> Result<u64, VfsError> {
        self.buffer.seek(pos)
    }

    fn position(&self) -> u64 {
        self.buffer.position()
    }

    fn size(&self) -> Option<u64> {
        self.buffer.size()
    }

    fn is_writable(&self) -> bool {
        !self.committed
    }

    fn close(&mut self) -> Result<(), VfsError> {
        self.commit()
    }
}

impl Drop for RamWriter {
    fn drop(&mut self) {
        if let Err(err) = self.commit() {
            log::warn!("RamDiskMount: dropped write to {} was lost: {err}", self.path);
        }
    }
}
