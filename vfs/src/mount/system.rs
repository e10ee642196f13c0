use std::fs::{self, File, Metadata};
use std::io::{self, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::VfsError;
use crate::mount::{Entry, Mount, MountCapabilities, MountKind, read_only_error, require_file};
use crate::stream::{ByteSource, FileSource, OpenMode, Stream, SubStream};

/// Host filesystem directory mount.
///
/// The root is joined with the mount-relative path to form the host path.
/// Relative paths reaching a mount never contain `..`, so lookups cannot
/// leave the root. The root does not need to exist at construction; a
/// missing root simply resolves nothing.
///
/// # Example
///
/// ```no_run
/// use lilium_vfs::{SystemMount, VirtualFileSystem};
///
/// let vfs = VirtualFileSystem::new();
/// vfs.mount("/assets", SystemMount::new("./assets"), 0).unwrap();
///
/// // Reads ./assets/textures/brick.png
/// let bytes = vfs.read_file("/assets/textures/brick.png").unwrap();
/// ```
pub struct SystemMount {
    root: PathBuf,
    read_only: bool,
    case_check: bool,
}

impl SystemMount {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            read_only: false,
            case_check: false,
        }
    }

    /// Refuse every mutation even if the host would allow it.
    pub fn with_read_only(mut self, read_only: bool) -> Self {
        self.read_only = read_only;
        self
    }

    /// Require every path segment to match the host's spelling exactly, so a
    /// case-insensitive host does not serve `Foo.txt` for `foo.txt`.
    pub fn with_case_check(mut self, case_check: bool) -> Self {
        self.case_check = case_check;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn host_path(&self, local: &str) -> PathBuf {
        if local.is_empty() {
            self.root.clone()
        } else {
            self.root.join(local)
        }
    }

    fn writable(&self, local: &str) -> Result<(), VfsError> {
        if self.read_only {
            return Err(read_only_error(self.kind(), local));
        }
        Ok(())
    }

    fn exact_case(&self, local: &str) -> io::Result<bool> {
        let mut dir = self.root.clone();
        for segment in local.split('/').filter(|s| !s.is_empty()) {
            let mut found = false;
            for entry in fs::read_dir(&dir)? {
                if entry?.file_name().to_str() == Some(segment) {
                    found = true;
                    break;
                }
            }
            if !found {
                return Ok(false);
            }
            dir.push(segment);
        }
        Ok(true)
    }

    fn entry(local: String, metadata: &Metadata) -> Entry {
        let entry = if metadata.is_dir() {
            Entry::directory(local)
        } else {
            Entry::file(local, metadata.len())
        };
        entry.with_modified(metadata.modified().ok())
    }
}

/// Host errors that mean "nothing here" during resolution.
fn is_absent(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::NotFound | io::ErrorKind::NotADirectory
    )
}

impl Mount for SystemMount {
    fn kind(&self) -> MountKind {
        MountKind::System
    }

    fn capabilities(&self) -> MountCapabilities {
        if self.read_only {
            MountCapabilities::READ_ONLY
        } else {
            MountCapabilities::all()
        }
    }

    fn resolve(&self, local: &str) -> Result<Option<Entry>, VfsError> {
        let host = self.host_path(local);
        let metadata = match fs::metadata(&host) {
            Ok(metadata) => metadata,
            Err(err) if is_absent(&err) => return Ok(None),
            Err(err) => return Err(VfsError::from_io(err, &host.to_string_lossy())),
        };
        if self.case_check {
            match self.exact_case(local) {
                Ok(true) => {}
                Ok(false) => {
                    log::trace!("SystemMount: {local} differs in case on the host");
                    return Ok(None);
                }
                Err(err) => return Err(VfsError::from_io(err, &host.to_string_lossy())),
            }
        }
        Ok(Some(Self::entry(local.to_owned(), &metadata)))
    }

    fn open(&self, entry: &Entry, mode: OpenMode) -> Result<Box<dyn Stream>, VfsError> {
        require_file(entry)?;
        let host = self.host_path(&entry.path);
        match mode {
            OpenMode::Read => {
                let source = FileSource::open(&host)?;
                let len = source.size()?;
                Ok(Box::new(SubStream::new(Arc::new(source), 0, len)))
            }
            OpenMode::Write | OpenMode::Append => {
                self.writable(&entry.path)?;
                Ok(Box::new(FileWriter::open(host, mode)?))
            }
        }
    }

    fn list(&self, local_dir: &str) -> Result<Vec<Entry>, VfsError> {
        let host = self.host_path(local_dir);
        let label = host.to_string_lossy().into_owned();
        let metadata = fs::metadata(&host).map_err(|e| VfsError::from_io(e, &label))?;
        if !metadata.is_dir() {
            return Err(VfsError::NotADirectory(label));
        }
        let mut entries = Vec::new();
        for dir_entry in fs::read_dir(&host).map_err(|e| VfsError::from_io(e, &label))? {
            let dir_entry = dir_entry?;
            let Some(name) = dir_entry.file_name().to_str().map(str::to_owned) else {
                log::warn!(
                    "SystemMount: skipping non UTF-8 name {:?}",
                    dir_entry.file_name()
                );
                continue;
            };
            let metadata = dir_entry.metadata()?;
            entries.push(Self::entry(crate::path::join_local(local_dir, &name), &metadata));
        }
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(entries)
    }

    fn describe(&self) -> String {
        format!("system {}", self.root.display())
    }

    fn create(&self, local: &str) -> Result<Box<dyn Stream>, VfsError> {
        self.writable(local)?;
        let host = self.host_path(local);
        if let Some(parent) = host.parent() {
            fs::create_dir_all(parent)?;
        }
        Ok(Box::new(FileWriter::open(host, OpenMode::Write)?))
    }

    fn make_directory(&self, local: &str) -> Result<(), VfsError> {
        self.writable(local)?;
        let host = self.host_path(local);
        fs::create_dir_all(&host).map_err(|e| VfsError::from_io(e, &host.to_string_lossy()))
    }

    fn delete(&self, local: &str) -> Result<(), VfsError> {
        self.writable(local)?;
        if local.is_empty() {
            return Err(VfsError::InvalidPath("cannot delete the mount root".into()));
        }
        let host = self.host_path(local);
        let label = host.to_string_lossy().into_owned();
        let metadata = fs::metadata(&host).map_err(|e| VfsError::from_io(e, &label))?;
        let result = if metadata.is_dir() {
            fs::remove_dir(&host)
        } else {
            fs::remove_file(&host)
        };
        result.map_err(|e| VfsError::from_io(e, &label))
    }

    fn rename(&self, from: &str, to: &str) -> Result<(), VfsError> {
        self.writable(from)?;
        let (from_host, to_host) = (self.host_path(from), self.host_path(to));
        if let Some(parent) = to_host.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::rename(&from_host, &to_host)
            .map_err(|e| VfsError::from_io(e, &from_host.to_string_lossy()))
    }
}

/// Write session straight onto a host file.
struct FileWriter {
    file: File,
    path: PathBuf,
    pos: u64,
}

impl FileWriter {
    fn open(path: PathBuf, mode: OpenMode) -> Result<Self, VfsError> {
        let mut options = File::options();
        options.write(true).create(true);
        if mode == OpenMode::Append {
            options.append(true);
        } else {
            options.truncate(true);
        }
        let mut file = options
            .open(&path)
            .map_err(|e| VfsError::from_io(e, &path.to_string_lossy()))?;
        let pos = file.seek(SeekFrom::End(0))?;
        Ok(Self { file, path, pos })
    }
}

impl Stream for FileWriter {
    fn read(&mut self, _buf: &mut [u8]) -> Result<usize, VfsError> {
        Err(VfsError::Unsupported("stream is write-only".into()))
    }

    fn write(&mut self, data: &[u8]) -> Result<usize, VfsError> {
        let n = self.file.write(data)?;
        self.pos += n as u64;
        Ok(n)
    }

    fn seek(&mut self, pos: SeekFrom) -> Result<u64, VfsError> {
        self.pos = self.file.seek(pos)?;
        Ok(self.pos)
    }

    fn position(&self) -> u64 {
        self.pos
    }

    fn size(&self) -> Option<u64> {
        self.file.metadata().ok().map(|m| m.len())
    }

    fn is_writable(&self) -> bool {
        true
    }

    fn close(&mut self) -> Result<(), VfsError> {
        self.file
            .flush()
            .and_then(|()| self.file.sync_data())
            .map_err(|e| VfsError::from_io(e, &self.path.to_string_lossy()))
    }
}
