use std::io;

/// Errors that can occur during virtual file system operations.
///
/// Mount-level errors propagate unmodified through [`VirtualFile`](crate::VirtualFile)
/// and [`VirtualFileSystem`](crate::VirtualFileSystem). The only place absence is
/// not an error is overlay fallthrough during resolution.
#[derive(Debug, thiserror::Error)]
pub enum VfsError {
    /// No mount produced an entry for the path.
    #[error("not found: {0}")]
    NotFound(String),
    /// A path component that must be a directory is a file.
    #[error("not a directory: {0}")]
    NotADirectory(String),
    /// A file operation was attempted on a directory.
    #[error("is a directory: {0}")]
    IsADirectory(String),
    /// The host or the mount refused access.
    #[error("permission denied: {0}")]
    PermissionDenied(String),
    /// A container or compressed payload is malformed.
    #[error("corrupt data: {0}")]
    Corrupt(String),
    /// The operation is not supported by this mount or stream.
    #[error("unsupported operation: {0}")]
    Unsupported(String),
    /// The handle outlived the mount that produced it.
    #[error("stale handle: {0}")]
    Stale(String),
    /// The stream cannot seek to the requested position.
    #[error("stream not seekable")]
    StreamNotSeekable,
    /// The stream was already closed.
    #[error("stream closed")]
    StreamClosed,
    /// An entry with this name already exists.
    #[error("already exists: {0}")]
    AlreadyExists(String),
    /// The mount instance is already registered.
    #[error("already mounted: {0}")]
    AlreadyMounted(String),
    /// The mount is not (or no longer) registered.
    #[error("not mounted: {0}")]
    NotMounted(String),
    /// The path is empty or escapes the root.
    #[error("invalid path: {0}")]
    InvalidPath(String),
    /// Host IO failure not covered by a more specific kind.
    #[error("IO error: {0}")]
    Io(#[source] io::Error),
}

/// Fieldless discriminant of [`VfsError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    NotFound,
    NotADirectory,
    IsADirectory,
    PermissionDenied,
    Corrupt,
    Unsupported,
    Stale,
    StreamNotSeekable,
    StreamClosed,
    AlreadyExists,
    AlreadyMounted,
    NotMounted,
    InvalidPath,
    Io,
}

impl VfsError {
    /// The kind of this error, for matching without caring about the message.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::NotADirectory(_) => ErrorKind::NotADirectory,
            Self::IsADirectory(_) => ErrorKind::IsADirectory,
            Self::PermissionDenied(_) => ErrorKind::PermissionDenied,
            Self::Corrupt(_) => ErrorKind::Corrupt,
            Self::Unsupported(_) => ErrorKind::Unsupported,
            Self::Stale(_) => ErrorKind::Stale,
            Self::StreamNotSeekable => ErrorKind::StreamNotSeekable,
            Self::StreamClosed => ErrorKind::StreamClosed,
            Self::AlreadyExists(_) => ErrorKind::AlreadyExists,
            Self::AlreadyMounted(_) => ErrorKind::AlreadyMounted,
            Self::NotMounted(_) => ErrorKind::NotMounted,
            Self::InvalidPath(_) => ErrorKind::InvalidPath,
            Self::Io(_) => ErrorKind::Io,
        }
    }

    /// Whether this error means "the entry is simply absent".
    pub fn is_not_found(&self) -> bool {
        self.kind() == ErrorKind::NotFound
    }

    /// Convert a host IO error, attaching the path that caused it.
    pub(crate) fn from_io(err: io::Error, path: &str) -> Self {
        match err.kind() {
            io::ErrorKind::NotFound => Self::NotFound(path.to_owned()),
            io::ErrorKind::PermissionDenied => Self::PermissionDenied(path.to_owned()),
            io::ErrorKind::NotADirectory => Self::NotADirectory(path.to_owned()),
            io::ErrorKind::IsADirectory => Self::IsADirectory(path.to_owned()),
            io::ErrorKind::AlreadyExists => Self::AlreadyExists(path.to_owned()),
            _ => Self::Io(err),
        }
    }
}

impl From<io::Error> for VfsError {
    fn from(err: io::Error) -> Self {
        // A VfsError that travelled through std::io comes back unchanged.
        if err.get_ref().is_some_and(|inner| inner.is::<VfsError>()) {
            if let Some(inner) = err.into_inner()
                && let Ok(vfs) = inner.downcast::<VfsError>()
            {
                return *vfs;
            }
            return Self::Io(io::Error::other("lost inner VFS error"));
        }
        let message = err.to_string();
        match err.kind() {
            io::ErrorKind::NotFound => Self::NotFound(message),
            io::ErrorKind::PermissionDenied => Self::PermissionDenied(message),
            io::ErrorKind::NotADirectory => Self::NotADirectory(message),
            io::ErrorKind::IsADirectory => Self::IsADirectory(message),
            io::ErrorKind::AlreadyExists => Self::AlreadyExists(message),
            _ => Self::Io(err),
        }
    }
}

impl From<VfsError> for io::Error {
    fn from(err: VfsError) -> Self {
        let kind = match err.kind() {
            ErrorKind::NotFound => io::ErrorKind::NotFound,
            ErrorKind::PermissionDenied => io::ErrorKind::PermissionDenied,
            ErrorKind::NotADirectory => io::ErrorKind::NotADirectory,
            ErrorKind::IsADirectory => io::ErrorKind::IsADirectory,
            ErrorKind::AlreadyExists => io::ErrorKind::AlreadyExists,
            ErrorKind::Unsupported => io::ErrorKind::Unsupported,
            ErrorKind::Corrupt => io::ErrorKind::InvalidData,
            ErrorKind::InvalidPath => io::ErrorKind::InvalidInput,
            ErrorKind::StreamNotSeekable => io::ErrorKind::Unsupported,
            _ => io::ErrorKind::Other,
        };
        match err {
            VfsError::Io(inner) => inner,
            other => io::Error::new(kind, other),
        }
    }
}
