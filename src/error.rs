//! The error taxonomy returned by every driver and VFS operation.

/// Errors returned by the block-device, ext2 driver, and VFS layers.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The on-disk structure is corrupt (bad magic, bad geometry, ...).
    #[error("filesystem is corrupt: {0}")]
    Corrupt(String),
    /// An index (group, inode, block) fell outside the valid range.
    #[error("index out of range")]
    Range,
    /// The allocator found no free block or inode.
    #[error("no space left on device")]
    NoSpace,
    /// A path component does not exist.
    #[error("no such file or directory")]
    NotFound,
    /// The target of a create/link/mkdir already exists.
    #[error("file exists")]
    Exists,
    /// A path component that must be a directory is not one.
    #[error("not a directory")]
    NotDir,
    /// An operation that requires a non-directory was given one.
    #[error("is a directory")]
    IsDir,
    /// A path component exceeds 255 bytes.
    #[error("name too long")]
    NameTooLong,
    /// A file offset falls beyond the triply-indirect block range.
    #[error("file too large")]
    TooLarge,
    /// An operation is structurally invalid (unlink `.`/`..`, hard-link a directory, unlink root).
    #[error("invalid argument")]
    Invalid,
    /// Symbolic link resolution exceeded the bounded link-follow counter.
    #[error("too many levels of symbolic links")]
    Loop,
    /// The operation is not implemented by this node.
    #[error("operation not supported")]
    Unsupported,
    /// The underlying block device failed.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

/// The result type returned by every driver and VFS operation.
pub type FsResult<T> = Result<T, Error>;

impl Error {
    /// Returns the short, stable name used in CLI diagnostics (e.g. `FSNotFound`).
    pub fn kind_name(&self) -> &'static str {
        match self {
            Error::Corrupt(_) => "FSCorrupt",
            Error::Range => "FSRange",
            Error::NoSpace => "FSNoSpace",
            Error::NotFound => "FSNotFound",
            Error::Exists => "FSExists",
            Error::NotDir => "FSNotDir",
            Error::IsDir => "FSIsDir",
            Error::NameTooLong => "FSNameTooLong",
            Error::TooLarge => "FSTooLarge",
            Error::Invalid => "FSInvalid",
            Error::Loop => "FSLoop",
            Error::Unsupported => "FSUnsupported",
            Error::Io(_) => "FSIo",
        }
    }
}
