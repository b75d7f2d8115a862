use crate::format::MAX_TREE_DEPTH;
use std::{
    error::Error,
    fmt, io,
    path::{Path, PathBuf},
};
use thiserror::Error;

/// An error which may occur while decoding one of the image's containers.
///
/// Every variant is recoverable at the granularity of one container: a
/// malformed partition does not prevent parsing its siblings, and a malformed
/// RomFS does not prevent the ExeFS of the same NCCH from being returned.
#[derive(Debug, Error)]
pub enum ParseError {
    /// A magic field did not hold the expected value. Fatal to that
    /// structure's parse.
    #[error("{structure} magic mismatch (expected {expected:#010x}, actual {actual:#010x})")]
    MagicMismatch {
        structure: &'static str,
        expected: u32,
        actual: u32,
    },
    /// A read would have gone past the end of the input buffer.
    #[error(
        "read of {requested:#x} bytes at offset {position:#x} is past the end \
         of the buffer ({length:#x} bytes)"
    )]
    BufferUnderrun {
        position: usize,
        requested: usize,
        length: usize,
    },
    /// A sibling/child chain revisits an offset already seen during the
    /// current tree reconstruction.
    #[error("directory or file chain revisits offset {offset:#x}")]
    CyclicStructure { offset: u32 },
    /// A table's declared boundaries or a record's declared name length
    /// contradict each other.
    #[error("inconsistent table: {0}")]
    InconsistentTable(String),
    /// The directory tree nests deeper than [`MAX_TREE_DEPTH`] levels.
    #[error("directory tree nests deeper than {MAX_TREE_DEPTH} levels")]
    TreeTooDeep,
}

/// Outcome of decoding a region whose presence is gated by a size field.
///
/// `Absent` is reserved for a zero size field; a region that is present but
/// fails to decode is kept as `Damaged` so its siblings still come through.
#[derive(Debug)]
pub enum Region<T> {
    /// The owning header's size field was zero.
    Absent,
    Present(T),
    /// The region was there but failed to decode.
    Damaged(ParseError),
}

impl<T> Region<T> {
    pub fn from_result(result: Result<T, ParseError>) -> Self {
        match result {
            Ok(value) => Region::Present(value),
            Err(error) => Region::Damaged(error),
        }
    }

    /// Returns the decoded value, if there is one.
    pub fn present(&self) -> Option<&T> {
        match self {
            Region::Present(value) => Some(value),
            _ => None,
        }
    }

    pub fn is_absent(&self) -> bool {
        matches!(self, Region::Absent)
    }

    /// Returns the decode error, if the region was damaged.
    pub fn error(&self) -> Option<&ParseError> {
        match self {
            Region::Damaged(error) => Some(error),
            _ => None,
        }
    }
}

/// File actions that are supported by the [`FileOpError`] type.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
pub enum FileOpAction {
    /// Specifies that an error occurred while trying to create a file.
    Create,
    /// Specifies that an error occurred while creating a directory.
    CreateDir,
    /// Specifies that an error occurred while opening an existing file.
    Open,
    /// Specifies that an error occurred while reading from a file.
    Read,
    /// Specifies that an error occurred while writing to a file.
    Write,
}

/// An error type that contains enough information to display an error which
/// occurred during a file I/O operation.
#[derive(Debug)]
pub struct FileOpError {
    /// The action which caused an error.
    pub action: FileOpAction,
    /// The name of the file to be included into the error message.
    pub name: &'static str,
    /// The path to the file on which the I/O operation was performed.
    pub path: PathBuf,
    /// The error returned by the I/O operation.
    pub error: io::Error,
}

impl FileOpError {
    /// Creates a boxed [`FileOpError`].
    pub fn boxed(
        action: FileOpAction,
        name: &'static str,
        path: PathBuf,
        error: io::Error,
    ) -> Box<Self> {
        Box::new(Self {
            action,
            name,
            path,
            error,
        })
    }

    /// Creates a boxed [`FileOpError`] setting action to [`FileOpAction::Create`].
    pub fn make_create(name: &'static str, path: PathBuf, error: io::Error) -> Box<Self> {
        Self::boxed(FileOpAction::Create, name, path, error)
    }

    /// Creates a boxed [`FileOpError`] setting action to [`FileOpAction::CreateDir`].
    pub fn make_create_dir(name: &'static str, path: PathBuf, error: io::Error) -> Box<Self> {
        Self::boxed(FileOpAction::CreateDir, name, path, error)
    }

    /// Creates a boxed [`FileOpError`] setting action to [`FileOpAction::Open`].
    pub fn make_open(name: &'static str, path: PathBuf, error: io::Error) -> Box<Self> {
        Self::boxed(FileOpAction::Open, name, path, error)
    }

    /// Creates a boxed [`FileOpError`] setting action to [`FileOpAction::Read`].
    pub fn make_read(name: &'static str, path: PathBuf, error: io::Error) -> Box<Self> {
        Self::boxed(FileOpAction::Read, name, path, error)
    }

    /// Creates a boxed [`FileOpError`] setting action to [`FileOpAction::Write`].
    pub fn make_write(name: &'static str, path: PathBuf, error: io::Error) -> Box<Self> {
        Self::boxed(FileOpAction::Write, name, path, error)
    }

    /// Returns `true` if the underlying I/O error is [`io::ErrorKind::AlreadyExists`].
    pub fn is_exists(&self) -> bool {
        self.error.kind() == io::ErrorKind::AlreadyExists
    }
}

impl fmt::Display for FileOpError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let verb = match self.action {
            FileOpAction::Create => "create",
            FileOpAction::CreateDir => "create directory for",
            FileOpAction::Open => "open",
            FileOpAction::Read => "read",
            FileOpAction::Write => "write",
        };

        write!(
            f,
            "failed to {} {} at path {}: {}",
            verb,
            self.name,
            self.path.display(),
            self.error
        )
    }
}

impl Error for FileOpError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        Some(&self.error)
    }
}

/// A type that describes errors which may be returned by the `unpack`,
/// `print` and `info` operations.
#[derive(Debug, Error)]
pub enum UnpackError<'a> {
    /// A catch-all for all file I/O errors.
    #[error("{0}")]
    FileOp(#[from] Box<FileOpError>),
    /// An error returned when the output directory path points to something other than a directory.
    #[error("path {} exists and is not a directory.", .0.display())]
    OutDirIsNotDir(&'a Path),
    /// An error returned when the output directory couldn't be created.
    #[error("couldn't create target directory at {}: {}", .0.display(), .1)]
    FailedToCreateOutDir(&'a Path, #[source] io::Error),
    /// An error returned when the image fails to decode at the top level.
    #[error("failed to parse image at {}: {}", .0.display(), .1)]
    ImageParse(&'a Path, #[source] ParseError),
}

#[cfg(test)]
mod tests {
    use super::FileOpError;
    use std::io;

    #[test]
    fn is_exists_matches_only_already_exists() {
        let exists = FileOpError::make_create(
            "file",
            "out".into(),
            io::Error::from(io::ErrorKind::AlreadyExists),
        );
        assert!(exists.is_exists());

        let denied = FileOpError::make_create(
            "file",
            "out".into(),
            io::Error::from(io::ErrorKind::PermissionDenied),
        );
        assert!(!denied.is_exists());
    }
}
