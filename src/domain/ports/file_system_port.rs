//! Port definition for filesystem access.

use std::io;
use std::path::{Path, PathBuf};

/// A file found by [`FileSystem::read_dir`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileEntry {
    /// Full path of the file.
    pub path: PathBuf,
    /// Size in bytes.
    pub len: u64,
}

/// Filesystem capability used by the payload cache.
/// Implementations must be thread-safe.
#[cfg_attr(test, mockall::automock)]
pub trait FileSystem: Send + Sync {
    /// Creates a directory and all missing parents. Existing directories are
    /// not an error.
    fn create_dir_all(&self, path: &Path) -> io::Result<()>;

    /// Creates or truncates a file and writes `contents` to it.
    fn write(&self, path: &Path, contents: &[u8]) -> io::Result<()>;

    /// Reads a whole file.
    fn read(&self, path: &Path) -> io::Result<Vec<u8>>;

    /// Returns true if a file exists at `path`.
    fn exists(&self, path: &Path) -> bool;

    /// Lists the files (not sub-directories) directly inside `path`.
    fn read_dir(&self, path: &Path) -> io::Result<Vec<FileEntry>>;

    /// Removes a directory and everything below it.
    fn remove_dir_all(&self, path: &Path) -> io::Result<()>;
}
