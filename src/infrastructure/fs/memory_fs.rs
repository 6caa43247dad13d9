//! In-memory filesystem, used by tests and ephemeral sessions.

use std::collections::{BTreeMap, BTreeSet};
use std::io;
use std::path::{Path, PathBuf};

use parking_lot::RwLock;

use crate::domain::ports::{FileEntry, FileSystem};

#[derive(Debug, Default)]
struct Tree {
    dirs: BTreeSet<PathBuf>,
    files: BTreeMap<PathBuf, Vec<u8>>,
}

/// Filesystem held entirely in memory.
#[derive(Debug, Default)]
pub struct MemoryFileSystem {
    tree: RwLock<Tree>,
}

impl MemoryFileSystem {
    /// Creates an empty filesystem.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of files currently stored.
    #[must_use]
    pub fn file_count(&self) -> usize {
        self.tree.read().files.len()
    }
}

fn not_found(path: &Path) -> io::Error {
    io::Error::new(
        io::ErrorKind::NotFound,
        format!("{} does not exist", path.display()),
    )
}

impl FileSystem for MemoryFileSystem {
    fn create_dir_all(&self, path: &Path) -> io::Result<()> {
        let mut tree = self.tree.write();
        if tree.files.contains_key(path) {
            return Err(io::Error::new(
                io::ErrorKind::AlreadyExists,
                format!("{} is a file", path.display()),
            ));
        }
        for ancestor in path.ancestors() {
            if ancestor.as_os_str().is_empty() {
                break;
            }
            tree.dirs.insert(ancestor.to_path_buf());
        }
        Ok(())
    }

    fn write(&self, path: &Path, contents: &[u8]) -> io::Result<()> {
        let mut tree = self.tree.write();
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
            && !tree.dirs.contains(parent)
        {
            return Err(not_found(parent));
        }
        tree.files.insert(path.to_path_buf(), contents.to_vec());
        Ok(())
    }

    fn read(&self, path: &Path) -> io::Result<Vec<u8>> {
        self.tree
            .read()
            .files
            .get(path)
            .cloned()
            .ok_or_else(|| not_found(path))
    }

    fn exists(&self, path: &Path) -> bool {
        self.tree.read().files.contains_key(path)
    }

    fn read_dir(&self, path: &Path) -> io::Result<Vec<FileEntry>> {
        let tree = self.tree.read();
        if !tree.dirs.contains(path) {
            return Err(not_found(path));
        }
        Ok(tree
            .files
            .iter()
            .filter(|(file, _)| file.parent() == Some(path))
            .map(|(file, contents)| FileEntry {
                path: file.clone(),
                len: contents.len() as u64,
            })
            .collect())
    }

    fn remove_dir_all(&self, path: &Path) -> io::Result<()> {
        let mut tree = self.tree.write();
        if !tree.dirs.contains(path) {
            return Err(not_found(path));
        }
        tree.dirs.retain(|dir| !dir.starts_with(path));
        tree.files.retain(|file, _| !file.starts_with(path));
        Ok(())
    }
}
