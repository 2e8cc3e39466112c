//! In-memory [`FileSystem`] for discovery tests.

use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};

use crate::fs::{DirEntry, FileSystem};

/// Filesystem double holding directory listings and file contents in memory.
///
/// Listings keep insertion order, which stands in for the OS scan order.
#[derive(Debug, Default, Clone)]
pub struct MemoryFileSystem {
    dirs: HashMap<PathBuf, Vec<DirEntry>>,
    files: HashMap<PathBuf, String>,
}

impl MemoryFileSystem {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an entry to a directory listing.
    pub fn with_entry(mut self, dir: impl AsRef<Path>, entry: DirEntry) -> Self {
        self.dirs
            .entry(dir.as_ref().to_path_buf())
            .or_default()
            .push(entry);
        self
    }

    /// Add a file with contents. The file is not added to any listing.
    pub fn with_file(mut self, path: impl AsRef<Path>, content: impl Into<String>) -> Self {
        self.files
            .insert(path.as_ref().to_path_buf(), content.into());
        self
    }

    /// Add a `<root>/<dir_name>/` migration with an `up.sql` and optional
    /// `down.sql`.
    pub fn with_migration(
        self,
        root: impl AsRef<Path>,
        dir_name: &str,
        up: &str,
        down: Option<&str>,
    ) -> Self {
        let root = root.as_ref();
        let unit_dir = root.join(dir_name);
        let fs = self
            .with_entry(root, DirEntry::dir(dir_name))
            .with_file(unit_dir.join("up.sql"), up);
        match down {
            Some(down) => fs.with_file(unit_dir.join("down.sql"), down),
            None => fs,
        }
    }
}

impl FileSystem for MemoryFileSystem {
    fn read_dir(&self, path: &Path) -> io::Result<Vec<DirEntry>> {
        self.dirs.get(path).cloned().ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::NotFound,
                format!("directory not found: {}", path.display()),
            )
        })
    }

    fn read_file(&self, path: &Path) -> io::Result<String> {
        self.files.get(path).cloned().ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::NotFound,
                format!("file not found: {}", path.display()),
            )
        })
    }
}
