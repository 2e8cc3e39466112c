//! Filesystem capability used by migration discovery.

use std::path::Path;

/// A directory entry as seen by migration discovery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    pub name: String,
    pub is_dir: bool,
}

impl DirEntry {
    pub fn dir(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            is_dir: true,
        }
    }

    pub fn file(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            is_dir: false,
        }
    }
}

/// Read-only filesystem operations.
pub trait FileSystem: Send + Sync {
    /// List the immediate entries of a directory, in scan order.
    fn read_dir(&self, path: &Path) -> std::io::Result<Vec<DirEntry>>;

    /// Read a file as UTF-8 text.
    fn read_file(&self, path: &Path) -> std::io::Result<String>;
}

/// [`FileSystem`] backed by `std::fs`.
#[derive(Debug, Clone, Copy, Default)]
pub struct OsFileSystem;

impl FileSystem for OsFileSystem {
    fn read_dir(&self, path: &Path) -> std::io::Result<Vec<DirEntry>> {
        let mut entries = Vec::new();
        for entry in std::fs::read_dir(path)? {
            let entry = entry?;
            // Entries with non-UTF-8 names cannot be migration directories.
            let Ok(name) = entry.file_name().into_string() else {
                continue;
            };
            entries.push(DirEntry {
                name,
                is_dir: entry.file_type()?.is_dir(),
            });
        }
        Ok(entries)
    }

    fn read_file(&self, path: &Path) -> std::io::Result<String> {
        std::fs::read_to_string(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_os_read_dir_reports_kinds() {
        let dir = TempDir::new().unwrap();
        fs::create_dir(dir.path().join("1-init")).unwrap();
        fs::write(dir.path().join("README.md"), "notes").unwrap();

        let mut entries = OsFileSystem.read_dir(dir.path()).unwrap();
        entries.sort_by(|a, b| a.name.cmp(&b.name));

        assert_eq!(
            entries,
            vec![DirEntry::dir("1-init"), DirEntry::file("README.md")]
        );
    }

    #[test]
    fn test_os_read_missing_file() {
        let dir = TempDir::new().unwrap();
        let err = OsFileSystem
            .read_file(&dir.path().join("up.sql"))
            .unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::NotFound);
    }
}
