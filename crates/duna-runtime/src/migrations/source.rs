//! Migration discovery.
//!
//! A migrations root holds one directory per unit:
//!
//! ```text
//! <root>/<ordering_key>-<slug>/up.sql     (required)
//! <root>/<ordering_key>-<slug>/down.sql   (optional)
//! ```
//!
//! Bodies are not read during discovery; they are fetched on demand.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::debug;

use duna_core::error::{DunaError, Result};
use duna_core::fs::{FileSystem, OsFileSystem};

const UP_FILE: &str = "up.sql";
const DOWN_FILE: &str = "down.sql";

/// A discovered migration unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationUnit {
    /// Slug, i.e. the directory name without its ordering key.
    pub name: String,
    /// Sort key and intended identity.
    pub ordering_key: i64,
    /// Directory holding the unit's SQL bodies. Empty for units read back
    /// from the ledger.
    pub location: PathBuf,
}

impl MigrationUnit {
    pub fn new(name: impl Into<String>, ordering_key: i64, location: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            ordering_key,
            location: location.into(),
        }
    }

    /// Identifier of the form `<ordering_key>-<name>`.
    pub fn id(&self) -> String {
        format!("{}-{}", self.ordering_key, self.name)
    }

    /// Whether two units name the same migration.
    pub fn same_identity(&self, other: &MigrationUnit) -> bool {
        self.ordering_key == other.ordering_key && self.name == other.name
    }

    fn body_path(&self, file: &str) -> PathBuf {
        self.location.join(file)
    }
}

impl fmt::Display for MigrationUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.ordering_key, self.name)
    }
}

/// Where migration units come from.
pub trait MigrationSource: Send + Sync {
    /// All units, ascending by ordering key.
    fn discover(&self) -> Result<Vec<MigrationUnit>>;

    /// The forward SQL of a unit.
    fn up_query(&self, unit: &MigrationUnit) -> Result<String>;

    /// The backward SQL of a unit.
    fn down_query(&self, unit: &MigrationUnit) -> Result<String>;
}

/// [`MigrationSource`] reading `<key>-<slug>` directories under a root.
#[derive(Clone)]
pub struct DirectorySource {
    root: PathBuf,
    fs: Arc<dyn FileSystem>,
}

impl DirectorySource {
    /// Source over the real filesystem.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self::with_fs(root, Arc::new(OsFileSystem))
    }

    /// Source over an explicit filesystem.
    pub fn with_fs(root: impl Into<PathBuf>, fs: Arc<dyn FileSystem>) -> Self {
        Self {
            root: root.into(),
            fs,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn read_body(&self, unit: &MigrationUnit, file: &'static str) -> Result<String> {
        self.fs
            .read_file(&unit.body_path(file))
            .map_err(|source| DunaError::MigrationBody {
                migration: unit.id(),
                file,
                source,
            })
    }
}

impl MigrationSource for DirectorySource {
    fn discover(&self) -> Result<Vec<MigrationUnit>> {
        let entries = self
            .fs
            .read_dir(&self.root)
            .map_err(|source| DunaError::Discovery {
                root: self.root.clone(),
                source,
            })?;

        let mut units = Vec::new();
        for entry in entries {
            if !entry.is_dir {
                continue;
            }
            let Some(unit) = parse_unit_dir(&entry.name, &self.root)? else {
                debug!(entry = %entry.name, "Skipping non-migration directory");
                continue;
            };
            units.push(unit);
        }

        // Stable: equal (key, name) pairs keep scan order.
        units.sort_by(|a, b| {
            a.ordering_key
                .cmp(&b.ordering_key)
                .then_with(|| a.name.cmp(&b.name))
        });

        debug!(root = %self.root.display(), count = units.len(), "Discovered migrations");
        Ok(units)
    }

    fn up_query(&self, unit: &MigrationUnit) -> Result<String> {
        self.read_body(unit, UP_FILE)
    }

    fn down_query(&self, unit: &MigrationUnit) -> Result<String> {
        self.read_body(unit, DOWN_FILE)
    }
}

/// Parse a directory name of the form `<integer>-<slug>`.
///
/// Names without a hyphen are not migrations and yield `Ok(None)`. A name
/// with a hyphen whose leading segment is not an integer is an error.
pub fn parse_unit_dir(dir_name: &str, root: &Path) -> Result<Option<MigrationUnit>> {
    let Some((key, slug)) = dir_name.split_once('-') else {
        return Ok(None);
    };

    let ordering_key = key
        .parse::<i64>()
        .map_err(|source| DunaError::InvalidOrderingKey {
            entry: dir_name.to_string(),
            source,
        })?;

    Ok(Some(MigrationUnit::new(slug, ordering_key, root.join(dir_name))))
}
