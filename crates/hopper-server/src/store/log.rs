//! Durable JSONL collections with atomic whole-file replacement

use std::fs::{self, File};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Serialize;

use hopper_core::{BacklogItem, Lode, PersistenceError};

/// Active lodes
pub const ACTIVE_FILE: &str = "active.jsonl";
/// Archived lodes
pub const ARCHIVED_FILE: &str = "archived.jsonl";
/// Backlog items
pub const BACKLOG_FILE: &str = "backlog.jsonl";

/// The three canonical collections
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Collections {
    pub lodes: Vec<Lode>,
    pub archived: Vec<Lode>,
    pub backlog: Vec<BacklogItem>,
}

/// Reads and rewrites the collection files in one data directory
#[derive(Debug, Clone)]
pub struct PersistenceLog {
    dir: PathBuf,
}

impl PersistenceLog {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Directory holding the collection files
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Load every collection; missing files load as empty
    pub fn load(&self) -> Result<Collections, PersistenceError> {
        Ok(Collections {
            lodes: read_records(&self.dir.join(ACTIVE_FILE))?,
            archived: read_records(&self.dir.join(ARCHIVED_FILE))?,
            backlog: read_records(&self.dir.join(BACKLOG_FILE))?,
        })
    }

    /// Rewrite every collection file
    pub fn save(&self, collections: &Collections) -> Result<(), PersistenceError> {
        fs::create_dir_all(&self.dir).map_err(|source| PersistenceError::Write {
            path: self.dir.clone(),
            source,
        })?;

        write_records(&self.dir.join(ACTIVE_FILE), &collections.lodes)?;
        write_records(&self.dir.join(ARCHIVED_FILE), &collections.archived)?;
        write_records(&self.dir.join(BACKLOG_FILE), &collections.backlog)?;
        Ok(())
    }
}

fn read_records<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>, PersistenceError> {
    let file = match File::open(path) {
        Ok(file) => file,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(source) => {
            return Err(PersistenceError::Read {
                path: path.to_path_buf(),
                source,
            })
        }
    };

    let mut records = Vec::new();
    for (index, line) in BufReader::new(file).lines().enumerate() {
        let line = line.map_err(|source| PersistenceError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        if line.trim().is_empty() {
            continue;
        }
        let record = serde_json::from_str(&line).map_err(|source| PersistenceError::Corrupt {
            path: path.to_path_buf(),
            line: index + 1,
            source,
        })?;
        records.push(record);
    }

    Ok(records)
}

fn write_records<T: Serialize>(path: &Path, records: &[T]) -> Result<(), PersistenceError> {
    let tmp = path.with_extension("jsonl.tmp");

    // Readers see the old file or the new one, never a partial write
    let result = write_file(&tmp, path, records).and_then(|()| {
        fs::rename(&tmp, path).map_err(|source| PersistenceError::Write {
            path: path.to_path_buf(),
            source,
        })
    });

    if result.is_err() {
        match fs::remove_file(&tmp) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => tracing::warn!("Failed to remove {}: {}", tmp.display(), e),
        }
    }
    result
}

/// Write and fsync `tmp`; errors are reported against `path`
fn write_file<T: Serialize>(
    tmp: &Path,
    path: &Path,
    records: &[T],
) -> Result<(), PersistenceError> {
    let write_err = |source| PersistenceError::Write {
        path: path.to_path_buf(),
        source,
    };

    let file = File::create(tmp).map_err(write_err)?;
    let mut writer = BufWriter::new(file);
    for record in records {
        serde_json::to_writer(&mut writer, record)?;
        writer.write_all(b"\n").map_err(write_err)?;
    }
    let file = writer.into_inner().map_err(|e| write_err(e.into_error()))?;
    file.sync_all().map_err(write_err)?;
    Ok(())
}
