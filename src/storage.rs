//! File-backed durable storage shared by the offline store, the dedup ledger
//! and the consent store.
//!
//! Two shapes are supported:
//!
//! - *documents*: a whole JSON value, written atomically via a `.tmp` file
//!   and a rename, so a crash mid-write leaves the previous document intact;
//! - *lists*: JSON Lines, one record per line, appended and synced.
//!
//! Directories are created lazily on every write. A storage root that cannot
//! be created (a regular file in the way, missing permissions) makes every
//! operation fail with [`StorageError::Unavailable`]; callers decide how to
//! degrade.
//!
//! ```text
//! .shoptrace/
//!   pending.jsonl          offline store
//!   tracked_orders.json    dedup ledger
//!   consent.json           consent state
//! ```

use crate::error::StorageError;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

/// Root directory of the durable state.
#[derive(Debug, Clone)]
pub struct StorageDir {
    root: PathBuf,
}

impl StorageDir {
    /// Point at `root`. Nothing is touched on disk until the first write.
    pub fn new(root: impl AsRef<Path>) -> Self {
        StorageDir {
            root: root.as_ref().to_path_buf(),
        }
    }

    /// Returns the root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path of a named entry inside the root.
    pub fn path(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }

    fn ensure_root(&self) -> io::Result<()> {
        fs::create_dir_all(&self.root)
    }

    /// Save a document atomically.
    ///
    /// Writes to `<name>.tmp` first, syncs, then renames over the final path.
    pub fn save_document<T: Serialize>(&self, name: &str, value: &T) -> Result<(), StorageError> {
        self.ensure_root()?;
        let path = self.path(name);
        let tmp_path = path.with_extension("tmp");

        let json = serde_json::to_string(value)?;

        let mut file = File::create(&tmp_path)?;
        file.write_all(json.as_bytes())?;
        file.sync_data()?;
        drop(file);

        fs::rename(&tmp_path, &path)?;
        Ok(())
    }

    /// Load a document.
    ///
    /// Returns `Ok(None)` if it was never written. A root that exists but is
    /// not a directory is reported as unavailable rather than empty.
    pub fn load_document<T: DeserializeOwned>(&self, name: &str) -> Result<Option<T>, StorageError> {
        let contents = match fs::read_to_string(self.path(name)) {
            Ok(c) => c,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                self.check_root()?;
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        };
        Ok(Some(serde_json::from_str(&contents)?))
    }

    /// Append one record to a JSON Lines list and sync it to disk.
    pub fn append_line<T: Serialize>(&self, name: &str, record: &T) -> Result<(), StorageError> {
        self.ensure_root()?;
        let json = serde_json::to_string(record)?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.path(name))?;
        writeln!(file, "{json}")?;
        file.sync_data()?;
        Ok(())
    }

    /// Read every complete record of a JSON Lines list.
    ///
    /// Empty lines are skipped. A trailing line without its newline is a
    /// write that never finished and is skipped as well. A missing list reads
    /// as empty.
    pub fn read_lines<T: DeserializeOwned>(&self, name: &str) -> Result<Vec<T>, StorageError> {
        let file = match File::open(self.path(name)) {
            Ok(f) => f,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                self.check_root()?;
                return Ok(Vec::new());
            }
            Err(e) => return Err(e.into()),
        };

        let mut reader = BufReader::new(file);
        let mut records = Vec::new();
        let mut line = String::new();
        loop {
            line.clear();
            if reader.read_line(&mut line)? == 0 {
                break;
            }
            let Some(complete) = line.strip_suffix('\n') else {
                break;
            };
            if complete.trim().is_empty() {
                continue;
            }
            records.push(serde_json::from_str(complete)?);
        }
        Ok(records)
    }

    /// Remove a named entry. Idempotent.
    pub fn remove(&self, name: &str) -> Result<(), StorageError> {
        match fs::remove_file(self.path(name)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(self.check_root()?),
            Err(e) => Err(e.into()),
        }
    }

    fn check_root(&self) -> io::Result<()> {
        match fs::metadata(&self.root) {
            Ok(meta) if !meta.is_dir() => Err(io::Error::new(
                io::ErrorKind::NotADirectory,
                format!("{} is not a directory", self.root.display()),
            )),
            Ok(_) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e),
        }
    }
}
