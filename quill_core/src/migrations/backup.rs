//! File-level database snapshots.
//!
//! The unification drops the legacy tables, so it cannot be reversed from
//! the data it leaves behind. Rolling back means putting a copy of the
//! whole database file taken beforehand back in place.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::Utc;
use log::info;

use crate::db::{Connection, ConnectionMethods};
use crate::{Error, Result};

/// A copy of a database file and the file it was taken from.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Backup {
    source: PathBuf,
    snapshot: PathBuf,
}

impl Backup {
    /// Copy the database behind `conn` into `dir` as
    /// `<name>-<timestamp>.bak`. The connection must be file-backed and
    /// must not be inside a transaction.
    pub fn create(conn: &Connection, dir: impl AsRef<Path>) -> Result<Backup> {
        let source = conn
            .path()
            .ok_or_else(|| Error::Migration("cannot back up an in-memory database".to_string()))?
            .to_path_buf();
        if !conn.sqlite().is_autocommit() {
            return Err(Error::Migration(
                "cannot back up a database with an open transaction".to_string(),
            ));
        }
        let dir = dir.as_ref();
        fs::create_dir_all(dir)?;
        let stem = source
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "database".to_string());
        let stamp = Utc::now().format("%Y%m%d_%H%M%S%3f");
        let snapshot = dir.join(format!("{stem}-{stamp}.bak"));
        fs::copy(&source, &snapshot)?;
        info!(
            "backed up {} to {}",
            source.display(),
            snapshot.display()
        );
        Ok(Backup { source, snapshot })
    }

    /// Refer to an existing snapshot of the database at `source`.
    pub fn existing(source: impl Into<PathBuf>, snapshot: impl Into<PathBuf>) -> Result<Backup> {
        let snapshot = snapshot.into();
        if !snapshot.is_file() {
            return Err(Error::not_found("backup", snapshot.display()));
        }
        Ok(Backup {
            source: source.into(),
            snapshot,
        })
    }

    /// The database file the snapshot was taken from.
    pub fn source(&self) -> &Path {
        &self.source
    }

    /// The snapshot file.
    pub fn snapshot(&self) -> &Path {
        &self.snapshot
    }

    /// Close `conn` and overwrite the database file with the snapshot.
    /// `conn` must be connected to the file the snapshot was taken from.
    /// The snapshot itself is kept.
    pub fn restore(&self, conn: Connection) -> Result<()> {
        if conn.path() != Some(self.source.as_path()) {
            return Err(Error::Migration(format!(
                "connection is not open on {}",
                self.source.display()
            )));
        }
        conn.close()?;
        self.restore_file()
    }

    /// Overwrite the database file with the snapshot. Nothing may have the
    /// database open.
    pub fn restore_file(&self) -> Result<()> {
        fs::copy(&self.snapshot, &self.source)?;
        info!(
            "restored {} from {}",
            self.source.display(),
            self.snapshot.display()
        );
        Ok(())
    }
}
