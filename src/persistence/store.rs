//! Ledger file access.
//!
//! Reads parse the whole file; writes rewrite a single row's status and
//! progress cells and leave every other byte alone.

use std::fs;
use std::path::{Path, PathBuf};

use crate::core::ledger::{replace_row, rewrite_row, row_text, Ledger};
use crate::core::task::{TaskId, TaskStatus};
use crate::util::blocking;
use crate::{qlog_debug, Error, Result};

#[derive(Debug, Clone)]
pub struct LedgerStore {
    path: PathBuf,
}

impl LedgerStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn load(&self) -> Result<Ledger> {
        let path = self.path.clone();
        blocking(move || Self::load_sync(&path)).await
    }

    pub fn load_sync(path: &Path) -> Result<Ledger> {
        qlog_debug!("LedgerStore::load path={}", path.display());
        let text = fs::read_to_string(path)?;
        let ledger = Ledger::parse(&text);
        qlog_debug!("Ledger loaded: {} tasks", ledger.len());
        Ok(ledger)
    }

    /// The row for `id` exactly as it is on disk.
    pub async fn read_row(&self, id: TaskId) -> Result<String> {
        let path = self.path.clone();
        blocking(move || {
            let text = fs::read_to_string(&path)?;
            row_text(&text, id)
                .map(str::to_string)
                .ok_or(Error::TaskNotFound(id))
        })
        .await
    }

    /// Put back a row previously returned by [`LedgerStore::read_row`].
    pub async fn restore_row(&self, id: TaskId, row: &str) -> Result<bool> {
        let path = self.path.clone();
        let row = row.to_string();
        blocking(move || {
            let text = fs::read_to_string(&path)?;
            let updated = replace_row(&text, id, &row).ok_or(Error::TaskNotFound(id))?;
            Self::replace_text(&path, &text, &updated)
        })
        .await
    }

    /// Rewrite the status/progress cells of `id`.
    ///
    /// Returns `Ok(false)` without touching the file when the row already
    /// holds these values.
    pub async fn write_status(&self, id: TaskId, status: TaskStatus, progress: &str) -> Result<bool> {
        let path = self.path.clone();
        let progress = progress.to_string();
        blocking(move || Self::write_status_sync(&path, id, status, &progress)).await
    }

    pub fn write_status_sync(
        path: &Path,
        id: TaskId,
        status: TaskStatus,
        progress: &str,
    ) -> Result<bool> {
        let text = fs::read_to_string(path)?;
        let updated =
            rewrite_row(&text, id, status.label(), progress).ok_or(Error::TaskNotFound(id))?;
        let changed = Self::replace_text(path, &text, &updated)?;
        if changed {
            qlog_debug!("Ledger row {} -> {} / {}", id, status.label(), progress);
        } else {
            qlog_debug!("Ledger row {} already {} / {}", id, status.label(), progress);
        }
        Ok(changed)
    }

    /// Atomically swap in `updated`; no write at all when nothing changed.
    fn replace_text(path: &Path, current: &str, updated: &str) -> Result<bool> {
        if updated == current {
            return Ok(false);
        }
        let temp_path = temp_path_for(path)?;
        fs::write(&temp_path, updated)?;
        fs::rename(&temp_path, path)?;
        Ok(true)
    }
}

/// Sibling temp file used for atomic replacement.
pub(crate) fn temp_path_for(path: &Path) -> Result<PathBuf> {
    let name = path
        .file_name()
        .ok_or_else(|| Error::Validation(format!("not a file path: {}", path.display())))?;
    let mut temp = name.to_os_string();
    temp.push(".tmp");
    Ok(path.with_file_name(temp))
}
