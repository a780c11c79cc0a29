//! File-based backup store.
//!
//! One pretty-printed JSON file per backup, named
//! `script_<id>_<reason>_<YYYYmmdd_HHMMSS_micros>.json`. After each write the
//! script's backups are pruned to `max_per_script`, oldest first by
//! modification time. File work runs on the blocking pool.

use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use async_trait::async_trait;
use chrono::Local;
use tracing::{debug, info, warn};

use scriptsync_core::ScriptId;

use super::{BackupError, BackupReason, BackupRecord, BackupStore};

/// Backup store writing into a single directory.
#[derive(Debug, Clone)]
pub struct FileBackupStore {
    dir: PathBuf,
    max_per_script: usize,
}

impl FileBackupStore {
    pub fn new(dir: impl Into<PathBuf>, max_per_script: usize) -> Self {
        Self {
            dir: dir.into(),
            max_per_script: max_per_script.max(1),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Backups of one script, oldest first.
    pub fn list_backups(&self, id: ScriptId) -> Result<Vec<PathBuf>, BackupError> {
        if !self.dir.exists() {
            return Ok(Vec::new());
        }
        let prefix = format!("script_{id}_");
        let mut found: Vec<(SystemTime, PathBuf)> = Vec::new();
        for entry in std::fs::read_dir(&self.dir)? {
            let entry = entry?;
            let path = entry.path();
            let Some(file_name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            if !file_name.starts_with(&prefix) || !file_name.ends_with(".json") {
                continue;
            }
            let modified = entry
                .metadata()
                .and_then(|m| m.modified())
                .unwrap_or(SystemTime::UNIX_EPOCH);
            found.push((modified, path));
        }
        found.sort();
        Ok(found.into_iter().map(|(_, path)| path).collect())
    }

    /// Read a backup file back, for manual recovery.
    pub fn load(path: &Path) -> Result<BackupRecord, BackupError> {
        let data = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&data)?)
    }

    /// Create a file that does not exist yet. The `_n` suffix resolves
    /// collisions, including between concurrent saves.
    fn create_unique(&self, id: ScriptId, reason: BackupReason) -> io::Result<(PathBuf, File)> {
        let stamp = Local::now().format("%Y%m%d_%H%M%S_%6f");
        let base = format!("script_{id}_{reason}_{stamp}");
        let mut path = self.dir.join(format!("{base}.json"));
        let mut n = 1;
        loop {
            match OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(file) => return Ok((path, file)),
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                    path = self.dir.join(format!("{base}_{n}.json"));
                    n += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn prune(&self, id: ScriptId) -> Result<(), BackupError> {
        let backups = self.list_backups(id)?;
        if backups.len() <= self.max_per_script {
            return Ok(());
        }
        let excess = backups.len() - self.max_per_script;
        for old in backups.into_iter().take(excess) {
            match std::fs::remove_file(&old) {
                Ok(()) => debug!(script_id = id, path = %old.display(), "Removed old backup"),
                // Another save pruned it first.
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => {
                    warn!(
                        script_id = id,
                        path = %old.display(),
                        error = %e,
                        "Failed to remove old backup"
                    );
                }
            }
        }
        Ok(())
    }

    fn write_backup(
        &self,
        record: &BackupRecord,
        reason: BackupReason,
    ) -> Result<PathBuf, BackupError> {
        std::fs::create_dir_all(&self.dir)?;
        let json = serde_json::to_string_pretty(record)?;
        let (path, mut file) = self.create_unique(record.id, reason)?;
        file.write_all(json.as_bytes())?;
        file.sync_all()?;
        info!(
            script_id = record.id,
            %reason,
            path = %path.display(),
            bytes = record.code.len(),
            "Saved script backup"
        );

        // Retention is housekeeping; the backup itself is already on disk.
        if let Err(e) = self.prune(record.id) {
            warn!(script_id = record.id, error = %e, "Backup retention failed");
        }
        Ok(path)
    }
}

#[async_trait]
impl BackupStore for FileBackupStore {
    async fn save_backup(
        &self,
        id: ScriptId,
        name: &str,
        code: &str,
        reason: BackupReason,
    ) -> Result<PathBuf, BackupError> {
        let record = BackupRecord {
            id,
            name: name.to_string(),
            code: code.to_string(),
            timestamp: Local::now().to_rfc3339(),
            reason: reason.as_str().to_string(),
        };
        let store = self.clone();
        tokio::task::spawn_blocking(move || store.write_backup(&record, reason))
            .await
            .map_err(|e| BackupError::Io(io::Error::other(e)))?
    }
}
