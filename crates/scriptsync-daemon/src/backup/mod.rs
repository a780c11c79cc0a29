//! Script backups taken before destructive mutations.
//!
//! Edit and delete call [`BackupStore::save_backup`] before touching the
//! device and abort if it fails. Backups are written for operator recovery
//! and are never read back by the engine.

mod file_store;

use std::path::PathBuf;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use scriptsync_core::ScriptId;

use crate::rpc::RpcError;

pub use file_store::FileBackupStore;

/// Why a backup was taken.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackupReason {
    Edit,
    Delete,
}

impl BackupReason {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Edit => "edit",
            Self::Delete => "delete",
        }
    }
}

impl std::fmt::Display for BackupReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One persisted backup, as written to disk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupRecord {
    pub id: ScriptId,
    pub name: String,
    pub code: String,
    /// RFC 3339 local time.
    pub timestamp: String,
    pub reason: String,
}

/// Failure to produce a backup. Always aborts the mutation that asked for it.
#[derive(Debug, thiserror::Error)]
pub enum BackupError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to serialize backup: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("Could not fetch code of script {id}: {source}")]
    CodeUnavailable {
        id: ScriptId,
        #[source]
        source: RpcError,
    },
}

/// Destination for script backups.
#[async_trait]
pub trait BackupStore: Send + Sync {
    /// Persist one backup and return where it was written.
    async fn save_backup(
        &self,
        id: ScriptId,
        name: &str,
        code: &str,
        reason: BackupReason,
    ) -> Result<PathBuf, BackupError>;
}
