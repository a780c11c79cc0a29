//! Transfer error types and user-facing classification.

use std::path::PathBuf;

use scriptsync_core::ScriptId;

use crate::backup::BackupError;
use crate::rpc::RpcError;

/// How a failure should be presented to the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Background refresh failed; cached data is stale and polling continues.
    Transient,
    /// A user-initiated action did not complete.
    ActionFailed,
    /// The script is no longer on the device; recover it from the backup.
    ScriptLost,
}

impl ErrorClass {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Transient => "transient",
            Self::ActionFailed => "action_failed",
            Self::ScriptLost => "script_lost",
        }
    }
}

impl std::fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failure of an upload, edit, delete or script command.
#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    /// Every create/chunk attempt failed.
    #[error("Upload of '{name}' failed after {attempts} attempt(s): {source}")]
    UploadFailed {
        name: String,
        attempts: u32,
        #[source]
        source: RpcError,
    },

    /// The backup could not be written; nothing was changed on the device.
    #[error("Backup of script {id} failed, script left untouched: {source}")]
    BackupFailed {
        id: ScriptId,
        #[source]
        source: BackupError,
    },

    /// Deleting the old script failed; the original is still in place.
    #[error("Could not remove script {id}, original left intact: {source}")]
    UpdateFailed {
        id: ScriptId,
        #[source]
        source: RpcError,
    },

    /// The new content could not be uploaded, but the original was re-created.
    #[error(
        "Update of script {original_id} failed, original restored as script {restored_id}: {cause}"
    )]
    RolledBack {
        original_id: ScriptId,
        restored_id: ScriptId,
        cause: Box<TransferError>,
    },

    /// Neither the new content nor the original could be uploaded.
    #[error(
        "Update of script {id} ('{name}') failed and the original could not be restored; \
         backup at {} ({code_len} bytes): {cause}",
        backup.display()
    )]
    RollbackFailed {
        id: ScriptId,
        name: String,
        backup: PathBuf,
        code_len: usize,
        cause: Box<TransferError>,
    },

    #[error("Script {0} not found on device")]
    ScriptNotFound(ScriptId),

    #[error(transparent)]
    Rpc(#[from] RpcError),
}

impl TransferError {
    pub const fn class(&self) -> ErrorClass {
        match self {
            Self::RollbackFailed { .. } => ErrorClass::ScriptLost,
            _ => ErrorClass::ActionFailed,
        }
    }

    /// Stable outcome label, suitable for logs and machine-readable output.
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::UploadFailed { .. } => "upload_failed",
            Self::BackupFailed { .. } => "backup_failed",
            Self::UpdateFailed { .. } => "update_failed",
            Self::RolledBack { .. } => "update_failed_restored",
            Self::RollbackFailed { .. } => "update_failed_lost",
            Self::ScriptNotFound(_) => "script_not_found",
            Self::Rpc(_) => "rpc_failed",
        }
    }

    /// Whether the device may have changed even though the action failed.
    pub const fn device_changed(&self) -> bool {
        matches!(self, Self::RolledBack { .. } | Self::RollbackFailed { .. })
    }
}
