//! Replace and delete flows.
//!
//! The device has no in-place replace, so an edit is backup, delete, upload,
//! with a compensating re-upload of the original if the new content cannot be
//! installed. Both flows refuse to touch the device unless the backup was
//! written first.

use std::path::PathBuf;
use std::time::Duration;

use tracing::{error, info, warn};

use scriptsync_core::ScriptId;
use scriptsync_core::config::TransferConfig;

use super::error::TransferError;
use super::upload::{UploadPolicy, upload_script};
use crate::backup::{BackupError, BackupReason, BackupStore};
use crate::rpc::ScriptHost;

/// Tuning for the edit transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EditPolicy {
    /// Upload policy for the new content.
    pub forward: UploadPolicy,
    /// Pause after deleting the old script.
    pub settle: Duration,
    /// Upload policy for re-installing the original.
    pub rollback: UploadPolicy,
    /// Pause before the rollback upload starts.
    pub rollback_backoff: Duration,
}

impl Default for EditPolicy {
    fn default() -> Self {
        Self::from_config(&TransferConfig::default())
    }
}

impl EditPolicy {
    pub fn from_config(config: &TransferConfig) -> Self {
        let base = UploadPolicy::from_config(config);
        let rollback_backoff = Duration::from_millis(config.rollback_backoff_ms);
        Self {
            forward: base.clone().with_attempts(config.edit_retry_count),
            settle: Duration::from_millis(config.edit_settle_ms),
            rollback: base
                .with_attempts(config.rollback_retry_count)
                .with_backoff(rollback_backoff),
            rollback_backoff,
        }
    }
}

/// An existing script and its replacement.
#[derive(Debug, Clone, Copy)]
pub struct EditRequest<'a> {
    pub id: ScriptId,
    /// Name currently on the device; the rollback re-uses it.
    pub current_name: &'a str,
    pub new_name: &'a str,
    pub new_code: &'a str,
}

/// Fetch a script's code and persist it as a backup.
pub async fn backup_current(
    host: &dyn ScriptHost,
    backups: &dyn BackupStore,
    id: ScriptId,
    name: &str,
    reason: BackupReason,
) -> Result<(String, PathBuf), TransferError> {
    let code = host.get_code(id).await.map_err(|source| TransferError::BackupFailed {
        id,
        source: BackupError::CodeUnavailable { id, source },
    })?;
    let path = backups
        .save_backup(id, name, &code, reason)
        .await
        .map_err(|source| TransferError::BackupFailed { id, source })?;
    Ok((code, path))
}

/// Replace a script's name and code. Returns the id of the new script.
///
/// Failures after the delete step come back as [`TransferError::RolledBack`]
/// when the original was re-installed, or [`TransferError::RollbackFailed`]
/// when it was not.
pub async fn edit_script(
    host: &dyn ScriptHost,
    backups: &dyn BackupStore,
    req: EditRequest<'_>,
    policy: &EditPolicy,
) -> Result<ScriptId, TransferError> {
    let EditRequest {
        id,
        current_name,
        new_name,
        new_code,
    } = req;

    let (original_code, backup) =
        backup_current(host, backups, id, current_name, BackupReason::Edit).await?;

    if let Err(source) = host.delete_script(id).await {
        warn!(script_id = id, error = %source, "Delete before replace failed, original intact");
        return Err(TransferError::UpdateFailed { id, source });
    }

    tokio::time::sleep(policy.settle).await;

    let forward_err = match upload_script(host, new_name, new_code, &policy.forward).await {
        Ok(new_id) => {
            info!(old_id = id, new_id, name = new_name, "Script replaced");
            return Ok(new_id);
        }
        Err(e) => e,
    };

    warn!(
        script_id = id,
        error = %forward_err,
        "Replacement upload failed, restoring original"
    );
    tokio::time::sleep(policy.rollback_backoff).await;

    match upload_script(host, current_name, &original_code, &policy.rollback).await {
        Ok(restored_id) => {
            warn!(original_id = id, restored_id, "Original script restored");
            Err(TransferError::RolledBack {
                original_id: id,
                restored_id,
                cause: Box::new(forward_err),
            })
        }
        Err(rollback_err) => {
            error!(
                script_id = id,
                name = current_name,
                backup = %backup.display(),
                code_len = original_code.len(),
                error = %rollback_err,
                "Rollback failed, script lost; restore it from the backup"
            );
            Err(TransferError::RollbackFailed {
                id,
                name: current_name.to_string(),
                backup,
                code_len: original_code.len(),
                cause: Box::new(forward_err),
            })
        }
    }
}

/// Back up and delete a script. Returns the backup location.
pub async fn delete_script(
    host: &dyn ScriptHost,
    backups: &dyn BackupStore,
    id: ScriptId,
    name: &str,
) -> Result<PathBuf, TransferError> {
    let (_, backup) = backup_current(host, backups, id, name, BackupReason::Delete).await?;
    host.delete_script(id).await?;
    info!(script_id = id, name, backup = %backup.display(), "Script deleted");
    Ok(backup)
}
