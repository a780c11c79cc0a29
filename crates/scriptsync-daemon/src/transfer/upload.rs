//! Chunked script upload with whole-upload retry.
//!
//! One attempt is `Script.Create` followed by sequential `Script.PutCode`
//! calls. A failed chunk deletes the partially written script before the
//! next attempt so no half-written script is left on the device.

use std::time::Duration;

use tracing::{debug, info, warn};

use scriptsync_core::ScriptId;
use scriptsync_core::config::TransferConfig;

use super::chunk::chunk_code;
use super::error::TransferError;
use crate::rpc::{RpcError, ScriptHost};

/// Tuning for one upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadPolicy {
    pub chunk_size: usize,
    /// Whole-upload attempts; 0 behaves like 1.
    pub attempts: u32,
    pub retry_backoff: Duration,
    pub chunk_delay: Duration,
}

impl Default for UploadPolicy {
    fn default() -> Self {
        Self::from_config(&TransferConfig::default())
    }
}

impl UploadPolicy {
    pub const fn from_config(config: &TransferConfig) -> Self {
        Self {
            chunk_size: config.chunk_size,
            attempts: config.retry_count,
            retry_backoff: Duration::from_millis(config.retry_backoff_ms),
            chunk_delay: Duration::from_millis(config.chunk_delay_ms),
        }
    }

    #[must_use]
    pub const fn with_attempts(mut self, attempts: u32) -> Self {
        self.attempts = attempts;
        self
    }

    #[must_use]
    pub const fn with_backoff(mut self, backoff: Duration) -> Self {
        self.retry_backoff = backoff;
        self
    }
}

/// Install `code` as a new script called `name` and return its id.
pub async fn upload_script(
    host: &dyn ScriptHost,
    name: &str,
    code: &str,
    policy: &UploadPolicy,
) -> Result<ScriptId, TransferError> {
    let attempts = policy.attempts.max(1);
    let chunks = chunk_code(code, policy.chunk_size);
    info!(name, bytes = code.len(), chunks = chunks.len(), attempts, "Uploading script");

    let mut attempt = 1;
    loop {
        match upload_once(host, name, &chunks, policy).await {
            Ok(id) => {
                info!(script_id = id, name, attempt, "Script uploaded");
                return Ok(id);
            }
            Err(e) if attempt >= attempts => {
                warn!(name, attempt, error = %e, "Upload failed, no attempts left");
                return Err(TransferError::UploadFailed {
                    name: name.to_string(),
                    attempts,
                    source: e,
                });
            }
            Err(e) => {
                warn!(
                    name,
                    attempt,
                    attempts,
                    error = %e,
                    backoff_ms = policy.retry_backoff.as_millis(),
                    "Upload attempt failed, retrying"
                );
                tokio::time::sleep(policy.retry_backoff).await;
                attempt += 1;
            }
        }
    }
}

async fn upload_once(
    host: &dyn ScriptHost,
    name: &str,
    chunks: &[&str],
    policy: &UploadPolicy,
) -> Result<ScriptId, RpcError> {
    let id = host.create_script(name).await?;
    debug!(script_id = id, name, "Script created");

    for (index, chunk) in chunks.iter().enumerate() {
        if index > 0 {
            tokio::time::sleep(policy.chunk_delay).await;
        }
        if let Err(e) = host.put_code(id, chunk, index > 0).await {
            warn!(
                script_id = id,
                chunk = index + 1,
                total = chunks.len(),
                error = %e,
                "Chunk upload failed, removing partial script"
            );
            if let Err(delete_err) = host.delete_script(id).await {
                warn!(script_id = id, error = %delete_err, "Failed to remove partial script");
            }
            return Err(e);
        }
        debug!(
            script_id = id,
            chunk = index + 1,
            total = chunks.len(),
            bytes = chunk.len(),
            "Chunk sent"
        );
    }
    Ok(id)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::test_helpers::{Call, FakeHost};

    fn policy(attempts: u32) -> UploadPolicy {
        UploadPolicy::default().with_attempts(attempts)
    }

    fn puts(host: &FakeHost) -> Vec<(usize, bool)> {
        host.calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::PutCode { len, append, .. } => Some((len, append)),
                _ => None,
            })
            .collect()
    }

    #[tokio::test(start_paused = true)]
    async fn ten_thousand_bytes_is_three_chunks() {
        let host = FakeHost::new();
        let code = "x".repeat(10_000);

        let id = upload_script(&host, "big", &code, &policy(3)).await.unwrap();

        assert_eq!(host.count(|c| matches!(c, Call::Create(_))), 1);
        assert_eq!(puts(&host), vec![(4096, false), (4096, true), (1808, true)]);
        assert_eq!(host.script(id).unwrap().code, code);
    }

    #[tokio::test(start_paused = true)]
    async fn empty_code_is_one_create_and_one_put() {
        let host = FakeHost::new();

        upload_script(&host, "empty", "", &policy(3)).await.unwrap();

        assert_eq!(
            host.calls(),
            vec![
                Call::Create("empty".into()),
                Call::PutCode {
                    id: 1,
                    len: 0,
                    append: false
                }
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn create_failing_every_attempt() {
        let host = FakeHost::new();
        host.fail_creates(u32::MAX);

        let err = upload_script(&host, "s", "code", &policy(2))
            .await
            .unwrap_err();

        assert!(matches!(err, TransferError::UploadFailed { attempts: 2, .. }));
        assert_eq!(host.count(|c| matches!(c, Call::Create(_))), 2);
        assert_eq!(host.count(|c| matches!(c, Call::PutCode { .. })), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn zero_or_one_retry_count_is_single_attempt() {
        for attempts in [0, 1] {
            let host = FakeHost::new();
            host.fail_creates(u32::MAX);
            upload_script(&host, "s", "code", &policy(attempts))
                .await
                .unwrap_err();
            assert_eq!(host.count(|c| matches!(c, Call::Create(_))), 1);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn failed_chunk_deletes_before_retry() {
        let host = FakeHost::new();
        host.fail_puts(1);
        let code = "y".repeat(5000);

        let id = upload_script(&host, "s", &code, &policy(3)).await.unwrap();

        let calls = host.calls();
        let delete_at = calls
            .iter()
            .position(|c| *c == Call::Delete(1))
            .unwrap();
        let second_create = calls
            .iter()
            .enumerate()
            .filter(|(_, c)| matches!(c, Call::Create(_)))
            .nth(1)
            .map(|(i, _)| i)
            .unwrap();
        assert!(delete_at < second_create);

        // Partial script is gone; the retry produced a complete one.
        assert!(host.script(1).is_none());
        assert_eq!(id, 2);
        assert_eq!(host.script(id).unwrap().code, code);
    }

    #[tokio::test(start_paused = true)]
    async fn delete_failure_after_bad_chunk_is_not_escalated() {
        let host = FakeHost::new();
        host.fail_puts(1);
        host.fail_delete(true);

        let id = upload_script(&host, "s", "abc", &policy(2)).await.unwrap();
        assert_eq!(id, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn backoff_between_attempts() {
        let host = FakeHost::new();
        host.fail_creates(2);
        let start = tokio::time::Instant::now();

        upload_script(&host, "s", "a", &policy(3)).await.unwrap();

        // Two 1s backoffs; a single chunk has no inter-chunk delay.
        assert_eq!(start.elapsed(), Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn delay_only_between_chunks() {
        let host = FakeHost::new();
        let start = tokio::time::Instant::now();

        upload_script(&host, "s", &"z".repeat(4096 * 3), &policy(1))
            .await
            .unwrap();

        assert_eq!(start.elapsed(), Duration::from_millis(200));
    }
}
