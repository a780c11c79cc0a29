//! Observable sync state.

use std::sync::Arc;

use scriptsync_core::{ScriptId, Snapshot};

use crate::refresh::RefreshError;

/// What subscribers see: the last good snapshot plus the outcome of the most
/// recent refresh.
#[derive(Debug, Clone, Default)]
pub struct SyncState {
    /// Last snapshot built successfully; kept when a later refresh fails.
    pub snapshot: Option<Arc<Snapshot>>,
    pub last_update_success: bool,
    pub last_error: Option<RefreshError>,
}

impl SyncState {
    /// A script is available iff the last refresh succeeded and saw it.
    pub fn is_available(&self, id: ScriptId) -> bool {
        self.last_update_success && self.snapshot.as_ref().is_some_and(|s| s.contains(id))
    }

    /// Showing data from an earlier cycle because the latest one failed.
    pub const fn is_stale(&self) -> bool {
        self.snapshot.is_some() && !self.last_update_success
    }
}

#[cfg(test)]
mod tests {
    use scriptsync_core::Script;

    use super::*;
    use crate::rpc::RpcError;

    fn snapshot() -> Arc<Snapshot> {
        Arc::new(Snapshot::new(
            "m",
            vec![Script {
                id: 1,
                name: "a".into(),
                enabled: true,
                running: true,
                mem_used: 0,
                mem_peak: 0,
                mem_free: 0,
            }],
        ))
    }

    #[test]
    fn availability_requires_successful_refresh() {
        let mut state = SyncState {
            snapshot: Some(snapshot()),
            last_update_success: true,
            last_error: None,
        };
        assert!(state.is_available(1));
        assert!(!state.is_available(2));
        assert!(!state.is_stale());

        state.last_update_success = false;
        state.last_error = Some(RefreshError::UpdateFailed(RpcError::BadStatus(500)));
        assert!(!state.is_available(1));
        assert!(state.is_stale());
    }

    #[test]
    fn initial_state_is_empty() {
        let state = SyncState::default();
        assert!(state.snapshot.is_none());
        assert!(!state.is_available(1));
        assert!(!state.is_stale());
    }
}
