//! `ScriptSync` daemon library.
//!
//! Keeps a local, periodically refreshed view of the scripts on a networked
//! script host and performs safe mutations against it (chunked upload, edit
//! with backup and rollback, delete, start/stop, autostart).

pub mod backup;
pub mod commands;
pub mod coordinator;
pub mod listener;
pub mod refresh;
pub mod registry;
pub mod rpc;
pub mod transfer;

#[cfg(test)]
pub(crate) mod test_helpers;
