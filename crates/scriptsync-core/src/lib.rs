//! `scriptsync` Core Library
//!
//! Shared functionality for `scriptsync` components:
//! - Script and snapshot model for a remote script host
//! - Configuration resolution and hierarchy
//! - Tracing initialisation
//! - Common error types

pub mod config;
pub mod error;
pub mod model;
pub mod tracing_init;

pub use config::Config;
pub use error::{Error, Result};
pub use model::{DeviceConnection, Script, ScriptId, Snapshot};
