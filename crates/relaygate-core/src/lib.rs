//! Core types for RelayGate, a streaming content-delivery gateway.
//!
//! This crate holds everything the HTTP layer and the decrypt backends share:
//! the storage resolution boundary, the mount table that implements it,
//! byte sources for local files and upstream responses, the settings store
//! with its per-request snapshot, process configuration, and utilities.
//!
//! # Architecture
//!
//! ```text
//!   request path
//!        |
//!        v
//!  StorageResolver (MountTable: local dirs, HTTP origins)
//!        |
//!        v
//!  (ResolvedLink, ObjectMeta) --> ByteSource (FileSource / HttpSource)
//! ```

pub mod config;
pub mod error;
pub mod mount;
pub mod settings;
pub mod source;
pub mod storage;
pub mod utils;

pub use config::GatewayConfig;
pub use error::{CoreError, CoreResult, UpstreamStatusError};
pub use mount::MountTable;
pub use settings::{GatewaySettings, MemorySettings, SettingsHandle, SettingsStore};
pub use storage::{LinkArgs, ObjectMeta, ResolvedLink, StorageRef, StorageResolver};
