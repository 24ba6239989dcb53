//! Application layer for Lockbox.
//!
//! Wires keys, credential tiers, the token lifecycle, the backup codec and
//! the remote transport into one [`BackupService`], configured from a
//! [`LockboxConfig`] file.

pub mod config;
pub mod service;

pub use config::LockboxConfig;
pub use service::BackupService;
