//! Google Drive backup transport.
//!
//! Backups live as fixed-name objects in the private app-data folder.
//! Each upload creates a new object; restore reads the newest one.

pub mod client;

pub use client::{DriveConfig, DriveFile, DriveTransport};
