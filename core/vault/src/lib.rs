//! Backup payload and codec for Lockbox.
//!
//! A backup is the JSON form of a [`BackupPayload`] sealed into a base64
//! envelope, either under the device key or under a passphrase-derived key.
//!
//! # Restore semantics
//! A backup that cannot be opened with the given key decodes to `None`;
//! callers report it as a wrong passphrase or a corrupted backup. Only a
//! backup that decrypts but does not parse is an error.

pub mod codec;
pub mod payload;

pub use codec::{BackupCodec, BackupMode};
pub use payload::{BackupPayload, Card, Note, PasswordEntry, PayloadCounts};
