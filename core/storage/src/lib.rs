//! Credential persistence and backup transport for Lockbox.
//!
//! Credentials are kept in an ordered list of backends (the platform
//! keychain first, an encrypted preference file second) behind a durable
//! sign-out marker. Encrypted backups move through a
//! [`RemoteBackupTransport`], normally Google Drive.
//!
//! # Design Principles
//! - Graceful degradation: a failing backend falls through to the next
//! - Sign-out wins: while the marker is set no backend is consulted
//! - No token handling in transports: callers pass a bearer token in

pub mod backend;
pub mod credential;
pub mod gdrive;
pub mod keychain;
pub mod memory;
pub mod prefs;
pub mod signout;
pub mod tiered;
pub mod transport;

pub use backend::CredentialBackend;
pub use credential::StoredCredential;
pub use gdrive::{DriveConfig, DriveTransport};
pub use keychain::KeychainBackend;
pub use memory::MemoryBackend;
pub use prefs::{EncryptedPrefs, PlainPrefs};
pub use signout::SignOutFlag;
pub use tiered::CredentialStore;
pub use transport::{MemoryTransport, RemoteBackupTransport};
