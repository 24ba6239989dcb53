//! Token lifecycle for Lockbox.
//!
//! This crate turns stored credentials into usable access tokens:
//! - [`TokenLifecycleManager`] decides between cached use, on-demand
//!   exchange and background refresh
//! - [`IdentityProvider`] is the exchange seam; [`OAuthIdentity`] speaks
//!   OAuth2 refresh tokens
//! - [`SessionScope`] owns background refreshes and cancels them on
//!   sign-out

pub mod identity;
pub mod lifecycle;
pub mod oauth;
pub mod scope;

pub use identity::{ExchangeOutcome, ExchangeRequest, IdentityProvider, IssuedToken};
pub use lifecycle::{TokenLifecycleManager, DEFAULT_REFRESH_MARGIN_SECS};
pub use oauth::{OAuthConfig, OAuthIdentity, DRIVE_APPDATA_SCOPE};
pub use scope::{ScopeGuard, SessionScope};
