#![cfg_attr(coverage_nightly, feature(coverage_attribute))]
#![warn(warnings)]

//! OAuth credential lifecycle management.
//!
//! [`CredentialManager`] keeps one [`Credential`] per identity and hands out
//! tokens that are valid right now:
//!
//! - valid tokens are returned straight from the [`CredentialStore`]
//! - stale ones are refreshed through a [`TokenRefresher`], with at most one
//!   refresh per identity in flight
//! - failures come back as a cloneable [`AuthError`] and never touch the
//!   stored credential
//!
//! ```ignore
//! use credmgr::{Credential, CredentialManager, CredentialManagerConfig};
//!
//! let manager = CredentialManager::from_config(&config)?;
//! manager.load().await?;
//! let credential = manager.acquire("botname").await?;
//! let password = credential.chat_password(); // "oauth:<token>"
//! ```

// Core
pub mod clock;
pub mod credential;
pub mod error;
pub mod store;
pub mod validator;

// Refresh and lifecycle
pub mod config;
pub mod manager;
pub mod refresher;
mod wire;

// Integration
pub mod layer;
pub mod persistence;

pub use clock::{Clock, ManualClock, SystemClock};
pub use credential::Credential;
pub use error::{AuthError, ConfigError};
pub use store::CredentialStore;
pub use validator::{DEFAULT_SAFETY_MARGIN, TokenValidator};

pub use config::{ClientAuthMethod, CredentialManagerConfig, PersistenceConfig};
pub use manager::{
    CredentialManager, CredentialManagerBuilder, CredentialState, DEFAULT_REFRESH_TIMEOUT,
};
pub use refresher::{OAuthRefresher, TokenRefresher};

pub use layer::{BearerAuthLayer, BearerAuthService};
pub use persistence::{CredentialPersistence, FileCredentialPersistence, PersistenceError};

pub use credmgr_utils::SecretString;
