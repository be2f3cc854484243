//! Saving credentials between runs.
//!
//! [`FileCredentialPersistence`] writes a versioned JSON document:
//!
//! ```json
//! {
//!   "version": 1,
//!   "credentials": [
//!     {
//!       "identity": "u1",
//!       "access_token": "...",
//!       "refresh_token": "...",
//!       "expires_at": "2026-06-01T09:00:00Z",
//!       "scopes": ["chat:read"],
//!       "user_name": "botname"
//!     }
//!   ]
//! }
//! ```
//!
//! Tokens are stored in clear text; the file is created with mode `0600` on
//! Unix.

use std::collections::BTreeMap;
use std::io;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use time::OffsetDateTime;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::credential::Credential;

const FORMAT_VERSION: u32 = 1;

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum PersistenceError {
    #[error("I/O error on '{}': {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to encode or decode credentials: {0}")]
    Codec(#[from] serde_json::Error),

    #[error("unsupported credentials file version {found} (expected {})", FORMAT_VERSION)]
    UnsupportedVersion { found: u32 },

    #[error("invalid credentials file: {0}")]
    Invalid(String),
}

/// Backing storage for a [`CredentialStore`](crate::CredentialStore).
#[async_trait]
pub trait CredentialPersistence: Send + Sync {
    /// Read every saved credential. Nothing saved yet is an empty map.
    ///
    /// # Errors
    ///
    /// Returns [`PersistenceError`] when the storage cannot be read or
    /// decoded.
    async fn load(&self) -> Result<BTreeMap<String, Credential>, PersistenceError>;

    /// Replace the saved set with `credentials`.
    ///
    /// # Errors
    ///
    /// Returns [`PersistenceError`] when the storage cannot be written.
    async fn save(&self, credentials: &BTreeMap<String, Credential>)
    -> Result<(), PersistenceError>;
}

#[derive(Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
struct PersistedCredential {
    identity: String,
    access_token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    refresh_token: Option<String>,
    #[serde(default, with = "time::serde::rfc3339::option")]
    #[zeroize(skip)]
    expires_at: Option<OffsetDateTime>,
    #[serde(default)]
    scopes: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    user_name: Option<String>,
}

impl From<&Credential> for PersistedCredential {
    fn from(credential: &Credential) -> Self {
        Self {
            identity: credential.identity().to_owned(),
            access_token: credential.access_token().expose().to_owned(),
            refresh_token: credential.refresh_token().map(|t| t.expose().to_owned()),
            expires_at: credential.expires_at(),
            scopes: credential.scopes().iter().cloned().collect(),
            user_name: credential.user_name().map(str::to_owned),
        }
    }
}

impl PersistedCredential {
    fn to_credential(&self) -> Credential {
        let mut credential = Credential::new(self.identity.as_str(), self.access_token.as_str())
            .with_scopes(self.scopes.iter().map(String::as_str))
            .with_optional_user_name(self.user_name.clone());
        if let Some(refresh_token) = &self.refresh_token {
            credential = credential.with_refresh_token(refresh_token.as_str());
        }
        if let Some(expires_at) = self.expires_at {
            credential = credential.with_expires_at(expires_at);
        }
        credential
    }
}

#[derive(Serialize, Deserialize)]
struct Document {
    version: u32,
    #[serde(default)]
    credentials: Vec<PersistedCredential>,
}

/// JSON file persistence.
///
/// Writes go to a sibling temporary file that is then renamed over the
/// target, so a crash never leaves a half-written document behind. Saves are
/// serialized so concurrent auto-saves cannot interleave.
#[derive(Debug)]
pub struct FileCredentialPersistence {
    path: PathBuf,
    write_lock: tokio::sync::Mutex<()>,
}

impl FileCredentialPersistence {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: tokio::sync::Mutex::new(()),
        }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn io_error(&self, source: io::Error) -> PersistenceError {
        PersistenceError::Io {
            path: self.path.clone(),
            source,
        }
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(std::ffi::OsStr::to_os_string)
            .unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

fn decode(bytes: &[u8]) -> Result<BTreeMap<String, Credential>, PersistenceError> {
    let document: Document = serde_json::from_slice(bytes)?;
    if document.version != FORMAT_VERSION {
        return Err(PersistenceError::UnsupportedVersion {
            found: document.version,
        });
    }

    let mut credentials = BTreeMap::new();
    for persisted in &document.credentials {
        if persisted.identity.is_empty() {
            return Err(PersistenceError::Invalid("credential with empty identity".into()));
        }
        let credential = persisted.to_credential();
        if credentials
            .insert(persisted.identity.clone(), credential)
            .is_some()
        {
            return Err(PersistenceError::Invalid(format!(
                "duplicate identity '{}'",
                persisted.identity
            )));
        }
    }
    Ok(credentials)
}

fn encode(credentials: &BTreeMap<String, Credential>) -> Result<Vec<u8>, PersistenceError> {
    let document = Document {
        version: FORMAT_VERSION,
        credentials: credentials.values().map(PersistedCredential::from).collect(),
    };
    Ok(serde_json::to_vec_pretty(&document)?)
}

#[async_trait]
impl CredentialPersistence for FileCredentialPersistence {
    async fn load(&self) -> Result<BTreeMap<String, Credential>, PersistenceError> {
        let bytes = match tokio::fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                tracing::debug!(path = %self.path.display(), "no credentials file yet");
                return Ok(BTreeMap::new());
            }
            Err(e) => return Err(self.io_error(e)),
        };
        let bytes = zeroize::Zeroizing::new(bytes);
        let credentials = decode(&bytes)?;
        tracing::debug!(
            path = %self.path.display(),
            count = credentials.len(),
            "credentials loaded"
        );
        Ok(credentials)
    }

    async fn save(
        &self,
        credentials: &BTreeMap<String, Credential>,
    ) -> Result<(), PersistenceError> {
        let bytes = zeroize::Zeroizing::new(encode(credentials)?);
        let _guard = self.write_lock.lock().await;

        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| self.io_error(e))?;
        }

        let tmp = self.temp_path();
        let mut options = tokio::fs::OpenOptions::new();
        options.write(true).create(true).truncate(true);
        #[cfg(unix)]
        options.mode(0o600);

        let mut file = options.open(&tmp).await.map_err(|e| self.io_error(e))?;
        tokio::io::AsyncWriteExt::write_all(&mut file, &bytes)
            .await
            .map_err(|e| self.io_error(e))?;
        file.sync_all().await.map_err(|e| self.io_error(e))?;
        drop(file);

        tokio::fs::rename(&tmp, &self.path)
            .await
            .map_err(|e| self.io_error(e))?;
        tracing::debug!(
            path = %self.path.display(),
            count = credentials.len(),
            "credentials saved"
        );
        Ok(())
    }
}
