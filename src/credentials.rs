//! Credential sources for the activity API
//!
//! How a token is captured is up to the host. The archiver only reads the
//! current token and discards it when the API reports it expired.

use async_trait::async_trait;
use std::fmt;
use std::path::{Path, PathBuf};
use tokio::sync::RwLock;
use tracing::{debug, warn};

/// A bearer-style authorization value, sent verbatim in `Authorization`
#[derive(Clone, PartialEq, Eq)]
pub struct Credential(String);

impl Credential {
    /// Wrap a raw authorization value
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// The header value
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Credential(<redacted>)")
    }
}

/// Supplies the current credential
///
/// Implementations must be cheap to query; `current` is called once per run.
#[async_trait]
pub trait CredentialSource: Send + Sync {
    /// The most recently observed credential, if any
    async fn current(&self) -> Option<Credential>;

    /// Discard the held credential so the next run demands a fresh one
    async fn invalidate(&self);
}

/// In-memory credential holder fed by the host's request hook
#[derive(Debug, Default)]
pub struct MemoryCredentialStore {
    credential: RwLock<Option<Credential>>,
}

impl MemoryCredentialStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store already holding a credential
    pub fn with_credential(credential: Credential) -> Self {
        Self {
            credential: RwLock::new(Some(credential)),
        }
    }

    /// Record a credential seen on an outgoing request
    pub async fn observe(&self, credential: Credential) {
        *self.credential.write().await = Some(credential);
    }
}

#[async_trait]
impl CredentialSource for MemoryCredentialStore {
    async fn current(&self) -> Option<Credential> {
        self.credential.read().await.clone()
    }

    async fn invalidate(&self) {
        debug!("discarding in-memory credential");
        *self.credential.write().await = None;
    }
}

/// Credential persisted in a file between runs
///
/// The file holds the raw header value; surrounding whitespace is ignored.
/// Invalidation deletes the file.
#[derive(Debug, Clone)]
pub struct FileCredentialStore {
    path: PathBuf,
}

impl FileCredentialStore {
    /// Use the token stored at `path`
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Location of the token file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Persist a newly observed credential
    pub async fn observe(&self, credential: &Credential) -> std::io::Result<()> {
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&self.path, credential.expose()).await
    }
}

#[async_trait]
impl CredentialSource for FileCredentialStore {
    async fn current(&self) -> Option<Credential> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(contents) => {
                let token = contents.trim();
                (!token.is_empty()).then(|| Credential::new(token))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
            Err(e) => {
                warn!(path = ?self.path, error = %e, "failed to read credential file");
                None
            }
        }
    }

    async fn invalidate(&self) {
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => debug!(path = ?self.path, "removed expired credential file"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(path = ?self.path, error = %e, "failed to remove credential file"),
        }
    }
}
