//! Access credentials and the slot that holds them.

use std::collections::HashSet;
use std::sync::Arc;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use parking_lot::RwLock;
use tracing::{debug, info, warn};

/// Bearer token authorizing remote store calls.
///
/// No expiry is tracked: a credential is valid until the store rejects it.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct AccessCredential(String);

impl AccessCredential {
    pub fn new<S: Into<String>>(token: S) -> Self {
        Self(token.into())
    }

    pub fn secret(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for AccessCredential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("AccessCredential(..)")
    }
}

/// Holder of the process-wide credential.
#[async_trait]
pub trait CredentialProvider: Send + Sync {
    /// The credential currently held, if any
    fn current(&self) -> Option<AccessCredential>;

    /// Obtain a fresh credential (may involve an interactive consent flow)
    async fn request_credential(&self) -> Result<AccessCredential>;

    /// Discard `rejected` after the store refused it.
    ///
    /// The held credential is only cleared if it is still `rejected`; a newer
    /// credential granted in the meantime stays in place.
    fn invalidate_credential(&self, rejected: &AccessCredential);
}

/// Source of new credentials, e.g. an OAuth consent or refresh flow.
#[async_trait]
pub trait Authorizer: Send + Sync {
    async fn authorize(&self) -> Result<AccessCredential>;
}

/// Single-writer, many-reader credential slot backed by an [`Authorizer`].
///
/// Invalidated tokens are remembered and never handed out again, even if the
/// authorizer returns the same token a second time.
pub struct CredentialStore {
    slot: RwLock<Option<AccessCredential>>,
    rejected: RwLock<HashSet<AccessCredential>>,
    authorizer: Arc<dyn Authorizer>,
    refresh: tokio::sync::Mutex<()>,
}

impl CredentialStore {
    pub fn new(authorizer: Arc<dyn Authorizer>) -> Self {
        Self {
            slot: RwLock::new(None),
            rejected: RwLock::new(HashSet::new()),
            authorizer,
            refresh: tokio::sync::Mutex::new(()),
        }
    }

    /// Seed the slot with an already granted credential
    pub fn with_credential(self, credential: AccessCredential) -> Self {
        *self.slot.write() = Some(credential);
        self
    }

    pub fn has_credential(&self) -> bool {
        self.slot.read().is_some()
    }
}

#[async_trait]
impl CredentialProvider for CredentialStore {
    fn current(&self) -> Option<AccessCredential> {
        self.slot.read().clone()
    }

    async fn request_credential(&self) -> Result<AccessCredential> {
        // Concurrent callers share one consent flow
        let _guard = self.refresh.lock().await;
        if let Some(credential) = self.current() {
            return Ok(credential);
        }

        let credential = self.authorizer.authorize().await?;
        if self.rejected.read().contains(&credential) {
            return Err(anyhow!(
                "authorizer returned a credential the store already rejected; re-authentication required"
            ));
        }

        *self.slot.write() = Some(credential.clone());
        info!("Access credential granted");
        Ok(credential)
    }

    fn invalidate_credential(&self, rejected: &AccessCredential) {
        self.rejected.write().insert(rejected.clone());

        let mut slot = self.slot.write();
        if slot.as_ref() == Some(rejected) {
            *slot = None;
            warn!("Access credential invalidated");
        } else {
            debug!("Rejected credential was already replaced");
        }
    }
}

/// Authorizer handing out a preconfigured token.
#[derive(Debug, Clone, Default)]
pub struct StaticAuthorizer {
    token: Option<String>,
}

impl StaticAuthorizer {
    pub fn new<S: Into<String>>(token: S) -> Self {
        Self {
            token: Some(token.into()),
        }
    }

    /// Authorizer that never grants anything
    pub fn denied() -> Self {
        Self { token: None }
    }

    /// Read the token from an environment variable
    pub fn from_env(var: &str) -> Self {
        Self {
            token: std::env::var(var).ok().filter(|t| !t.trim().is_empty()),
        }
    }
}

#[async_trait]
impl Authorizer for StaticAuthorizer {
    async fn authorize(&self) -> Result<AccessCredential> {
        self.token
            .as_ref()
            .map(AccessCredential::new)
            .ok_or_else(|| anyhow!("no access token configured"))
    }
}
