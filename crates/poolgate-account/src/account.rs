use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::debug;

use poolgate_common::Tier;

use crate::credential::SessionCredential;
use crate::upstream::{CredentialStore, Upstream, UpstreamError, UpstreamSession};

/// Explicit session lifecycle; transitions happen only through
/// [`Account::session`] (lazy open) and [`Account::renew`] (forced reopen),
/// never by in-place mutation from arbitrary call sites.
enum SessionState {
    Unauthenticated,
    Open(Arc<dyn UpstreamSession>),
}

/// One pooled upstream account: a stable key, its parsed credential, a cached
/// rotating secondary token, and the lazily opened session handle.
pub struct Account {
    key: String,
    tier: Tier,
    credential: SessionCredential,
    secondary_token: RwLock<Option<String>>,
    session: RwLock<SessionState>,
}

impl Account {
    pub fn new(key: impl Into<String>, tier: Tier, credential: SessionCredential) -> Self {
        Self {
            key: key.into(),
            tier,
            credential,
            secondary_token: RwLock::new(None),
            session: RwLock::new(SessionState::Unauthenticated),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn tier(&self) -> Tier {
        self.tier
    }

    /// The open session handle, created on first use.
    pub async fn session(
        &self,
        upstream: &dyn Upstream,
        credentials: &dyn CredentialStore,
    ) -> Result<Arc<dyn UpstreamSession>, UpstreamError> {
        if let SessionState::Open(session) = &*self.session.read().await {
            return Ok(session.clone());
        }
        self.open(upstream, credentials, false).await
    }

    /// Forces a fresh session, dropping the old handle.
    pub async fn renew(
        &self,
        upstream: &dyn Upstream,
        credentials: &dyn CredentialStore,
    ) -> Result<Arc<dyn UpstreamSession>, UpstreamError> {
        self.open(upstream, credentials, true).await
    }

    /// Re-reads the rotating secondary token from the external store into
    /// the in-memory cache.
    pub async fn refresh_secondary_token(&self, credentials: &dyn CredentialStore) {
        if let Some(token) = credentials.get_secondary_token(&self.key).await {
            *self.secondary_token.write().await = Some(token);
            debug!(account = %self.key, "refreshed secondary token from store");
        }
    }

    pub async fn remaining_credits(
        &self,
        upstream: &dyn Upstream,
        credentials: &dyn CredentialStore,
    ) -> Result<i64, UpstreamError> {
        let session = self.session(upstream, credentials).await?;
        session.remaining_credits().await
    }

    async fn open(
        &self,
        upstream: &dyn Upstream,
        credentials: &dyn CredentialStore,
        force: bool,
    ) -> Result<Arc<dyn UpstreamSession>, UpstreamError> {
        let mut guard = self.session.write().await;
        if !force && let SessionState::Open(session) = &*guard {
            return Ok(session.clone());
        }

        let cached = self.secondary_token.read().await.clone();
        let opened = upstream
            .open_session(&self.credential, cached.as_deref())
            .await?;
        if let Some(fresh) = opened.secondary_token
            && Some(&fresh) != cached.as_ref()
        {
            credentials.set_secondary_token(&self.key, &fresh).await;
            *self.secondary_token.write().await = Some(fresh);
            debug!(account = %self.key, "secondary token rotated");
        }
        *guard = SessionState::Open(opened.session.clone());
        Ok(opened.session)
    }
}
