use std::sync::Arc;

use async_trait::async_trait;
use futures_util::stream::BoxStream;

use poolgate_common::Tier;

use crate::credential::SessionCredential;

/// Failures surfaced by the opaque upstream capability.
#[derive(Debug, Clone, thiserror::Error)]
pub enum UpstreamError {
    /// The "service temporarily refusing requests" signal; the only
    /// registration failure worth retrying.
    #[error("upstream temporarily refusing requests: {0}")]
    TemporarilyRefused(String),
    #[error("upstream rejected the credentials: {0}")]
    AuthRejected(String),
    /// An in-band error chunk reported inside an otherwise healthy stream.
    #[error("{0}")]
    InBand(String),
    #[error("upstream transport error: {0}")]
    Transport(String),
}

/// Lazy sequence of raw upstream chunks. Chunks may restate prior text
/// (cumulative), so consumers de-duplicate before forwarding.
pub type ChunkStream = BoxStream<'static, Result<String, UpstreamError>>;

/// One authenticated upstream session.
#[async_trait]
pub trait UpstreamSession: Send + Sync {
    async fn stream(
        &self,
        model: &str,
        text: &str,
        attachments: &[String],
    ) -> Result<ChunkStream, UpstreamError>;

    async fn remaining_credits(&self) -> Result<i64, UpstreamError>;
}

pub struct OpenedSession {
    pub session: Arc<dyn UpstreamSession>,
    /// The rotating secondary token observed while opening, when the
    /// upstream handed out a fresh one.
    pub secondary_token: Option<String>,
}

/// The upstream backend itself, treated as an opaque capability.
#[async_trait]
pub trait Upstream: Send + Sync {
    /// Cheap preflight used during registration; does not open a session.
    async fn authenticate(&self, credential: &SessionCredential) -> Result<(), UpstreamError>;

    async fn open_session(
        &self,
        credential: &SessionCredential,
        secondary_token: Option<&str>,
    ) -> Result<OpenedSession, UpstreamError>;
}

/// External cookie/credential storage, consumed as a capability.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// All stored credentials of the given tier as `(blob, key)` pairs.
    async fn list_credentials(&self, tier: Tier) -> Vec<(String, String)>;

    async fn get_secondary_token(&self, key: &str) -> Option<String>;

    async fn set_secondary_token(&self, key: &str, token: &str);
}

/// External API-key/quota service, consumed as a capability.
#[async_trait]
pub trait QuotaService: Send + Sync {
    async fn is_valid(&self, api_key: &str) -> bool;

    async fn has_exceeded_limit(&self, api_key: &str) -> bool;

    async fn increment_usage(&self, api_key: &str, amount: u64);

    async fn is_plus_tier(&self, api_key: &str) -> bool;
}
