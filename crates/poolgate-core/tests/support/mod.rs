use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use async_trait::async_trait;
use futures_util::StreamExt;
use tokio::sync::Mutex;

use poolgate_account::{
    ChunkStream, CredentialStore, OpenedSession, QuotaService, SessionCredential, Upstream,
    UpstreamError, UpstreamSession,
};
use poolgate_common::Tier;

pub const BLOB: &str = "p-b=tok; p-lat=lat;";

/// Upstream double whose sessions replay a scripted chunk sequence and
/// record what they were asked to stream.
pub struct MockUpstream {
    pub chunks: Vec<String>,
    pub credits: i64,
    pub calls: Arc<Mutex<Vec<RecordedCall>>>,
}

#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub model: String,
    pub text: String,
    pub attachments: Vec<String>,
}

impl MockUpstream {
    pub fn new(chunks: &[&str]) -> Self {
        Self {
            chunks: chunks.iter().map(|c| c.to_string()).collect(),
            credits: 100,
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }
}

#[async_trait]
impl Upstream for MockUpstream {
    async fn authenticate(&self, _credential: &SessionCredential) -> Result<(), UpstreamError> {
        Ok(())
    }

    async fn open_session(
        &self,
        _credential: &SessionCredential,
        _secondary_token: Option<&str>,
    ) -> Result<OpenedSession, UpstreamError> {
        Ok(OpenedSession {
            session: Arc::new(MockSession {
                chunks: self.chunks.clone(),
                credits: self.credits,
                calls: self.calls.clone(),
            }),
            secondary_token: None,
        })
    }
}

pub struct MockSession {
    pub chunks: Vec<String>,
    pub credits: i64,
    pub calls: Arc<Mutex<Vec<RecordedCall>>>,
}

#[async_trait]
impl UpstreamSession for MockSession {
    async fn stream(
        &self,
        model: &str,
        text: &str,
        attachments: &[String],
    ) -> Result<ChunkStream, UpstreamError> {
        self.calls.lock().await.push(RecordedCall {
            model: model.to_string(),
            text: text.to_string(),
            attachments: attachments.to_vec(),
        });
        let chunks = self.chunks.clone();
        Ok(futures_util::stream::iter(chunks.into_iter().map(Ok)).boxed())
    }

    async fn remaining_credits(&self) -> Result<i64, UpstreamError> {
        Ok(self.credits)
    }
}

#[derive(Default)]
pub struct MapCredentialStore {
    pub by_tier: HashMap<Tier, Vec<(String, String)>>,
    pub tokens: Mutex<HashMap<String, String>>,
}

impl MapCredentialStore {
    pub fn with_accounts(basic: usize, plus: usize) -> Self {
        let mut by_tier = HashMap::new();
        by_tier.insert(
            Tier::Basic,
            (0..basic)
                .map(|i| (BLOB.to_string(), format!("basic-{i}")))
                .collect(),
        );
        by_tier.insert(
            Tier::Plus,
            (0..plus)
                .map(|i| (BLOB.to_string(), format!("plus-{i}")))
                .collect(),
        );
        Self {
            by_tier,
            tokens: Mutex::new(HashMap::new()),
        }
    }
}

#[async_trait]
impl CredentialStore for MapCredentialStore {
    async fn list_credentials(&self, tier: Tier) -> Vec<(String, String)> {
        self.by_tier.get(&tier).cloned().unwrap_or_default()
    }

    async fn get_secondary_token(&self, key: &str) -> Option<String> {
        self.tokens.lock().await.get(key).cloned()
    }

    async fn set_secondary_token(&self, key: &str, token: &str) {
        self.tokens
            .lock()
            .await
            .insert(key.to_string(), token.to_string());
    }
}

/// Quota double: a fixed "exceeded" answer and a recorded usage total.
pub struct StaticQuota {
    pub exceeded: bool,
    pub recorded: AtomicU32,
}

impl StaticQuota {
    pub fn new(exceeded: bool) -> Self {
        Self {
            exceeded,
            recorded: AtomicU32::new(0),
        }
    }
}

#[async_trait]
impl QuotaService for StaticQuota {
    async fn is_valid(&self, _api_key: &str) -> bool {
        true
    }

    async fn has_exceeded_limit(&self, _api_key: &str) -> bool {
        self.exceeded
    }

    async fn increment_usage(&self, _api_key: &str, amount: u64) {
        self.recorded.fetch_add(amount as u32, Ordering::SeqCst);
    }

    async fn is_plus_tier(&self, _api_key: &str) -> bool {
        false
    }
}
