use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("store backend error: {0}")]
    Backend(String),
    #[error("non-numeric value under {key}")]
    NotANumber { key: String },
    #[error("corrupt document under {key}: {source}")]
    Corrupt {
        key: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Atomic key-value capability shared by every gateway process.
///
/// This is the only mutual-exclusion primitive available across processes:
/// each method is a single atomic store operation, and callers composing
/// check-then-act sequences accept that those sequences are racy.
#[async_trait]
pub trait KeyValue: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;
    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError>;
    /// Sets `key` only when absent; returns whether the write happened.
    async fn set_nx(&self, key: &str, value: &str) -> Result<bool, StoreError>;
    /// Atomic increment; missing keys start at zero.
    async fn incr_by(&self, key: &str, delta: i64) -> Result<i64, StoreError>;
    async fn delete(&self, key: &str) -> Result<(), StoreError>;
    async fn exists(&self, key: &str) -> Result<bool, StoreError>;
    async fn hget(&self, key: &str, field: &str) -> Result<Option<String>, StoreError>;
    async fn hset(&self, key: &str, field: &str, value: &str) -> Result<(), StoreError>;
    async fn hgetall(&self, key: &str) -> Result<HashMap<String, String>, StoreError>;
    /// All keys starting with `prefix`.
    async fn scan_keys(&self, prefix: &str) -> Result<Vec<String>, StoreError>;
}

pub type SharedKeyValue = Arc<dyn KeyValue>;
