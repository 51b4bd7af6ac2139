use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::kv::{KeyValue, StoreError};

/// In-process [`KeyValue`] implementation.
///
/// Used by tests and single-process deployments; multi-process deployments
/// bind an external shared store to the same trait.
#[derive(Default)]
pub struct MemoryStore {
    plain: RwLock<HashMap<String, String>>,
    hashes: RwLock<HashMap<String, HashMap<String, String>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KeyValue for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self.plain.read().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.plain
            .write()
            .await
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn set_nx(&self, key: &str, value: &str) -> Result<bool, StoreError> {
        let mut guard = self.plain.write().await;
        if guard.contains_key(key) {
            return Ok(false);
        }
        guard.insert(key.to_string(), value.to_string());
        Ok(true)
    }

    async fn incr_by(&self, key: &str, delta: i64) -> Result<i64, StoreError> {
        let mut guard = self.plain.write().await;
        let current = match guard.get(key) {
            Some(raw) => raw.parse::<i64>().map_err(|_| StoreError::NotANumber {
                key: key.to_string(),
            })?,
            None => 0,
        };
        let next = current + delta;
        guard.insert(key.to_string(), next.to_string());
        Ok(next)
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        self.plain.write().await.remove(key);
        self.hashes.write().await.remove(key);
        Ok(())
    }

    async fn exists(&self, key: &str) -> Result<bool, StoreError> {
        if self.plain.read().await.contains_key(key) {
            return Ok(true);
        }
        Ok(self.hashes.read().await.contains_key(key))
    }

    async fn hget(&self, key: &str, field: &str) -> Result<Option<String>, StoreError> {
        Ok(self
            .hashes
            .read()
            .await
            .get(key)
            .and_then(|fields| fields.get(field).cloned()))
    }

    async fn hset(&self, key: &str, field: &str, value: &str) -> Result<(), StoreError> {
        self.hashes
            .write()
            .await
            .entry(key.to_string())
            .or_default()
            .insert(field.to_string(), value.to_string());
        Ok(())
    }

    async fn hgetall(&self, key: &str) -> Result<HashMap<String, String>, StoreError> {
        Ok(self
            .hashes
            .read()
            .await
            .get(key)
            .cloned()
            .unwrap_or_default())
    }

    async fn scan_keys(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        let mut keys: Vec<String> = self
            .plain
            .read()
            .await
            .keys()
            .filter(|key| key.starts_with(prefix))
            .cloned()
            .collect();
        keys.extend(
            self.hashes
                .read()
                .await
                .keys()
                .filter(|key| key.starts_with(prefix))
                .cloned(),
        );
        keys.sort();
        keys.dedup();
        Ok(keys)
    }
}
