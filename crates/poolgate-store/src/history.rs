use serde::{Deserialize, Serialize};
use time::{Duration as TimeDuration, OffsetDateTime};
use tracing::warn;

use poolgate_common::Tier;

use crate::kv::{SharedKeyValue, StoreError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

/// One conversation turn.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub timestamp: Option<OffsetDateTime>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attachment_paths: Option<Vec<String>>,
}

impl Message {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
            timestamp: None,
            attachment_paths: None,
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
            timestamp: None,
            attachment_paths: None,
        }
    }
}

/// One conversation document as persisted in the store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationHistory {
    pub conversation_id: String,
    pub messages: Vec<Message>,
    pub model: String,
}

impl ConversationHistory {
    fn latest_timestamp(&self) -> Option<OffsetDateTime> {
        self.messages.last().and_then(|message| message.timestamp)
    }
}

/// Addresses one per-tenant-per-tier history container. The same upstream
/// account/tenant combination always resumes the same log.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct HistoryKey {
    pub api_key: String,
    pub account_slot: usize,
    pub tier: Tier,
}

impl HistoryKey {
    pub fn new(api_key: impl Into<String>, account_slot: usize, tier: Tier) -> Self {
        Self {
            api_key: api_key.into(),
            account_slot,
            tier,
        }
    }

    pub fn container_key(&self) -> String {
        format!(
            "conversation_history-{}-{}-{}",
            self.api_key,
            self.account_slot,
            self.tier.as_str()
        )
    }

    fn scan_prefix(api_key: &str) -> String {
        format!("conversation_history-{api_key}-")
    }
}

/// Durable conversation log, one hash field per conversation id inside a
/// per-(api key, account slot, tier) container.
pub struct HistoryStore {
    kv: SharedKeyValue,
}

impl HistoryStore {
    pub fn new(kv: SharedKeyValue) -> Self {
        Self { kv }
    }

    /// Stamps the incoming turns with the current time, merges them into the
    /// conversation's document, and writes the merged document back as one
    /// hash-field write. Turns within a history are append-only.
    pub async fn append(
        &self,
        key: &HistoryKey,
        conversation_id: &str,
        model: &str,
        mut turns: Vec<Message>,
    ) -> Result<(), StoreError> {
        let container = key.container_key();
        let now = OffsetDateTime::now_utc();
        for turn in &mut turns {
            turn.timestamp = Some(now);
        }

        let mut history = match self.kv.hget(&container, conversation_id).await? {
            Some(raw) => {
                serde_json::from_str::<ConversationHistory>(&raw).map_err(|source| {
                    StoreError::Corrupt {
                        key: container.clone(),
                        source,
                    }
                })?
            }
            None => ConversationHistory {
                conversation_id: conversation_id.to_string(),
                messages: Vec::new(),
                model: model.to_string(),
            },
        };
        history.messages.extend(turns);

        let document = serde_json::to_string(&history).map_err(|source| StoreError::Corrupt {
            key: container.clone(),
            source,
        })?;
        self.kv.hset(&container, conversation_id, &document).await
    }

    /// Every conversation stored for `api_key` across all account slots and
    /// tiers, sorted by each conversation's latest turn timestamp, newest
    /// first. Missing timestamps are backfilled with a strictly increasing
    /// synthetic sequence starting at the epoch so the order is
    /// deterministic.
    pub async fn list_all_for_key(
        &self,
        api_key: &str,
    ) -> Result<Vec<ConversationHistory>, StoreError> {
        let keys = self.kv.scan_keys(&HistoryKey::scan_prefix(api_key)).await?;
        let mut histories = Vec::new();
        for key in keys {
            for (conversation_id, raw) in self.kv.hgetall(&key).await? {
                match serde_json::from_str::<ConversationHistory>(&raw) {
                    Ok(mut history) => {
                        backfill_timestamps(&mut history.messages);
                        histories.push(history);
                    }
                    Err(error) => {
                        warn!(%key, conversation_id, %error, "skipping corrupt history document");
                    }
                }
            }
        }
        histories.sort_by_key(|history| std::cmp::Reverse(history.latest_timestamp()));
        Ok(histories)
    }

    /// Removes the whole per-tenant-per-tier container.
    pub async fn delete_all(&self, key: &HistoryKey) -> Result<(), StoreError> {
        self.kv.delete(&key.container_key()).await
    }
}

fn backfill_timestamps(messages: &mut [Message]) {
    let mut synthetic = OffsetDateTime::UNIX_EPOCH;
    for message in messages {
        if message.timestamp.is_none() {
            message.timestamp = Some(synthetic);
            synthetic += TimeDuration::microseconds(1);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backfill_is_strictly_increasing() {
        let mut messages = vec![Message::user("a"), Message::assistant("b")];
        backfill_timestamps(&mut messages);
        let first = messages[0].timestamp.unwrap();
        let second = messages[1].timestamp.unwrap();
        assert_eq!(first, OffsetDateTime::UNIX_EPOCH);
        assert!(second > first);
    }

    #[test]
    fn container_key_uses_internal_tier_name() {
        let key = HistoryKey::new("sk-1", 2, Tier::Basic);
        assert_eq!(key.container_key(), "conversation_history-sk-1-2-basic");
    }
}
