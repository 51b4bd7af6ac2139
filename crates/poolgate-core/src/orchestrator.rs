use std::sync::Arc;

use async_trait::async_trait;
use futures_util::StreamExt;
use futures_util::stream::{self, BoxStream};
use tracing::{debug, info, warn};
use uuid::Uuid;

use poolgate_account::{AccountPool, QuotaService};
use poolgate_common::{GatewayConfig, ModelTable, Tier, messages};
use poolgate_store::{
    AccountStatusView, ConversationHistory, HealthStore, HistoryKey, HistoryStore, Message, Role,
};

use crate::balancer::select;
use crate::context::{cap_attachments, render_transcript, trim_to_token_budget};
use crate::error::GatewayError;
use crate::stream::{CompletionHooks, RetryPolicy, StreamRequest, stream_with_retry};

/// One chat call as the HTTP layer hands it over.
#[derive(Debug, Clone)]
pub struct ChatRequest {
    pub prompt: String,
    /// `None` starts a new conversation.
    pub conversation_id: Option<String>,
    pub model: String,
    pub tier: Tier,
    /// Tenant slot the conversation log is keyed under.
    pub account_slot: usize,
    pub attachments: Vec<String>,
    pub api_key: String,
}

/// The lazy chunk sequence returned to the HTTP layer, plus the conversation
/// id it belongs to (generated when the request carried none).
pub struct ChatStream {
    pub conversation_id: String,
    pub chunks: BoxStream<'static, String>,
}

impl ChatStream {
    fn text(conversation_id: String, message: &str) -> Self {
        Self {
            conversation_id,
            chunks: stream::once(futures_util::future::ready(message.to_string())).boxed(),
        }
    }
}

/// Entry point consumed by the HTTP layer. Thin glue over the pool, the two
/// durable stores, the balancer, and the streaming decoder.
pub struct ChatGateway {
    pool: Arc<AccountPool>,
    health: Arc<HealthStore>,
    history: Arc<HistoryStore>,
    quota: Arc<dyn QuotaService>,
    models: Arc<ModelTable>,
    config: GatewayConfig,
}

impl ChatGateway {
    pub fn new(
        pool: Arc<AccountPool>,
        health: Arc<HealthStore>,
        history: Arc<HistoryStore>,
        quota: Arc<dyn QuotaService>,
        models: Arc<ModelTable>,
        config: GatewayConfig,
    ) -> Self {
        Self {
            pool,
            health,
            history,
            quota,
            models,
            config,
        }
    }

    /// Streams one chat turn. All user-visible failures come back as text
    /// inside the stream; only backing-store faults surface as errors.
    pub async fn chat(&self, request: ChatRequest) -> Result<ChatStream, GatewayError> {
        let conversation_id = request
            .conversation_id
            .clone()
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        if self.quota.has_exceeded_limit(&request.api_key).await {
            info!(api_key = %request.api_key, "quota exceeded; skipping upstream call");
            return Ok(ChatStream::text(conversation_id, messages::EXCEED_LIMIT));
        }
        if request.prompt.is_empty() {
            return Ok(ChatStream::text(conversation_id, messages::NO_EMPTY_PROMPT));
        }
        let Some(model_info) = self.models.lookup(&request.model) else {
            let notice = format!("Unknown model: {}", request.model);
            return Ok(ChatStream::text(conversation_id, &notice));
        };

        let snapshot = self.status_snapshot().await?;
        let slot = match select(request.tier, &snapshot) {
            Ok(slot) => slot,
            Err(err) => {
                warn!(%err, "pool exhausted");
                return Ok(ChatStream::text(
                    conversation_id,
                    messages::NO_AVAILABLE_ACCOUNTS,
                ));
            }
        };
        let Some(account) = self.pool.get(request.tier, slot) else {
            return Ok(ChatStream::text(
                conversation_id,
                messages::NO_AVAILABLE_ACCOUNTS,
            ));
        };
        debug!(account = account.key(), tier = %request.tier, slot, "account selected");

        // Reconstruct the prior turns of this conversation from every
        // container stored for the api key.
        let histories = self.history.list_all_for_key(&request.api_key).await?;
        let mut turns: Vec<(Role, String)> = Vec::new();
        let mut former_attachments: Vec<String> = Vec::new();
        if let Some(history) = histories
            .iter()
            .find(|history| history.conversation_id == conversation_id)
        {
            for message in &history.messages {
                turns.push((message.role, message.content.clone()));
                if let Some(paths) = &message.attachment_paths {
                    former_attachments.extend(paths.iter().cloned());
                }
            }
        }
        turns.push((Role::User, request.prompt.clone()));
        if self.config.token_trimming {
            turns = trim_to_token_budget(turns, model_info.token_limit);
        }

        former_attachments.extend(request.attachments.iter().cloned());
        let attachments = cap_attachments(former_attachments, self.config.max_attachments);

        // Image models take the bare prompt; everything else the transcript.
        let text = if model_info.is_image_model {
            request.prompt.clone()
        } else {
            render_transcript(&turns)
        };

        let session = match account
            .session(
                self.pool.upstream().as_ref(),
                self.pool.credentials().as_ref(),
            )
            .await
        {
            Ok(session) => session,
            Err(err) => {
                warn!(account = account.key(), %err, "session open failed");
                let notice = format!("{}{err}", messages::STREAM_FAILED_PREFIX);
                return Ok(ChatStream::text(conversation_id, &notice));
            }
        };

        let mut user_turn = Message::user(request.prompt.clone());
        if !request.attachments.is_empty() {
            user_turn.attachment_paths = Some(request.attachments.clone());
        }
        let hooks = Arc::new(ChatCompletionHooks {
            history: self.history.clone(),
            health: self.health.clone(),
            quota: self.quota.clone(),
            key: HistoryKey::new(request.api_key.clone(), request.account_slot, request.tier),
            conversation_id: conversation_id.clone(),
            model: request.model.clone(),
            user_turn,
            points_cost: model_info.points_cost,
            tier: request.tier,
            slot,
            api_key: request.api_key.clone(),
        });

        let chunks = stream_with_retry(
            session,
            StreamRequest {
                model: model_info.base_model_id.clone(),
                text,
                attachments,
            },
            hooks,
            RetryPolicy {
                attempts: self.config.stream_attempts,
                delay: self.config.stream_retry_delay,
            },
        );
        Ok(ChatStream {
            conversation_id,
            chunks: chunks.boxed(),
        })
    }

    /// One status row per pooled account, usage backfilled from the live
    /// credits probe where the stored counter is still zero.
    pub async fn status_snapshot(&self) -> Result<Vec<AccountStatusView>, GatewayError> {
        let refs = self.pool.account_refs();
        Ok(self
            .health
            .snapshot_all(&refs, self.pool.as_ref())
            .await?)
    }

    /// All conversations stored for the api key, newest first, paginated.
    /// Pages start at 1.
    pub async fn histories(
        &self,
        api_key: &str,
        page: usize,
        page_size: usize,
    ) -> Result<Vec<ConversationHistory>, GatewayError> {
        let all = self.history.list_all_for_key(api_key).await?;
        let start = page.saturating_sub(1) * page_size;
        Ok(all.into_iter().skip(start).take(page_size).collect())
    }

    pub async fn delete_histories(
        &self,
        api_key: &str,
        account_slot: usize,
        tier: Tier,
    ) -> Result<(), GatewayError> {
        let key = HistoryKey::new(api_key, account_slot, tier);
        self.history.delete_all(&key).await?;
        Ok(())
    }
}

/// Persists the finished turn and records usage. Runs only after the stream
/// produced at least one non-empty chunk, so an abandoned stream never
/// leaves a dangling assistant turn.
struct ChatCompletionHooks {
    history: Arc<HistoryStore>,
    health: Arc<HealthStore>,
    quota: Arc<dyn QuotaService>,
    key: HistoryKey,
    conversation_id: String,
    model: String,
    user_turn: Message,
    points_cost: u64,
    tier: Tier,
    slot: usize,
    api_key: String,
}

#[async_trait]
impl CompletionHooks for ChatCompletionHooks {
    async fn on_response_complete(&self, text: &str) {
        let turns = vec![self.user_turn.clone(), Message::assistant(text)];
        if let Err(err) = self
            .history
            .append(&self.key, &self.conversation_id, &self.model, turns)
            .await
        {
            warn!(%err, conversation_id = %self.conversation_id, "failed to persist turn");
        }
    }

    async fn on_usage_recorded(&self) {
        self.quota
            .increment_usage(&self.api_key, self.points_cost)
            .await;
        if let Err(err) = self.health.increment_usage(self.tier, self.slot, 1).await {
            warn!(%err, "failed to bump account usage counter");
        }
    }
}
