mod support;

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::{Duration, SystemTime};

use futures_util::StreamExt;

use poolgate_account::AccountPool;
use poolgate_common::{
    GatewayConfig, ModelTable, SONNET_MODEL, Tier, messages,
};
use poolgate_core::{ChatGateway, ChatRequest, select};
use poolgate_store::{AccountStatus, HealthStore, HistoryStore, MemoryStore, SharedKeyValue};

use support::{MapCredentialStore, MockUpstream, RecordedCall, StaticQuota};

struct Harness {
    gateway: ChatGateway,
    pool: Arc<AccountPool>,
    health: Arc<HealthStore>,
    history: Arc<HistoryStore>,
    quota: Arc<StaticQuota>,
    calls: Arc<tokio::sync::Mutex<Vec<RecordedCall>>>,
}

async fn harness(chunks: &[&str], basic: usize, plus: usize, exceeded: bool) -> Harness {
    let upstream = Arc::new(MockUpstream::new(chunks));
    let calls = upstream.calls.clone();
    let credentials = Arc::new(MapCredentialStore::with_accounts(basic, plus));
    let pool = Arc::new(AccountPool::new(
        upstream,
        credentials,
        Duration::from_millis(1),
        1,
        15,
    ));
    pool.load().await;

    let kv: SharedKeyValue = Arc::new(MemoryStore::new());
    let health = Arc::new(HealthStore::new(kv.clone(), Duration::ZERO));
    let history = Arc::new(HistoryStore::new(kv));
    let quota = Arc::new(StaticQuota::new(exceeded));
    let config = GatewayConfig {
        stream_retry_delay: Duration::from_millis(1),
        ..GatewayConfig::default()
    };
    let gateway = ChatGateway::new(
        pool.clone(),
        health.clone(),
        history.clone(),
        quota.clone(),
        Arc::new(ModelTable::builtin()),
        config,
    );
    Harness {
        gateway,
        pool,
        health,
        history,
        quota,
        calls,
    }
}

fn request(prompt: &str, conversation_id: Option<String>) -> ChatRequest {
    ChatRequest {
        prompt: prompt.to_string(),
        conversation_id,
        model: SONNET_MODEL.to_string(),
        tier: Tier::Basic,
        account_slot: 0,
        attachments: Vec::new(),
        api_key: "key-1".to_string(),
    }
}

async fn drain(gateway: &ChatGateway, request: ChatRequest) -> (String, String) {
    let stream = gateway.chat(request).await.unwrap();
    let conversation_id = stream.conversation_id.clone();
    let chunks: Vec<String> = stream.chunks.collect().await;
    // Let the spawned producer finish its completion hooks.
    tokio::time::sleep(Duration::from_millis(20)).await;
    (conversation_id, chunks.concat())
}

#[tokio::test]
async fn chat_streams_persists_and_charges() {
    let h = harness(&["Hi", "Hi there", "Hi there!"], 1, 0, false).await;

    let (conversation_id, text) = drain(&h.gateway, request("hello", None)).await;
    assert_eq!(text, "Hi there!");

    let histories = h.history.list_all_for_key("key-1").await.unwrap();
    assert_eq!(histories.len(), 1);
    let history = &histories[0];
    assert_eq!(history.conversation_id, conversation_id);
    assert_eq!(history.model, SONNET_MODEL);
    assert_eq!(history.messages.len(), 2);
    assert_eq!(history.messages[0].content, "hello");
    assert_eq!(history.messages[1].content, "Hi there!");

    // Sonnet costs 300 points; the account usage counter moves by one call.
    assert_eq!(h.quota.recorded.load(Ordering::SeqCst), 300);
    assert_eq!(h.health.get_usage(Tier::Basic, 0).await.unwrap(), 101);
}

#[tokio::test]
async fn follow_up_turn_carries_the_transcript() {
    let h = harness(&["Hi there!"], 1, 0, false).await;

    let (conversation_id, _) = drain(&h.gateway, request("hello", None)).await;
    let (_, text) = drain(&h.gateway, request("and then?", Some(conversation_id))).await;
    assert_eq!(text, "Hi there!");

    let calls = h.calls.lock().await;
    let last = calls.last().unwrap();
    assert_eq!(
        last.text,
        "user: hello\nassistant: Hi there!\nuser: and then?"
    );
    assert_eq!(last.model, SONNET_MODEL);
}

#[tokio::test]
async fn attachments_reach_the_upstream_and_the_log() {
    let h = harness(&["done"], 1, 0, false).await;

    let mut req = request("look at this", None);
    req.attachments = vec!["shot.png".to_string()];
    drain(&h.gateway, req).await;

    let calls = h.calls.lock().await;
    assert_eq!(calls.last().unwrap().attachments, vec!["shot.png"]);
    let histories = h.history.list_all_for_key("key-1").await.unwrap();
    assert_eq!(
        histories[0].messages[0].attachment_paths,
        Some(vec!["shot.png".to_string()])
    );
}

#[tokio::test]
async fn exceeded_quota_short_circuits() {
    let h = harness(&["never"], 1, 0, true).await;

    let (_, text) = drain(&h.gateway, request("hello", None)).await;
    assert_eq!(text, messages::EXCEED_LIMIT);
    assert!(h.calls.lock().await.is_empty());
    assert!(h.history.list_all_for_key("key-1").await.unwrap().is_empty());
}

#[tokio::test]
async fn empty_prompt_is_refused_in_band() {
    let h = harness(&["never"], 1, 0, false).await;
    let (_, text) = drain(&h.gateway, request("", None)).await;
    assert_eq!(text, messages::NO_EMPTY_PROMPT);
    assert!(h.calls.lock().await.is_empty());
}

#[tokio::test]
async fn unknown_model_is_reported_as_text() {
    let h = harness(&["never"], 1, 0, false).await;
    let mut req = request("hello", None);
    req.model = "gpt-9".to_string();
    let (_, text) = drain(&h.gateway, req).await;
    assert_eq!(text, "Unknown model: gpt-9");
}

#[tokio::test]
async fn empty_tier_reports_no_available_accounts() {
    let h = harness(&["never"], 1, 0, false).await;
    let mut req = request("hello", None);
    req.tier = Tier::Plus;
    let (_, text) = drain(&h.gateway, req).await;
    assert_eq!(text, messages::NO_AVAILABLE_ACCOUNTS);
}

#[tokio::test]
async fn histories_paginate_newest_first_and_delete_wipes() {
    let h = harness(&["ok"], 1, 0, false).await;

    for prompt in ["one", "two", "three"] {
        drain(&h.gateway, request(prompt, None)).await;
    }

    let first_page = h.gateway.histories("key-1", 1, 2).await.unwrap();
    assert_eq!(first_page.len(), 2);
    let second_page = h.gateway.histories("key-1", 2, 2).await.unwrap();
    assert_eq!(second_page.len(), 1);

    h.gateway
        .delete_histories("key-1", 0, Tier::Basic)
        .await
        .unwrap();
    assert!(h.gateway.histories("key-1", 1, 10).await.unwrap().is_empty());
}

#[tokio::test]
async fn cooled_down_account_rejoins_rotation() {
    let h = harness(&["ok"], 2, 1, false).await;

    let snapshot = h.gateway.status_snapshot().await.unwrap();
    assert_eq!(snapshot.len(), 3);
    assert!(snapshot.iter().any(|view| view.tier == "plus"));
    assert_eq!(
        snapshot.iter().filter(|view| view.tier == "normal").count(),
        2
    );

    // Put one basic account into a cooldown whose window already elapsed.
    let past = SystemTime::now() - Duration::from_secs(10);
    h.health
        .mark_limited(Tier::Basic, 0, SONNET_MODEL, past)
        .await
        .unwrap();
    let snapshot = h.gateway.status_snapshot().await.unwrap();
    let cooled = snapshot
        .iter()
        .find(|view| view.tier == "normal" && view.idx == 0)
        .unwrap();
    assert_eq!(cooled.status, AccountStatus::Cd);

    // Both basic accounts still receive traffic from the balancer.
    let mut seen = HashSet::new();
    for _ in 0..1_000 {
        seen.insert(select(Tier::Basic, &snapshot).unwrap());
    }
    assert_eq!(seen, HashSet::from([0, 1]));

    assert!(h.health.try_reactivate(Tier::Basic, 0).await.unwrap());
    assert_eq!(
        h.health.status(Tier::Basic, 0).await.unwrap(),
        Some(AccountStatus::Active)
    );
    assert_eq!(h.health.get_usage(Tier::Basic, 0).await.unwrap(), 0);

    // The account still exists in the pool after rejoining.
    assert!(h.pool.get(Tier::Basic, 0).is_some());
}
