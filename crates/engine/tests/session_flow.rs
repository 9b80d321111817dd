//! End-to-end meeting flows across the engine, router, store and ledger.
//!
//! Backends are scripted; everything else is the real implementation.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use huddle_core::agenda::{ItemStatus, Priority};
use huddle_core::error::ProviderError;
use huddle_core::extraction::normalize_deadline;
use huddle_core::provider::{Backend, Connection, ProviderRequest, ReplyStream, StreamChunk, Usage};
use huddle_core::session::{SessionState, SessionType};
use huddle_core::store::{MemoryRecord, RecordKind};
use huddle_engine::{ContextBuilder, SessionEngine};
use huddle_memory::InMemoryStore;
use huddle_providers::{Endpoint, ProviderRouter, RefreshedToken, TokenRefresher};

// ── Scripted backend ─────────────────────────────────────────────────────

/// Answers by model id: models in `rate_limited` get a 429, models in
/// `overloaded` open a stream that fails before any text, and everything
/// else gets the next scripted reply.
struct ModelScriptedBackend {
    rate_limited: Vec<&'static str>,
    overloaded: Vec<&'static str>,
    replies: Mutex<VecDeque<&'static str>>,
    seen: Mutex<Vec<ProviderRequest>>,
}

impl ModelScriptedBackend {
    fn new(rate_limited: Vec<&'static str>, replies: Vec<&'static str>) -> Arc<Self> {
        Arc::new(Self {
            rate_limited,
            overloaded: Vec::new(),
            replies: Mutex::new(replies.into()),
            seen: Mutex::new(Vec::new()),
        })
    }

    fn with_overloaded(overloaded: Vec<&'static str>, replies: Vec<&'static str>) -> Arc<Self> {
        Arc::new(Self {
            rate_limited: Vec::new(),
            overloaded,
            replies: Mutex::new(replies.into()),
            seen: Mutex::new(Vec::new()),
        })
    }

    fn seen(&self) -> Vec<ProviderRequest> {
        self.seen.lock().unwrap().clone()
    }
}

#[async_trait]
impl Backend for ModelScriptedBackend {
    fn name(&self) -> &str {
        "model_scripted"
    }

    async fn stream(&self, request: ProviderRequest) -> Result<ReplyStream, ProviderError> {
        let model = request.model.clone();
        self.seen.lock().unwrap().push(request);

        if self.rate_limited.contains(&model.as_str()) {
            return Err(ProviderError::from_status(429, "slow down"));
        }
        if self.overloaded.contains(&model.as_str()) {
            let (tx, rx) = tokio::sync::mpsc::channel(1);
            tx.send(Err(ProviderError::from_status(529, "overloaded_error")))
                .await
                .unwrap();
            return Ok(rx);
        }

        let text = self
            .replies
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| ProviderError::Network("script exhausted".into()))?;

        let (tx, rx) = tokio::sync::mpsc::channel(8);
        // split the reply to exercise incremental forwarding
        let mid = text.len() / 2;
        let split = (0..=mid).rev().find(|i| text.is_char_boundary(*i)).unwrap_or(0);
        tx.send(Ok(StreamChunk::text(&text[..split]))).await.unwrap();
        tx.send(Ok(StreamChunk::text(&text[split..]))).await.unwrap();
        tx.send(Ok(StreamChunk::finished(Some(Usage {
            input_tokens: 1_000_000,
            output_tokens: 0,
            model,
            ..Usage::default()
        }))))
        .await
        .unwrap();
        Ok(rx)
    }
}

struct FixedRefresher;

#[async_trait]
impl TokenRefresher for FixedRefresher {
    async fn refresh(&self, _connection: &Connection) -> Result<RefreshedToken, ProviderError> {
        Ok(RefreshedToken {
            access_token: "fresh-token".into(),
            expires_at: None,
            expires_in: Some(3600),
            refresh_token: None,
        })
    }
}

fn api_keys(providers: &[&str]) -> Vec<Connection> {
    providers
        .iter()
        .map(|p| Connection::api_key(*p, format!("{p}-key")))
        .collect()
}

// ── Flows ────────────────────────────────────────────────────────────────

#[tokio::test]
async fn morning_meeting_end_to_end() {
    let store = InMemoryStore::new();
    store
        .add_record(
            MemoryRecord::new(0, RecordKind::Blocker, "Staging database is down")
                .with_project("atlas"),
        )
        .await;
    store
        .add_record(
            MemoryRecord::new(0, RecordKind::Commitment, "Send pricing page")
                .with_person("Gilbert"),
        )
        .await;

    let backend = ModelScriptedBackend::new(
        vec![],
        vec![
            "Morning. The staging database is still down. Any news?",
            r#"Good, that unblocks atlas. Pricing page to Gilbert next?
<meeting_state>
  <extractions>
    <task deadline="2026-03-12" project="atlas">Verify staging restore</task>
    <decision project="atlas">Keep the current database host</decision>
  </extractions>
  <agenda_updates>
    <resolve id="item-1" resolution="Restored overnight"/>
  </agenda_updates>
  <next_item>item-2</next_item>
</meeting_state>"#,
            r#"Got it. Pricing page to Gilbert by Thursday. Tracked.
<meeting_state>
  <extractions>
    <commitment to="Gilbert" deadline="thursday">Send pricing page</commitment>
  </extractions>
  <agenda_updates>
    <resolve id="item-2" resolution="Thursday"/>
  </agenda_updates>
</meeting_state>"#,
        ],
    );
    let router = ProviderRouter::new().with_backend(Endpoint::Builtin, backend.clone());
    let engine = SessionEngine::new(Arc::new(store.clone()), Arc::new(router));

    let mut meeting = engine.start(SessionType::MorningMeeting, None).await;
    let priorities: Vec<Priority> = meeting.session.agenda.iter().map(|a| a.priority).collect();
    assert_eq!(priorities, vec![Priority::Critical, Priority::High]);

    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    let opening = engine.opening(&mut meeting, Some(&tx)).await;
    assert_eq!(
        opening.display_text,
        "Morning. The staging database is still down. Any news?"
    );
    let mut streamed = String::new();
    while let Ok(piece) = rx.try_recv() {
        streamed.push_str(&piece);
    }
    assert_eq!(streamed, opening.display_text);

    let first = engine
        .process_user_message(&mut meeting, "Ops restored it overnight", None)
        .await;
    assert_eq!(first.display_text, "Good, that unblocks atlas. Pricing page to Gilbert next?");
    assert_eq!(first.extractions.tasks[0].text, "Verify staging restore");
    assert_eq!(
        first.extractions.tasks[0]
            .deadline
            .as_deref()
            .and_then(normalize_deadline)
            .map(|d| d.to_string()),
        Some("2026-03-12".to_string())
    );
    assert_eq!(first.next_item.as_deref(), Some("item-2"));
    assert_eq!(meeting.state(), SessionState::AgendaLoop);

    let second = engine
        .process_user_message(&mut meeting, "Thursday works", None)
        .await;
    // a sloppy deadline stays raw and normalizes to nothing
    let raw = second.extractions.commitments[0].deadline.as_deref();
    assert_eq!(raw, Some("thursday"));
    assert_eq!(raw.and_then(normalize_deadline), None);
    assert_eq!(meeting.state(), SessionState::OpenFloor);

    assert!(meeting.fire(huddle_core::session::SessionEvent::UserDone));
    assert_eq!(meeting.state(), SessionState::Closing);

    let carried = engine.close(&mut meeting, &HashMap::new()).await;
    assert!(carried.is_empty());
    assert_eq!(
        meeting.session.summary.as_deref(),
        Some("2 turns. agenda 2/2 done. 0 pending. topics: Staging database is down; Send pricing page")
    );

    // three turns plus the close
    assert_eq!(store.snapshot_count().await, 4);
    let saved = store.session(&meeting.session.id).await.unwrap();
    assert_eq!(saved.state, SessionState::Closed);
    assert!(saved.messages.iter().all(|m| !m.content.contains("<meeting_state>")));

    assert_eq!(meeting.ledger.calls(), 3);
    assert!((meeting.ledger.total_cost() - 9.0).abs() < 1e-9);

    // the store context reached the model
    let system = backend.seen()[0].system.flat();
    assert!(system.contains("## Current Context"));
    assert!(system.contains("Staging database is down"));
}

#[tokio::test]
async fn rate_limited_provider_falls_back_to_the_next_cheapest() {
    let store = InMemoryStore::new();
    let backend = ModelScriptedBackend::new(vec!["llama-3.3-70b-versatile"], vec!["Hey, what's up?"]);
    let router = ProviderRouter::new().with_backend(Endpoint::OpenAiCompat, backend.clone());
    let engine = SessionEngine::new(Arc::new(store), Arc::new(router))
        .with_providers(vec!["deepseek".into(), "groq".into()], api_keys(&["deepseek", "groq"]));

    let mut meeting = engine.start(SessionType::CheckIn, None).await;
    let order: Vec<&str> = meeting.chain.iter().map(|e| e.provider_id.as_str()).collect();
    assert_eq!(order, vec!["groq", "deepseek"]);

    let outcome = engine.opening(&mut meeting, None).await;
    assert_eq!(outcome.used_provider.as_deref(), Some("deepseek"));
    assert_eq!(outcome.model.as_deref(), Some("deepseek-chat"));
    assert!((outcome.cost_usd - 0.14).abs() < 1e-9);

    let seen = backend.seen();
    assert_eq!(seen.len(), 2);
    assert_eq!(seen[1].credential.as_deref(), Some("deepseek-key"));
    assert_eq!(seen[1].base_url.as_deref(), Some("https://api.deepseek.com"));
    // OpenAI-compatible hosts get the same layers, flattened by the adapter
    assert!(seen[1].system.flat().contains("# Check-In Rules"));
}

#[tokio::test]
async fn overload_inside_the_stream_falls_back_before_any_text() {
    let store = InMemoryStore::new();
    let backend = ModelScriptedBackend::with_overloaded(
        vec!["llama-3.3-70b-versatile"],
        vec!["Morning from deepseek."],
    );
    let router = ProviderRouter::new().with_backend(Endpoint::OpenAiCompat, backend.clone());
    let engine = SessionEngine::new(Arc::new(store), Arc::new(router))
        .with_providers(vec!["groq".into(), "deepseek".into()], api_keys(&["groq", "deepseek"]));

    let mut meeting = engine.start(SessionType::CheckIn, None).await;
    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    let outcome = engine.opening(&mut meeting, Some(&tx)).await;

    let models: Vec<String> = backend.seen().into_iter().map(|r| r.model).collect();
    assert_eq!(models, vec!["llama-3.3-70b-versatile", "deepseek-chat"]);
    assert_eq!(outcome.used_provider.as_deref(), Some("deepseek"));
    assert!(!outcome.used_fallback);
    assert_eq!(outcome.display_text, "Morning from deepseek.");

    let mut streamed = String::new();
    while let Ok(piece) = rx.try_recv() {
        streamed.push_str(&piece);
    }
    assert_eq!(streamed, "Morning from deepseek.");
}

#[tokio::test]
async fn exhausted_chain_completes_the_turn_with_fallback() {
    let store = InMemoryStore::new();
    let backend = ModelScriptedBackend::new(
        vec!["llama-3.3-70b-versatile", "deepseek-chat"],
        vec![],
    );
    let router = ProviderRouter::new().with_backend(Endpoint::OpenAiCompat, backend.clone());
    let engine = SessionEngine::new(Arc::new(store.clone()), Arc::new(router))
        .with_providers(vec!["groq".into(), "deepseek".into()], api_keys(&["groq", "deepseek"]));

    let mut meeting = engine.start(SessionType::CheckIn, None).await;
    engine.opening(&mut meeting, None).await;
    let outcome = engine.process_user_message(&mut meeting, "you there?", None).await;

    assert!(outcome.used_fallback);
    assert!(outcome.display_text.contains("trouble connecting"));
    assert_eq!(backend.seen().len(), 4);
    assert_eq!(meeting.state(), SessionState::OpenFloor);
    assert_eq!(store.snapshot_count().await, 2);
}

#[tokio::test]
async fn refreshed_connections_are_persisted() {
    let store = InMemoryStore::new();
    let backend = ModelScriptedBackend::new(vec![], vec!["Hello!"]);
    let router = ProviderRouter::new()
        .with_backend(Endpoint::OpenAiCompat, backend.clone())
        .with_refresher(Arc::new(FixedRefresher));

    let expired = Connection {
        refresh_token: Some("refresh".into()),
        expires_at: Some(0),
        ..Connection::api_key("gemini", "stale-token")
    };
    let engine = SessionEngine::new(Arc::new(store.clone()), Arc::new(router))
        .with_providers(vec!["gemini".into()], vec![expired]);

    let mut meeting = engine.start(SessionType::CheckIn, None).await;
    engine.opening(&mut meeting, None).await;

    assert_eq!(backend.seen()[0].credential.as_deref(), Some("fresh-token"));
    let saved = store.connection("gemini").await.unwrap();
    assert_eq!(saved.access_token, "fresh-token");
    assert!(!meeting.chain[0].connection.as_ref().unwrap().refreshed);
}

#[tokio::test]
async fn check_in_seeded_by_the_first_message() {
    let store = InMemoryStore::new();
    store
        .add_record(MemoryRecord::new(0, RecordKind::Status, "Beta in review").with_project("Atlas"))
        .await;
    let backend = ModelScriptedBackend::new(vec![], vec!["Atlas is in beta review. What's next?"]);
    let router = ProviderRouter::new().with_backend(Endpoint::Builtin, backend.clone());
    let engine = SessionEngine::new(Arc::new(store), Arc::new(router));

    let message = "Quick one about atlas";
    let mut meeting = engine.start(SessionType::CheckIn, Some(message)).await;
    assert_eq!(meeting.session.agenda.len(), 1);
    assert_eq!(meeting.session.agenda[0].content, "Latest on Atlas: Beta in review");

    engine.process_user_message(&mut meeting, message, None).await;
    assert_eq!(meeting.session.agenda[0].status, ItemStatus::Pending);
    assert_eq!(meeting.state(), SessionState::AgendaLoop);
    assert_eq!(backend.seen()[0].messages.len(), 1);
}

#[tokio::test]
async fn zero_budget_context_keeps_only_tier_one() {
    let store = InMemoryStore::new();
    store
        .add_record(MemoryRecord::new(0, RecordKind::Blocker, "Vendor contract unsigned"))
        .await;
    store
        .add_record(MemoryRecord::new(0, RecordKind::Idea, "Podcast about planning"))
        .await;
    let backend = ModelScriptedBackend::new(vec![], vec!["Morning."]);
    let router = ProviderRouter::new().with_backend(Endpoint::Builtin, backend.clone());
    let engine = SessionEngine::new(Arc::new(store), Arc::new(router))
        .with_context(ContextBuilder::new(0));

    let mut meeting = engine.start(SessionType::Strategic, None).await;
    engine.opening(&mut meeting, None).await;

    let system = backend.seen()[0].system.flat();
    assert!(system.contains("Vendor contract unsigned"));
    assert!(!system.contains("Podcast about planning"));
}
