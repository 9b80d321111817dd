//! The session engine: runs one meeting turn by turn.

use chrono::Utc;
use huddle_config::{AppConfig, SessionConfig};
use huddle_core::error::{Error, ProviderError};
use huddle_core::extraction::{AgendaUpdates, Extractions};
use huddle_core::ids::{IdGenerator, shared_sessions};
use huddle_core::message::ChatMessage;
use huddle_core::provider::{Connection, ProviderRequest, Usage};
use huddle_core::session::{Session, SessionEvent, SessionState, SessionType};
use huddle_core::store::Store;
use huddle_providers::{
    BUILTIN_PROVIDER, Catalog, ChainEntry, ProviderRouter, RoutedReply, build_chain,
};
use huddle_telemetry::{ModelPricing, PricingTable, UsageLedger, format_cost};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::prompt::{assemble_system_prompt, meeting_rules};
use super::state::transition;
use crate::agenda::{AgendaScheduler, CarriedItem, agenda_for};
use crate::context::ContextBuilder;
use crate::extraction::{ReplyParser, TaggedParser};

/// Receives reply text as it streams in.
pub type TextSink = mpsc::UnboundedSender<String>;

/// A meeting in progress: the session plus everything built for it at start.
#[derive(Debug)]
pub struct Meeting {
    pub session: Session,
    /// Rebuilt for every meeting, never persisted
    pub chain: Vec<ChainEntry>,
    pub ledger: UsageLedger,
}

impl Meeting {
    /// Apply a lifecycle event. Returns false when it was a no-op.
    pub fn fire(&mut self, event: SessionEvent) -> bool {
        transition(&mut self.session, event)
    }

    pub fn state(&self) -> SessionState {
        self.session.state
    }
}

/// What one turn produced.
#[derive(Debug, Clone, Serialize)]
pub struct TurnOutcome {
    pub display_text: String,
    pub extractions: Extractions,
    pub agenda_updates: AgendaUpdates,
    pub next_item: Option<String>,
    pub usage: Option<Usage>,
    /// Provider that answered; `None` when the fallback text was used
    pub used_provider: Option<String>,
    pub model: Option<String>,
    pub cost_usd: f64,
    /// The reply is the canned fallback, not model output
    pub used_fallback: bool,
    /// The reply carried a meeting state block with something in it
    pub structured: bool,
}

/// Drives meetings against a store and a provider router.
pub struct SessionEngine {
    store: Arc<dyn Store>,
    router: Arc<ProviderRouter>,
    catalog: Arc<Catalog>,
    pricing: Arc<PricingTable>,
    parser: Arc<dyn ReplyParser>,
    scheduler: AgendaScheduler,
    session_ids: Arc<IdGenerator>,
    context: ContextBuilder,
    settings: SessionConfig,
    enabled: Vec<String>,
    connections: Vec<Connection>,
    telemetry_enabled: bool,
}

impl SessionEngine {
    /// An engine using the built-in provider only and default settings.
    ///
    /// Session ids come from the process-wide generator, so engines sharing
    /// a store never overwrite each other's snapshots.
    pub fn new(store: Arc<dyn Store>, router: Arc<ProviderRouter>) -> Self {
        Self {
            store,
            router,
            catalog: Arc::new(Catalog::builtin()),
            pricing: Arc::new(PricingTable::with_defaults()),
            parser: Arc::new(TaggedParser),
            scheduler: AgendaScheduler::default(),
            session_ids: shared_sessions(),
            context: ContextBuilder::default(),
            settings: SessionConfig::default(),
            enabled: vec![BUILTIN_PROVIDER.to_string()],
            connections: Vec::new(),
            telemetry_enabled: true,
        }
    }

    /// Wire every collaborator from configuration.
    pub fn from_config(config: &AppConfig, store: Arc<dyn Store>) -> Result<Self, Error> {
        let router = ProviderRouter::from_config(config)?;

        let pricing = PricingTable::with_defaults();
        for (model, custom) in &config.telemetry.custom_pricing {
            let price = ModelPricing::try_new(custom.input_per_m, custom.output_per_m).map_err(
                |e| Error::Config {
                    message: format!("telemetry.custom_pricing.{model}: {e}"),
                },
            )?;
            pricing.set(model.clone(), price);
        }

        Ok(Self::new(store, Arc::new(router))
            .with_catalog(Catalog::from_config(config))
            .with_pricing(Arc::new(pricing))
            .with_context(ContextBuilder::from_config(&config.context))
            .with_settings(config.session.clone())
            .with_providers(config.providers.enabled.clone(), config.connections())
            .with_telemetry(config.telemetry.enabled))
    }

    pub fn with_catalog(mut self, catalog: Catalog) -> Self {
        self.catalog = Arc::new(catalog);
        self
    }

    pub fn with_pricing(mut self, pricing: Arc<PricingTable>) -> Self {
        self.pricing = pricing;
        self
    }

    pub fn with_parser(mut self, parser: Arc<dyn ReplyParser>) -> Self {
        self.parser = parser;
        self
    }

    pub fn with_scheduler(mut self, scheduler: AgendaScheduler) -> Self {
        self.scheduler = scheduler;
        self
    }

    /// Use a private session id generator, e.g. one resumed with
    /// [`IdGenerator::starting_at`] past ids already in the store.
    pub fn with_session_ids(mut self, ids: Arc<IdGenerator>) -> Self {
        self.session_ids = ids;
        self
    }

    pub fn with_context(mut self, context: ContextBuilder) -> Self {
        self.context = context;
        self
    }

    pub fn with_settings(mut self, settings: SessionConfig) -> Self {
        self.settings = settings;
        self
    }

    /// Enabled provider ids and the connections available to them.
    pub fn with_providers(mut self, enabled: Vec<String>, connections: Vec<Connection>) -> Self {
        self.enabled = enabled;
        self.connections = connections;
        self
    }

    pub fn with_telemetry(mut self, enabled: bool) -> Self {
        self.telemetry_enabled = enabled;
        self
    }

    pub fn scheduler(&self) -> &AgendaScheduler {
        &self.scheduler
    }

    /// Start a meeting: generate its agenda, build its provider chain, and
    /// move it to OPENING.
    ///
    /// `seed` is the user's first message when they open the conversation
    /// themselves (check-ins use it to pick relevant projects).
    pub async fn start(&self, session_type: SessionType, seed: Option<&str>) -> Meeting {
        let mut session = Session::new(self.session_ids.next(), session_type);

        session.agenda = match agenda_for(
            session_type,
            self.store.as_ref(),
            &self.scheduler,
            seed,
            Utc::now(),
        )
        .await
        {
            Ok(agenda) => agenda,
            Err(e) => {
                warn!(session_id = %session.id, error = %e, "Agenda generation failed, starting empty");
                Vec::new()
            }
        };

        let tier = self.settings.tier_for(session_type);
        let chain = build_chain(&self.catalog, &self.enabled, &self.connections, tier);

        info!(
            session_id = %session.id,
            session_type = %session_type,
            tier = tier.as_str(),
            agenda = session.agenda.len(),
            providers = chain.len(),
            "Meeting started"
        );

        let mut meeting = Meeting {
            session,
            chain,
            ledger: UsageLedger::new(),
        };
        meeting.fire(SessionEvent::AgendaReady);
        meeting
    }

    /// The assistant speaks first.
    pub async fn opening(&self, meeting: &mut Meeting, sink: Option<&TextSink>) -> TurnOutcome {
        self.run_turn(meeting, true, sink).await
    }

    /// Handle one message from the user.
    pub async fn process_user_message(
        &self,
        meeting: &mut Meeting,
        text: &str,
        sink: Option<&TextSink>,
    ) -> TurnOutcome {
        meeting.session.messages.push(ChatMessage::user(text));
        if meeting.session.state == SessionState::Opening {
            meeting.fire(SessionEvent::UserMessage);
        }
        self.run_turn(meeting, false, sink).await
    }

    /// Close the meeting: summarize, carry deferred items over, snapshot.
    ///
    /// `defer_history` holds defers recorded by earlier meetings, keyed by
    /// item content.
    pub async fn close(
        &self,
        meeting: &mut Meeting,
        defer_history: &HashMap<String, u32>,
    ) -> Vec<CarriedItem> {
        meeting.session.summary = Some(AgendaScheduler::session_summary(&meeting.session));
        meeting.fire(SessionEvent::Closed);

        let carried = AgendaScheduler::carry_over_deferred(
            &meeting.session.agenda,
            defer_history,
            self.settings.defer_pattern_threshold,
        );

        info!(
            session_id = %meeting.session.id,
            carried = carried.len(),
            patterns = carried.iter().filter(|c| c.is_pattern).count(),
            cost = %format_cost(meeting.ledger.total_cost()),
            "Meeting closed"
        );

        self.snapshot(&meeting.session).await;
        carried
    }

    async fn run_turn(
        &self,
        meeting: &mut Meeting,
        opening: bool,
        sink: Option<&TextSink>,
    ) -> TurnOutcome {
        let session_type = meeting.session.session_type;

        let context = self.context.build(self.store.as_ref()).await;
        let instructions = self
            .parser
            .format_instructions(session_type == SessionType::Onboarding);
        let system = assemble_system_prompt(
            &self.settings.persona,
            &meeting_rules(session_type, &instructions),
            &context.text,
            &AgendaScheduler::turn_summary(&meeting.session),
        );

        let mut request = ProviderRequest::new(system, meeting.session.messages.clone());
        request.max_tokens = Some(self.settings.max_reply_tokens);
        request.temperature = self.settings.temperature;

        debug!(
            session_id = %meeting.session.id,
            messages = request.messages.len(),
            context_tokens = context.token_estimate,
            "Calling providers"
        );

        let mut used_provider = None;
        let mut model = None;
        let mut usage = None;
        let mut full_text = String::new();

        match self.router.call_with_fallback(&mut meeting.chain, &request).await {
            Ok(mut reply) => {
                info!(
                    session_id = %meeting.session.id,
                    provider = %reply.provider_id,
                    model = %reply.model,
                    "Provider answered"
                );
                let (text, reported, error) = drain(&mut reply, sink).await;
                if let Some(e) = error {
                    warn!(provider = %reply.provider_id, error = %e, "Reply stream failed");
                }
                if !text.is_empty() {
                    full_text = text;
                    usage = reported.map(|mut u| {
                        if u.model.is_empty() {
                            u.model = reply.model.clone();
                        }
                        u
                    });
                    used_provider = Some(reply.provider_id);
                    model = Some(reply.model);
                }
            }
            Err(e) => {
                warn!(session_id = %meeting.session.id, error = %e, "No provider could answer");
            }
        }

        let used_fallback = full_text.is_empty();
        if used_fallback {
            full_text = if opening {
                self.settings.opening_fallback.clone()
            } else {
                self.settings.turn_fallback.clone()
            };
            if let Some(sink) = sink {
                let _ = sink.send(full_text.clone());
            }
        }

        self.persist_refreshed(&mut meeting.chain).await;

        let parsed = self.parser.parse(&full_text);
        meeting
            .session
            .messages
            .push(ChatMessage::assistant(parsed.display_text.clone()));

        let structured = parsed.has_content();
        let added = if structured {
            debug!(
                session_id = %meeting.session.id,
                extractions = parsed.extractions.len(),
                resolves = parsed.agenda_updates.resolves.len(),
                defers = parsed.agenda_updates.defers.len(),
                adds = parsed.agenda_updates.adds.len(),
                "Reply carried meeting state"
            );
            self.scheduler
                .apply_updates(&mut meeting.session.agenda, &parsed.agenda_updates)
        } else {
            0
        };
        if added > 0 {
            meeting.fire(SessionEvent::NewItems);
        }
        meeting.fire(SessionEvent::TurnComplete);

        let cost_usd = match (&usage, &used_provider) {
            (Some(u), Some(provider)) if self.telemetry_enabled => {
                meeting.ledger.record(provider, u, &self.pricing)
            }
            _ => 0.0,
        };

        if self.settings.snapshot_each_turn {
            self.snapshot(&meeting.session).await;
        }

        TurnOutcome {
            display_text: parsed.display_text,
            extractions: parsed.extractions,
            agenda_updates: parsed.agenda_updates,
            next_item: parsed.next_item,
            usage,
            used_provider,
            model,
            cost_usd,
            used_fallback,
            structured,
        }
    }

    /// Write back connections whose token was refreshed during routing.
    async fn persist_refreshed(&self, chain: &mut [ChainEntry]) {
        for entry in chain.iter_mut() {
            let Some(conn) = entry.connection.as_mut().filter(|c| c.refreshed) else {
                continue;
            };
            match self.store.save_connection(conn).await {
                Ok(()) => {
                    conn.refreshed = false;
                    debug!(provider = %conn.provider, "Refreshed connection saved");
                }
                Err(e) => warn!(provider = %conn.provider, error = %e, "Saving refreshed connection failed"),
            }
        }
    }

    async fn snapshot(&self, session: &Session) {
        if let Err(e) = self.store.save_session(session).await {
            warn!(session_id = %session.id, error = %e, "Session snapshot failed");
        }
    }
}

/// Read a reply stream to the end, forwarding text to `sink`.
///
/// Returns the text, the reported usage, and the error that cut the stream
/// short, if any.
async fn drain(
    reply: &mut RoutedReply,
    sink: Option<&TextSink>,
) -> (String, Option<Usage>, Option<ProviderError>) {
    let mut text = String::new();
    let mut usage = None;

    while let Some(item) = reply.recv().await {
        match item {
            Ok(chunk) => {
                if let Some(delta) = chunk.content.filter(|d| !d.is_empty()) {
                    if let Some(sink) = sink {
                        let _ = sink.send(delta.clone());
                    }
                    text.push_str(&delta);
                }
                if chunk.usage.is_some() {
                    usage = chunk.usage;
                }
                if chunk.done {
                    break;
                }
            }
            Err(e) => return (text, usage, Some(e)),
        }
    }

    (text, usage, None)
}
