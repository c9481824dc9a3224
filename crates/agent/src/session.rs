//! Session management and the `handle_query` entry point.
//!
//! Each session owns its [`ConversationMemory`]. Queries within one session
//! are serialized by a per-session lock; different sessions run
//! concurrently and share only the read-only capability registry. Sessions
//! idle longer than the configured timeout are dropped on the next lookup.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use backpacker_config::AppConfig;
use backpacker_core::answer::FinalAnswer;
use backpacker_core::error::{ProviderError, Result};
use backpacker_core::event::{DomainEvent, EventBus};
use backpacker_core::message::{Query, SessionId, Turn};
use backpacker_providers::build_from_config;
use backpacker_tools::{Passage, RetrievalService, default_toolbox};
use chrono::{Local, Utc};
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::context::ConversationMemory;
use crate::loop_runner::{LoopContext, LoopSettings, ReasoningLoop};
use crate::step::TraceStep;

const EMPTY_QUERY_ANSWER: &str =
    "Ask me anything about your trip: places to see, the weather, or what it might cost.";

const PREVIEW_CHARS: usize = 80;

#[derive(Debug)]
struct Session {
    memory: ConversationMemory,
    last_trace: Option<Vec<TraceStep>>,
}

struct SessionSlot {
    session: Arc<Mutex<Session>>,
    last_used: Instant,
}

/// Memory retention bounds applied to every new session.
#[derive(Debug, Clone, Copy)]
pub struct MemoryLimits {
    pub max_turns: usize,
    pub max_tokens: usize,
}

impl Default for MemoryLimits {
    fn default() -> Self {
        Self {
            max_turns: 20,
            max_tokens: 3000,
        }
    }
}

/// The travel assistant: routes each query through the reasoning loop and
/// remembers the exchange in the caller's session.
pub struct Assistant {
    reasoning: ReasoningLoop,
    retrieval: Option<RetrievalService>,
    prompt_hints: usize,
    limits: MemoryLimits,
    retain_traces: bool,
    idle_timeout: Option<Duration>,
    sessions: Mutex<HashMap<SessionId, SessionSlot>>,
    event_bus: Arc<EventBus>,
}

impl Assistant {
    pub fn new(reasoning: ReasoningLoop) -> Self {
        Self {
            reasoning,
            retrieval: None,
            prompt_hints: 0,
            limits: MemoryLimits::default(),
            retain_traces: false,
            idle_timeout: None,
            sessions: Mutex::new(HashMap::new()),
            event_bus: Arc::new(EventBus::default()),
        }
    }

    /// Inject the top `hints` guide passages into every prompt.
    pub fn with_retrieval(mut self, retrieval: RetrievalService, hints: usize) -> Self {
        self.retrieval = Some(retrieval);
        self.prompt_hints = hints;
        self
    }

    pub fn with_memory_limits(mut self, limits: MemoryLimits) -> Self {
        self.limits = limits;
        self
    }

    pub fn with_retained_traces(mut self, retain: bool) -> Self {
        self.retain_traces = retain;
        self
    }

    /// Forget sessions not used for `timeout`. `None` keeps them forever.
    pub fn with_idle_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.idle_timeout = timeout;
        self
    }

    /// Share an event bus with the reasoning loop.
    pub fn with_event_bus(mut self, event_bus: Arc<EventBus>) -> Self {
        self.reasoning = self.reasoning.with_event_bus(event_bus.clone());
        self.event_bus = event_bus;
        self
    }

    /// Apply the `[memory]` and `[agent]` session settings.
    pub fn configured(self, config: &AppConfig) -> Self {
        self.with_memory_limits(MemoryLimits {
            max_turns: config.memory.max_turns,
            max_tokens: config.memory.max_tokens,
        })
        .with_retained_traces(config.agent.retain_traces)
        .with_idle_timeout(
            (config.memory.session_idle_secs > 0)
                .then(|| Duration::from_secs(config.memory.session_idle_secs)),
        )
    }

    /// Wire the configured provider and the built-in capabilities together.
    pub fn from_config(config: &AppConfig) -> Result<Self> {
        let router = build_from_config(config)?;
        let (provider, model) = router.resolve(&config.default_model).ok_or_else(|| {
            ProviderError::NotConfigured(format!(
                "no provider registered for model '{}'",
                config.default_model
            ))
        })?;
        let toolbox = default_toolbox(config)?;
        info!(
            model = %model,
            capabilities = toolbox.registry.len(),
            "Assistant ready"
        );

        let reasoning = ReasoningLoop::new(
            provider,
            model,
            Arc::new(toolbox.registry),
            LoopSettings::from_config(config),
        );
        Ok(Self::new(reasoning)
            .with_retrieval(toolbox.retrieval, config.retrieval.prompt_hints)
            .configured(config))
    }

    pub fn event_bus(&self) -> &Arc<EventBus> {
        &self.event_bus
    }

    pub fn reasoning(&self) -> &ReasoningLoop {
        &self.reasoning
    }

    async fn session(&self, id: &SessionId) -> Arc<Mutex<Session>> {
        let now = Instant::now();
        let mut sessions = self.sessions.lock().await;
        if let Some(timeout) = self.idle_timeout {
            evict_idle(&mut sessions, now, timeout);
        }

        let slot = sessions.entry(id.clone()).or_insert_with(|| {
            debug!(session = %id, "New session");
            SessionSlot {
                session: Arc::new(Mutex::new(Session {
                    memory: ConversationMemory::new(self.limits.max_turns, self.limits.max_tokens),
                    last_trace: None,
                })),
                last_used: now,
            }
        });
        slot.last_used = now;
        slot.session.clone()
    }

    async fn existing(&self, id: &SessionId) -> Option<Arc<Mutex<Session>>> {
        let sessions = self.sessions.lock().await;
        sessions.get(id).map(|slot| slot.session.clone())
    }

    /// Number of sessions currently held in memory.
    pub async fn session_count(&self) -> usize {
        self.sessions.lock().await.len()
    }

    async fn hints(&self, query: &str) -> Vec<Passage> {
        let Some(retrieval) = &self.retrieval else {
            return Vec::new();
        };
        if self.prompt_hints == 0 {
            return Vec::new();
        }
        match retrieval.search(query, self.prompt_hints).await {
            Ok(passages) => passages,
            Err(e) => {
                warn!(error = %e, "Guide excerpts unavailable for this prompt");
                Vec::new()
            }
        }
    }

    /// Answer one query in the given session.
    ///
    /// Always returns an answer. The exchange is appended to the session's
    /// memory only after the answer is produced.
    pub async fn handle_query(&self, session_id: &SessionId, text: &str) -> FinalAnswer {
        let query = Query::new(session_id.clone(), text.trim());
        if query.text().is_empty() {
            return FinalAnswer::new(EMPTY_QUERY_ANSWER, Vec::new());
        }

        let session = self.session(session_id).await;
        let mut session = session.lock().await;

        self.event_bus.publish(DomainEvent::QueryReceived {
            session_id: session_id.to_string(),
            content_preview: query.text().chars().take(PREVIEW_CHARS).collect(),
            timestamp: query.received_at(),
        });
        info!(session = %session_id, history = session.memory.len(), "Query received");

        let history = session.memory.window();
        let hints = self.hints(query.text()).await;
        let outcome = self
            .reasoning
            .run(&LoopContext {
                session_id: query.session_id(),
                query: query.text(),
                history: &history,
                hints: &hints,
                today: Local::now().date_naive(),
            })
            .await;

        session.memory.append(Turn::user(query.text()));
        session.memory.append(Turn::assistant(outcome.answer.text.clone()));
        session.last_trace = self.retain_traces.then(|| outcome.trace.clone());

        self.event_bus.publish(DomainEvent::AnswerProduced {
            session_id: session_id.to_string(),
            steps: outcome.trace.len(),
            degraded: outcome.answer.degraded,
            timestamp: Utc::now(),
        });
        outcome.answer
    }

    /// Forget a session's conversation. Returns `false` if it never existed.
    pub async fn reset_session(&self, session_id: &SessionId) -> bool {
        let session = self.existing(session_id).await;
        match session {
            Some(session) => {
                let mut session = session.lock().await;
                session.memory.clear();
                session.last_trace = None;
                info!(session = %session_id, "Session reset");
                true
            }
            None => false,
        }
    }

    /// The current memory window of a session.
    pub async fn history(&self, session_id: &SessionId) -> Vec<Turn> {
        let session = self.existing(session_id).await;
        match session {
            Some(session) => session.lock().await.memory.window(),
            None => Vec::new(),
        }
    }

    /// The trace of the session's last query, when traces are retained.
    pub async fn last_trace(&self, session_id: &SessionId) -> Option<Vec<TraceStep>> {
        let session = self.existing(session_id).await?;
        let session = session.lock().await;
        session.last_trace.clone()
    }
}

/// Drop sessions idle for at least `timeout`. A session with a query in
/// flight is still referenced by its handler and is kept.
fn evict_idle(sessions: &mut HashMap<SessionId, SessionSlot>, now: Instant, timeout: Duration) {
    let before = sessions.len();
    sessions.retain(|_, slot| {
        Arc::strong_count(&slot.session) > 1 || now.duration_since(slot.last_used) < timeout
    });
    let evicted = before - sessions.len();
    if evicted > 0 {
        debug!(evicted, remaining = sessions.len(), "Evicted idle sessions");
    }
}
