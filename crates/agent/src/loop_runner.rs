//! The reasoning loop: a bounded think-act-observe state machine.
//!
//! ```text
//! AWAITING_STEP ──step──▶ EXECUTING_ACTION ──observation──▶ AWAITING_STEP
//!      │                                                        …
//!      ├─ final answer ───────────────────────────▶ DONE
//!      ├─ step / time budget spent ───────────────▶ DONE (best effort)
//!      └─ second consecutive parse failure,
//!         or the model is unreachable ────────────▶ ABORTED (fallback answer)
//! ```
//!
//! Both terminal states yield exactly one [`FinalAnswer`] and one trace.
//! Every invocation step has its observation recorded before the loop
//! asks for the next step, and the trace never exceeds `max_steps`.

use std::sync::Arc;
use std::time::Duration;

use backpacker_config::AppConfig;
use backpacker_core::answer::{Degradation, FinalAnswer};
use backpacker_core::capability::{CapabilityRegistry, Observation};
use backpacker_core::error::{ParseError, RegistryError};
use backpacker_core::event::{DomainEvent, EventBus};
use backpacker_core::message::{Message, SessionId, Turn};
use backpacker_core::provider::{Provider, ProviderRequest};
use backpacker_tools::Passage;
use chrono::{NaiveDate, Utc};
use serde::Serialize;
use serde_json::{Value, json};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::context::token;
use crate::context::{Correction, PromptAssembler, PromptInput};
use crate::sanitizer;
use crate::step::{ReasoningStep, StepAction, TraceStep};

/// Shown when the loop aborts.
const FALLBACK_ANSWER: &str = "Sorry, I couldn't work out an answer to that just now. \
Please try asking again, perhaps with a little more detail.";

const NOTHING_FOUND: &str = "I couldn't gather enough information to answer that.";

/// Answers shorter than this trigger the web-search fallback.
const MIN_ANSWER_CHARS: usize = 10;

const FALLBACK_CAPABILITY: &str = "web_search";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LoopState {
    AwaitingStep,
    ExecutingAction,
    Done,
    Aborted,
}

/// Tunables for one loop, usually taken from `[agent]`.
#[derive(Debug, Clone)]
pub struct LoopSettings {
    pub max_steps: usize,
    pub max_duration: Duration,
    pub native_tool_calls: bool,
    pub search_fallback: bool,
    pub temperature: f32,
    pub max_tokens: Option<u32>,
}

impl Default for LoopSettings {
    fn default() -> Self {
        Self {
            max_steps: 6,
            max_duration: Duration::from_secs(90),
            native_tool_calls: false,
            search_fallback: true,
            temperature: 0.2,
            max_tokens: Some(1024),
        }
    }
}

impl LoopSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            max_steps: config.agent.max_steps,
            max_duration: Duration::from_secs(config.agent.max_duration_secs),
            native_tool_calls: config.agent.native_tool_calls,
            search_fallback: config.agent.search_fallback,
            temperature: config.default_temperature,
            max_tokens: Some(config.default_max_tokens),
        }
    }
}

/// Per-query inputs.
pub struct LoopContext<'a> {
    pub session_id: &'a SessionId,
    pub query: &'a str,
    pub history: &'a [Turn],
    pub hints: &'a [Passage],
    pub today: NaiveDate,
}

/// The result of one loop run.
#[derive(Debug, Clone)]
pub struct LoopOutcome {
    pub answer: FinalAnswer,
    pub trace: Vec<TraceStep>,
    /// `Done` or `Aborted`.
    pub terminal: LoopState,
    /// Total replies that failed to parse, recovered or not.
    pub parse_failures: usize,
}

/// Transitions carry the data the next state needs.
enum Transition {
    AwaitingStep,
    ExecutingAction(ReasoningStep),
    Done(Completion),
    Aborted(Degradation),
}

enum Completion {
    Answer(String),
    OutOfBudget(Degradation),
}

#[derive(Default)]
struct RunState {
    trace: Vec<TraceStep>,
    correction: Option<Correction>,
    consecutive_failures: usize,
    parse_failures: usize,
}

pub struct ReasoningLoop {
    provider: Arc<dyn Provider>,
    model: String,
    registry: Arc<CapabilityRegistry>,
    prompt: PromptAssembler,
    settings: LoopSettings,
    event_bus: Arc<EventBus>,
}

impl ReasoningLoop {
    pub fn new(
        provider: Arc<dyn Provider>,
        model: impl Into<String>,
        registry: Arc<CapabilityRegistry>,
        settings: LoopSettings,
    ) -> Self {
        let prompt = PromptAssembler::new(registry.describe_all(), settings.native_tool_calls);
        Self {
            provider,
            model: model.into(),
            registry,
            prompt,
            settings,
            event_bus: Arc::new(EventBus::default()),
        }
    }

    pub fn with_event_bus(mut self, event_bus: Arc<EventBus>) -> Self {
        self.event_bus = event_bus;
        self
    }

    pub fn settings(&self) -> &LoopSettings {
        &self.settings
    }

    pub fn registry(&self) -> &Arc<CapabilityRegistry> {
        &self.registry
    }

    /// Run the loop to a terminal state. Never fails: every error path ends
    /// in a (possibly degraded) answer.
    pub async fn run(&self, ctx: &LoopContext<'_>) -> LoopOutcome {
        let deadline = Instant::now() + self.settings.max_duration;
        let mut run = RunState::default();
        let mut transition = Transition::AwaitingStep;

        info!(
            session = %ctx.session_id,
            model = %self.model,
            max_steps = self.settings.max_steps,
            "Reasoning loop starting"
        );

        loop {
            transition = match transition {
                Transition::AwaitingStep => self.await_step(ctx, &mut run, deadline).await,
                Transition::ExecutingAction(step) => {
                    self.execute(ctx, &mut run, step).await;
                    Transition::AwaitingStep
                }
                Transition::Done(completion) => {
                    return self.finish_done(ctx, run, completion).await;
                }
                Transition::Aborted(reason) => return self.finish_aborted(ctx, run, reason),
            };
            debug!(
                session = %ctx.session_id,
                state = ?transition.state(),
                steps = run.trace.len(),
                "Loop transition"
            );
        }
    }

    async fn await_step(
        &self,
        ctx: &LoopContext<'_>,
        run: &mut RunState,
        deadline: Instant,
    ) -> Transition {
        if run.trace.len() >= self.settings.max_steps {
            warn!(
                session = %ctx.session_id,
                max_steps = self.settings.max_steps,
                "Step limit reached"
            );
            return Transition::Done(Completion::OutOfBudget(Degradation::StepLimit));
        }
        if Instant::now() >= deadline {
            warn!(session = %ctx.session_id, "Time budget spent");
            return Transition::Done(Completion::OutOfBudget(Degradation::TimeLimit));
        }

        let request = self.build_request(ctx, run);
        let completion = tokio::time::timeout_at(deadline, self.provider.complete(request));
        let response = match completion.await {
            Err(_) => {
                warn!(session = %ctx.session_id, "Time budget spent waiting for the model");
                return Transition::Done(Completion::OutOfBudget(Degradation::TimeLimit));
            }
            Ok(Err(e)) => {
                warn!(
                    session = %ctx.session_id,
                    provider = self.provider.name(),
                    error = %e,
                    "Model unavailable"
                );
                return Transition::Aborted(Degradation::ModelUnavailable);
            }
            Ok(Ok(response)) => response,
        };

        match self.parse(&response.message) {
            Ok(step) => {
                run.consecutive_failures = 0;
                run.correction = None;
                debug!(
                    session = %ctx.session_id,
                    action = step.action_name(),
                    thought = %step.thought,
                    "Reasoning step"
                );
                match step.action {
                    StepAction::Final { answer } => Transition::Done(Completion::Answer(answer)),
                    StepAction::Invoke { .. } => Transition::ExecutingAction(step),
                }
            }
            Err(error) => {
                run.parse_failures += 1;
                run.consecutive_failures += 1;
                warn!(
                    session = %ctx.session_id,
                    error = %error,
                    consecutive = run.consecutive_failures,
                    "Could not parse model output"
                );
                self.event_bus.publish(DomainEvent::ParseFailed {
                    session_id: ctx.session_id.to_string(),
                    error_message: error.to_string(),
                    timestamp: Utc::now(),
                });
                if run.consecutive_failures >= 2 {
                    return Transition::Aborted(Degradation::MalformedOutput);
                }
                run.correction = Some(Correction {
                    raw_output: response.message.content,
                    error,
                });
                Transition::AwaitingStep
            }
        }
    }

    fn build_request(&self, ctx: &LoopContext<'_>, run: &RunState) -> ProviderRequest {
        let messages = self.prompt.assemble(&PromptInput {
            query: ctx.query,
            today: ctx.today,
            history: ctx.history,
            hints: ctx.hints,
            scratchpad: &run.trace,
            correction: run.correction.as_ref(),
        });
        debug!(
            session = %ctx.session_id,
            step = run.trace.len() + 1,
            prompt_tokens = token::estimate_messages_tokens(&messages),
            "Requesting reasoning step"
        );

        let mut request = ProviderRequest::new(self.model.clone(), messages);
        request.temperature = self.settings.temperature;
        request.max_tokens = self.settings.max_tokens;
        if self.settings.native_tool_calls {
            request.tools = self.prompt.tool_definitions();
        } else {
            request.stop = vec!["\nObservation:".into()];
        }
        request
    }

    fn parse(&self, message: &Message) -> Result<ReasoningStep, ParseError> {
        if !self.settings.native_tool_calls {
            return ReasoningStep::parse(&message.content);
        }
        if let Some(call) = message.tool_calls.first() {
            if message.tool_calls.len() > 1 {
                debug!(
                    calls = message.tool_calls.len(),
                    "Only the first tool call is executed per step"
                );
            }
            return ReasoningStep::from_tool_call(&message.content, call);
        }
        // Without a tool call, a plain reply is the answer.
        match ReasoningStep::parse(&message.content) {
            Err(ParseError::MissingAction) if !message.content.trim().is_empty() => {
                Ok(ReasoningStep {
                    thought: String::new(),
                    action: StepAction::Final {
                        answer: message.content.trim().to_string(),
                    },
                })
            }
            other => other,
        }
    }

    /// Dispatch one invocation and record its observation.
    async fn execute(&self, ctx: &LoopContext<'_>, run: &mut RunState, step: ReasoningStep) {
        let StepAction::Invoke {
            capability, input, ..
        } = &step.action
        else {
            return;
        };

        let start = Instant::now();
        let observation = self.dispatch(capability, input.clone()).await;
        let duration_ms = start.elapsed().as_millis() as u64;

        info!(
            session = %ctx.session_id,
            step = run.trace.len() + 1,
            capability = %capability,
            success = observation.success,
            duration_ms,
            "Capability step"
        );
        self.event_bus.publish(DomainEvent::CapabilityInvoked {
            session_id: ctx.session_id.to_string(),
            capability: capability.clone(),
            success: observation.success,
            duration_ms,
            timestamp: Utc::now(),
        });

        run.trace.push(TraceStep { step, observation });
    }

    /// Registry errors the model caused become corrective observations.
    async fn dispatch(&self, capability: &str, input: Value) -> Observation {
        match self.registry.invoke(capability, input).await {
            Ok(observation) => observation,
            Err(RegistryError::UnknownCapability(name)) => Observation::failure(
                name.clone(),
                format!(
                    "there is no capability named '{name}'. Use one of: {}",
                    self.registry.names().join(", ")
                ),
            ),
            Err(RegistryError::InputValidation { capability, reason }) => {
                let expected = self
                    .registry
                    .describe_all()
                    .into_iter()
                    .find(|d| d.name == capability)
                    .map(|d| d.input_schema.signature())
                    .unwrap_or_default();
                Observation::failure(
                    capability,
                    format!("invalid input: {reason}. Expected parameters: ({expected})"),
                )
            }
            Err(other) => Observation::failure(capability, other.to_string()),
        }
    }

    async fn finish_done(
        &self,
        ctx: &LoopContext<'_>,
        mut run: RunState,
        completion: Completion,
    ) -> LoopOutcome {
        let (text, degraded) = match completion {
            Completion::Answer(answer) if self.wants_search_fallback(&answer, &run) => {
                info!(session = %ctx.session_id, "Answer too short, falling back to web search");
                let step = ReasoningStep {
                    thought: "The answer is empty, so search the web for the question.".into(),
                    action: StepAction::Invoke {
                        capability: FALLBACK_CAPABILITY.into(),
                        input: json!({ "query": ctx.query }),
                        call_id: None,
                    },
                };
                self.execute(ctx, &mut run, step).await;
                let text = match run.trace.last() {
                    Some(entry) if entry.observation.success => entry.observation.content.clone(),
                    _ if !answer.trim().is_empty() => answer,
                    _ => NOTHING_FOUND.to_string(),
                };
                (text, Some(Degradation::SearchFallback))
            }
            Completion::Answer(answer) => (answer, None),
            Completion::OutOfBudget(reason) => (best_effort(&run.trace), Some(reason)),
        };

        let text = match degraded {
            Some(reason) => format!("{}\n\n{text}", reason.notice()),
            None => text,
        };
        let observed: Vec<String> = run
            .trace
            .iter()
            .filter(|t| t.observation.success)
            .flat_map(|t| t.observation.sources.iter().cloned())
            .collect();
        let (text, sources) = sanitizer::sanitize_with_sources(&text, &observed);

        let answer = FinalAnswer {
            text,
            sources,
            degraded,
        };
        self.outcome(ctx, run, answer, LoopState::Done)
    }

    fn finish_aborted(
        &self,
        ctx: &LoopContext<'_>,
        run: RunState,
        reason: Degradation,
    ) -> LoopOutcome {
        let text = format!("{}\n\n{FALLBACK_ANSWER}", reason.notice());
        let answer = FinalAnswer::degraded(text, Vec::new(), reason);
        self.outcome(ctx, run, answer, LoopState::Aborted)
    }

    fn outcome(
        &self,
        ctx: &LoopContext<'_>,
        run: RunState,
        answer: FinalAnswer,
        terminal: LoopState,
    ) -> LoopOutcome {
        info!(
            session = %ctx.session_id,
            state = ?terminal,
            steps = run.trace.len(),
            parse_failures = run.parse_failures,
            degraded = ?answer.degraded,
            "Reasoning loop finished"
        );
        LoopOutcome {
            answer,
            trace: run.trace,
            terminal,
            parse_failures: run.parse_failures,
        }
    }

    fn wants_search_fallback(&self, answer: &str, run: &RunState) -> bool {
        self.settings.search_fallback
            && answer.trim().chars().count() < MIN_ANSWER_CHARS
            && run.trace.len() < self.settings.max_steps
            && self.registry.contains(FALLBACK_CAPABILITY)
    }
}

impl Transition {
    fn state(&self) -> LoopState {
        match self {
            Transition::AwaitingStep => LoopState::AwaitingStep,
            Transition::ExecutingAction(_) => LoopState::ExecutingAction,
            Transition::Done(_) => LoopState::Done,
            Transition::Aborted(_) => LoopState::Aborted,
        }
    }
}

/// Summarize what the trace found when the loop runs out of budget.
fn best_effort(trace: &[TraceStep]) -> String {
    let mut findings: Vec<&str> = Vec::new();
    for entry in trace.iter().filter(|t| t.observation.success) {
        if !findings.contains(&entry.observation.content.as_str()) {
            findings.push(&entry.observation.content);
        }
    }
    if findings.is_empty() {
        NOTHING_FOUND.to_string()
    } else {
        format!("Here is what I found so far:\n\n{}", findings.join("\n\n"))
    }
}
