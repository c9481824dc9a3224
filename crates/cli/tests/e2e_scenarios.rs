//! End-to-end scenarios for the Backpacker assistant.
//!
//! Each test drives `Assistant::handle_query` with a scripted model and the
//! real capabilities wired to in-process weather and guide sources, so the
//! whole path from query to sanitized answer runs without network access.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use backpacker_agent::{Assistant, LoopSettings, ReasoningLoop, StepAction, TraceStep};
use backpacker_config::BudgetConfig;
use backpacker_core::capability::CapabilityRegistry;
use backpacker_core::error::{CapabilityError, ProviderError};
use backpacker_core::message::{Message, Role, SessionId};
use backpacker_core::provider::{Provider, ProviderRequest, ProviderResponse, Usage};
use backpacker_tools::weather::{
    CurrentConditionsSource, CurrentReading, DailyForecast, ForecastSource, GeoPoint, Geocoder,
};
use backpacker_tools::{
    BudgetCapability, BudgetEstimator, CurrentWeatherCapability, ForecastCapability,
    InMemoryIndex, RetrievalService,
};
use chrono::{Days, NaiveDate};

// ── Scripted model ───────────────────────────────────────────────────────

enum Reply {
    Text(&'static str),
    /// A final answer quoting the latest observation, followed by `suffix`.
    QuoteObservation(&'static str),
}

struct ScriptedProvider {
    replies: Vec<Reply>,
    calls: Mutex<usize>,
}

impl ScriptedProvider {
    fn new(replies: Vec<Reply>) -> Self {
        Self {
            replies,
            calls: Mutex::new(0),
        }
    }

    fn calls(&self) -> usize {
        *self.calls.lock().unwrap()
    }
}

fn latest_observation(request: &ProviderRequest) -> String {
    request
        .messages
        .iter()
        .rev()
        .filter(|m| m.role == Role::User)
        .find_map(|m| m.content.strip_prefix("Observation: "))
        .unwrap_or_default()
        .to_string()
}

#[async_trait]
impl Provider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn complete(&self, request: ProviderRequest) -> Result<ProviderResponse, ProviderError> {
        let mut calls = self.calls.lock().unwrap();
        let reply = self
            .replies
            .get(*calls)
            .unwrap_or_else(|| panic!("ScriptedProvider exhausted at call #{}", *calls));
        *calls += 1;

        let text = match reply {
            Reply::Text(text) => text.to_string(),
            Reply::QuoteObservation(suffix) => format!(
                "Thought: I can answer now\nFinal Answer: {}{suffix}",
                latest_observation(&request)
            ),
        };
        Ok(ProviderResponse {
            message: Message::assistant(text),
            usage: Some(Usage {
                prompt_tokens: 100,
                completion_tokens: 20,
                total_tokens: 120,
            }),
            model: "scripted-model".into(),
        })
    }
}

// ── In-process weather sources ───────────────────────────────────────────

struct TasmaniaGeocoder;

#[async_trait]
impl Geocoder for TasmaniaGeocoder {
    async fn geocode(&self, name: &str) -> Result<Option<GeoPoint>, CapabilityError> {
        Ok(name.eq_ignore_ascii_case("hobart").then(|| GeoPoint {
            name: "Hobart".into(),
            latitude: -42.88,
            longitude: 147.33,
            country: Some("Australia".into()),
        }))
    }
}

struct MildSpring;

fn tomorrow() -> NaiveDate {
    NaiveDate::from_ymd_opt(2026, 10, 17).unwrap()
}

#[async_trait]
impl CurrentConditionsSource for MildSpring {
    fn source_name(&self) -> &str {
        "Open-Meteo"
    }

    async fn current(&self, _place: &GeoPoint) -> Result<CurrentReading, CapabilityError> {
        Ok(CurrentReading {
            temperature_c: 14.2,
            feels_like_c: Some(12.9),
            humidity_pct: Some(61.0),
            wind_kmh: Some(18.0),
            conditions: "partly cloudy".into(),
            observed_at: None,
        })
    }
}

#[async_trait]
impl ForecastSource for MildSpring {
    fn source_name(&self) -> &str {
        "Open-Meteo"
    }

    async fn daily(
        &self,
        _place: &GeoPoint,
        days: usize,
    ) -> Result<Vec<DailyForecast>, CapabilityError> {
        Ok((0..days as u64)
            .map(|offset| DailyForecast {
                date: tomorrow() + Days::new(offset),
                low: 8.0 + offset as f64,
                high: 17.0 + offset as f64,
                precipitation: 0.4,
            })
            .collect())
    }
}

// ── Harness ──────────────────────────────────────────────────────────────

fn registry() -> CapabilityRegistry {
    let mut index = InMemoryIndex::new();
    index.add_document(
        "tasmania.md",
        "Hobart is the capital of Tasmania. \
         Walk up Mount Wellington for views over the Derwent.\n\n\
         Salamanca Market fills the waterfront every Saturday morning.",
    );
    let retrieval = RetrievalService::new(Arc::new(index), 0.1);

    let geocoder = Arc::new(TasmaniaGeocoder);
    let mut registry = CapabilityRegistry::new();
    registry
        .register(Arc::new(CurrentWeatherCapability::new(
            geocoder.clone(),
            Arc::new(MildSpring),
            "Hobart",
        )))
        .unwrap();
    registry
        .register(Arc::new(ForecastCapability::new(
            geocoder,
            Arc::new(MildSpring),
            "Hobart",
        )))
        .unwrap();
    registry
        .register(Arc::new(BudgetCapability::new(BudgetEstimator::new(
            retrieval,
            BudgetConfig::default(),
        ))))
        .unwrap();
    registry
}

fn assistant(replies: Vec<Reply>) -> (Assistant, Arc<ScriptedProvider>) {
    let provider = Arc::new(ScriptedProvider::new(replies));
    let reasoning = ReasoningLoop::new(
        provider.clone(),
        "scripted-model",
        Arc::new(registry()),
        LoopSettings::default(),
    );
    let assistant = Assistant::new(reasoning).with_retained_traces(true);
    (assistant, provider)
}

fn invoked(trace: &[TraceStep]) -> Vec<&str> {
    trace
        .iter()
        .filter_map(|t| match &t.step.action {
            StepAction::Invoke { capability, .. } => Some(capability.as_str()),
            StepAction::Final { .. } => None,
        })
        .collect()
}

fn sources_lines(text: &str) -> usize {
    text.lines()
        .filter(|l| l.trim_start().to_lowercase().starts_with("sources:"))
        .count()
}

// ── Scenarios ────────────────────────────────────────────────────────────

#[tokio::test]
async fn current_weather_returns_a_single_reading() {
    let (assistant, provider) = assistant(vec![
        Reply::Text(
            "Thought: The user wants conditions right now.\n\
             Action: current_weather\n\
             Action Input: {\"location\": \"Hobart\"}",
        ),
        Reply::QuoteObservation(""),
    ]);
    let session = SessionId::from("weather");

    let answer = assistant.handle_query(&session, "Current weather in Hobart").await;

    assert!(!answer.is_degraded());
    assert!(answer.text.contains("Current weather for Hobart, Australia: 14.2°C"));
    assert_eq!(answer.sources, vec!["Open-Meteo".to_string()]);
    assert_eq!(provider.calls(), 2);

    let trace = assistant.last_trace(&session).await.unwrap();
    assert_eq!(invoked(&trace), vec!["current_weather"]);
    let data = trace[0].observation.data.as_ref().unwrap();
    assert!(data.get("current").is_some());
    assert!(data.get("days").is_none());
}

#[tokio::test]
async fn three_day_forecast_has_three_dated_entries_and_one_sources_line() {
    let (assistant, _) = assistant(vec![
        Reply::Text(
            "Thought: A forecast is needed.\n\
             Action: weather_forecast\n\
             Action Input: {\"location\": \"Hobart\", \"days\": 3}",
        ),
        Reply::QuoteObservation("\n\nSources: Open-Meteo\n\nSources: open-meteo"),
    ]);
    let session = SessionId::from("forecast");

    let answer = assistant
        .handle_query(&session, "Forecast the weather for Hobart for 3 days")
        .await;

    let dated: Vec<&str> = answer.text.lines().filter(|l| l.starts_with("• ")).collect();
    assert_eq!(dated.len(), 3);
    assert!(dated[0].contains("Sat, 17 Oct 2026"));
    assert!(dated[2].contains("Mon, 19 Oct 2026"));
    assert_eq!(sources_lines(&answer.text), 1);
    assert!(answer.text.ends_with("Sources: Open-Meteo"));

    let trace = assistant.last_trace(&session).await.unwrap();
    assert_eq!(invoked(&trace), vec!["weather_forecast"]);
}

#[tokio::test]
async fn budget_without_guide_prices_uses_defaults_everywhere() {
    let (assistant, _) = assistant(vec![
        Reply::Text(
            "Thought: Estimate the costs.\n\
             Action: budget_estimate\n\
             Action Input: {\"destination\": \"Hobart\", \"days\": 3}",
        ),
        Reply::QuoteObservation("\nSources: Budget estimator"),
    ]);
    let session = SessionId::from("budget");

    let answer = assistant
        .handle_query(&session, "How much would 3 days in Hobart cost?")
        .await;

    assert!(!answer.is_degraded());
    assert!(answer.text.contains("Estimated total: $510.00 AUD"));

    let trace = assistant.last_trace(&session).await.unwrap();
    let observation = &trace[0].observation;
    assert!(observation.success);
    let data = observation.data.as_ref().unwrap();
    let lines = data["lines"].as_array().unwrap();
    assert_eq!(lines.len(), 3);
    assert!(lines.iter().all(|l| l["uses_default"] == true));
    assert!(data["total"].as_f64().unwrap() > 0.0);
}

#[tokio::test]
async fn malformed_reply_is_corrected_and_the_loop_completes() {
    let (assistant, provider) = assistant(vec![
        Reply::Text("Hmm, Hobart is probably mild this time of year."),
        Reply::Text(
            "Thought: I should check.\n\
             Action: current_weather\n\
             Action Input: Hobart",
        ),
        Reply::QuoteObservation(""),
    ]);
    let session = SessionId::from("recover");

    let answer = assistant.handle_query(&session, "Current weather in Hobart").await;

    assert!(!answer.is_degraded());
    assert!(answer.text.contains("partly cloudy"));
    assert_eq!(provider.calls(), 3);
    let trace = assistant.last_trace(&session).await.unwrap();
    assert_eq!(trace.len(), 1);
}

#[tokio::test]
async fn duplicate_attribution_blocks_are_merged() {
    let (assistant, _) = assistant(vec![Reply::Text(
        "Thought: I know this from the guide.\n\
         Final Answer: Salamanca Market runs every Saturday morning.\n\n\
         Sources: Travel guide (tasmania.md#2)\n\n\
         Sources:\n- travel guide (tasmania.md#2)",
    )]);

    let answer = assistant
        .handle_query(&SessionId::from("dupes"), "When is Salamanca Market on?")
        .await;

    assert_eq!(
        answer.text,
        "Salamanca Market runs every Saturday morning.\n\nSources: Travel guide (tasmania.md#2)"
    );
    assert_eq!(answer.sources.len(), 1);
}

#[tokio::test]
async fn hyphenated_location_resolves_like_the_plain_name() {
    let (assistant, _) = assistant(vec![
        Reply::Text(
            "Thought: check\nAction: current_weather\nAction Input: {\"location\": \"Hobart\"}",
        ),
        Reply::QuoteObservation(""),
        Reply::Text(
            "Thought: check\nAction: current_weather\nAction Input: {\"location\": \"Ho-bart\"}",
        ),
        Reply::QuoteObservation(""),
    ]);

    let plain = assistant
        .handle_query(&SessionId::from("a"), "Current weather in Hobart")
        .await;
    let hyphenated = assistant
        .handle_query(&SessionId::from("b"), "Current weather in Ho-bart")
        .await;

    assert!(!hyphenated.is_degraded());
    assert_eq!(plain.text, hyphenated.text);
}

#[tokio::test]
async fn follow_up_question_sees_the_previous_exchange() {
    let (assistant, _) = assistant(vec![
        Reply::Text("Final Answer: Hobart is the capital of Tasmania."),
        Reply::Text("Final Answer: Yes, walk up Mount Wellington for the views."),
    ]);
    let session = SessionId::from("memory");

    assistant.handle_query(&session, "What is Hobart?").await;
    assistant.handle_query(&session, "Anything to climb there?").await;

    let history = assistant.history(&session).await;
    assert_eq!(history.len(), 4);
    assert_eq!(history[0].text, "What is Hobart?");
    assert_eq!(history[3].text, "Yes, walk up Mount Wellington for the views.");
}
