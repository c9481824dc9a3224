//! Shared test doubles for the agent crate.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use backpacker_core::capability::{
    Capability, CapabilityInput, CapabilityOutput, CapabilityRegistry, InputSchema, ParamKind,
    ParamSpec,
};
use backpacker_core::error::{CapabilityError, ProviderError};
use backpacker_core::message::{Message, MessageToolCall};
use backpacker_core::provider::{Provider, ProviderRequest, ProviderResponse, Usage};

/// A mock provider that returns a sequence of scripted responses.
///
/// Each call to `complete` returns the next response in the queue and
/// records the request. Panics if more calls are made than responses
/// provided.
pub struct SequentialMockProvider {
    responses: Mutex<Vec<ProviderResponse>>,
    requests: Mutex<Vec<ProviderRequest>>,
}

impl SequentialMockProvider {
    pub fn new(responses: Vec<ProviderResponse>) -> Self {
        Self {
            responses: Mutex::new(responses),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// One text reply per entry.
    pub fn texts(replies: &[&str]) -> Self {
        Self::new(replies.iter().map(|r| make_text_response(r)).collect())
    }

    pub fn call_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub fn requests(&self) -> Vec<ProviderRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl Provider for SequentialMockProvider {
    fn name(&self) -> &str {
        "sequential_mock"
    }

    async fn complete(&self, request: ProviderRequest) -> Result<ProviderResponse, ProviderError> {
        let mut requests = self.requests.lock().unwrap();
        let responses = self.responses.lock().unwrap();
        let call = requests.len();
        assert!(
            call < responses.len(),
            "SequentialMockProvider: no more responses (call #{call}, have {})",
            responses.len()
        );
        requests.push(request);
        Ok(responses[call].clone())
    }
}

/// Always fails, as an unreachable model endpoint would.
pub struct FailingProvider;

#[async_trait]
impl Provider for FailingProvider {
    fn name(&self) -> &str {
        "failing"
    }

    async fn complete(&self, _request: ProviderRequest) -> Result<ProviderResponse, ProviderError> {
        Err(ProviderError::Network("connection refused".into()))
    }
}

/// Never answers within any reasonable budget.
pub struct StalledProvider;

#[async_trait]
impl Provider for StalledProvider {
    fn name(&self) -> &str {
        "stalled"
    }

    async fn complete(&self, _request: ProviderRequest) -> Result<ProviderResponse, ProviderError> {
        tokio::time::sleep(Duration::from_secs(3600)).await;
        Err(ProviderError::Timeout("stalled".into()))
    }
}

pub fn make_text_response(text: &str) -> ProviderResponse {
    ProviderResponse {
        message: Message::assistant(text),
        usage: Some(Usage {
            prompt_tokens: 10,
            completion_tokens: 5,
            total_tokens: 15,
        }),
        model: "mock-model".into(),
    }
}

pub fn make_tool_call_response(name: &str, args: serde_json::Value) -> ProviderResponse {
    let mut response = make_text_response("");
    response.message.tool_calls = vec![MessageToolCall {
        id: format!("call_{name}"),
        name: name.to_string(),
        arguments: args.to_string(),
    }];
    response
}

/// A capability with one required `location` parameter that reports what
/// it was asked, or fails when configured to.
pub struct EchoCapability {
    pub name: &'static str,
    pub fail: bool,
}

#[async_trait]
impl Capability for EchoCapability {
    fn name(&self) -> &str {
        self.name
    }

    fn description(&self) -> &str {
        "Echo the location back"
    }

    fn input_schema(&self) -> InputSchema {
        InputSchema::new(vec![ParamSpec::required(
            "location",
            ParamKind::String,
            "Place name",
        )])
    }

    async fn invoke(&self, input: CapabilityInput) -> Result<CapabilityOutput, CapabilityError> {
        let location = input.str("location").unwrap_or_default().to_string();
        if self.fail {
            return Err(CapabilityError::UpstreamUnavailable {
                service: self.name.to_string(),
                reason: "HTTP 503".into(),
            });
        }
        Ok(CapabilityOutput::text(format!("{} result for {location}", self.name))
            .with_source(format!("{} source", self.name)))
    }
}

/// A capability named `web_search` that returns a canned result.
pub struct CannedSearch;

#[async_trait]
impl Capability for CannedSearch {
    fn name(&self) -> &str {
        "web_search"
    }

    fn description(&self) -> &str {
        "Search the web"
    }

    fn input_schema(&self) -> InputSchema {
        InputSchema::new(vec![ParamSpec::required("query", ParamKind::String, "Query")])
    }

    async fn invoke(&self, input: CapabilityInput) -> Result<CapabilityOutput, CapabilityError> {
        Ok(CapabilityOutput::text(format!(
            "Search results for '{}': Salamanca Market runs every Saturday.",
            input.str("query").unwrap_or_default()
        ))
        .with_source("https://example.org/salamanca"))
    }
}

pub fn registry_with(capabilities: Vec<Arc<dyn Capability>>) -> Arc<CapabilityRegistry> {
    let mut registry = CapabilityRegistry::new();
    for capability in capabilities {
        registry.register(capability).unwrap();
    }
    Arc::new(registry)
}

pub fn weather_registry() -> Arc<CapabilityRegistry> {
    registry_with(vec![Arc::new(EchoCapability {
        name: "current_weather",
        fail: false,
    })])
}
