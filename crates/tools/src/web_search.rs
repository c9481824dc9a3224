//! Web search adapter.
//!
//! Results from a [`SearchProvider`] are deduplicated by normalized URL and
//! capped at the configured count. Zero results is a normal, successful
//! outcome. The shipped provider is DuckDuckGo's Instant Answer API.

use async_trait::async_trait;
use backpacker_core::capability::{
    Capability, CapabilityInput, CapabilityOutput, InputSchema, ParamKind, ParamSpec,
};
use backpacker_core::error::CapabilityError;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

const SNIPPET_CHARS: usize = 200;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchResult {
    pub title: String,
    pub snippet: String,
    pub url: String,
}

#[async_trait]
pub trait SearchProvider: Send + Sync {
    fn source_name(&self) -> &str;

    async fn search(&self, query: &str) -> Result<Vec<SearchResult>, CapabilityError>;
}

/// Dedupe key for a URL: lowercase, no scheme, no `www.`, no fragment,
/// no trailing slash.
pub fn normalize_url(url: &str) -> String {
    let lower = url.trim().to_lowercase();
    let without_scheme = lower
        .strip_prefix("https://")
        .or_else(|| lower.strip_prefix("http://"))
        .unwrap_or(&lower);
    let without_www = without_scheme.strip_prefix("www.").unwrap_or(without_scheme);
    let without_fragment = without_www.split('#').next().unwrap_or_default();
    without_fragment.trim_end_matches('/').to_string()
}

/// Keep the first result per normalized URL, in order.
pub fn dedupe(results: Vec<SearchResult>) -> Vec<SearchResult> {
    let mut seen = HashSet::new();
    results
        .into_iter()
        .filter(|r| seen.insert(normalize_url(&r.url)))
        .collect()
}

fn truncate_snippet(text: &str) -> String {
    let text = text.trim();
    if text.chars().count() <= SNIPPET_CHARS {
        return text.to_string();
    }
    let cut: String = text.chars().take(SNIPPET_CHARS).collect();
    format!("{}...", cut.trim_end())
}

pub struct WebSearchAdapter {
    provider: Arc<dyn SearchProvider>,
    max_results: usize,
}

impl WebSearchAdapter {
    pub fn new(provider: Arc<dyn SearchProvider>, max_results: usize) -> Self {
        Self {
            provider,
            max_results: max_results.max(1),
        }
    }

    pub async fn search(&self, query: &str) -> Result<Vec<SearchResult>, CapabilityError> {
        let raw = self.provider.search(query).await?;
        let fetched = raw.len();
        let mut results = dedupe(raw);
        results.truncate(self.max_results);
        for r in &mut results {
            r.snippet = truncate_snippet(&r.snippet);
        }
        debug!(query, fetched, returned = results.len(), "Web search");
        Ok(results)
    }

    pub fn source_name(&self) -> &str {
        self.provider.source_name()
    }
}

// ── DuckDuckGo ────────────────────────────────────────────────────────────

pub struct DuckDuckGoClient {
    endpoint: String,
    client: reqwest::Client,
}

impl DuckDuckGoClient {
    const SERVICE: &'static str = "DuckDuckGo";

    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent("backpacker/0.1")
            .build()
            .unwrap_or_default();
        Self {
            endpoint: endpoint.into(),
            client,
        }
    }
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "PascalCase", default)]
struct InstantAnswer {
    heading: String,
    abstract_text: String,
    #[serde(rename = "AbstractURL")]
    abstract_url: String,
    results: Vec<Topic>,
    related_topics: Vec<Topic>,
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "PascalCase", default)]
struct Topic {
    #[serde(rename = "FirstURL")]
    first_url: String,
    text: String,
    /// Present on topic groups.
    topics: Vec<Topic>,
}

fn title_from(text: &str, url: &str) -> String {
    if let Some((title, _)) = text.split_once(" - ") {
        return title.trim().to_string();
    }
    url.trim_end_matches('/')
        .rsplit('/')
        .next()
        .map(|slug| slug.replace('_', " "))
        .filter(|slug| !slug.is_empty())
        .unwrap_or_else(|| text.chars().take(60).collect())
}

fn flatten_topics(topics: Vec<Topic>, out: &mut Vec<SearchResult>) {
    for topic in topics {
        if !topic.topics.is_empty() {
            flatten_topics(topic.topics, out);
        } else if !topic.first_url.is_empty() {
            out.push(SearchResult {
                title: title_from(&topic.text, &topic.first_url),
                snippet: topic.text,
                url: topic.first_url,
            });
        }
    }
}

/// Parse an Instant Answer body: abstract first, then results, then related topics.
pub fn parse_instant_answer(body: &str) -> Result<Vec<SearchResult>, CapabilityError> {
    let answer: InstantAnswer =
        serde_json::from_str(body).map_err(|e| CapabilityError::UpstreamUnavailable {
            service: DuckDuckGoClient::SERVICE.into(),
            reason: format!("invalid response: {e}"),
        })?;

    let mut results = Vec::new();
    if !answer.abstract_url.is_empty() && !answer.abstract_text.is_empty() {
        results.push(SearchResult {
            title: answer.heading,
            snippet: answer.abstract_text,
            url: answer.abstract_url,
        });
    }
    flatten_topics(answer.results, &mut results);
    flatten_topics(answer.related_topics, &mut results);
    Ok(results)
}

#[async_trait]
impl SearchProvider for DuckDuckGoClient {
    fn source_name(&self) -> &str {
        Self::SERVICE
    }

    async fn search(&self, query: &str) -> Result<Vec<SearchResult>, CapabilityError> {
        let unavailable = |reason: String| CapabilityError::UpstreamUnavailable {
            service: Self::SERVICE.into(),
            reason,
        };
        let response = self
            .client
            .get(&self.endpoint)
            .query(&[
                ("q", query),
                ("format", "json"),
                ("no_html", "1"),
                ("skip_disambig", "1"),
            ])
            .send()
            .await
            .map_err(|e| unavailable(e.to_string()))?;
        if !response.status().is_success() {
            return Err(unavailable(format!("HTTP {}", response.status().as_u16())));
        }
        let body = response.text().await.map_err(|e| unavailable(e.to_string()))?;
        parse_instant_answer(&body)
    }
}

// ── Capability ────────────────────────────────────────────────────────────

/// `web_search`: live web results for things the guide does not cover.
pub struct WebSearchCapability {
    adapter: WebSearchAdapter,
}

impl WebSearchCapability {
    pub fn new(adapter: WebSearchAdapter) -> Self {
        Self { adapter }
    }
}

/// Numbered result list as shown to the model.
pub fn render_results(results: &[SearchResult]) -> String {
    let items: Vec<String> = results
        .iter()
        .enumerate()
        .map(|(i, r)| format!("{}. {}\n   {}\n   Source: {}", i + 1, r.title, r.snippet, r.url))
        .collect();
    format!("Search results:\n{}", items.join("\n\n"))
}

#[async_trait]
impl Capability for WebSearchCapability {
    fn name(&self) -> &str {
        "web_search"
    }

    fn description(&self) -> &str {
        "Search the web for current information the travel guide does not cover, \
         such as events, opening hours, closures or news."
    }

    fn input_schema(&self) -> InputSchema {
        InputSchema::new(vec![ParamSpec::required(
            "query",
            ParamKind::String,
            "Search query",
        )])
    }

    async fn invoke(&self, input: CapabilityInput) -> Result<CapabilityOutput, CapabilityError> {
        let query = input.str("query").unwrap_or_default();
        let results = self.adapter.search(query).await?;

        if results.is_empty() {
            return Ok(CapabilityOutput::text(format!("No web results found for '{query}'."))
                .with_data(serde_json::json!({ "results": [] })));
        }

        let mut output = CapabilityOutput::text(render_results(&results))
            .with_data(serde_json::json!({ "results": results }));
        for r in &results {
            output = output.with_source(r.url.clone());
        }
        Ok(output)
    }
}
