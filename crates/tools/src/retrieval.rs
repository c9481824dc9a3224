//! Retrieval over the travel guide.
//!
//! [`RetrievalService`] wraps an external [`VectorIndex`] and enforces the
//! ranking contract: at most `k` passages, best score first, ties in corpus
//! order, nothing at or below the similarity threshold. An index with nothing
//! relevant yields an empty list, not an error.
//!
//! Two index backends ship here: [`InMemoryIndex`], a lexical index over a
//! directory of plain-text guides, and [`HttpVectorIndex`], a client for an
//! externally maintained vector index.

use async_trait::async_trait;
use backpacker_core::capability::{
    Capability, CapabilityInput, CapabilityOutput, InputSchema, ParamKind, ParamSpec,
};
use backpacker_core::error::{CapabilityError, RetrievalError};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// One passage returned by an index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Passage {
    pub text: String,
    pub score: f32,
    pub doc_id: String,
    /// Position in the corpus, used to break score ties.
    #[serde(default)]
    pub position: usize,
}

/// The external index boundary: `search(query, k) -> [{text, score, doc_id}]`.
#[async_trait]
pub trait VectorIndex: Send + Sync {
    async fn search(&self, query: &str, k: usize) -> Result<Vec<Passage>, RetrievalError>;
}

/// Ranked, thresholded retrieval on top of a [`VectorIndex`].
#[derive(Clone)]
pub struct RetrievalService {
    index: Arc<dyn VectorIndex>,
    min_similarity: f32,
}

impl RetrievalService {
    pub fn new(index: Arc<dyn VectorIndex>, min_similarity: f32) -> Self {
        Self {
            index,
            min_similarity,
        }
    }

    pub async fn search(&self, query: &str, k: usize) -> Result<Vec<Passage>, RetrievalError> {
        if k == 0 || query.trim().is_empty() {
            return Ok(Vec::new());
        }

        let hits = self.index.search(query, k).await?;
        let total = hits.len();
        let passages = rank(hits, self.min_similarity, k);
        debug!(query, returned = passages.len(), candidates = total, "Retrieval search");
        Ok(passages)
    }
}

/// Keep scores strictly above the threshold, sort by descending score
/// (ties by position), truncate.
fn rank(hits: Vec<Passage>, min_similarity: f32, k: usize) -> Vec<Passage> {
    let mut kept: Vec<Passage> = hits
        .into_iter()
        .filter(|p| p.score > min_similarity)
        .collect();
    kept.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(Ordering::Equal)
            .then(a.position.cmp(&b.position))
    });
    kept.truncate(k);
    kept
}

// ── In-memory lexical index ───────────────────────────────────────────────

/// Lexical index over guide paragraphs.
///
/// The score is the fraction of distinct query terms that occur in the
/// passage, so it lies in `[0, 1]` like a cosine similarity.
#[derive(Debug, Clone, Default)]
pub struct InMemoryIndex {
    passages: Vec<Passage>,
}

impl InMemoryIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a document, split into passages on blank lines.
    pub fn add_document(&mut self, doc_name: &str, content: &str) {
        let chunks = content
            .split("\n\n")
            .map(str::trim)
            .filter(|chunk| !chunk.is_empty())
            .enumerate();
        for (index, text) in chunks {
            let position = self.passages.len();
            self.passages.push(Passage {
                text: text.to_string(),
                score: 0.0,
                doc_id: format!("{doc_name}#{}", index + 1),
                position,
            });
        }
    }

    /// Load every `.txt` and `.md` file in `dir`, in file-name order.
    ///
    /// A missing directory yields an empty index.
    pub fn load_dir(dir: &Path) -> Result<Self, RetrievalError> {
        let mut index = Self::new();
        if !dir.exists() {
            info!(dir = %dir.display(), "Guide directory not found, retrieval index is empty");
            return Ok(index);
        }

        let load_err = |reason: String| RetrievalError::Load {
            path: dir.display().to_string(),
            reason,
        };

        let mut files: Vec<_> = std::fs::read_dir(dir)
            .map_err(|e| load_err(e.to_string()))?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| {
                matches!(
                    path.extension().and_then(|e| e.to_str()),
                    Some("txt") | Some("md")
                )
            })
            .collect();
        files.sort();

        for path in files {
            let content = std::fs::read_to_string(&path).map_err(|e| load_err(e.to_string()))?;
            let name = path
                .file_name()
                .and_then(|n| n.to_str())
                .unwrap_or("guide");
            index.add_document(name, &content);
        }

        info!(dir = %dir.display(), passages = index.len(), "Loaded travel guide");
        Ok(index)
    }

    pub fn len(&self) -> usize {
        self.passages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.passages.is_empty()
    }
}

/// Lowercased alphanumeric terms longer than two characters, deduplicated.
pub fn query_terms(query: &str) -> Vec<String> {
    let mut terms: Vec<String> = Vec::new();
    for token in query
        .split(|c: char| !c.is_alphanumeric())
        .filter(|token| token.chars().count() > 2)
        .map(str::to_lowercase)
    {
        if !terms.contains(&token) {
            terms.push(token);
        }
    }
    terms
}

#[async_trait]
impl VectorIndex for InMemoryIndex {
    async fn search(&self, query: &str, k: usize) -> Result<Vec<Passage>, RetrievalError> {
        let terms = query_terms(query);
        if terms.is_empty() {
            return Ok(Vec::new());
        }

        let scored = self
            .passages
            .iter()
            .filter_map(|passage| {
                let body = passage.text.to_lowercase();
                let matched = terms.iter().filter(|t| body.contains(t.as_str())).count();
                (matched > 0).then(|| Passage {
                    score: matched as f32 / terms.len() as f32,
                    ..passage.clone()
                })
            })
            .collect();

        // The service re-ranks; pre-ranking keeps `k` meaningful here too.
        Ok(rank(scored, 0.0, k))
    }
}

// ── HTTP index client ─────────────────────────────────────────────────────

/// Client for an external index exposing `POST {url}` with
/// `{"query": ..., "k": ...}` and answering `{"results": [{text, score, doc_id}]}`.
pub struct HttpVectorIndex {
    url: String,
    client: reqwest::Client,
}

impl HttpVectorIndex {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_default();
        Self {
            url: url.into(),
            client,
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum IndexResponse {
    Wrapped { results: Vec<IndexHit> },
    Bare(Vec<IndexHit>),
}

#[derive(Deserialize)]
struct IndexHit {
    text: String,
    score: f32,
    #[serde(default)]
    doc_id: Option<String>,
}

/// Parse an index response body; hits keep the order the index returned.
pub fn parse_index_response(body: &str) -> Result<Vec<Passage>, RetrievalError> {
    let response: IndexResponse = serde_json::from_str(body)
        .map_err(|e| RetrievalError::InvalidResponse(e.to_string()))?;
    let hits = match response {
        IndexResponse::Wrapped { results } => results,
        IndexResponse::Bare(hits) => hits,
    };
    Ok(hits
        .into_iter()
        .enumerate()
        .map(|(position, hit)| Passage {
            text: hit.text,
            score: hit.score,
            doc_id: hit.doc_id.unwrap_or_else(|| format!("passage-{}", position + 1)),
            position,
        })
        .collect())
}

#[async_trait]
impl VectorIndex for HttpVectorIndex {
    async fn search(&self, query: &str, k: usize) -> Result<Vec<Passage>, RetrievalError> {
        debug!(url = %self.url, k, "Querying vector index");
        let response = self
            .client
            .post(&self.url)
            .json(&serde_json::json!({ "query": query, "k": k }))
            .send()
            .await
            .map_err(|e| RetrievalError::Unavailable(e.to_string()))?;

        if !response.status().is_success() {
            return Err(RetrievalError::Unavailable(format!(
                "index returned HTTP {}",
                response.status().as_u16()
            )));
        }

        let body = response
            .text()
            .await
            .map_err(|e| RetrievalError::Unavailable(e.to_string()))?;
        parse_index_response(&body)
    }
}

// ── Capability ────────────────────────────────────────────────────────────

/// `travel_guide`: look up passages in the backpacker guide.
pub struct RetrievalCapability {
    service: RetrievalService,
    top_k: usize,
}

impl RetrievalCapability {
    pub fn new(service: RetrievalService, top_k: usize) -> Self {
        Self { service, top_k }
    }
}

#[async_trait]
impl Capability for RetrievalCapability {
    fn name(&self) -> &str {
        "travel_guide"
    }

    fn description(&self) -> &str {
        "Search the Tasmania backpacker travel guide for places, hikes, transport, \
         accommodation, prices and tips. Use this first for any travel question."
    }

    fn input_schema(&self) -> InputSchema {
        InputSchema::new(vec![ParamSpec::required(
            "query",
            ParamKind::String,
            "What to look up in the guide",
        )])
    }

    async fn invoke(&self, input: CapabilityInput) -> Result<CapabilityOutput, CapabilityError> {
        let query = input.str("query").unwrap_or_default();
        let passages = self.service.search(query, self.top_k).await?;

        if passages.is_empty() {
            return Ok(CapabilityOutput::text(
                "No relevant passages found in the travel guide.",
            )
            .with_data(serde_json::json!({ "passages": [] })));
        }

        let content = passages
            .iter()
            .enumerate()
            .map(|(i, p)| format!("[{}] ({}) {}", i + 1, p.doc_id, p.text))
            .collect::<Vec<_>>()
            .join("\n\n");

        let mut output = CapabilityOutput::text(content)
            .with_data(serde_json::json!({ "passages": passages }));
        for p in &passages {
            output = output.with_source(format!("Travel guide ({})", p.doc_id));
        }
        Ok(output)
    }
}
