//! The single answer produced per query.

use serde::{Deserialize, Serialize};

/// Why an answer is best-effort rather than fully grounded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Degradation {
    /// The step bound was reached before the model gave a final answer.
    StepLimit,
    /// The wall-clock budget ran out.
    TimeLimit,
    /// The model produced unparseable output twice in a row.
    MalformedOutput,
    /// The language model could not be reached.
    ModelUnavailable,
    /// The model's answer was empty and web results were used instead.
    SearchFallback,
}

impl Degradation {
    /// Notice shown to the user alongside a degraded answer.
    pub fn notice(self) -> &'static str {
        match self {
            Degradation::StepLimit => {
                "(Best-effort answer: I ran out of reasoning steps before finishing.)"
            }
            Degradation::TimeLimit => "(Best-effort answer: I ran out of time before finishing.)",
            Degradation::MalformedOutput | Degradation::ModelUnavailable => {
                "(Best-effort answer: something went wrong while working this out.)"
            }
            Degradation::SearchFallback => {
                "(Best-effort answer: based on web search results rather than the travel guide.)"
            }
        }
    }
}

/// Exactly one is produced per query, even when the loop aborts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FinalAnswer {
    pub text: String,
    /// Deduplicated attributions, in first-seen order.
    pub sources: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub degraded: Option<Degradation>,
}

impl FinalAnswer {
    pub fn new(text: impl Into<String>, sources: Vec<String>) -> Self {
        Self {
            text: text.into(),
            sources,
            degraded: None,
        }
    }

    pub fn degraded(text: impl Into<String>, sources: Vec<String>, reason: Degradation) -> Self {
        Self {
            text: text.into(),
            sources,
            degraded: Some(reason),
        }
    }

    pub fn is_degraded(&self) -> bool {
        self.degraded.is_some()
    }
}

impl std::fmt::Display for FinalAnswer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.text)
    }
}
