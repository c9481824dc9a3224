//! Reasoning step parser.
//!
//! The model answers in the ReAct text format:
//!
//! ```text
//! Thought: the user wants a forecast
//! Action: weather_forecast
//! Action Input: {"location": "Hobart", "days": 3}
//! ```
//!
//! or, once it has enough information:
//!
//! ```text
//! Thought: I can answer now
//! Final Answer: ...
//! ```
//!
//! Native tool calls map onto the same [`ReasoningStep`] through
//! [`ReasoningStep::from_tool_call`].

use std::sync::LazyLock;

use backpacker_core::capability::Observation;
use backpacker_core::error::ParseError;
use backpacker_core::message::MessageToolCall;
use regex::Regex;
use serde::Serialize;
use serde_json::Value;

static LABEL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(concat!(
        r"(?mi)^[ \t>*_#]*",
        r"(thought|action[ \t]*input|action|final[ \t]*answer|observation)",
        r"[*_]*[ \t]*:[*_]*",
    ))
    .expect("label pattern is valid")
});

/// What the model decided to do in one iteration.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StepAction {
    Invoke {
        capability: String,
        input: Value,
        /// Present when the step came from a native tool call.
        #[serde(skip_serializing_if = "Option::is_none")]
        call_id: Option<String>,
    },
    Final {
        answer: String,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReasoningStep {
    pub thought: String,
    pub action: StepAction,
}

/// One executed step and the observation it produced.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TraceStep {
    pub step: ReasoningStep,
    pub observation: Observation,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Label {
    Thought,
    ActionInput,
    Action,
    FinalAnswer,
    Observation,
}

impl Label {
    fn from_match(text: &str) -> Self {
        let lower = text.to_lowercase();
        if lower.starts_with("thought") {
            Label::Thought
        } else if lower.starts_with("final") {
            Label::FinalAnswer
        } else if lower.starts_with("observation") {
            Label::Observation
        } else if lower.contains("input") {
            Label::ActionInput
        } else {
            Label::Action
        }
    }
}

#[derive(Default)]
struct Sections<'a> {
    preamble: &'a str,
    thought: Option<&'a str>,
    action: Option<&'a str>,
    action_input: Option<&'a str>,
    final_answer: Option<&'a str>,
}

/// Split raw output into labelled sections, first occurrence of each label.
///
/// Everything from the first `Observation:` on is dropped: the model is
/// hallucinating a capability result.
fn split_sections(text: &str) -> Sections<'_> {
    let labels: Vec<(Label, usize, usize)> = LABEL
        .captures_iter(text)
        .filter_map(|caps| {
            let whole = caps.get(0)?;
            let name = caps.get(1)?;
            Some((Label::from_match(name.as_str()), whole.start(), whole.end()))
        })
        .collect();

    let mut sections = Sections {
        preamble: labels
            .first()
            .map_or(text, |&(_, start, _)| &text[..start])
            .trim(),
        ..Sections::default()
    };

    for (i, &(label, _, body_start)) in labels.iter().enumerate() {
        let body_end = labels.get(i + 1).map_or(text.len(), |&(_, start, _)| start);
        let body = text[body_start..body_end].trim();
        let slot = match label {
            Label::Observation => break,
            Label::Thought => &mut sections.thought,
            Label::Action => &mut sections.action,
            Label::ActionInput => &mut sections.action_input,
            Label::FinalAnswer => &mut sections.final_answer,
        };
        if slot.is_none() {
            *slot = Some(body);
        }
    }
    sections
}

fn is_final_action(name: &str) -> bool {
    matches!(
        name.to_lowercase().as_str(),
        "final" | "final answer" | "final_answer" | "finish"
    )
}

fn clean_action_name(raw: &str) -> String {
    raw.lines()
        .next()
        .unwrap_or_default()
        .trim()
        .trim_matches(|c: char| matches!(c, '`' | '"' | '\'' | '*' | '[' | ']'))
        .trim()
        .to_string()
}

fn strip_code_fence(raw: &str) -> &str {
    let trimmed = raw.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    // Drop the info string (e.g. `json`) on the opening fence line.
    let body = rest.split_once('\n').map_or("", |(_, body)| body);
    body.trim_end().trim_end_matches("```").trim()
}

/// Parse an `Action Input` payload: JSON when it looks like an object,
/// free text otherwise.
///
/// Only the first JSON value is read; commentary after the object is ignored.
pub fn parse_action_input(raw: &str) -> Result<Value, ParseError> {
    let text = strip_code_fence(raw);
    if text.is_empty() {
        return Ok(Value::Null);
    }
    if text.starts_with('{') {
        return match serde_json::Deserializer::from_str(text).into_iter::<Value>().next() {
            Some(Ok(value)) => Ok(value),
            Some(Err(e)) => Err(ParseError::MalformedInput(e.to_string())),
            None => Ok(Value::Null),
        };
    }
    let unquoted = text
        .strip_prefix('"')
        .and_then(|t| t.strip_suffix('"'))
        .unwrap_or(text);
    Ok(Value::String(unquoted.trim().to_string()))
}

impl ReasoningStep {
    /// Parse one model reply in the ReAct text format.
    pub fn parse(text: &str) -> Result<Self, ParseError> {
        let sections = split_sections(text);
        let thought = sections
            .thought
            .unwrap_or(sections.preamble)
            .to_string();

        let action_name = sections.action.map(clean_action_name);
        let final_answer = sections.final_answer.map(str::trim);

        match (action_name, final_answer) {
            (Some(name), Some(answer)) if is_final_action(&name) => {
                Self::final_step(thought, answer)
            }
            (Some(_), Some(_)) => Err(ParseError::Ambiguous),
            (Some(name), None) if is_final_action(&name) => {
                Self::final_step(thought, sections.action_input.unwrap_or_default())
            }
            (Some(name), None) if name.is_empty() => Err(ParseError::MissingAction),
            (Some(name), None) => {
                let raw_input = sections
                    .action_input
                    .ok_or_else(|| ParseError::MissingActionInput(name.clone()))?;
                Ok(Self {
                    thought,
                    action: StepAction::Invoke {
                        capability: name,
                        input: parse_action_input(raw_input)?,
                        call_id: None,
                    },
                })
            }
            (None, Some(answer)) => Self::final_step(thought, answer),
            (None, None) => Err(ParseError::MissingAction),
        }
    }

    /// Build a step from a native tool call.
    pub fn from_tool_call(thought: &str, call: &MessageToolCall) -> Result<Self, ParseError> {
        let name = call.name.trim();
        if name.is_empty() {
            return Err(ParseError::MissingAction);
        }
        let input = if call.arguments.trim().is_empty() {
            Value::Null
        } else {
            serde_json::from_str(&call.arguments)
                .map_err(|e| ParseError::MalformedInput(e.to_string()))?
        };
        Ok(Self {
            thought: thought.trim().to_string(),
            action: StepAction::Invoke {
                capability: name.to_string(),
                input,
                call_id: Some(call.id.clone()),
            },
        })
    }

    fn final_step(thought: String, answer: &str) -> Result<Self, ParseError> {
        let answer = answer.trim();
        if answer.is_empty() {
            return Err(ParseError::EmptyFinalAnswer);
        }
        Ok(Self {
            thought,
            action: StepAction::Final {
                answer: answer.to_string(),
            },
        })
    }

    pub fn is_final(&self) -> bool {
        matches!(self.action, StepAction::Final { .. })
    }

    /// Capability name, or `"final"`.
    pub fn action_name(&self) -> &str {
        match &self.action {
            StepAction::Invoke { capability, .. } => capability,
            StepAction::Final { .. } => "final",
        }
    }

    /// Render back into the text format, as it appears in the scratchpad.
    pub fn render(&self) -> String {
        let mut out = String::new();
        if !self.thought.is_empty() {
            out.push_str(&format!("Thought: {}\n", self.thought));
        }
        match &self.action {
            StepAction::Invoke {
                capability, input, ..
            } => {
                let input = match input {
                    Value::String(text) => text.clone(),
                    Value::Null => String::new(),
                    other => other.to_string(),
                };
                out.push_str(&format!("Action: {capability}\nAction Input: {input}"));
            }
            StepAction::Final { answer } => out.push_str(&format!("Final Answer: {answer}")),
        }
        out
    }
}
