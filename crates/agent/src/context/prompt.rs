//! Prompt assembly.
//!
//! Builds the provider message list for one reasoning step from:
//!
//! 1. **System**: assistant rules, today's date, the capability list and
//!    the reply format
//! 2. **Guide excerpts**: top retrieval hints for the query, if any
//! 3. **History**: the session's conversation memory window
//! 4. **Query**: the current user question
//! 5. **Scratchpad**: steps already taken in this loop with their
//!    observations, plus a pending format correction
//!
//! Assembly is deterministic: identical inputs produce identical messages.

use backpacker_core::capability::CapabilityDescriptor;
use backpacker_core::error::ParseError;
use backpacker_core::message::{Message, MessageToolCall, Turn};
use backpacker_core::provider::ToolDefinition;
use backpacker_tools::Passage;
use chrono::NaiveDate;

use crate::step::{StepAction, TraceStep};

const PERSONA: &str = "You are Backpacker, a friendly travel assistant for people exploring \
on a budget. You help with destinations, things to do, weather and trip costs. \
Look facts up with the capabilities below instead of guessing. Use current_weather \
for conditions right now and weather_forecast for upcoming days. If a question is \
not about travel, say so briefly.";

/// A reply the parser rejected, to be pointed out on the next prompt.
#[derive(Debug, Clone)]
pub struct Correction {
    pub raw_output: String,
    pub error: ParseError,
}

impl Correction {
    fn observation(&self) -> String {
        format!(
            "Observation: Your last reply could not be understood ({}). Reply again using \
             exactly one of the two formats: Thought / Action / Action Input, \
             or Thought / Final Answer.",
            self.error
        )
    }
}

/// Everything that varies between prompts.
pub struct PromptInput<'a> {
    pub query: &'a str,
    pub today: NaiveDate,
    pub history: &'a [Turn],
    pub hints: &'a [Passage],
    pub scratchpad: &'a [TraceStep],
    pub correction: Option<&'a Correction>,
}

/// Stateless apart from the capability list, captured once at startup.
pub struct PromptAssembler {
    capabilities: Vec<CapabilityDescriptor>,
    native_tool_calls: bool,
}

impl PromptAssembler {
    pub fn new(capabilities: Vec<CapabilityDescriptor>, native_tool_calls: bool) -> Self {
        Self {
            capabilities,
            native_tool_calls,
        }
    }

    /// Tool definitions for native tool calling; empty in text mode.
    pub fn tool_definitions(&self) -> Vec<ToolDefinition> {
        if !self.native_tool_calls {
            return Vec::new();
        }
        self.capabilities
            .iter()
            .map(CapabilityDescriptor::to_definition)
            .collect()
    }

    pub fn assemble(&self, input: &PromptInput<'_>) -> Vec<Message> {
        let mut messages = vec![Message::system(self.system_message(input))];
        messages.extend(input.history.iter().map(Turn::to_message));
        messages.push(Message::user(input.query));

        for entry in input.scratchpad {
            self.push_step(&mut messages, entry);
        }
        if let Some(correction) = input.correction {
            messages.push(Message::assistant(correction.raw_output.clone()));
            messages.push(Message::user(correction.observation()));
        }
        messages
    }

    fn system_message(&self, input: &PromptInput<'_>) -> String {
        let mut sections = vec![format!(
            "{PERSONA}\n\nToday's date is {}.",
            input.today.format("%A, %-d %B %Y")
        )];

        let capability_lines: Vec<String> = self
            .capabilities
            .iter()
            .map(|c| format!("- {}({}): {}", c.name, c.input_schema.signature(), c.description))
            .collect();
        sections.push(format!("Capabilities:\n{}", capability_lines.join("\n")));

        sections.push(if self.native_tool_calls {
            "Call a capability whenever you need data. When you can answer, reply with the \
             answer only, ending with a single line \"Sources: ...\" naming where the \
             information came from."
                .to_string()
        } else {
            self.text_protocol()
        });

        if !input.hints.is_empty() {
            let excerpts: Vec<String> = input
                .hints
                .iter()
                .map(|p| format!("[{}] {}", p.doc_id, p.text))
                .collect();
            sections.push(format!("Guide excerpts:\n{}", excerpts.join("\n")));
        }

        sections.join("\n\n")
    }

    fn text_protocol(&self) -> String {
        let names: Vec<&str> = self.capabilities.iter().map(|c| c.name.as_str()).collect();
        format!(
            "Always reply in this format:\n\n\
             Thought: what you need to find out next\n\
             Action: one of [{}]\n\
             Action Input: a JSON object with the parameters, \
             or plain text when there is a single parameter\n\n\
             You will then receive an Observation with the result. Repeat as needed. \
             When you can answer:\n\n\
             Thought: I can answer now\n\
             Final Answer: the answer for the user, ending with a single line \"Sources: ...\" \
             naming where the information came from.",
            names.join(", ")
        )
    }

    fn push_step(&self, messages: &mut Vec<Message>, entry: &TraceStep) {
        let observation = entry.observation.render();
        if let (true, StepAction::Invoke {
            capability,
            input,
            call_id: Some(id),
        }) = (self.native_tool_calls, &entry.step.action)
        {
            let mut call = Message::assistant(entry.step.thought.clone());
            call.tool_calls = vec![MessageToolCall {
                id: id.clone(),
                name: capability.clone(),
                arguments: input.to_string(),
            }];
            messages.push(call);
            messages.push(Message::tool_result(id.clone(), observation));
            return;
        }
        messages.push(Message::assistant(entry.step.render()));
        messages.push(Message::user(format!("Observation: {observation}")));
    }
}
