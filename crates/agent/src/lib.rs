//! The reasoning core of Backpacker.
//!
//! A query flows through a bounded **Think → Act → Observe** loop:
//!
//! 1. **Receive** the query in a session ([`Assistant::handle_query`])
//! 2. **Assemble** the prompt: rules, capabilities, guide excerpts, history
//! 3. **Ask** the model for one step
//! 4. **If an action**: invoke the capability, record the observation, repeat
//! 5. **If a final answer**: sanitize its sources and return it
//!
//! The loop stops at the first final answer, or when its step or time
//! budget runs out, and always produces an answer.

pub mod context;
pub mod loop_runner;
pub mod sanitizer;
pub mod session;
pub mod step;

#[cfg(test)]
mod test_helpers;

pub use context::{ConversationMemory, PromptAssembler};
pub use loop_runner::{LoopContext, LoopOutcome, LoopSettings, LoopState, ReasoningLoop};
pub use sanitizer::{sanitize, sanitize_with_sources};
pub use session::{Assistant, MemoryLimits};
pub use step::{ReasoningStep, StepAction, TraceStep};
