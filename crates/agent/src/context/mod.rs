//! Context for the reasoning loop: session memory, prompt assembly and
//! token estimation.
//!
//! | Piece | Source | Bound |
//! |-------|--------|-------|
//! | System | Persona, capability list, reply format | Never trimmed |
//! | Guide excerpts | Retrieval hints for the query | `retrieval.prompt_hints` |
//! | History | [`ConversationMemory`] window | Turn cap and token cap, oldest evicted |
//! | Scratchpad | Steps taken in this loop | `agent.max_steps` |

pub mod conversation_memory;
pub mod prompt;
pub mod token;

pub use conversation_memory::ConversationMemory;
pub use prompt::{Correction, PromptAssembler, PromptInput};
