//! # Backpacker Core
//!
//! Domain types, traits, and error definitions for the Backpacker travel
//! assistant. This crate does no I/O of its own: it defines the domain model
//! that the provider, tool and agent crates implement against.
//!
//! The central seam is [`Capability`]: everything the reasoning loop can do
//! (guide retrieval, weather, budgets, web search) is a capability registered
//! once in a [`CapabilityRegistry`] and invoked by name.

pub mod answer;
pub mod capability;
pub mod error;
pub mod event;
pub mod message;
pub mod provider;

// Re-export key types at crate root for ergonomics
pub use answer::{Degradation, FinalAnswer};
pub use capability::{
    Capability, CapabilityDescriptor, CapabilityInput, CapabilityOutput, CapabilityRegistry,
    InputSchema, Observation, ParamKind, ParamSpec,
};
pub use error::{
    CapabilityError, Error, ParseError, ProviderError, RegistryError, Result, RetrievalError,
};
pub use event::{DomainEvent, EventBus};
pub use message::{Message, MessageToolCall, Query, Role, SessionId, Turn, TurnRole};
pub use provider::{Provider, ProviderRequest, ProviderResponse, ToolDefinition, Usage};
