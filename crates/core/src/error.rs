//! Error types for the Backpacker domain.
//!
//! Uses `thiserror` for ergonomic error definitions.
//! Each bounded context has its own error enum; the top-level [`Error`]
//! wraps them for callers that only care that *something* failed.

use thiserror::Error;

/// The top-level error type for all Backpacker operations.
#[derive(Debug, Error)]
pub enum Error {
    // --- Provider errors ---
    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    // --- Capability registry errors ---
    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),

    // --- Capability execution errors ---
    #[error("Capability error: {0}")]
    Capability(#[from] CapabilityError),

    // --- Retrieval errors ---
    #[error("Retrieval error: {0}")]
    Retrieval(#[from] RetrievalError),

    // --- Configuration errors ---
    #[error("Configuration error: {message}")]
    Config { message: String },

    // --- Serialization ---
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // --- Generic ---
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias using our Error.
pub type Result<T> = std::result::Result<T, Error>;

// --- Bounded context errors ---

#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    #[error("API request failed: {message} (status: {status_code})")]
    ApiError {
        status_code: u16,
        message: String,
    },

    #[error("Rate limited by provider, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Provider not configured: {0}")]
    NotConfigured(String),

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Network error: {0}")]
    Network(String),
}

/// Misuse of the capability registry.
///
/// `DuplicateCapability` is a startup error and is fatal. `UnknownCapability`
/// and `InputValidation` are returned by [`crate::capability::CapabilityRegistry::invoke`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("Capability already registered: {0}")]
    DuplicateCapability(String),

    #[error("Unknown capability: {0}")]
    UnknownCapability(String),

    #[error("Invalid input for {capability}: {reason}")]
    InputValidation { capability: String, reason: String },
}

/// Failures raised while a capability executes.
///
/// These never escape the registry: they are captured into a failed
/// [`crate::capability::Observation`].
#[derive(Debug, Clone, Error)]
pub enum CapabilityError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Could not resolve location '{location}'")]
    Geocoding { location: String },

    #[error("{service} is unavailable: {reason}")]
    UpstreamUnavailable { service: String, reason: String },

    #[error("Capability timed out: {capability} after {timeout_secs}s")]
    Timeout { capability: String, timeout_secs: u64 },

    #[error("Capability execution failed: {capability}: {reason}")]
    ExecutionFailed { capability: String, reason: String },
}

/// Model output that could not be turned into a reasoning step.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("missing 'Action:' line")]
    MissingAction,

    #[error("missing 'Action Input:' for action '{0}'")]
    MissingActionInput(String),

    #[error("malformed action input: {0}")]
    MalformedInput(String),

    #[error("'Final Answer:' is empty")]
    EmptyFinalAnswer,

    #[error("output contains both a final answer and an action")]
    Ambiguous,
}

#[derive(Debug, Clone, Error)]
pub enum RetrievalError {
    #[error("Index unavailable: {0}")]
    Unavailable(String),

    #[error("Index returned an invalid response: {0}")]
    InvalidResponse(String),

    #[error("Failed to load documents from {path}: {reason}")]
    Load { path: String, reason: String },
}

impl From<RetrievalError> for CapabilityError {
    fn from(err: RetrievalError) -> Self {
        CapabilityError::UpstreamUnavailable {
            service: "retrieval index".into(),
            reason: err.to_string(),
        }
    }
}
