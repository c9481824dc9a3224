//! Configuration loading, validation, and management for Backpacker.
//!
//! Loads configuration from `~/.backpacker/config.toml` with environment
//! variable overrides. Validates all settings at startup.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// The root configuration structure.
///
/// Maps directly to `~/.backpacker/config.toml`.
#[derive(Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// API key for the LLM provider (can be overridden per-provider)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Default LLM provider
    #[serde(default = "default_provider")]
    pub default_provider: String,

    /// Default model
    #[serde(default = "default_model")]
    pub default_model: String,

    /// Default temperature
    #[serde(default = "default_temperature")]
    pub default_temperature: f32,

    /// Default max tokens per LLM response
    #[serde(default = "default_max_tokens")]
    pub default_max_tokens: u32,

    /// Reasoning loop bounds
    #[serde(default)]
    pub agent: AgentConfig,

    /// Conversation memory retention
    #[serde(default)]
    pub memory: MemoryConfig,

    /// Travel-guide retrieval
    #[serde(default)]
    pub retrieval: RetrievalConfig,

    /// Weather data sources
    #[serde(default)]
    pub weather: WeatherConfig,

    /// Web search
    #[serde(default)]
    pub search: SearchConfig,

    /// Budget estimation defaults
    #[serde(default)]
    pub budget: BudgetConfig,

    /// Capability dispatch
    #[serde(default)]
    pub capabilities: CapabilitiesConfig,

    /// Provider-specific configurations
    #[serde(default)]
    pub providers: HashMap<String, ProviderConfig>,
}

fn default_provider() -> String {
    "openai".into()
}
fn default_model() -> String {
    "gpt-4o-mini".into()
}
fn default_temperature() -> f32 {
    0.2
}
fn default_max_tokens() -> u32 {
    1024
}
fn default_true() -> bool {
    true
}

fn redact(s: &Option<String>) -> &'static str {
    match s {
        Some(_) => "[REDACTED]",
        None => "None",
    }
}

impl std::fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppConfig")
            .field("api_key", &redact(&self.api_key))
            .field("default_provider", &self.default_provider)
            .field("default_model", &self.default_model)
            .field("default_temperature", &self.default_temperature)
            .field("default_max_tokens", &self.default_max_tokens)
            .field("agent", &self.agent)
            .field("memory", &self.memory)
            .field("retrieval", &self.retrieval)
            .field("weather", &self.weather)
            .field("search", &self.search)
            .field("budget", &self.budget)
            .field("capabilities", &self.capabilities)
            .field("providers", &self.providers)
            .finish()
    }
}

impl std::fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderConfig")
            .field("api_key", &redact(&self.api_key))
            .field("api_url", &self.api_url)
            .field("default_model", &self.default_model)
            .finish()
    }
}

impl std::fmt::Debug for WeatherConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WeatherConfig")
            .field("openweather_api_key", &redact(&self.openweather_api_key))
            .field("geocoding_url", &self.geocoding_url)
            .field("forecast_url", &self.forecast_url)
            .field("openweather_url", &self.openweather_url)
            .field("default_location", &self.default_location)
            .finish()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Maximum capability executions per query
    #[serde(default = "default_max_steps")]
    pub max_steps: usize,

    /// Wall-clock budget for one query
    #[serde(default = "default_max_duration_secs")]
    pub max_duration_secs: u64,

    /// Keep the last trace of each session for inspection
    #[serde(default)]
    pub retain_traces: bool,

    /// Offer capabilities as native tool calls instead of the text protocol
    #[serde(default)]
    pub native_tool_calls: bool,

    /// Fall back to one web search when the model gives an empty answer
    #[serde(default = "default_true")]
    pub search_fallback: bool,
}

fn default_max_steps() -> usize {
    6
}
fn default_max_duration_secs() -> u64 {
    90
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_steps: default_max_steps(),
            max_duration_secs: default_max_duration_secs(),
            retain_traces: false,
            native_tool_calls: false,
            search_fallback: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryConfig {
    /// Maximum remembered turns (user and assistant each count as one)
    #[serde(default = "default_max_turns")]
    pub max_turns: usize,

    /// Maximum estimated tokens across remembered turns
    #[serde(default = "default_memory_tokens")]
    pub max_tokens: usize,

    /// Idle seconds after which a session is forgotten (0 keeps sessions forever)
    #[serde(default = "default_session_idle_secs")]
    pub session_idle_secs: u64,
}

fn default_max_turns() -> usize {
    20
}
fn default_memory_tokens() -> usize {
    3000
}
fn default_session_idle_secs() -> u64 {
    3600
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            max_turns: default_max_turns(),
            max_tokens: default_memory_tokens(),
            session_idle_secs: default_session_idle_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalConfig {
    /// Passages returned by the retrieval capability
    #[serde(default = "default_top_k")]
    pub top_k: usize,

    /// Passages scoring below this are treated as no grounding
    #[serde(default = "default_min_similarity")]
    pub min_similarity: f32,

    /// Passages injected into the prompt as guide excerpts
    #[serde(default = "default_prompt_hints")]
    pub prompt_hints: usize,

    /// Directory of plain-text guide documents for the built-in index
    #[serde(default = "default_docs_dir")]
    pub docs_dir: PathBuf,

    /// External vector index endpoint; takes precedence over `docs_dir`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub index_url: Option<String>,
}

fn default_top_k() -> usize {
    4
}
fn default_min_similarity() -> f32 {
    0.15
}
fn default_prompt_hints() -> usize {
    2
}
fn default_docs_dir() -> PathBuf {
    AppConfig::config_dir().join("guides")
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
            min_similarity: default_min_similarity(),
            prompt_hints: default_prompt_hints(),
            docs_dir: default_docs_dir(),
            index_url: None,
        }
    }
}

#[derive(Clone, Serialize, Deserialize)]
pub struct WeatherConfig {
    /// OpenWeatherMap key; without it current conditions come from Open-Meteo
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub openweather_api_key: Option<String>,

    #[serde(default = "default_geocoding_url")]
    pub geocoding_url: String,

    #[serde(default = "default_forecast_url")]
    pub forecast_url: String,

    #[serde(default = "default_openweather_url")]
    pub openweather_url: String,

    /// Location used when a query names none
    #[serde(default = "default_location")]
    pub default_location: String,
}

fn default_geocoding_url() -> String {
    "https://geocoding-api.open-meteo.com/v1/search".into()
}
fn default_forecast_url() -> String {
    "https://api.open-meteo.com/v1/forecast".into()
}
fn default_openweather_url() -> String {
    "https://api.openweathermap.org/data/2.5/weather".into()
}
fn default_location() -> String {
    "Hobart".into()
}

impl Default for WeatherConfig {
    fn default() -> Self {
        Self {
            openweather_api_key: None,
            geocoding_url: default_geocoding_url(),
            forecast_url: default_forecast_url(),
            openweather_url: default_openweather_url(),
            default_location: default_location(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchConfig {
    #[serde(default = "default_search_endpoint")]
    pub endpoint: String,

    #[serde(default = "default_max_results")]
    pub max_results: usize,
}

fn default_search_endpoint() -> String {
    "https://api.duckduckgo.com/".into()
}
fn default_max_results() -> usize {
    3
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            endpoint: default_search_endpoint(),
            max_results: default_max_results(),
        }
    }
}

/// Per-day prices used when the guide has no price for a category.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BudgetConfig {
    #[serde(default = "default_currency")]
    pub currency: String,

    #[serde(default = "default_accommodation")]
    pub accommodation_per_day: f64,

    #[serde(default = "default_food")]
    pub food_per_day: f64,

    #[serde(default = "default_vehicle")]
    pub vehicle_per_day: f64,

    #[serde(default = "default_days")]
    pub default_days: u32,
}

fn default_currency() -> String {
    "AUD".into()
}
fn default_accommodation() -> f64 {
    70.0
}
fn default_food() -> f64 {
    40.0
}
fn default_vehicle() -> f64 {
    60.0
}
fn default_days() -> u32 {
    3
}

impl Default for BudgetConfig {
    fn default() -> Self {
        Self {
            currency: default_currency(),
            accommodation_per_day: default_accommodation(),
            food_per_day: default_food(),
            vehicle_per_day: default_vehicle(),
            default_days: default_days(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CapabilitiesConfig {
    /// Per-invocation timeout
    #[serde(default = "default_capability_timeout")]
    pub timeout_secs: u64,
}

fn default_capability_timeout() -> u64 {
    15
}

impl Default for CapabilitiesConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_capability_timeout(),
        }
    }
}

#[derive(Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_url: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_model: Option<String>,
}

impl AppConfig {
    /// Load configuration from the default path (~/.backpacker/config.toml).
    ///
    /// Also checks environment variables:
    /// - `BACKPACKER_API_KEY` (highest priority), `OPENROUTER_API_KEY`,
    ///   `OPENAI_API_KEY`, `GOOGLE_API_KEY` for the LLM key
    /// - `BACKPACKER_PROVIDER`, `BACKPACKER_MODEL`
    /// - `OPENWEATHERMAP_API_KEY`
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::config_dir().join("config.toml");
        let mut config = Self::load_from(&config_path)?;
        config.apply_env(|name| std::env::var(name).ok());
        Ok(config)
    }

    /// Load configuration from a specific file path.
    ///
    /// `${VAR}` placeholders in secret fields are resolved from the environment.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::info!("No config file found at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let mut config: Self = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        config.resolve_placeholders(|name| std::env::var(name).ok());
        config.validate()?;
        tracing::info!(path = %path.display(), "Loaded config");
        Ok(config)
    }

    fn apply_env(&mut self, env: impl Fn(&str) -> Option<String>) {
        if self.api_key.is_none() {
            self.api_key = env("BACKPACKER_API_KEY")
                .or_else(|| env("OPENROUTER_API_KEY"))
                .or_else(|| env("OPENAI_API_KEY"))
                .or_else(|| env("GOOGLE_API_KEY"));
        }

        if let Some(provider) = env("BACKPACKER_PROVIDER") {
            self.default_provider = provider;
        }

        if let Some(model) = env("BACKPACKER_MODEL") {
            self.default_model = model;
        }

        if self.weather.openweather_api_key.is_none() {
            self.weather.openweather_api_key = env("OPENWEATHERMAP_API_KEY");
        }

        if self.api_key.is_none() {
            tracing::warn!("No LLM API key found in config or environment");
        }
    }

    fn resolve_placeholders(&mut self, env: impl Fn(&str) -> Option<String>) {
        resolve_secret(&mut self.api_key, &env);
        resolve_secret(&mut self.weather.openweather_api_key, &env);
        for provider in self.providers.values_mut() {
            resolve_secret(&mut provider.api_key, &env);
        }
    }

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".backpacker")
    }

    /// Validate the configuration.
    fn validate(&self) -> Result<(), ConfigError> {
        if self.default_temperature < 0.0 || self.default_temperature > 2.0 {
            return Err(ConfigError::ValidationError(
                "default_temperature must be between 0.0 and 2.0".into(),
            ));
        }

        if self.agent.max_steps == 0 {
            return Err(ConfigError::ValidationError(
                "agent.max_steps must be at least 1".into(),
            ));
        }

        if self.retrieval.top_k == 0 {
            return Err(ConfigError::ValidationError(
                "retrieval.top_k must be at least 1".into(),
            ));
        }

        if !(0.0..=1.0).contains(&self.retrieval.min_similarity) {
            return Err(ConfigError::ValidationError(
                "retrieval.min_similarity must be between 0.0 and 1.0".into(),
            ));
        }

        if self.capabilities.timeout_secs == 0 {
            return Err(ConfigError::ValidationError(
                "capabilities.timeout_secs must be > 0".into(),
            ));
        }

        Ok(())
    }

    /// Check if an API key is available (from config or environment).
    pub fn has_api_key(&self) -> bool {
        self.api_key.is_some()
    }

    /// Generate a default config TOML string (for the `init` command).
    pub fn default_toml() -> String {
        let config = Self::default();
        toml::to_string_pretty(&config).unwrap_or_default()
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            default_provider: default_provider(),
            default_model: default_model(),
            default_temperature: default_temperature(),
            default_max_tokens: default_max_tokens(),
            agent: AgentConfig::default(),
            memory: MemoryConfig::default(),
            retrieval: RetrievalConfig::default(),
            weather: WeatherConfig::default(),
            search: SearchConfig::default(),
            budget: BudgetConfig::default(),
            capabilities: CapabilitiesConfig::default(),
            providers: HashMap::new(),
        }
    }
}

/// Replace a `${VAR}` value with the variable's content, or drop it.
fn resolve_secret(slot: &mut Option<String>, env: &impl Fn(&str) -> Option<String>) {
    let Some(value) = slot.as_deref() else {
        return;
    };
    let Some(name) = value.strip_prefix("${").and_then(|v| v.strip_suffix('}')) else {
        return;
    };
    let resolved = env(name);
    if resolved.is_none() {
        tracing::warn!(var = name, "Environment variable referenced in config is not set");
    }
    *slot = resolved;
}

/// Get the user's home directory.
fn dirs_home() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var("USERPROFILE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("C:\\Users\\Default"))
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/tmp"))
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {reason}")]
    ReadError { path: PathBuf, reason: String },

    #[error("Failed to parse config file at {path}: {reason}")]
    ParseError { path: PathBuf, reason: String },

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}

impl From<ConfigError> for backpacker_core::Error {
    fn from(err: ConfigError) -> Self {
        backpacker_core::Error::Config {
            message: err.to_string(),
        }
    }
}
