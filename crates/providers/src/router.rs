//! Provider router: selects the LLM provider named in config.

use std::collections::HashMap;
use std::sync::Arc;

use backpacker_core::error::ProviderError;
use backpacker_core::provider::Provider;

use crate::openai_compat::OpenAiCompatProvider;

/// Routes LLM requests to the correct provider.
pub struct ProviderRouter {
    providers: HashMap<String, Arc<dyn Provider>>,
    default_provider: String,
}

impl ProviderRouter {
    /// Create a new router with a default provider.
    pub fn new(default_provider: impl Into<String>) -> Self {
        Self {
            providers: HashMap::new(),
            default_provider: default_provider.into(),
        }
    }

    /// Register a provider.
    pub fn register(&mut self, name: impl Into<String>, provider: Arc<dyn Provider>) {
        self.providers.insert(name.into(), provider);
    }

    /// Get the default provider.
    pub fn default(&self) -> Option<Arc<dyn Provider>> {
        self.providers.get(&self.default_provider).cloned()
    }

    /// Get a specific provider by name.
    pub fn get(&self, name: &str) -> Option<Arc<dyn Provider>> {
        self.providers.get(name).cloned()
    }

    /// Resolve `"provider/model"` to a registered provider, or fall back to
    /// the default provider with the string used as the model name.
    pub fn resolve(&self, model: &str) -> Option<(Arc<dyn Provider>, String)> {
        if let Some((prefix, rest)) = model.split_once('/') {
            if let Some(provider) = self.get(prefix) {
                return Some((provider, rest.to_string()));
            }
        }
        self.default().map(|p| (p, model.to_string()))
    }

    /// List all registered provider names, sorted.
    pub fn list(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.providers.keys().map(|s| s.as_str()).collect();
        names.sort_unstable();
        names
    }
}

/// Build providers from configuration.
///
/// Every entry of `[providers]` is registered, and the default provider is
/// added from the top-level key if it has no entry of its own. A provider
/// other than `openai`, `openrouter`, `gemini` or `ollama` must set `api_url`.
pub fn build_from_config(
    config: &backpacker_config::AppConfig,
) -> Result<ProviderRouter, ProviderError> {
    let mut router = ProviderRouter::new(&config.default_provider);

    for (name, provider_config) in &config.providers {
        let api_key = provider_config
            .api_key
            .clone()
            .or_else(|| config.api_key.clone())
            .unwrap_or_default();

        let provider = match &provider_config.api_url {
            Some(url) => OpenAiCompatProvider::new(name, url, api_key),
            None => well_known(name, api_key).ok_or_else(|| {
                ProviderError::NotConfigured(format!("{name}: api_url is required"))
            })?,
        };
        router.register(name.clone(), Arc::new(provider));
    }

    if router.get(&config.default_provider).is_none() {
        let api_key = config.api_key.clone().unwrap_or_default();
        let provider = well_known(&config.default_provider, api_key).ok_or_else(|| {
            ProviderError::NotConfigured(format!(
                "unknown provider '{}', add a [providers.{}] section with api_url",
                config.default_provider, config.default_provider
            ))
        })?;
        router.register(config.default_provider.clone(), Arc::new(provider));
    }

    tracing::debug!(
        providers = ?router.list(),
        default = %config.default_provider,
        "Providers configured"
    );
    Ok(router)
}

/// Providers with a known endpoint.
fn well_known(name: &str, api_key: String) -> Option<OpenAiCompatProvider> {
    let provider = match name {
        "openai" => OpenAiCompatProvider::openai(api_key),
        "openrouter" => OpenAiCompatProvider::openrouter(api_key),
        "gemini" => OpenAiCompatProvider::gemini(api_key),
        "ollama" => OpenAiCompatProvider::ollama(None),
        _ => return None,
    };
    Some(provider)
}
