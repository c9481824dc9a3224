//! Built-in travel capabilities for Backpacker.
//!
//! Capabilities give the assistant access to the outside world:
//! the local travel guide, current weather, multi-day forecasts,
//! trip budget estimates and web search.

pub mod budget;
pub mod retrieval;
pub mod weather;
pub mod web_search;

use std::sync::Arc;
use std::time::Duration;

use backpacker_config::AppConfig;
use backpacker_core::capability::{CapabilityRegistry, DEFAULT_CAPABILITY_TIMEOUT};
use backpacker_core::error::Result;
use tracing::info;

pub use budget::{BudgetCapability, BudgetEstimator, Category};
pub use retrieval::{
    HttpVectorIndex, InMemoryIndex, Passage, RetrievalCapability, RetrievalService, VectorIndex,
};
pub use weather::{
    CurrentWeatherCapability, ForecastCapability, OpenMeteoClient, OpenWeatherMapClient,
};
pub use web_search::{DuckDuckGoClient, WebSearchAdapter, WebSearchCapability};

/// Everything the assistant needs from this crate: the registry the
/// reasoning loop invokes, plus direct access to retrieval for prompt hints.
pub struct Toolbox {
    pub registry: CapabilityRegistry,
    pub retrieval: RetrievalService,
}

/// Build the retrieval service from config.
///
/// A configured `index_url` wins; otherwise the guide directory is indexed
/// in memory.
pub fn build_retrieval(config: &AppConfig) -> Result<RetrievalService> {
    let timeout = capability_timeout(config);
    let index: Arc<dyn VectorIndex> = match &config.retrieval.index_url {
        Some(url) => {
            info!(url = %url, "Using remote retrieval index");
            Arc::new(HttpVectorIndex::new(url.clone(), timeout))
        }
        None => Arc::new(InMemoryIndex::load_dir(&config.retrieval.docs_dir)?),
    };
    Ok(RetrievalService::new(index, config.retrieval.min_similarity))
}

/// Create the default registry with all built-in capabilities.
///
/// Current conditions come from OpenWeatherMap when a key is configured,
/// Open-Meteo otherwise. Geocoding and forecasts always use Open-Meteo.
pub fn default_toolbox(config: &AppConfig) -> Result<Toolbox> {
    let timeout = capability_timeout(config);
    let retrieval = build_retrieval(config)?;
    let mut registry = CapabilityRegistry::with_default_timeout(timeout);

    registry.register(Arc::new(RetrievalCapability::new(
        retrieval.clone(),
        config.retrieval.top_k,
    )))?;

    let weather = &config.weather;
    let open_meteo = Arc::new(OpenMeteoClient::new(
        weather.geocoding_url.clone(),
        weather.forecast_url.clone(),
        timeout,
    ));
    let current_source: Arc<dyn weather::CurrentConditionsSource> =
        match &weather.openweather_api_key {
            Some(key) => Arc::new(OpenWeatherMapClient::new(
                weather.openweather_url.clone(),
                key.clone(),
                timeout,
            )),
            None => open_meteo.clone(),
        };
    registry.register(Arc::new(CurrentWeatherCapability::new(
        open_meteo.clone(),
        current_source,
        weather.default_location.clone(),
    )))?;
    registry.register(Arc::new(ForecastCapability::new(
        open_meteo.clone(),
        open_meteo,
        weather.default_location.clone(),
    )))?;

    registry.register(Arc::new(BudgetCapability::new(BudgetEstimator::new(
        retrieval.clone(),
        config.budget.clone(),
    ))))?;

    let search = DuckDuckGoClient::new(config.search.endpoint.clone(), timeout);
    registry.register(Arc::new(WebSearchCapability::new(WebSearchAdapter::new(
        Arc::new(search),
        config.search.max_results,
    ))))?;

    info!(capabilities = ?registry.names(), "Capability registry ready");
    Ok(Toolbox {
        registry,
        retrieval,
    })
}

fn capability_timeout(config: &AppConfig) -> Duration {
    match config.capabilities.timeout_secs {
        0 => DEFAULT_CAPABILITY_TIMEOUT,
        secs => Duration::from_secs(secs),
    }
}
