//! Weather adapters: current conditions and daily forecast.
//!
//! Both capabilities resolve a location through a [`Geocoder`] first. The
//! location string is always passed through [`sanitize_location`] before
//! resolution, because embedded dashes and stray punctuation make the
//! geocoder miss. If the cleaned string still does not resolve, the first
//! comma-separated segment is tried before giving up with
//! [`CapabilityError::Geocoding`].
//!
//! Sources:
//! - Open-Meteo: geocoding, daily forecast, and current conditions when no
//!   OpenWeatherMap key is configured.
//! - OpenWeatherMap: current conditions.

use async_trait::async_trait;
use backpacker_core::capability::{
    Capability, CapabilityInput, CapabilityOutput, InputSchema, ParamKind, ParamSpec,
};
use backpacker_core::error::CapabilityError;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Forecast length bounds, in days.
pub const MIN_FORECAST_DAYS: i64 = 1;
pub const MAX_FORECAST_DAYS: i64 = 7;
const DEFAULT_FORECAST_DAYS: i64 = 3;

const DASHES: [char; 6] = ['-', '\u{2010}', '\u{2011}', '\u{2012}', '\u{2013}', '\u{2014}'];

// ── Location handling ─────────────────────────────────────────────────────

/// Normalize a free-form location for geocoding.
///
/// Dashes and apostrophes between two letters are dropped so the halves join
/// (`"Ho-bart"` → `"Hobart"`). Any other punctuation except commas becomes a
/// space. Whitespace is collapsed and each word is capitalized.
pub fn sanitize_location(raw: &str) -> String {
    let chars: Vec<char> = raw.chars().collect();
    let mut cleaned = String::with_capacity(raw.len());
    for (i, &c) in chars.iter().enumerate() {
        if c.is_alphanumeric() || c.is_whitespace() || c == ',' {
            cleaned.push(c);
            continue;
        }
        let joins = DASHES.contains(&c) || c == '\'' || c == '\u{2019}';
        let between_letters = i > 0
            && chars[i - 1].is_alphabetic()
            && chars.get(i + 1).is_some_and(|n| n.is_alphabetic());
        if !(joins && between_letters) {
            cleaned.push(' ');
        }
    }

    cleaned
        .split(',')
        .map(|segment| {
            segment
                .split_whitespace()
                .map(capitalize)
                .collect::<Vec<_>>()
                .join(" ")
        })
        .filter(|segment| !segment.is_empty())
        .collect::<Vec<_>>()
        .join(", ")
}

fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect(),
        None => String::new(),
    }
}

/// A resolved place.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub name: String,
    pub latitude: f64,
    pub longitude: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub country: Option<String>,
}

impl GeoPoint {
    pub fn display_name(&self) -> String {
        match &self.country {
            Some(country) => format!("{}, {country}", self.name),
            None => self.name.clone(),
        }
    }
}

#[async_trait]
pub trait Geocoder: Send + Sync {
    /// `Ok(None)` means the name is unknown; `Err` means the service failed.
    async fn geocode(&self, name: &str) -> Result<Option<GeoPoint>, CapabilityError>;
}

/// Sanitize and resolve, retrying with the first comma segment.
pub async fn resolve_location(
    geocoder: &dyn Geocoder,
    raw: &str,
    default_location: &str,
) -> Result<GeoPoint, CapabilityError> {
    let mut cleaned = sanitize_location(raw);
    if cleaned.is_empty() {
        cleaned = sanitize_location(default_location);
    }

    let mut candidates = vec![cleaned.clone()];
    if let Some((first, _)) = cleaned.split_once(',') {
        let first = first.trim().to_string();
        if !first.is_empty() {
            candidates.push(first);
        }
    }

    for candidate in &candidates {
        if let Some(point) = geocoder.geocode(candidate).await? {
            debug!(raw, resolved = %point.display_name(), "Location resolved");
            return Ok(point);
        }
    }

    Err(CapabilityError::Geocoding {
        location: raw.trim().to_string(),
    })
}

// ── Readings ──────────────────────────────────────────────────────────────

/// A single present-condition reading.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CurrentReading {
    pub temperature_c: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub feels_like_c: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub humidity_pct: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wind_kmh: Option<f64>,
    pub conditions: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_at: Option<String>,
}

impl CurrentReading {
    fn render(&self, place: &GeoPoint) -> String {
        let mut out = format!(
            "Current weather for {}: {:.1}°C",
            place.display_name(),
            self.temperature_c
        );
        if let Some(feels) = self.feels_like_c {
            out.push_str(&format!(" (feels like {feels:.1}°C)"));
        }
        out.push_str(&format!(", {}", self.conditions));
        if let Some(h) = self.humidity_pct {
            out.push_str(&format!(", humidity {h:.0}%"));
        }
        if let Some(w) = self.wind_kmh {
            out.push_str(&format!(", wind {w:.0} km/h"));
        }
        if let Some(at) = &self.observed_at {
            out.push_str(&format!(" (as of {at})"));
        }
        out
    }
}

/// One day of a forecast.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyForecast {
    pub date: NaiveDate,
    pub low: f64,
    pub high: f64,
    pub precipitation: f64,
}

impl DailyForecast {
    fn render(&self) -> String {
        format!(
            "• {}: low {:.1}°C, high {:.1}°C, rain {:.1} mm",
            self.date.format("%a, %d %b %Y"),
            self.low,
            self.high,
            self.precipitation
        )
    }
}

#[async_trait]
pub trait CurrentConditionsSource: Send + Sync {
    /// Attribution shown in the answer's sources.
    fn source_name(&self) -> &str;

    async fn current(&self, place: &GeoPoint) -> Result<CurrentReading, CapabilityError>;
}

#[async_trait]
pub trait ForecastSource: Send + Sync {
    fn source_name(&self) -> &str;

    /// Daily entries starting tomorrow, at most `days` of them.
    async fn daily(
        &self,
        place: &GeoPoint,
        days: usize,
    ) -> Result<Vec<DailyForecast>, CapabilityError>;
}

// ── Open-Meteo ────────────────────────────────────────────────────────────

fn unavailable(service: &str, reason: impl ToString) -> CapabilityError {
    CapabilityError::UpstreamUnavailable {
        service: service.to_string(),
        reason: reason.to_string(),
    }
}

fn http_client(timeout: Duration) -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .unwrap_or_default()
}

async fn get_text(
    client: &reqwest::Client,
    service: &str,
    url: &str,
    query: &[(&str, String)],
) -> Result<String, CapabilityError> {
    debug!(service, url, "Weather request");
    let response = client
        .get(url)
        .query(query)
        .send()
        .await
        .map_err(|e| unavailable(service, e))?;
    let status = response.status();
    if !status.is_success() {
        return Err(unavailable(service, format!("HTTP {}", status.as_u16())));
    }
    response.text().await.map_err(|e| unavailable(service, e))
}

/// Open-Meteo geocoding and forecast API client.
pub struct OpenMeteoClient {
    geocoding_url: String,
    forecast_url: String,
    client: reqwest::Client,
}

impl OpenMeteoClient {
    const SERVICE: &'static str = "Open-Meteo";

    pub fn new(
        geocoding_url: impl Into<String>,
        forecast_url: impl Into<String>,
        timeout: Duration,
    ) -> Self {
        Self {
            geocoding_url: geocoding_url.into(),
            forecast_url: forecast_url.into(),
            client: http_client(timeout),
        }
    }

    fn coordinates(place: &GeoPoint) -> Vec<(&'static str, String)> {
        vec![
            ("latitude", place.latitude.to_string()),
            ("longitude", place.longitude.to_string()),
            ("timezone", "auto".to_string()),
        ]
    }
}

#[derive(Deserialize)]
struct GeocodingResponse {
    #[serde(default)]
    results: Vec<GeoPoint>,
}

pub fn parse_geocoding(body: &str) -> Result<Option<GeoPoint>, CapabilityError> {
    let response: GeocodingResponse =
        serde_json::from_str(body).map_err(|e| unavailable(OpenMeteoClient::SERVICE, e))?;
    Ok(response.results.into_iter().next())
}

#[derive(Deserialize)]
struct DailyResponse {
    daily: DailySeries,
}

#[derive(Deserialize)]
struct DailySeries {
    time: Vec<String>,
    temperature_2m_max: Vec<Option<f64>>,
    temperature_2m_min: Vec<Option<f64>>,
    precipitation_sum: Vec<Option<f64>>,
}

/// Parse a daily forecast body, skipping today (index 0).
pub fn parse_daily(body: &str, days: usize) -> Result<Vec<DailyForecast>, CapabilityError> {
    let service = OpenMeteoClient::SERVICE;
    let response: DailyResponse = serde_json::from_str(body).map_err(|e| unavailable(service, e))?;
    let series = response.daily;

    let mut entries = Vec::with_capacity(days);
    for i in 1..series.time.len() {
        if entries.len() == days {
            break;
        }
        let date = NaiveDate::parse_from_str(&series.time[i], "%Y-%m-%d")
            .map_err(|e| unavailable(service, format!("bad date '{}': {e}", series.time[i])))?;
        let value = |v: &[Option<f64>]| v.get(i).copied().flatten();
        let high = value(&series.temperature_2m_max[..]);
        let low = value(&series.temperature_2m_min[..]);
        let (Some(high), Some(low)) = (high, low) else {
            continue;
        };
        entries.push(DailyForecast {
            date,
            low,
            high,
            precipitation: value(&series.precipitation_sum[..]).unwrap_or(0.0),
        });
    }

    if entries.is_empty() {
        return Err(unavailable(service, "forecast contained no usable days"));
    }
    Ok(entries)
}

#[derive(Deserialize)]
struct OpenMeteoCurrentResponse {
    current: OpenMeteoCurrent,
}

#[derive(Deserialize)]
struct OpenMeteoCurrent {
    #[serde(default)]
    time: Option<String>,
    temperature_2m: f64,
    #[serde(default)]
    apparent_temperature: Option<f64>,
    #[serde(default)]
    relative_humidity_2m: Option<f64>,
    #[serde(default)]
    wind_speed_10m: Option<f64>,
    #[serde(default)]
    weather_code: Option<u32>,
}

pub fn parse_open_meteo_current(body: &str) -> Result<CurrentReading, CapabilityError> {
    let response: OpenMeteoCurrentResponse =
        serde_json::from_str(body).map_err(|e| unavailable(OpenMeteoClient::SERVICE, e))?;
    let c = response.current;
    Ok(CurrentReading {
        temperature_c: c.temperature_2m,
        feels_like_c: c.apparent_temperature,
        humidity_pct: c.relative_humidity_2m,
        wind_kmh: c.wind_speed_10m,
        conditions: describe_weather_code(c.weather_code.unwrap_or(u32::MAX)).to_string(),
        observed_at: c.time,
    })
}

/// WMO weather interpretation codes as used by Open-Meteo.
pub fn describe_weather_code(code: u32) -> &'static str {
    match code {
        0 => "clear sky",
        1 => "mainly clear",
        2 => "partly cloudy",
        3 => "overcast",
        45 | 48 => "fog",
        51 | 53 | 55 => "drizzle",
        56 | 57 => "freezing drizzle",
        61 | 63 => "rain",
        65 => "heavy rain",
        66 | 67 => "freezing rain",
        71 | 73 | 75 | 77 => "snow",
        80..=82 => "rain showers",
        85 | 86 => "snow showers",
        95 => "thunderstorm",
        96 | 99 => "thunderstorm with hail",
        _ => "conditions unknown",
    }
}

#[async_trait]
impl Geocoder for OpenMeteoClient {
    async fn geocode(&self, name: &str) -> Result<Option<GeoPoint>, CapabilityError> {
        let query = [
            ("name", name.to_string()),
            ("count", "1".to_string()),
            ("language", "en".to_string()),
            ("format", "json".to_string()),
        ];
        let body = get_text(&self.client, Self::SERVICE, &self.geocoding_url, &query).await?;
        parse_geocoding(&body)
    }
}

#[async_trait]
impl ForecastSource for OpenMeteoClient {
    fn source_name(&self) -> &str {
        Self::SERVICE
    }

    async fn daily(
        &self,
        place: &GeoPoint,
        days: usize,
    ) -> Result<Vec<DailyForecast>, CapabilityError> {
        let mut query = Self::coordinates(place);
        query.push((
            "daily",
            "temperature_2m_max,temperature_2m_min,precipitation_sum".to_string(),
        ));
        query.push(("forecast_days", (days + 1).to_string()));
        let body = get_text(&self.client, Self::SERVICE, &self.forecast_url, &query).await?;
        parse_daily(&body, days)
    }
}

#[async_trait]
impl CurrentConditionsSource for OpenMeteoClient {
    fn source_name(&self) -> &str {
        Self::SERVICE
    }

    async fn current(&self, place: &GeoPoint) -> Result<CurrentReading, CapabilityError> {
        let mut query = Self::coordinates(place);
        query.push((
            "current",
            "temperature_2m,apparent_temperature,relative_humidity_2m,wind_speed_10m,weather_code"
                .to_string(),
        ));
        let body = get_text(&self.client, Self::SERVICE, &self.forecast_url, &query).await?;
        parse_open_meteo_current(&body)
    }
}

// ── OpenWeatherMap ────────────────────────────────────────────────────────

/// OpenWeatherMap current-weather client.
pub struct OpenWeatherMapClient {
    url: String,
    api_key: String,
    client: reqwest::Client,
}

impl OpenWeatherMapClient {
    const SERVICE: &'static str = "OpenWeatherMap";

    pub fn new(url: impl Into<String>, api_key: impl Into<String>, timeout: Duration) -> Self {
        Self {
            url: url.into(),
            api_key: api_key.into(),
            client: http_client(timeout),
        }
    }
}

#[derive(Deserialize)]
struct OwmResponse {
    #[serde(default)]
    weather: Vec<OwmWeather>,
    main: OwmMain,
    #[serde(default)]
    wind: Option<OwmWind>,
    #[serde(default)]
    dt: Option<i64>,
}

#[derive(Deserialize)]
struct OwmWeather {
    description: String,
}

#[derive(Deserialize)]
struct OwmMain {
    temp: f64,
    #[serde(default)]
    feels_like: Option<f64>,
    #[serde(default)]
    humidity: Option<f64>,
}

#[derive(Deserialize)]
struct OwmWind {
    speed: f64,
}

pub fn parse_openweather(body: &str) -> Result<CurrentReading, CapabilityError> {
    let r: OwmResponse =
        serde_json::from_str(body).map_err(|e| unavailable(OpenWeatherMapClient::SERVICE, e))?;
    Ok(CurrentReading {
        temperature_c: r.main.temp,
        feels_like_c: r.main.feels_like,
        humidity_pct: r.main.humidity,
        // m/s → km/h
        wind_kmh: r.wind.map(|w| w.speed * 3.6),
        conditions: r
            .weather
            .into_iter()
            .next()
            .map(|w| w.description)
            .unwrap_or_else(|| "conditions unknown".to_string()),
        observed_at: r
            .dt
            .and_then(|ts| chrono::DateTime::from_timestamp(ts, 0))
            .map(|t| t.format("%Y-%m-%d %H:%M UTC").to_string()),
    })
}

#[async_trait]
impl CurrentConditionsSource for OpenWeatherMapClient {
    fn source_name(&self) -> &str {
        Self::SERVICE
    }

    async fn current(&self, place: &GeoPoint) -> Result<CurrentReading, CapabilityError> {
        let query = [
            ("lat", place.latitude.to_string()),
            ("lon", place.longitude.to_string()),
            ("units", "metric".to_string()),
            ("appid", self.api_key.clone()),
        ];
        let body = get_text(&self.client, Self::SERVICE, &self.url, &query).await?;
        parse_openweather(&body)
    }
}

// ── Capabilities ──────────────────────────────────────────────────────────

fn location_param() -> ParamSpec {
    ParamSpec::required(
        "location",
        ParamKind::String,
        "Town or city, e.g. Hobart or Launceston, TAS",
    )
}

/// `current_weather`: one reading of present conditions.
pub struct CurrentWeatherCapability {
    geocoder: Arc<dyn Geocoder>,
    source: Arc<dyn CurrentConditionsSource>,
    default_location: String,
}

impl CurrentWeatherCapability {
    pub fn new(
        geocoder: Arc<dyn Geocoder>,
        source: Arc<dyn CurrentConditionsSource>,
        default_location: impl Into<String>,
    ) -> Self {
        Self {
            geocoder,
            source,
            default_location: default_location.into(),
        }
    }
}

#[async_trait]
impl Capability for CurrentWeatherCapability {
    fn name(&self) -> &str {
        "current_weather"
    }

    fn description(&self) -> &str {
        "Get the weather right now at a location: temperature, conditions, humidity and wind. \
         Use only for current conditions, not for future days."
    }

    fn input_schema(&self) -> InputSchema {
        InputSchema::new(vec![location_param()])
    }

    async fn invoke(&self, input: CapabilityInput) -> Result<CapabilityOutput, CapabilityError> {
        let raw = input.str("location").unwrap_or_default();
        let place = resolve_location(self.geocoder.as_ref(), raw, &self.default_location).await?;
        let reading = self.source.current(&place).await?;

        let data = serde_json::json!({
            "location": place.display_name(),
            "current": reading,
        });
        Ok(CapabilityOutput::text(reading.render(&place))
            .with_data(data)
            .with_source(self.source.source_name()))
    }
}

/// `weather_forecast`: daily low/high/rain, starting tomorrow.
pub struct ForecastCapability {
    geocoder: Arc<dyn Geocoder>,
    source: Arc<dyn ForecastSource>,
    default_location: String,
}

impl ForecastCapability {
    pub fn new(
        geocoder: Arc<dyn Geocoder>,
        source: Arc<dyn ForecastSource>,
        default_location: impl Into<String>,
    ) -> Self {
        Self {
            geocoder,
            source,
            default_location: default_location.into(),
        }
    }
}

/// Clamp a requested forecast length to the supported range.
pub fn clamp_days(days: i64) -> usize {
    days.clamp(MIN_FORECAST_DAYS, MAX_FORECAST_DAYS) as usize
}

#[async_trait]
impl Capability for ForecastCapability {
    fn name(&self) -> &str {
        "weather_forecast"
    }

    fn description(&self) -> &str {
        "Get a daily weather forecast (low, high, rain) for the next 1-7 days at a location, \
         starting tomorrow. Use for questions about tomorrow, the weekend or upcoming days."
    }

    fn input_schema(&self) -> InputSchema {
        InputSchema::new(vec![
            location_param(),
            ParamSpec::optional("days", ParamKind::Integer, "Number of days, 1-7 (default 3)"),
        ])
    }

    async fn invoke(&self, input: CapabilityInput) -> Result<CapabilityOutput, CapabilityError> {
        let raw = input.str("location").unwrap_or_default();
        let days = clamp_days(input.int("days").unwrap_or(DEFAULT_FORECAST_DAYS));
        let place = resolve_location(self.geocoder.as_ref(), raw, &self.default_location).await?;

        let mut entries = self.source.daily(&place, days).await?;
        entries.truncate(days);
        if entries.is_empty() {
            return Err(unavailable(self.source.source_name(), "no forecast days returned"));
        }

        let mut lines = vec![format!(
            "{}-day forecast for {}:",
            entries.len(),
            place.display_name()
        )];
        lines.extend(entries.iter().map(DailyForecast::render));

        let data = serde_json::json!({
            "location": place.display_name(),
            "days": entries,
        });
        Ok(CapabilityOutput::text(lines.join("\n"))
            .with_data(data)
            .with_source(self.source.source_name()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Knows a fixed set of place names and records every lookup.
    struct FakeGeocoder {
        known: Vec<GeoPoint>,
        lookups: Mutex<Vec<String>>,
    }

    impl FakeGeocoder {
        fn tasmania() -> Self {
            Self {
                known: vec![GeoPoint {
                    name: "Hobart".into(),
                    latitude: -42.88,
                    longitude: 147.33,
                    country: Some("Australia".into()),
                }],
                lookups: Mutex::new(Vec::new()),
            }
        }

        fn lookups(&self) -> Vec<String> {
            self.lookups.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Geocoder for FakeGeocoder {
        async fn geocode(&self, name: &str) -> Result<Option<GeoPoint>, CapabilityError> {
            self.lookups.lock().unwrap().push(name.to_string());
            Ok(self.known.iter().find(|p| p.name.eq_ignore_ascii_case(name)).cloned())
        }
    }

    struct FakeForecast;

    #[async_trait]
    impl ForecastSource for FakeForecast {
        fn source_name(&self) -> &str {
            "Open-Meteo"
        }

        async fn daily(
            &self,
            _place: &GeoPoint,
            days: usize,
        ) -> Result<Vec<DailyForecast>, CapabilityError> {
            let start = NaiveDate::from_ymd_opt(2026, 10, 17).unwrap();
            Ok((0..days)
                .map(|i| DailyForecast {
                    date: start + chrono::Days::new(i as u64),
                    low: 6.0 + i as f64,
                    high: 15.0 + i as f64,
                    precipitation: 0.5,
                })
                .collect())
        }
    }

    struct FakeCurrent;

    #[async_trait]
    impl CurrentConditionsSource for FakeCurrent {
        fn source_name(&self) -> &str {
            "OpenWeatherMap"
        }

        async fn current(&self, _place: &GeoPoint) -> Result<CurrentReading, CapabilityError> {
            Ok(CurrentReading {
                temperature_c: 12.3,
                feels_like_c: Some(10.0),
                humidity_pct: Some(80.0),
                wind_kmh: Some(20.0),
                conditions: "light rain".into(),
                observed_at: None,
            })
        }
    }

    struct DownForecast;

    #[async_trait]
    impl ForecastSource for DownForecast {
        fn source_name(&self) -> &str {
            "Open-Meteo"
        }

        async fn daily(
            &self,
            _place: &GeoPoint,
            _days: usize,
        ) -> Result<Vec<DailyForecast>, CapabilityError> {
            Err(unavailable("Open-Meteo", "connection reset"))
        }
    }

    fn forecast_cap(geocoder: Arc<FakeGeocoder>) -> ForecastCapability {
        ForecastCapability::new(geocoder, Arc::new(FakeForecast), "Hobart")
    }

    async fn forecast_entries(cap: &ForecastCapability, input: serde_json::Value) -> usize {
        let input = cap.input_schema().validate(input).unwrap();
        let output = cap.invoke(input).await.unwrap();
        output.data.unwrap()["days"].as_array().unwrap().len()
    }

    #[test]
    fn sanitize_joins_embedded_dashes() {
        assert_eq!(sanitize_location("Ho-bart"), "Hobart");
        assert_eq!(sanitize_location("Ho–bart"), "Hobart");
        assert_eq!(sanitize_location("ho—BART"), "Hobart");
        assert_eq!(sanitize_location("Hobart"), "Hobart");
    }

    #[test]
    fn sanitize_strips_punctuation_and_normalizes_commas() {
        assert_eq!(sanitize_location("  launceston ,  tas!! "), "Launceston, Tas");
        assert_eq!(sanitize_location("St. Helens"), "St Helens");
        assert_eq!(sanitize_location("Hobart - Tasmania"), "Hobart Tasmania");
        assert_eq!(sanitize_location("?!"), "");
    }

    #[tokio::test]
    async fn dashed_location_resolves_like_clean_form() {
        let geocoder = FakeGeocoder::tasmania();
        let dashed = resolve_location(&geocoder, "Ho-bart", "Hobart").await.unwrap();
        let clean = resolve_location(&geocoder, "Hobart", "Hobart").await.unwrap();
        assert_eq!(dashed, clean);
        assert_eq!(geocoder.lookups(), vec!["Hobart", "Hobart"]);
    }

    #[tokio::test]
    async fn retries_with_first_comma_segment() {
        let geocoder = FakeGeocoder::tasmania();
        let point = resolve_location(&geocoder, "Hobart, Tasmania, AU", "Hobart").await.unwrap();
        assert_eq!(point.name, "Hobart");
        assert_eq!(geocoder.lookups(), vec!["Hobart, Tasmania, Au", "Hobart"]);
    }

    #[tokio::test]
    async fn unresolvable_location_is_a_geocoding_error() {
        let geocoder = FakeGeocoder::tasmania();
        let err = resolve_location(&geocoder, "Atlantis", "Hobart").await.unwrap_err();
        assert!(matches!(
            err,
            CapabilityError::Geocoding { ref location } if location == "Atlantis"
        ));
    }

    #[tokio::test]
    async fn empty_location_falls_back_to_default() {
        let geocoder = FakeGeocoder::tasmania();
        let point = resolve_location(&geocoder, "???", "Hobart").await.unwrap();
        assert_eq!(point.name, "Hobart");
    }

    #[tokio::test]
    async fn forecast_days_are_clamped() {
        let cap = forecast_cap(Arc::new(FakeGeocoder::tasmania()));
        for (requested, expected) in [(-5, 1), (0, 1), (1, 1), (3, 3), (7, 7), (30, 7)] {
            let input = serde_json::json!({"location": "Hobart", "days": requested});
            let got = forecast_entries(&cap, input).await;
            assert_eq!(got, expected, "days = {requested}");
        }
        assert_eq!(forecast_entries(&cap, serde_json::json!("Hobart")).await, 3);
    }

    #[tokio::test]
    async fn forecast_text_has_one_dated_line_per_day() {
        let cap = forecast_cap(Arc::new(FakeGeocoder::tasmania()));
        let input = cap
            .input_schema()
            .validate(serde_json::json!({"location": "Ho-bart", "days": 3}))
            .unwrap();
        let output = cap.invoke(input).await.unwrap();
        let dated: Vec<&str> = output.content.lines().filter(|l| l.starts_with("• ")).collect();
        assert_eq!(dated.len(), 3);
        assert!(dated[0].starts_with("• Sat, 17 Oct 2026"));
        assert!(output.content.starts_with("3-day forecast for Hobart, Australia"));
        assert_eq!(output.sources, vec!["Open-Meteo"]);
    }

    #[tokio::test]
    async fn forecast_upstream_failure_propagates() {
        let cap = ForecastCapability::new(
            Arc::new(FakeGeocoder::tasmania()),
            Arc::new(DownForecast),
            "Hobart",
        );
        let input = cap.input_schema().validate("Hobart".into()).unwrap();
        let err = cap.invoke(input).await.unwrap_err();
        assert!(matches!(err, CapabilityError::UpstreamUnavailable { .. }));
    }

    #[tokio::test]
    async fn current_weather_is_a_single_reading() {
        let cap = CurrentWeatherCapability::new(
            Arc::new(FakeGeocoder::tasmania()),
            Arc::new(FakeCurrent),
            "Hobart",
        );
        let input = cap.input_schema().validate("Hobart".into()).unwrap();
        let output = cap.invoke(input).await.unwrap();
        let data = output.data.unwrap();
        assert!(data.get("days").is_none());
        assert_eq!(data["current"]["temperature_c"], 12.3);
        assert!(output.content.contains("12.3°C"));
        assert!(output.content.contains("light rain"));
    }

    #[test]
    fn parse_geocoding_response() {
        let body = r#"{"results": [{"name": "Hobart", "latitude": -42.87936,
            "longitude": 147.32941, "country": "Australia", "timezone": "Australia/Hobart"}]}"#;
        let point = parse_geocoding(body).unwrap().unwrap();
        assert_eq!(point.display_name(), "Hobart, Australia");
        assert!(parse_geocoding(r#"{"generationtime_ms": 0.5}"#).unwrap().is_none());
    }

    #[test]
    fn parse_daily_skips_today_and_limits_days() {
        let body = r#"{"daily": {
            "time": ["2026-10-16", "2026-10-17", "2026-10-18", "2026-10-19"],
            "temperature_2m_max": [14.0, 15.5, 17.1, 12.0],
            "temperature_2m_min": [5.0, 6.2, 8.4, 4.1],
            "precipitation_sum": [0.0, 1.2, null, 3.3]
        }}"#;
        let days = parse_daily(body, 2).unwrap();
        assert_eq!(days.len(), 2);
        assert_eq!(days[0].date, NaiveDate::from_ymd_opt(2026, 10, 17).unwrap());
        assert_eq!(days[0].high, 15.5);
        assert_eq!(days[1].precipitation, 0.0);
    }

    #[test]
    fn parse_daily_without_future_days_fails() {
        let body = r#"{"daily": {"time": ["2026-10-16"], "temperature_2m_max": [14.0],
            "temperature_2m_min": [5.0], "precipitation_sum": [0.0]}}"#;
        assert!(parse_daily(body, 3).is_err());
    }

    #[test]
    fn parse_open_meteo_current_maps_weather_code() {
        let body = r#"{"current": {"time": "2026-10-16T14:00", "temperature_2m": 11.4,
            "apparent_temperature": 9.0, "relative_humidity_2m": 71,
            "wind_speed_10m": 18.5, "weather_code": 61}}"#;
        let reading = parse_open_meteo_current(body).unwrap();
        assert_eq!(reading.conditions, "rain");
        assert_eq!(reading.observed_at.as_deref(), Some("2026-10-16T14:00"));
    }

    #[test]
    fn parse_openweather_converts_wind() {
        let body = r#"{"weather": [{"description": "broken clouds"}],
            "main": {"temp": 13.2, "feels_like": 12.1, "humidity": 66},
            "wind": {"speed": 5.0}, "dt": 1792126800}"#;
        let reading = parse_openweather(body).unwrap();
        assert_eq!(reading.conditions, "broken clouds");
        assert_eq!(reading.wind_kmh, Some(18.0));
        assert!(reading.observed_at.is_some());
    }

    #[test]
    fn parse_openweather_error_body_is_upstream_failure() {
        let err = parse_openweather(r#"{"cod": 401, "message": "Invalid API key"}"#).unwrap_err();
        assert!(matches!(err, CapabilityError::UpstreamUnavailable { .. }));
    }
}
