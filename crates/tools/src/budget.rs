//! Trip budget estimation from guide prices.
//!
//! For each requested category the estimator asks the retrieval service for
//! `"{category} {destination}"` and takes the first price found in a passage
//! that mentions both the destination and the category. Categories without a
//! price fall back to the configured default and are flagged `uses_default`.
//! Each line also carries a short excerpt of the best matching passage, so
//! the reader sees what the guide actually says about that category.
//! Estimation never fails: a retrieval outage degrades every line to its
//! default.

use async_trait::async_trait;
use backpacker_config::BudgetConfig;
use backpacker_core::capability::{
    Capability, CapabilityInput, CapabilityOutput, InputSchema, ParamKind, ParamSpec,
};
use backpacker_core::error::CapabilityError;
use regex::Regex;
use serde::Serialize;
use std::fmt::Write as _;
use std::sync::LazyLock;
use tracing::{debug, warn};

use crate::retrieval::RetrievalService;

/// Passages inspected per category.
const PRICE_SEARCH_K: usize = 5;

/// Longest guide excerpt shown per line item.
const HIGHLIGHT_CHARS: usize = 180;

static PRICE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(concat!(
        r"(?i)(?:\$|\baud\s*\$?)\s*(\d{1,5}(?:\.\d{1,2})?)",
        r"|\b(\d{1,5}(?:\.\d{1,2})?)\s*(?:aud|dollars)\b",
    ))
    .expect("price pattern is valid")
});

/// A cost category of a trip.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Accommodation,
    Food,
    Vehicle,
}

impl Category {
    pub const ALL: [Category; 3] = [Category::Accommodation, Category::Food, Category::Vehicle];

    pub fn as_str(self) -> &'static str {
        match self {
            Category::Accommodation => "accommodation",
            Category::Food => "food",
            Category::Vehicle => "vehicle",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.as_str().eq_ignore_ascii_case(s.trim()))
    }

    fn label(self) -> &'static str {
        match self {
            Category::Accommodation => "Accommodation",
            Category::Food => "Food",
            Category::Vehicle => "Vehicle rental",
        }
    }

    /// Words that mark a passage as being about this category.
    fn keywords(self) -> &'static [&'static str] {
        match self {
            Category::Accommodation => &[
                "accommodation", "hostel", "dorm", "camp", "hotel", "motel", "lodge", "stay",
                "night",
            ],
            Category::Food => &[
                "food", "meal", "cafe", "café", "restaurant", "eat", "groceries", "lunch",
                "dinner", "breakfast",
            ],
            Category::Vehicle => &[
                "vehicle", "car", "rental", "hire", "campervan", "van", "fuel",
            ],
        }
    }

    fn default_price(self, defaults: &BudgetConfig) -> f64 {
        match self {
            Category::Accommodation => defaults.accommodation_per_day,
            Category::Food => defaults.food_per_day,
            Category::Vehicle => defaults.vehicle_per_day,
        }
    }
}

/// One category of the breakdown.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LineItem {
    pub category: Category,
    pub unit_price: f64,
    pub subtotal: f64,
    pub uses_default: bool,
    /// Guide passage the price came from.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub evidence: Option<String>,
    /// Short excerpt of the guide's options for this category.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub highlight: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BudgetBreakdown {
    pub destination: String,
    pub days: u32,
    pub currency: String,
    pub lines: Vec<LineItem>,
    pub total: f64,
}

impl BudgetBreakdown {
    pub fn render(&self) -> String {
        let mut out = format!(
            "Trip budget for {} ({} days, {}):\n",
            self.destination, self.days, self.currency
        );
        for line in &self.lines {
            let provenance = match (&line.evidence, line.uses_default) {
                (_, true) => "estimate, default price".to_string(),
                (Some(doc), false) => format!("from guide: {doc}"),
                (None, false) => "from guide".to_string(),
            };
            let _ = writeln!(
                out,
                "• {}: ${:.2} × {} = ${:.2} ({provenance})",
                line.category.label(),
                line.unit_price,
                self.days,
                line.subtotal
            );
            if let Some(highlight) = &line.highlight {
                let _ = writeln!(out, "  {highlight}");
            }
        }
        let _ = write!(out, "Estimated total: ${:.2} {}", self.total, self.currency);
        if self.lines.iter().any(|l| l.uses_default) {
            out.push_str(
                "\nLines marked 'estimate' use default prices because the guide lists none.",
            );
        }
        out
    }
}

/// The first two lines of a passage, whitespace-collapsed and capped.
pub fn summarize_passage(text: &str) -> String {
    let joined = text
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .take(2)
        .collect::<Vec<_>>()
        .join(" ");
    let collapsed = joined.split_whitespace().collect::<Vec<_>>().join(" ");
    if collapsed.chars().count() <= HIGHLIGHT_CHARS {
        return collapsed;
    }
    let cut: String = collapsed.chars().take(HIGHLIGHT_CHARS).collect();
    format!("{}...", cut.trim_end())
}

#[derive(Default)]
struct Lookup {
    price: Option<(f64, String)>,
    highlight: Option<String>,
}

/// Extract the first price in `text` (`$35`, `AUD 55`, `40 dollars`).
pub fn extract_price(text: &str) -> Option<f64> {
    PRICE.captures_iter(text).find_map(|caps| {
        caps.get(1)
            .or_else(|| caps.get(2))
            .and_then(|m| m.as_str().parse::<f64>().ok())
            .filter(|price| *price > 0.0)
    })
}

pub struct BudgetEstimator {
    retrieval: RetrievalService,
    defaults: BudgetConfig,
}

impl BudgetEstimator {
    pub fn new(retrieval: RetrievalService, defaults: BudgetConfig) -> Self {
        Self {
            retrieval,
            defaults,
        }
    }

    pub fn default_days(&self) -> u32 {
        self.defaults.default_days.max(1)
    }

    /// Build a breakdown. An empty `categories` slice means all categories.
    pub async fn estimate(
        &self,
        destination: &str,
        days: u32,
        categories: &[Category],
    ) -> BudgetBreakdown {
        let days = days.max(1);
        let categories: &[Category] = if categories.is_empty() {
            &Category::ALL
        } else {
            categories
        };

        let mut lines = Vec::with_capacity(categories.len());
        for &category in categories {
            let Lookup { price, highlight } = self.lookup(category, destination).await;
            let (unit_price, uses_default, evidence) = match price {
                Some((price, doc_id)) => (price, false, Some(doc_id)),
                None => (category.default_price(&self.defaults), true, None),
            };
            lines.push(LineItem {
                category,
                unit_price,
                subtotal: unit_price * f64::from(days),
                uses_default,
                evidence,
                highlight,
            });
        }

        let total = lines.iter().map(|l| l.subtotal).sum();
        BudgetBreakdown {
            destination: destination.to_string(),
            days,
            currency: self.defaults.currency.clone(),
            lines,
            total,
        }
    }

    /// Price and excerpt for one category, from passages that mention both
    /// the destination and the category.
    async fn lookup(&self, category: Category, destination: &str) -> Lookup {
        let query = format!("{} {destination}", category.as_str());
        let passages = match self.retrieval.search(&query, PRICE_SEARCH_K).await {
            Ok(passages) => passages,
            Err(e) => {
                warn!(
                    category = category.as_str(),
                    error = %e,
                    "Price lookup failed, using default"
                );
                return Lookup::default();
            }
        };

        let destination = destination.to_lowercase();
        let relevant: Vec<_> = passages
            .into_iter()
            .filter(|p| {
                let body = p.text.to_lowercase();
                body.contains(&destination) && category.keywords().iter().any(|k| body.contains(k))
            })
            .collect();

        let priced = relevant
            .iter()
            .find_map(|p| extract_price(&p.text).map(|price| (price, p)));
        let highlight = priced
            .map(|(_, p)| p)
            .or_else(|| relevant.first())
            .map(|p| summarize_passage(&p.text));
        let price = priced.map(|(price, p)| (price, p.doc_id.clone()));

        debug!(category = category.as_str(), found = price.is_some(), "Price lookup");
        Lookup { price, highlight }
    }
}

/// `budget_estimate`: per-category trip cost from guide prices.
pub struct BudgetCapability {
    estimator: BudgetEstimator,
}

impl BudgetCapability {
    pub fn new(estimator: BudgetEstimator) -> Self {
        Self { estimator }
    }
}

#[async_trait]
impl Capability for BudgetCapability {
    fn name(&self) -> &str {
        "budget_estimate"
    }

    fn description(&self) -> &str {
        "Estimate a minimum trip budget for a destination: accommodation, food and \
         vehicle rental per day, using prices from the travel guide where available."
    }

    fn input_schema(&self) -> InputSchema {
        InputSchema::new(vec![
            ParamSpec::required("destination", ParamKind::String, "Town or region, e.g. Hobart"),
            ParamSpec::optional("days", ParamKind::Integer, "Trip length in days").with_minimum(1),
            ParamSpec::optional(
                "categories",
                ParamKind::StringList,
                "Cost categories to include (default: all)",
            )
            .with_allowed(&["accommodation", "food", "vehicle"]),
        ])
    }

    async fn invoke(&self, input: CapabilityInput) -> Result<CapabilityOutput, CapabilityError> {
        let destination = input.str("destination").unwrap_or_default();
        let days = input
            .int("days")
            .map(|d| u32::try_from(d).unwrap_or(u32::MAX))
            .unwrap_or_else(|| self.estimator.default_days());
        let categories: Vec<Category> = input
            .list("categories")
            .unwrap_or_default()
            .iter()
            .filter_map(|c| Category::parse(c))
            .collect();

        let breakdown = self.estimator.estimate(destination, days, &categories).await;
        let data = serde_json::to_value(&breakdown).map_err(|e| CapabilityError::ExecutionFailed {
            capability: self.name().to_string(),
            reason: e.to_string(),
        })?;

        let mut output = CapabilityOutput::text(breakdown.render()).with_data(data);
        for line in &breakdown.lines {
            if let Some(doc) = &line.evidence {
                output = output.with_source(format!("Travel guide ({doc})"));
            }
        }
        Ok(output.with_source("Budget estimator"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::retrieval::{InMemoryIndex, Passage, VectorIndex};
    use backpacker_core::error::RetrievalError;
    use std::sync::Arc;

    struct DownIndex;

    #[async_trait]
    impl VectorIndex for DownIndex {
        async fn search(&self, _q: &str, _k: usize) -> Result<Vec<Passage>, RetrievalError> {
            Err(RetrievalError::Unavailable("timeout".into()))
        }
    }

    fn estimator_over(index: InMemoryIndex) -> BudgetEstimator {
        BudgetEstimator::new(
            RetrievalService::new(Arc::new(index), 0.15),
            BudgetConfig::default(),
        )
    }

    fn hobart_guide() -> InMemoryIndex {
        let mut index = InMemoryIndex::new();
        index.add_document(
            "guide.txt",
            "Hobart hostels cost around $35 per night in a dorm.\n\n\
             Car rental in Hobart starts at AUD 55 per day.\n\n\
             Strahan cafes serve fish and chips for 18 dollars.",
        );
        index
    }

    #[test]
    fn extracts_common_price_formats() {
        assert_eq!(extract_price("beds from $35 a night"), Some(35.0));
        assert_eq!(extract_price("AUD 55 per day"), Some(55.0));
        assert_eq!(extract_price("aud$42.50"), Some(42.5));
        assert_eq!(extract_price("about 18 dollars"), Some(18.0));
        assert_eq!(extract_price("around 20 AUD each"), Some(20.0));
        assert_eq!(extract_price("open 7 days, 2 km from town"), None);
    }

    #[tokio::test]
    async fn uses_guide_prices_where_available() {
        let breakdown = estimator_over(hobart_guide()).estimate("Hobart", 3, &[]).await;
        let accommodation = &breakdown.lines[0];
        assert_eq!(accommodation.category, Category::Accommodation);
        assert_eq!(accommodation.unit_price, 35.0);
        assert!(!accommodation.uses_default);
        assert_eq!(accommodation.evidence.as_deref(), Some("guide.txt#1"));

        let food = &breakdown.lines[1];
        assert!(food.uses_default);
        assert_eq!(food.unit_price, 40.0);

        let vehicle = &breakdown.lines[2];
        assert_eq!(vehicle.unit_price, 55.0);
        assert_eq!(breakdown.total, (35.0 + 40.0 + 55.0) * 3.0);
    }

    #[tokio::test]
    async fn region_without_prices_uses_defaults_everywhere() {
        let breakdown = estimator_over(hobart_guide())
            .estimate("Maria Island", 2, &[])
            .await;
        assert!(breakdown.lines.iter().all(|l| l.uses_default));
        assert_eq!(breakdown.total, (70.0 + 40.0 + 60.0) * 2.0);
        assert!(breakdown.render().contains("estimate, default price"));
    }

    #[tokio::test]
    async fn retrieval_outage_degrades_to_defaults() {
        let estimator = BudgetEstimator::new(
            RetrievalService::new(Arc::new(DownIndex), 0.15),
            BudgetConfig::default(),
        );
        let breakdown = estimator.estimate("Hobart", 1, &[Category::Food]).await;
        assert_eq!(breakdown.lines.len(), 1);
        assert!(breakdown.lines[0].uses_default);
        assert_eq!(breakdown.total, 40.0);
    }

    #[tokio::test]
    async fn capability_honours_categories_and_default_days() {
        let cap = BudgetCapability::new(estimator_over(hobart_guide()));
        let input = cap
            .input_schema()
            .validate(serde_json::json!({"destination": "Hobart", "categories": ["vehicle"]}))
            .unwrap();
        let output = cap.invoke(input).await.unwrap();
        let data = output.data.unwrap();
        assert_eq!(data["days"], 3);
        assert_eq!(data["lines"].as_array().unwrap().len(), 1);
        assert_eq!(data["lines"][0]["category"], "vehicle");
        assert_eq!(data["total"], 165.0);
        assert!(output.sources.contains(&"Travel guide (guide.txt#2)".to_string()));
        assert!(output.content.contains("Estimated total: $165.00 AUD"));
    }

    #[tokio::test]
    async fn line_items_carry_guide_excerpts() {
        let breakdown = estimator_over(hobart_guide()).estimate("Hobart", 2, &[]).await;
        assert_eq!(
            breakdown.lines[0].highlight.as_deref(),
            Some("Hobart hostels cost around $35 per night in a dorm.")
        );
        assert!(breakdown.lines[1].highlight.is_none());
        assert_eq!(
            breakdown.lines[2].highlight.as_deref(),
            Some("Car rental in Hobart starts at AUD 55 per day.")
        );
        let rendered = breakdown.render();
        assert!(rendered.contains("  Hobart hostels cost around $35 per night in a dorm.\n"));
    }

    #[test]
    fn passage_summary_keeps_two_lines_and_caps_length() {
        assert_eq!(
            summarize_passage("Dorm beds at the YHA.\n  Book ahead in summer.\nThird line."),
            "Dorm beds at the YHA. Book ahead in summer."
        );
        let long = "word ".repeat(100);
        let summary = summarize_passage(&long);
        assert!(summary.ends_with("..."));
        assert!(summary.chars().count() <= HIGHLIGHT_CHARS + 3);
    }

    #[test]
    fn category_parse_is_case_insensitive() {
        assert_eq!(Category::parse(" Food "), Some(Category::Food));
        assert_eq!(Category::parse("souvenirs"), None);
    }
}
