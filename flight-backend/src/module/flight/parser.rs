//! Flight tracker page extraction
//!
//! Turns the HTML of a flight tracker page into [`PartialFlightFields`].
//! Every field is read on its own; a field that cannot be read is logged
//! and replaced by a placeholder, so extraction as a whole never fails.

use flight_common::PLACEHOLDER;
use scraper::{ElementRef, Html, Selector};
use tracing::warn;

/// Fields read from one tracker page
///
/// Text fields hold [`PLACEHOLDER`] when the page had nothing for them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartialFlightFields {
    /// Flight number as printed on the page, e.g. "AA 100"
    pub flight_display_number: Option<String>,
    pub departure_airport: String,
    pub arrival_airport: String,
    pub departure_time: String,
    pub arrival_time: String,
    pub status: String,
    pub gate: Option<String>,
}

impl Default for PartialFlightFields {
    fn default() -> Self {
        Self {
            flight_display_number: None,
            departure_airport: PLACEHOLDER.to_string(),
            arrival_airport: PLACEHOLDER.to_string(),
            departure_time: PLACEHOLDER.to_string(),
            arrival_time: PLACEHOLDER.to_string(),
            status: PLACEHOLDER.to_string(),
            gate: None,
        }
    }
}

/// Why a single field could not be read
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FieldMiss {
    #[error("invalid selector `{0}`")]
    Selector(String),
    #[error("no element matched `{0}`")]
    NoMatch(String),
    #[error("expected 2 elements for `{selector}`, found {found}")]
    Short { selector: String, found: usize },
}

/// Pluggable page extraction.
///
/// Implementations are pure: no I/O, no panics, placeholders for anything
/// they cannot find.
pub trait ExtractionStrategy: Send + Sync {
    /// Name used in logs
    fn name(&self) -> &'static str;

    fn extract(&self, raw: &str) -> PartialFlightFields;
}

/// CSS selectors for the flight tracker markup
#[derive(Debug, Clone)]
pub struct FlightStatsSelectors {
    pub flight_number: String,
    /// Departure and arrival airport, in page order
    pub airports: String,
    pub status: String,
    /// Departure and arrival time, in page order
    pub times: String,
    pub gate: String,
}

impl Default for FlightStatsSelectors {
    fn default() -> Self {
        Self {
            flight_number: "div[class*='FlightNumberContainer']".to_string(),
            airports: "div[class*='TextHelper'][class*='CPamx']".to_string(),
            status: "div[class*='TextHelper'][class*='bcmzUJ']".to_string(),
            times: "div[class*='TextHelper'][class*='cCfBRT']".to_string(),
            gate: "div[class*='TGBValue']".to_string(),
        }
    }
}

/// Extraction strategy for the flight tracker pages
#[derive(Debug, Clone, Default)]
pub struct FlightStatsExtractor {
    selectors: FlightStatsSelectors,
}

impl FlightStatsExtractor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_selectors(selectors: FlightStatsSelectors) -> Self {
        Self { selectors }
    }
}

impl ExtractionStrategy for FlightStatsExtractor {
    fn name(&self) -> &'static str {
        "flightstats"
    }

    fn extract(&self, raw: &str) -> PartialFlightFields {
        let document = Html::parse_document(raw);
        let sel = &self.selectors;

        let flight_display_number =
            absorb("flight number", first_text(&document, &sel.flight_number));

        let (departure_airport, arrival_airport) = text_pair(&document, &sel.airports);
        let (departure_time, arrival_time) = text_pair(&document, &sel.times);

        PartialFlightFields {
            flight_display_number,
            departure_airport: or_placeholder(absorb("departure airport", departure_airport)),
            arrival_airport: or_placeholder(absorb("arrival airport", arrival_airport)),
            departure_time: or_placeholder(absorb("departure time", departure_time)),
            arrival_time: or_placeholder(absorb("arrival time", arrival_time)),
            status: or_placeholder(absorb("status", first_text(&document, &sel.status))),
            gate: absorb("gate", first_text(&document, &sel.gate)),
        }
    }
}

/// Log a missed field and drop the error.
fn absorb<T>(field: &str, result: Result<T, FieldMiss>) -> Option<T> {
    match result {
        Ok(value) => Some(value),
        Err(miss) => {
            warn!("Failed to extract {}: {}", field, miss);
            None
        }
    }
}

fn or_placeholder(value: Option<String>) -> String {
    value.unwrap_or_else(|| PLACEHOLDER.to_string())
}

/// Collapse the element's text nodes into one whitespace-normalised string.
fn element_text(element: ElementRef<'_>) -> String {
    element
        .text()
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Non-empty texts of all elements matching `css`, in document order.
fn select_texts(document: &Html, css: &str) -> Result<Vec<String>, FieldMiss> {
    let selector = Selector::parse(css).map_err(|_| FieldMiss::Selector(css.to_string()))?;

    Ok(document
        .select(&selector)
        .map(element_text)
        .filter(|text| !text.is_empty())
        .collect())
}

fn first_text(document: &Html, css: &str) -> Result<String, FieldMiss> {
    select_texts(document, css)?
        .into_iter()
        .next()
        .ok_or_else(|| FieldMiss::NoMatch(css.to_string()))
}

/// First two matches of `css`; each side misses on its own.
fn text_pair(
    document: &Html,
    css: &str,
) -> (Result<String, FieldMiss>, Result<String, FieldMiss>) {
    let texts = match select_texts(document, css) {
        Ok(texts) => texts,
        Err(miss) => return (Err(miss.clone()), Err(miss)),
    };

    let found = texts.len();
    let mut texts = texts.into_iter();

    let first = texts
        .next()
        .ok_or_else(|| FieldMiss::NoMatch(css.to_string()));
    let second = texts.next().ok_or_else(|| FieldMiss::Short {
        selector: css.to_string(),
        found,
    });

    (first, second)
}
