//! Flight resolution: fetch the tracker page, extract, validate, persist, cache.
//!
//! The same [`FlightResolver`] runs on queue workers and inline on the
//! request task.

use std::sync::Arc;
use std::time::Duration;

use flight_common::{FlightQuery, FlightQueryKey, FlightRecord};
use reqwest::header::HeaderMap;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::fetcher::{Fetcher, browser_headers};
use super::parser::{ExtractionStrategy, PartialFlightFields};
use crate::config::AppConfig;
use crate::module::cache::{FlightCache, cache_record};
use crate::module::store::{FlightStore, StoreError};

/// Result of one resolution attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolutionOutcome {
    Success(FlightRecord),
    /// The upstream page had nothing usable, or the input could not be resolved
    NoData(String),
    /// Fetch or persistence failed; worth retrying elsewhere
    TransientError(String),
}

impl ResolutionOutcome {
    pub fn kind(&self) -> &'static str {
        match self {
            ResolutionOutcome::Success(_) => "success",
            ResolutionOutcome::NoData(_) => "no_data",
            ResolutionOutcome::TransientError(_) => "transient_error",
        }
    }
}

#[derive(Debug, Clone)]
pub struct ResolverSettings {
    /// Tracker base URL, e.g. "https://www.flightstats.com/v2/flight-tracker"
    pub base_url: String,
    pub user_agent: String,
    pub cache_ttl: Duration,
}

impl ResolverSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            base_url: config.upstream.base_url.clone(),
            user_agent: config.upstream.user_agent.clone(),
            cache_ttl: config.cache.ttl(),
        }
    }
}

pub struct FlightResolver {
    fetcher: Arc<dyn Fetcher>,
    extractor: Arc<dyn ExtractionStrategy>,
    store: Arc<dyn FlightStore>,
    cache: Arc<dyn FlightCache>,
    headers: HeaderMap,
    settings: ResolverSettings,
}

impl FlightResolver {
    pub fn new(
        fetcher: Arc<dyn Fetcher>,
        extractor: Arc<dyn ExtractionStrategy>,
        store: Arc<dyn FlightStore>,
        cache: Arc<dyn FlightCache>,
        settings: ResolverSettings,
    ) -> Self {
        Self {
            headers: browser_headers(&settings.user_agent),
            fetcher,
            extractor,
            store,
            cache,
            settings,
        }
    }

    /// Tracker URL: `{base}/{airline}/{number}?year=YYYY&month=MM&date=DD`
    pub fn upstream_url(&self, key: &FlightQueryKey) -> String {
        let date = key.departure_date();
        format!(
            "{}/{}/{}?year={}&month={}&date={}",
            self.settings.base_url.trim_end_matches('/'),
            urlencoding::encode(key.airline_code()),
            urlencoding::encode(key.flight_number()),
            date.format("%Y"),
            date.format("%m"),
            date.format("%d"),
        )
    }

    /// Entry point for queue workers, which receive the raw triple.
    pub async fn resolve_query(&self, query: &FlightQuery) -> ResolutionOutcome {
        match query.to_key() {
            Ok(key) => self.resolve(&key).await,
            Err(e) => {
                error!("{} (flight {}{})", e, query.airline_code, query.flight_number);
                ResolutionOutcome::NoData(e.to_string())
            }
        }
    }

    pub async fn resolve(&self, key: &FlightQueryKey) -> ResolutionOutcome {
        let url = self.upstream_url(key);
        debug!("Scraping flight {} from {}", key, url);

        let raw = match self.fetcher.fetch(&url, &self.headers).await {
            Ok(raw) => raw,
            Err(e) => {
                error!("Fetch failed for {}: {}", key, e);
                return ResolutionOutcome::TransientError(format!(
                    "Failed to fetch flight data: {}",
                    e
                ));
            }
        };

        let fields = self.extractor.extract(&raw);
        let display_number = fields
            .flight_display_number
            .clone()
            .unwrap_or_else(|| key.display_number());

        let record = assemble_record(key, fields);
        if !record.is_meaningful() {
            warn!("No valid flight data found for {}", key);
            return ResolutionOutcome::NoData(format!("No flight data available for {}", key));
        }

        match self.store.create(&record).await {
            Ok(()) => {}
            Err(StoreError::Conflict(existing)) => {
                warn!(
                    "Flight {} was stored by a concurrent resolution, keeping the existing record",
                    existing
                );
                return ResolutionOutcome::TransientError(format!(
                    "Flight {} is already stored",
                    existing
                ));
            }
            Err(e) => {
                error!("Database error while storing {}: {}", key, e);
                return ResolutionOutcome::TransientError(format!(
                    "Failed to store flight data: {}",
                    e
                ));
            }
        }

        cache_record(self.cache.as_ref(), &record, self.settings.cache_ttl).await;

        info!(
            "Successfully scraped and stored flight {} ({}) via {}",
            display_number,
            record.flight_id,
            self.extractor.name()
        );
        ResolutionOutcome::Success(record)
    }
}

/// Build a record with a fresh `flight_id`.
fn assemble_record(key: &FlightQueryKey, fields: PartialFlightFields) -> FlightRecord {
    FlightRecord {
        flight_id: Uuid::new_v4(),
        airline_code: key.airline_code().to_string(),
        flight_number: key.flight_number().to_string(),
        departure_date: key.departure_date(),
        departure_airport: fields.departure_airport,
        arrival_airport: fields.arrival_airport,
        departure_time: fields.departure_time,
        arrival_time: fields.arrival_time,
        status: fields.status,
        gate: fields.gate,
    }
}
