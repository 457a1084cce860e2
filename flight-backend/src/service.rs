//! HTTP surface: flight lookup, health and stats routes.

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Query, State, rejection::QueryRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
};
use chrono::Utc;
use flight_common::FlightQuery;
use serde::{Deserialize, Serialize};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::module::cache::FlightCache;
use crate::module::flight::{LookupError, LookupOrchestrator, TaskQueue};
use crate::module::store::{ApiLogEntry, FlightStore};

const INVALID_DATE_DETAIL: &str = "Invalid date format. Use YYYY-MM-DD";

/// Shared handles for every request
#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<LookupOrchestrator>,
    pub store: Arc<dyn FlightStore>,
    pub cache: Arc<dyn FlightCache>,
    pub queue: Arc<dyn TaskQueue>,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct FlightParams {
    pub airline_code: String,
    pub flight_number: String,
    pub departure_date: String,
}

impl From<FlightParams> for FlightQuery {
    fn from(params: FlightParams) -> Self {
        FlightQuery::new(params.airline_code, params.flight_number, params.departure_date)
    }
}

/// JSON error body: `{"detail": "..."}`
#[derive(Debug, Serialize)]
struct ErrorBody {
    detail: String,
}

fn error_response(status: StatusCode, detail: impl Into<String>) -> Response {
    (status, Json(ErrorBody { detail: detail.into() })).into_response()
}

pub fn create_app(state: AppState) -> Router {
    Router::new()
        .route("/flights/", get(get_flight))
        .route("/flights", get(get_flight))
        .route("/health", get(health_check))
        .route("/stats", get(stats))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn get_flight(
    State(state): State<AppState>,
    params: Result<Query<FlightParams>, QueryRejection>,
) -> Response {
    let Query(params) = match params {
        Ok(params) => params,
        Err(rejection) => {
            warn!("Rejected flight query: {}", rejection.body_text());
            return error_response(StatusCode::BAD_REQUEST, rejection.body_text());
        }
    };

    let query = FlightQuery::from(params);
    let result = state.orchestrator.lookup(&query).await;

    let (api_result, response) = match result {
        Ok(record) => ("success", (StatusCode::OK, Json(record)).into_response()),
        Err(LookupError::InvalidInput(reason)) => {
            warn!("{}", reason);
            ("invalid_input", error_response(StatusCode::BAD_REQUEST, INVALID_DATE_DETAIL))
        }
        Err(e @ LookupError::NotFound(_)) => {
            ("not_found", error_response(StatusCode::NOT_FOUND, e.to_string()))
        }
    };

    record_api_call(state.store.as_ref(), &query, api_result).await;
    response
}

/// Append to the API log; failures never reach the caller.
async fn record_api_call(store: &dyn FlightStore, query: &FlightQuery, result: &str) {
    let payload = serde_json::json!({ "query": query, "result": result }).to_string();
    let entry = ApiLogEntry {
        call_date: Utc::now(),
        result: result.to_string(),
        direction: "inbound".to_string(),
        payload,
    };

    if let Err(e) = store.log_api_call(&entry).await {
        warn!("Failed to record API call in {}: {}", store.backend_name(), e);
    }
}

async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

async fn stats(State(state): State<AppState>) -> Response {
    let stored_flights = match state.store.count().await {
        Ok(count) => count,
        Err(e) => {
            warn!("Failed to count stored flights: {}", e);
            return error_response(StatusCode::SERVICE_UNAVAILABLE, "Store unavailable");
        }
    };

    let stats = serde_json::json!({
        "status": "running",
        "service": "flight-backend",
        "version": env!("CARGO_PKG_VERSION"),
        "stored_flights": stored_flights,
        "store": state.store.backend_name(),
        "cache": state.cache.backend_name(),
        "task_queue": state.queue.backend_name(),
    });
    info!("Stats requested: {} stored flights", stored_flights);
    (StatusCode::OK, Json(stats)).into_response()
}
