//! Command-line client for the flight lookup service.

use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use serde_json::Value;
use tracing::{error, info};

/// Lookups can fall back to an inline scrape, so allow plenty of time
const REQUEST_TIMEOUT: Duration = Duration::from_secs(240);

#[derive(Debug, Parser)]
#[command(name = "flight-query", version, about = "Query flight status from the flight backend")]
struct Cli {
    /// Airline code, e.g. AA
    airline_code: String,

    /// Flight number, e.g. 100
    flight_number: String,

    /// Departure date as YYYY-MM-DD
    departure_date: String,

    /// Base URL of the flight backend
    #[arg(long, env = "FLIGHT_API_URL", default_value = "http://localhost:8000")]
    base_url: String,
}

fn flights_url(base_url: &str) -> String {
    format!("{}/flights/", base_url.trim_end_matches('/'))
}

/// Pull `detail` out of an error body, or fall back to the raw text.
fn error_detail(body: &str) -> String {
    serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|json| json.get("detail").and_then(Value::as_str).map(str::to_string))
        .unwrap_or_else(|| body.to_string())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt().with_target(false).init();

    let cli = Cli::parse();
    let client = reqwest::Client::builder()
        .timeout(REQUEST_TIMEOUT)
        .build()
        .context("Failed to build HTTP client")?;

    info!(
        "Querying {}{} on {} from {}",
        cli.airline_code, cli.flight_number, cli.departure_date, cli.base_url
    );

    let response = client
        .get(flights_url(&cli.base_url))
        .query(&[
            ("airline_code", cli.airline_code.as_str()),
            ("flight_number", cli.flight_number.as_str()),
            ("departure_date", cli.departure_date.as_str()),
        ])
        .send()
        .await
        .with_context(|| format!("Request to {} failed", cli.base_url))?;

    let status = response.status();
    let body = response.text().await.context("Failed to read response body")?;

    if status.is_success() {
        let json: Value = serde_json::from_str(&body).context("Response was not valid JSON")?;
        println!("{}", serde_json::to_string_pretty(&json)?);
    } else {
        error!("Error {}: {}", status.as_u16(), error_detail(&body));
    }

    Ok(())
}
