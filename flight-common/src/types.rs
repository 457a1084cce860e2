use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Sentinel stored in a field when the upstream page had nothing for it
pub const PLACEHOLDER: &str = "N/A";

/// Wire format of a departure date
pub const DATE_FORMAT: &str = "%Y-%m-%d";

/// True when `value` carries no real data.
pub fn is_placeholder(value: &str) -> bool {
    let value = value.trim();
    value.is_empty() || value == PLACEHOLDER
}

/// The departure date could not be read as `YYYY-MM-DD`
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Invalid departure date format: {0}")]
pub struct InvalidDate(pub String);

/// Raw query triple as received from a caller.
///
/// The date is still text here; turning it into a [`FlightQueryKey`]
/// is the validation step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlightQuery {
    pub airline_code: String,
    pub flight_number: String,
    /// Expected format: YYYY-MM-DD
    pub departure_date: String,
}

impl FlightQuery {
    pub fn new(
        airline_code: impl Into<String>,
        flight_number: impl Into<String>,
        departure_date: impl Into<String>,
    ) -> Self {
        Self {
            airline_code: airline_code.into(),
            flight_number: flight_number.into(),
            departure_date: departure_date.into(),
        }
    }

    /// Validate the date and build the lookup key.
    pub fn to_key(&self) -> Result<FlightQueryKey, InvalidDate> {
        FlightQueryKey::parse(&self.airline_code, &self.flight_number, &self.departure_date)
    }
}

/// Identifies one flight on one calendar day.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FlightQueryKey {
    airline_code: String,
    flight_number: String,
    departure_date: NaiveDate,
}

impl FlightQueryKey {
    pub fn new(
        airline_code: impl Into<String>,
        flight_number: impl Into<String>,
        departure_date: NaiveDate,
    ) -> Self {
        Self {
            airline_code: airline_code.into(),
            flight_number: flight_number.into(),
            departure_date,
        }
    }

    /// Build a key from a textual `YYYY-MM-DD` date.
    ///
    /// The text must be exactly what [`date_string`](Self::date_string)
    /// would print: four-digit year, no sign, no surrounding whitespace.
    pub fn parse(
        airline_code: &str,
        flight_number: &str,
        departure_date: &str,
    ) -> Result<Self, InvalidDate> {
        let invalid = || InvalidDate(departure_date.to_string());
        let date = NaiveDate::parse_from_str(departure_date, DATE_FORMAT).map_err(|_| invalid())?;

        // chrono accepts short and signed years for %Y
        if date.format(DATE_FORMAT).to_string() != departure_date {
            return Err(invalid());
        }
        Ok(Self::new(airline_code, flight_number, date))
    }

    pub fn airline_code(&self) -> &str {
        &self.airline_code
    }

    pub fn flight_number(&self) -> &str {
        &self.flight_number
    }

    pub fn departure_date(&self) -> NaiveDate {
        self.departure_date
    }

    /// Departure date in wire format
    pub fn date_string(&self) -> String {
        self.departure_date.format(DATE_FORMAT).to_string()
    }

    /// Cache key, `flight:{airline}:{number}:{date}`
    pub fn cache_key(&self) -> String {
        format!(
            "flight:{}:{}:{}",
            self.airline_code,
            self.flight_number,
            self.date_string()
        )
    }

    /// Display form of the flight number, e.g. "AA100"
    pub fn display_number(&self) -> String {
        format!("{}{}", self.airline_code, self.flight_number)
    }
}

impl std::fmt::Display for FlightQueryKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} on {}", self.display_number(), self.date_string())
    }
}

impl From<&FlightQueryKey> for FlightQuery {
    fn from(key: &FlightQueryKey) -> Self {
        FlightQuery::new(key.airline_code(), key.flight_number(), key.date_string())
    }
}

/// Status of one flight, as persisted, cached and returned to callers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlightRecord {
    /// Assigned once when the record is first resolved
    pub flight_id: Uuid,
    pub airline_code: String,
    pub flight_number: String,
    pub departure_date: NaiveDate,
    pub departure_airport: String,
    pub arrival_airport: String,
    pub departure_time: String,
    pub arrival_time: String,
    pub status: String,
    pub gate: Option<String>,
}

impl FlightRecord {
    /// The lookup key this record answers
    pub fn key(&self) -> FlightQueryKey {
        FlightQueryKey::new(&self.airline_code, &self.flight_number, self.departure_date)
    }

    /// A record is meaningful when any non-key field holds real data.
    pub fn is_meaningful(&self) -> bool {
        let text_fields = [
            &self.departure_airport,
            &self.arrival_airport,
            &self.departure_time,
            &self.arrival_time,
            &self.status,
        ];

        text_fields.iter().any(|v| !is_placeholder(v))
            || self.gate.as_deref().is_some_and(|g| !is_placeholder(g))
    }

    /// Compare everything except `flight_id`.
    pub fn same_flight_data(&self, other: &FlightRecord) -> bool {
        self.airline_code == other.airline_code
            && self.flight_number == other.flight_number
            && self.departure_date == other.departure_date
            && self.departure_airport == other.departure_airport
            && self.arrival_airport == other.arrival_airport
            && self.departure_time == other.departure_time
            && self.arrival_time == other.arrival_time
            && self.status == other.status
            && self.gate == other.gate
    }
}
