//! Flight record persistence
//!
//! Records are unique per (airline_code, flight_number, departure_date).
//! Creating a record whose key already exists is a [`StoreError::Conflict`];
//! the first write always wins.
//!
//! - `SqliteFlightStore`: durable store, blocking SQLite calls run on the
//!   blocking thread pool
//! - `InMemoryFlightStore`: for tests and minimal deployments

use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::path::Path;
use std::sync::{Arc, Mutex, RwLock};

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use flight_common::{DATE_FORMAT, FlightQueryKey, FlightRecord};
use rusqlite::{Connection, OptionalExtension, params};
use uuid::Uuid;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS flights (
    id                INTEGER PRIMARY KEY AUTOINCREMENT,
    flight_id         TEXT NOT NULL UNIQUE,
    airline_code      TEXT NOT NULL,
    flight_number     TEXT NOT NULL,
    departure_date    TEXT NOT NULL,
    departure_airport TEXT NOT NULL,
    arrival_airport   TEXT NOT NULL,
    departure_time    TEXT NOT NULL,
    arrival_time      TEXT NOT NULL,
    status            TEXT NOT NULL,
    gate              TEXT,
    UNIQUE (airline_code, flight_number, departure_date)
);
CREATE INDEX IF NOT EXISTS idx_flights_airline ON flights (airline_code);
CREATE INDEX IF NOT EXISTS idx_flights_number ON flights (flight_number);

CREATE TABLE IF NOT EXISTS api_log (
    id            INTEGER PRIMARY KEY AUTOINCREMENT,
    api_call_date TEXT NOT NULL,
    api_result    TEXT NOT NULL,
    api_direction TEXT NOT NULL,
    api_payload   TEXT NOT NULL
);
";

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("flight {0} is already stored")]
    Conflict(String),
    #[error("database error: {0}")]
    Database(String),
    #[error("corrupt row: {0}")]
    Corrupt(String),
}

impl From<rusqlite::Error> for StoreError {
    fn from(err: rusqlite::Error) -> Self {
        StoreError::Database(err.to_string())
    }
}

/// One call recorded in the API log
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiLogEntry {
    pub call_date: DateTime<Utc>,
    /// `success`, `invalid_input` or `not_found`
    pub result: String,
    pub direction: String,
    /// JSON with the query and the outcome
    pub payload: String,
}

/// Persistent flight storage.
///
/// Implementations must tolerate concurrent callers without external locking.
#[async_trait]
pub trait FlightStore: Send + Sync {
    async fn find(&self, key: &FlightQueryKey) -> Result<Option<FlightRecord>, StoreError>;

    /// Insert a new record. Never overwrites.
    async fn create(&self, record: &FlightRecord) -> Result<(), StoreError>;

    async fn count(&self) -> Result<usize, StoreError>;

    async fn log_api_call(&self, entry: &ApiLogEntry) -> Result<(), StoreError>;

    /// Backend name for logging
    fn backend_name(&self) -> &'static str;
}

/// SQLite-backed [`FlightStore`]
#[derive(Clone)]
pub struct SqliteFlightStore {
    conn: Arc<Mutex<Connection>>,
}

/// Row as stored, before type conversion
struct FlightRow {
    flight_id: String,
    airline_code: String,
    flight_number: String,
    departure_date: String,
    departure_airport: String,
    arrival_airport: String,
    departure_time: String,
    arrival_time: String,
    status: String,
    gate: Option<String>,
}

impl TryFrom<FlightRow> for FlightRecord {
    type Error = StoreError;

    fn try_from(row: FlightRow) -> Result<Self, Self::Error> {
        let flight_id = Uuid::parse_str(&row.flight_id)
            .map_err(|e| StoreError::Corrupt(format!("flight_id {:?}: {}", row.flight_id, e)))?;
        let departure_date = NaiveDate::parse_from_str(&row.departure_date, DATE_FORMAT)
            .map_err(|e| {
                StoreError::Corrupt(format!("departure_date {:?}: {}", row.departure_date, e))
            })?;

        Ok(FlightRecord {
            flight_id,
            airline_code: row.airline_code,
            flight_number: row.flight_number,
            departure_date,
            departure_airport: row.departure_airport,
            arrival_airport: row.arrival_airport,
            departure_time: row.departure_time,
            arrival_time: row.arrival_time,
            status: row.status,
            gate: row.gate,
        })
    }
}

impl SqliteFlightStore {
    /// Open or create the database file and ensure the schema exists
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        let path = path.as_ref();
        let conn = Connection::open(path)?;
        tracing::info!("Flight store opened at {:?}", path);
        Self::with_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Run `f` against the connection on the blocking pool.
    async fn run<T, F>(&self, f: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T, StoreError> + Send + 'static,
    {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let guard = conn
                .lock()
                .map_err(|e| StoreError::Database(format!("connection lock poisoned: {}", e)))?;
            f(&guard)
        })
        .await
        .map_err(|e| StoreError::Database(format!("store task failed: {}", e)))?
    }
}

#[async_trait]
impl FlightStore for SqliteFlightStore {
    async fn find(&self, key: &FlightQueryKey) -> Result<Option<FlightRecord>, StoreError> {
        let airline = key.airline_code().to_string();
        let number = key.flight_number().to_string();
        let date = key.date_string();

        let row = self
            .run(move |conn| {
                let row = conn
                    .query_row(
                        "SELECT flight_id, airline_code, flight_number, departure_date,
                                departure_airport, arrival_airport, departure_time,
                                arrival_time, status, gate
                         FROM flights
                         WHERE airline_code = ?1 AND flight_number = ?2 AND departure_date = ?3
                         LIMIT 1",
                        params![airline, number, date],
                        |row| {
                            Ok(FlightRow {
                                flight_id: row.get(0)?,
                                airline_code: row.get(1)?,
                                flight_number: row.get(2)?,
                                departure_date: row.get(3)?,
                                departure_airport: row.get(4)?,
                                arrival_airport: row.get(5)?,
                                departure_time: row.get(6)?,
                                arrival_time: row.get(7)?,
                                status: row.get(8)?,
                                gate: row.get(9)?,
                            })
                        },
                    )
                    .optional()?;
                Ok(row)
            })
            .await?;

        row.map(FlightRecord::try_from).transpose()
    }

    async fn create(&self, record: &FlightRecord) -> Result<(), StoreError> {
        let record = record.clone();

        self.run(move |conn| {
            let result = conn.execute(
                "INSERT INTO flights (flight_id, airline_code, flight_number, departure_date,
                                      departure_airport, arrival_airport, departure_time,
                                      arrival_time, status, gate)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                params![
                    record.flight_id.to_string(),
                    record.airline_code,
                    record.flight_number,
                    record.departure_date.format(DATE_FORMAT).to_string(),
                    record.departure_airport,
                    record.arrival_airport,
                    record.departure_time,
                    record.arrival_time,
                    record.status,
                    record.gate,
                ],
            );

            match result {
                Ok(_) => Ok(()),
                Err(rusqlite::Error::SqliteFailure(e, _))
                    if e.code == rusqlite::ErrorCode::ConstraintViolation =>
                {
                    Err(StoreError::Conflict(record.key().to_string()))
                }
                Err(e) => Err(e.into()),
            }
        })
        .await
    }

    async fn count(&self) -> Result<usize, StoreError> {
        self.run(|conn| {
            let count: i64 = conn.query_row("SELECT COUNT(*) FROM flights", [], |row| row.get(0))?;
            Ok(count.max(0) as usize)
        })
        .await
    }

    async fn log_api_call(&self, entry: &ApiLogEntry) -> Result<(), StoreError> {
        let entry = entry.clone();

        self.run(move |conn| {
            conn.execute(
                "INSERT INTO api_log (api_call_date, api_result, api_direction, api_payload)
                 VALUES (?1, ?2, ?3, ?4)",
                params![entry.call_date.to_rfc3339(), entry.result, entry.direction, entry.payload],
            )?;
            Ok(())
        })
        .await
    }

    fn backend_name(&self) -> &'static str {
        "SQLite"
    }
}

/// In-memory [`FlightStore`]. Not durable.
#[derive(Default)]
pub struct InMemoryFlightStore {
    flights: RwLock<HashMap<FlightQueryKey, FlightRecord>>,
    api_log: RwLock<Vec<ApiLogEntry>>,
}

impl InMemoryFlightStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the API log, oldest first
    pub fn api_log(&self) -> Vec<ApiLogEntry> {
        self.api_log
            .read()
            .map(|log| log.clone())
            .unwrap_or_default()
    }
}

fn poisoned<E: std::fmt::Display>(e: E) -> StoreError {
    StoreError::Database(e.to_string())
}

#[async_trait]
impl FlightStore for InMemoryFlightStore {
    async fn find(&self, key: &FlightQueryKey) -> Result<Option<FlightRecord>, StoreError> {
        let flights = self.flights.read().map_err(poisoned)?;
        Ok(flights.get(key).cloned())
    }

    async fn create(&self, record: &FlightRecord) -> Result<(), StoreError> {
        let mut flights = self.flights.write().map_err(poisoned)?;

        match flights.entry(record.key()) {
            Entry::Occupied(existing) => Err(StoreError::Conflict(existing.key().to_string())),
            Entry::Vacant(slot) => {
                slot.insert(record.clone());
                Ok(())
            }
        }
    }

    async fn count(&self) -> Result<usize, StoreError> {
        Ok(self.flights.read().map_err(poisoned)?.len())
    }

    async fn log_api_call(&self, entry: &ApiLogEntry) -> Result<(), StoreError> {
        self.api_log.write().map_err(poisoned)?.push(entry.clone());
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "InMemory"
    }
}
