//! Data model shared between the flight lookup server and its clients.

pub mod types;

pub use types::{
    DATE_FORMAT, FlightQuery, FlightQueryKey, FlightRecord, InvalidDate, PLACEHOLDER,
    is_placeholder,
};
