pub mod cache;
pub mod flight;
pub mod store;
