//! Infrastructure layer: persistence, booking workflow, configuration.

pub mod booking;
pub mod config;
pub mod store;


pub use booking::{BookingError, BookingService};
pub use config::StoreConfig;
