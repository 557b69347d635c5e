//! Appointment persistence boundary.
//!
//! The booking service only talks to [`AppointmentStore`] and the
//! [`AppointmentTx`] it hands out. Two implementations ship here: an in-memory
//! store for tests/dev and a Postgres store for production.

pub mod filter;
pub mod in_memory;
pub mod postgres;
pub mod r#trait;

pub use filter::{AppointmentFilter, InstantRange, SortOrder};
pub use in_memory::{InMemoryAppointmentStore, InMemoryTx};
pub use postgres::{PgTx, PostgresAppointmentStore};
pub use r#trait::{AppointmentDetails, AppointmentStore, AppointmentTx, StoreError};
