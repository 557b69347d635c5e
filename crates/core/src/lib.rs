//! `slotbook-core` — building blocks shared by the booking crates.
//!
//! Everything here is pure: identifiers, the domain error model and the
//! field-level validation report. No IO, no async.

pub mod error;
pub mod id;
pub mod validation;

pub use error::{DomainError, DomainResult};
pub use id::{AppointmentId, ServiceId, StaffId, UserId};
pub use validation::{FieldViolation, ValidationError};
