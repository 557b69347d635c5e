//! Appointment domain: the booked record, its time slot and the validated
//! payloads the booking service consumes.
//!
//! Pure code only. Persistence and the booking workflow live in `slotbook-infra`.

pub mod appointment;
pub mod payload;
pub mod slot;
pub mod validation;

pub use appointment::{
    Appointment, AppointmentFields, AppointmentStatus, ClientIdentity, ContactDetails,
    UnknownStatus,
};
pub use payload::{AppointmentQuery, CreateAppointment, UpdateAppointment};
pub use slot::TimeSlot;
pub use validation::{validate_create, validate_id, validate_query, validate_update};
