//! Input validation for raw field maps.
//!
//! Two composable stages: [`schema`] checks shape and formats without
//! converting anything, [`transform`] turns the checked strings into typed
//! values and applies cross-field rules. The `validate_*` functions chain the
//! two. Every violation from both stages ends up in one `ValidationError`.

pub mod schema;
pub mod transform;

use serde_json::Value as JsonValue;

use slotbook_core::{AppointmentId, ValidationError};

use crate::payload::{AppointmentQuery, CreateAppointment, UpdateAppointment};

pub fn validate_create(input: &JsonValue) -> Result<CreateAppointment, ValidationError> {
    transform::create(schema::check_create(input))
}

pub fn validate_update(input: &JsonValue) -> Result<UpdateAppointment, ValidationError> {
    transform::update(schema::check_update(input))
}

pub fn validate_query(input: &JsonValue) -> Result<AppointmentQuery, ValidationError> {
    transform::query(schema::check_query(input))
}

/// Validate an appointment id received on its own (e.g. `/appointments/:id`).
pub fn validate_id(input: &JsonValue) -> Result<AppointmentId, ValidationError> {
    transform::id("id", schema::check_id("id", input))
}
