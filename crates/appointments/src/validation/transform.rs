//! Stage two: semantic conversion of checked fields.
//!
//! Strings become instants, raw ids become canonical typed ids, and the
//! cross-field rules (slot ordering, client identity completeness, query
//! bounds) are applied. Violations keep accumulating on top of stage one.

use chrono::{DateTime, Utc};

use slotbook_core::id::parse_digits;
use slotbook_core::{DomainError, ServiceId, StaffId, UserId, ValidationError};

use super::schema::{Checked, ClientFields, CreateFields, Field, QueryFields, RawId, UpdateFields};
use crate::appointment::{AppointmentStatus, ClientIdentity, ContactDetails};
use crate::payload::{AppointmentQuery, CreateAppointment, UpdateAppointment};
use crate::slot::TimeSlot;

pub fn create(checked: Checked<CreateFields>) -> Result<CreateAppointment, ValidationError> {
    let Checked { fields, violations } = checked;
    let mut cx = Converter { violations };

    let staff_id = cx.id::<StaffId>("staffId", fields.staff_id);
    let staff_id = cx.required("staffId", staff_id);
    let service_id = cx.id::<ServiceId>("serviceId", fields.service_id);
    let service_id = cx.required("serviceId", service_id);
    let client = cx.client_identity(fields.client);
    let start = cx.instant("startTime", fields.start_time);
    let start = cx.required("startTime", start);
    let end = cx.instant("endTime", fields.end_time);
    let end = cx.required("endTime", end);

    let slot = match (start, end) {
        (Some(start), Some(end)) => cx.slot(start, end),
        _ => None,
    };

    let (Some(staff_id), Some(service_id), Some(client), Some(slot)) =
        (staff_id, service_id, client, slot)
    else {
        return Err(cx.violations);
    };

    cx.violations.into_result(CreateAppointment {
        staff_id,
        service_id,
        client,
        slot,
        notes: fields.notes.present(),
    })
}

pub fn update(checked: Checked<UpdateFields>) -> Result<UpdateAppointment, ValidationError> {
    let Checked { fields, violations } = checked;
    let mut cx = Converter { violations };

    let start_time = cx.instant("startTime", fields.start_time).present();
    let end_time = cx.instant("endTime", fields.end_time).present();
    if let (Some(start), Some(end)) = (start_time, end_time) {
        cx.slot(start, end);
    }

    let payload = UpdateAppointment {
        staff_id: cx.id::<StaffId>("staffId", fields.staff_id).present(),
        service_id: cx.id::<ServiceId>("serviceId", fields.service_id).present(),
        user_id: cx.id::<UserId>("userId", fields.client.user_id).present(),
        client_name: fields.client.client_name.present(),
        client_email: fields.client.client_email.present(),
        client_phone: fields.client.client_phone.present(),
        start_time,
        end_time,
        status: cx.status("status", fields.status).present(),
        notes: fields.notes.present(),
    };

    cx.violations.into_result(payload)
}

pub fn query(checked: Checked<QueryFields>) -> Result<AppointmentQuery, ValidationError> {
    let Checked { fields, violations } = checked;
    let mut cx = Converter { violations };

    let staff_id = cx.id::<StaffId>("staffId", fields.staff_id).present();
    let service_id = cx.id::<ServiceId>("serviceId", fields.service_id).present();
    let user_id = cx.id::<UserId>("userId", fields.user_id).present();
    let client_id = cx.id::<UserId>("clientId", fields.client_id).present();

    // `clientId` is an alias of `userId`; both may be sent as long as they agree.
    let user_id = match (user_id, client_id) {
        (Some(u), Some(c)) if u != c => {
            cx.violations
                .push("clientId", "must match userId when both are provided");
            None
        }
        (u, c) => u.or(c),
    };

    let from = cx.instant("from", fields.from).present();
    let to = cx.instant("to", fields.to).present();
    if let (Some(from), Some(to)) = (from, to) {
        if to < from {
            cx.violations.push("to", "must not be before from");
        }
    }

    cx.violations.into_result(AppointmentQuery {
        staff_id,
        user_id,
        service_id,
        from,
        to,
    })
}

/// Convert a checked standalone id.
pub fn id<T>(field: &str, checked: Checked<Field<RawId>>) -> Result<T, ValidationError>
where
    T: TryFrom<i64, Error = DomainError>,
{
    let Checked { fields, violations } = checked;
    let mut cx = Converter { violations };
    let id = cx.id::<T>(field, fields);
    let id = cx.required(field, id);
    match id {
        Some(id) => cx.violations.into_result(id),
        None => Err(cx.violations),
    }
}

struct Converter {
    violations: ValidationError,
}

impl Converter {
    fn id<T>(&mut self, key: &str, field: Field<RawId>) -> Field<T>
    where
        T: TryFrom<i64, Error = DomainError>,
    {
        let raw = match field {
            Field::Present(raw) => raw,
            Field::Absent => return Field::Absent,
            Field::Invalid => return Field::Invalid,
        };
        let value = match raw {
            RawId::Number(n) => i64::try_from(n).map_err(|_| format!("{n} is out of range")),
            RawId::Digits(s) => parse_digits(&s),
        };
        match value.and_then(|v| T::try_from(v).map_err(|e| e.to_string())) {
            Ok(id) => Field::Present(id),
            Err(reason) => {
                self.violations.push(key, reason);
                Field::Invalid
            }
        }
    }

    fn instant(&mut self, key: &str, field: Field<String>) -> Field<DateTime<Utc>> {
        let raw = match field {
            Field::Present(raw) => raw,
            Field::Absent => return Field::Absent,
            Field::Invalid => return Field::Invalid,
        };
        match DateTime::parse_from_rfc3339(&raw) {
            Ok(dt) => Field::Present(dt.with_timezone(&Utc)),
            Err(_) => {
                self.violations.push(
                    key,
                    "must be an ISO-8601 instant with a timezone (e.g. 2024-01-01T10:00:00Z)",
                );
                Field::Invalid
            }
        }
    }

    fn status(&mut self, key: &str, field: Field<String>) -> Field<AppointmentStatus> {
        let raw = match field {
            Field::Present(raw) => raw,
            Field::Absent => return Field::Absent,
            Field::Invalid => return Field::Invalid,
        };
        match raw.parse::<AppointmentStatus>() {
            Ok(status) => Field::Present(status),
            Err(e) => {
                self.violations.push(key, e.to_string());
                Field::Invalid
            }
        }
    }

    /// Unwrap a required field. Guarantees a recorded violation whenever it
    /// returns `None`.
    fn required<T>(&mut self, key: &str, field: Field<T>) -> Option<T> {
        match field {
            Field::Present(v) => Some(v),
            Field::Absent => {
                self.violations.push(key, "is required");
                None
            }
            Field::Invalid => {
                if !self.violations.has_field(key) {
                    self.violations.push(key, "is invalid");
                }
                None
            }
        }
    }

    fn slot(&mut self, start: DateTime<Utc>, end: DateTime<Utc>) -> Option<TimeSlot> {
        match TimeSlot::new(start, end) {
            Ok(slot) => Some(slot),
            Err(_) => {
                self.violations.push("endTime", "must be after startTime");
                None
            }
        }
    }

    /// Assemble the tagged identity: a registered user, or a guest with
    /// name and email. Contact details travel as a pair.
    fn client_identity(&mut self, client: ClientFields) -> Option<ClientIdentity> {
        let user_id = self.id::<UserId>("userId", client.user_id);
        let name_absent = matches!(client.client_name, Field::Absent);
        let email_absent = matches!(client.client_email, Field::Absent);
        let phone = client.client_phone.present();

        let contact = match (client.client_name, client.client_email) {
            (Field::Present(client_name), Field::Present(client_email)) => Some(ContactDetails {
                client_name,
                client_email,
                client_phone: phone.clone(),
            }),
            _ => None,
        };

        match user_id {
            Field::Invalid => None,
            Field::Present(user_id) => {
                if name_absent && !email_absent {
                    self.violations
                        .push("clientName", "is required when clientEmail is provided");
                } else if email_absent && !name_absent {
                    self.violations
                        .push("clientEmail", "is required when clientName is provided");
                } else if name_absent && email_absent && phone.is_some() {
                    self.violations
                        .push("clientPhone", "requires clientName and clientEmail");
                }
                Some(ClientIdentity::Registered { user_id, contact })
            }
            Field::Absent => {
                if name_absent {
                    self.violations
                        .push("clientName", "is required when userId is not provided");
                }
                if email_absent {
                    self.violations
                        .push("clientEmail", "is required when userId is not provided");
                }
                contact.map(ClientIdentity::Guest)
            }
        }
    }
}
