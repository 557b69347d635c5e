//! Validated payloads accepted by the booking service.
//!
//! These are produced by [`crate::validation`] and carry already-normalized
//! ids and instants.

use chrono::{DateTime, Utc};
use serde::Serialize;

use slotbook_core::{DomainResult, ServiceId, StaffId, UserId};

use crate::appointment::{Appointment, AppointmentFields, AppointmentStatus, ClientIdentity};
use crate::slot::TimeSlot;

/// Payload for booking a new appointment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateAppointment {
    pub staff_id: StaffId,
    pub service_id: ServiceId,
    pub client: ClientIdentity,
    #[serde(flatten)]
    pub slot: TimeSlot,
    pub notes: Option<String>,
}

impl CreateAppointment {
    /// Column set for a fresh booking. New appointments always start PENDING.
    pub fn into_fields(self) -> AppointmentFields {
        AppointmentFields {
            staff_id: self.staff_id,
            service_id: self.service_id,
            client: self.client,
            slot: self.slot,
            status: AppointmentStatus::Pending,
            notes: self.notes,
        }
    }
}

/// Partial update. `None` means "not provided, keep the stored value".
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateAppointment {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub staff_id: Option<StaffId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub service_id: Option<ServiceId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<UserId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_phone: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_time: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<AppointmentStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

impl UpdateAppointment {
    pub fn status(status: AppointmentStatus) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Overlay the provided fields on `current`.
    ///
    /// The merged slot and client identity are re-validated, so a partial
    /// update can never produce `endTime <= startTime` or an identity with
    /// neither a user nor complete contact details.
    pub fn merge_into(&self, current: &Appointment) -> DomainResult<AppointmentFields> {
        let slot = TimeSlot::new(
            self.start_time.unwrap_or(current.slot.start()),
            self.end_time.unwrap_or(current.slot.end()),
        )?;

        let existing = current.client.contact();
        let client = ClientIdentity::from_columns(
            self.user_id.or(current.client.user_id()),
            self.client_name
                .clone()
                .or_else(|| existing.map(|c| c.client_name.clone())),
            self.client_email
                .clone()
                .or_else(|| existing.map(|c| c.client_email.clone())),
            self.client_phone
                .clone()
                .or_else(|| existing.and_then(|c| c.client_phone.clone())),
        )?;

        Ok(AppointmentFields {
            staff_id: self.staff_id.unwrap_or(current.staff_id),
            service_id: self.service_id.unwrap_or(current.service_id),
            client,
            slot,
            status: self.status.unwrap_or(current.status),
            notes: self.notes.clone().or_else(|| current.notes.clone()),
        })
    }
}

/// Filter criteria for listing appointments.
///
/// `from`/`to` bound the appointment's start time (inclusive on both ends).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AppointmentQuery {
    pub staff_id: Option<StaffId>,
    pub user_id: Option<UserId>,
    pub service_id: Option<ServiceId>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
}

impl AppointmentQuery {
    pub fn for_staff(staff_id: StaffId) -> Self {
        Self {
            staff_id: Some(staff_id),
            ..Self::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::appointment::ContactDetails;
    use chrono::TimeZone;
    use slotbook_core::{AppointmentId, DomainError};

    fn at(hour: u32, minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, hour, minute, 0).unwrap()
    }

    fn stored() -> Appointment {
        Appointment {
            id: AppointmentId::from(3),
            staff_id: StaffId::from(1),
            service_id: ServiceId::from(2),
            client: ClientIdentity::Guest(ContactDetails {
                client_name: "Ada".to_string(),
                client_email: "ada@example.com".to_string(),
                client_phone: Some("555-0100".to_string()),
            }),
            slot: TimeSlot::new(at(10, 0), at(10, 30)).unwrap(),
            status: AppointmentStatus::Pending,
            notes: Some("first visit".to_string()),
            created_at: at(8, 0),
            updated_at: at(8, 0),
        }
    }

    #[test]
    fn create_defaults_to_pending() {
        let payload = CreateAppointment {
            staff_id: StaffId::from(1),
            service_id: ServiceId::from(2),
            client: stored().client,
            slot: TimeSlot::new(at(10, 0), at(10, 30)).unwrap(),
            notes: None,
        };
        assert_eq!(payload.into_fields().status, AppointmentStatus::Pending);
    }

    #[test]
    fn empty_update_keeps_everything() {
        let current = stored();
        let update = UpdateAppointment::default();
        assert!(update.is_empty());
        assert_eq!(update.merge_into(&current).unwrap(), current.fields());
    }

    #[test]
    fn merge_replaces_only_provided_fields() {
        let current = stored();
        let update = UpdateAppointment {
            end_time: Some(at(11, 0)),
            client_email: Some("ada@lovelace.dev".to_string()),
            ..UpdateAppointment::default()
        };

        let merged = update.merge_into(&current).unwrap();
        assert_eq!(merged.slot.start(), at(10, 0));
        assert_eq!(merged.slot.end(), at(11, 0));
        let contact = merged.client.contact().unwrap();
        assert_eq!(contact.client_name, "Ada");
        assert_eq!(contact.client_email, "ada@lovelace.dev");
        assert_eq!(contact.client_phone.as_deref(), Some("555-0100"));
        assert_eq!(merged.notes.as_deref(), Some("first visit"));
    }

    #[test]
    fn merge_rejects_inverted_slot() {
        let update = UpdateAppointment {
            start_time: Some(at(10, 45)),
            ..UpdateAppointment::default()
        };
        let err = update.merge_into(&stored()).unwrap_err();
        assert!(matches!(err, DomainError::InvariantViolation(_)));
    }

    #[test]
    fn merge_can_attach_a_registered_user() {
        let update = UpdateAppointment {
            user_id: Some(UserId::from(12)),
            ..UpdateAppointment::default()
        };
        let merged = update.merge_into(&stored()).unwrap();
        assert_eq!(merged.client.user_id(), Some(UserId::from(12)));
        assert!(merged.client.contact().is_some());
    }

    #[test]
    fn status_update_only_touches_status() {
        let merged = UpdateAppointment::status(AppointmentStatus::Cancelled)
            .merge_into(&stored())
            .unwrap();
        assert_eq!(merged.status, AppointmentStatus::Cancelled);
        assert_eq!(merged.slot, stored().slot);
    }
}
