//! The persisted appointment record, its status lifecycle and client identity.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use slotbook_core::{AppointmentId, DomainError, DomainResult, ServiceId, StaffId, UserId};

use crate::slot::TimeSlot;

/// Appointment status lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AppointmentStatus {
    Pending,
    Confirmed,
    Cancelled,
    Completed,
}

impl AppointmentStatus {
    /// Statuses that hold a slot and therefore participate in conflict checks.
    pub const ACTIVE: [AppointmentStatus; 2] = [Self::Pending, Self::Confirmed];

    pub fn is_active(self) -> bool {
        Self::ACTIVE.contains(&self)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Confirmed => "CONFIRMED",
            Self::Cancelled => "CANCELLED",
            Self::Completed => "COMPLETED",
        }
    }
}

impl core::fmt::Display for AppointmentStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown appointment status '{0}' (expected PENDING, CONFIRMED, CANCELLED or COMPLETED)")]
pub struct UnknownStatus(pub String);

impl core::str::FromStr for AppointmentStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "PENDING" => Ok(Self::Pending),
            "CONFIRMED" => Ok(Self::Confirmed),
            "CANCELLED" => Ok(Self::Cancelled),
            "COMPLETED" => Ok(Self::Completed),
            _ => Err(UnknownStatus(s.to_string())),
        }
    }
}

/// Ad-hoc contact fields for a client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContactDetails {
    pub client_name: String,
    pub client_email: String,
    pub client_phone: Option<String>,
}

/// Who the appointment is for.
///
/// A registered user may still carry contact details (e.g. a different phone
/// number for this booking); a guest must.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum ClientIdentity {
    #[serde(rename_all = "camelCase")]
    Registered {
        user_id: UserId,
        contact: Option<ContactDetails>,
    },
    Guest(ContactDetails),
}

impl ClientIdentity {
    pub fn user_id(&self) -> Option<UserId> {
        match self {
            Self::Registered { user_id, .. } => Some(*user_id),
            Self::Guest(_) => None,
        }
    }

    pub fn contact(&self) -> Option<&ContactDetails> {
        match self {
            Self::Registered { contact, .. } => contact.as_ref(),
            Self::Guest(contact) => Some(contact),
        }
    }

    /// Rebuild an identity from flat, nullable columns.
    ///
    /// Contact details are all-or-nothing: name and email travel together, and
    /// a phone number without them is rejected.
    pub fn from_columns(
        user_id: Option<UserId>,
        client_name: Option<String>,
        client_email: Option<String>,
        client_phone: Option<String>,
    ) -> DomainResult<Self> {
        let contact = match (client_name, client_email) {
            (Some(client_name), Some(client_email)) => Some(ContactDetails {
                client_name,
                client_email,
                client_phone,
            }),
            (None, None) if client_phone.is_none() => None,
            (None, None) => {
                return Err(DomainError::invariant(
                    "clientPhone requires clientName and clientEmail",
                ));
            }
            (Some(_), None) => {
                return Err(DomainError::invariant(
                    "clientEmail is required when clientName is set",
                ));
            }
            (None, Some(_)) => {
                return Err(DomainError::invariant(
                    "clientName is required when clientEmail is set",
                ));
            }
        };

        match (user_id, contact) {
            (Some(user_id), contact) => Ok(Self::Registered { user_id, contact }),
            (None, Some(contact)) => Ok(Self::Guest(contact)),
            (None, None) => Err(DomainError::invariant(
                "client identity requires a userId or clientName and clientEmail",
            )),
        }
    }
}

/// The mutable column set of an appointment, as written on insert and update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppointmentFields {
    pub staff_id: StaffId,
    pub service_id: ServiceId,
    pub client: ClientIdentity,
    pub slot: TimeSlot,
    pub status: AppointmentStatus,
    pub notes: Option<String>,
}

impl AppointmentFields {
    /// Whether writing `self` over `current` must re-run the overlap check.
    ///
    /// Only writes that leave the appointment active matter, and of those only
    /// the ones that move it (staff or slot) or bring it back from an inactive
    /// status.
    pub fn requires_overlap_check(&self, current: &Appointment) -> bool {
        self.status.is_active()
            && (self.staff_id != current.staff_id
                || self.slot != current.slot
                || !current.status.is_active())
    }
}

/// A persisted appointment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Appointment {
    pub id: AppointmentId,
    pub staff_id: StaffId,
    pub service_id: ServiceId,
    pub client: ClientIdentity,
    #[serde(flatten)]
    pub slot: TimeSlot,
    pub status: AppointmentStatus,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Appointment {
    pub fn is_active(&self) -> bool {
        self.status.is_active()
    }

    pub fn fields(&self) -> AppointmentFields {
        AppointmentFields {
            staff_id: self.staff_id,
            service_id: self.service_id,
            client: self.client.clone(),
            slot: self.slot,
            status: self.status,
            notes: self.notes.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn slot(start_hour: u32, end_hour: u32) -> TimeSlot {
        TimeSlot::new(
            Utc.with_ymd_and_hms(2024, 1, 1, start_hour, 0, 0).unwrap(),
            Utc.with_ymd_and_hms(2024, 1, 1, end_hour, 0, 0).unwrap(),
        )
        .unwrap()
    }

    fn guest() -> ClientIdentity {
        ClientIdentity::Guest(ContactDetails {
            client_name: "Ada".to_string(),
            client_email: "ada@example.com".to_string(),
            client_phone: None,
        })
    }

    fn appointment(status: AppointmentStatus) -> Appointment {
        let now = Utc.with_ymd_and_hms(2023, 12, 1, 0, 0, 0).unwrap();
        Appointment {
            id: AppointmentId::from(1),
            staff_id: StaffId::from(1),
            service_id: ServiceId::from(2),
            client: guest(),
            slot: slot(10, 11),
            status,
            notes: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn only_pending_and_confirmed_are_active() {
        assert!(AppointmentStatus::Pending.is_active());
        assert!(AppointmentStatus::Confirmed.is_active());
        assert!(!AppointmentStatus::Cancelled.is_active());
        assert!(!AppointmentStatus::Completed.is_active());
    }

    #[test]
    fn status_parses_case_insensitively() {
        assert_eq!("confirmed".parse(), Ok(AppointmentStatus::Confirmed));
        assert_eq!("CANCELLED".parse(), Ok(AppointmentStatus::Cancelled));
        assert!("archived".parse::<AppointmentStatus>().is_err());
    }

    #[test]
    fn identity_from_columns_prefers_registered_user() {
        let identity = ClientIdentity::from_columns(Some(UserId::from(9)), None, None, None).unwrap();
        assert_eq!(identity.user_id(), Some(UserId::from(9)));
        assert!(identity.contact().is_none());

        let identity = ClientIdentity::from_columns(
            None,
            Some("Ada".to_string()),
            Some("ada@example.com".to_string()),
            Some("555".to_string()),
        )
        .unwrap();
        assert!(matches!(identity, ClientIdentity::Guest(ref c) if c.client_phone.as_deref() == Some("555")));
    }

    #[test]
    fn identity_from_columns_rejects_incomplete_identities() {
        assert!(ClientIdentity::from_columns(None, None, None, None).is_err());
        assert!(ClientIdentity::from_columns(None, Some("Ada".to_string()), None, None).is_err());
        assert!(
            ClientIdentity::from_columns(Some(UserId::from(1)), None, None, Some("555".to_string()))
                .is_err()
        );
    }

    #[test]
    fn recheck_needed_when_moving_an_active_appointment() {
        let current = appointment(AppointmentStatus::Pending);

        let mut moved = current.fields();
        moved.slot = slot(11, 12);
        assert!(moved.requires_overlap_check(&current));

        let mut reassigned = current.fields();
        reassigned.staff_id = StaffId::from(5);
        assert!(reassigned.requires_overlap_check(&current));

        let mut renamed = current.fields();
        renamed.notes = Some("bring forms".to_string());
        assert!(!renamed.requires_overlap_check(&current));
    }

    #[test]
    fn recheck_needed_when_reactivating() {
        let cancelled = appointment(AppointmentStatus::Cancelled);
        let mut reopened = cancelled.fields();
        reopened.status = AppointmentStatus::Pending;
        assert!(reopened.requires_overlap_check(&cancelled));

        let mut still_cancelled = cancelled.fields();
        still_cancelled.slot = slot(14, 15);
        assert!(!still_cancelled.requires_overlap_check(&cancelled));
    }

    #[test]
    fn serializes_with_flat_slot_and_tagged_client() {
        let json = serde_json::to_value(appointment(AppointmentStatus::Pending)).unwrap();
        assert_eq!(json["status"], "PENDING");
        assert_eq!(json["startTime"], "2024-01-01T10:00:00Z");
        assert_eq!(json["client"]["kind"], "guest");
        assert_eq!(json["client"]["clientPhone"], serde_json::Value::Null);
    }
}
