//! Query filters understood by every `AppointmentStore`.

use chrono::{DateTime, Utc};

use slotbook_appointments::{Appointment, AppointmentQuery, AppointmentStatus, TimeSlot};
use slotbook_core::{AppointmentId, ServiceId, StaffId, UserId};

/// Range predicate on an instant column. Unset bounds are ignored.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InstantRange {
    pub lt: Option<DateTime<Utc>>,
    pub lte: Option<DateTime<Utc>>,
    pub gt: Option<DateTime<Utc>>,
    pub gte: Option<DateTime<Utc>>,
}

impl InstantRange {
    pub fn contains(&self, t: DateTime<Utc>) -> bool {
        self.lt.is_none_or(|b| t < b)
            && self.lte.is_none_or(|b| t <= b)
            && self.gt.is_none_or(|b| t > b)
            && self.gte.is_none_or(|b| t >= b)
    }
}

/// Filter criteria for appointment lookups.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AppointmentFilter {
    /// Skip this appointment (used when re-checking a record against its neighbours).
    pub exclude_id: Option<AppointmentId>,
    pub staff_id: Option<StaffId>,
    pub user_id: Option<UserId>,
    pub service_id: Option<ServiceId>,
    /// Status set membership; `None` matches every status.
    pub statuses: Option<Vec<AppointmentStatus>>,
    pub start_time: InstantRange,
    pub end_time: InstantRange,
}

impl AppointmentFilter {
    /// Active appointments of `staff_id` that intersect `slot`:
    /// `start_time < slot.end AND end_time > slot.start`.
    pub fn overlapping(staff_id: StaffId, slot: &TimeSlot) -> Self {
        Self {
            staff_id: Some(staff_id),
            statuses: Some(AppointmentStatus::ACTIVE.to_vec()),
            start_time: InstantRange {
                lt: Some(slot.end()),
                ..InstantRange::default()
            },
            end_time: InstantRange {
                gt: Some(slot.start()),
                ..InstantRange::default()
            },
            ..Self::default()
        }
    }

    pub fn for_staff(staff_id: StaffId) -> Self {
        Self {
            staff_id: Some(staff_id),
            ..Self::default()
        }
    }

    pub fn excluding(mut self, id: AppointmentId) -> Self {
        self.exclude_id = Some(id);
        self
    }

    /// Bound the start time inclusively on both ends.
    pub fn starting_within(
        mut self,
        from: Option<DateTime<Utc>>,
        to: Option<DateTime<Utc>>,
    ) -> Self {
        self.start_time.gte = from;
        self.start_time.lte = to;
        self
    }

    pub fn matches(&self, appointment: &Appointment) -> bool {
        self.exclude_id.is_none_or(|id| appointment.id != id)
            && self.staff_id.is_none_or(|id| appointment.staff_id == id)
            && self
                .user_id
                .is_none_or(|id| appointment.client.user_id() == Some(id))
            && self
                .service_id
                .is_none_or(|id| appointment.service_id == id)
            && self
                .statuses
                .as_ref()
                .is_none_or(|set| set.contains(&appointment.status))
            && self.start_time.contains(appointment.slot.start())
            && self.end_time.contains(appointment.slot.end())
    }
}

impl From<&AppointmentQuery> for AppointmentFilter {
    fn from(query: &AppointmentQuery) -> Self {
        Self {
            staff_id: query.staff_id,
            user_id: query.user_id,
            service_id: query.service_id,
            ..Self::default()
        }
        .starting_within(query.from, query.to)
    }
}

/// Result ordering. Ties on start time are broken by id, so listings are stable.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SortOrder {
    #[default]
    StartTimeAsc,
    StartTimeDesc,
}

impl SortOrder {
    pub fn sort(self, appointments: &mut [Appointment]) {
        appointments.sort_by_key(|a| (a.slot.start(), a.id));
        if self == SortOrder::StartTimeDesc {
            appointments.reverse();
        }
    }
}
