//! Booking workflow.
//!
//! `BookingService` owns the no-overlap rule: no two active appointments of
//! the same staff member may intersect on `[startTime, endTime)`.
//!
//! ```text
//! create / update
//!   ↓
//! 1. Begin a store transaction
//!   ↓
//! 2. Take the per-staff lock (ascending staff id when more than one)
//!   ↓
//! 3. Probe for the first active overlapping appointment
//!   ↓
//! 4. Conflict → TimeslotConflict (transaction dropped, nothing written)
//!   ↓
//! 5. Write, commit, return the record with its relations
//! ```
//!
//! Steps 2-5 run under the staff lock, so two concurrent bookings for the
//! same staff member are serialized while different staff never wait on each
//! other. Nothing is retried here: conflicts are business outcomes and store
//! failures are returned as they came.

use chrono::{DateTime, Utc};
use thiserror::Error;
use tracing::{debug, info, instrument};

use slotbook_appointments::{
    AppointmentQuery, AppointmentStatus, CreateAppointment, TimeSlot, UpdateAppointment,
};
use slotbook_core::{AppointmentId, DomainError, StaffId, ValidationError};

use crate::store::{
    AppointmentDetails, AppointmentFilter, AppointmentStore, AppointmentTx, SortOrder, StoreError,
};

#[derive(Debug, Error)]
pub enum BookingError {
    /// Input was rejected before reaching the store.
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// The requested slot intersects an active appointment of the same staff member.
    #[error(
        "staff {staff_id} is already booked for {conflicting_slot} by appointment {conflicting_id} (requested {requested})"
    )]
    TimeslotConflict {
        staff_id: StaffId,
        requested: TimeSlot,
        conflicting_id: AppointmentId,
        conflicting_slot: TimeSlot,
    },

    #[error("appointment {0} not found")]
    NotFound(AppointmentId),

    /// A merge would leave the appointment in a state the domain forbids.
    #[error("invariant violation: {0}")]
    InvariantViolation(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl BookingError {
    pub fn is_conflict(&self) -> bool {
        matches!(self, BookingError::TimeslotConflict { .. })
    }
}

impl From<DomainError> for BookingError {
    fn from(value: DomainError) -> Self {
        match value {
            DomainError::Validation(errors) => BookingError::Validation(errors),
            DomainError::InvariantViolation(msg) => BookingError::InvariantViolation(msg),
            DomainError::InvalidId(msg) => {
                BookingError::Validation(ValidationError::single("id", msg))
            }
        }
    }
}

/// Appointment booking on top of an injected [`AppointmentStore`].
#[derive(Debug, Clone)]
pub struct BookingService<S> {
    store: S,
}

impl<S> BookingService<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &S {
        &self.store
    }
}

impl<S> BookingService<S>
where
    S: AppointmentStore,
{
    /// Book a new appointment. It always starts out PENDING.
    #[instrument(skip(self, payload), fields(staff_id = %payload.staff_id, slot = %payload.slot))]
    pub async fn create(
        &self,
        payload: CreateAppointment,
    ) -> Result<AppointmentDetails, BookingError> {
        let fields = payload.into_fields();

        let mut tx = self.store.begin().await?;
        tx.lock_staff(fields.staff_id).await?;
        ensure_slot_free(tx.as_mut(), fields.staff_id, &fields.slot, None).await?;

        let details = tx.insert(&fields).await?;
        tx.commit().await?;

        info!(appointment_id = %details.appointment.id, "appointment booked");
        Ok(details)
    }

    #[instrument(skip(self))]
    pub async fn get_by_id(&self, id: AppointmentId) -> Result<AppointmentDetails, BookingError> {
        self.store
            .find_by_id(id)
            .await?
            .ok_or(BookingError::NotFound(id))
    }

    /// Appointments of one staff member whose start time falls in
    /// `[from, to]` (either bound optional), earliest first.
    #[instrument(skip(self))]
    pub async fn list_for_staff(
        &self,
        staff_id: StaffId,
        from: Option<DateTime<Utc>>,
        to: Option<DateTime<Utc>>,
    ) -> Result<Vec<AppointmentDetails>, BookingError> {
        let query = AppointmentQuery {
            from,
            to,
            ..AppointmentQuery::for_staff(staff_id)
        };
        self.list(&query).await
    }

    /// Filtered listing, earliest start time first.
    #[instrument(skip(self))]
    pub async fn list(
        &self,
        query: &AppointmentQuery,
    ) -> Result<Vec<AppointmentDetails>, BookingError> {
        let found = self
            .store
            .find_many(&AppointmentFilter::from(query), SortOrder::StartTimeAsc)
            .await?;
        debug!(count = found.len(), "appointments listed");
        Ok(found)
    }

    /// Apply a partial update.
    ///
    /// The overlap check is re-run (ignoring the appointment itself) whenever
    /// the result is active and the staff, the slot, or the activity changed.
    /// Both the previous and the new staff member are locked in that case.
    #[instrument(skip(self, payload))]
    pub async fn update(
        &self,
        id: AppointmentId,
        payload: UpdateAppointment,
    ) -> Result<AppointmentDetails, BookingError> {
        let mut tx = self.store.begin().await?;
        let current = tx
            .find_for_update(id)
            .await?
            .ok_or(BookingError::NotFound(id))?;
        let next = payload.merge_into(&current)?;

        if next.requires_overlap_check(&current) {
            let mut staff = vec![current.staff_id, next.staff_id];
            staff.sort();
            staff.dedup();
            for staff_id in staff {
                tx.lock_staff(staff_id).await?;
            }
            ensure_slot_free(tx.as_mut(), next.staff_id, &next.slot, Some(id)).await?;
        }

        let details = tx.update(id, &next).await?;
        tx.commit().await?;

        info!(status = %details.appointment.status, "appointment updated");
        Ok(details)
    }

    /// Cancel an appointment. Cancelled appointments no longer hold their slot.
    pub async fn cancel(&self, id: AppointmentId) -> Result<AppointmentDetails, BookingError> {
        self.update(id, UpdateAppointment::status(AppointmentStatus::Cancelled))
            .await
    }
}

/// Fail with `TimeslotConflict` if an active appointment of `staff_id`
/// (other than `exclude`) intersects `slot`. The caller must hold the staff lock.
async fn ensure_slot_free(
    tx: &mut dyn AppointmentTx,
    staff_id: StaffId,
    slot: &TimeSlot,
    exclude: Option<AppointmentId>,
) -> Result<(), BookingError> {
    let filter = AppointmentFilter {
        exclude_id: exclude,
        ..AppointmentFilter::overlapping(staff_id, slot)
    };

    match tx.find_first(&filter).await? {
        Some(existing) => {
            info!(
                %staff_id,
                requested = %slot,
                conflicting_id = %existing.id,
                conflicting_slot = %existing.slot,
                "timeslot conflict"
            );
            Err(BookingError::TimeslotConflict {
                staff_id,
                requested: *slot,
                conflicting_id: existing.id,
                conflicting_slot: existing.slot,
            })
        }
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryAppointmentStore;
    use chrono::TimeZone;
    use serde_json::json;
    use slotbook_appointments::{ClientIdentity, ContactDetails};
    use slotbook_core::ServiceId;

    fn at(hour: u32, minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, hour, minute, 0).unwrap()
    }

    fn service() -> BookingService<InMemoryAppointmentStore> {
        let store = InMemoryAppointmentStore::new();
        store.register_staff(StaffId::from(1), json!({ "id": 1 })).unwrap();
        store.register_service(ServiceId::from(1), json!({ "id": 1 })).unwrap();
        BookingService::new(store)
    }

    fn booking(start: DateTime<Utc>, end: DateTime<Utc>) -> CreateAppointment {
        CreateAppointment {
            staff_id: StaffId::from(1),
            service_id: ServiceId::from(1),
            client: ClientIdentity::Guest(ContactDetails {
                client_name: "Ada".to_string(),
                client_email: "ada@example.com".to_string(),
                client_phone: None,
            }),
            slot: TimeSlot::new(start, end).unwrap(),
            notes: None,
        }
    }

    #[test]
    fn domain_errors_map_to_booking_errors() {
        let err = BookingError::from(DomainError::invariant("endTime must be after startTime"));
        assert!(matches!(err, BookingError::InvariantViolation(_)));

        let err = BookingError::from(DomainError::invalid_id("StaffId: -1 is negative"));
        assert!(matches!(err, BookingError::Validation(ref v) if v.has_field("id")));
    }

    #[tokio::test]
    async fn conflict_error_names_both_slots() {
        let svc = service();
        let first = svc.create(booking(at(10, 0), at(10, 30))).await.unwrap();

        let err = svc.create(booking(at(10, 15), at(10, 45))).await.unwrap_err();
        assert!(err.is_conflict());
        match err {
            BookingError::TimeslotConflict {
                staff_id,
                requested,
                conflicting_id,
                conflicting_slot,
            } => {
                assert_eq!(staff_id, StaffId::from(1));
                assert_eq!(requested.start(), at(10, 15));
                assert_eq!(conflicting_id, first.appointment.id);
                assert_eq!(conflicting_slot, first.appointment.slot);
            }
            other => panic!("expected conflict, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn unknown_id_is_not_found() {
        let svc = service();
        let missing = AppointmentId::from(404);
        assert!(matches!(
            svc.get_by_id(missing).await,
            Err(BookingError::NotFound(id)) if id == missing
        ));
        assert!(matches!(
            svc.cancel(missing).await,
            Err(BookingError::NotFound(id)) if id == missing
        ));
    }

    #[tokio::test]
    async fn inverted_merge_is_an_invariant_violation_and_writes_nothing() {
        let svc = service();
        let created = svc.create(booking(at(10, 0), at(10, 30))).await.unwrap();
        let id = created.appointment.id;

        let err = svc
            .update(
                id,
                UpdateAppointment {
                    start_time: Some(at(11, 0)),
                    ..UpdateAppointment::default()
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, BookingError::InvariantViolation(_)));
        assert_eq!(svc.get_by_id(id).await.unwrap(), created);
    }

    #[tokio::test]
    async fn store_failures_propagate_unchanged() {
        let svc = service();
        let mut payload = booking(at(10, 0), at(10, 30));
        payload.service_id = ServiceId::from(99);

        let err = svc.create(payload).await.unwrap_err();
        assert!(matches!(err, BookingError::Store(StoreError::Constraint(_))));
    }
}
