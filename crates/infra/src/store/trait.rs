use serde::Serialize;
use serde_json::Value as JsonValue;
use thiserror::Error;

use slotbook_appointments::{Appointment, AppointmentFields};
use slotbook_core::{AppointmentId, StaffId};

use std::sync::Arc;

use super::filter::{AppointmentFilter, SortOrder};

/// An appointment together with the staff, service and (optional) user it
/// references, as resolved by the store.
///
/// Related entities are opaque documents: their schema belongs to whoever owns
/// those tables, not to the booking core.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AppointmentDetails {
    #[serde(flatten)]
    pub appointment: Appointment,
    pub staff: JsonValue,
    pub service: JsonValue,
    pub user: Option<JsonValue>,
}

/// Persistence failure.
///
/// These are infrastructure errors; the booking layer propagates them
/// unchanged and never retries.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store connection failed: {0}")]
    Connection(String),

    #[error("store operation timed out: {0}")]
    Timeout(String),

    #[error("constraint violation: {0}")]
    Constraint(String),

    #[error("appointment {0} disappeared during the transaction")]
    MissingRow(AppointmentId),

    #[error("stored row could not be decoded: {0}")]
    Corrupt(String),

    #[error("transaction already finished")]
    TransactionFinished,

    #[error("storage error: {0}")]
    Storage(String),
}

/// A unit of work against the appointment store.
///
/// Reads and writes issued through the transaction are isolated until
/// [`AppointmentTx::commit`]. Dropping a transaction without committing rolls
/// it back and releases every lock it holds; this is what makes an abandoned
/// booking future leave no trace.
#[async_trait::async_trait]
pub trait AppointmentTx: Send {
    /// Serialize against every other transaction that locks the same staff
    /// member, until this transaction ends. Re-locking is a no-op.
    async fn lock_staff(&mut self, staff_id: StaffId) -> Result<(), StoreError>;

    /// Load an appointment and lock its row for the rest of the transaction.
    async fn find_for_update(
        &mut self,
        id: AppointmentId,
    ) -> Result<Option<Appointment>, StoreError>;

    /// First appointment matching `filter` (earliest start time first).
    async fn find_first(
        &mut self,
        filter: &AppointmentFilter,
    ) -> Result<Option<Appointment>, StoreError>;

    /// Insert a new appointment; the store assigns id and timestamps.
    async fn insert(&mut self, fields: &AppointmentFields)
    -> Result<AppointmentDetails, StoreError>;

    /// Overwrite the mutable columns of an existing appointment.
    async fn update(
        &mut self,
        id: AppointmentId,
        fields: &AppointmentFields,
    ) -> Result<AppointmentDetails, StoreError>;

    /// Make every write visible and release the locks.
    async fn commit(&mut self) -> Result<(), StoreError>;
}

/// Appointment persistence boundary.
///
/// Implementations must:
/// - hand out ids on insert and never reuse them
/// - resolve staff/service/user relations on every read that returns details
/// - make `lock_staff` effective across every handle to the same storage
///   (for Postgres that means across processes)
#[async_trait::async_trait]
pub trait AppointmentStore: Send + Sync {
    async fn begin(&self) -> Result<Box<dyn AppointmentTx>, StoreError>;

    async fn find_by_id(
        &self,
        id: AppointmentId,
    ) -> Result<Option<AppointmentDetails>, StoreError>;

    async fn find_many(
        &self,
        filter: &AppointmentFilter,
        order: SortOrder,
    ) -> Result<Vec<AppointmentDetails>, StoreError>;
}

#[async_trait::async_trait]
impl<S> AppointmentStore for Arc<S>
where
    S: AppointmentStore + ?Sized,
{
    async fn begin(&self) -> Result<Box<dyn AppointmentTx>, StoreError> {
        (**self).begin().await
    }

    async fn find_by_id(
        &self,
        id: AppointmentId,
    ) -> Result<Option<AppointmentDetails>, StoreError> {
        (**self).find_by_id(id).await
    }

    async fn find_many(
        &self,
        filter: &AppointmentFilter,
        order: SortOrder,
    ) -> Result<Vec<AppointmentDetails>, StoreError> {
        (**self).find_many(filter, order).await
    }
}
