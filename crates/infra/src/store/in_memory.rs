use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::hash::Hash;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use chrono::Utc;
use serde_json::Value as JsonValue;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

use slotbook_appointments::{Appointment, AppointmentFields};
use slotbook_core::{AppointmentId, ServiceId, StaffId, UserId};

use super::filter::{AppointmentFilter, SortOrder};
use super::r#trait::{AppointmentDetails, AppointmentStore, AppointmentTx, StoreError};

/// In-memory appointment store.
///
/// Intended for tests/dev. Clones share the same tables and lock tables, so a
/// clone handed to another task serializes against the original exactly like
/// two Postgres connections would.
#[derive(Debug, Clone, Default)]
pub struct InMemoryAppointmentStore {
    shared: Arc<Shared>,
}

#[derive(Debug, Default)]
struct Shared {
    tables: RwLock<Tables>,
    next_id: AtomicI64,
    staff_locks: LockTable<StaffId>,
    row_locks: LockTable<AppointmentId>,
}

#[derive(Debug, Default)]
struct Tables {
    appointments: BTreeMap<AppointmentId, Appointment>,
    staff: HashMap<StaffId, JsonValue>,
    services: HashMap<ServiceId, JsonValue>,
    users: HashMap<UserId, JsonValue>,
}

/// One async mutex per key, created on first use.
///
/// Entries are never removed; the table grows with the number of distinct
/// keys ever locked.
#[derive(Debug)]
struct LockTable<K> {
    locks: Mutex<HashMap<K, Arc<AsyncMutex<()>>>>,
}

impl<K> Default for LockTable<K> {
    fn default() -> Self {
        Self {
            locks: Mutex::new(HashMap::new()),
        }
    }
}

impl<K: Eq + Hash + Copy> LockTable<K> {
    fn handle(&self, key: K) -> Result<Arc<AsyncMutex<()>>, StoreError> {
        let mut locks = self.locks.lock().map_err(|_| poisoned())?;
        Ok(locks.entry(key).or_default().clone())
    }
}

fn poisoned() -> StoreError {
    StoreError::Storage("lock poisoned".to_string())
}

impl InMemoryAppointmentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make a staff member available for bookings. `document` is returned
    /// verbatim as the `staff` relation.
    pub fn register_staff(&self, id: StaffId, document: JsonValue) -> Result<(), StoreError> {
        self.write_tables(|t| {
            t.staff.insert(id, document);
        })
    }

    pub fn register_service(&self, id: ServiceId, document: JsonValue) -> Result<(), StoreError> {
        self.write_tables(|t| {
            t.services.insert(id, document);
        })
    }

    pub fn register_user(&self, id: UserId, document: JsonValue) -> Result<(), StoreError> {
        self.write_tables(|t| {
            t.users.insert(id, document);
        })
    }

    fn write_tables(&self, f: impl FnOnce(&mut Tables)) -> Result<(), StoreError> {
        let mut tables = self.shared.tables.write().map_err(|_| poisoned())?;
        f(&mut tables);
        Ok(())
    }
}

impl Tables {
    fn check_references(&self, fields: &AppointmentFields) -> Result<(), StoreError> {
        if !self.staff.contains_key(&fields.staff_id) {
            return Err(StoreError::Constraint(format!(
                "staff {} does not exist",
                fields.staff_id
            )));
        }
        if !self.services.contains_key(&fields.service_id) {
            return Err(StoreError::Constraint(format!(
                "service {} does not exist",
                fields.service_id
            )));
        }
        if let Some(user_id) = fields.client.user_id() {
            if !self.users.contains_key(&user_id) {
                return Err(StoreError::Constraint(format!(
                    "user {user_id} does not exist"
                )));
            }
        }
        Ok(())
    }

    fn details(&self, appointment: Appointment) -> Result<AppointmentDetails, StoreError> {
        let id = appointment.id;
        let missing = |what: &str| {
            StoreError::Corrupt(format!("appointment {id} references a missing {what}"))
        };

        let staff = self
            .staff
            .get(&appointment.staff_id)
            .ok_or_else(|| missing("staff member"))?;
        let service = self
            .services
            .get(&appointment.service_id)
            .ok_or_else(|| missing("service"))?;
        let user = match appointment.client.user_id() {
            Some(user_id) => Some(
                self.users
                    .get(&user_id)
                    .ok_or_else(|| missing("user"))?
                    .clone(),
            ),
            None => None,
        };

        Ok(AppointmentDetails {
            staff: staff.clone(),
            service: service.clone(),
            user,
            appointment,
        })
    }
}

#[async_trait::async_trait]
impl AppointmentStore for InMemoryAppointmentStore {
    async fn begin(&self) -> Result<Box<dyn AppointmentTx>, StoreError> {
        Ok(Box::new(InMemoryTx {
            shared: self.shared.clone(),
            staged: BTreeMap::new(),
            staff_guards: BTreeMap::new(),
            row_guards: HashMap::new(),
            finished: false,
        }))
    }

    async fn find_by_id(
        &self,
        id: AppointmentId,
    ) -> Result<Option<AppointmentDetails>, StoreError> {
        let tables = self.shared.tables.read().map_err(|_| poisoned())?;
        tables
            .appointments
            .get(&id)
            .cloned()
            .map(|a| tables.details(a))
            .transpose()
    }

    async fn find_many(
        &self,
        filter: &AppointmentFilter,
        order: SortOrder,
    ) -> Result<Vec<AppointmentDetails>, StoreError> {
        let tables = self.shared.tables.read().map_err(|_| poisoned())?;
        let mut matching: Vec<Appointment> = tables
            .appointments
            .values()
            .filter(|a| filter.matches(a))
            .cloned()
            .collect();
        order.sort(&mut matching);
        matching.into_iter().map(|a| tables.details(a)).collect()
    }
}

/// Transaction over [`InMemoryAppointmentStore`].
///
/// Writes go to `staged` and become visible to other transactions only on
/// commit. Lock guards are owned, so dropping the transaction releases them.
pub struct InMemoryTx {
    shared: Arc<Shared>,
    staged: BTreeMap<AppointmentId, Appointment>,
    staff_guards: BTreeMap<StaffId, OwnedMutexGuard<()>>,
    row_guards: HashMap<AppointmentId, OwnedMutexGuard<()>>,
    finished: bool,
}

impl InMemoryTx {
    fn ensure_open(&self) -> Result<(), StoreError> {
        if self.finished {
            return Err(StoreError::TransactionFinished);
        }
        Ok(())
    }

    /// Committed rows overlaid with this transaction's own writes.
    fn visible(&self, tables: &Tables, id: AppointmentId) -> Option<Appointment> {
        self.staged
            .get(&id)
            .or_else(|| tables.appointments.get(&id))
            .cloned()
    }
}

#[async_trait::async_trait]
impl AppointmentTx for InMemoryTx {
    async fn lock_staff(&mut self, staff_id: StaffId) -> Result<(), StoreError> {
        self.ensure_open()?;
        if self.staff_guards.contains_key(&staff_id) {
            return Ok(());
        }
        let handle = self.shared.staff_locks.handle(staff_id)?;
        let guard = handle.lock_owned().await;
        self.staff_guards.insert(staff_id, guard);
        Ok(())
    }

    async fn find_for_update(
        &mut self,
        id: AppointmentId,
    ) -> Result<Option<Appointment>, StoreError> {
        self.ensure_open()?;
        if !self.row_guards.contains_key(&id) {
            let handle = self.shared.row_locks.handle(id)?;
            let guard = handle.lock_owned().await;
            self.row_guards.insert(id, guard);
        }
        let tables = self.shared.tables.read().map_err(|_| poisoned())?;
        Ok(self.visible(&tables, id))
    }

    async fn find_first(
        &mut self,
        filter: &AppointmentFilter,
    ) -> Result<Option<Appointment>, StoreError> {
        self.ensure_open()?;
        let tables = self.shared.tables.read().map_err(|_| poisoned())?;
        let ids: BTreeSet<AppointmentId> = tables
            .appointments
            .keys()
            .chain(self.staged.keys())
            .copied()
            .collect();
        let mut matching: Vec<Appointment> = ids
            .into_iter()
            .filter_map(|id| self.visible(&tables, id))
            .filter(|a| filter.matches(a))
            .collect();
        SortOrder::StartTimeAsc.sort(&mut matching);
        Ok(matching.into_iter().next())
    }

    async fn insert(
        &mut self,
        fields: &AppointmentFields,
    ) -> Result<AppointmentDetails, StoreError> {
        self.ensure_open()?;
        let tables = self.shared.tables.read().map_err(|_| poisoned())?;
        tables.check_references(fields)?;

        let raw_id = self.shared.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        let id = AppointmentId::new(raw_id)
            .map_err(|e| StoreError::Storage(format!("id sequence exhausted: {e}")))?;
        let now = Utc::now();
        let appointment = Appointment {
            id,
            staff_id: fields.staff_id,
            service_id: fields.service_id,
            client: fields.client.clone(),
            slot: fields.slot,
            status: fields.status,
            notes: fields.notes.clone(),
            created_at: now,
            updated_at: now,
        };

        let details = tables.details(appointment.clone())?;
        self.staged.insert(id, appointment);
        Ok(details)
    }

    async fn update(
        &mut self,
        id: AppointmentId,
        fields: &AppointmentFields,
    ) -> Result<AppointmentDetails, StoreError> {
        self.ensure_open()?;
        let tables = self.shared.tables.read().map_err(|_| poisoned())?;
        let current = self
            .visible(&tables, id)
            .ok_or(StoreError::MissingRow(id))?;
        tables.check_references(fields)?;

        let appointment = Appointment {
            id,
            staff_id: fields.staff_id,
            service_id: fields.service_id,
            client: fields.client.clone(),
            slot: fields.slot,
            status: fields.status,
            notes: fields.notes.clone(),
            created_at: current.created_at,
            updated_at: Utc::now(),
        };

        let details = tables.details(appointment.clone())?;
        self.staged.insert(id, appointment);
        Ok(details)
    }

    async fn commit(&mut self) -> Result<(), StoreError> {
        self.ensure_open()?;
        {
            let mut tables = self.shared.tables.write().map_err(|_| poisoned())?;
            tables.appointments.append(&mut self.staged);
        }
        self.finished = true;
        self.row_guards.clear();
        self.staff_guards.clear();
        Ok(())
    }
}
