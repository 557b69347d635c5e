//! Postgres-backed appointment store.
//!
//! ## Locking
//!
//! `lock_staff` takes `pg_advisory_xact_lock(staff_id)`. The lock key space is
//! shared with any other advisory-lock user of the same database, so a
//! different subsystem locking the same BIGINT would serialize with bookings
//! for that staff member (never deadlock, only wait). Locks are released by
//! COMMIT or ROLLBACK; dropping a [`PgTx`] returns the connection to the pool,
//! which rolls back.
//!
//! ## Error Mapping
//!
//! | SQLx error | Postgres code | StoreError |
//! |------------|---------------|------------|
//! | Database | `23503`, `23505`, `23514`, `23P01` | `Constraint` |
//! | Database | `55P03` (lock_not_available), `57014` (query_canceled) | `Timeout` |
//! | Database | `08***` | `Connection` |
//! | Database | other | `Storage` |
//! | PoolTimedOut | N/A | `Timeout` |
//! | PoolClosed, Io, Tls | N/A | `Connection` |
//! | ColumnDecode, Decode, ColumnNotFound | N/A | `Corrupt` |
//! | other | N/A | `Storage` |

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use sqlx::postgres::{PgArguments, PgRow};
use sqlx::query::Query;
use sqlx::{FromRow, PgPool, Postgres, Row, Transaction};
use tracing::{Span, field, instrument};

use slotbook_appointments::{
    Appointment, AppointmentFields, AppointmentStatus, ClientIdentity, TimeSlot,
};
use slotbook_core::{AppointmentId, ServiceId, StaffId, UserId};

use super::filter::{AppointmentFilter, InstantRange, SortOrder};
use super::r#trait::{AppointmentDetails, AppointmentStore, AppointmentTx, StoreError};

const MIGRATION: &str = include_str!("../../migrations/0001_appointments.sql");

const APPOINTMENT_COLUMNS: &str = "
    a.id, a.staff_id, a.service_id, a.user_id,
    a.client_name, a.client_email, a.client_phone,
    a.start_time, a.end_time, a.status, a.notes,
    a.created_at, a.updated_at";

const RELATION_JOINS: &str = "
    JOIN staff st ON st.id = a.staff_id
    JOIN services sv ON sv.id = a.service_id
    LEFT JOIN users u ON u.id = a.user_id";

const RELATION_COLUMNS: &str = "
    to_jsonb(st) AS staff_doc,
    to_jsonb(sv) AS service_doc,
    CASE WHEN u.id IS NULL THEN NULL ELSE to_jsonb(u) END AS user_doc";

/// Optional-parameter filter; a NULL parameter disables its predicate.
const FILTER_PREDICATES: &str = "
        ($1::bigint IS NULL OR a.id <> $1)
    AND ($2::bigint IS NULL OR a.staff_id = $2)
    AND ($3::bigint IS NULL OR a.user_id = $3)
    AND ($4::bigint IS NULL OR a.service_id = $4)
    AND ($5::text[] IS NULL OR a.status = ANY($5))
    AND ($6::timestamptz IS NULL OR a.start_time < $6)
    AND ($7::timestamptz IS NULL OR a.start_time <= $7)
    AND ($8::timestamptz IS NULL OR a.start_time > $8)
    AND ($9::timestamptz IS NULL OR a.start_time >= $9)
    AND ($10::timestamptz IS NULL OR a.end_time < $10)
    AND ($11::timestamptz IS NULL OR a.end_time <= $11)
    AND ($12::timestamptz IS NULL OR a.end_time > $12)
    AND ($13::timestamptz IS NULL OR a.end_time >= $13)";

/// Postgres appointment store.
///
/// Cheap to clone; clones share the pool.
#[derive(Debug, Clone)]
pub struct PostgresAppointmentStore {
    pool: Arc<PgPool>,
    lock_timeout: Option<Duration>,
}

impl PostgresAppointmentStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
            lock_timeout: None,
        }
    }

    /// Bound how long a transaction waits for a staff or row lock. Exceeding
    /// it surfaces as [`StoreError::Timeout`].
    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = Some(timeout);
        self
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Create the appointment tables and indexes if they are missing.
    #[instrument(skip(self), err)]
    pub async fn ensure_schema(&self) -> Result<(), StoreError> {
        sqlx::raw_sql(MIGRATION)
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("ensure_schema", e))?;
        Ok(())
    }
}

#[async_trait::async_trait]
impl AppointmentStore for PostgresAppointmentStore {
    #[instrument(skip(self), err)]
    async fn begin(&self) -> Result<Box<dyn AppointmentTx>, StoreError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;

        if let Some(timeout) = self.lock_timeout {
            // Transaction-local, so the setting never leaks back into the pool.
            sqlx::query("SELECT set_config('lock_timeout', $1, true)")
                .bind(format!("{}ms", timeout.as_millis()))
                .execute(&mut *tx)
                .await
                .map_err(|e| map_sqlx_error("set_lock_timeout", e))?;
        }

        Ok(Box::new(PgTx { tx: Some(tx) }))
    }

    #[instrument(skip(self), fields(appointment_id = %id), err)]
    async fn find_by_id(
        &self,
        id: AppointmentId,
    ) -> Result<Option<AppointmentDetails>, StoreError> {
        let sql = format!(
            "SELECT {APPOINTMENT_COLUMNS}, {RELATION_COLUMNS}
             FROM appointments a {RELATION_JOINS}
             WHERE a.id = $1"
        );
        let row = sqlx::query(&sql)
            .bind(id.get())
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("find_by_id", e))?;

        row.map(|r| decode_details(&r)).transpose()
    }

    #[instrument(skip(self), fields(row_count = field::Empty), err)]
    async fn find_many(
        &self,
        filter: &AppointmentFilter,
        order: SortOrder,
    ) -> Result<Vec<AppointmentDetails>, StoreError> {
        let direction = match order {
            SortOrder::StartTimeAsc => "ASC",
            SortOrder::StartTimeDesc => "DESC",
        };
        let sql = format!(
            "SELECT {APPOINTMENT_COLUMNS}, {RELATION_COLUMNS}
             FROM appointments a {RELATION_JOINS}
             WHERE {FILTER_PREDICATES}
             ORDER BY a.start_time {direction}, a.id {direction}"
        );
        let rows = bind_filter(sqlx::query(&sql), FilterParams::from(filter))
            .fetch_all(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("find_many", e))?;

        Span::current().record("row_count", rows.len());
        rows.iter().map(decode_details).collect()
    }
}

/// Transaction handle. `tx` is `None` once committed.
pub struct PgTx {
    tx: Option<Transaction<'static, Postgres>>,
}

impl PgTx {
    fn open(&mut self) -> Result<&mut Transaction<'static, Postgres>, StoreError> {
        self.tx.as_mut().ok_or(StoreError::TransactionFinished)
    }
}

#[async_trait::async_trait]
impl AppointmentTx for PgTx {
    #[instrument(skip(self), fields(staff_id = %staff_id), err)]
    async fn lock_staff(&mut self, staff_id: StaffId) -> Result<(), StoreError> {
        let tx = self.open()?;
        sqlx::query("SELECT pg_advisory_xact_lock($1)")
            .bind(staff_id.get())
            .execute(&mut **tx)
            .await
            .map_err(|e| map_sqlx_error("lock_staff", e))?;
        Ok(())
    }

    #[instrument(skip(self), fields(appointment_id = %id), err)]
    async fn find_for_update(
        &mut self,
        id: AppointmentId,
    ) -> Result<Option<Appointment>, StoreError> {
        let tx = self.open()?;
        let sql = format!(
            "SELECT {APPOINTMENT_COLUMNS} FROM appointments a WHERE a.id = $1 FOR UPDATE"
        );
        let row = sqlx::query(&sql)
            .bind(id.get())
            .fetch_optional(&mut **tx)
            .await
            .map_err(|e| map_sqlx_error("find_for_update", e))?;

        row.map(|r| decode_appointment(&r)).transpose()
    }

    #[instrument(skip(self), err)]
    async fn find_first(
        &mut self,
        filter: &AppointmentFilter,
    ) -> Result<Option<Appointment>, StoreError> {
        let tx = self.open()?;
        let sql = format!(
            "SELECT {APPOINTMENT_COLUMNS} FROM appointments a
             WHERE {FILTER_PREDICATES}
             ORDER BY a.start_time ASC, a.id ASC
             LIMIT 1"
        );
        let row = bind_filter(sqlx::query(&sql), FilterParams::from(filter))
            .fetch_optional(&mut **tx)
            .await
            .map_err(|e| map_sqlx_error("find_first", e))?;

        row.map(|r| decode_appointment(&r)).transpose()
    }

    #[instrument(
        skip(self, fields),
        fields(staff_id = %fields.staff_id, appointment_id = field::Empty),
        err
    )]
    async fn insert(
        &mut self,
        fields: &AppointmentFields,
    ) -> Result<AppointmentDetails, StoreError> {
        let tx = self.open()?;
        let sql = format!(
            "WITH a AS (
                INSERT INTO appointments (
                    staff_id, service_id, user_id,
                    client_name, client_email, client_phone,
                    start_time, end_time, status, notes
                )
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
                RETURNING *
             )
             SELECT {APPOINTMENT_COLUMNS}, {RELATION_COLUMNS}
             FROM a {RELATION_JOINS}"
        );
        let row = bind_fields(sqlx::query(&sql), fields)
            .fetch_one(&mut **tx)
            .await
            .map_err(|e| map_sqlx_error("insert_appointment", e))?;

        let details = decode_details(&row)?;
        Span::current().record("appointment_id", details.appointment.id.get());
        Ok(details)
    }

    #[instrument(skip(self, fields), fields(appointment_id = %id), err)]
    async fn update(
        &mut self,
        id: AppointmentId,
        fields: &AppointmentFields,
    ) -> Result<AppointmentDetails, StoreError> {
        let tx = self.open()?;
        let sql = format!(
            "WITH a AS (
                UPDATE appointments SET
                    staff_id = $1, service_id = $2, user_id = $3,
                    client_name = $4, client_email = $5, client_phone = $6,
                    start_time = $7, end_time = $8, status = $9, notes = $10,
                    updated_at = NOW()
                WHERE id = $11
                RETURNING *
             )
             SELECT {APPOINTMENT_COLUMNS}, {RELATION_COLUMNS}
             FROM a {RELATION_JOINS}"
        );
        let row = bind_fields(sqlx::query(&sql), fields)
            .bind(id.get())
            .fetch_optional(&mut **tx)
            .await
            .map_err(|e| map_sqlx_error("update_appointment", e))?;

        match row {
            Some(row) => decode_details(&row),
            None => Err(StoreError::MissingRow(id)),
        }
    }

    async fn commit(&mut self) -> Result<(), StoreError> {
        let tx = self.tx.take().ok_or(StoreError::TransactionFinished)?;
        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))
    }
}

/// Bind `$1..$10` in insert/update column order.
fn bind_fields<'q>(
    query: Query<'q, Postgres, PgArguments>,
    fields: &AppointmentFields,
) -> Query<'q, Postgres, PgArguments> {
    let contact = fields.client.contact();
    query
        .bind(fields.staff_id.get())
        .bind(fields.service_id.get())
        .bind(fields.client.user_id().map(UserId::get))
        .bind(contact.map(|c| c.client_name.clone()))
        .bind(contact.map(|c| c.client_email.clone()))
        .bind(contact.and_then(|c| c.client_phone.clone()))
        .bind(fields.slot.start())
        .bind(fields.slot.end())
        .bind(fields.status.as_str())
        .bind(fields.notes.clone())
}

/// [`AppointmentFilter`] flattened into the `$1..$13` parameters of
/// `FILTER_PREDICATES`.
#[derive(Debug, Clone, PartialEq, Eq)]
struct FilterParams {
    exclude_id: Option<i64>,
    staff_id: Option<i64>,
    user_id: Option<i64>,
    service_id: Option<i64>,
    statuses: Option<Vec<String>>,
    start_time: [Option<DateTime<Utc>>; 4],
    end_time: [Option<DateTime<Utc>>; 4],
}

impl From<&AppointmentFilter> for FilterParams {
    fn from(filter: &AppointmentFilter) -> Self {
        let range = |r: &InstantRange| [r.lt, r.lte, r.gt, r.gte];
        Self {
            exclude_id: filter.exclude_id.map(AppointmentId::get),
            staff_id: filter.staff_id.map(StaffId::get),
            user_id: filter.user_id.map(UserId::get),
            service_id: filter.service_id.map(ServiceId::get),
            statuses: filter
                .statuses
                .as_ref()
                .map(|set| set.iter().map(|s| s.as_str().to_string()).collect()),
            start_time: range(&filter.start_time),
            end_time: range(&filter.end_time),
        }
    }
}

fn bind_filter(
    query: Query<'_, Postgres, PgArguments>,
    params: FilterParams,
) -> Query<'_, Postgres, PgArguments> {
    let mut query = query
        .bind(params.exclude_id)
        .bind(params.staff_id)
        .bind(params.user_id)
        .bind(params.service_id)
        .bind(params.statuses);
    for bound in params.start_time.into_iter().chain(params.end_time) {
        query = query.bind(bound);
    }
    query
}

/// Map SQLx errors to StoreError.
fn map_sqlx_error(operation: &str, err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::Database(db_err) => {
            let msg = format!("database error in {}: {}", operation, db_err.message());
            match db_err.code().as_deref() {
                Some("23503" | "23505" | "23514" | "23P01") => StoreError::Constraint(msg),
                Some("55P03" | "57014") => StoreError::Timeout(msg),
                Some(code) if code.starts_with("08") => StoreError::Connection(msg),
                _ => StoreError::Storage(msg),
            }
        }
        sqlx::Error::PoolTimedOut => {
            StoreError::Timeout(format!("timed out acquiring a connection in {operation}"))
        }
        sqlx::Error::PoolClosed => {
            StoreError::Connection(format!("connection pool closed in {operation}"))
        }
        err @ (sqlx::Error::Io(_) | sqlx::Error::Tls(_)) => {
            StoreError::Connection(format!("{operation}: {err}"))
        }
        err @ (sqlx::Error::ColumnDecode { .. }
        | sqlx::Error::Decode(_)
        | sqlx::Error::ColumnNotFound(_)) => StoreError::Corrupt(format!("{operation}: {err}")),
        other => StoreError::Storage(format!("sqlx error in {operation}: {other}")),
    }
}

// SQLx row types

#[derive(Debug)]
struct AppointmentRow {
    id: i64,
    staff_id: i64,
    service_id: i64,
    user_id: Option<i64>,
    client_name: Option<String>,
    client_email: Option<String>,
    client_phone: Option<String>,
    start_time: DateTime<Utc>,
    end_time: DateTime<Utc>,
    status: String,
    notes: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl<'r> FromRow<'r, PgRow> for AppointmentRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(AppointmentRow {
            id: row.try_get("id")?,
            staff_id: row.try_get("staff_id")?,
            service_id: row.try_get("service_id")?,
            user_id: row.try_get("user_id")?,
            client_name: row.try_get("client_name")?,
            client_email: row.try_get("client_email")?,
            client_phone: row.try_get("client_phone")?,
            start_time: row.try_get("start_time")?,
            end_time: row.try_get("end_time")?,
            status: row.try_get("status")?,
            notes: row.try_get("notes")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

impl TryFrom<AppointmentRow> for Appointment {
    type Error = StoreError;

    fn try_from(row: AppointmentRow) -> Result<Self, Self::Error> {
        let corrupt = |e: &dyn std::fmt::Display| {
            StoreError::Corrupt(format!("appointment row {}: {e}", row.id))
        };

        let user_id = row
            .user_id
            .map(UserId::new)
            .transpose()
            .map_err(|e| corrupt(&e))?;
        let client = ClientIdentity::from_columns(
            user_id,
            row.client_name,
            row.client_email,
            row.client_phone,
        )
        .map_err(|e| corrupt(&e))?;
        let slot = TimeSlot::new(row.start_time, row.end_time).map_err(|e| corrupt(&e))?;
        let status: AppointmentStatus = row.status.parse().map_err(|e| corrupt(&e))?;

        Ok(Appointment {
            id: AppointmentId::new(row.id).map_err(|e| corrupt(&e))?,
            staff_id: StaffId::new(row.staff_id).map_err(|e| corrupt(&e))?,
            service_id: ServiceId::new(row.service_id).map_err(|e| corrupt(&e))?,
            client,
            slot,
            status,
            notes: row.notes,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

fn decode_appointment(row: &PgRow) -> Result<Appointment, StoreError> {
    let row = AppointmentRow::from_row(row)
        .map_err(|e| map_sqlx_error("decode_appointment", e))?;
    Appointment::try_from(row)
}

fn decode_details(row: &PgRow) -> Result<AppointmentDetails, StoreError> {
    let appointment = decode_appointment(row)?;
    let staff: JsonValue = row
        .try_get("staff_doc")
        .map_err(|e| map_sqlx_error("decode_staff", e))?;
    let service: JsonValue = row
        .try_get("service_doc")
        .map_err(|e| map_sqlx_error("decode_service", e))?;
    let user: Option<JsonValue> = row
        .try_get("user_doc")
        .map_err(|e| map_sqlx_error("decode_user", e))?;

    Ok(AppointmentDetails {
        appointment,
        staff,
        service,
        user,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(hour: u32, minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, hour, minute, 0).unwrap()
    }

    #[test]
    fn overlap_filter_binds_half_open_bounds() {
        let slot = TimeSlot::new(at(10, 0), at(10, 30)).unwrap();
        let filter = AppointmentFilter::overlapping(StaffId::from(4), &slot)
            .excluding(AppointmentId::from(9));
        let params = FilterParams::from(&filter);

        assert_eq!(params.exclude_id, Some(9));
        assert_eq!(params.staff_id, Some(4));
        assert_eq!(
            params.statuses,
            Some(vec!["PENDING".to_string(), "CONFIRMED".to_string()])
        );
        // start_time < slot.end, end_time > slot.start
        assert_eq!(params.start_time, [Some(at(10, 30)), None, None, None]);
        assert_eq!(params.end_time, [None, None, Some(at(10, 0)), None]);
    }

    #[test]
    fn empty_filter_binds_only_nulls() {
        let params = FilterParams::from(&AppointmentFilter::default());
        assert_eq!(params.exclude_id, None);
        assert_eq!(params.statuses, None);
        assert!(params.start_time.iter().chain(&params.end_time).all(Option::is_none));
    }

    #[test]
    fn pool_errors_are_classified() {
        assert!(matches!(
            map_sqlx_error("begin", sqlx::Error::PoolTimedOut),
            StoreError::Timeout(_)
        ));
        assert!(matches!(
            map_sqlx_error("begin", sqlx::Error::PoolClosed),
            StoreError::Connection(_)
        ));
        assert!(matches!(
            map_sqlx_error("decode", sqlx::Error::ColumnNotFound("staff_doc".to_string())),
            StoreError::Corrupt(_)
        ));
        assert!(matches!(
            map_sqlx_error("find", sqlx::Error::RowNotFound),
            StoreError::Storage(_)
        ));
    }

    #[test]
    fn corrupt_rows_are_rejected() {
        let row = AppointmentRow {
            id: 1,
            staff_id: 1,
            service_id: 1,
            user_id: None,
            client_name: None,
            client_email: None,
            client_phone: None,
            start_time: at(10, 0),
            end_time: at(10, 30),
            status: "PENDING".to_string(),
            notes: None,
            created_at: at(9, 0),
            updated_at: at(9, 0),
        };
        assert!(matches!(Appointment::try_from(row), Err(StoreError::Corrupt(_))));
    }

    #[test]
    fn migration_defines_the_overlap_index() {
        assert!(MIGRATION.contains("CREATE TABLE IF NOT EXISTS appointments"));
        assert!(MIGRATION.contains("(staff_id, start_time)"));
    }
}
