//! `PostgreSQL` booking store.
//!
//! # Locking protocol
//!
//! Every mutating transaction first takes a transaction-scoped advisory lock
//! keyed by the provider (`pg_advisory_xact_lock`), bounded by a
//! transaction-local `lock_timeout`. Only then are booking rows read
//! `FOR UPDATE` and written. Transactions for the same provider therefore run
//! one after another and each sees what its predecessor committed, while
//! different providers hash to different keys and never wait on each other.
//!
//! The `bookings_no_overlap` exclusion constraint rejects any overlapping
//! occupying row that reaches the table without going through the lock.

use crate::error::{
    BOOKING_NUMBER_CONSTRAINT, EXCLUSION_VIOLATION, LockScope, classify, is_unique_violation_of,
    sqlstate,
};
use crate::rows::{BOOKING_COLUMNS, BookingRow, HistoryRow, occupying_statuses};
use chairbook_core::error::{BookingError, BookingKey, Result};
use chairbook_core::history::{BookingHistory, NewHistoryEntry};
use chairbook_core::slot::TimeWindow;
use chairbook_core::store::{BookingStore, BookingTransaction, InsertOutcome};
use chairbook_core::types::{BookingNotes, NewBooking};
use chairbook_core::{
    Booking, BookingId, BookingNumber, BookingStatus, CustomerId, ProviderId, PublicId, TimeSlot,
};
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::{Connection, Postgres, Transaction};
use std::time::{Duration, Instant};

/// Connection pool settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolConfig {
    /// Upper bound on open connections
    pub max_connections: u32,
    /// Connections kept open when idle
    pub min_connections: u32,
    /// How long to wait for a connection
    pub connect_timeout: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_connections: 10,
            min_connections: 1,
            connect_timeout: Duration::from_secs(30),
        }
    }
}

/// Booking store backed by `PostgreSQL`.
#[derive(Clone, Debug)]
pub struct PostgresBookingStore {
    pool: PgPool,
}

impl PostgresBookingStore {
    /// Wrap an existing pool.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connect to `database_url` with the given pool settings.
    ///
    /// # Errors
    ///
    /// Returns `Transient(StoreUnavailable)` if the database cannot be reached.
    pub async fn connect(database_url: &str, config: PoolConfig) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(config.connect_timeout)
            .connect(database_url)
            .await
            .map_err(|e| classify(e, "connect to database", None))?;

        Ok(Self::new(pool))
    }

    /// Underlying pool, shared with the read-only directories.
    #[must_use]
    pub const fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Run database migrations.
    ///
    /// # Errors
    ///
    /// Returns `Internal` if a migration fails.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| BookingError::Internal(format!("Migration failed: {e}")))?;
        Ok(())
    }

    async fn find_one(&self, column: &str, bind: FindKey) -> Result<Option<Booking>> {
        let sql = format!("SELECT {BOOKING_COLUMNS} FROM bookings WHERE {column} = $1");
        let query = sqlx::query_as::<_, BookingRow>(&sql);
        let query = match bind {
            FindKey::Id(id) => query.bind(id),
            FindKey::Uuid(uuid) => query.bind(uuid),
            FindKey::Text(text) => query.bind(text),
        };

        query
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| classify(e, "load booking", None))?
            .map(Booking::try_from)
            .transpose()
    }
}

enum FindKey {
    Id(i64),
    Uuid(uuid::Uuid),
    Text(String),
}

impl BookingStore for PostgresBookingStore {
    type Tx = PostgresTransaction;

    async fn begin(&self) -> Result<PostgresTransaction> {
        let tx = self
            .pool
            .begin()
            .await
            .map_err(|e| classify(e, "begin transaction", None))?;

        Ok(PostgresTransaction { tx, lock: None })
    }

    async fn find_by_id(&self, id: BookingId) -> Result<Option<Booking>> {
        self.find_one("id", FindKey::Id(id.get())).await
    }

    async fn find_by_public_id(&self, public_id: PublicId) -> Result<Option<Booking>> {
        self.find_one("public_id", FindKey::Uuid(*public_id.as_uuid()))
            .await
    }

    async fn find_by_booking_number(&self, number: &BookingNumber) -> Result<Option<Booking>> {
        self.find_one("booking_number", FindKey::Text(number.as_str().to_string()))
            .await
    }

    async fn find_by_customer(&self, customer_id: CustomerId) -> Result<Vec<Booking>> {
        let sql = format!(
            "SELECT {BOOKING_COLUMNS} FROM bookings WHERE customer_id = $1 \
             ORDER BY start_time DESC, id DESC"
        );
        sqlx::query_as::<_, BookingRow>(&sql)
            .bind(customer_id.get())
            .fetch_all(&self.pool)
            .await
            .map_err(|e| classify(e, "load customer bookings", None))?
            .into_iter()
            .map(Booking::try_from)
            .collect()
    }

    async fn find_by_provider(
        &self,
        provider_id: ProviderId,
        window: TimeWindow,
    ) -> Result<Vec<Booking>> {
        let sql = format!(
            "SELECT {BOOKING_COLUMNS} FROM bookings \
             WHERE barber_id = $1 AND start_time < $3 AND $2 < end_time \
             ORDER BY start_time, id"
        );
        sqlx::query_as::<_, BookingRow>(&sql)
            .bind(provider_id.get())
            .bind(window.from)
            .bind(window.to)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| classify(e, "load provider bookings", None))?
            .into_iter()
            .map(Booking::try_from)
            .collect()
    }

    async fn check_conflict(
        &self,
        provider_id: ProviderId,
        slot: &TimeSlot,
        exclude: Option<BookingId>,
    ) -> Result<bool> {
        let exists: bool = sqlx::query_scalar(
            r"
            SELECT EXISTS (
                SELECT 1 FROM bookings
                WHERE barber_id = $1
                  AND start_time < $3
                  AND $2 < end_time
                  AND status = ANY($4)
                  AND ($5::BIGINT IS NULL OR id <> $5)
            )
            ",
        )
        .bind(provider_id.get())
        .bind(slot.start())
        .bind(slot.end())
        .bind(occupying_statuses())
        .bind(exclude.map(BookingId::get))
        .fetch_one(&self.pool)
        .await
        .map_err(|e| classify(e, "probe availability", None))?;

        Ok(exists)
    }

    async fn append_history(&self, entry: NewHistoryEntry) -> Result<()> {
        sqlx::query(
            r"
            INSERT INTO booking_history
                (booking_id, actor_id, change_type, delta, reason, created_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            ",
        )
        .bind(entry.booking_id.get())
        .bind(entry.actor_id.map(chairbook_core::UserId::get))
        .bind(entry.change_type().as_str())
        .bind(sqlx::types::Json(&entry.delta))
        .bind(entry.reason.as_deref())
        .bind(entry.recorded_at)
        .execute(&self.pool)
        .await
        .map_err(|e| classify(e, "append history", None))?;

        Ok(())
    }

    async fn history(&self, booking_id: BookingId) -> Result<Vec<BookingHistory>> {
        let rows = sqlx::query_as::<_, HistoryRow>(
            r"
            SELECT id, booking_id, actor_id, delta, reason, created_at
            FROM booking_history
            WHERE booking_id = $1
            ORDER BY id
            ",
        )
        .bind(booking_id.get())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| classify(e, "load history", None))?;

        Ok(rows.into_iter().map(BookingHistory::from).collect())
    }
}

/// Advisory lock key of a provider's schedule.
fn provider_lock_key(provider_id: ProviderId) -> String {
    format!("chairbook:provider:{provider_id}")
}

/// Error mapper for a statement run inside a transaction.
fn fail(
    lock: Option<LockScope>,
    context: &'static str,
) -> impl FnOnce(sqlx::Error) -> BookingError {
    move |e| classify(e, context, lock)
}

/// A `PostgreSQL` transaction. Dropping it without committing rolls back.
pub struct PostgresTransaction {
    tx: Transaction<'static, Postgres>,
    lock: Option<LockScope>,
}

impl PostgresTransaction {
    async fn fetch_for_update(&mut self, id: BookingId) -> Result<Booking> {
        self.find_for_update(id)
            .await?
            .ok_or_else(|| BookingError::booking_not_found(BookingKey::Id(id)))
    }
}

impl BookingTransaction for PostgresTransaction {
    async fn lock_provider(&mut self, provider_id: ProviderId, wait: Duration) -> Result<()> {
        // lock_timeout = 0 disables the timeout, so never go below 1ms.
        let wait_ms = u64::try_from(wait.as_millis()).unwrap_or(u64::MAX).max(1);
        self.lock = Some(LockScope {
            provider_id,
            wait_ms,
        });

        sqlx::query("SELECT set_config('lock_timeout', $1, true)")
            .bind(format!("{wait_ms}ms"))
            .execute(&mut *self.tx)
            .await
            .map_err(fail(self.lock, "set lock timeout"))?;

        let started = Instant::now();
        let locked = sqlx::query("SELECT pg_advisory_xact_lock(hashtextextended($1, 0))")
            .bind(provider_lock_key(provider_id))
            .execute(&mut *self.tx)
            .await;
        metrics::histogram!("booking_store_lock_wait_seconds")
            .record(started.elapsed().as_secs_f64());

        locked.map_err(fail(self.lock, "acquire provider lock"))?;
        tracing::debug!(provider_id = %provider_id, wait_ms, "provider lock acquired");
        Ok(())
    }

    async fn find_for_update(&mut self, id: BookingId) -> Result<Option<Booking>> {
        let sql = format!("SELECT {BOOKING_COLUMNS} FROM bookings WHERE id = $1 FOR UPDATE");
        sqlx::query_as::<_, BookingRow>(&sql)
            .bind(id.get())
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(fail(self.lock, "lock booking"))?
            .map(Booking::try_from)
            .transpose()
    }

    async fn has_conflict(
        &mut self,
        provider_id: ProviderId,
        slot: &TimeSlot,
        exclude: Option<BookingId>,
    ) -> Result<bool> {
        let overlapping: Vec<i64> = sqlx::query_scalar(
            r"
            SELECT id FROM bookings
            WHERE barber_id = $1
              AND start_time < $3
              AND $2 < end_time
              AND status = ANY($4)
              AND ($5::BIGINT IS NULL OR id <> $5)
            FOR UPDATE
            ",
        )
        .bind(provider_id.get())
        .bind(slot.start())
        .bind(slot.end())
        .bind(occupying_statuses())
        .bind(exclude.map(BookingId::get))
        .fetch_all(&mut *self.tx)
        .await
        .map_err(fail(self.lock, "check conflicts"))?;

        Ok(!overlapping.is_empty())
    }

    async fn insert(&mut self, booking: &NewBooking) -> Result<InsertOutcome> {
        let lock = self.lock;
        let duration = i32::try_from(booking.slot.duration_minutes())
            .map_err(|e| BookingError::Internal(format!("duration out of range: {e}")))?;
        let guest = booking.party.guest();

        // Savepoint so a booking-number collision leaves the transaction usable.
        let mut savepoint = Connection::begin(&mut *self.tx)
            .await
            .map_err(|e| classify(e, "create savepoint", lock))?;

        let sql = format!(
            r"
            INSERT INTO bookings (
                public_id, booking_number, barber_id, customer_id,
                guest_name, guest_email, guest_phone,
                service_id, service_name, start_time, end_time, duration_minutes,
                service_price, discount_amount, tax_amount, total_price, currency,
                status, customer_notes, special_requests, internal_notes,
                created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12,
                    $13, $14, $15, $16, $17, $18, $19, $20, $21, $22, $22)
            RETURNING {BOOKING_COLUMNS}
            "
        );
        let inserted = sqlx::query_as::<_, BookingRow>(&sql)
            .bind(booking.public_id.as_uuid())
            .bind(booking.booking_number.as_str())
            .bind(booking.provider_id.get())
            .bind(booking.party.customer_id().map(CustomerId::get))
            .bind(guest.map(|g| g.name().to_string()))
            .bind(guest.and_then(|g| g.email().map(str::to_string)))
            .bind(guest.and_then(|g| g.phone().map(str::to_string)))
            .bind(booking.service.service_id.get())
            .bind(&booking.service.name)
            .bind(booking.slot.start())
            .bind(booking.slot.end())
            .bind(duration)
            .bind(booking.pricing.service_price)
            .bind(booking.pricing.discount_amount)
            .bind(booking.pricing.tax_amount)
            .bind(booking.pricing.total_price)
            .bind(booking.pricing.currency.as_str())
            .bind(booking.status.as_str())
            .bind(booking.notes.customer_notes.as_deref())
            .bind(booking.notes.special_requests.as_deref())
            .bind(booking.notes.internal_notes.as_deref())
            .bind(booking.created_at)
            .fetch_one(&mut *savepoint)
            .await;

        match inserted {
            Ok(row) => {
                savepoint
                    .commit()
                    .await
                    .map_err(|e| classify(e, "release savepoint", lock))?;
                Booking::try_from(row).map(InsertOutcome::Inserted)
            }
            Err(e) if is_unique_violation_of(&e, BOOKING_NUMBER_CONSTRAINT) => {
                savepoint
                    .rollback()
                    .await
                    .map_err(|e| classify(e, "roll back savepoint", lock))?;
                tracing::debug!(
                    booking_number = %booking.booking_number,
                    "booking number already taken"
                );
                Ok(InsertOutcome::BookingNumberTaken)
            }
            Err(e) if sqlstate(&e).as_deref() == Some(EXCLUSION_VIOLATION) => {
                Err(BookingError::Conflict {
                    provider_id: booking.provider_id,
                    start: booking.slot.start(),
                    end: booking.slot.end(),
                })
            }
            Err(e) => Err(classify(e, "insert booking", lock)),
        }
    }

    async fn update_schedule(
        &mut self,
        id: BookingId,
        slot: &TimeSlot,
        updated_at: DateTime<Utc>,
    ) -> Result<Booking> {
        let current = self.fetch_for_update(id).await?;
        let duration = i32::try_from(slot.duration_minutes())
            .map_err(|e| BookingError::Internal(format!("duration out of range: {e}")))?;

        let sql = format!(
            "UPDATE bookings \
             SET start_time = $2, end_time = $3, duration_minutes = $4, updated_at = $5 \
             WHERE id = $1 RETURNING {BOOKING_COLUMNS}"
        );
        let updated = sqlx::query_as::<_, BookingRow>(&sql)
            .bind(id.get())
            .bind(slot.start())
            .bind(slot.end())
            .bind(duration)
            .bind(updated_at)
            .fetch_one(&mut *self.tx)
            .await;

        match updated {
            Ok(row) => Booking::try_from(row),
            Err(e) if sqlstate(&e).as_deref() == Some(EXCLUSION_VIOLATION) => {
                Err(BookingError::Conflict {
                    provider_id: current.provider_id,
                    start: slot.start(),
                    end: slot.end(),
                })
            }
            Err(e) => Err(classify(e, "reschedule booking", self.lock)),
        }
    }

    async fn update_status(
        &mut self,
        id: BookingId,
        status: BookingStatus,
        updated_at: DateTime<Utc>,
    ) -> Result<Booking> {
        let sql = format!(
            "UPDATE bookings SET status = $2, updated_at = $3 \
             WHERE id = $1 RETURNING {BOOKING_COLUMNS}"
        );
        sqlx::query_as::<_, BookingRow>(&sql)
            .bind(id.get())
            .bind(status.as_str())
            .bind(updated_at)
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(fail(self.lock, "update status"))?
            .ok_or_else(|| BookingError::booking_not_found(BookingKey::Id(id)))
            .and_then(Booking::try_from)
    }

    async fn update_notes(
        &mut self,
        id: BookingId,
        notes: &BookingNotes,
        updated_at: DateTime<Utc>,
    ) -> Result<Booking> {
        let sql = format!(
            "UPDATE bookings \
             SET customer_notes = $2, special_requests = $3, internal_notes = $4, updated_at = $5 \
             WHERE id = $1 RETURNING {BOOKING_COLUMNS}"
        );
        sqlx::query_as::<_, BookingRow>(&sql)
            .bind(id.get())
            .bind(notes.customer_notes.as_deref())
            .bind(notes.special_requests.as_deref())
            .bind(notes.internal_notes.as_deref())
            .bind(updated_at)
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(fail(self.lock, "update notes"))?
            .ok_or_else(|| BookingError::booking_not_found(BookingKey::Id(id)))
            .and_then(Booking::try_from)
    }

    async fn commit(self) -> Result<()> {
        let lock = self.lock;
        self.tx
            .commit()
            .await
            .map_err(|e| classify(e, "commit transaction", lock))
    }

    async fn rollback(self) -> Result<()> {
        let lock = self.lock;
        self.tx
            .rollback()
            .await
            .map_err(|e| classify(e, "roll back transaction", lock))
    }
}
