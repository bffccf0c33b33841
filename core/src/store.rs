//! Persistent store abstraction for bookings and their history.
//!
//! The store is the single source of truth. Mutations happen inside a
//! [`BookingTransaction`] obtained from [`BookingStore::begin`]; the
//! transaction holds the provider-scoped schedule lock and any row locks until
//! [`BookingTransaction::commit`] or [`BookingTransaction::rollback`].
//! Dropping an uncommitted transaction rolls it back.
//!
//! Writers take the provider lock before locking any booking row, so two
//! writers of one provider never wait on each other in opposite order.
//!
//! # Implementations
//!
//! - `PostgresBookingStore` (in `chairbook-postgres`): production store
//! - `InMemoryBookingStore` (in `chairbook-testing`): fast, deterministic tests
//!
//! # Example
//!
//! ```no_run
//! use chairbook_core::store::{BookingStore, BookingTransaction};
//! use chairbook_core::{BookingId, Result, TimeSlot};
//! use std::time::Duration;
//!
//! async fn move_booking<S: BookingStore>(store: &S, id: BookingId, slot: TimeSlot) -> Result<()> {
//!     let Some(current) = store.find_by_id(id).await? else {
//!         return Ok(());
//!     };
//!
//!     // Provider lock first, then the row.
//!     let mut tx = store.begin().await?;
//!     tx.lock_provider(current.provider_id, Duration::from_secs(5)).await?;
//!     let Some(booking) = tx.find_for_update(id).await? else {
//!         return tx.rollback().await;
//!     };
//!     if !tx.has_conflict(booking.provider_id, &slot, Some(id)).await? {
//!         tx.update_schedule(id, &slot, chrono::Utc::now()).await?;
//!     }
//!     tx.commit().await
//! }
//! ```

use crate::error::Result;
use crate::history::{BookingHistory, NewHistoryEntry};
use crate::slot::{TimeSlot, TimeWindow};
use crate::status::BookingStatus;
use crate::types::{
    Booking, BookingId, BookingNotes, BookingNumber, CustomerId, NewBooking, ProviderId, PublicId,
};
use chrono::{DateTime, Utc};
use std::future::Future;
use std::time::Duration;

/// Result of inserting a new booking.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum InsertOutcome {
    /// Row written; carries the stored booking with its assigned id.
    Inserted(Booking),
    /// The booking number is already in use. The transaction is still usable
    /// and the insert may be retried with a fresh number.
    BookingNumberTaken,
}

/// Read access and transaction factory for the booking store.
pub trait BookingStore: Send + Sync {
    /// Transaction type produced by [`begin`](Self::begin).
    type Tx: BookingTransaction;

    /// Start a transaction.
    ///
    /// # Errors
    ///
    /// Returns `Transient(StoreUnavailable)` if no connection can be obtained.
    fn begin(&self) -> impl Future<Output = Result<Self::Tx>> + Send;

    /// Load a booking by storage id.
    ///
    /// # Errors
    ///
    /// Returns an error if the store query fails.
    fn find_by_id(&self, id: BookingId) -> impl Future<Output = Result<Option<Booking>>> + Send;

    /// Load a booking by its public UUID.
    ///
    /// # Errors
    ///
    /// Returns an error if the store query fails.
    fn find_by_public_id(
        &self,
        public_id: PublicId,
    ) -> impl Future<Output = Result<Option<Booking>>> + Send;

    /// Load a booking by its human-readable number.
    ///
    /// # Errors
    ///
    /// Returns an error if the store query fails.
    fn find_by_booking_number(
        &self,
        number: &BookingNumber,
    ) -> impl Future<Output = Result<Option<Booking>>> + Send;

    /// All bookings of a registered customer, most recent start first.
    ///
    /// # Errors
    ///
    /// Returns an error if the store query fails.
    fn find_by_customer(
        &self,
        customer_id: CustomerId,
    ) -> impl Future<Output = Result<Vec<Booking>>> + Send;

    /// Bookings of a provider intersecting `window`, ordered by start.
    ///
    /// # Errors
    ///
    /// Returns an error if the store query fails.
    fn find_by_provider(
        &self,
        provider_id: ProviderId,
        window: TimeWindow,
    ) -> impl Future<Output = Result<Vec<Booking>>> + Send;

    /// Read-only overlap probe against committed state. Takes no locks.
    ///
    /// # Errors
    ///
    /// Returns an error if the store query fails.
    fn check_conflict(
        &self,
        provider_id: ProviderId,
        slot: &TimeSlot,
        exclude: Option<BookingId>,
    ) -> impl Future<Output = Result<bool>> + Send;

    /// Append one audit entry.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails.
    fn append_history(&self, entry: NewHistoryEntry) -> impl Future<Output = Result<()>> + Send;

    /// Audit entries of a booking, oldest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the store query fails.
    fn history(
        &self,
        booking_id: BookingId,
    ) -> impl Future<Output = Result<Vec<BookingHistory>>> + Send;
}

/// A unit of work against the store.
pub trait BookingTransaction: Send {
    /// Acquire the provider-scoped schedule lock, waiting at most `wait`.
    ///
    /// The lock is held until the transaction ends. Locks of different
    /// providers are independent.
    ///
    /// # Errors
    ///
    /// Returns `Transient(LockTimeout)` if the lock is not granted in time.
    fn lock_provider(
        &mut self,
        provider_id: ProviderId,
        wait: Duration,
    ) -> impl Future<Output = Result<()>> + Send;

    /// Load a booking and lock its row for the rest of the transaction.
    ///
    /// # Errors
    ///
    /// Returns an error if the store query fails.
    fn find_for_update(
        &mut self,
        id: BookingId,
    ) -> impl Future<Output = Result<Option<Booking>>> + Send;

    /// Whether an occupying booking of `provider_id` overlaps `slot`,
    /// ignoring `exclude`. Matching rows stay locked until the transaction ends.
    ///
    /// # Errors
    ///
    /// Returns an error if the store query fails.
    fn has_conflict(
        &mut self,
        provider_id: ProviderId,
        slot: &TimeSlot,
        exclude: Option<BookingId>,
    ) -> impl Future<Output = Result<bool>> + Send;

    /// Insert a new booking.
    ///
    /// # Errors
    ///
    /// Returns `Conflict` if the store's own overlap guard rejects the row.
    fn insert(
        &mut self,
        booking: &NewBooking,
    ) -> impl Future<Output = Result<InsertOutcome>> + Send;

    /// Move a booking to `slot`. Returns the updated booking.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the booking does not exist.
    fn update_schedule(
        &mut self,
        id: BookingId,
        slot: &TimeSlot,
        updated_at: DateTime<Utc>,
    ) -> impl Future<Output = Result<Booking>> + Send;

    /// Set a booking's status. Returns the updated booking.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the booking does not exist.
    fn update_status(
        &mut self,
        id: BookingId,
        status: BookingStatus,
        updated_at: DateTime<Utc>,
    ) -> impl Future<Output = Result<Booking>> + Send;

    /// Replace a booking's free-text fields. Returns the updated booking.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the booking does not exist.
    fn update_notes(
        &mut self,
        id: BookingId,
        notes: &BookingNotes,
        updated_at: DateTime<Utc>,
    ) -> impl Future<Output = Result<Booking>> + Send;

    /// Make all writes visible and release every lock.
    ///
    /// # Errors
    ///
    /// Returns an error if the commit fails; nothing is written in that case.
    fn commit(self) -> impl Future<Output = Result<()>> + Send;

    /// Discard all writes and release every lock.
    ///
    /// # Errors
    ///
    /// Returns an error if the store reports a failure while rolling back.
    fn rollback(self) -> impl Future<Output = Result<()>> + Send;
}
