//! In-memory booking store for fast, deterministic tests.
//!
//! Provides the same locking semantics as the `PostgreSQL` store:
//! - [`InMemoryBookingStore`]: committed bookings and history behind a mutex
//! - [`InMemoryTransaction`]: buffered writes plus per-provider
//!   `tokio::sync::Mutex` guards held until commit, rollback or drop
//!
//! Every mutating transaction takes the provider lock before touching rows, so
//! row locks are implied by the provider lock and not modelled separately.
//! Commit re-checks the overlap and booking-number rules the database enforces
//! with constraints.

#![allow(clippy::missing_panics_doc)] // Test utilities document panics where critical

use chairbook_core::error::{BookingError, BookingKey, Result, TransientError};
use chairbook_core::history::{BookingHistory, NewHistoryEntry};
use chairbook_core::slot::TimeWindow;
use chairbook_core::store::{BookingStore, BookingTransaction, InsertOutcome};
use chairbook_core::types::{BookingNotes, NewBooking};
use chairbook_core::{
    Booking, BookingId, BookingNumber, BookingStatus, CustomerId, ProviderId, PublicId, TimeSlot,
};
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::OwnedMutexGuard;

#[derive(Debug, Default)]
struct Tables {
    bookings: BTreeMap<BookingId, Booking>,
    history: Vec<BookingHistory>,
}

#[derive(Debug, Default)]
struct Inner {
    tables: Mutex<Tables>,
    provider_locks: Mutex<HashMap<ProviderId, Arc<tokio::sync::Mutex<()>>>>,
    next_booking_id: AtomicI64,
    next_history_id: AtomicI64,
    unavailable: AtomicBool,
    fail_history: AtomicBool,
    history_delay_ms: AtomicU64,
}

impl Inner {
    fn tables(&self) -> MutexGuard<'_, Tables> {
        self.tables.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn provider_lock(&self, provider_id: ProviderId) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self
            .provider_locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        Arc::clone(locks.entry(provider_id).or_default())
    }

    fn ensure_available(&self) -> Result<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            let reason = "in-memory store is offline".to_string();
            return Err(TransientError::StoreUnavailable(reason).into());
        }
        Ok(())
    }
}

/// In-memory booking store.
///
/// Cloning is cheap and every clone shares the same data.
///
/// # Example
///
/// ```
/// use chairbook_testing::InMemoryBookingStore;
/// use chairbook_core::store::BookingStore;
/// use chairbook_core::BookingId;
///
/// # async fn example() -> chairbook_core::Result<()> {
/// let store = InMemoryBookingStore::new();
/// assert!(store.find_by_id(BookingId::new(1)).await?.is_none());
/// assert!(store.is_empty());
/// # Ok(())
/// # }
/// ```
#[derive(Clone, Debug, Default)]
pub struct InMemoryBookingStore {
    inner: Arc<Inner>,
}

impl InMemoryBookingStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of committed bookings.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.tables().bookings.len()
    }

    /// Whether no booking has been committed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// All committed bookings, ordered by id.
    #[must_use]
    pub fn bookings(&self) -> Vec<Booking> {
        self.inner.tables().bookings.values().cloned().collect()
    }

    /// Number of history entries across all bookings.
    #[must_use]
    pub fn history_len(&self) -> usize {
        self.inner.tables().history.len()
    }

    /// Make `begin` and every read fail with `StoreUnavailable`.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.inner.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Make `append_history` fail.
    pub fn fail_history_appends(&self, fail: bool) {
        self.inner.fail_history.store(fail, Ordering::SeqCst);
    }

    /// Delay every `append_history` call.
    pub fn delay_history_appends(&self, delay: Duration) {
        let millis = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
        self.inner.history_delay_ms.store(millis, Ordering::SeqCst);
    }

    /// Commit a booking directly, bypassing locks and overlap rules.
    ///
    /// Seeds states that are awkward to reach through the lifecycle.
    pub fn seed(&self, booking: NewBooking) -> Booking {
        let id = BookingId::new(self.inner.next_booking_id.fetch_add(1, Ordering::SeqCst) + 1);
        let booking = booking.into_booking(id);
        self.inner.tables().bookings.insert(id, booking.clone());
        booking
    }

    fn find_committed(&self, matches: impl Fn(&Booking) -> bool) -> Result<Option<Booking>> {
        self.inner.ensure_available()?;
        Ok(self
            .inner
            .tables()
            .bookings
            .values()
            .find(|booking| matches(booking))
            .cloned())
    }
}

/// Whether any occupying booking in `bookings` overlaps `slot`.
fn overlaps<'a>(
    bookings: impl IntoIterator<Item = &'a Booking>,
    provider_id: ProviderId,
    slot: &TimeSlot,
    exclude: Option<BookingId>,
) -> bool {
    bookings.into_iter().any(|booking| {
        booking.provider_id == provider_id
            && Some(booking.id) != exclude
            && booking.occupies_slot()
            && booking.slot.overlaps(slot)
    })
}

impl BookingStore for InMemoryBookingStore {
    type Tx = InMemoryTransaction;

    async fn begin(&self) -> Result<InMemoryTransaction> {
        self.inner.ensure_available()?;
        Ok(InMemoryTransaction {
            inner: Arc::clone(&self.inner),
            guards: Vec::new(),
            pending: BTreeMap::new(),
        })
    }

    async fn find_by_id(&self, id: BookingId) -> Result<Option<Booking>> {
        self.find_committed(|booking| booking.id == id)
    }

    async fn find_by_public_id(&self, public_id: PublicId) -> Result<Option<Booking>> {
        self.find_committed(|booking| booking.public_id == public_id)
    }

    async fn find_by_booking_number(&self, number: &BookingNumber) -> Result<Option<Booking>> {
        self.find_committed(|booking| booking.booking_number == *number)
    }

    async fn find_by_customer(&self, customer_id: CustomerId) -> Result<Vec<Booking>> {
        self.inner.ensure_available()?;
        let mut bookings: Vec<Booking> = self
            .inner
            .tables()
            .bookings
            .values()
            .filter(|booking| booking.party.customer_id() == Some(customer_id))
            .cloned()
            .collect();
        bookings.sort_by(|a, b| {
            b.slot
                .start()
                .cmp(&a.slot.start())
                .then_with(|| b.id.cmp(&a.id))
        });
        Ok(bookings)
    }

    async fn find_by_provider(
        &self,
        provider_id: ProviderId,
        window: TimeWindow,
    ) -> Result<Vec<Booking>> {
        self.inner.ensure_available()?;
        let mut bookings: Vec<Booking> = self
            .inner
            .tables()
            .bookings
            .values()
            .filter(|booking| {
                booking.provider_id == provider_id && window.intersects(&booking.slot)
            })
            .cloned()
            .collect();
        bookings.sort_by(|a, b| a.slot.start().cmp(&b.slot.start()).then_with(|| a.id.cmp(&b.id)));
        Ok(bookings)
    }

    async fn check_conflict(
        &self,
        provider_id: ProviderId,
        slot: &TimeSlot,
        exclude: Option<BookingId>,
    ) -> Result<bool> {
        self.inner.ensure_available()?;
        Ok(overlaps(
            self.inner.tables().bookings.values(),
            provider_id,
            slot,
            exclude,
        ))
    }

    async fn append_history(&self, entry: NewHistoryEntry) -> Result<()> {
        let delay = self.inner.history_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        if self.inner.fail_history.load(Ordering::SeqCst) {
            return Err(TransientError::StoreUnavailable("history table is offline".into()).into());
        }

        let id = self.inner.next_history_id.fetch_add(1, Ordering::SeqCst) + 1;
        self.inner.tables().history.push(BookingHistory {
            id,
            booking_id: entry.booking_id,
            actor_id: entry.actor_id,
            change_type: entry.change_type(),
            delta: entry.delta,
            reason: entry.reason,
            created_at: entry.recorded_at,
        });
        Ok(())
    }

    async fn history(&self, booking_id: BookingId) -> Result<Vec<BookingHistory>> {
        self.inner.ensure_available()?;
        Ok(self
            .inner
            .tables()
            .history
            .iter()
            .filter(|entry| entry.booking_id == booking_id)
            .cloned()
            .collect())
    }
}

/// Transaction over an [`InMemoryBookingStore`].
///
/// Writes are buffered and applied atomically on commit. Dropping the
/// transaction discards them and releases its provider locks.
#[derive(Debug)]
pub struct InMemoryTransaction {
    inner: Arc<Inner>,
    guards: Vec<(ProviderId, OwnedMutexGuard<()>)>,
    pending: BTreeMap<BookingId, Booking>,
}

impl InMemoryTransaction {
    /// Latest version of a booking as seen by this transaction.
    fn current(&self, id: BookingId) -> Option<Booking> {
        self.pending
            .get(&id)
            .cloned()
            .or_else(|| self.inner.tables().bookings.get(&id).cloned())
    }

    fn modify(
        &mut self,
        id: BookingId,
        updated_at: DateTime<Utc>,
        change: impl FnOnce(&mut Booking),
    ) -> Result<Booking> {
        let mut booking = self
            .current(id)
            .ok_or_else(|| BookingError::booking_not_found(BookingKey::Id(id)))?;
        change(&mut booking);
        booking.updated_at = updated_at;
        self.pending.insert(id, booking.clone());
        Ok(booking)
    }
}

impl BookingTransaction for InMemoryTransaction {
    async fn lock_provider(&mut self, provider_id: ProviderId, wait: Duration) -> Result<()> {
        if self.guards.iter().any(|(held, _)| *held == provider_id) {
            return Ok(());
        }

        let lock = self.inner.provider_lock(provider_id);
        match tokio::time::timeout(wait, lock.lock_owned()).await {
            Ok(guard) => {
                self.guards.push((provider_id, guard));
                Ok(())
            }
            Err(_) => Err(TransientError::LockTimeout {
                provider_id,
                waited_ms: u64::try_from(wait.as_millis()).unwrap_or(u64::MAX),
            }
            .into()),
        }
    }

    async fn find_for_update(&mut self, id: BookingId) -> Result<Option<Booking>> {
        self.inner.ensure_available()?;
        Ok(self.current(id))
    }

    async fn has_conflict(
        &mut self,
        provider_id: ProviderId,
        slot: &TimeSlot,
        exclude: Option<BookingId>,
    ) -> Result<bool> {
        self.inner.ensure_available()?;
        let tables = self.inner.tables();
        let committed = tables
            .bookings
            .values()
            .filter(|booking| !self.pending.contains_key(&booking.id));
        Ok(overlaps(
            committed.chain(self.pending.values()),
            provider_id,
            slot,
            exclude,
        ))
    }

    async fn insert(&mut self, booking: &NewBooking) -> Result<InsertOutcome> {
        self.inner.ensure_available()?;
        let taken = self
            .inner
            .tables()
            .bookings
            .values()
            .chain(self.pending.values())
            .any(|existing| existing.booking_number == booking.booking_number);
        if taken {
            return Ok(InsertOutcome::BookingNumberTaken);
        }

        let id = BookingId::new(self.inner.next_booking_id.fetch_add(1, Ordering::SeqCst) + 1);
        let stored = booking.clone().into_booking(id);
        self.pending.insert(id, stored.clone());
        Ok(InsertOutcome::Inserted(stored))
    }

    async fn update_schedule(
        &mut self,
        id: BookingId,
        slot: &TimeSlot,
        updated_at: DateTime<Utc>,
    ) -> Result<Booking> {
        let slot = *slot;
        self.modify(id, updated_at, |booking| booking.slot = slot)
    }

    async fn update_status(
        &mut self,
        id: BookingId,
        status: BookingStatus,
        updated_at: DateTime<Utc>,
    ) -> Result<Booking> {
        self.modify(id, updated_at, |booking| booking.status = status)
    }

    async fn update_notes(
        &mut self,
        id: BookingId,
        notes: &BookingNotes,
        updated_at: DateTime<Utc>,
    ) -> Result<Booking> {
        let notes = notes.clone();
        self.modify(id, updated_at, |booking| booking.notes = notes)
    }

    async fn commit(self) -> Result<()> {
        self.inner.ensure_available()?;
        let mut tables = self.inner.tables();

        for booking in self.pending.values() {
            let others = tables.bookings.values().filter(|other| other.id != booking.id);
            if booking.occupies_slot()
                && overlaps(others, booking.provider_id, &booking.slot, Some(booking.id))
            {
                return Err(BookingError::Conflict {
                    provider_id: booking.provider_id,
                    start: booking.slot.start(),
                    end: booking.slot.end(),
                });
            }
            let duplicate_number = tables.bookings.values().any(|other| {
                other.id != booking.id && other.booking_number == booking.booking_number
            });
            if duplicate_number {
                return Err(TransientError::SerializationFailure(format!(
                    "booking number {} was committed concurrently",
                    booking.booking_number
                ))
                .into());
            }
        }

        tables.bookings.extend(self.pending);
        Ok(())
    }

    async fn rollback(self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::panic)]

    use super::*;
    use crate::helpers::new_booking;
    use chrono::TimeZone;

    fn at(hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, 2, hour, 0, 0).unwrap()
    }

    #[tokio::test]
    async fn writes_are_invisible_until_commit() {
        let store = InMemoryBookingStore::new();
        let mut tx = store.begin().await.unwrap();
        let InsertOutcome::Inserted(booking) = tx
            .insert(&new_booking(ProviderId::new(1), TimeSlot::new(at(10), 60)))
            .await
            .unwrap()
        else {
            panic!("expected insert");
        };

        assert!(store.find_by_id(booking.id).await.unwrap().is_none());
        assert_eq!(tx.find_for_update(booking.id).await.unwrap(), Some(booking.clone()));

        tx.commit().await.unwrap();
        assert_eq!(store.find_by_id(booking.id).await.unwrap(), Some(booking));
    }

    #[tokio::test]
    async fn dropping_a_transaction_discards_writes_and_releases_lock() {
        let store = InMemoryBookingStore::new();
        let provider = ProviderId::new(1);
        {
            let mut tx = store.begin().await.unwrap();
            tx.lock_provider(provider, Duration::from_millis(10)).await.unwrap();
            tx.insert(&new_booking(provider, TimeSlot::new(at(10), 60)))
                .await
                .unwrap();
        }

        assert!(store.is_empty());
        let mut tx = store.begin().await.unwrap();
        tx.lock_provider(provider, Duration::from_millis(10)).await.unwrap();
    }

    #[tokio::test]
    async fn contended_lock_times_out() {
        let store = InMemoryBookingStore::new();
        let provider = ProviderId::new(1);

        let mut holder = store.begin().await.unwrap();
        holder.lock_provider(provider, Duration::from_millis(10)).await.unwrap();

        let mut waiter = store.begin().await.unwrap();
        let err = waiter
            .lock_provider(provider, Duration::from_millis(20))
            .await
            .unwrap_err();
        assert_eq!(
            err,
            BookingError::Transient(TransientError::LockTimeout {
                provider_id: provider,
                waited_ms: 20,
            })
        );

        let mut other = store.begin().await.unwrap();
        other
            .lock_provider(ProviderId::new(2), Duration::from_millis(20))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn duplicate_booking_number_is_reported() {
        let store = InMemoryBookingStore::new();
        let booking = new_booking(ProviderId::new(1), TimeSlot::new(at(10), 60));
        store.seed(booking.clone());

        let mut tx = store.begin().await.unwrap();
        let mut duplicate = booking;
        duplicate.slot = TimeSlot::new(at(14), 60);
        assert_eq!(
            tx.insert(&duplicate).await.unwrap(),
            InsertOutcome::BookingNumberTaken
        );
    }

    #[tokio::test]
    async fn commit_rejects_overlap_that_skipped_the_lock() {
        let store = InMemoryBookingStore::new();
        let provider = ProviderId::new(1);
        store.seed(new_booking(provider, TimeSlot::new(at(10), 60)));

        let mut tx = store.begin().await.unwrap();
        let mut overlapping = new_booking(provider, TimeSlot::new(at(10), 30));
        overlapping.booking_number = "BK202501020002".parse().unwrap();
        tx.insert(&overlapping).await.unwrap();

        assert!(matches!(
            tx.commit().await,
            Err(BookingError::Conflict { .. })
        ));
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn cancelled_bookings_free_their_slot() {
        let store = InMemoryBookingStore::new();
        let provider = ProviderId::new(1);
        let mut cancelled = new_booking(provider, TimeSlot::new(at(10), 60));
        cancelled.status = BookingStatus::CancelledByBarber;
        store.seed(cancelled);

        assert!(
            !store
                .check_conflict(provider, &TimeSlot::new(at(10), 60), None)
                .await
                .unwrap()
        );
    }

    #[tokio::test]
    async fn failure_injection() {
        let store = InMemoryBookingStore::new();
        store.set_unavailable(true);
        assert!(store.begin().await.unwrap_err().is_retryable());
        store.set_unavailable(false);

        store.fail_history_appends(true);
        let entry = NewHistoryEntry {
            booking_id: BookingId::new(1),
            actor_id: None,
            delta: chairbook_core::HistoryDelta::StatusChanged {
                old: BookingStatus::Pending,
                new: BookingStatus::Confirmed,
            },
            reason: None,
            recorded_at: at(9),
        };
        assert!(store.append_history(entry.clone()).await.is_err());
        store.fail_history_appends(false);
        store.append_history(entry).await.unwrap();
        assert_eq!(store.history_len(), 1);
    }
}
