//! The booking lifecycle orchestrator.
//!
//! [`BookingService`] composes the pure scheduling rules from `chairbook-core`
//! with a [`BookingStore`] and the catalog collaborators:
//!
//! ```text
//! validate slot → provider/service lookups → begin tx → lock provider
//!   → conflict probe → write → commit → history + cache invalidation (best-effort)
//! ```
//!
//! Every mutation takes the provider's schedule lock before touching rows, so
//! all writers of one provider queue in the same order and writers of
//! different providers never wait for each other. The audit entry's place in
//! the booking's effect sequence is reserved before commit, so history lands
//! in commit order even when an append is retried.

use crate::HealthReport;
use crate::effects::{Effect, EffectRunner, SequenceTicket};
use crate::metrics::BookingMetrics;
use chairbook_core::directory::{
    CacheInvalidator, NoopCacheInvalidator, ProviderDirectory, ServiceDirectory, ServiceRecord,
};
use chairbook_core::environment::Clock;
use chairbook_core::error::{
    BookingError, BookingKey, Resource, StateError, StateOperation, TransientError,
    ValidationError,
};
use chairbook_core::history::{BookingHistory, HistoryDelta, NewHistoryEntry};
use chairbook_core::pricing::MINOR_UNIT_SCALE;
use chairbook_core::slot::TimeWindow;
use chairbook_core::store::{BookingStore, BookingTransaction, InsertOutcome};
use chairbook_core::types::{BookingNotes, CreateBookingRequest, NewBooking, Party, ServiceSnapshot};
use chairbook_core::{
    Booking, BookingId, BookingNumber, BookingStateMachine, BookingStatus, BookingUpdate,
    CustomerId, DateTime, Decimal, ProviderId, PublicId, RequestContext, Result,
    SchedulingPolicy, TimeSlot, Utc,
};
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

/// Orchestrates booking creation, rescheduling, status changes and updates.
///
/// # Example
///
/// ```
/// use chairbook_runtime::BookingService;
/// use chairbook_core::{RequestContext, SchedulingPolicy};
/// use chairbook_testing::helpers::{customer_request, hours_after, PROVIDER_ID};
/// use chairbook_testing::{InMemoryBookingStore, MockDirectory, test_clock};
/// use std::sync::Arc;
///
/// # async fn example() -> chairbook_core::Result<()> {
/// let directory = Arc::new(MockDirectory::new());
/// # directory.add_provider(chairbook_testing::helpers::provider_record(PROVIDER_ID));
/// # directory.add_service(chairbook_testing::helpers::service_record(
/// #     PROVIDER_ID,
/// #     chairbook_testing::helpers::SERVICE_ID,
/// # ));
/// let service = BookingService::new(
///     Arc::new(InMemoryBookingStore::new()),
///     directory.clone(),
///     directory,
///     Arc::new(test_clock()),
///     SchedulingPolicy::default(),
/// );
///
/// let request = customer_request(PROVIDER_ID, hours_after(2), 30);
/// let booking = service.create_booking(request, &RequestContext::system()).await?;
/// assert!(!service.check_availability(PROVIDER_ID, hours_after(2), 30).await?);
/// # let _ = booking;
/// # Ok(())
/// # }
/// ```
pub struct BookingService<S> {
    store: Arc<S>,
    providers: Arc<dyn ProviderDirectory>,
    services: Arc<dyn ServiceDirectory>,
    cache: Arc<dyn CacheInvalidator>,
    clock: Arc<dyn Clock>,
    policy: SchedulingPolicy,
    effects: EffectRunner,
}

impl<S> BookingService<S>
where
    S: BookingStore + 'static,
{
    /// Create a service without a cache sink and with default effect settings.
    #[must_use]
    pub fn new(
        store: Arc<S>,
        providers: Arc<dyn ProviderDirectory>,
        services: Arc<dyn ServiceDirectory>,
        clock: Arc<dyn Clock>,
        policy: SchedulingPolicy,
    ) -> Self {
        Self {
            store,
            providers,
            services,
            cache: Arc::new(NoopCacheInvalidator),
            clock,
            policy,
            effects: EffectRunner::new(crate::config::EffectsConfig::default()),
        }
    }

    /// Notify `cache` whenever a provider's bookings change.
    #[must_use]
    pub fn with_cache_invalidator(mut self, cache: Arc<dyn CacheInvalidator>) -> Self {
        self.cache = cache;
        self
    }

    /// Run side effects through `effects`.
    #[must_use]
    pub fn with_effects(mut self, effects: EffectRunner) -> Self {
        self.effects = effects;
        self
    }

    /// The side-effect runner, for flushing and failure inspection.
    #[must_use]
    pub const fn effects(&self) -> &EffectRunner {
        &self.effects
    }

    /// The scheduling policy in force.
    #[must_use]
    pub const fn policy(&self) -> &SchedulingPolicy {
        &self.policy
    }

    /// Health of the service's background machinery.
    #[must_use]
    pub fn health(&self) -> HealthReport {
        HealthReport::new(vec![self.effects.health()])
    }

    // ========================================================================
    // Mutations
    // ========================================================================

    /// Create a booking.
    ///
    /// # Errors
    ///
    /// - `Validation` for a bad slot, party or discount, or an inactive provider/service
    /// - `NotFound` for an unknown provider, or a service the provider does not offer
    /// - `Conflict` if the slot overlaps an occupying booking of the provider
    /// - `Transient` if the provider lock could not be taken in time or the store failed
    #[tracing::instrument(
        skip(self, request, ctx),
        fields(provider_id = %request.provider_id, service_id = %request.service_id)
    )]
    pub async fn create_booking(
        &self,
        request: CreateBookingRequest,
        ctx: &RequestContext,
    ) -> Result<Booking> {
        self.observed("create", self.create(request, ctx)).await
    }

    /// Move a `pending` or `confirmed` booking to a new interval.
    ///
    /// The status and the price snapshot are kept.
    ///
    /// # Errors
    ///
    /// - `NotFound` for an unknown booking
    /// - `State` if the booking is no longer `pending` or `confirmed`
    /// - `Validation` for a bad slot
    /// - `Conflict` if the new slot overlaps another occupying booking; the
    ///   stored interval is left unchanged
    /// - `Transient` if the provider lock could not be taken in time or the store failed
    #[tracing::instrument(skip(self, id, reason, ctx), fields(booking_id = %id))]
    pub async fn reschedule_booking(
        &self,
        id: BookingId,
        new_start: DateTime<Utc>,
        new_duration_minutes: u32,
        reason: Option<String>,
        ctx: &RequestContext,
    ) -> Result<Booking> {
        let work = self.reschedule(id, new_start, new_duration_minutes, reason, ctx);
        self.observed("reschedule", work).await
    }

    /// Move a booking to `new_status`.
    ///
    /// # Errors
    ///
    /// - `NotFound` for an unknown booking
    /// - `State` if the transition table does not allow the step
    /// - `Transient` if the provider lock could not be taken in time or the store failed
    #[tracing::instrument(
        skip(self, id, new_status, reason, ctx),
        fields(booking_id = %id, new_status = %new_status)
    )]
    pub async fn update_status(
        &self,
        id: BookingId,
        new_status: BookingStatus,
        reason: Option<String>,
        ctx: &RequestContext,
    ) -> Result<Booking> {
        let work = self.transition(id, new_status, reason, ctx);
        self.observed("update_status", work).await
    }

    /// Cancel a booking on behalf of the customer or the provider.
    ///
    /// # Errors
    ///
    /// - `NotFound` for an unknown booking
    /// - `State` if the booking is terminal, or the acting party may not cancel
    ///   from its status (a customer cannot cancel a booking in progress)
    /// - `Transient` if the provider lock could not be taken in time or the store failed
    #[tracing::instrument(skip(self, id, reason, ctx), fields(booking_id = %id))]
    pub async fn cancel_booking(
        &self,
        id: BookingId,
        by_customer: bool,
        reason: Option<String>,
        ctx: &RequestContext,
    ) -> Result<Booking> {
        self.observed("cancel", self.cancel(id, by_customer, reason, ctx)).await
    }

    /// Apply a partial update to the booking's free-text fields.
    ///
    /// A patch that changes nothing returns the booking untouched and records
    /// no history.
    ///
    /// # Errors
    ///
    /// - `NotFound` for an unknown booking
    /// - `State` if the booking is terminal
    /// - `Transient` if the provider lock could not be taken in time or the store failed
    #[tracing::instrument(skip(self, id, update, ctx), fields(booking_id = %id))]
    pub async fn update_booking(
        &self,
        id: BookingId,
        update: BookingUpdate,
        ctx: &RequestContext,
    ) -> Result<Booking> {
        self.observed("update", self.update(id, update, ctx)).await
    }

    // ========================================================================
    // Reads
    // ========================================================================

    /// Whether `provider_id` is free for `duration_minutes` from `start`.
    ///
    /// Read-only probe: takes no lock and needs no deadline, so the answer may
    /// be stale by the time a booking is attempted. Only the duration rule is
    /// applied; notice and horizon are checked when booking.
    ///
    /// # Errors
    ///
    /// Returns `Validation(DurationOutOfRange)` for a duration the policy
    /// would never accept, or an error if the store cannot be queried.
    #[tracing::instrument(
        level = "debug",
        skip(self, provider_id),
        fields(provider_id = %provider_id)
    )]
    pub async fn check_availability(
        &self,
        provider_id: ProviderId,
        start: DateTime<Utc>,
        duration_minutes: u32,
    ) -> Result<bool> {
        self.policy.validator.validate_duration(duration_minutes)?;
        let slot = TimeSlot::new(start, duration_minutes);
        let taken = self.store.check_conflict(provider_id, &slot, None).await?;
        Ok(!taken)
    }

    /// Load a booking by id.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for an unknown id.
    pub async fn booking(&self, id: BookingId) -> Result<Booking> {
        self.store
            .find_by_id(id)
            .await?
            .ok_or_else(|| BookingError::booking_not_found(BookingKey::Id(id)))
    }

    /// Load a booking by its public id.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for an unknown id.
    pub async fn booking_by_public_id(&self, public_id: PublicId) -> Result<Booking> {
        self.store
            .find_by_public_id(public_id)
            .await?
            .ok_or_else(|| BookingError::booking_not_found(BookingKey::PublicId(public_id)))
    }

    /// Load a booking by its booking number.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for an unknown number.
    pub async fn booking_by_number(&self, number: &BookingNumber) -> Result<Booking> {
        self.store
            .find_by_booking_number(number)
            .await?
            .ok_or_else(|| BookingError::booking_not_found(BookingKey::Number(number.clone())))
    }

    /// A customer's bookings, newest start first.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be queried.
    pub async fn bookings_for_customer(&self, customer_id: CustomerId) -> Result<Vec<Booking>> {
        self.store.find_by_customer(customer_id).await
    }

    /// A provider's bookings intersecting `window`, in start order.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be queried.
    pub async fn bookings_for_provider(
        &self,
        provider_id: ProviderId,
        window: TimeWindow,
    ) -> Result<Vec<Booking>> {
        self.store.find_by_provider(provider_id, window).await
    }

    /// Audit trail of a booking, oldest first.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for an unknown booking.
    pub async fn history(&self, id: BookingId) -> Result<Vec<BookingHistory>> {
        self.booking(id).await?;
        self.store.history(id).await
    }

    // ========================================================================
    // Internals
    // ========================================================================

    async fn create(&self, request: CreateBookingRequest, ctx: &RequestContext) -> Result<Booking> {
        let now = self.clock.now();
        self.policy
            .validator
            .validate(request.start_time, request.duration_minutes, now)?;

        let service = self.active_service(&request).await?;
        let party = Party::resolve(request.customer_id, request.guest.as_ref())?;
        let discount = validate_discount(request.discount_amount, service.price)?;

        let slot = TimeSlot::new(request.start_time, request.duration_minutes);
        let pricing = self
            .policy
            .pricing
            .compute(service.price, discount, service.currency.clone());

        let mut tx = self.store.begin().await?;
        self.lock_provider(&mut tx, request.provider_id, ctx).await?;
        self.policy
            .conflicts
            .ensure_available(&mut tx, request.provider_id, &slot, None)
            .await?;

        let booking_number = BookingNumber::generate(now.date_naive(), &mut rand::thread_rng());
        let mut draft = NewBooking {
            public_id: PublicId::new(),
            booking_number,
            provider_id: request.provider_id,
            party,
            service: ServiceSnapshot {
                service_id: service.id,
                name: service.name,
            },
            slot,
            pricing,
            status: BookingStatus::Pending,
            notes: BookingNotes {
                customer_notes: request.customer_notes,
                special_requests: request.special_requests,
                internal_notes: None,
            },
            created_at: now,
        };

        let booking = self.insert_with_fresh_numbers(&mut tx, &mut draft).await?;
        let ticket = self.effects.sequence(booking.id);
        tx.commit().await?;

        BookingMetrics::record_created();
        tracing::info!(
            booking_id = %booking.id,
            booking_number = %booking.booking_number,
            start = %booking.slot.start(),
            end = %booking.slot.end(),
            "Booking created"
        );

        let delta = HistoryDelta::created(&booking);
        self.record_history(ticket, ctx, delta, None, now);
        self.invalidate(booking.provider_id);
        Ok(booking)
    }

    async fn reschedule(
        &self,
        id: BookingId,
        new_start: DateTime<Utc>,
        new_duration_minutes: u32,
        reason: Option<String>,
        ctx: &RequestContext,
    ) -> Result<Booking> {
        let current = self.booking(id).await?;
        BookingStateMachine::validate_reschedule(current.status)?;

        let now = self.clock.now();
        self.policy
            .validator
            .validate(new_start, new_duration_minutes, now)?;
        let slot = TimeSlot::new(new_start, new_duration_minutes);

        let mut tx = self.store.begin().await?;
        let locked = self.lock_booking(&mut tx, &current, ctx).await?;
        BookingStateMachine::validate_reschedule(locked.status)?;
        let ticket = self.effects.sequence(id);
        self.policy
            .conflicts
            .ensure_available(&mut tx, locked.provider_id, &slot, Some(id))
            .await?;

        let updated = tx.update_schedule(id, &slot, now).await?;
        tx.commit().await?;

        tracing::info!(
            old_start = %locked.slot.start(),
            new_start = %updated.slot.start(),
            new_end = %updated.slot.end(),
            "Booking rescheduled"
        );

        let delta = HistoryDelta::rescheduled(&locked, &updated);
        self.record_history(ticket, ctx, delta, reason, now);
        self.invalidate(updated.provider_id);
        Ok(updated)
    }

    async fn cancel(
        &self,
        id: BookingId,
        by_customer: bool,
        reason: Option<String>,
        ctx: &RequestContext,
    ) -> Result<Booking> {
        let target = BookingStateMachine::cancellation_status(by_customer);
        let current = self.booking(id).await?;
        if current.status.is_terminal() {
            return Err(StateError::new(current.status, StateOperation::Transition(target)).into());
        }
        self.transition(id, target, reason, ctx).await
    }

    async fn update(
        &self,
        id: BookingId,
        update: BookingUpdate,
        ctx: &RequestContext,
    ) -> Result<Booking> {
        let current = self.booking(id).await?;
        ensure_editable(&current)?;

        let mut tx = self.store.begin().await?;
        let locked = self.lock_booking(&mut tx, &current, ctx).await?;
        ensure_editable(&locked)?;

        let (notes, changes) = update.apply(&locked.notes);
        if changes.is_empty() {
            tx.rollback().await?;
            tracing::debug!("Update changes nothing");
            return Ok(locked);
        }

        let now = self.clock.now();
        let ticket = self.effects.sequence(id);
        let updated = tx.update_notes(id, &notes, now).await?;
        tx.commit().await?;

        tracing::info!(changed_fields = changes.len(), "Booking updated");
        self.record_history(ticket, ctx, HistoryDelta::Updated { changes }, None, now);
        self.invalidate(updated.provider_id);
        Ok(updated)
    }

    async fn transition(
        &self,
        id: BookingId,
        new_status: BookingStatus,
        reason: Option<String>,
        ctx: &RequestContext,
    ) -> Result<Booking> {
        let current = self.booking(id).await?;
        BookingStateMachine::validate_transition(current.status, new_status)?;

        let mut tx = self.store.begin().await?;
        let locked = self.lock_booking(&mut tx, &current, ctx).await?;
        BookingStateMachine::validate_transition(locked.status, new_status)?;

        let now = self.clock.now();
        let ticket = self.effects.sequence(id);
        let updated = tx.update_status(id, new_status, now).await?;
        tx.commit().await?;

        BookingMetrics::record_transition(locked.status, new_status);
        tracing::info!(old_status = %locked.status, "Booking status changed");

        let delta = HistoryDelta::StatusChanged {
            old: locked.status,
            new: new_status,
        };
        self.record_history(ticket, ctx, delta, reason, now);
        self.invalidate(updated.provider_id);
        Ok(updated)
    }

    /// Take the booking's provider lock, then load the row for update.
    async fn lock_booking(
        &self,
        tx: &mut S::Tx,
        current: &Booking,
        ctx: &RequestContext,
    ) -> Result<Booking> {
        self.lock_provider(tx, current.provider_id, ctx).await?;
        tx.find_for_update(current.id)
            .await?
            .ok_or_else(|| BookingError::booking_not_found(BookingKey::Id(current.id)))
    }

    async fn lock_provider(
        &self,
        tx: &mut S::Tx,
        provider_id: ProviderId,
        ctx: &RequestContext,
    ) -> Result<()> {
        let started = Instant::now();
        let locked = self.policy.conflicts.lock(tx, provider_id, ctx).await;
        BookingMetrics::record_lock_wait(started.elapsed());
        locked
    }

    async fn active_service(&self, request: &CreateBookingRequest) -> Result<ServiceRecord> {
        let provider = self
            .providers
            .provider(request.provider_id)
            .await?
            .ok_or(BookingError::NotFound(Resource::Provider(request.provider_id)))?;
        if !provider.is_active {
            return Err(ValidationError::ProviderInactive(provider.id).into());
        }

        let service = self
            .services
            .service(request.provider_id, request.service_id)
            .await?
            .ok_or(BookingError::NotFound(Resource::Service(request.service_id)))?;
        if service.provider_id != provider.id {
            return Err(BookingError::NotFound(Resource::Service(request.service_id)));
        }
        if !service.is_active {
            return Err(ValidationError::ServiceInactive(service.id).into());
        }
        Ok(service)
    }

    async fn insert_with_fresh_numbers(
        &self,
        tx: &mut S::Tx,
        draft: &mut NewBooking,
    ) -> Result<Booking> {
        let attempts = self.policy.booking_number_attempts.max(1);
        for attempt in 1..=attempts {
            match tx.insert(draft).await? {
                InsertOutcome::Inserted(booking) => return Ok(booking),
                InsertOutcome::BookingNumberTaken => {
                    tracing::debug!(
                        attempt,
                        booking_number = %draft.booking_number,
                        "Booking number already taken"
                    );
                    draft.booking_number = BookingNumber::generate(
                        draft.created_at.date_naive(),
                        &mut rand::thread_rng(),
                    );
                }
            }
        }
        Err(BookingError::Internal(format!(
            "no free booking number for {} after {attempts} attempts",
            draft.created_at.date_naive()
        )))
    }

    /// Append an audit entry after commit, behind earlier entries of the
    /// same booking.
    fn record_history(
        &self,
        ticket: SequenceTicket,
        ctx: &RequestContext,
        delta: HistoryDelta,
        reason: Option<String>,
        recorded_at: DateTime<Utc>,
    ) {
        let entry = NewHistoryEntry {
            booking_id: ticket.booking_id(),
            actor_id: ctx.actor_id,
            delta,
            reason,
            recorded_at,
        };
        let effect = Effect::RecordHistory {
            booking_id: entry.booking_id,
            change_type: entry.change_type(),
        };
        let store = Arc::clone(&self.store);
        self.effects.spawn_in_sequence(ticket, effect, move || {
            let store = Arc::clone(&store);
            let entry = entry.clone();
            async move { store.append_history(entry).await }
        });
    }

    fn invalidate(&self, provider_id: ProviderId) {
        let cache = Arc::clone(&self.cache);
        self.effects
            .spawn(Effect::InvalidateProvider { provider_id }, move || {
                let cache = Arc::clone(&cache);
                async move { cache.invalidate_provider(provider_id).await }
            });
    }

    /// Time `work` and count its outcome.
    async fn observed<T>(
        &self,
        operation: &'static str,
        work: impl Future<Output = Result<T>>,
    ) -> Result<T> {
        let started = Instant::now();
        let result = work.await;

        let outcome = match &result {
            Ok(_) => "ok",
            Err(err) => {
                match err {
                    BookingError::Conflict { .. } => BookingMetrics::record_conflict(),
                    BookingError::Transient(TransientError::LockTimeout { .. }) => {
                        BookingMetrics::record_lock_timeout();
                    }
                    _ => {}
                }
                if err.is_user_error() {
                    tracing::info!(operation, error = %err, "Booking request rejected");
                } else {
                    tracing::warn!(operation, error = %err, "Booking operation failed");
                }
                error_label(err)
            }
        };

        BookingMetrics::record_operation(operation, outcome, started.elapsed());
        result
    }
}

const fn error_label(err: &BookingError) -> &'static str {
    match err {
        BookingError::Validation(_) => "validation",
        BookingError::NotFound(_) => "not_found",
        BookingError::Conflict { .. } => "conflict",
        BookingError::State(_) => "state",
        BookingError::Transient(_) => "transient",
        BookingError::Internal(_) => "internal",
    }
}

fn ensure_editable(booking: &Booking) -> Result<()> {
    if booking.status.is_terminal() {
        return Err(StateError::new(booking.status, StateOperation::Update).into());
    }
    Ok(())
}

/// A discount must be non-negative, at most the price, and expressible in
/// minor units.
fn validate_discount(
    discount: Option<Decimal>,
    price: Decimal,
) -> std::result::Result<Decimal, ValidationError> {
    let discount = discount.unwrap_or(Decimal::ZERO);
    if discount.is_sign_negative() && !discount.is_zero()
        || discount > price
        || discount.normalize().scale() > MINOR_UNIT_SCALE
    {
        return Err(ValidationError::InvalidDiscount { discount, price });
    }
    Ok(discount)
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn discounts_are_bounded_by_the_price() {
        let price = dec!(50.00);
        assert_eq!(validate_discount(None, price), Ok(Decimal::ZERO));
        assert_eq!(validate_discount(Some(dec!(50.00)), price), Ok(dec!(50.00)));
        assert_eq!(validate_discount(Some(dec!(-0.00)), price), Ok(dec!(-0.00)));

        for discount in [dec!(-1), dec!(50.01), dec!(0.001)] {
            assert_eq!(
                validate_discount(Some(discount), price),
                Err(ValidationError::InvalidDiscount { discount, price })
            );
        }
    }

    #[test]
    fn error_labels_follow_the_taxonomy() {
        assert_eq!(
            error_label(&TransientError::DeadlineExceeded.into()),
            "transient"
        );
        assert_eq!(error_label(&BookingError::Internal("x".into())), "internal");
    }
}
