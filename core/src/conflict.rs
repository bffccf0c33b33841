//! Overlap detection under the provider-scoped lock.
//!
//! A check-then-write sequence for one provider is only safe if no other
//! sequence for the same provider can interleave with it. The resolver first
//! takes the provider's schedule lock inside the caller's transaction, then
//! probes for overlapping occupying bookings. A request that had to wait for
//! the lock probes the state committed by the previous holder.

use crate::error::{BookingError, Result, TransientError};
use crate::slot::TimeSlot;
use crate::store::BookingTransaction;
use crate::types::{BookingId, ProviderId, RequestContext};
use std::time::Duration;

/// Default upper bound on waiting for a provider's schedule lock.
pub const DEFAULT_LOCK_WAIT: Duration = Duration::from_secs(5);

/// Serializes schedule changes per provider and detects overlaps.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConflictResolver {
    lock_wait: Duration,
}

impl Default for ConflictResolver {
    fn default() -> Self {
        Self::new(DEFAULT_LOCK_WAIT)
    }
}

impl ConflictResolver {
    /// Create a resolver that waits at most `lock_wait` for a provider lock.
    #[must_use]
    pub const fn new(lock_wait: Duration) -> Self {
        Self { lock_wait }
    }

    /// Configured lock wait.
    #[must_use]
    pub const fn lock_wait(&self) -> Duration {
        self.lock_wait
    }

    /// Effective wait for a request: the configured wait, shortened by the
    /// caller's deadline.
    ///
    /// # Errors
    ///
    /// Returns `Transient(DeadlineExceeded)` if the deadline already passed.
    pub fn effective_wait(&self, ctx: &RequestContext) -> Result<Duration> {
        match ctx.remaining() {
            Some(remaining) if remaining.is_zero() => {
                Err(TransientError::DeadlineExceeded.into())
            }
            Some(remaining) => Ok(remaining.min(self.lock_wait)),
            None => Ok(self.lock_wait),
        }
    }

    /// Take `provider_id`'s schedule lock for the rest of the transaction.
    ///
    /// # Errors
    ///
    /// Returns `Transient(DeadlineExceeded)` if the deadline already passed and
    /// `Transient(LockTimeout)` if the lock was not granted in time.
    #[tracing::instrument(level = "debug", skip(self, tx, ctx), fields(provider_id = %provider_id))]
    pub async fn lock<T: BookingTransaction>(
        &self,
        tx: &mut T,
        provider_id: ProviderId,
        ctx: &RequestContext,
    ) -> Result<()> {
        let wait = self.effective_wait(ctx)?;
        tx.lock_provider(provider_id, wait).await
    }

    /// Whether `slot` overlaps an occupying booking of `provider_id` other
    /// than `exclude`. Must run after [`lock`](Self::lock) in the same
    /// transaction.
    ///
    /// # Errors
    ///
    /// Returns an error if the store probe fails.
    pub async fn has_conflict<T: BookingTransaction>(
        &self,
        tx: &mut T,
        provider_id: ProviderId,
        slot: &TimeSlot,
        exclude: Option<BookingId>,
    ) -> Result<bool> {
        tx.has_conflict(provider_id, slot, exclude).await
    }

    /// Fail with `Conflict` if `slot` is taken.
    ///
    /// # Errors
    ///
    /// Returns `BookingError::Conflict` if the slot overlaps an occupying
    /// booking, or the store error if the probe fails.
    pub async fn ensure_available<T: BookingTransaction>(
        &self,
        tx: &mut T,
        provider_id: ProviderId,
        slot: &TimeSlot,
        exclude: Option<BookingId>,
    ) -> Result<()> {
        if self.has_conflict(tx, provider_id, slot, exclude).await? {
            tracing::debug!(
                provider_id = %provider_id,
                start = %slot.start(),
                end = %slot.end(),
                "requested slot overlaps an existing booking"
            );
            return Err(BookingError::Conflict {
                provider_id,
                start: slot.start(),
                end: slot.end(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use std::time::Instant;

    #[test]
    fn wait_defaults_to_configured_bound() {
        let resolver = ConflictResolver::new(Duration::from_millis(300));
        let wait = resolver.effective_wait(&RequestContext::system()).unwrap();
        assert_eq!(wait, Duration::from_millis(300));
    }

    #[test]
    fn deadline_shortens_wait() {
        let resolver = ConflictResolver::new(Duration::from_secs(60));
        let ctx = RequestContext::system().with_timeout(Duration::from_millis(200));
        let wait = resolver.effective_wait(&ctx).unwrap();
        assert!(wait <= Duration::from_millis(200));
    }

    #[test]
    fn expired_deadline_is_rejected_before_waiting() {
        let resolver = ConflictResolver::default();
        let ctx = RequestContext::system().with_deadline(Instant::now());
        let err = resolver.effective_wait(&ctx).unwrap_err();
        assert_eq!(err, BookingError::Transient(TransientError::DeadlineExceeded));
        assert!(err.is_retryable());
    }
}
