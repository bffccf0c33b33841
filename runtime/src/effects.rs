//! Best-effort side effects that run after a booking transaction commits.
//!
//! History appends and cache invalidation must never fail the operation that
//! triggered them. The [`EffectRunner`] spawns each one as a tracked task:
//!
//! - transient failures are retried with the configured [`RetryPolicy`]
//! - every effect is bounded by a time budget
//! - failures are logged, counted and kept in a bounded [`FailureQueue`]
//! - [`EffectRunner::flush`] waits for in-flight effects (shutdown, tests)
//!
//! Effects of one booking that must land in order (its audit trail) reserve a
//! [`SequenceTicket`] while the booking row is still locked and run through
//! [`EffectRunner::spawn_in_sequence`].

use crate::config::EffectsConfig;
use crate::metrics::EffectMetrics;
use crate::retry::{RetryPolicy, retry_transient};
use crate::{HealthCheck, error::RuntimeError};
use chairbook_core::history::ChangeType;
use chairbook_core::{BookingId, ProviderId, Result};
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant, SystemTime};
use tokio::sync::{oneshot, watch};

/// A side effect scheduled by a booking operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Effect {
    /// Append an audit entry
    RecordHistory {
        /// Booking the entry belongs to
        booking_id: BookingId,
        /// Kind of mutation recorded
        change_type: ChangeType,
    },
    /// Drop cached data derived from a provider's schedule
    InvalidateProvider {
        /// Provider whose schedule changed
        provider_id: ProviderId,
    },
}

impl Effect {
    /// Metric label of the effect kind.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::RecordHistory { .. } => "history",
            Self::InvalidateProvider { .. } => "cache_invalidation",
        }
    }
}

impl fmt::Display for Effect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::RecordHistory {
                booking_id,
                change_type,
            } => write!(f, "record `{change_type}` history for booking #{booking_id}"),
            Self::InvalidateProvider { provider_id } => {
                write!(f, "invalidate cache of provider {provider_id}")
            }
        }
    }
}

/// A side effect that did not complete.
#[derive(Debug, Clone)]
pub struct EffectFailure {
    /// The effect that failed
    pub effect: Effect,
    /// The last error, or the timeout
    pub error: String,
    /// When the failure was recorded
    pub failed_at: SystemTime,
}

/// Bounded queue of failed side effects.
///
/// FIFO; when full, the oldest record is dropped. Cloning shares the queue.
#[derive(Debug, Clone)]
pub struct FailureQueue {
    queue: Arc<Mutex<VecDeque<EffectFailure>>>,
    max_size: usize,
}

impl FailureQueue {
    /// Create an empty queue holding at most `max_size` records.
    #[must_use]
    pub fn new(max_size: usize) -> Self {
        Self {
            queue: Arc::new(Mutex::new(VecDeque::new())),
            max_size,
        }
    }

    /// Record a failure, evicting the oldest record when full.
    pub fn push(&self, failure: EffectFailure) {
        let mut queue = self.queue.lock().unwrap_or_else(PoisonError::into_inner);

        if queue.len() >= self.max_size {
            queue.pop_front();
            EffectMetrics::record_dropped();
            tracing::warn!(
                max_size = self.max_size,
                "Effect failure queue at capacity, dropping oldest entry"
            );
        }
        if self.max_size > 0 {
            queue.push_back(failure);
        }
        EffectMetrics::record_queue_size(queue.len());
    }

    /// Number of recorded failures.
    #[must_use]
    pub fn len(&self) -> usize {
        self.queue
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Whether no failure is recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Remove and return every recorded failure, oldest first.
    pub fn drain(&self) -> Vec<EffectFailure> {
        let mut queue = self.queue.lock().unwrap_or_else(PoisonError::into_inner);
        let entries: Vec<_> = queue.drain(..).collect();
        EffectMetrics::record_queue_size(0);
        entries
    }

    /// Capacity of the queue.
    #[must_use]
    pub const fn max_size(&self) -> usize {
        self.max_size
    }
}

#[derive(Debug)]
struct Tracker {
    pending: AtomicUsize,
    idle: watch::Sender<()>,
}

/// Decrements the pending count on drop, so a panicking effect is still
/// accounted for.
struct PendingGuard(Arc<Tracker>);

impl Drop for PendingGuard {
    fn drop(&mut self) {
        if self.0.pending.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.0.idle.send_replace(());
        }
    }
}

/// Per-booking chains of sequenced effects.
///
/// Each lane holds the completion signal of the latest ticket reserved for a
/// booking, tagged with the ticket's generation.
#[derive(Debug, Default)]
struct Sequencer {
    lanes: Mutex<HashMap<BookingId, (u64, oneshot::Receiver<()>)>>,
    next_generation: AtomicU64,
}

/// A reserved position in one booking's sequence of side effects.
///
/// An effect spawned with [`EffectRunner::spawn_in_sequence`] starts only
/// after every earlier ticket of the same booking has finished or been
/// dropped. Dropping an unused ticket releases its successor.
#[derive(Debug)]
pub struct SequenceTicket {
    booking_id: BookingId,
    generation: u64,
    previous: Option<oneshot::Receiver<()>>,
    sequencer: Arc<Sequencer>,
    // Dropping the sender wakes the next ticket.
    _done: oneshot::Sender<()>,
}

impl SequenceTicket {
    /// Booking this ticket orders effects for.
    #[must_use]
    pub const fn booking_id(&self) -> BookingId {
        self.booking_id
    }

    async fn wait_turn(&mut self) {
        if let Some(previous) = self.previous.take() {
            // A closed channel also means the predecessor is done.
            let _ = previous.await;
        }
    }
}

impl Drop for SequenceTicket {
    fn drop(&mut self) {
        let mut lanes = self
            .sequencer
            .lanes
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let is_latest = lanes
            .get(&self.booking_id)
            .is_some_and(|(generation, _)| *generation == self.generation);
        if is_latest {
            lanes.remove(&self.booking_id);
        }
    }
}

/// Spawns and tracks best-effort side effects.
///
/// Cloning is cheap; clones share the pending count and the failure queue.
///
/// # Example
///
/// ```
/// use chairbook_runtime::config::EffectsConfig;
/// use chairbook_runtime::effects::{Effect, EffectRunner};
/// use chairbook_core::ProviderId;
/// use std::time::Duration;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let runner = EffectRunner::new(EffectsConfig::default());
/// runner.spawn(
///     Effect::InvalidateProvider { provider_id: ProviderId::new(1) },
///     || async { Ok(()) },
/// );
/// runner.flush(Duration::from_secs(1)).await?;
/// assert!(runner.failures().is_empty());
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct EffectRunner {
    timeout: Duration,
    retry: RetryPolicy,
    failures: FailureQueue,
    tracker: Arc<Tracker>,
    sequencer: Arc<Sequencer>,
}

impl EffectRunner {
    /// Create a runner from configuration.
    #[must_use]
    pub fn new(config: EffectsConfig) -> Self {
        let (idle, _) = watch::channel(());
        Self {
            timeout: config.timeout(),
            retry: config.retry_policy(),
            failures: FailureQueue::new(config.failure_queue_size),
            tracker: Arc::new(Tracker {
                pending: AtomicUsize::new(0),
                idle,
            }),
            sequencer: Arc::new(Sequencer::default()),
        }
    }

    /// Reserve the next position in `booking_id`'s effect sequence.
    ///
    /// Positions are handed out in call order, so reserve while the booking
    /// is still locked.
    #[must_use]
    pub fn sequence(&self, booking_id: BookingId) -> SequenceTicket {
        let generation = self.sequencer.next_generation.fetch_add(1, Ordering::SeqCst);
        let (done, finished) = oneshot::channel();
        let previous = self
            .sequencer
            .lanes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(booking_id, (generation, finished))
            .map(|(_, previous)| previous);

        SequenceTicket {
            booking_id,
            generation,
            previous,
            sequencer: Arc::clone(&self.sequencer),
            _done: done,
        }
    }

    /// Run `operation` in the background.
    ///
    /// `operation` is invoked once per attempt. Must be called from within a
    /// Tokio runtime.
    pub fn spawn<F, Fut>(&self, effect: Effect, operation: F)
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        let guard = self.track();
        let run = run_effect(
            effect,
            operation,
            self.timeout,
            self.retry,
            self.failures.clone(),
        );
        tokio::spawn(async move {
            let _guard = guard;
            run.await;
        });
    }

    /// Run `operation` in the background once every earlier effect holding a
    /// ticket of the same booking has finished.
    ///
    /// The time budget starts when the ticket's turn comes.
    pub fn spawn_in_sequence<F, Fut>(
        &self,
        mut ticket: SequenceTicket,
        effect: Effect,
        operation: F,
    ) where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        let guard = self.track();
        let run = run_effect(
            effect,
            operation,
            self.timeout,
            self.retry,
            self.failures.clone(),
        );
        tokio::spawn(async move {
            let _guard = guard;
            ticket.wait_turn().await;
            run.await;
            drop(ticket);
        });
    }

    fn track(&self) -> PendingGuard {
        self.tracker.pending.fetch_add(1, Ordering::SeqCst);
        PendingGuard(Arc::clone(&self.tracker))
    }

    /// Number of effects still running.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.tracker.pending.load(Ordering::SeqCst)
    }

    /// Failed effects recorded so far.
    #[must_use]
    pub const fn failures(&self) -> &FailureQueue {
        &self.failures
    }

    /// Wait until no effect is running.
    ///
    /// # Errors
    ///
    /// Returns [`RuntimeError::FlushTimeout`] with the number of effects still
    /// running if `timeout` elapses first.
    pub async fn flush(&self, timeout: Duration) -> std::result::Result<(), RuntimeError> {
        let mut idle = self.tracker.idle.subscribe();
        let drained = async {
            while self.pending() > 0 {
                if idle.changed().await.is_err() {
                    break;
                }
            }
        };

        tokio::time::timeout(timeout, drained).await.map_err(|_| {
            let pending = self.pending();
            tracing::error!(pending_effects = pending, "Timed out flushing side effects");
            RuntimeError::FlushTimeout(pending)
        })
    }

    /// Health of the side-effect pipeline.
    ///
    /// Degraded above 50% failure-queue usage, unhealthy when full.
    #[must_use]
    pub fn health(&self) -> HealthCheck {
        let size = self.failures.len();
        let capacity = self.failures.max_size().max(1);
        // Note: Precision loss acceptable for health check percentage (queue sizes < 2^52)
        #[allow(clippy::cast_precision_loss)]
        let usage = (size as f64 / capacity as f64) * 100.0;

        let check = if size >= capacity {
            HealthCheck::unhealthy("effects", "Side-effect failure queue is full")
        } else if usage > 50.0 {
            HealthCheck::degraded(
                "effects",
                format!("Side-effect failure queue is {usage:.0}% full"),
            )
        } else {
            HealthCheck::healthy("effects")
        };

        check
            .with_metadata("failure_queue_size", size.to_string())
            .with_metadata("failure_queue_capacity", capacity.to_string())
            .with_metadata("pending_effects", self.pending().to_string())
    }
}

/// Attempt `operation` within `timeout`, recording a failure if it never
/// succeeds.
async fn run_effect<F, Fut>(
    effect: Effect,
    operation: F,
    timeout: Duration,
    retry: RetryPolicy,
    failures: FailureQueue,
) where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    let started = Instant::now();

    let attempts = retry_transient(&retry, operation);
    let error = match tokio::time::timeout(timeout, attempts).await {
        Ok(Ok(())) => {
            EffectMetrics::record_execution(effect.kind(), started.elapsed());
            tracing::debug!(%effect, "Side effect completed");
            return;
        }
        Ok(Err(error)) => error.to_string(),
        Err(_) => format!(
            "timed out after {}ms",
            u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX)
        ),
    };

    EffectMetrics::record_failure(effect.kind());
    tracing::warn!(%effect, error = %error, "Side effect failed");
    failures.push(EffectFailure {
        effect,
        error,
        failed_at: SystemTime::now(),
    });
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use crate::HealthStatus;
    use chairbook_core::BookingError;
    use chairbook_core::error::TransientError;
    use std::sync::atomic::AtomicU32;

    fn config() -> EffectsConfig {
        EffectsConfig {
            timeout_ms: 200,
            failure_queue_size: 2,
            max_retries: 2,
            retry_delay_ms: 1,
        }
    }

    fn invalidate(id: i64) -> Effect {
        Effect::InvalidateProvider {
            provider_id: ProviderId::new(id),
        }
    }

    fn offline() -> BookingError {
        TransientError::StoreUnavailable("offline".into()).into()
    }

    #[tokio::test]
    async fn transient_failures_are_retried() {
        let runner = EffectRunner::new(config());
        let calls = Arc::new(AtomicU32::new(0));
        let counted = Arc::clone(&calls);

        runner.spawn(invalidate(1), move || {
            let calls = Arc::clone(&counted);
            async move {
                if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                    Err(offline())
                } else {
                    Ok(())
                }
            }
        });

        runner.flush(Duration::from_secs(1)).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert!(runner.failures().is_empty());
    }

    #[tokio::test]
    async fn failures_are_queued_oldest_first_and_bounded() {
        let runner = EffectRunner::new(config());
        for id in 1..=3 {
            runner.spawn(invalidate(id), || async { Err(offline()) });
            runner.flush(Duration::from_secs(1)).await.unwrap();
        }

        let failures = runner.failures().drain();
        assert_eq!(failures.len(), 2);
        assert_eq!(failures[0].effect, invalidate(2));
        assert_eq!(failures[1].effect, invalidate(3));
        assert!(failures[0].error.contains("offline"));
    }

    #[tokio::test]
    async fn slow_effects_time_out() {
        let runner = EffectRunner::new(config());
        runner.spawn(invalidate(1), || async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(())
        });

        runner.flush(Duration::from_secs(1)).await.unwrap();
        let failures = runner.failures().drain();
        assert_eq!(failures.len(), 1);
        assert!(failures[0].error.contains("timed out"));
    }

    #[tokio::test]
    async fn flush_reports_effects_still_running() {
        let runner = EffectRunner::new(config());
        runner.spawn(invalidate(1), || async {
            tokio::time::sleep(Duration::from_millis(150)).await;
            Ok(())
        });

        assert_eq!(
            runner.flush(Duration::from_millis(10)).await,
            Err(RuntimeError::FlushTimeout(1))
        );
        runner.flush(Duration::from_secs(1)).await.unwrap();
        assert_eq!(runner.pending(), 0);
    }

    fn record(booking_id: i64) -> Effect {
        Effect::RecordHistory {
            booking_id: BookingId::new(booking_id),
            change_type: ChangeType::StatusChanged,
        }
    }

    #[tokio::test]
    async fn sequenced_effects_run_in_reservation_order() {
        let runner = EffectRunner::new(EffectsConfig {
            retry_delay_ms: 30,
            ..config()
        });
        let log = Arc::new(Mutex::new(Vec::new()));
        let first = runner.sequence(BookingId::new(7));
        let second = runner.sequence(BookingId::new(7));

        // Spawn the later ticket first.
        let written = Arc::clone(&log);
        runner.spawn_in_sequence(second, record(7), move || {
            let written = Arc::clone(&written);
            async move {
                written.lock().unwrap().push("second");
                Ok(())
            }
        });

        let calls = Arc::new(AtomicU32::new(0));
        let written = Arc::clone(&log);
        runner.spawn_in_sequence(first, record(7), move || {
            let written = Arc::clone(&written);
            let calls = Arc::clone(&calls);
            async move {
                if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                    return Err(offline());
                }
                written.lock().unwrap().push("first");
                Ok(())
            }
        });

        runner.flush(Duration::from_secs(1)).await.unwrap();
        assert_eq!(*log.lock().unwrap(), vec!["first", "second"]);
        assert!(runner.failures().is_empty());
    }

    #[tokio::test]
    async fn dropped_ticket_releases_its_successor() {
        let runner = EffectRunner::new(config());
        let abandoned = runner.sequence(BookingId::new(3));
        let next = runner.sequence(BookingId::new(3));

        let ran = Arc::new(AtomicU32::new(0));
        let counted = Arc::clone(&ran);
        runner.spawn_in_sequence(next, record(3), move || {
            let counted = Arc::clone(&counted);
            async move {
                counted.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        });

        assert!(runner.flush(Duration::from_millis(20)).await.is_err());
        drop(abandoned);
        runner.flush(Duration::from_secs(1)).await.unwrap();
        assert_eq!(ran.load(Ordering::SeqCst), 1);
        assert!(runner.sequencer.lanes.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn different_bookings_do_not_wait_for_each_other() {
        let runner = EffectRunner::new(config());
        let _held = runner.sequence(BookingId::new(1));
        let other = runner.sequence(BookingId::new(2));

        runner.spawn_in_sequence(other, record(2), || async { Ok(()) });
        runner.flush(Duration::from_secs(1)).await.unwrap();
        assert_eq!(runner.pending(), 0);
    }

    #[tokio::test]
    async fn health_degrades_as_the_queue_fills() {
        let runner = EffectRunner::new(EffectsConfig {
            failure_queue_size: 4,
            ..config()
        });
        assert_eq!(runner.health().status, HealthStatus::Healthy);

        for id in 1..=3 {
            runner.spawn(invalidate(id), || async { Err(offline()) });
        }
        runner.flush(Duration::from_secs(1)).await.unwrap();
        assert_eq!(runner.health().status, HealthStatus::Degraded);
    }
}
