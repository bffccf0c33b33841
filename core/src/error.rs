//! Error taxonomy for booking operations.
//!
//! | Variant      | Meaning                                   | Caller action            |
//! |--------------|-------------------------------------------|--------------------------|
//! | `Validation` | bad input or inactive catalog entry       | fix the request          |
//! | `NotFound`   | unknown booking / provider / service      | fix the reference        |
//! | `Conflict`   | slot already taken                        | pick another slot        |
//! | `State`      | illegal lifecycle step                    | inspect current status   |
//! | `Transient`  | lock wait timed out, store unavailable    | retry                    |
//! | `Internal`   | unexpected persistence failure            | report                   |

use crate::status::{BookingStateMachine, BookingStatus};
use crate::types::{BookingId, BookingNumber, ProviderId, PublicId, ServiceId};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::fmt;
use thiserror::Error;

/// Result type alias for booking operations.
pub type Result<T> = std::result::Result<T, BookingError>;

/// Top-level error for every booking operation.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum BookingError {
    /// The request violates a business rule.
    #[error("Validation failed: {0}")]
    Validation(#[from] ValidationError),

    /// A referenced entity does not exist.
    #[error("{0} not found")]
    NotFound(Resource),

    /// The requested interval overlaps an active booking of the same provider.
    #[error("Provider {provider_id} is already booked between {start} and {end}")]
    Conflict {
        /// Provider whose time is taken
        provider_id: ProviderId,
        /// Requested start
        start: DateTime<Utc>,
        /// Requested end
        end: DateTime<Utc>,
    },

    /// The booking's status does not allow the operation.
    #[error(transparent)]
    State(#[from] StateError),

    /// A retryable infrastructure failure.
    #[error("Transient failure: {0}")]
    Transient(#[from] TransientError),

    /// Unexpected failure (should not be exposed to users verbatim).
    #[error("Internal error: {0}")]
    Internal(String),
}

impl BookingError {
    /// Returns `true` if retrying the same request may succeed.
    ///
    /// # Examples
    ///
    /// ```
    /// # use chairbook_core::error::{BookingError, TransientError};
    /// assert!(BookingError::Transient(TransientError::DeadlineExceeded).is_retryable());
    /// assert!(!BookingError::Internal("boom".into()).is_retryable());
    /// ```
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient(_))
    }

    /// Returns `true` if the error is caused by the request rather than the system.
    #[must_use]
    pub const fn is_user_error(&self) -> bool {
        matches!(
            self,
            Self::Validation(_) | Self::NotFound(_) | Self::Conflict { .. } | Self::State(_)
        )
    }

    /// Shorthand for a missing booking.
    #[must_use]
    pub const fn booking_not_found(key: BookingKey) -> Self {
        Self::NotFound(Resource::Booking(key))
    }
}

/// Business-rule violations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// Start is not in the future.
    #[error("start time {start} is in the past")]
    PastTime {
        /// Requested start
        start: DateTime<Utc>,
    },

    /// Start is too close to now.
    #[error("start time {start} is earlier than the minimum notice allows ({earliest})")]
    InsufficientNotice {
        /// Requested start
        start: DateTime<Utc>,
        /// Earliest acceptable start
        earliest: DateTime<Utc>,
    },

    /// Start is beyond the booking horizon.
    #[error("start time {start} is later than the booking horizon ({latest})")]
    TooFarAhead {
        /// Requested start
        start: DateTime<Utc>,
        /// Latest acceptable start
        latest: DateTime<Utc>,
    },

    /// Duration outside the allowed range.
    #[error("duration of {minutes} minutes is outside [{min}, {max}]")]
    DurationOutOfRange {
        /// Requested duration
        minutes: u32,
        /// Minimum duration
        min: u32,
        /// Maximum duration
        max: u32,
    },

    /// Neither a customer nor a complete guest contact was supplied.
    #[error("a customer id or a guest name with email or phone is required")]
    MissingGuestContact,

    /// Both a customer and a guest were supplied.
    #[error("a booking is either for a registered customer or for a guest, not both")]
    AmbiguousParty,

    /// Guest contact details are malformed.
    #[error("invalid guest contact: {0}")]
    InvalidGuestContact(String),

    /// Discount is negative or larger than the price.
    #[error("discount {discount} must be between 0 and the service price {price}")]
    InvalidDiscount {
        /// Requested discount
        discount: Decimal,
        /// Service price
        price: Decimal,
    },

    /// Booking number does not match `BK` + `YYYYMMDD` + 4 digits.
    #[error("invalid booking number: {0}")]
    InvalidBookingNumber(String),

    /// Unknown status name.
    #[error("invalid booking status: {0}")]
    InvalidStatus(String),

    /// Currency code is not three letters.
    #[error("invalid currency code: {0}")]
    InvalidCurrency(String),

    /// Provider exists but does not accept bookings.
    #[error("provider {0} is not accepting bookings")]
    ProviderInactive(ProviderId),

    /// Service exists but is not offered.
    #[error("service {0} is not currently offered")]
    ServiceInactive(ServiceId),
}

/// A missing entity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resource {
    /// Booking
    Booking(BookingKey),
    /// Provider
    Provider(ProviderId),
    /// Service of a provider
    Service(ServiceId),
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Booking(key) => write!(f, "Booking {key}"),
            Self::Provider(id) => write!(f, "Provider {id}"),
            Self::Service(id) => write!(f, "Service {id}"),
        }
    }
}

/// The key a booking was looked up by.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BookingKey {
    /// Storage id
    Id(BookingId),
    /// Public UUID
    PublicId(PublicId),
    /// Booking number
    Number(BookingNumber),
}

impl fmt::Display for BookingKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Id(id) => write!(f, "#{id}"),
            Self::PublicId(id) => write!(f, "{id}"),
            Self::Number(number) => write!(f, "{number}"),
        }
    }
}

/// What was attempted on a booking when a [`StateError`] occurred.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateOperation {
    /// Move to another status
    Transition(BookingStatus),
    /// Move the interval
    Reschedule,
    /// Edit free-text details
    Update,
}

impl fmt::Display for StateOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Transition(target) => write!(f, "move to `{target}`"),
            Self::Reschedule => f.write_str("reschedule"),
            Self::Update => f.write_str("update"),
        }
    }
}

/// Illegal lifecycle operation.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error(
    "cannot {operation} a booking in status `{current}`; allowed next states: [{}]",
    join_statuses(.allowed)
)]
pub struct StateError {
    /// Status the booking is in
    pub current: BookingStatus,
    /// What was attempted
    pub operation: StateOperation,
    /// Legal next states from `current`
    pub allowed: Vec<BookingStatus>,
}

impl StateError {
    /// Build the error, filling `allowed` from the transition table.
    #[must_use]
    pub fn new(current: BookingStatus, operation: StateOperation) -> Self {
        Self {
            current,
            operation,
            allowed: BookingStateMachine::allowed_transitions(current).to_vec(),
        }
    }
}

fn join_statuses(statuses: &[BookingStatus]) -> String {
    statuses
        .iter()
        .map(BookingStatus::as_str)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Retryable infrastructure failures.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransientError {
    /// The provider-scoped lock could not be acquired in time.
    #[error("timed out after {waited_ms}ms waiting for provider {provider_id}'s schedule lock")]
    LockTimeout {
        /// Provider whose lock was contended
        provider_id: ProviderId,
        /// How long the request waited
        waited_ms: u64,
    },

    /// The caller's deadline expired before the work could start.
    #[error("request deadline exceeded")]
    DeadlineExceeded,

    /// The store could not be reached.
    #[error("store unavailable: {0}")]
    StoreUnavailable(String),

    /// The store aborted the transaction (serialization failure, deadlock).
    #[error("transaction aborted by the store: {0}")]
    SerializationFailure(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_transient_errors_are_retryable() {
        let lock = BookingError::Transient(TransientError::LockTimeout {
            provider_id: ProviderId::new(3),
            waited_ms: 250,
        });
        assert!(lock.is_retryable());
        assert!(!lock.is_user_error());
        assert!(lock.to_string().contains("provider 3"));

        let conflict = BookingError::Conflict {
            provider_id: ProviderId::new(3),
            start: Utc::now(),
            end: Utc::now(),
        };
        assert!(!conflict.is_retryable());
        assert!(conflict.is_user_error());
    }

    #[test]
    fn not_found_names_the_resource() {
        let err = BookingError::booking_not_found(BookingKey::Id(BookingId::new(42)));
        assert_eq!(err.to_string(), "Booking #42 not found");
        let err = BookingError::NotFound(Resource::Service(ServiceId::new(7)));
        assert_eq!(err.to_string(), "Service 7 not found");
    }

    #[test]
    fn state_error_message_includes_operation() {
        let err = StateError::new(BookingStatus::Completed, StateOperation::Reschedule);
        assert_eq!(
            err.to_string(),
            "cannot reschedule a booking in status `completed`; allowed next states: []"
        );
    }
}
