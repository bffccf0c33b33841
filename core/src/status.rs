//! Booking status and the lifecycle transition table.
//!
//! ```text
//!  pending ──► confirmed ──► in_progress ──► completed
//!     │            │              │
//!     │            ├─► no_show    └─► cancelled_by_barber
//!     │            ├─► cancelled_by_customer
//!     │            └─► cancelled_by_barber
//!     ├─► cancelled_by_customer
//!     ├─► cancelled_by_barber
//!     └─► rejected
//! ```
//!
//! Terminal states have no outgoing transitions.

use crate::error::{StateError, StateOperation, ValidationError};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Lifecycle status of a booking.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BookingStatus {
    /// Requested, awaiting the provider
    Pending,
    /// Accepted by the provider
    Confirmed,
    /// Service under way
    InProgress,
    /// Service delivered
    Completed,
    /// Cancelled by the customer
    CancelledByCustomer,
    /// Cancelled by the provider
    CancelledByBarber,
    /// Declined by the provider
    Rejected,
    /// Customer did not turn up
    NoShow,
}

impl BookingStatus {
    /// Every status, in lifecycle order.
    pub const ALL: [Self; 8] = [
        Self::Pending,
        Self::Confirmed,
        Self::InProgress,
        Self::Completed,
        Self::CancelledByCustomer,
        Self::CancelledByBarber,
        Self::Rejected,
        Self::NoShow,
    ];

    /// Storage/wire representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Confirmed => "confirmed",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::CancelledByCustomer => "cancelled_by_customer",
            Self::CancelledByBarber => "cancelled_by_barber",
            Self::Rejected => "rejected",
            Self::NoShow => "no_show",
        }
    }

    /// Whether no further transition is possible.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Completed
                | Self::CancelledByCustomer
                | Self::CancelledByBarber
                | Self::Rejected
                | Self::NoShow
        )
    }

    /// Whether a booking in this status blocks the provider's time.
    ///
    /// Cancelled and rejected bookings free their slot; everything else keeps it.
    #[must_use]
    pub const fn occupies_slot(&self) -> bool {
        !matches!(
            self,
            Self::CancelledByCustomer | Self::CancelledByBarber | Self::Rejected
        )
    }

    /// Statuses that hold a slot, for store queries.
    #[must_use]
    pub fn occupying() -> impl Iterator<Item = Self> {
        Self::ALL.into_iter().filter(Self::occupies_slot)
    }
}

impl fmt::Display for BookingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BookingStatus {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| ValidationError::InvalidStatus(s.to_string()))
    }
}

/// The booking lifecycle transition table.
///
/// Pure functions only; persistence happens elsewhere.
#[derive(Debug, Clone, Copy, Default)]
pub struct BookingStateMachine;

impl BookingStateMachine {
    /// Statuses reachable from `current` in one step.
    #[must_use]
    pub const fn allowed_transitions(current: BookingStatus) -> &'static [BookingStatus] {
        use BookingStatus::{
            CancelledByBarber, CancelledByCustomer, Completed, Confirmed, InProgress, NoShow,
            Pending, Rejected,
        };

        match current {
            Pending => &[Confirmed, CancelledByCustomer, CancelledByBarber, Rejected],
            Confirmed => &[InProgress, CancelledByCustomer, CancelledByBarber, NoShow],
            InProgress => &[Completed, CancelledByBarber],
            Completed | CancelledByCustomer | CancelledByBarber | Rejected | NoShow => &[],
        }
    }

    /// Whether `current → target` is a legal single step.
    #[must_use]
    pub fn can_transition_to(current: BookingStatus, target: BookingStatus) -> bool {
        Self::allowed_transitions(current).contains(&target)
    }

    /// Check `current → target`.
    ///
    /// # Errors
    ///
    /// Returns a [`StateError`] carrying the current status and the legal next states.
    pub fn validate_transition(
        current: BookingStatus,
        target: BookingStatus,
    ) -> Result<(), StateError> {
        if Self::can_transition_to(current, target) {
            Ok(())
        } else {
            Err(StateError::new(current, StateOperation::Transition(target)))
        }
    }

    /// Whether the booking's interval may still be moved.
    ///
    /// Only `pending` and `confirmed` bookings can be rescheduled; the status is
    /// left untouched by a reschedule.
    #[must_use]
    pub const fn can_reschedule(current: BookingStatus) -> bool {
        matches!(current, BookingStatus::Pending | BookingStatus::Confirmed)
    }

    /// Check that a reschedule is allowed from `current`.
    ///
    /// # Errors
    ///
    /// Returns a [`StateError`] for any status other than `pending` or `confirmed`.
    pub fn validate_reschedule(current: BookingStatus) -> Result<(), StateError> {
        if Self::can_reschedule(current) {
            Ok(())
        } else {
            Err(StateError::new(current, StateOperation::Reschedule))
        }
    }

    /// Whether the party described by `by_customer` may cancel from `current`.
    ///
    /// Customers cannot cancel a booking that is already in progress; providers can.
    #[must_use]
    pub fn can_cancel(current: BookingStatus, by_customer: bool) -> bool {
        Self::can_transition_to(current, Self::cancellation_status(by_customer))
    }

    /// The cancellation status for the acting party.
    #[must_use]
    pub const fn cancellation_status(by_customer: bool) -> BookingStatus {
        if by_customer {
            BookingStatus::CancelledByCustomer
        } else {
            BookingStatus::CancelledByBarber
        }
    }
}
