//! Append-only audit trail.
//!
//! Every mutation of a booking produces one [`NewHistoryEntry`] whose
//! [`HistoryDelta`] records exactly what changed. Entries are never updated or
//! deleted.

use crate::patch::Patch;
use crate::status::BookingStatus;
use crate::types::{Booking, BookingId, BookingNotes, UserId};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Coarse category of a history entry.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeType {
    /// Booking created
    Created,
    /// Free-text details changed
    Updated,
    /// Status changed
    StatusChanged,
    /// Interval moved
    Rescheduled,
}

impl ChangeType {
    /// Storage representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Updated => "updated",
            Self::StatusChanged => "status_changed",
            Self::Rescheduled => "rescheduled",
        }
    }
}

impl fmt::Display for ChangeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Editable free-text field of a booking.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetailField {
    /// Customer notes
    CustomerNotes,
    /// Special requests
    SpecialRequests,
    /// Provider-only notes
    InternalNotes,
}

/// Before/after value of one free-text field.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DetailChange {
    /// Field that changed
    pub field: DetailField,
    /// Previous value
    pub old: Option<String>,
    /// New value
    pub new: Option<String>,
}

/// Typed before/after record, one variant per change type.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum HistoryDelta {
    /// Initial state of a new booking
    Created {
        /// Initial status
        status: BookingStatus,
        /// Booked start
        start: DateTime<Utc>,
        /// Booked end
        end: DateTime<Utc>,
        /// Total price at creation
        total_price: Decimal,
    },
    /// Free-text fields changed
    Updated {
        /// Changed fields only
        changes: Vec<DetailChange>,
    },
    /// Status moved along the lifecycle
    StatusChanged {
        /// Previous status
        old: BookingStatus,
        /// New status
        new: BookingStatus,
    },
    /// Interval moved
    Rescheduled {
        /// Previous start
        old_start: DateTime<Utc>,
        /// Previous end
        old_end: DateTime<Utc>,
        /// New start
        new_start: DateTime<Utc>,
        /// New end
        new_end: DateTime<Utc>,
    },
}

impl HistoryDelta {
    /// Delta describing a freshly created booking.
    #[must_use]
    pub fn created(booking: &Booking) -> Self {
        Self::Created {
            status: booking.status,
            start: booking.slot.start(),
            end: booking.slot.end(),
            total_price: booking.pricing.total_price,
        }
    }

    /// Delta between two versions of the same booking's schedule.
    #[must_use]
    pub fn rescheduled(before: &Booking, after: &Booking) -> Self {
        Self::Rescheduled {
            old_start: before.slot.start(),
            old_end: before.slot.end(),
            new_start: after.slot.start(),
            new_end: after.slot.end(),
        }
    }

    /// The change type this delta belongs to.
    #[must_use]
    pub const fn change_type(&self) -> ChangeType {
        match self {
            Self::Created { .. } => ChangeType::Created,
            Self::Updated { .. } => ChangeType::Updated,
            Self::StatusChanged { .. } => ChangeType::StatusChanged,
            Self::Rescheduled { .. } => ChangeType::Rescheduled,
        }
    }
}

/// Partial update of a booking's free-text fields.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct BookingUpdate {
    /// Customer notes
    pub customer_notes: Patch<String>,
    /// Special requests
    pub special_requests: Patch<String>,
    /// Provider-only notes
    pub internal_notes: Patch<String>,
}

impl BookingUpdate {
    /// Apply the update to `current`, returning the new notes and the fields that
    /// actually changed.
    #[must_use]
    pub fn apply(self, current: &BookingNotes) -> (BookingNotes, Vec<DetailChange>) {
        let mut changes = Vec::new();
        let mut field = |name: DetailField, patch: Patch<String>, old: &Option<String>| {
            let new = patch.apply(old.clone());
            if new != *old {
                changes.push(DetailChange {
                    field: name,
                    old: old.clone(),
                    new: new.clone(),
                });
            }
            new
        };

        let notes = BookingNotes {
            customer_notes: field(
                DetailField::CustomerNotes,
                self.customer_notes,
                &current.customer_notes,
            ),
            special_requests: field(
                DetailField::SpecialRequests,
                self.special_requests,
                &current.special_requests,
            ),
            internal_notes: field(
                DetailField::InternalNotes,
                self.internal_notes,
                &current.internal_notes,
            ),
        };

        (notes, changes)
    }
}

/// A history entry about to be appended.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NewHistoryEntry {
    /// Booking the entry belongs to
    pub booking_id: BookingId,
    /// Acting user, `None` for the system
    pub actor_id: Option<UserId>,
    /// What changed
    pub delta: HistoryDelta,
    /// Optional free-text reason
    pub reason: Option<String>,
    /// When the change happened
    pub recorded_at: DateTime<Utc>,
}

impl NewHistoryEntry {
    /// Change type of the entry.
    #[must_use]
    pub const fn change_type(&self) -> ChangeType {
        self.delta.change_type()
    }
}

/// A stored history entry.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookingHistory {
    /// Storage id of the entry
    pub id: i64,
    /// Booking the entry belongs to
    pub booking_id: BookingId,
    /// Acting user, `None` for the system
    pub actor_id: Option<UserId>,
    /// Coarse category
    pub change_type: ChangeType,
    /// What changed
    pub delta: HistoryDelta,
    /// Optional free-text reason
    pub reason: Option<String>,
    /// When the change happened
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use chrono::TimeZone;

    #[test]
    fn delta_serializes_as_tagged_union() {
        let delta = HistoryDelta::StatusChanged {
            old: BookingStatus::Pending,
            new: BookingStatus::Confirmed,
        };
        let json = serde_json::to_value(&delta).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"type": "status_changed", "old": "pending", "new": "confirmed"})
        );
        let back: HistoryDelta = serde_json::from_value(json).unwrap();
        assert_eq!(back.change_type(), ChangeType::StatusChanged);
    }

    #[test]
    fn rescheduled_delta_keeps_both_intervals() {
        let start = Utc.with_ymd_and_hms(2025, 5, 1, 10, 0, 0).unwrap();
        let json = serde_json::to_value(HistoryDelta::Rescheduled {
            old_start: start,
            old_end: start + chrono::Duration::hours(1),
            new_start: start + chrono::Duration::hours(2),
            new_end: start + chrono::Duration::hours(3),
        })
        .unwrap();
        assert_eq!(json["type"], "rescheduled");
        assert!(json.get("old_start").is_some());
        assert!(json.get("new_end").is_some());
    }

    #[test]
    fn update_records_only_effective_changes() {
        let current = BookingNotes {
            customer_notes: Some("fade".into()),
            special_requests: None,
            internal_notes: Some("regular".into()),
        };
        let update = BookingUpdate {
            customer_notes: Patch::Set("fade".into()),
            special_requests: Patch::Set("quiet chair".into()),
            internal_notes: Patch::Clear,
        };

        let (notes, changes) = update.apply(&current);

        assert_eq!(notes.customer_notes.as_deref(), Some("fade"));
        assert_eq!(notes.special_requests.as_deref(), Some("quiet chair"));
        assert_eq!(notes.internal_notes, None);
        assert_eq!(
            changes.iter().map(|c| c.field).collect::<Vec<_>>(),
            vec![DetailField::SpecialRequests, DetailField::InternalNotes]
        );
    }

    #[test]
    fn empty_update_changes_nothing() {
        let current = BookingNotes::default();
        let (notes, changes) = BookingUpdate::default().apply(&current);
        assert_eq!(notes, current);
        assert!(changes.is_empty());
    }
}
