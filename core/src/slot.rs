//! Half-open booking intervals.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// A provider's occupied interval `[start, start + duration)`.
///
/// The end is always derived from the start and duration, so the two can never
/// drift apart.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TimeSlot {
    start: DateTime<Utc>,
    duration_minutes: u32,
}

impl TimeSlot {
    /// Create a slot starting at `start` lasting `duration_minutes`.
    #[must_use]
    pub const fn new(start: DateTime<Utc>, duration_minutes: u32) -> Self {
        Self {
            start,
            duration_minutes,
        }
    }

    /// Inclusive start.
    #[must_use]
    pub const fn start(&self) -> DateTime<Utc> {
        self.start
    }

    /// Exclusive end, `start + duration`.
    #[must_use]
    pub fn end(&self) -> DateTime<Utc> {
        self.start + Duration::minutes(i64::from(self.duration_minutes))
    }

    /// Length in minutes.
    #[must_use]
    pub const fn duration_minutes(&self) -> u32 {
        self.duration_minutes
    }

    /// Whether two slots share any instant.
    #[must_use]
    pub fn overlaps(&self, other: &Self) -> bool {
        intervals_overlap(self.start, self.end(), other.start, other.end())
    }
}

/// Overlap rule for half-open intervals `[s1, e1)` and `[s2, e2)`.
///
/// Back-to-back intervals (`e1 == s2`) do not overlap.
#[must_use]
pub fn intervals_overlap(
    s1: DateTime<Utc>,
    e1: DateTime<Utc>,
    s2: DateTime<Utc>,
    e2: DateTime<Utc>,
) -> bool {
    s1 < e2 && s2 < e1
}

/// A half-open query window used when listing a provider's bookings.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeWindow {
    /// Inclusive lower bound
    pub from: DateTime<Utc>,
    /// Exclusive upper bound
    pub to: DateTime<Utc>,
}

impl TimeWindow {
    /// Whether `slot` intersects this window.
    #[must_use]
    pub fn intersects(&self, slot: &TimeSlot) -> bool {
        intervals_overlap(self.from, self.to, slot.start(), slot.end())
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use chrono::TimeZone;
    use proptest::prelude::*;

    fn at(hour: u32, minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 10, hour, minute, 0).unwrap()
    }

    #[test]
    fn end_is_start_plus_duration() {
        let slot = TimeSlot::new(at(10, 0), 45);
        assert_eq!(slot.end(), at(10, 45));
    }

    #[test]
    fn partial_overlap_conflicts() {
        let booked = TimeSlot::new(at(10, 0), 60);
        let requested = TimeSlot::new(at(10, 30), 60);
        assert!(booked.overlaps(&requested));
        assert!(requested.overlaps(&booked));
    }

    #[test]
    fn containment_conflicts() {
        let booked = TimeSlot::new(at(10, 0), 120);
        let inner = TimeSlot::new(at(10, 30), 15);
        assert!(booked.overlaps(&inner));
        assert!(inner.overlaps(&booked));
    }

    #[test]
    fn adjacent_slots_do_not_conflict() {
        let morning = TimeSlot::new(at(10, 0), 60);
        let next = TimeSlot::new(at(11, 0), 60);
        assert!(!morning.overlaps(&next));
        assert!(!next.overlaps(&morning));
    }

    proptest! {
        #[test]
        fn overlap_is_symmetric(
            a in 0i64..1_000,
            da in 1u32..300,
            b in 0i64..1_000,
            db in 1u32..300,
        ) {
            let base = at(0, 0);
            let first = TimeSlot::new(base + Duration::minutes(a), da);
            let second = TimeSlot::new(base + Duration::minutes(b), db);
            prop_assert_eq!(first.overlaps(&second), second.overlaps(&first));
        }

        #[test]
        fn slot_always_overlaps_itself(a in 0i64..10_000, d in 1u32..480) {
            let slot = TimeSlot::new(at(0, 0) + Duration::minutes(a), d);
            prop_assert!(slot.overlaps(&slot));
            prop_assert_eq!(slot.end() - slot.start(), Duration::minutes(i64::from(d)));
        }
    }
}
