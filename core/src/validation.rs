//! Temporal and duration rules for requested intervals.

use crate::error::ValidationError;
use chrono::{DateTime, Duration, Utc};

/// Default minimum notice before a booking may start.
pub const DEFAULT_MIN_NOTICE: Duration = Duration::hours(1);

/// Default booking horizon.
pub const DEFAULT_MAX_ADVANCE: Duration = Duration::days(30);

/// Default shortest bookable duration in minutes.
pub const DEFAULT_MIN_DURATION_MINUTES: u32 = 15;

/// Default longest bookable duration in minutes.
pub const DEFAULT_MAX_DURATION_MINUTES: u32 = 480;

/// Validates a requested `(start, duration)` against the scheduling policy.
///
/// Rules are checked in order and the first violation is returned:
///
/// 1. start strictly after now → `PastTime`
/// 2. start at least `min_notice` after now → `InsufficientNotice`
/// 3. start at most `max_advance` after now → `TooFarAhead`
/// 4. duration within `[min, max]` minutes → `DurationOutOfRange`
///
/// Both boundaries of rules 2-4 are inclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeSlotValidator {
    min_notice: Duration,
    max_advance: Duration,
    min_duration_minutes: u32,
    max_duration_minutes: u32,
}

impl Default for TimeSlotValidator {
    fn default() -> Self {
        Self {
            min_notice: DEFAULT_MIN_NOTICE,
            max_advance: DEFAULT_MAX_ADVANCE,
            min_duration_minutes: DEFAULT_MIN_DURATION_MINUTES,
            max_duration_minutes: DEFAULT_MAX_DURATION_MINUTES,
        }
    }
}

impl TimeSlotValidator {
    /// Create a validator with explicit limits.
    #[must_use]
    pub const fn new(
        min_notice: Duration,
        max_advance: Duration,
        min_duration_minutes: u32,
        max_duration_minutes: u32,
    ) -> Self {
        Self {
            min_notice,
            max_advance,
            min_duration_minutes,
            max_duration_minutes,
        }
    }

    /// Minimum notice.
    #[must_use]
    pub const fn min_notice(&self) -> Duration {
        self.min_notice
    }

    /// Booking horizon.
    #[must_use]
    pub const fn max_advance(&self) -> Duration {
        self.max_advance
    }

    /// Check a requested interval against `now`.
    ///
    /// # Errors
    ///
    /// Returns the first violated rule as a [`ValidationError`].
    pub fn validate(
        &self,
        start: DateTime<Utc>,
        duration_minutes: u32,
        now: DateTime<Utc>,
    ) -> Result<(), ValidationError> {
        if start <= now {
            return Err(ValidationError::PastTime { start });
        }

        let earliest = now + self.min_notice;
        if start < earliest {
            return Err(ValidationError::InsufficientNotice { start, earliest });
        }

        let latest = now + self.max_advance;
        if start > latest {
            return Err(ValidationError::TooFarAhead { start, latest });
        }

        self.validate_duration(duration_minutes)
    }

    /// Check only the duration rule.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::DurationOutOfRange`] outside `[min, max]`.
    pub const fn validate_duration(&self, duration_minutes: u32) -> Result<(), ValidationError> {
        if duration_minutes < self.min_duration_minutes
            || duration_minutes > self.max_duration_minutes
        {
            return Err(ValidationError::DurationOutOfRange {
                minutes: duration_minutes,
                min: self.min_duration_minutes,
                max: self.max_duration_minutes,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, 1, 9, 0, 0).unwrap()
    }

    fn validate(start: DateTime<Utc>, minutes: u32) -> Result<(), ValidationError> {
        TimeSlotValidator::default().validate(start, minutes, now())
    }

    #[test]
    fn accepts_exact_boundaries() {
        assert!(validate(now() + Duration::hours(1), 15).is_ok());
        assert!(validate(now() + Duration::days(30), 480).is_ok());
    }

    #[test]
    fn rejects_past_and_present() {
        assert!(matches!(validate(now(), 30), Err(ValidationError::PastTime { .. })));
        assert!(matches!(
            validate(now() - Duration::minutes(1), 30),
            Err(ValidationError::PastTime { .. })
        ));
    }

    #[test]
    fn rejects_short_notice() {
        let err = validate(now() + Duration::minutes(59), 30).unwrap_err();
        assert_eq!(
            err,
            ValidationError::InsufficientNotice {
                start: now() + Duration::minutes(59),
                earliest: now() + Duration::hours(1),
            }
        );
    }

    #[test]
    fn rejects_beyond_horizon() {
        assert!(matches!(
            validate(now() + Duration::days(30) + Duration::seconds(1), 30),
            Err(ValidationError::TooFarAhead { .. })
        ));
    }

    #[test]
    fn rejects_duration_outside_range() {
        let start = now() + Duration::hours(2);
        assert!(matches!(
            validate(start, 14),
            Err(ValidationError::DurationOutOfRange { minutes: 14, .. })
        ));
        assert!(matches!(
            validate(start, 481),
            Err(ValidationError::DurationOutOfRange { minutes: 481, .. })
        ));
        assert!(matches!(
            validate(start, 10),
            Err(ValidationError::DurationOutOfRange { .. })
        ));
    }

    #[test]
    fn first_violation_wins() {
        // Past start and bad duration: the time rule is reported.
        assert!(matches!(
            validate(now() - Duration::hours(1), 5),
            Err(ValidationError::PastTime { .. })
        ));
    }

    #[test]
    fn custom_limits_apply() {
        let validator =
            TimeSlotValidator::new(Duration::minutes(30), Duration::days(7), 30, 120);
        assert!(validator.validate(now() + Duration::minutes(30), 30, now()).is_ok());
        assert!(validator.validate(now() + Duration::days(8), 30, now()).is_err());
        assert!(validator.validate(now() + Duration::hours(1), 15, now()).is_err());
    }
}
