//! Tunable rules applied by the booking orchestrator.

use crate::conflict::ConflictResolver;
use crate::pricing::PricingCalculator;
use crate::validation::TimeSlotValidator;

/// Default number of booking numbers tried before giving up.
pub const DEFAULT_BOOKING_NUMBER_ATTEMPTS: u32 = 5;

/// Everything about scheduling that can be configured per deployment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulingPolicy {
    /// Notice, horizon and duration rules
    pub validator: TimeSlotValidator,
    /// Tax rate
    pub pricing: PricingCalculator,
    /// Provider lock wait
    pub conflicts: ConflictResolver,
    /// Booking-number collisions tolerated per create
    pub booking_number_attempts: u32,
}

impl Default for SchedulingPolicy {
    fn default() -> Self {
        Self {
            validator: TimeSlotValidator::default(),
            pricing: PricingCalculator::default(),
            conflicts: ConflictResolver::default(),
            booking_number_attempts: DEFAULT_BOOKING_NUMBER_ATTEMPTS,
        }
    }
}
