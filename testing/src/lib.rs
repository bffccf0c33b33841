//! # Chairbook Testing
//!
//! Testing utilities and helpers for the Chairbook booking engine.
//!
//! This crate provides:
//! - Mock implementations of the environment and collaborator traits
//! - An in-memory [`BookingStore`](chairbook_core::store::BookingStore) with
//!   the same locking semantics as the `PostgreSQL` store
//! - Fixtures for providers, services and booking requests
//! - Property-based testing strategies for domain types
//!
//! ## Example
//!
//! ```
//! use chairbook_testing::{InMemoryBookingStore, test_clock};
//! use chairbook_testing::helpers::{hours_after, new_booking, PROVIDER_ID};
//! use chairbook_core::TimeSlot;
//!
//! let store = InMemoryBookingStore::new();
//! let booking = store.seed(new_booking(PROVIDER_ID, TimeSlot::new(hours_after(3), 30)));
//! assert_eq!(store.bookings(), vec![booking]);
//! ```

use chairbook_core::environment::Clock;
use chrono::{DateTime, Utc};

pub mod directory_mocks;
pub mod store_mocks;

/// Mock implementations of Environment traits
pub mod mocks {
    use super::{Clock, DateTime, Utc};

    /// Fixed clock for deterministic tests
    ///
    /// Always returns the same time, making tests reproducible.
    ///
    /// # Example
    ///
    /// ```
    /// use chairbook_testing::mocks::FixedClock;
    /// use chairbook_core::environment::Clock;
    /// use chrono::Utc;
    ///
    /// let clock = FixedClock::new(Utc::now());
    /// let time1 = clock.now();
    /// let time2 = clock.now();
    /// assert_eq!(time1, time2); // Always the same!
    /// ```
    #[derive(Debug, Clone)]
    pub struct FixedClock {
        time: DateTime<Utc>,
    }

    impl FixedClock {
        /// Create a new fixed clock with the given time
        #[must_use]
        pub const fn new(time: DateTime<Utc>) -> Self {
            Self { time }
        }
    }

    impl Clock for FixedClock {
        fn now(&self) -> DateTime<Utc> {
            self.time
        }
    }

    /// Create a default fixed clock for tests (2025-01-01 00:00:00 UTC)
    #[must_use]
    pub fn test_clock() -> FixedClock {
        FixedClock::new(super::helpers::test_now())
    }
}

/// Fixtures for the catalog and booking requests.
///
/// Times are expressed relative to [`helpers::test_now`], the instant
/// [`test_clock`] is frozen at.
pub mod helpers {
    use chairbook_core::directory::{ProviderRecord, ServiceRecord};
    use chairbook_core::types::{
        BookingNotes, CreateBookingRequest, Currency, GuestDetails, NewBooking, Party, Pricing,
        ServiceSnapshot,
    };
    use chairbook_core::{
        BookingNumber, BookingStatus, CustomerId, ProviderId, PublicId, ServiceId, TimeSlot,
    };
    use chrono::{DateTime, Duration, Utc};
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;

    /// Provider used by most fixtures.
    pub const PROVIDER_ID: ProviderId = ProviderId::new(1);
    /// Service of [`PROVIDER_ID`] used by most fixtures.
    pub const SERVICE_ID: ServiceId = ServiceId::new(10);
    /// Registered customer used by most fixtures.
    pub const CUSTOMER_ID: CustomerId = CustomerId::new(100);
    /// List price of the fixture service.
    pub const SERVICE_PRICE: Decimal = dec!(50.00);

    /// 2025-01-01 00:00:00 UTC.
    ///
    /// # Panics
    ///
    /// This function will panic if the hardcoded timestamp fails to parse,
    /// which should never happen in practice.
    #[must_use]
    #[allow(clippy::expect_used)]
    pub fn test_now() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2025-01-01T00:00:00Z")
            .expect("hardcoded timestamp should always parse")
            .with_timezone(&Utc)
    }

    /// `hours` after [`test_now`].
    #[must_use]
    pub fn hours_after(hours: i64) -> DateTime<Utc> {
        test_now() + Duration::hours(hours)
    }

    /// An active provider.
    #[must_use]
    pub fn provider_record(id: ProviderId) -> ProviderRecord {
        ProviderRecord {
            id,
            display_name: format!("Barber {id}"),
            is_active: true,
        }
    }

    /// An active 30-minute service priced at [`SERVICE_PRICE`] USD.
    #[must_use]
    pub fn service_record(provider_id: ProviderId, id: ServiceId) -> ServiceRecord {
        ServiceRecord {
            id,
            provider_id,
            name: "Classic Cut".to_string(),
            price: SERVICE_PRICE,
            currency: Currency::usd(),
            duration_minutes: 30,
            is_active: true,
        }
    }

    /// Request for [`CUSTOMER_ID`] to book the fixture service.
    #[must_use]
    pub fn customer_request(
        provider_id: ProviderId,
        start_time: DateTime<Utc>,
        duration_minutes: u32,
    ) -> CreateBookingRequest {
        CreateBookingRequest {
            provider_id,
            service_id: SERVICE_ID,
            start_time,
            duration_minutes,
            customer_id: Some(CUSTOMER_ID),
            guest: None,
            discount_amount: None,
            customer_notes: None,
            special_requests: None,
        }
    }

    /// Request for a guest reachable by email.
    #[must_use]
    pub fn guest_request(
        provider_id: ProviderId,
        start_time: DateTime<Utc>,
        duration_minutes: u32,
    ) -> CreateBookingRequest {
        CreateBookingRequest {
            customer_id: None,
            guest: Some(GuestDetails {
                name: "Walk In".to_string(),
                email: Some("walk.in@example.com".to_string()),
                phone: None,
            }),
            ..customer_request(provider_id, start_time, duration_minutes)
        }
    }

    /// A pending booking of `slot`, ready to insert or seed.
    ///
    /// The booking number is derived from the slot's date with suffix `0001`.
    ///
    /// # Panics
    ///
    /// Never in practice: suffix `1` is always in range.
    #[must_use]
    #[allow(clippy::expect_used)]
    pub fn new_booking(provider_id: ProviderId, slot: TimeSlot) -> NewBooking {
        let booking_number = BookingNumber::from_parts(slot.start().date_naive(), 1)
            .expect("suffix 1 is a valid booking number suffix");
        NewBooking {
            public_id: PublicId::new(),
            booking_number,
            provider_id,
            party: Party::Customer {
                customer_id: CUSTOMER_ID,
            },
            service: ServiceSnapshot {
                service_id: SERVICE_ID,
                name: "Classic Cut".to_string(),
            },
            slot,
            pricing: Pricing {
                service_price: SERVICE_PRICE,
                discount_amount: Decimal::ZERO,
                tax_amount: dec!(4.00),
                total_price: dec!(54.00),
                currency: Currency::usd(),
            },
            status: BookingStatus::Pending,
            notes: BookingNotes::default(),
            created_at: test_now(),
        }
    }
}

/// Property-based testing strategies using proptest.
pub mod properties {
    use chairbook_core::{BookingStatus, TimeSlot};
    use chrono::Duration;
    use proptest::prelude::*;
    use rust_decimal::Decimal;

    use crate::helpers::test_now;

    /// Any booking status.
    pub fn any_status() -> impl Strategy<Value = BookingStatus> {
        proptest::sample::select(BookingStatus::ALL.to_vec())
    }

    /// A slot starting on a 5-minute boundary within a week of [`test_now`],
    /// lasting 5 to 240 minutes.
    pub fn any_slot() -> impl Strategy<Value = TimeSlot> {
        (0_i64..2016, 1_u32..=48).prop_map(|(offset, length)| {
            TimeSlot::new(test_now() + Duration::minutes(offset * 5), length * 5)
        })
    }

    /// A non-negative amount with two decimal places, below 10 000.
    pub fn any_amount() -> impl Strategy<Value = Decimal> {
        (0_i64..1_000_000).prop_map(|cents| Decimal::new(cents, 2))
    }
}

// Re-export commonly used items
pub use directory_mocks::{MockDirectory, RecordingCacheInvalidator};
pub use mocks::{FixedClock, test_clock};
pub use store_mocks::{InMemoryBookingStore, InMemoryTransaction};

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_fixed_clock() {
        let clock = test_clock();
        let time1 = clock.now();
        let time2 = clock.now();
        assert_eq!(time1, time2);
        assert_eq!(time1.to_rfc3339(), "2025-01-01T00:00:00+00:00");
    }

    proptest! {
        #[test]
        fn generated_slots_are_well_formed(slot in properties::any_slot()) {
            prop_assert!(slot.end() > slot.start());
            prop_assert_eq!(slot.duration_minutes() % 5, 0);
        }
    }
}
