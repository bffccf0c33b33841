//! # Chairbook Core
//!
//! Domain types and scheduling rules for the Chairbook booking engine.
//!
//! This crate holds everything about bookings that can be decided without I/O:
//!
//! - **Schedule**: [`slot::TimeSlot`] intervals and the overlap rule
//! - **Validation**: [`validation::TimeSlotValidator`] notice, horizon and duration rules
//! - **Pricing**: [`pricing::PricingCalculator`] tax/discount/total snapshot
//! - **Lifecycle**: [`status::BookingStateMachine`] transition table
//! - **Conflicts**: [`conflict::ConflictResolver`] provider-scoped lock + overlap probe
//! - **Audit**: [`history::HistoryDelta`] typed before/after records
//! - **Collaborators**: [`store`] and [`directory`] traits implemented by the
//!   `chairbook-postgres` and `chairbook-testing` crates
//!
//! ## Architecture Principles
//!
//! - Pure rules, injected I/O
//! - The store is the single source of truth for bookings
//! - Explicit error taxonomy ([`error::BookingError`])
//!
//! ## Example
//!
//! ```
//! use chairbook_core::status::{BookingStateMachine, BookingStatus};
//!
//! assert!(BookingStateMachine::can_transition_to(
//!     BookingStatus::Pending,
//!     BookingStatus::Confirmed,
//! ));
//! assert!(BookingStateMachine::validate_transition(
//!     BookingStatus::Completed,
//!     BookingStatus::CancelledByBarber,
//! )
//! .is_err());
//! ```

pub mod conflict;
pub mod directory;
pub mod environment;
pub mod error;
pub mod history;
pub mod patch;
pub mod policy;
pub mod pricing;
pub mod slot;
pub mod status;
pub mod store;
pub mod types;
pub mod validation;

// Re-export commonly used types
pub use chrono::{DateTime, Utc};
pub use error::{BookingError, Result};
pub use history::{BookingUpdate, HistoryDelta};
pub use patch::Patch;
pub use policy::SchedulingPolicy;
pub use rust_decimal::Decimal;
pub use slot::TimeSlot;
pub use status::{BookingStateMachine, BookingStatus};
pub use types::{
    Booking, BookingId, BookingNumber, CustomerId, ProviderId, PublicId, RequestContext,
    ServiceId, UserId,
};
