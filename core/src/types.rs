//! Identifiers, value objects and the `Booking` entity.

use crate::error::ValidationError;
use crate::slot::TimeSlot;
use crate::status::BookingStatus;
use chrono::{DateTime, NaiveDate, Utc};
use rand::Rng;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::{Duration, Instant};
use uuid::Uuid;

// ============================================================================
// Identifiers
// ============================================================================

macro_rules! numeric_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(i64);

        impl $name {
            /// Wrap a raw storage key.
            #[must_use]
            pub const fn new(value: i64) -> Self {
                Self(value)
            }

            /// The raw storage key.
            #[must_use]
            pub const fn get(self) -> i64 {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

numeric_id!(
    /// Storage primary key of a booking.
    BookingId
);
numeric_id!(
    /// Identifier of a service provider (barber).
    ProviderId
);
numeric_id!(
    /// Identifier of a service offered by a provider.
    ServiceId
);
numeric_id!(
    /// Identifier of a registered customer.
    CustomerId
);
numeric_id!(
    /// Identifier of the user performing an operation (customer, barber or admin).
    UserId
);

/// Globally unique opaque identifier of a booking, safe to expose to clients.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PublicId(Uuid);

impl PublicId {
    /// Creates a new random `PublicId`
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Create a `PublicId` from a `Uuid`
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Get the inner UUID
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for PublicId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for PublicId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ============================================================================
// Booking number
// ============================================================================

/// Human-readable booking reference: `BK` + `YYYYMMDD` + 4-digit suffix.
///
/// ```
/// use chairbook_core::types::BookingNumber;
/// use chrono::NaiveDate;
///
/// let date = NaiveDate::from_ymd_opt(2024, 11, 28).unwrap();
/// let number = BookingNumber::from_parts(date, 1234).unwrap();
/// assert_eq!(number.as_str(), "BK202411281234");
/// assert_eq!("BK202411281234".parse::<BookingNumber>().unwrap(), number);
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct BookingNumber(String);

impl BookingNumber {
    /// Two-letter prefix of every booking number.
    pub const PREFIX: &'static str = "BK";

    const LEN: usize = 14;

    /// Build a number from its date and numeric suffix.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::InvalidBookingNumber`] if `suffix` has more than four digits.
    pub fn from_parts(date: NaiveDate, suffix: u16) -> Result<Self, ValidationError> {
        if suffix > 9999 {
            return Err(ValidationError::InvalidBookingNumber(format!(
                "suffix {suffix} exceeds four digits"
            )));
        }
        Ok(Self(format!(
            "{}{}{suffix:04}",
            Self::PREFIX,
            date.format("%Y%m%d")
        )))
    }

    /// Generate a number for `date` with a random suffix.
    ///
    /// Suffixes are not unique per day; callers retry on collision.
    pub fn generate<R: Rng + ?Sized>(date: NaiveDate, rng: &mut R) -> Self {
        let suffix: u16 = rng.gen_range(0..=9999);
        Self(format!(
            "{}{}{suffix:04}",
            Self::PREFIX,
            date.format("%Y%m%d")
        ))
    }

    /// The booking number as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The date encoded in the number.
    #[must_use]
    pub fn date(&self) -> Option<NaiveDate> {
        NaiveDate::parse_from_str(&self.0[2..10], "%Y%m%d").ok()
    }
}

impl FromStr for BookingNumber {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ValidationError::InvalidBookingNumber(s.to_string());

        if s.len() != Self::LEN || !s.starts_with(Self::PREFIX) {
            return Err(invalid());
        }
        let digits = &s[2..];
        if !digits.bytes().all(|b| b.is_ascii_digit()) {
            return Err(invalid());
        }
        NaiveDate::parse_from_str(&digits[..8], "%Y%m%d").map_err(|_| invalid())?;

        Ok(Self(s.to_string()))
    }
}

impl TryFrom<String> for BookingNumber {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<BookingNumber> for String {
    fn from(value: BookingNumber) -> Self {
        value.0
    }
}

impl fmt::Display for BookingNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ============================================================================
// Currency
// ============================================================================

/// ISO-4217 currency code (three uppercase ASCII letters).
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Currency(String);

impl Currency {
    /// Parse and normalise a currency code.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::InvalidCurrency`] unless the code is three ASCII letters.
    pub fn new(code: &str) -> Result<Self, ValidationError> {
        let code = code.trim();
        if code.len() == 3 && code.bytes().all(|b| b.is_ascii_alphabetic()) {
            Ok(Self(code.to_ascii_uppercase()))
        } else {
            Err(ValidationError::InvalidCurrency(code.to_string()))
        }
    }

    /// US dollars.
    #[must_use]
    pub fn usd() -> Self {
        Self("USD".to_string())
    }

    /// The code as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for Currency {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(&value)
    }
}

impl From<Currency> for String {
    fn from(value: Currency) -> Self {
        value.0
    }
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ============================================================================
// Parties
// ============================================================================

/// Contact details of a guest (unregistered) customer.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GuestContact {
    name: String,
    email: Option<String>,
    phone: Option<String>,
}

impl GuestContact {
    /// Build a guest contact, requiring a name and an email or phone.
    ///
    /// Blank strings count as absent.
    ///
    /// # Errors
    ///
    /// - [`ValidationError::MissingGuestContact`] if the name is blank or both
    ///   email and phone are missing
    /// - [`ValidationError::InvalidGuestContact`] if the email is malformed
    pub fn new(
        name: &str,
        email: Option<&str>,
        phone: Option<&str>,
    ) -> Result<Self, ValidationError> {
        let name = name.trim();
        let email = email.map(str::trim).filter(|e| !e.is_empty());
        let phone = phone.map(str::trim).filter(|p| !p.is_empty());

        if name.is_empty() || (email.is_none() && phone.is_none()) {
            return Err(ValidationError::MissingGuestContact);
        }
        if let Some(email) = email {
            let well_formed = email
                .split_once('@')
                .is_some_and(|(local, domain)| !local.is_empty() && domain.contains('.'));
            if !well_formed {
                return Err(ValidationError::InvalidGuestContact(format!(
                    "malformed email address: {email}"
                )));
            }
        }

        Ok(Self {
            name: name.to_string(),
            email: email.map(str::to_string),
            phone: phone.map(str::to_string),
        })
    }

    /// Guest name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Guest email, if given.
    #[must_use]
    pub fn email(&self) -> Option<&str> {
        self.email.as_deref()
    }

    /// Guest phone, if given.
    #[must_use]
    pub fn phone(&self) -> Option<&str> {
        self.phone.as_deref()
    }
}

/// Who the booking is for: a registered customer or a guest, never both.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Party {
    /// Registered customer
    Customer {
        /// Customer id
        customer_id: CustomerId,
    },
    /// Guest identified by contact details
    Guest {
        /// Contact details
        contact: GuestContact,
    },
}

impl Party {
    /// Resolve the party from the optional request fields.
    ///
    /// # Errors
    ///
    /// - [`ValidationError::AmbiguousParty`] if both a customer and a guest are given
    /// - [`ValidationError::MissingGuestContact`] if neither is given or the guest is incomplete
    pub fn resolve(
        customer_id: Option<CustomerId>,
        guest: Option<&GuestDetails>,
    ) -> Result<Self, ValidationError> {
        match (customer_id, guest) {
            (Some(_), Some(_)) => Err(ValidationError::AmbiguousParty),
            (Some(customer_id), None) => Ok(Self::Customer { customer_id }),
            (None, Some(guest)) => Ok(Self::Guest {
                contact: GuestContact::new(
                    &guest.name,
                    guest.email.as_deref(),
                    guest.phone.as_deref(),
                )?,
            }),
            (None, None) => Err(ValidationError::MissingGuestContact),
        }
    }

    /// The customer id for registered-customer bookings.
    #[must_use]
    pub const fn customer_id(&self) -> Option<CustomerId> {
        match self {
            Self::Customer { customer_id } => Some(*customer_id),
            Self::Guest { .. } => None,
        }
    }

    /// The guest contact for guest bookings.
    #[must_use]
    pub const fn guest(&self) -> Option<&GuestContact> {
        match self {
            Self::Customer { .. } => None,
            Self::Guest { contact } => Some(contact),
        }
    }
}

/// Raw guest fields as submitted by a caller.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GuestDetails {
    /// Guest name
    pub name: String,
    /// Guest email
    pub email: Option<String>,
    /// Guest phone
    pub phone: Option<String>,
}

// ============================================================================
// Snapshots
// ============================================================================

/// Service details copied into the booking at creation time.
///
/// Later catalog edits never change an existing booking.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceSnapshot {
    /// Service the booking was made for
    pub service_id: ServiceId,
    /// Service name at booking time
    pub name: String,
}

/// Price breakdown captured at booking time.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pricing {
    /// Catalog price of the service
    pub service_price: Decimal,
    /// Discount applied before tax
    pub discount_amount: Decimal,
    /// Tax on the discounted price
    pub tax_amount: Decimal,
    /// `(service_price - discount_amount) + tax_amount`
    pub total_price: Decimal,
    /// Currency of all amounts
    pub currency: Currency,
}

/// Free-text fields attached to a booking.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookingNotes {
    /// Notes from the customer
    pub customer_notes: Option<String>,
    /// Special requests from the customer
    pub special_requests: Option<String>,
    /// Provider-only notes
    pub internal_notes: Option<String>,
}

// ============================================================================
// Booking
// ============================================================================

/// The authoritative booking record.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Booking {
    /// Storage primary key
    pub id: BookingId,
    /// Opaque public identifier
    pub public_id: PublicId,
    /// Human-readable reference
    pub booking_number: BookingNumber,
    /// Provider whose time is booked
    pub provider_id: ProviderId,
    /// Customer or guest
    pub party: Party,
    /// Service snapshot
    pub service: ServiceSnapshot,
    /// Booked interval
    pub slot: TimeSlot,
    /// Price snapshot
    pub pricing: Pricing,
    /// Lifecycle status
    pub status: BookingStatus,
    /// Free-text fields
    pub notes: BookingNotes,
    /// When the booking was created
    pub created_at: DateTime<Utc>,
    /// When the booking was last modified
    pub updated_at: DateTime<Utc>,
}

impl Booking {
    /// Whether this booking currently blocks its provider's time.
    #[must_use]
    pub const fn occupies_slot(&self) -> bool {
        self.status.occupies_slot()
    }
}

/// A booking that has not been persisted yet.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NewBooking {
    /// Opaque public identifier
    pub public_id: PublicId,
    /// Human-readable reference
    pub booking_number: BookingNumber,
    /// Provider whose time is booked
    pub provider_id: ProviderId,
    /// Customer or guest
    pub party: Party,
    /// Service snapshot
    pub service: ServiceSnapshot,
    /// Booked interval
    pub slot: TimeSlot,
    /// Price snapshot
    pub pricing: Pricing,
    /// Initial status
    pub status: BookingStatus,
    /// Free-text fields
    pub notes: BookingNotes,
    /// Creation timestamp (also the initial modification timestamp)
    pub created_at: DateTime<Utc>,
}

impl NewBooking {
    /// Attach the storage id assigned on insert.
    #[must_use]
    pub fn into_booking(self, id: BookingId) -> Booking {
        Booking {
            id,
            public_id: self.public_id,
            booking_number: self.booking_number,
            provider_id: self.provider_id,
            party: self.party,
            service: self.service,
            slot: self.slot,
            pricing: self.pricing,
            status: self.status,
            notes: self.notes,
            created_at: self.created_at,
            updated_at: self.created_at,
        }
    }
}

// ============================================================================
// Requests
// ============================================================================

/// Input to `create_booking`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateBookingRequest {
    /// Provider to book
    pub provider_id: ProviderId,
    /// Service offered by that provider
    pub service_id: ServiceId,
    /// Requested start
    pub start_time: DateTime<Utc>,
    /// Requested duration in minutes
    pub duration_minutes: u32,
    /// Registered customer, exclusive with `guest`
    pub customer_id: Option<CustomerId>,
    /// Guest contact, exclusive with `customer_id`
    pub guest: Option<GuestDetails>,
    /// Discount granted upstream (promotions, loyalty)
    #[serde(default)]
    pub discount_amount: Option<Decimal>,
    /// Notes from the customer
    #[serde(default)]
    pub customer_notes: Option<String>,
    /// Special requests from the customer
    #[serde(default)]
    pub special_requests: Option<String>,
}

/// Who is performing an operation, and by when it must finish waiting for locks.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RequestContext {
    /// Acting user; `None` for system-initiated operations
    pub actor_id: Option<UserId>,
    /// Deadline after which lock waits abort with a retryable error
    pub deadline: Option<Instant>,
}

impl RequestContext {
    /// Context for a system-initiated operation with no deadline.
    #[must_use]
    pub const fn system() -> Self {
        Self {
            actor_id: None,
            deadline: None,
        }
    }

    /// Context for an operation performed by `user`.
    #[must_use]
    pub const fn user(user: UserId) -> Self {
        Self {
            actor_id: Some(user),
            deadline: None,
        }
    }

    /// Set an absolute deadline.
    #[must_use]
    pub const fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// Set a deadline `timeout` from now.
    #[must_use]
    pub fn with_timeout(self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    /// Time left before the deadline, `None` when there is no deadline.
    #[must_use]
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|deadline| deadline.saturating_duration_since(Instant::now()))
    }
}
