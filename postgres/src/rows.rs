//! Database row models and their conversion into domain types.

use crate::error::corrupt_row;
use chairbook_core::error::BookingError;
use chairbook_core::history::{BookingHistory, HistoryDelta};
use chairbook_core::types::{
    BookingNotes, Currency, GuestContact, Party, Pricing, ServiceSnapshot,
};
use chairbook_core::{
    Booking, BookingId, BookingNumber, BookingStatus, CustomerId, ProviderId, PublicId, ServiceId,
    TimeSlot, UserId,
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::types::Json;
use uuid::Uuid;

/// Column list matching [`BookingRow`].
pub(crate) const BOOKING_COLUMNS: &str = "id, public_id, booking_number, barber_id, customer_id, \
     guest_name, guest_email, guest_phone, service_id, service_name, start_time, \
     duration_minutes, service_price, discount_amount, tax_amount, total_price, currency, \
     status, customer_notes, special_requests, internal_notes, created_at, updated_at";

#[derive(Debug, sqlx::FromRow)]
pub(crate) struct BookingRow {
    id: i64,
    public_id: Uuid,
    booking_number: String,
    barber_id: i64,
    customer_id: Option<i64>,
    guest_name: Option<String>,
    guest_email: Option<String>,
    guest_phone: Option<String>,
    service_id: i64,
    service_name: String,
    start_time: DateTime<Utc>,
    duration_minutes: i32,
    service_price: Decimal,
    discount_amount: Decimal,
    tax_amount: Decimal,
    total_price: Decimal,
    currency: String,
    status: String,
    customer_notes: Option<String>,
    special_requests: Option<String>,
    internal_notes: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<BookingRow> for Booking {
    type Error = BookingError;

    fn try_from(row: BookingRow) -> Result<Self, Self::Error> {
        let id = row.id;
        let invalid = |detail: &dyn std::fmt::Display| corrupt_row("bookings", id, detail);

        let party = match row.customer_id {
            Some(customer_id) => Party::Customer {
                customer_id: CustomerId::new(customer_id),
            },
            None => Party::Guest {
                contact: GuestContact::new(
                    row.guest_name.as_deref().unwrap_or_default(),
                    row.guest_email.as_deref(),
                    row.guest_phone.as_deref(),
                )
                .map_err(|e| invalid(&e))?,
            },
        };
        let duration_minutes = u32::try_from(row.duration_minutes).map_err(|e| invalid(&e))?;
        let booking_number = row
            .booking_number
            .parse::<BookingNumber>()
            .map_err(|e| invalid(&e))?;
        let status = row.status.parse::<BookingStatus>().map_err(|e| invalid(&e))?;
        let currency = Currency::new(row.currency.trim()).map_err(|e| invalid(&e))?;

        Ok(Self {
            id: BookingId::new(row.id),
            public_id: PublicId::from_uuid(row.public_id),
            booking_number,
            provider_id: ProviderId::new(row.barber_id),
            party,
            service: ServiceSnapshot {
                service_id: ServiceId::new(row.service_id),
                name: row.service_name,
            },
            slot: TimeSlot::new(row.start_time, duration_minutes),
            pricing: Pricing {
                service_price: row.service_price,
                discount_amount: row.discount_amount,
                tax_amount: row.tax_amount,
                total_price: row.total_price,
                currency,
            },
            status,
            notes: BookingNotes {
                customer_notes: row.customer_notes,
                special_requests: row.special_requests,
                internal_notes: row.internal_notes,
            },
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
pub(crate) struct HistoryRow {
    id: i64,
    booking_id: i64,
    actor_id: Option<i64>,
    delta: Json<HistoryDelta>,
    reason: Option<String>,
    created_at: DateTime<Utc>,
}

impl From<HistoryRow> for BookingHistory {
    fn from(row: HistoryRow) -> Self {
        let Json(delta) = row.delta;
        Self {
            id: row.id,
            booking_id: BookingId::new(row.booking_id),
            actor_id: row.actor_id.map(UserId::new),
            change_type: delta.change_type(),
            delta,
            reason: row.reason,
            created_at: row.created_at,
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
pub(crate) struct ProviderRow {
    pub(crate) id: i64,
    pub(crate) display_name: String,
    pub(crate) is_active: bool,
}

#[derive(Debug, sqlx::FromRow)]
pub(crate) struct ServiceRow {
    pub(crate) id: i64,
    pub(crate) barber_id: i64,
    pub(crate) name: String,
    pub(crate) price: Decimal,
    pub(crate) currency: String,
    pub(crate) duration_minutes: i32,
    pub(crate) is_active: bool,
}

/// Snake-case names of the slot-occupying statuses, bound as a `TEXT[]`.
pub(crate) fn occupying_statuses() -> Vec<String> {
    BookingStatus::occupying()
        .map(|status| status.as_str().to_string())
        .collect()
}
