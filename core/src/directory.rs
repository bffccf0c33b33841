//! Read-only catalog collaborators and the cache invalidation sink.
//!
//! These traits are object-safe so the orchestrator can hold them as
//! `Arc<dyn ...>` regardless of where the catalog lives.

use crate::error::Result;
use crate::types::{Currency, ProviderId, ServiceId};
use rust_decimal::Decimal;

pub use futures::future::BoxFuture;

/// A provider as seen by the booking engine.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProviderRecord {
    /// Provider id
    pub id: ProviderId,
    /// Display name
    pub display_name: String,
    /// Whether the provider currently accepts bookings
    pub is_active: bool,
}

/// A service offered by a provider.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ServiceRecord {
    /// Service id
    pub id: ServiceId,
    /// Offering provider
    pub provider_id: ProviderId,
    /// Display name, snapshotted into bookings
    pub name: String,
    /// Current list price
    pub price: Decimal,
    /// Price currency
    pub currency: Currency,
    /// Default duration in minutes
    pub duration_minutes: u32,
    /// Whether the service is currently offered
    pub is_active: bool,
}

/// Provider lookup.
pub trait ProviderDirectory: Send + Sync {
    /// Fetch a provider, `None` if unknown.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be queried.
    fn provider(&self, id: ProviderId) -> BoxFuture<'_, Result<Option<ProviderRecord>>>;
}

/// Service lookup, scoped to the offering provider.
pub trait ServiceDirectory: Send + Sync {
    /// Fetch `service_id` as offered by `provider_id`, `None` if the provider
    /// does not offer it.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be queried.
    fn service(
        &self,
        provider_id: ProviderId,
        service_id: ServiceId,
    ) -> BoxFuture<'_, Result<Option<ServiceRecord>>>;
}

/// Sink notified when a provider's schedule changed.
///
/// Failures are reported but never affect the operation that triggered them.
pub trait CacheInvalidator: Send + Sync {
    /// Drop cached data derived from `provider_id`'s schedule.
    ///
    /// # Errors
    ///
    /// Returns an error if the cache could not be reached.
    fn invalidate_provider(&self, provider_id: ProviderId) -> BoxFuture<'_, Result<()>>;
}

/// Cache sink that does nothing, for deployments without a cache.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopCacheInvalidator;

impl CacheInvalidator for NoopCacheInvalidator {
    fn invalidate_provider(&self, _provider_id: ProviderId) -> BoxFuture<'_, Result<()>> {
        Box::pin(async { Ok(()) })
    }
}
