//! In-memory catalog and cache collaborators.
//!
//! - [`MockDirectory`]: providers and services held in maps, implements both
//!   [`ProviderDirectory`] and [`ServiceDirectory`]
//! - [`RecordingCacheInvalidator`]: records every invalidation, can be told to fail

#![allow(clippy::missing_panics_doc)] // Test utilities document panics where critical

use chairbook_core::directory::{
    BoxFuture, CacheInvalidator, ProviderDirectory, ProviderRecord, ServiceDirectory,
    ServiceRecord,
};
use chairbook_core::error::{Result, TransientError};
use chairbook_core::{ProviderId, ServiceId};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

#[derive(Debug, Default)]
struct Catalog {
    providers: HashMap<ProviderId, ProviderRecord>,
    services: HashMap<(ProviderId, ServiceId), ServiceRecord>,
}

/// In-memory provider and service catalog.
///
/// # Example
///
/// ```
/// use chairbook_testing::MockDirectory;
/// use chairbook_testing::helpers::{provider_record, service_record, PROVIDER_ID, SERVICE_ID};
/// use chairbook_core::directory::ServiceDirectory;
///
/// # async fn example() -> chairbook_core::Result<()> {
/// let directory = MockDirectory::new();
/// directory.add_provider(provider_record(PROVIDER_ID));
/// directory.add_service(service_record(PROVIDER_ID, SERVICE_ID));
///
/// assert!(directory.service(PROVIDER_ID, SERVICE_ID).await?.is_some());
/// # Ok(())
/// # }
/// ```
#[derive(Clone, Debug, Default)]
pub struct MockDirectory {
    catalog: Arc<RwLock<Catalog>>,
    unavailable: Arc<AtomicBool>,
}

impl MockDirectory {
    /// Create an empty catalog.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a provider.
    pub fn add_provider(&self, provider: ProviderRecord) {
        self.catalog
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .providers
            .insert(provider.id, provider);
    }

    /// Insert or replace a service.
    pub fn add_service(&self, service: ServiceRecord) {
        self.catalog
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .services
            .insert((service.provider_id, service.id), service);
    }

    /// Make every lookup fail with `StoreUnavailable`.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn check(&self) -> Result<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(TransientError::StoreUnavailable("catalog is offline".into()).into());
        }
        Ok(())
    }
}

impl ProviderDirectory for MockDirectory {
    fn provider(&self, id: ProviderId) -> BoxFuture<'_, Result<Option<ProviderRecord>>> {
        Box::pin(async move {
            self.check()?;
            Ok(self
                .catalog
                .read()
                .unwrap_or_else(PoisonError::into_inner)
                .providers
                .get(&id)
                .cloned())
        })
    }
}

impl ServiceDirectory for MockDirectory {
    fn service(
        &self,
        provider_id: ProviderId,
        service_id: ServiceId,
    ) -> BoxFuture<'_, Result<Option<ServiceRecord>>> {
        Box::pin(async move {
            self.check()?;
            Ok(self
                .catalog
                .read()
                .unwrap_or_else(PoisonError::into_inner)
                .services
                .get(&(provider_id, service_id))
                .cloned())
        })
    }
}

/// Cache invalidator that remembers which providers were invalidated.
#[derive(Clone, Debug, Default)]
pub struct RecordingCacheInvalidator {
    invalidated: Arc<RwLock<Vec<ProviderId>>>,
    failing: Arc<AtomicBool>,
}

impl RecordingCacheInvalidator {
    /// Create a recorder with no invalidations.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every invalidation fail (failures are still recorded).
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Providers invalidated so far, in call order.
    #[must_use]
    pub fn invalidated(&self) -> Vec<ProviderId> {
        self.invalidated
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl CacheInvalidator for RecordingCacheInvalidator {
    fn invalidate_provider(&self, provider_id: ProviderId) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            self.invalidated
                .write()
                .unwrap_or_else(PoisonError::into_inner)
                .push(provider_id);
            if self.failing.load(Ordering::SeqCst) {
                return Err(TransientError::StoreUnavailable("cache is offline".into()).into());
            }
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use crate::helpers::{PROVIDER_ID, SERVICE_ID, provider_record, service_record};

    #[tokio::test]
    async fn services_are_scoped_to_their_provider() {
        let directory = MockDirectory::new();
        directory.add_provider(provider_record(PROVIDER_ID));
        directory.add_service(service_record(PROVIDER_ID, SERVICE_ID));

        assert!(directory.provider(PROVIDER_ID).await.unwrap().is_some());
        assert!(
            directory
                .service(ProviderId::new(99), SERVICE_ID)
                .await
                .unwrap()
                .is_none()
        );
    }

    #[tokio::test]
    async fn unavailable_directory_fails_lookups() {
        let directory = MockDirectory::new();
        directory.set_unavailable(true);
        assert!(directory.provider(PROVIDER_ID).await.unwrap_err().is_retryable());
    }

    #[tokio::test]
    async fn invalidations_are_recorded_even_when_failing() {
        let cache = RecordingCacheInvalidator::new();
        cache.invalidate_provider(PROVIDER_ID).await.unwrap();
        cache.set_failing(true);
        assert!(cache.invalidate_provider(PROVIDER_ID).await.is_err());
        assert_eq!(cache.invalidated(), vec![PROVIDER_ID, PROVIDER_ID]);
    }
}
